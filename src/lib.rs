//! Live object-detection overlay
//!
//! This crate turns a stream of camera frames into bounding boxes drawn over
//! the live view, while keeping the detector strictly single-flight.
//!
//! # Architecture
//!
//! The pipeline holds four guarantees by construction:
//!
//! 1. **One inference at a time**: at most one detector call is outstanding,
//!    represented by a single non-cloneable token.
//! 2. **No frame retention**: frames are borrowed for one call; only the
//!    converted tensor outlives it, and only until the detector returns.
//! 3. **Fresh overlay only**: results for a stopped session or an outdated
//!    viewport are discarded, never drawn.
//! 4. **Failures stay local**: a bad frame or failed inference drops that
//!    frame; the session keeps running.
//!
//! # Module Structure
//!
//! - `frame`: camera frames, tensors, viewport geometry
//! - `adapter`: frame to tensor conversion
//! - `detect`: detector trait, results, backends, model loading
//! - `scheduler`: single-flight admission state machine (no I/O)
//! - `pipeline`: inference worker thread around the scheduler
//! - `render`: overlay drawing onto a `Surface`
//! - `session`: permissions, model readiness, start/stop
//! - `ingest`: frame sources and the camera feed thread
//! - `config`: file and environment configuration

pub mod adapter;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod session;

pub use adapter::FrameAdapter;
pub use config::{CameraSettings, DetectorSettings, OverlayConfig};
pub use detect::{
    spawn_model_load, BoundingBox, Detection, DetectionSet, Detector, DetectorRegistry, Labels,
    ModelLoad, StubDetector,
};
pub use error::{ConversionError, InferenceError, ModelLoadError, Permission, SessionError};
pub use frame::{Frame, PixelFormat, Tensor, Viewport};
pub use ingest::{CameraFeed, FrameSink, FrameSource, SourceStats, SyntheticCamera};
pub use pipeline::{FrameDisposition, Pipeline, PipelineHandle};
pub use render::{DisplayList, OverlayRenderer, OverlayStyle, SharedRenderer, Surface};
pub use scheduler::{
    AdmissionPolicy, DropReason, InferenceScheduler, SchedulerConfig, SchedulerState,
    SchedulerStats, Ticket,
};
pub use session::{
    ActivationFlag, Affordance, SessionController, SessionFault, SessionSink, SessionState,
};
