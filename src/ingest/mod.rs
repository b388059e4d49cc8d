//! Frame ingestion.
//!
//! - `FrameSource`: something that produces frames in capture order.
//! - `SyntheticCamera`: built-in `stub://` source for demos and tests.
//! - `CameraFeed`: drives a source on its own thread and pushes each frame,
//!   by reference, into a `FrameSink`.
//!
//! Sources never retain frames after handing them out, and nothing here logs
//! pixel content.

mod feed;
mod synthetic;

pub use feed::{CameraFeed, FrameSink};
pub use synthetic::SyntheticCamera;

use anyhow::{bail, Result};

use crate::config::CameraSettings;
use crate::frame::Frame;

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

pub trait FrameSource: Send {
    /// Open the device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame, blocking until one is available.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source named in `settings.source`.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    if settings.source.starts_with("stub://") {
        Ok(Box::new(SyntheticCamera::new(settings.clone())))
    } else {
        bail!(
            "camera source '{}' is not supported (only stub:// sources are built in)",
            settings.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_sources_open() {
        let source = open_source(&CameraSettings::default()).unwrap();
        assert!(source.is_healthy());
    }

    #[test]
    fn other_schemes_are_rejected() {
        let settings = CameraSettings {
            source: "rtsp://10.0.0.4/stream".into(),
            ..CameraSettings::default()
        };
        let err = open_source(&settings).err().unwrap();
        assert!(err.to_string().contains("not supported"));
    }
}
