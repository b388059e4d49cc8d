//! Session lifecycle: permissions, model readiness, start/stop.
//!
//! ```text
//! Idle -> AwaitingPermissions -> AwaitingModel -> Ready <-> Running
//!                                                  Stopped <-^
//! ```
//!
//! The controller owns the activation flag. Stopping clears it first, then
//! halts the pipeline, so a detector call that completes afterwards can never
//! reach the renderer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::adapter::FrameAdapter;
use crate::detect::Detector;
use crate::error::{ModelLoadError, Permission, SessionError};
use crate::frame::{Frame, Viewport};
use crate::ingest::FrameSink;
use crate::pipeline::{FrameDisposition, Pipeline, PipelineHandle};
use crate::render::{OverlayRenderer, SharedRenderer, Surface};
use crate::scheduler::{DropReason, SchedulerConfig, SchedulerState, SchedulerStats};

/// Shared "session is running" bit, read by the camera feed and scheduler.
#[derive(Clone, Debug, Default)]
pub struct ActivationFlag(Arc<AtomicBool>);

impl ActivationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn activate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingPermissions,
    AwaitingModel,
    Ready,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingPermissions => "awaiting permissions",
            SessionState::AwaitingModel => "awaiting model",
            SessionState::Ready => "ready",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Last user-visible failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionFault {
    PermissionDenied(Permission),
    ModelLoad(String),
    NoCamera(String),
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::PermissionDenied(permission) => {
                write!(f, "Permissions are not granted ({} denied)", permission)
            }
            SessionFault::ModelLoad(cause) => write!(f, "Failed to load model: {}", cause),
            SessionFault::NoCamera(cause) => write!(f, "No camera device available: {}", cause),
        }
    }
}

/// Next action the host UI should offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Affordance {
    RequestPermissions,
    RetryModelLoad,
    Start,
    Stop,
}

/// Current geometry and the pipeline frames are routed to. Shared between
/// the controller and its `SessionSink`s.
struct Route<S> {
    viewport: Option<Viewport>,
    pipeline: Option<PipelineHandle<S>>,
}

fn lock_route<S>(route: &Mutex<Route<S>>) -> MutexGuard<'_, Route<S>> {
    route.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frame sink for the camera feed. Geometry changes update the session's
/// viewport before reaching the pipeline, so a pipeline created by a later
/// model load starts with the current geometry.
pub struct SessionSink<S> {
    route: Arc<Mutex<Route<S>>>,
}

impl<S: Surface + Send> FrameSink for SessionSink<S> {
    fn on_frame(&self, frame: &Frame) {
        let pipeline = lock_route(&self.route).pipeline.clone();
        if let Some(pipeline) = pipeline {
            let disposition = pipeline.push_frame(frame);
            log::trace!("frame {}: {:?}", frame.sequence, disposition);
        }
    }

    fn on_geometry_change(&self, viewport: Viewport) {
        let mut route = lock_route(&self.route);
        route.viewport = Some(viewport);
        if let Some(pipeline) = &route.pipeline {
            pipeline.set_viewport(viewport);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Grant {
    Pending,
    Granted,
    Denied,
}

pub struct SessionController<S> {
    state: SessionState,
    fault: Option<SessionFault>,
    camera: Grant,
    microphone: Grant,
    activation: ActivationFlag,
    renderer: SharedRenderer<S>,
    scheduler_config: SchedulerConfig,
    adapter: FrameAdapter,
    pipeline: Option<Pipeline<S>>,
    route: Arc<Mutex<Route<S>>>,
}

impl<S: Surface + Send + 'static> SessionController<S> {
    pub fn new(
        renderer: OverlayRenderer<S>,
        scheduler_config: SchedulerConfig,
        adapter: FrameAdapter,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            fault: None,
            camera: Grant::Pending,
            microphone: Grant::Pending,
            activation: ActivationFlag::new(),
            renderer: renderer.into_shared(),
            scheduler_config,
            adapter,
            pipeline: None,
            route: Arc::new(Mutex::new(Route {
                viewport: None,
                pipeline: None,
            })),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fault(&self) -> Option<&SessionFault> {
        self.fault.as_ref()
    }

    pub fn activation(&self) -> ActivationFlag {
        self.activation.clone()
    }

    pub fn renderer(&self) -> SharedRenderer<S> {
        Arc::clone(&self.renderer)
    }

    /// Sink for a frame producer. Frames reach whichever pipeline is current;
    /// before a model is loaded they are ignored.
    pub fn frame_sink(&self) -> SessionSink<S> {
        SessionSink {
            route: Arc::clone(&self.route),
        }
    }

    /// Last geometry reported by the host or the camera feed.
    pub fn viewport(&self) -> Option<Viewport> {
        lock_route(&self.route).viewport
    }

    /// User-facing status line.
    pub fn status_text(&self) -> String {
        if let Some(fault) = &self.fault {
            return fault.to_string();
        }
        match self.state {
            SessionState::Idle => "Camera idle".to_string(),
            SessionState::AwaitingPermissions => "Requesting permissions...".to_string(),
            SessionState::AwaitingModel => "Loading model...".to_string(),
            SessionState::Ready => "Model loaded. Ready to start.".to_string(),
            SessionState::Running => "Detecting objects...".to_string(),
            SessionState::Stopped => "Camera stopped".to_string(),
        }
    }

    pub fn toggle_label(&self) -> &'static str {
        if self.state == SessionState::Running {
            "Stop Camera"
        } else {
            "Start Camera"
        }
    }

    pub fn affordance(&self) -> Option<Affordance> {
        match (&self.fault, self.state) {
            (Some(SessionFault::PermissionDenied(_)), _) => Some(Affordance::RequestPermissions),
            (Some(SessionFault::ModelLoad(_)), SessionState::AwaitingModel) => {
                Some(Affordance::RetryModelLoad)
            }
            (_, SessionState::Ready | SessionState::Stopped) => Some(Affordance::Start),
            (_, SessionState::Running) => Some(Affordance::Stop),
            (_, SessionState::Idle) => Some(Affordance::RequestPermissions),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------------

    /// Begin (or re-begin after a denial) the permission request.
    pub fn request_permissions(&mut self) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::AwaitingPermissions => {}
            from => {
                return Err(SessionError::InvalidTransition {
                    from,
                    event: "request permissions",
                })
            }
        }
        for grant in [&mut self.camera, &mut self.microphone] {
            if *grant == Grant::Denied {
                *grant = Grant::Pending;
            }
        }
        if let Some(SessionFault::PermissionDenied(_)) = self.fault {
            self.fault = None;
        }
        self.state = SessionState::AwaitingPermissions;
        log::info!("requesting camera and microphone permissions");
        Ok(self.state)
    }

    /// Record the user's answer for one permission.
    ///
    /// A denial after the gate was passed (revocation) stops the session and
    /// sends it back to `AwaitingPermissions`.
    pub fn on_permission(
        &mut self,
        permission: Permission,
        granted: bool,
    ) -> Result<SessionState, SessionError> {
        if self.state == SessionState::Idle {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                event: "receive a permission result",
            });
        }

        let grant = if granted { Grant::Granted } else { Grant::Denied };
        match permission {
            Permission::Camera => self.camera = grant,
            Permission::Microphone => self.microphone = grant,
        }

        if !granted {
            if self.state != SessionState::AwaitingPermissions {
                log::warn!("{} permission revoked while {}", permission, self.state);
                self.halt_pipeline();
                self.state = SessionState::AwaitingPermissions;
            }
            self.fault = Some(SessionFault::PermissionDenied(permission));
            return Err(SessionError::PermissionDenied(permission));
        }

        if self.state == SessionState::AwaitingPermissions
            && self.camera == Grant::Granted
            && self.microphone == Grant::Granted
        {
            self.fault = None;
            self.state = if self.pipeline.is_some() {
                SessionState::Ready
            } else {
                SessionState::AwaitingModel
            };
            log::info!("permissions granted; session {}", self.state);
        }
        Ok(self.state)
    }

    // ------------------------------------------------------------------------
    // Model
    // ------------------------------------------------------------------------

    /// Deliver the outcome of a model load.
    pub fn on_model_loaded(
        &mut self,
        result: Result<Box<dyn Detector>, ModelLoadError>,
    ) -> Result<SessionState, SessionError> {
        if self.state != SessionState::AwaitingModel {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                event: "accept a loaded model",
            });
        }
        let detector = match result {
            Ok(detector) => detector,
            Err(err) => {
                log::error!("model load failed: {}", err);
                self.fault = Some(SessionFault::ModelLoad(err.to_string()));
                return Err(SessionError::ModelLoad(err));
            }
        };

        let name = detector.name();
        let pipeline = Pipeline::spawn(
            detector,
            self.scheduler_config,
            self.adapter,
            Arc::clone(&self.renderer),
            self.activation.clone(),
        )
        .map_err(SessionError::Pipeline)?;
        {
            let mut route = lock_route(&self.route);
            if let Some(viewport) = route.viewport {
                pipeline.set_viewport(viewport);
            }
            route.pipeline = Some(pipeline.handle());
        }
        if let Some(old) = self.pipeline.replace(pipeline) {
            if let Err(err) = old.shutdown() {
                log::warn!("previous pipeline did not shut down cleanly: {:#}", err);
            }
        }
        self.fault = None;
        self.state = SessionState::Ready;
        log::info!("detector '{}' loaded; session ready", name);
        Ok(self.state)
    }

    /// Clear a model-load fault so the host can load again.
    pub fn retry_model_load(&mut self) -> Result<SessionState, SessionError> {
        if self.state != SessionState::AwaitingModel {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                event: "retry the model load",
            });
        }
        if let Some(SessionFault::ModelLoad(_)) = self.fault {
            self.fault = None;
        }
        log::info!("retrying model load");
        Ok(self.state)
    }

    // ------------------------------------------------------------------------
    // Start / stop
    // ------------------------------------------------------------------------

    pub fn start(&mut self) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::Ready | SessionState::Stopped => {}
            from => return Err(SessionError::InvalidTransition { from, event: "start" }),
        }
        let Some(pipeline) = &self.pipeline else {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                event: "start",
            });
        };
        pipeline.halt();
        self.activation.activate();
        if let Some(SessionFault::NoCamera(_)) = self.fault {
            self.fault = None;
        }
        self.state = SessionState::Running;
        log::info!("detection started");
        Ok(self.state)
    }

    pub fn stop(&mut self) -> Result<SessionState, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                event: "stop",
            });
        }
        self.halt_pipeline();
        self.state = SessionState::Stopped;
        log::info!("detection stopped");
        Ok(self.state)
    }

    /// Start when stopped or ready, stop when running.
    pub fn toggle(&mut self) -> Result<SessionState, SessionError> {
        if self.state == SessionState::Running {
            self.stop()
        } else {
            self.start()
        }
    }

    // ------------------------------------------------------------------------
    // Frames and geometry
    // ------------------------------------------------------------------------

    /// The frame source could not be opened. Detection stops; the fault stays
    /// until the next successful `start`.
    pub fn on_camera_unavailable(&mut self, cause: impl fmt::Display) {
        log::error!("camera unavailable: {}", cause);
        if self.state == SessionState::Running {
            self.halt_pipeline();
            self.state = SessionState::Stopped;
        }
        self.fault = Some(SessionFault::NoCamera(cause.to_string()));
    }

    pub fn on_viewport_change(&mut self, viewport: Viewport) {
        let mut route = lock_route(&self.route);
        route.viewport = Some(viewport);
        if let Some(pipeline) = &route.pipeline {
            pipeline.set_viewport(viewport);
        }
    }

    /// Offer a camera frame. Outside `Running` the frame is dropped without
    /// touching the scheduler.
    pub fn push_frame(&self, frame: &Frame) -> FrameDisposition {
        match (&self.pipeline, self.state) {
            (Some(pipeline), SessionState::Running) => pipeline.push_frame(frame),
            _ => FrameDisposition::Dropped(DropReason::Inactive),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.pipeline
            .as_ref()
            .map(Pipeline::stats)
            .unwrap_or_default()
    }

    pub fn scheduler_state(&self) -> Option<SchedulerState> {
        self.pipeline.as_ref().map(Pipeline::scheduler_state)
    }

    /// Deactivate and join the inference worker.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.halt_pipeline();
        lock_route(&self.route).pipeline = None;
        match self.pipeline.take() {
            Some(pipeline) => pipeline.shutdown(),
            None => Ok(()),
        }
    }

    fn halt_pipeline(&mut self) {
        self.activation.deactivate();
        match &self.pipeline {
            Some(pipeline) => pipeline.halt(),
            None => self
                .renderer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clear(),
        }
    }
}
