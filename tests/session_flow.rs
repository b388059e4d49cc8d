use std::time::Duration;

use detect_overlay::config::DetectorSettings;
use detect_overlay::{
    spawn_model_load, Affordance, BoundingBox, Detection, DetectionSet, DetectorRegistry,
    DisplayList, DropReason, Frame, FrameAdapter, FrameDisposition, FrameSink, ModelLoadError,
    OverlayRenderer, OverlayStyle, Permission, PixelFormat, SchedulerConfig, SessionController,
    SessionError, SessionFault, SessionState, StubDetector, Viewport,
};

fn controller() -> SessionController<DisplayList> {
    SessionController::new(
        OverlayRenderer::new(DisplayList::new(), OverlayStyle::default()),
        SchedulerConfig::default(),
        FrameAdapter::new(),
    )
}

fn frame(sequence: u64) -> Frame {
    Frame::new(vec![0u8; 2 * 2 * 3], 2, 2, PixelFormat::Rgb24, sequence)
}

fn granted(session: &mut SessionController<DisplayList>) {
    session.request_permissions().unwrap();
    session.on_permission(Permission::Camera, true).unwrap();
    session.on_permission(Permission::Microphone, true).unwrap();
}

fn ready(session: &mut SessionController<DisplayList>) {
    granted(session);
    session
        .on_model_loaded(Ok(Box::new(StubDetector::new())))
        .unwrap();
}

#[test]
fn happy_path_reaches_running() {
    let mut session = controller();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.affordance(), Some(Affordance::RequestPermissions));

    session.request_permissions().unwrap();
    assert_eq!(session.status_text(), "Requesting permissions...");

    assert_eq!(
        session.on_permission(Permission::Camera, true).unwrap(),
        SessionState::AwaitingPermissions
    );
    assert_eq!(
        session.on_permission(Permission::Microphone, true).unwrap(),
        SessionState::AwaitingModel
    );
    session
        .on_model_loaded(Ok(Box::new(StubDetector::new())))
        .unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.toggle_label(), "Start Camera");
    assert_eq!(session.affordance(), Some(Affordance::Start));

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert!(session.activation().is_active());
    assert_eq!(session.toggle_label(), "Stop Camera");
    assert_eq!(session.affordance(), Some(Affordance::Stop));

    session.shutdown().unwrap();
}

#[test]
fn denied_permission_never_runs_and_frames_never_reach_scheduler() {
    let mut session = controller();
    session.request_permissions().unwrap();
    let err = session.on_permission(Permission::Camera, false).unwrap_err();
    assert!(matches!(err, SessionError::PermissionDenied(Permission::Camera)));
    session.on_permission(Permission::Microphone, true).unwrap();

    assert_eq!(session.state(), SessionState::AwaitingPermissions);
    assert_eq!(
        session.fault(),
        Some(&SessionFault::PermissionDenied(Permission::Camera))
    );
    assert!(session.status_text().starts_with("Permissions are not granted"));
    assert_eq!(session.affordance(), Some(Affordance::RequestPermissions));

    assert!(matches!(
        session.start(),
        Err(SessionError::InvalidTransition {
            from: SessionState::AwaitingPermissions,
            ..
        })
    ));
    for sequence in 0..5 {
        assert_eq!(
            session.push_frame(&frame(sequence)),
            FrameDisposition::Dropped(DropReason::Inactive)
        );
    }
    assert!(session.scheduler_state().is_none());
    assert_eq!(session.stats().frames_offered, 0);
}

#[test]
fn re_request_after_denial_clears_fault() {
    let mut session = controller();
    session.request_permissions().unwrap();
    let _ = session.on_permission(Permission::Microphone, false);
    session.request_permissions().unwrap();
    assert!(session.fault().is_none());

    session.on_permission(Permission::Camera, true).unwrap();
    session.on_permission(Permission::Microphone, true).unwrap();
    assert_eq!(session.state(), SessionState::AwaitingModel);
}

#[test]
fn model_load_failure_waits_for_retry() {
    let mut session = controller();
    granted(&mut session);

    let err = session
        .on_model_loaded(Err(ModelLoadError::UnknownBackend("coral".into())))
        .unwrap_err();
    assert!(matches!(err, SessionError::ModelLoad(_)));
    assert_eq!(session.state(), SessionState::AwaitingModel);
    assert!(session.status_text().contains("coral"));
    assert_eq!(session.affordance(), Some(Affordance::RetryModelLoad));

    session.retry_model_load().unwrap();
    assert!(session.fault().is_none());
    assert_eq!(session.status_text(), "Loading model...");

    let load = spawn_model_load(DetectorRegistry::with_builtin(), DetectorSettings::default())
        .unwrap();
    session.on_model_loaded(load.wait()).unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn background_load_can_be_polled() {
    let mut session = controller();
    granted(&mut session);
    let mut load = spawn_model_load(
        DetectorRegistry::with_builtin(),
        DetectorSettings {
            simulated_latency: Duration::ZERO,
            ..DetectorSettings::default()
        },
    )
    .unwrap();
    let result = load
        .wait_timeout(Duration::from_secs(5))
        .expect("model load timed out");
    session.on_model_loaded(result).unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn invalid_transitions_are_rejected() {
    let mut session = controller();
    assert!(matches!(
        session.stop(),
        Err(SessionError::InvalidTransition {
            from: SessionState::Idle,
            event: "stop"
        })
    ));
    assert!(session.on_permission(Permission::Camera, true).is_err());
    assert!(session
        .on_model_loaded(Ok(Box::new(StubDetector::new())))
        .is_err());
    assert!(session.retry_model_load().is_err());

    ready(&mut session);
    assert!(session.request_permissions().is_err());
    let err = session.stop().unwrap_err();
    assert_eq!(err.to_string(), "cannot stop while ready");
}

#[test]
fn toggle_cycles_between_running_and_stopped() {
    let mut session = controller();
    ready(&mut session);

    assert_eq!(session.toggle().unwrap(), SessionState::Running);
    assert_eq!(session.toggle().unwrap(), SessionState::Stopped);
    assert!(!session.activation().is_active());
    assert_eq!(session.status_text(), "Camera stopped");
    assert_eq!(
        session.push_frame(&frame(1)),
        FrameDisposition::Dropped(DropReason::Inactive)
    );
    assert_eq!(session.toggle().unwrap(), SessionState::Running);
}

#[test]
fn revoked_permission_halts_running_session() {
    let mut session = controller();
    ready(&mut session);
    session.start().unwrap();

    let err = session.on_permission(Permission::Camera, false).unwrap_err();
    assert!(matches!(err, SessionError::PermissionDenied(Permission::Camera)));
    assert_eq!(session.state(), SessionState::AwaitingPermissions);
    assert!(!session.activation().is_active());

    // the loaded model survives, so granting again goes straight to Ready
    session.request_permissions().unwrap();
    session.on_permission(Permission::Camera, true).unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn camera_loss_stops_and_reports() {
    let mut session = controller();
    ready(&mut session);
    session.start().unwrap();

    session.on_camera_unavailable("device unplugged");
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(
        session.status_text(),
        "No camera device available: device unplugged"
    );
    session.start().unwrap();
    assert!(session.fault().is_none());
}

#[test]
fn camera_geometry_is_kept_by_the_session_across_model_load() {
    let mut session = controller();
    let sink = session.frame_sink();
    let landscape = Viewport::new(640, 480);

    // reported before any model exists: remembered, frames ignored
    sink.on_geometry_change(landscape);
    sink.on_frame(&frame(0));
    assert_eq!(session.viewport(), Some(landscape));

    ready(&mut session);
    session.start().unwrap();
    session.renderer().lock().unwrap().render(
        &DetectionSet::new(
            640,
            480,
            vec![Detection::new("cup", 0.8, BoundingBox::new(1.0, 1.0, 5.0, 5.0))],
        ),
        landscape,
    );

    // the new pipeline already knows the landscape geometry, so a rotation is
    // a change and the old overlay goes away
    sink.on_geometry_change(landscape.rotated());
    assert_eq!(session.viewport(), Some(landscape.rotated()));
    assert!(session.renderer().lock().unwrap().surface().is_empty());

    sink.on_frame(&frame(1));
    assert_eq!(session.stats().frames_offered, 1);
    session.shutdown().unwrap();
}
