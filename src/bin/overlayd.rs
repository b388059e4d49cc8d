//! overlayd - live object-detection overlay over a camera feed
//!
//! This daemon:
//! 1. Loads configuration (file + OVERLAY_* environment)
//! 2. Walks the session through permissions and model loading
//! 3. Captures frames and runs at most one detection at a time
//! 4. Renders the latest detections into an in-memory overlay
//! 5. Reports status until the time limit or Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use detect_overlay::{
    ingest::{self, CameraFeed},
    spawn_model_load, DetectorRegistry, DisplayList, OverlayConfig, OverlayRenderer, Permission,
    SessionController, SessionState,
};

#[path = "../ui.rs"]
mod ui;

const STATUS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many seconds (default: run until Ctrl-C).
    #[arg(long)]
    seconds: Option<u64>,
    /// Flip the Start/Stop toggle every N seconds.
    #[arg(long, value_name = "SECS")]
    toggle_every: Option<u64>,
    /// Simulate the user denying the camera permission.
    #[arg(long)]
    deny_camera: bool,
    /// Simulate the user denying the microphone permission.
    #[arg(long)]
    deny_microphone: bool,
    /// Extra attempts after a failed model load.
    #[arg(long, default_value_t = 2)]
    model_retries: u32,
    /// Print the registered detector backends and exit.
    #[arg(long)]
    list_backends: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(ui::UiMode::parse(&args.ui), std::io::stderr().is_terminal());

    let registry = DetectorRegistry::with_builtin();
    if args.list_backends {
        for name in registry.list() {
            println!("{name}");
        }
        return Ok(());
    }

    let config = {
        let _stage = ui.stage("Load configuration");
        OverlayConfig::load_from(args.config.as_deref())?
    };
    log::info!(
        "camera {} {}x{} @ {} fps, detector '{}', policy {}",
        config.camera.source,
        config.camera.width,
        config.camera.height,
        config.camera.fps,
        config.detector.backend,
        config.scheduler.policy
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let renderer = OverlayRenderer::new(DisplayList::new(), config.overlay.clone());
    let mut session = SessionController::new(renderer, config.scheduler, config.adapter()?);

    // --- permissions --------------------------------------------------------
    let stage = ui.stage("Request permissions");
    session.request_permissions()?;
    let mut denied = None;
    for (permission, granted) in [
        (Permission::Camera, !args.deny_camera),
        (Permission::Microphone, !args.deny_microphone),
    ] {
        if let Err(err) = session.on_permission(permission, granted) {
            denied = Some(err);
        }
    }
    if let Some(err) = denied {
        stage.fail(&session.status_text());
        return Err(err.into());
    }
    drop(stage);

    // --- model --------------------------------------------------------------
    let mut attempt = 0;
    while session.state() == SessionState::AwaitingModel {
        attempt += 1;
        let stage = ui.stage(&format!("Load detector '{}'", config.detector.backend));
        let result = spawn_model_load(registry.clone(), config.detector.clone())?.wait();
        match session.on_model_loaded(result) {
            Ok(_) => drop(stage),
            Err(err) if attempt <= args.model_retries => {
                stage.fail(&err.to_string());
                session.retry_model_load()?;
            }
            Err(err) => {
                stage.fail(&session.status_text());
                return Err(err.into());
            }
        }
    }

    // --- capture ------------------------------------------------------------
    session.start()?;
    let sink = Arc::new(session.frame_sink());
    let feed = match ingest::open_source(&config.camera)
        .and_then(|source| CameraFeed::spawn(source, sink, session.activation(), config.camera.fps))
    {
        Ok(feed) => feed,
        Err(err) => {
            session.on_camera_unavailable(format!("{:#}", err));
            eprintln!("{}", session.status_text());
            session.shutdown()?;
            return Err(err);
        }
    };

    let started = Instant::now();
    let mut last_toggle = Instant::now();
    let mut status = ui.status_line();
    loop {
        match rx.recv_timeout(STATUS_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                status.println("shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if args
            .seconds
            .is_some_and(|limit| started.elapsed() >= Duration::from_secs(limit))
        {
            break;
        }
        if let Some(every) = args.toggle_every {
            if last_toggle.elapsed() >= Duration::from_secs(every) {
                session.toggle()?;
                last_toggle = Instant::now();
                status.println(&format!("toggled: {}", session.status_text()));
            }
        }
        if !feed.is_running() {
            status.println("camera feed ended");
            break;
        }
        status.update(status_report(&session));
    }
    status.finish();

    if session.state() == SessionState::Running {
        session.stop()?;
    }
    match feed.stop() {
        Ok(source) => log::info!(
            "captured {} frame(s) from {}",
            source.frames_captured,
            source.source
        ),
        Err(err) => {
            session.on_camera_unavailable(format!("{:#}", err));
            log::error!("{}", session.status_text());
        }
    }

    let stats = session.stats();
    log::info!(
        "offered {} submitted {} published {} dropped {} (busy {}, replaced {}, evicted {}, inactive {}, conversion {}) failed {} stale {} discarded {} abandoned {} skipped {}",
        stats.frames_offered,
        stats.submitted,
        stats.published,
        stats.dropped_total(),
        stats.dropped_busy,
        stats.replaced,
        stats.evicted,
        stats.dropped_inactive,
        stats.conversion_failures,
        stats.inference_failures,
        stats.stale_results,
        stats.discarded_results,
        stats.abandoned,
        stats.skipped
    );
    session.shutdown()
}

fn status_report(session: &SessionController<DisplayList>) -> String {
    let stats = session.stats();
    let overlay = {
        let renderer = session.renderer();
        let renderer = renderer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let labels = renderer.surface().labels().join(", ");
        if labels.is_empty() {
            "-".to_string()
        } else {
            labels
        }
    };
    format!(
        "{} [{}] published {} / submitted {} / dropped {} | overlay: {}",
        session.status_text(),
        session.toggle_label(),
        stats.published,
        stats.submitted,
        stats.dropped_total(),
        overlay
    )
}
