use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use detect_overlay::config::OverlayConfig;
use detect_overlay::render::Color;
use detect_overlay::{AdmissionPolicy, PixelFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OVERLAY_CONFIG",
        "OVERLAY_CAMERA_SOURCE",
        "OVERLAY_CAMERA_FPS",
        "OVERLAY_PIXEL_FORMAT",
        "OVERLAY_DETECTOR_BACKEND",
        "OVERLAY_MODEL_PATH",
        "OVERLAY_LABELS_PATH",
        "OVERLAY_STUB_LATENCY_MS",
        "OVERLAY_ADMISSION_POLICY",
        "OVERLAY_QUEUE_CAPACITY",
        "OVERLAY_INFERENCE_DEADLINE_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = OverlayConfig::load().expect("load config");
    assert_eq!(cfg.camera.source, "stub://back_camera");
    assert_eq!(cfg.camera.fps, 30);
    assert_eq!(cfg.camera.pixel_format, PixelFormat::Nv12);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.scheduler.policy, AdmissionPolicy::LatestWins);
    assert_eq!(cfg.scheduler.inference_deadline, None);
    assert_eq!(cfg.overlay.color, Color::RED);
    assert_eq!(cfg.overlay.line_width, 3.0);
    assert_eq!(cfg.overlay.font_size_px, 16.0);
    assert!(cfg.adapter().unwrap().input_size().is_none());
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        ".json",
        r##"{
            "camera": {
                "source": "stub://front",
                "fps": 15,
                "width": 1280,
                "height": 720,
                "pixel_format": "bgra32",
                "rotate_every": 90
            },
            "detector": {
                "backend": "stub",
                "input_width": 300,
                "input_height": 300,
                "score_threshold": 0.4,
                "simulated_latency_ms": 250
            },
            "scheduler": {
                "policy": "bounded",
                "queue_capacity": 3
            },
            "overlay": {
                "color": "#00ff00",
                "show_confidence": true
            }
        }"##,
    );

    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_CAMERA_FPS", "24");
    std::env::set_var("OVERLAY_INFERENCE_DEADLINE_MS", "2000");

    let cfg = OverlayConfig::load().expect("load config");

    assert_eq!(cfg.camera.source, "stub://front");
    assert_eq!(cfg.camera.fps, 24);
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.pixel_format, PixelFormat::Bgra32);
    assert_eq!(cfg.camera.rotate_every, Some(90));
    assert_eq!(cfg.detector.input_size(), Some((300, 300)));
    assert_eq!(cfg.detector.score_threshold, 0.4);
    assert_eq!(cfg.detector.simulated_latency, Duration::from_millis(250));
    assert_eq!(
        cfg.scheduler.policy,
        AdmissionPolicy::Bounded(NonZeroUsize::new(3).unwrap())
    );
    assert_eq!(
        cfg.scheduler.inference_deadline,
        Some(Duration::from_millis(2000))
    );
    assert_eq!(cfg.overlay.color, Color::rgb(0, 255, 0));
    assert!(cfg.overlay.show_confidence);
    assert_eq!(cfg.adapter().unwrap().input_size(), Some((300, 300)));

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        ".toml",
        r#"
            [camera]
            source = "stub://toml"
            pixel_format = "rgb24"

            [scheduler]
            policy = "drop_while_busy"

            [overlay]
            label_offset = 8.0
            min_label_y = 12.0
        "#,
    );
    std::env::set_var("OVERLAY_DETECTOR_BACKEND", "tract");
    std::env::set_var("OVERLAY_MODEL_PATH", "/models/ssd.onnx");

    let cfg = OverlayConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.camera.source, "stub://toml");
    assert_eq!(cfg.camera.pixel_format, PixelFormat::Rgb24);
    assert_eq!(cfg.scheduler.policy, AdmissionPolicy::DropWhileBusy);
    assert_eq!(cfg.overlay.label_offset, 8.0);
    assert_eq!(cfg.overlay.min_label_y, 12.0);
    assert_eq!(cfg.detector.backend, "tract");
    assert_eq!(
        cfg.detector.model_path.as_deref(),
        Some(std::path::Path::new("/models/ssd.onnx"))
    );

    clear_env();
}

#[test]
fn env_policy_override_uses_queue_capacity() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OVERLAY_ADMISSION_POLICY", "bounded");
    std::env::set_var("OVERLAY_QUEUE_CAPACITY", "6");
    let cfg = OverlayConfig::load().expect("load config");
    assert_eq!(
        cfg.scheduler.policy,
        AdmissionPolicy::Bounded(NonZeroUsize::new(6).unwrap())
    );

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        (r#"{"camera": {"fps": 0}}"#, "fps"),
        (r#"{"camera": {"pixel_format": "yuyv"}}"#, "pixel format"),
        (r#"{"detector": {"score_threshold": 1.5}}"#, "score_threshold"),
        (r#"{"detector": {"input_width": 300}}"#, "set together"),
        (r#"{"scheduler": {"policy": "fifo"}}"#, "admission policy"),
        (
            r#"{"scheduler": {"policy": "bounded", "queue_capacity": 0}}"#,
            "admission policy",
        ),
        (r#"{"overlay": {"color": "mauve"}}"#, "color"),
        (r#"{"camera": "#, "invalid config file"),
    ];
    for (json, expected) in cases {
        let file = write_temp(".json", json);
        let err = OverlayConfig::load_from(Some(file.path())).unwrap_err();
        assert!(
            format!("{:#}", err).contains(expected),
            "{} -> {:#}",
            json,
            err
        );
    }

    std::env::set_var("OVERLAY_CAMERA_FPS", "fast");
    let err = OverlayConfig::load().unwrap_err();
    assert!(err.to_string().contains("OVERLAY_CAMERA_FPS"));

    clear_env();
}

#[test]
fn missing_file_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = OverlayConfig::load_from(Some(std::path::Path::new(
        "/nonexistent/overlay.json",
    )))
    .unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}
