use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::FrameAdapter;
use crate::frame::PixelFormat;
use crate::render::{Color, OverlayStyle};
use crate::scheduler::{AdmissionPolicy, SchedulerConfig};

const DEFAULT_CAMERA_SOURCE: &str = "stub://back_camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_PIXEL_FORMAT: PixelFormat = PixelFormat::Nv12;
const MAX_CAMERA_FPS: u32 = 240;

const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_MAX_DETECTIONS: usize = 20;
const DEFAULT_STUB_LATENCY_MS: u64 = 120;

const DEFAULT_QUEUE_CAPACITY: usize = 4;

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    scheduler: Option<SchedulerConfigFile>,
    overlay: Option<OverlayStyleFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    pixel_format: Option<String>,
    rotate_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    score_threshold: Option<f32>,
    max_detections: Option<usize>,
    simulated_latency_ms: Option<u64>,
    failure_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SchedulerConfigFile {
    policy: Option<String>,
    queue_capacity: Option<usize>,
    inference_deadline_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayStyleFile {
    color: Option<String>,
    line_width: Option<f32>,
    font_family: Option<String>,
    font_size_px: Option<f32>,
    label_offset: Option<f32>,
    min_label_y: Option<f32>,
    show_confidence: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub scheduler: SchedulerConfig,
    pub overlay: OverlayStyle,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Synthetic sources swap width and height every this many frames.
    pub rotate_every: Option<u64>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_CAMERA_SOURCE.to_string(),
            fps: DEFAULT_CAMERA_FPS,
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            pixel_format: DEFAULT_PIXEL_FORMAT,
            rotate_every: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: Option<u32>,
    pub input_height: Option<u32>,
    pub score_threshold: f32,
    pub max_detections: usize,
    /// Stub backend only.
    pub simulated_latency: Duration,
    /// Stub backend only: fail every n-th call.
    pub failure_every: Option<u64>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: None,
            labels_path: None,
            input_width: None,
            input_height: None,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
            simulated_latency: Duration::from_millis(DEFAULT_STUB_LATENCY_MS),
            failure_every: None,
        }
    }
}

impl DetectorSettings {
    /// Fixed detector input size, when both dimensions are configured.
    pub fn input_size(&self) -> Option<(u32, u32)> {
        Some((self.input_width?, self.input_height?))
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            camera: CameraSettings::default(),
            detector: DetectorSettings::default(),
            scheduler: SchedulerConfig::default(),
            overlay: OverlayStyle::default(),
        }
    }
}

impl OverlayConfig {
    /// Load from `OVERLAY_CONFIG` (if set), then apply `OVERLAY_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (JSON, or TOML for `.toml`), then apply
    /// `OVERLAY_*` overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => OverlayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Adapter matching the configured detector input size.
    pub fn adapter(&self) -> Result<FrameAdapter> {
        match self.detector.input_size() {
            Some((width, height)) => Ok(FrameAdapter::with_input_size(width, height)?),
            None => Ok(FrameAdapter::new()),
        }
    }

    fn from_file(file: OverlayConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera_defaults = CameraSettings::default();
        let camera = CameraSettings {
            source: camera_file.source.unwrap_or(camera_defaults.source),
            fps: camera_file.fps.unwrap_or(camera_defaults.fps),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
            pixel_format: match camera_file.pixel_format.as_deref() {
                Some(name) => parse_pixel_format(name)?,
                None => camera_defaults.pixel_format,
            },
            rotate_every: camera_file.rotate_every,
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector_defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(detector_defaults.backend),
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            input_width: detector_file.input_width,
            input_height: detector_file.input_height,
            score_threshold: detector_file
                .score_threshold
                .unwrap_or(detector_defaults.score_threshold),
            max_detections: detector_file
                .max_detections
                .unwrap_or(detector_defaults.max_detections),
            simulated_latency: detector_file
                .simulated_latency_ms
                .map(Duration::from_millis)
                .unwrap_or(detector_defaults.simulated_latency),
            failure_every: detector_file.failure_every,
        };

        let scheduler_file = file.scheduler.unwrap_or_default();
        let scheduler = SchedulerConfig {
            policy: match scheduler_file.policy.as_deref() {
                Some(name) => parse_policy(
                    name,
                    scheduler_file
                        .queue_capacity
                        .unwrap_or(DEFAULT_QUEUE_CAPACITY),
                )?,
                None => AdmissionPolicy::default(),
            },
            inference_deadline: scheduler_file
                .inference_deadline_ms
                .map(Duration::from_millis),
        };

        let style_file = file.overlay.unwrap_or_default();
        let style_defaults = OverlayStyle::default();
        let overlay = OverlayStyle {
            color: match style_file.color.as_deref() {
                Some(value) => {
                    Color::parse(value).ok_or_else(|| anyhow!("invalid overlay color '{}'", value))?
                }
                None => style_defaults.color,
            },
            line_width: style_file.line_width.unwrap_or(style_defaults.line_width),
            font_family: style_file
                .font_family
                .unwrap_or(style_defaults.font_family),
            font_size_px: style_file
                .font_size_px
                .unwrap_or(style_defaults.font_size_px),
            label_offset: style_file
                .label_offset
                .unwrap_or(style_defaults.label_offset),
            min_label_y: style_file.min_label_y.unwrap_or(style_defaults.min_label_y),
            show_confidence: style_file
                .show_confidence
                .unwrap_or(style_defaults.show_confidence),
        };

        Ok(Self {
            camera,
            detector,
            scheduler,
            overlay,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = non_empty_env("OVERLAY_CAMERA_SOURCE") {
            self.camera.source = source;
        }
        if let Some(fps) = non_empty_env("OVERLAY_CAMERA_FPS") {
            self.camera.fps = fps
                .parse()
                .map_err(|_| anyhow!("OVERLAY_CAMERA_FPS must be an integer"))?;
        }
        if let Some(format) = non_empty_env("OVERLAY_PIXEL_FORMAT") {
            self.camera.pixel_format = parse_pixel_format(&format)?;
        }
        if let Some(backend) = non_empty_env("OVERLAY_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("OVERLAY_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("OVERLAY_LABELS_PATH") {
            self.detector.labels_path = Some(PathBuf::from(path));
        }
        if let Some(latency) = non_empty_env("OVERLAY_STUB_LATENCY_MS") {
            let ms: u64 = latency
                .parse()
                .map_err(|_| anyhow!("OVERLAY_STUB_LATENCY_MS must be an integer number of milliseconds"))?;
            self.detector.simulated_latency = Duration::from_millis(ms);
        }

        let capacity = match non_empty_env("OVERLAY_QUEUE_CAPACITY") {
            Some(value) => Some(
                value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("OVERLAY_QUEUE_CAPACITY must be an integer"))?,
            ),
            None => None,
        };
        if let Some(policy) = non_empty_env("OVERLAY_ADMISSION_POLICY") {
            let capacity = capacity.unwrap_or(match self.scheduler.policy {
                AdmissionPolicy::Bounded(n) => n.get(),
                _ => DEFAULT_QUEUE_CAPACITY,
            });
            self.scheduler.policy = parse_policy(&policy, capacity)?;
        } else if let Some(capacity) = capacity {
            if let AdmissionPolicy::Bounded(_) = self.scheduler.policy {
                self.scheduler.policy = parse_policy("bounded", capacity)?;
            }
        }
        if let Some(deadline) = non_empty_env("OVERLAY_INFERENCE_DEADLINE_MS") {
            let ms: u64 = deadline.parse().map_err(|_| {
                anyhow!("OVERLAY_INFERENCE_DEADLINE_MS must be an integer number of milliseconds")
            })?;
            // 0 turns the deadline off
            self.scheduler.inference_deadline = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.fps == 0 || self.camera.fps > MAX_CAMERA_FPS {
            return Err(anyhow!(
                "camera fps must be between 1 and {}",
                MAX_CAMERA_FPS
            ));
        }
        if let PixelFormat::Other(_) = self.camera.pixel_format {
            return Err(anyhow!(
                "camera pixel format {} is not supported",
                self.camera.pixel_format
            ));
        }
        if self.camera.rotate_every == Some(0) {
            return Err(anyhow!("camera rotate_every must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(anyhow!("detector score_threshold must be within 0.0..=1.0"));
        }
        if self.detector.max_detections == 0 {
            return Err(anyhow!("detector max_detections must be greater than zero"));
        }
        match (self.detector.input_width, self.detector.input_height) {
            (Some(0), _) | (_, Some(0)) => {
                return Err(anyhow!("detector input size must be greater than zero"))
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(anyhow!(
                    "detector input_width and input_height must be set together"
                ))
            }
            _ => {}
        }
        if self.scheduler.inference_deadline == Some(Duration::ZERO) {
            return Err(anyhow!("inference deadline must be greater than zero"));
        }
        if self.overlay.line_width <= 0.0 || self.overlay.font_size_px <= 0.0 {
            return Err(anyhow!("overlay line_width and font_size_px must be positive"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_pixel_format(name: &str) -> Result<PixelFormat> {
    PixelFormat::from_name(name).ok_or_else(|| {
        anyhow!(
            "unknown pixel format '{}' (expected rgb24, rgba32, bgra32 or nv12)",
            name
        )
    })
}

fn parse_policy(name: &str, queue_capacity: usize) -> Result<AdmissionPolicy> {
    AdmissionPolicy::from_name(name, queue_capacity).ok_or_else(|| {
        anyhow!(
            "invalid admission policy '{}' (expected drop_while_busy, latest_wins or bounded with queue_capacity > 0)",
            name
        )
    })
}
