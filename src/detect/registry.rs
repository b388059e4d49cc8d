use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::config::DetectorSettings;
use crate::detect::backend::Detector;
use crate::detect::backends::StubDetector;
use crate::detect::labels::Labels;
use crate::error::ModelLoadError;

/// Builds a detector from settings.
pub type DetectorFactory =
    Arc<dyn Fn(&DetectorSettings) -> Result<Box<dyn Detector>> + Send + Sync>;

#[derive(Clone)]
struct BackendEntry {
    factory: DetectorFactory,
    requires_model: bool,
}

/// Registry of detector backends, keyed by name.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    backends: HashMap<String, BackendEntry>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", false, build_stub);
        #[cfg(feature = "backend-tract")]
        registry.register("tract", true, build_tract);
        registry
    }

    /// Register a backend factory. `requires_model` backends refuse to load
    /// without `model_path`.
    pub fn register<F>(&mut self, name: &str, requires_model: bool, factory: F)
    where
        F: Fn(&DetectorSettings) -> Result<Box<dyn Detector>> + Send + Sync + 'static,
    {
        self.backends.insert(
            name.to_string(),
            BackendEntry {
                factory: Arc::new(factory),
                requires_model,
            },
        );
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build and warm up the backend named in `settings`.
    pub fn load(&self, settings: &DetectorSettings) -> Result<Box<dyn Detector>, ModelLoadError> {
        let name = settings.backend.as_str();
        let entry = self
            .backends
            .get(name)
            .ok_or_else(|| ModelLoadError::UnknownBackend(name.to_string()))?;
        if entry.requires_model && settings.model_path.is_none() {
            return Err(ModelLoadError::MissingModelPath(name.to_string()));
        }

        let backend_err = |cause: anyhow::Error| ModelLoadError::Backend {
            backend: name.to_string(),
            cause,
        };
        let mut detector = (entry.factory)(settings).map_err(backend_err)?;
        detector
            .warm_up()
            .context("warm-up failed")
            .map_err(backend_err)?;
        Ok(detector)
    }
}

fn load_labels(settings: &DetectorSettings) -> Result<Labels> {
    match &settings.labels_path {
        Some(path) => Labels::from_file(path),
        None => Ok(Labels::coco()),
    }
}

fn build_stub(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let detector = StubDetector::new()
        .with_latency(settings.simulated_latency)
        .with_failure_every(settings.failure_every)
        .with_labels(load_labels(settings)?);
    Ok(Box::new(detector))
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    use crate::detect::backends::TractDetector;

    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("tract backend requires a model path"))?;
    let (width, height) = settings
        .input_size()
        .ok_or_else(|| anyhow::anyhow!("tract backend requires input_width and input_height"))?;
    let detector = TractDetector::new(model_path, width, height)?
        .with_threshold(settings.score_threshold)
        .with_max_detections(settings.max_detections)
        .with_labels(load_labels(settings)?);
    Ok(Box::new(detector))
}

// ----------------------------------------------------------------------------
// Background model loading
// ----------------------------------------------------------------------------

/// In-progress model load running on a background thread.
///
/// This is the "model ready" signal the session controller waits on.
pub struct ModelLoad {
    rx: Receiver<Result<Box<dyn Detector>, ModelLoadError>>,
    handle: Option<JoinHandle<()>>,
}

/// Start loading the configured backend off the calling thread.
pub fn spawn_model_load(
    registry: DetectorRegistry,
    settings: DetectorSettings,
) -> Result<ModelLoad> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let handle = std::thread::Builder::new()
        .name("overlay-model-load".into())
        .spawn(move || {
            log::info!("loading detector backend '{}'", settings.backend);
            let result = registry.load(&settings);
            match &result {
                Ok(detector) => log::info!("detector '{}' ready", detector.name()),
                Err(e) => log::error!("detector load failed: {}", e),
            }
            let _ = tx.send(result);
        })
        .context("failed to spawn model loader thread")?;
    Ok(ModelLoad {
        rx,
        handle: Some(handle),
    })
}

impl ModelLoad {
    /// Block until the load finishes.
    pub fn wait(mut self) -> Result<Box<dyn Detector>, ModelLoadError> {
        let result = self.rx.recv().unwrap_or(Err(ModelLoadError::LoaderLost));
        self.join();
        result
    }

    /// Block for at most `timeout`; `None` means still loading.
    pub fn wait_timeout(
        &mut self,
        timeout: Duration,
    ) -> Option<Result<Box<dyn Detector>, ModelLoadError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ModelLoadError::LoaderLost)),
        }
    }

    /// Non-blocking poll.
    pub fn try_result(&mut self) -> Option<Result<Box<dyn Detector>, ModelLoadError>> {
        match self.rx.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ModelLoadError::LoaderLost)),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("model loader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn builtin_registry_loads_stub() {
        let registry = DetectorRegistry::with_builtin();
        assert!(registry.list().contains(&"stub".to_string()));
        let detector = registry.load(&DetectorSettings::default()).unwrap();
        assert_eq!(detector.name(), "stub");
    }

    #[test]
    fn unknown_backend_is_reported() {
        let registry = DetectorRegistry::with_builtin();
        let settings = DetectorSettings {
            backend: "coral".into(),
            ..DetectorSettings::default()
        };
        assert!(matches!(
            registry.load(&settings),
            Err(ModelLoadError::UnknownBackend(name)) if name == "coral"
        ));
    }

    #[test]
    fn model_backed_factory_requires_path() {
        let mut registry = DetectorRegistry::new();
        registry.register("onnx", true, |_| Ok(Box::new(StubDetector::new())));
        let settings = DetectorSettings {
            backend: "onnx".into(),
            ..DetectorSettings::default()
        };
        assert!(matches!(
            registry.load(&settings),
            Err(ModelLoadError::MissingModelPath(_))
        ));
    }

    #[test]
    fn factory_failure_surfaces_as_backend_error() {
        let mut registry = DetectorRegistry::new();
        registry.register("broken", false, |_| Err(anyhow!("weights corrupted")));
        let settings = DetectorSettings {
            backend: "broken".into(),
            ..DetectorSettings::default()
        };
        match registry.load(&settings) {
            Err(err) => assert!(err.to_string().contains("weights corrupted")),
            Ok(_) => panic!("broken backend loaded"),
        }
    }

    #[test]
    fn background_load_delivers_detector() {
        let load = spawn_model_load(DetectorRegistry::with_builtin(), DetectorSettings::default())
            .unwrap();
        let detector = load.wait().unwrap();
        assert_eq!(detector.name(), "stub");
    }
}
