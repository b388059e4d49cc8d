mod backend;
pub mod backends;
pub mod labels;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::StubDetector;
pub use labels::Labels;
pub use registry::{spawn_model_load, DetectorFactory, DetectorRegistry, ModelLoad};
pub use result::{BoundingBox, Detection, DetectionSet};
