use anyhow::Result;

use crate::detect::result::DetectionSet;
use crate::frame::Tensor;

/// A loaded detection model.
///
/// The pipeline treats a detector as a slow, singly-owned resource: it is
/// moved onto the inference worker thread and `detect` is never called
/// concurrently. Implementations report boxes in the coordinate space of the
/// tensor's source frame (`Tensor::source_size`).
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one tensor.
    ///
    /// The tensor is borrowed for the duration of the call and released by the
    /// pipeline as soon as this returns.
    fn detect(&mut self, tensor: &Tensor) -> Result<DetectionSet>;

    /// Optional warm-up hook, run once by the model loader.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, tensor: &Tensor) -> Result<DetectionSet> {
        (**self).detect(tensor)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
