#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::labels::Labels;
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::frame::Tensor as FrameTensor;

/// Tract-based backend for SSD-style ONNX detection models.
///
/// Expects an NCHW `f32` input in `0..1` at a fixed size and three outputs:
/// boxes `[1, N, 4]` as normalised `(ymin, xmin, ymax, xmax)`, class ids
/// `[1, N]` and scores `[1, N]`. The frame adapter must be configured with the
/// same input size.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    score_threshold: f32,
    max_detections: usize,
    labels: Labels,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            score_threshold: 0.5,
            max_detections: 20,
            labels: Labels::coco(),
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_max_detections(mut self, max: usize) -> Self {
        self.max_detections = max;
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    fn build_input(&self, tensor: &FrameTensor) -> Result<Tensor> {
        if tensor.width() != self.width as usize || tensor.height() != self.height as usize {
            return Err(anyhow!(
                "tensor size {}x{} does not match model input {}x{}",
                tensor.width(),
                tensor.height(),
                self.width,
                self.height
            ));
        }

        let pixels = tensor.as_slice();
        let width = tensor.width();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, tensor.height(), width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, source: (u32, u32)) -> Result<DetectionSet> {
        if outputs.len() < 3 {
            return Err(anyhow!(
                "expected boxes, classes and scores outputs, model produced {}",
                outputs.len()
            ));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("boxes output tensor was not f32")?;
        let classes = outputs[1]
            .cast_to::<f32>()
            .context("classes output tensor is not numeric")?;
        let classes = classes
            .to_array_view::<f32>()
            .context("classes output tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("scores output tensor was not f32")?;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        if boxes.len() != scores.len() * 4 || classes.len() != scores.len() {
            return Err(anyhow!(
                "output shapes disagree: {} boxes values, {} classes, {} scores",
                boxes.len(),
                classes.len(),
                scores.len()
            ));
        }

        let (source_w, source_h) = (source.0 as f32, source.1 as f32);
        let mut detections: Vec<Detection> = scores
            .iter()
            .enumerate()
            .filter(|(_, score)| score.is_finite() && **score >= self.score_threshold)
            .map(|(i, score)| {
                let b = &boxes[i * 4..i * 4 + 4];
                let bbox = BoundingBox::from_corners(
                    b[1].clamp(0.0, 1.0) * source_w,
                    b[0].clamp(0.0, 1.0) * source_h,
                    b[3].clamp(0.0, 1.0) * source_w,
                    b[2].clamp(0.0, 1.0) * source_h,
                );
                let class_id = classes[i].max(0.0) as usize;
                Detection::new(self.labels.name(class_id), *score, bbox)
            })
            .collect();

        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(self.max_detections);
        Ok(DetectionSet::new(source.0, source.1, detections))
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, tensor: &FrameTensor) -> Result<DetectionSet> {
        let input = self.build_input(tensor)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, tensor.source_size())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Tensor::zero::<f32>(&[1, 3, self.height as usize, self.width as usize])?;
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}
