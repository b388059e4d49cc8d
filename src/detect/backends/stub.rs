use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::Detector;
use crate::detect::labels::Labels;
use crate::detect::result::{BoundingBox, Detection, DetectionSet};
use crate::frame::Tensor;

/// Luma above which a pixel counts as part of the synthetic target.
const BRIGHT_LUMA: u32 = 200;

/// Stub backend for demos and tests.
///
/// "Detects" the bright region in a frame (the synthetic camera paints one)
/// and reports it as the first label. Latency and periodic failures can be
/// injected to exercise the scheduler.
pub struct StubDetector {
    latency: Duration,
    failure_every: Option<u64>,
    labels: Labels,
    calls: u64,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            failure_every: None,
            labels: Labels::coco(),
            calls: 0,
        }
    }

    /// Sleep this long inside every `detect` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every `n`th call (`n >= 1`).
    pub fn with_failure_every(mut self, n: Option<u64>) -> Self {
        self.failure_every = n.filter(|n| *n > 0);
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn bright_region(tensor: &Tensor) -> Option<(BoundingBox, f32)> {
        let (width, height) = (tensor.width(), tensor.height());
        let mut min = (usize::MAX, usize::MAX);
        let mut max = (0usize, 0usize);
        let mut hits = 0usize;

        for (index, px) in tensor.as_slice().chunks_exact(3).enumerate() {
            let luma = (299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32) / 1000;
            if luma < BRIGHT_LUMA {
                continue;
            }
            let (x, y) = (index % width, index / width);
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
            hits += 1;
        }

        if hits == 0 || width == 0 || height == 0 {
            return None;
        }

        let area = (max.0 - min.0 + 1) * (max.1 - min.1 + 1);
        let fill = hits as f32 / area as f32;
        let bbox = BoundingBox::from_corners(
            min.0 as f32,
            min.1 as f32,
            (max.0 + 1) as f32,
            (max.1 + 1) as f32,
        );
        Some((bbox, fill.clamp(0.0, 1.0)))
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, tensor: &Tensor) -> Result<DetectionSet> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.calls += 1;

        if let Some(n) = self.failure_every {
            if self.calls % n == 0 {
                return Err(anyhow!("simulated inference failure on call {}", self.calls));
            }
        }

        let (source_w, source_h) = tensor.source_size();
        let Some((bbox, confidence)) = Self::bright_region(tensor) else {
            return Ok(DetectionSet::empty(source_w, source_h));
        };

        let sx = source_w as f32 / tensor.width() as f32;
        let sy = source_h as f32 / tensor.height() as f32;
        let detection = Detection::new(self.labels.name(0), confidence, bbox.scaled(sx, sy));
        Ok(DetectionSet::new(source_w, source_h, vec![detection]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FrameAdapter;
    use crate::frame::{Frame, PixelFormat};

    fn tensor_with_square(width: u32, height: u32, square: (u32, u32, u32)) -> Tensor {
        let (sx, sy, side) = square;
        let mut pixels = vec![20u8; (width * height * 3) as usize];
        for y in sy..sy + side {
            for x in sx..sx + side {
                let offset = ((y * width + x) * 3) as usize;
                pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let frame = Frame::new(pixels, width, height, PixelFormat::Rgb24, 1);
        FrameAdapter::new().adapt(&frame).unwrap()
    }

    #[test]
    fn stub_detector_finds_bright_square() {
        let mut detector = StubDetector::new();
        let set = detector
            .detect(&tensor_with_square(32, 24, (4, 6, 8)))
            .unwrap();
        assert_eq!(set.len(), 1);
        let detection = &set.detections()[0];
        assert_eq!(detection.label, "person");
        assert_eq!(detection.bbox, BoundingBox::new(4.0, 6.0, 8.0, 8.0));
        assert_eq!(detection.confidence, 1.0);
    }

    #[test]
    fn stub_detector_reports_nothing_on_dark_frame() {
        let mut detector = StubDetector::new();
        let frame = Frame::new(vec![0u8; 48], 4, 4, PixelFormat::Rgb24, 1);
        let tensor = FrameAdapter::new().adapt(&frame).unwrap();
        let set = detector.detect(&tensor).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.frame_size(), (4, 4));
    }

    #[test]
    fn stub_detector_scales_to_source_frame() {
        let mut pixels = vec![0u8; 8 * 8 * 3];
        for y in 0..4 {
            for x in 0..4 {
                let offset = (y * 8 + x) * 3;
                pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let frame = Frame::new(pixels, 8, 8, PixelFormat::Rgb24, 1);
        let tensor = FrameAdapter::with_input_size(4, 4)
            .unwrap()
            .adapt(&frame)
            .unwrap();
        let set = StubDetector::new().detect(&tensor).unwrap();
        assert_eq!(set.detections()[0].bbox, BoundingBox::new(0.0, 0.0, 4.0, 4.0));
    }

    #[test]
    fn stub_detector_injects_failures() {
        let mut detector = StubDetector::new().with_failure_every(Some(2));
        let tensor = tensor_with_square(8, 8, (0, 0, 2));
        assert!(detector.detect(&tensor).is_ok());
        assert!(detector.detect(&tensor).is_err());
        assert!(detector.detect(&tensor).is_ok());
        assert_eq!(detector.calls(), 3);
    }
}
