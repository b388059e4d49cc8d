//! Detection results.

/// Axis-aligned box in frame-pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates, normalising inverted corners.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        let (left, right) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (top, bottom) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn scaled(self, sx: f32, sy: f32) -> Self {
        Self::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Score in `0.0..=1.0`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Ordered detections produced by one inference call.
///
/// Immutable once built: there are no mutable accessors. `frame_width` and
/// `frame_height` give the coordinate space the boxes live in.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
    frame_width: u32,
    frame_height: u32,
}

impl DetectionSet {
    pub fn new(frame_width: u32, frame_height: u32, detections: Vec<Detection>) -> Self {
        Self {
            detections,
            frame_width,
            frame_height,
        }
    }

    pub fn empty(frame_width: u32, frame_height: u32) -> Self {
        Self::new(frame_width, frame_height, Vec::new())
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
