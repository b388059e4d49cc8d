//! Overlay renderer.
//!
//! Each `render` call clears the surface and redraws the given detection set
//! from scratch, so exactly one set is ever on screen. Boxes arrive in frame
//! pixels and are scaled into the viewport the overlay is laid over.

mod surface;

pub use surface::{Color, DisplayList, DrawCommand, Font, Point, Stroke, Surface};

use std::sync::{Arc, Mutex};

use crate::detect::{Detection, DetectionSet};
use crate::frame::Viewport;

/// Renderer shared between the session controller and the inference worker.
pub type SharedRenderer<S> = Arc<Mutex<OverlayRenderer<S>>>;

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayStyle {
    pub color: Color,
    pub line_width: f32,
    pub font_family: String,
    pub font_size_px: f32,
    /// Labels sit this far above the top edge of their box...
    pub label_offset: f32,
    /// ...but never higher than this.
    pub min_label_y: f32,
    /// Append the confidence as a percentage.
    pub show_confidence: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: Color::RED,
            line_width: 3.0,
            font_family: "Arial".to_string(),
            font_size_px: 16.0,
            label_offset: 5.0,
            min_label_y: 10.0,
            show_confidence: false,
        }
    }
}

impl OverlayStyle {
    fn stroke(&self) -> Stroke {
        Stroke {
            color: self.color,
            width: self.line_width,
        }
    }

    fn font(&self) -> Font {
        Font {
            family: self.font_family.clone(),
            size_px: self.font_size_px,
            color: self.color,
        }
    }

    fn label_text(&self, detection: &Detection) -> String {
        if self.show_confidence {
            format!(
                "{} {:.0}%",
                detection.label,
                detection.confidence.clamp(0.0, 1.0) * 100.0
            )
        } else {
            detection.label.clone()
        }
    }
}

pub struct OverlayRenderer<S> {
    surface: S,
    style: OverlayStyle,
    rendered: u64,
}

impl<S: Surface> OverlayRenderer<S> {
    pub fn new(surface: S, style: OverlayStyle) -> Self {
        Self {
            surface,
            style,
            rendered: 0,
        }
    }

    pub fn into_shared(self) -> SharedRenderer<S> {
        Arc::new(Mutex::new(self))
    }

    /// Replace whatever is on screen with `detections`.
    pub fn render(&mut self, detections: &DetectionSet, viewport: Viewport) {
        self.surface.clear();

        let (frame_w, frame_h) = detections.frame_size();
        let sx = axis_scale(viewport.width, frame_w);
        let sy = axis_scale(viewport.height, frame_h);

        let stroke = self.style.stroke();
        let font = self.style.font();
        for detection in detections {
            let rect = detection.bbox.scaled(sx, sy);
            self.surface.stroke_rect(rect, &stroke);

            let origin = Point::new(
                rect.x,
                (rect.y - self.style.label_offset).max(self.style.min_label_y),
            );
            self.surface
                .fill_text(&self.style.label_text(detection), origin, &font);
        }
        self.rendered += 1;
        log::trace!(
            "rendered {} detection(s) into {}",
            detections.len(),
            viewport
        );
    }

    /// Remove any drawn overlay.
    pub fn clear(&mut self) {
        self.surface.clear();
    }

    /// Number of detection sets rendered so far.
    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

fn axis_scale(view: u32, frame: u32) -> f32 {
    if frame == 0 {
        1.0
    } else {
        view as f32 / frame as f32
    }
}
