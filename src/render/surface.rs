//! Drawing surface abstraction and a recording implementation.

use std::fmt;

use crate::detect::BoundingBox;
use crate::frame::Viewport;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const RED: Color = Color::rgb(255, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#rrggbb`, `#rrggbbaa` or one of a few named colors.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "red" => return Some(Color::RED),
            "green" => return Some(Color::rgb(0, 255, 0)),
            "blue" => return Some(Color::rgb(0, 0, 255)),
            "yellow" => return Some(Color::rgb(255, 255, 0)),
            "white" => return Some(Color::rgb(255, 255, 255)),
            _ => {}
        }
        let hex = value.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Color::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Color {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Font {
    pub family: String,
    pub size_px: f32,
    pub color: Color,
}

/// Something boxes and labels can be drawn onto.
///
/// Implementations sit on top of whatever the host displays (a canvas, a GPU
/// layer, a test recorder). All coordinates are view pixels.
pub trait Surface {
    /// Erase everything previously drawn.
    fn clear(&mut self);
    fn stroke_rect(&mut self, rect: BoundingBox, stroke: &Stroke);
    fn fill_text(&mut self, text: &str, origin: Point, font: &Font);
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    StrokeRect { rect: BoundingBox, stroke: Stroke },
    FillText { text: String, origin: Point, font: Font },
}

/// Surface that records draw commands since the last clear.
#[derive(Clone, Debug, Default)]
pub struct DisplayList {
    commands: Vec<DrawCommand>,
    clears: u64,
    size: Option<Viewport>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of boxes currently drawn.
    pub fn box_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::StrokeRect { .. }))
            .count()
    }

    /// Label texts currently drawn, in draw order.
    pub fn labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::FillText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// How many times the surface has been cleared.
    pub fn clears(&self) -> u64 {
        self.clears
    }

    /// Size the surface was last laid out at, if the host reported one.
    pub fn size(&self) -> Option<Viewport> {
        self.size
    }

    pub fn resize(&mut self, viewport: Viewport) {
        self.size = Some(viewport);
    }
}

impl Surface for DisplayList {
    fn clear(&mut self) {
        self.commands.clear();
        self.clears += 1;
    }

    fn stroke_rect(&mut self, rect: BoundingBox, stroke: &Stroke) {
        self.commands.push(DrawCommand::StrokeRect {
            rect,
            stroke: *stroke,
        });
    }

    fn fill_text(&mut self, text: &str, origin: Point, font: &Font) {
        self.commands.push(DrawCommand::FillText {
            text: text.to_string(),
            origin,
            font: font.clone(),
        });
    }
}
