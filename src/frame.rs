//! Capture units flowing through the pipeline.
//!
//! - `Frame`: opaque camera frame. Pixel bytes are private; handlers only ever
//!   see `&Frame`, so nothing downstream can hold on to a recycled buffer.
//! - `Tensor`: owned RGB array derived from a frame, handed to the detector.
//! - `Viewport`: dimensions of the live view the overlay is composited over.

use std::fmt;
use std::time::Instant;

// ----------------------------------------------------------------------------
// PixelFormat
// ----------------------------------------------------------------------------

/// Pixel layout of a camera buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 8-bit RGB.
    Rgb24,
    /// Packed 8-bit RGBA.
    Rgba32,
    /// Packed 8-bit BGRA (common on mobile camera stacks).
    Bgra32,
    /// Y plane followed by interleaved UV at half resolution.
    Nv12,
    /// Any other layout, identified by its fourcc.
    Other(u32),
}

impl PixelFormat {
    /// Parse a config name (`rgb24`, `rgba32`, `bgra32`, `nv12`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rgb24" | "rgb" => Some(PixelFormat::Rgb24),
            "rgba32" | "rgba" => Some(PixelFormat::Rgba32),
            "bgra32" | "bgra" => Some(PixelFormat::Bgra32),
            "nv12" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }

    /// Expected buffer length for a frame of this format, if the format is known.
    pub fn buffer_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb24 => pixels.checked_mul(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => pixels.checked_mul(4),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
            PixelFormat::Other(_) => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgb24 => f.write_str("RGB24"),
            PixelFormat::Rgba32 => f.write_str("RGBA32"),
            PixelFormat::Bgra32 => f.write_str("BGRA32"),
            PixelFormat::Nv12 => f.write_str("NV12"),
            PixelFormat::Other(fourcc) => {
                let bytes = fourcc.to_le_bytes();
                if bytes.iter().all(|b| b.is_ascii_graphic()) {
                    write!(f, "fourcc '{}'", String::from_utf8_lossy(&bytes))
                } else {
                    write!(f, "fourcc {:#010x}", fourcc)
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Opaque camera frame. There is no `Clone` and no public byte accessor.
///
/// A frame is only valid for the duration of the handling callback that
/// receives it; the camera layer reuses the backing buffer afterwards.
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Capture order, assigned by the frame source.
    pub sequence: u64,

    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            format,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Viewport matching this frame's geometry.
    pub fn geometry(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    pub(crate) fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.byte_len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tensor
// ----------------------------------------------------------------------------

/// Number of channels in every tensor produced by the adapter.
pub const TENSOR_CHANNELS: usize = 3;

/// `height x width x 3` RGB tensor in row-major (HWC) order.
///
/// `source_width`/`source_height` record the size of the frame the tensor was
/// sampled from, so detectors can report boxes in frame-pixel coordinates even
/// when the tensor was resampled to a fixed model input size.
pub struct Tensor {
    data: Vec<u8>,
    width: usize,
    height: usize,
    source_width: u32,
    source_height: u32,
}

impl Tensor {
    pub(crate) fn from_rgb(
        data: Vec<u8>,
        width: usize,
        height: usize,
        source_width: u32,
        source_height: u32,
    ) -> Self {
        debug_assert_eq!(data.len(), width * height * TENSOR_CHANNELS);
        Self {
            data,
            width,
            height,
            source_width,
            source_height,
        }
    }

    /// `[height, width, channels]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, TENSOR_CHANNELS]
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn source_size(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.width + x) * TENSOR_CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("source", &self.source_size())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Viewport
// ----------------------------------------------------------------------------

/// Size of the live view, in view pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The same view after a 90 degree device rotation.
    pub fn rotated(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_debug_hides_pixels() {
        let frame = Frame::new(vec![7u8; 12], 2, 2, PixelFormat::Rgb24, 3);
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("sequence: 3"));
        assert!(rendered.contains("bytes: 12"));
        assert!(!rendered.contains("[7"));
    }

    #[test]
    fn buffer_len_per_format() {
        assert_eq!(PixelFormat::Rgb24.buffer_len(4, 2), Some(24));
        assert_eq!(PixelFormat::Bgra32.buffer_len(4, 2), Some(32));
        assert_eq!(PixelFormat::Nv12.buffer_len(4, 2), Some(12));
        assert_eq!(PixelFormat::Other(0x5659_5559).buffer_len(4, 2), None);
    }

    #[test]
    fn pixel_format_names() {
        assert_eq!(PixelFormat::from_name("NV12"), Some(PixelFormat::Nv12));
        assert_eq!(PixelFormat::from_name(" bgra "), Some(PixelFormat::Bgra32));
        assert_eq!(PixelFormat::from_name("yuyv"), None);
        assert_eq!(PixelFormat::Other(u32::from_le_bytes(*b"YUYV")).to_string(), "fourcc 'YUYV'");
    }

    #[test]
    fn tensor_pixel_lookup() {
        let tensor = Tensor::from_rgb(vec![1, 2, 3, 4, 5, 6], 2, 1, 2, 1);
        assert_eq!(tensor.shape(), [1, 2, 3]);
        assert_eq!(tensor.pixel(1, 0), Some([4, 5, 6]));
        assert_eq!(tensor.pixel(2, 0), None);
    }

    #[test]
    fn viewport_rotation_swaps_axes() {
        assert_eq!(Viewport::new(640, 480).rotated(), Viewport::new(480, 640));
    }
}
