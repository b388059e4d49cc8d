//! Frame adapter: camera frame -> detector tensor.
//!
//! Conversion is a pure function of the frame buffer. The adapter holds only
//! immutable configuration, so it can run on the camera thread while the
//! inference worker renders an earlier result.

use crate::error::ConversionError;
use crate::frame::{Frame, PixelFormat, Tensor, TENSOR_CHANNELS};

/// Converts frames into `height x width x 3` RGB tensors.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameAdapter {
    input_size: Option<(u32, u32)>,
}

impl FrameAdapter {
    /// Adapter that keeps the frame's native resolution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter that resamples every frame to a fixed detector input size.
    pub fn with_input_size(width: u32, height: u32) -> Result<Self, ConversionError> {
        if width == 0 || height == 0 {
            return Err(ConversionError::InvalidInputSize { width, height });
        }
        Ok(Self {
            input_size: Some((width, height)),
        })
    }

    pub fn input_size(&self) -> Option<(u32, u32)> {
        self.input_size
    }

    pub fn adapt(&self, frame: &Frame) -> Result<Tensor, ConversionError> {
        let (width, height) = (frame.width, frame.height);
        if width == 0 || height == 0 {
            return Err(ConversionError::ZeroDimensions { width, height });
        }

        let rgb = normalize_to_rgb(frame.pixels(), width, height, frame.format)?;

        match self.input_size {
            Some((target_w, target_h)) if (target_w, target_h) != (width, height) => {
                let resized = resize_nearest(&rgb, width, height, target_w, target_h);
                Ok(Tensor::from_rgb(
                    resized,
                    target_w as usize,
                    target_h as usize,
                    width,
                    height,
                ))
            }
            _ => Ok(Tensor::from_rgb(
                rgb,
                width as usize,
                height as usize,
                width,
                height,
            )),
        }
    }
}

fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, ConversionError> {
    if let PixelFormat::Other(_) = format {
        return Err(ConversionError::UnsupportedFormat(format));
    }
    let expected = format
        .buffer_len(width, height)
        .ok_or(ConversionError::DimensionsOverflow(format))?;
    if pixels.len() != expected {
        return Err(ConversionError::LengthMismatch {
            format,
            expected,
            actual: pixels.len(),
        });
    }

    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Rgba32 => Ok(pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect()),
        PixelFormat::Bgra32 => Ok(pixels
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect()),
        PixelFormat::Nv12 => Ok(nv12_to_rgb(pixels, width, height)),
        PixelFormat::Other(_) => Err(ConversionError::UnsupportedFormat(format)),
    }
}

// BT.601 full-range. Buffer length is validated by the caller.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    let mut rgb = vec![0u8; y_plane * TENSOR_CHANNELS];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let (u, v) = match (pixels.get(uv_index), pixels.get(uv_index + 1)) {
                (Some(&u), Some(&v)) => (u as f32 - 128.0, v as f32 - 128.0),
                // odd widths leave the last chroma pair short
                _ => (0.0, 0.0),
            };

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * TENSOR_CHANNELS;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn resize_nearest(rgb: &[u8], width: u32, height: u32, target_w: u32, target_h: u32) -> Vec<u8> {
    let (src_w, src_h) = (width as usize, height as usize);
    let (dst_w, dst_h) = (target_w as usize, target_h as usize);

    let mut out = vec![0u8; dst_w * dst_h * TENSOR_CHANNELS];
    for y in 0..dst_h {
        let sy = (y * src_h / dst_h).min(src_h - 1);
        for x in 0..dst_w {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let src = (sy * src_w + sx) * TENSOR_CHANNELS;
            let dst = (y * dst_w + x) * TENSOR_CHANNELS;
            out[dst..dst + TENSOR_CHANNELS].copy_from_slice(&rgb[src..src + TENSOR_CHANNELS]);
        }
    }
    out
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Frame {
        Frame::new(data, width, height, format, 1)
    }

    #[test]
    fn nv12_conversion_produces_gray() {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let tensor = FrameAdapter::new()
            .adapt(&frame(nv12, 2, 2, PixelFormat::Nv12))
            .unwrap();
        assert_eq!(tensor.shape(), [2, 2, 3]);
        assert_eq!(tensor.as_slice(), &[128u8; 12][..]);
    }

    #[test]
    fn rgb_passes_through() {
        let pixels: Vec<u8> = (0..9).collect();
        let tensor = FrameAdapter::new()
            .adapt(&frame(pixels.clone(), 1, 3, PixelFormat::Rgb24))
            .unwrap();
        assert_eq!(tensor.as_slice(), &pixels[..]);
        assert_eq!(tensor.source_size(), (1, 3));
    }

    #[test]
    fn bgra_is_reordered_and_alpha_dropped() {
        let pixels = vec![10, 20, 30, 255, 40, 50, 60, 0];
        let tensor = FrameAdapter::new()
            .adapt(&frame(pixels, 2, 1, PixelFormat::Bgra32))
            .unwrap();
        assert_eq!(tensor.as_slice(), &[30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn rgba_drops_alpha() {
        let pixels = vec![1, 2, 3, 4];
        let tensor = FrameAdapter::new()
            .adapt(&frame(pixels, 1, 1, PixelFormat::Rgba32))
            .unwrap();
        assert_eq!(tensor.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let err = FrameAdapter::new()
            .adapt(&frame(Vec::new(), 0, 480, PixelFormat::Rgb24))
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::ZeroDimensions {
                width: 0,
                height: 480
            }
        );
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let yuyv = PixelFormat::Other(u32::from_le_bytes(*b"YUYV"));
        let err = FrameAdapter::new()
            .adapt(&frame(vec![0u8; 8], 2, 2, yuyv))
            .unwrap_err();
        assert_eq!(err, ConversionError::UnsupportedFormat(yuyv));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = FrameAdapter::new()
            .adapt(&frame(vec![0u8; 5], 2, 1, PixelFormat::Rgb24))
            .unwrap_err();
        assert_eq!(
            err,
            ConversionError::LengthMismatch {
                format: PixelFormat::Rgb24,
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn resamples_to_input_size() {
        // 2x2 with one distinct pixel per quadrant
        let pixels = vec![
            255, 0, 0, 0, 255, 0, //
            0, 0, 255, 255, 255, 255,
        ];
        let adapter = FrameAdapter::with_input_size(4, 4).unwrap();
        let tensor = adapter
            .adapt(&frame(pixels, 2, 2, PixelFormat::Rgb24))
            .unwrap();
        assert_eq!(tensor.shape(), [4, 4, 3]);
        assert_eq!(tensor.source_size(), (2, 2));
        assert_eq!(tensor.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(tensor.pixel(3, 0), Some([0, 255, 0]));
        assert_eq!(tensor.pixel(0, 3), Some([0, 0, 255]));
        assert_eq!(tensor.pixel(3, 3), Some([255, 255, 255]));
    }

    #[test]
    fn zero_input_size_is_rejected() {
        assert!(FrameAdapter::with_input_size(0, 300).is_err());
    }
}
