use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::CameraSettings;
use crate::frame::{Frame, PixelFormat};
use crate::ingest::{FrameSource, SourceStats};

const BACKGROUND_LUMA_MIN: u8 = 16;
const BACKGROUND_LUMA_MAX: u8 = 64;
const TARGET_LUMA: u8 = 235;
const STEP_PX: u32 = 8;

/// Synthetic camera for `stub://` sources.
///
/// Renders a dark gradient with one bright square sweeping left to right, a
/// little vertical jitter on each frame. When `rotate_every` is set, width and
/// height swap every that many frames, like a device being turned.
pub struct SyntheticCamera {
    settings: CameraSettings,
    width: u32,
    height: u32,
    frame_count: u64,
    connected: bool,
    rng: StdRng,
}

impl SyntheticCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests.
    pub fn seeded(settings: CameraSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: CameraSettings, rng: StdRng) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            settings,
            frame_count: 0,
            connected: false,
            rng,
        }
    }

    /// Top-left corner and side of the target in the next frame.
    fn target(&mut self) -> (u32, u32, u32) {
        let side = (self.width.min(self.height) / 6).max(1);
        let travel = self.width.saturating_sub(side).max(1);
        let x = ((self.frame_count as u32).wrapping_mul(STEP_PX)) % travel;
        let centre_y = self.height.saturating_sub(side) / 2;
        let jitter: i32 = self.rng.gen_range(-2..=2);
        let y = (centre_y as i32 + jitter).clamp(0, self.height.saturating_sub(side) as i32) as u32;
        (x, y, side)
    }

    fn luma_plane(&mut self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let (tx, ty, side) = self.target();
        let (tx, ty, side) = (tx as usize, ty as usize, side as usize);

        let span = (BACKGROUND_LUMA_MAX - BACKGROUND_LUMA_MIN) as usize;
        let mut luma = vec![0u8; w * h];
        for y in 0..h {
            let shade = BACKGROUND_LUMA_MIN + (y * span / h.max(1)) as u8;
            let row = &mut luma[y * w..(y + 1) * w];
            row.fill(shade);
            if (ty..ty + side).contains(&y) {
                let end = (tx + side).min(w);
                row[tx.min(end)..end].fill(TARGET_LUMA);
            }
        }
        luma
    }

    fn encode(&self, luma: &[u8]) -> Vec<u8> {
        match self.settings.pixel_format {
            PixelFormat::Rgb24 => luma.iter().flat_map(|&l| [l, l, l]).collect(),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => {
                luma.iter().flat_map(|&l| [l, l, l, 255]).collect()
            }
            PixelFormat::Nv12 => {
                let chroma = luma.len() / 2;
                let mut out = Vec::with_capacity(luma.len() + chroma);
                out.extend_from_slice(luma);
                out.resize(luma.len() + chroma, 128);
                out
            }
            // Unknown layouts get a packed 16-bit buffer the adapter will reject.
            PixelFormat::Other(_) => vec![0u8; luma.len() * 2],
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn connect(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!(
                "synthetic camera {} has zero dimensions",
                self.settings.source
            );
        }
        self.connected = true;
        log::info!(
            "SyntheticCamera: connected to {} ({}x{} {})",
            self.settings.source,
            self.width,
            self.height,
            self.settings.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            bail!("synthetic camera {} is not connected", self.settings.source);
        }
        self.frame_count += 1;
        if let Some(every) = self.settings.rotate_every {
            if every > 0 && self.frame_count > 1 && (self.frame_count - 1) % every == 0 {
                std::mem::swap(&mut self.width, &mut self.height);
                log::debug!(
                    "SyntheticCamera: rotated to {}x{}",
                    self.width,
                    self.height
                );
            }
        }
        let luma = self.luma_plane();
        let pixels = self.encode(&luma);
        Ok(Frame::new(
            pixels,
            self.width,
            self.height,
            self.settings.pixel_format,
            self.frame_count,
        ))
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.settings.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FrameAdapter;

    fn settings(format: PixelFormat) -> CameraSettings {
        CameraSettings {
            width: 64,
            height: 48,
            pixel_format: format,
            ..CameraSettings::default()
        }
    }

    #[test]
    fn frames_are_sequenced_and_sized() {
        let mut camera = SyntheticCamera::seeded(settings(PixelFormat::Nv12), 7);
        camera.connect().unwrap();
        let first = camera.next_frame().unwrap();
        let second = camera.next_frame().unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(first.byte_len(), 64 * 48 * 3 / 2);
        assert_eq!(camera.stats().frames_captured, 2);
    }

    #[test]
    fn every_supported_format_adapts() {
        for format in [
            PixelFormat::Rgb24,
            PixelFormat::Rgba32,
            PixelFormat::Bgra32,
            PixelFormat::Nv12,
        ] {
            let mut camera = SyntheticCamera::seeded(settings(format), 1);
            camera.connect().unwrap();
            let frame = camera.next_frame().unwrap();
            let tensor = FrameAdapter::new().adapt(&frame).unwrap();
            assert_eq!(tensor.shape(), [48, 64, 3]);
        }
    }

    #[test]
    fn target_is_bright() {
        let mut camera = SyntheticCamera::seeded(settings(PixelFormat::Rgb24), 3);
        camera.connect().unwrap();
        let frame = camera.next_frame().unwrap();
        let tensor = FrameAdapter::new().adapt(&frame).unwrap();
        let bright = (0..48)
            .flat_map(|y| (0..64).map(move |x| (x, y)))
            .filter(|&(x, y)| tensor.pixel(x, y).is_some_and(|p| p[0] == TARGET_LUMA))
            .count();
        // 8x8 target
        assert_eq!(bright, 64);
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let mut camera = SyntheticCamera::seeded(
            CameraSettings {
                rotate_every: Some(2),
                ..settings(PixelFormat::Rgb24)
            },
            5,
        );
        camera.connect().unwrap();
        let sizes: Vec<(u32, u32)> = (0..5)
            .map(|_| {
                let f = camera.next_frame().unwrap();
                (f.width, f.height)
            })
            .collect();
        assert_eq!(sizes, vec![(64, 48), (64, 48), (48, 64), (48, 64), (64, 48)]);
    }

    #[test]
    fn capture_requires_connect() {
        let mut camera = SyntheticCamera::seeded(settings(PixelFormat::Rgb24), 0);
        assert!(camera.next_frame().is_err());
    }
}
