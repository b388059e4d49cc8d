use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::frame::{Frame, Viewport};
use crate::ingest::{FrameSource, SourceStats};
use crate::session::ActivationFlag;

const IDLE_POLL: Duration = Duration::from_millis(20);

/// Receiver of captured frames. `frame` is only valid during the call.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &Frame);

    /// Frame geometry changed (first frame, or device rotation).
    fn on_geometry_change(&self, viewport: Viewport);
}

/// Camera capture thread.
///
/// Frames are only captured while the activation flag is set; otherwise the
/// thread idles. Capture is paced to the configured frame rate.
pub struct CameraFeed {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<SourceStats>>>,
}

impl CameraFeed {
    /// Connect `source` on the calling thread, then start capturing.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        activation: ActivationFlag,
        fps: u32,
    ) -> Result<Self> {
        source.connect()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let handle = std::thread::Builder::new()
            .name("overlay-camera".into())
            .spawn(move || capture_loop(source, sink, activation, period, thread_stop))
            .context("failed to spawn camera thread")?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop capturing and return the source's final statistics.
    pub fn stop(mut self) -> Result<SourceStats> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("camera thread panicked"))?,
            None => Err(anyhow!("camera feed already stopped")),
        }
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    activation: ActivationFlag,
    period: Duration,
    stop: Arc<AtomicBool>,
) -> Result<SourceStats> {
    let mut geometry: Option<Viewport> = None;
    let mut failures: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        if !activation.is_active() {
            std::thread::sleep(IDLE_POLL);
            continue;
        }

        let started = Instant::now();
        match source.next_frame() {
            Ok(frame) => {
                let current = frame.geometry();
                if geometry != Some(current) {
                    if geometry.is_some() {
                        log::info!("camera geometry changed to {}", current);
                    }
                    sink.on_geometry_change(current);
                    geometry = Some(current);
                }
                sink.on_frame(&frame);
            }
            Err(err) => {
                failures += 1;
                log::warn!("camera capture failed ({} so far): {:#}", failures, err);
                if !source.is_healthy() {
                    return Err(err.context("camera source became unhealthy"));
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }

    let stats = source.stats();
    log::info!(
        "camera feed stopped after {} frame(s) from {}",
        stats.frames_captured,
        stats.source
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraSettings;
    use crate::frame::PixelFormat;
    use crate::ingest::SyntheticCamera;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<u64>>,
        geometries: Mutex<Vec<Viewport>>,
    }

    impl FrameSink for Recorder {
        fn on_frame(&self, frame: &Frame) {
            self.frames.lock().unwrap().push(frame.sequence);
        }

        fn on_geometry_change(&self, viewport: Viewport) {
            self.geometries.lock().unwrap().push(viewport);
        }
    }

    fn camera(rotate_every: Option<u64>) -> Box<dyn FrameSource> {
        Box::new(SyntheticCamera::seeded(
            CameraSettings {
                width: 32,
                height: 24,
                pixel_format: PixelFormat::Rgb24,
                rotate_every,
                ..CameraSettings::default()
            },
            11,
        ))
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn inactive_feed_captures_nothing() {
        let recorder = Arc::new(Recorder::default());
        let feed = CameraFeed::spawn(camera(None), recorder.clone(), ActivationFlag::new(), 200)
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let stats = feed.stop().unwrap();
        assert_eq!(stats.frames_captured, 0);
        assert!(recorder.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn active_feed_delivers_in_order_and_reports_rotation() {
        let recorder = Arc::new(Recorder::default());
        let activation = ActivationFlag::new();
        activation.activate();
        let feed = CameraFeed::spawn(camera(Some(3)), recorder.clone(), activation, 500).unwrap();
        wait_for(|| recorder.frames.lock().unwrap().len() >= 7);
        feed.stop().unwrap();

        let frames = recorder.frames.lock().unwrap().clone();
        assert!(frames.windows(2).all(|w| w[0] + 1 == w[1]));
        let geometries = recorder.geometries.lock().unwrap().clone();
        assert_eq!(
            &geometries[..3],
            &[
                Viewport::new(32, 24),
                Viewport::new(24, 32),
                Viewport::new(32, 24)
            ]
        );
    }
}
