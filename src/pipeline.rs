//! Threaded runtime around the inference scheduler.
//!
//! Frames are pushed from the camera thread. Conversion happens there, outside
//! any lock. Admitted jobs go over a channel to a single inference worker,
//! which runs the detector, feeds the result back through the scheduler and
//! renders it, then chains straight into the next pending frame.
//!
//! Only a free worker is sent a job, so the channel holds at most one. A job
//! whose ticket was released before the worker reached it is skipped without
//! calling the detector.
//!
//! Lock order is always scheduler, then renderer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};

use crate::adapter::FrameAdapter;
use crate::detect::{DetectionSet, Detector};
use crate::error::InferenceError;
use crate::frame::{Frame, Viewport};
use crate::render::{SharedRenderer, Surface};
use crate::scheduler::{
    Admission, Completion, DropReason, InferenceJob, InferenceScheduler, SchedulerConfig,
    SchedulerState, SchedulerStats, Ticket,
};
use crate::session::ActivationFlag;

/// What happened to a pushed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDisposition {
    Submitted { ticket: Ticket, frame_sequence: u64 },
    Queued { replaced: bool },
    Dropped(DropReason),
}

enum WorkerMessage {
    Run(InferenceJob),
    Shutdown,
}

struct Shared<S> {
    scheduler: Mutex<InferenceScheduler>,
    renderer: SharedRenderer<S>,
    adapter: FrameAdapter,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch_next(scheduler: &mut InferenceScheduler) -> Option<InferenceJob> {
    let next = scheduler.next_job();
    if let Some(job) = &next {
        scheduler.confirm_submitted(job.ticket);
    }
    next
}

impl<S: Surface> Shared<S> {
    /// Hand back the job to run now: `job` itself if its ticket is still live,
    /// otherwise whatever is pending.
    fn claim(&self, job: InferenceJob) -> Option<InferenceJob> {
        let mut scheduler = lock(&self.scheduler);
        if scheduler.begin(job.ticket) {
            return Some(job);
        }
        log::debug!(
            "frame {}: inference {} released before it started; skipped",
            job.frame_sequence,
            job.ticket
        );
        drop(job);
        dispatch_next(&mut scheduler)
    }

    /// Apply a completion and return the next job for the worker, if any.
    fn complete(
        &self,
        ticket: Ticket,
        result: Result<DetectionSet, InferenceError>,
    ) -> Option<InferenceJob> {
        let mut scheduler = lock(&self.scheduler);
        match scheduler.complete(ticket, result) {
            Completion::Publish {
                frame_sequence,
                detections,
            } => {
                let viewport = scheduler.viewport().unwrap_or_else(|| {
                    let (width, height) = detections.frame_size();
                    Viewport::new(width, height)
                });
                lock(&self.renderer).render(&detections, viewport);
                scheduler.finish_delivery();
                log::debug!(
                    "frame {}: published {} detection(s)",
                    frame_sequence,
                    detections.len()
                );
            }
            Completion::Failed(err) => log::warn!("{}", err),
            Completion::Stale { frame_sequence } => {
                log::debug!("frame {}: result dropped after viewport change", frame_sequence)
            }
            Completion::Discarded { ticket } => {
                log::debug!("inference {} completed after it was released", ticket)
            }
        }

        dispatch_next(&mut scheduler)
    }
}

/// Cloneable front end used by frame producers.
pub struct PipelineHandle<S> {
    shared: Arc<Shared<S>>,
    jobs: Sender<WorkerMessage>,
}

impl<S> Clone for PipelineHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            jobs: self.jobs.clone(),
        }
    }
}

impl<S: Surface> PipelineHandle<S> {
    /// Offer one camera frame. The frame is only borrowed for this call.
    pub fn push_frame(&self, frame: &Frame) -> FrameDisposition {
        {
            let mut scheduler = lock(&self.shared.scheduler);
            scheduler.expire_overdue(Instant::now());
            if let Some(reason) = scheduler.precheck() {
                return FrameDisposition::Dropped(reason);
            }
        }

        let tensor = match self.shared.adapter.adapt(frame) {
            Ok(tensor) => tensor,
            Err(err) => {
                log::debug!("frame {} dropped: {}", frame.sequence, err);
                lock(&self.shared.scheduler).record_conversion_failure();
                return FrameDisposition::Dropped(DropReason::Conversion);
            }
        };

        let mut scheduler = lock(&self.shared.scheduler);
        match scheduler.offer(frame.sequence, tensor) {
            Admission::Submit(job) => {
                let ticket = job.ticket;
                let frame_sequence = job.frame_sequence;
                match self.jobs.send(WorkerMessage::Run(job)) {
                    Ok(()) => {
                        scheduler.confirm_submitted(ticket);
                        FrameDisposition::Submitted {
                            ticket,
                            frame_sequence,
                        }
                    }
                    Err(_) => {
                        scheduler.abort_submission(ticket);
                        log::error!("inference worker is gone; frame {} dropped", frame_sequence);
                        FrameDisposition::Dropped(DropReason::WorkerUnavailable)
                    }
                }
            }
            Admission::Queued { replaced } => FrameDisposition::Queued { replaced },
            Admission::Dropped(reason) => FrameDisposition::Dropped(reason),
        }
    }

    /// Record new view geometry. A change invalidates the in-flight result
    /// and clears the overlay drawn for the old geometry.
    pub fn set_viewport(&self, viewport: Viewport) -> bool {
        let mut scheduler = lock(&self.shared.scheduler);
        let changed = scheduler.set_viewport(viewport);
        if changed {
            log::info!("viewport changed to {}", viewport);
            lock(&self.shared.renderer).clear();
        }
        changed
    }

    /// Drop all pending work and the in-flight token, then clear the overlay.
    pub fn halt(&self) {
        let mut scheduler = lock(&self.shared.scheduler);
        scheduler.reset();
        lock(&self.shared.renderer).clear();
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.shared.scheduler).stats()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        lock(&self.shared.scheduler).state()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.shared.scheduler).pending_len()
    }

    pub fn renderer(&self) -> SharedRenderer<S> {
        Arc::clone(&self.shared.renderer)
    }
}

/// Owns the inference worker thread.
pub struct Pipeline<S> {
    handle: PipelineHandle<S>,
    worker: Option<JoinHandle<()>>,
}

impl<S: Surface + Send + 'static> Pipeline<S> {
    pub fn spawn<D: Detector + 'static>(
        detector: D,
        config: SchedulerConfig,
        adapter: FrameAdapter,
        renderer: SharedRenderer<S>,
        activation: ActivationFlag,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            scheduler: Mutex::new(InferenceScheduler::new(config, activation)),
            renderer,
            adapter,
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("overlay-inference".into())
            .spawn(move || run_worker(detector, worker_shared, rx))
            .context("failed to spawn inference worker")?;
        log::info!("inference pipeline started (policy {})", config.policy);
        Ok(Self {
            handle: PipelineHandle { shared, jobs: tx },
            worker: Some(worker),
        })
    }
}

impl<S: Surface> Pipeline<S> {
    pub fn handle(&self) -> PipelineHandle<S> {
        self.handle.clone()
    }

    pub fn push_frame(&self, frame: &Frame) -> FrameDisposition {
        self.handle.push_frame(frame)
    }

    pub fn set_viewport(&self, viewport: Viewport) -> bool {
        self.handle.set_viewport(viewport)
    }

    pub fn halt(&self) {
        self.handle.halt()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.handle.stats()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.handle.scheduler_state()
    }

    /// Stop the worker and wait for it. A detector call in progress runs to
    /// completion first; its result is discarded if the session is inactive.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.handle.jobs.send(WorkerMessage::Shutdown);
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow!("inference worker panicked")),
            None => Ok(()),
        }
    }
}

impl<S> Drop for Pipeline<S> {
    fn drop(&mut self) {
        if self.worker.take().is_some() {
            let _ = self.handle.jobs.send(WorkerMessage::Shutdown);
        }
    }
}

fn run_worker<S: Surface, D: Detector>(
    mut detector: D,
    shared: Arc<Shared<S>>,
    jobs: Receiver<WorkerMessage>,
) {
    while let Ok(WorkerMessage::Run(job)) = jobs.recv() {
        let mut next = Some(job);
        while let Some(job) = next.take() {
            let Some(job) = shared.claim(job) else {
                break;
            };
            let InferenceJob {
                ticket,
                frame_sequence,
                tensor,
            } = job;
            let started = Instant::now();
            let result = detector
                .detect(&tensor)
                .map_err(|cause| InferenceError::new(detector.name(), cause));
            drop(tensor);
            log::trace!(
                "frame {}: {} took {:?}",
                frame_sequence,
                detector.name(),
                started.elapsed()
            );
            next = shared.complete(ticket, result);
        }
    }
    log::debug!("inference worker exiting");
}
