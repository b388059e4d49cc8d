//! Inference scheduler: the admission state machine between the camera and
//! the detector.
//!
//! The scheduler performs no I/O. It decides what happens to each offered
//! frame, hands out `InferenceJob`s for the caller to dispatch, and turns
//! detector completions into `Completion`s for the caller to act on. That keeps
//! every transition deterministic and testable without threads.
//!
//! Rules:
//! - At most one inference is outstanding, represented by the single
//!   `InFlightToken` held in `token`.
//! - A released token (reset, deadline) does not free the worker. Until the
//!   worker hands back the ticket it is running, new frames wait in the
//!   pending slot, so the dispatch channel never holds more than one job.
//! - Frames arriving while busy are never submitted. Depending on the
//!   `AdmissionPolicy` they are dropped, held as the single freshest pending
//!   frame, or queued in a bounded FIFO.
//! - A completion is published only if its token is still live, the session is
//!   still active and the viewport has not changed since submission.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::detect::DetectionSet;
use crate::error::InferenceError;
use crate::frame::{Tensor, Viewport};
use crate::session::ActivationFlag;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// What to do with frames that arrive while an inference is outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Drop them.
    DropWhileBusy,
    /// Keep only the newest one; it is submitted when the detector frees up.
    LatestWins,
    /// Queue up to `n`, evicting the oldest when full.
    Bounded(NonZeroUsize),
}

impl AdmissionPolicy {
    /// Parse a config name. `queue_capacity` is only used by `bounded`.
    pub fn from_name(name: &str, queue_capacity: usize) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_while_busy" | "drop" => Some(AdmissionPolicy::DropWhileBusy),
            "latest_wins" | "latest" => Some(AdmissionPolicy::LatestWins),
            "bounded" => NonZeroUsize::new(queue_capacity).map(AdmissionPolicy::Bounded),
            _ => None,
        }
    }

    /// Maximum number of pending frames held while busy.
    pub fn pending_capacity(self) -> usize {
        match self {
            AdmissionPolicy::DropWhileBusy => 0,
            AdmissionPolicy::LatestWins => 1,
            AdmissionPolicy::Bounded(n) => n.get(),
        }
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        AdmissionPolicy::LatestWins
    }
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionPolicy::DropWhileBusy => f.write_str("drop_while_busy"),
            AdmissionPolicy::LatestWins => f.write_str("latest_wins"),
            AdmissionPolicy::Bounded(n) => write!(f, "bounded({})", n),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub policy: AdmissionPolicy,
    /// Force-release a token that has been outstanding this long. Off by default.
    pub inference_deadline: Option<Duration>,
}

// ----------------------------------------------------------------------------
// States, tokens, jobs
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Submitting,
    Waiting,
    Delivering,
}

impl SchedulerState {
    pub fn is_busy(self) -> bool {
        !matches!(self, SchedulerState::Idle)
    }
}

/// Identifies one submission. Only the ticket travels with a job; the token
/// itself never leaves the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker for the single outstanding inference. Deliberately not `Clone`.
#[derive(Debug)]
pub struct InFlightToken {
    ticket: Ticket,
    frame_sequence: u64,
    viewport_generation: u64,
    submitted_at: Instant,
}

impl InFlightToken {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn frame_sequence(&self) -> u64 {
        self.frame_sequence
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.submitted_at)
    }
}

/// Work handed to the inference worker. Owns the tensor; the worker drops it
/// as soon as `detect` returns.
#[derive(Debug)]
pub struct InferenceJob {
    pub ticket: Ticket,
    pub frame_sequence: u64,
    pub tensor: Tensor,
}

struct PendingFrame {
    sequence: u64,
    tensor: Tensor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The session is not running.
    Inactive,
    /// An inference is outstanding and the policy keeps no pending frames.
    Busy,
    /// The frame could not be converted.
    Conversion,
    /// The inference worker has exited.
    WorkerUnavailable,
}

/// Outcome of offering a frame.
#[derive(Debug)]
pub enum Admission {
    /// Dispatch this job, then call `confirm_submitted` (or
    /// `abort_submission` if dispatch failed).
    Submit(InferenceJob),
    /// Held as pending; `replaced` is true if an older pending frame was
    /// dropped to make room.
    Queued { replaced: bool },
    Dropped(DropReason),
}

/// Outcome of a detector completion.
#[derive(Debug)]
pub enum Completion {
    /// Render these detections, then call `finish_delivery`.
    Publish {
        frame_sequence: u64,
        detections: DetectionSet,
    },
    /// The detector failed; the pipeline moves on.
    Failed(InferenceError),
    /// The viewport changed after submission; result dropped.
    Stale { frame_sequence: u64 },
    /// No live token for this ticket (reset, abandoned or session stopped).
    Discarded { ticket: Ticket },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_offered: u64,
    pub submitted: u64,
    pub published: u64,
    pub dropped_busy: u64,
    pub dropped_inactive: u64,
    /// Pending frames overwritten under `LatestWins`.
    pub replaced: u64,
    /// Oldest pending frames pushed out of a full `Bounded` queue.
    pub evicted: u64,
    pub conversion_failures: u64,
    pub inference_failures: u64,
    pub stale_results: u64,
    pub discarded_results: u64,
    pub abandoned: u64,
    /// Jobs released before the worker started them; the detector never ran.
    pub skipped: u64,
}

impl SchedulerStats {
    /// Frames that never reached the detector.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_busy
            + self.dropped_inactive
            + self.replaced
            + self.evicted
            + self.conversion_failures
    }
}

// ----------------------------------------------------------------------------
// InferenceScheduler
// ----------------------------------------------------------------------------

pub struct InferenceScheduler {
    config: SchedulerConfig,
    activation: ActivationFlag,
    state: SchedulerState,
    token: Option<InFlightToken>,
    /// Ticket the worker holds, from dispatch until it hands the ticket back.
    worker: Option<Ticket>,
    pending: VecDeque<PendingFrame>,
    next_ticket: u64,
    viewport: Option<Viewport>,
    viewport_generation: u64,
    stats: SchedulerStats,
}

impl InferenceScheduler {
    pub fn new(config: SchedulerConfig, activation: ActivationFlag) -> Self {
        Self {
            config,
            activation,
            state: SchedulerState::Idle,
            token: None,
            worker: None,
            pending: VecDeque::with_capacity(config.policy.pending_capacity()),
            next_ticket: 0,
            viewport: None,
            viewport_generation: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn in_flight(&self) -> Option<&InFlightToken> {
        self.token.as_ref()
    }

    /// Ticket the worker is running, which may outlive its token.
    pub fn worker_ticket(&self) -> Option<Ticket> {
        self.worker
    }

    /// True while a new job cannot be dispatched.
    pub fn is_occupied(&self) -> bool {
        self.state.is_busy() || self.worker.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence numbers of pending frames, oldest first.
    pub fn pending_sequences(&self) -> Vec<u64> {
        self.pending.iter().map(|p| p.sequence).collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Cheap admission check before paying for frame conversion.
    ///
    /// Returns `Some(reason)` (and counts the frame) when the frame would be
    /// dropped regardless of its content.
    pub fn precheck(&mut self) -> Option<DropReason> {
        if !self.activation.is_active() {
            self.stats.frames_offered += 1;
            self.stats.dropped_inactive += 1;
            return Some(DropReason::Inactive);
        }
        if self.is_occupied() && self.config.policy.pending_capacity() == 0 {
            self.stats.frames_offered += 1;
            self.stats.dropped_busy += 1;
            return Some(DropReason::Busy);
        }
        None
    }

    /// Count a frame the adapter rejected.
    pub fn record_conversion_failure(&mut self) {
        self.stats.frames_offered += 1;
        self.stats.conversion_failures += 1;
    }

    pub fn offer(&mut self, sequence: u64, tensor: Tensor) -> Admission {
        self.stats.frames_offered += 1;

        if !self.activation.is_active() {
            self.stats.dropped_inactive += 1;
            return Admission::Dropped(DropReason::Inactive);
        }

        if !self.is_occupied() && self.pending.is_empty() {
            return Admission::Submit(self.submit(sequence, tensor));
        }

        let capacity = self.config.policy.pending_capacity();
        if self.is_occupied() && capacity == 0 {
            self.stats.dropped_busy += 1;
            return Admission::Dropped(DropReason::Busy);
        }

        let mut replaced = false;
        while self.pending.len() >= capacity.max(1) {
            if let Some(evicted) = self.pending.pop_front() {
                log::trace!("pending frame {} replaced by {}", evicted.sequence, sequence);
                match self.config.policy {
                    AdmissionPolicy::Bounded(_) => self.stats.evicted += 1,
                    _ => self.stats.replaced += 1,
                }
                replaced = true;
            }
        }
        self.pending.push_back(PendingFrame { sequence, tensor });

        if self.is_occupied() {
            return Admission::Queued { replaced };
        }
        // Free with a backlog left over from a deactivation: drain in order.
        match self.take_pending() {
            Some(job) => Admission::Submit(job),
            None => Admission::Queued { replaced },
        }
    }

    /// The job returned by `offer` was handed to the worker.
    pub fn confirm_submitted(&mut self, ticket: Ticket) -> bool {
        match &self.token {
            Some(token) if token.ticket == ticket && self.state == SchedulerState::Submitting => {
                self.state = SchedulerState::Waiting;
                self.worker = Some(ticket);
                true
            }
            _ => false,
        }
    }

    /// The job returned by `offer` could not be dispatched.
    pub fn abort_submission(&mut self, ticket: Ticket) {
        if self.token.as_ref().is_some_and(|t| t.ticket == ticket) {
            self.token = None;
            self.state = SchedulerState::Idle;
        }
    }

    /// The worker is about to run `ticket`. Returns false, and frees the
    /// worker, if the job was released while it waited in the channel.
    pub fn begin(&mut self, ticket: Ticket) -> bool {
        if self.token.as_ref().is_some_and(|t| t.ticket == ticket) {
            return true;
        }
        if self.worker == Some(ticket) {
            self.worker = None;
        }
        self.stats.skipped += 1;
        false
    }

    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<DetectionSet, InferenceError>,
    ) -> Completion {
        if self.worker == Some(ticket) {
            self.worker = None;
        }
        let live = self.token.as_ref().is_some_and(|t| t.ticket == ticket)
            && matches!(
                self.state,
                SchedulerState::Submitting | SchedulerState::Waiting
            );
        if !live {
            self.stats.discarded_results += 1;
            return Completion::Discarded { ticket };
        }
        let Some(token) = self.token.take() else {
            self.stats.discarded_results += 1;
            return Completion::Discarded { ticket };
        };
        self.state = SchedulerState::Idle;

        if !self.activation.is_active() {
            self.stats.discarded_results += 1;
            return Completion::Discarded { ticket };
        }

        match result {
            Err(err) => {
                self.stats.inference_failures += 1;
                Completion::Failed(err)
            }
            Ok(_) if token.viewport_generation != self.viewport_generation => {
                self.stats.stale_results += 1;
                Completion::Stale {
                    frame_sequence: token.frame_sequence,
                }
            }
            Ok(detections) => {
                self.state = SchedulerState::Delivering;
                self.stats.published += 1;
                Completion::Publish {
                    frame_sequence: token.frame_sequence,
                    detections,
                }
            }
        }
    }

    /// The published result has been rendered.
    pub fn finish_delivery(&mut self) {
        if self.state == SchedulerState::Delivering {
            self.state = SchedulerState::Idle;
        }
    }

    /// Submit the next pending frame, if the worker is free and the session
    /// active.
    pub fn next_job(&mut self) -> Option<InferenceJob> {
        if self.is_occupied() || !self.activation.is_active() {
            return None;
        }
        self.take_pending()
    }

    /// Force back to `Idle`, forgetting the in-flight call and all pending
    /// frames. A later completion for the old ticket is discarded; the worker
    /// stays occupied until it arrives.
    pub fn reset(&mut self) {
        if let Some(token) = self.token.take() {
            log::debug!(
                "scheduler reset with inference {} (frame {}) outstanding",
                token.ticket,
                token.frame_sequence
            );
        }
        self.pending.clear();
        self.state = SchedulerState::Idle;
    }

    /// Record the current view geometry. Returns true if it changed, which
    /// invalidates any in-flight result.
    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        match self.viewport {
            Some(current) if current == viewport => false,
            Some(_) => {
                self.viewport = Some(viewport);
                self.viewport_generation += 1;
                true
            }
            None => {
                self.viewport = Some(viewport);
                false
            }
        }
    }

    /// Release a token that has outlived `inference_deadline`. The worker
    /// stays occupied, so later frames are held as pending rather than
    /// dispatched behind the stuck call.
    pub fn expire_overdue(&mut self, now: Instant) -> Option<Ticket> {
        let deadline = self.config.inference_deadline?;
        let overdue = matches!(
            self.state,
            SchedulerState::Submitting | SchedulerState::Waiting
        ) && self.token.as_ref().is_some_and(|t| t.age(now) >= deadline);
        if !overdue {
            return None;
        }
        let token = self.token.take()?;
        self.state = SchedulerState::Idle;
        self.stats.abandoned += 1;
        log::warn!(
            "inference {} (frame {}) exceeded {:?}; abandoning",
            token.ticket,
            token.frame_sequence,
            deadline
        );
        Some(token.ticket)
    }

    fn take_pending(&mut self) -> Option<InferenceJob> {
        let PendingFrame { sequence, tensor } = self.pending.pop_front()?;
        Some(self.submit(sequence, tensor))
    }

    fn submit(&mut self, frame_sequence: u64, tensor: Tensor) -> InferenceJob {
        debug_assert!(self.token.is_none(), "second in-flight token");
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.token = Some(InFlightToken {
            ticket,
            frame_sequence,
            viewport_generation: self.viewport_generation,
            submitted_at: Instant::now(),
        });
        self.state = SchedulerState::Submitting;
        self.stats.submitted += 1;
        InferenceJob {
            ticket,
            frame_sequence,
            tensor,
        }
    }
}
