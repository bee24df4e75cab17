//! Preemptive playback state machine.
//!
//! The engine owns the current task, the interrupt stack of suspended tasks,
//! and a pending queue of tasks that lost a preemption decision. It never
//! touches a device: [`PlaybackEngine::poll`] hands out the next chunk and
//! the driver reports back with [`PlaybackEngine::chunk_finished`]. Every
//! decision therefore happens at a chunk boundary.

use super::chunk::AudioChunk;
use crate::config::PreemptionStep;
use crate::error::{LiveError, Result};
use crate::queue::{PriorityHeap, QueueEntry};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    /// A higher-priority arrival is being weighed against the current task.
    InterruptDecision,
    /// The current task is being suspended onto the interrupt stack.
    Interrupted,
    /// A task finished while others are suspended; the most recent resumes.
    PostInterrupt,
}

/// A synthesized line engaged with the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackTask {
    /// Owning interaction event; `None` for narration lines.
    pub event_id: Option<String>,
    pub text: String,
    pub priority: u32,
    pub sequence: u64,
    pub chunks: Vec<AudioChunk>,
    /// Index of the next chunk to play.
    pub next_chunk: usize,
    pub played: Duration,
    pub total: Duration,
}

impl PlaybackTask {
    pub fn new(
        event_id: Option<String>,
        text: impl Into<String>,
        priority: u32,
        sequence: u64,
        chunks: Vec<AudioChunk>,
    ) -> Self {
        let total = chunks.iter().map(|c| c.duration).sum();
        Self {
            event_id,
            text: text.into(),
            priority,
            sequence,
            chunks,
            next_chunk: 0,
            played: Duration::ZERO,
            total,
        }
    }

    /// Share of the task already played, in `[0, 1]`.
    pub fn elapsed_fraction(&self) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }
        (self.played.as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0)
    }

    fn is_finished(&self) -> bool {
        self.next_chunk >= self.chunks.len()
    }
}

/// A suspended task and where it picks up again.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptStackEntry {
    pub task: PlaybackTask,
    pub resume_chunk: usize,
}

/// Step function mapping elapsed fraction to the minimum priority gap
/// needed to preempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionPolicy {
    /// `(min_elapsed_fraction, min_gap)`, ascending in both.
    steps: Vec<(f64, u32)>,
}

impl PreemptionPolicy {
    /// # Errors
    ///
    /// Returns `LiveError::Config` when the steps are empty, a fraction is
    /// outside `[0, 1]`, or the gap decreases as the fraction grows.
    pub fn from_steps(steps: &[PreemptionStep]) -> Result<Self> {
        if steps.is_empty() {
            return Err(LiveError::Config(
                "playback.preemption_steps must not be empty".into(),
            ));
        }
        let mut sorted: Vec<(f64, u32)> = Vec::with_capacity(steps.len());
        for step in steps {
            let f = step.min_elapsed_fraction;
            if !f.is_finite() || !(0.0..=1.0).contains(&f) {
                return Err(LiveError::Config(format!(
                    "preemption step fraction {f} must be within [0, 1]"
                )));
            }
            sorted.push((f, step.min_gap));
        }
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in sorted.windows(2) {
            if pair[1].1 < pair[0].1 {
                return Err(LiveError::Config(format!(
                    "preemption gap must not decrease: {} at {} then {} at {}",
                    pair[0].1, pair[0].0, pair[1].1, pair[1].0
                )));
            }
        }
        Ok(Self { steps: sorted })
    }

    /// Minimum gap required at `elapsed_fraction`.
    pub fn threshold(&self, elapsed_fraction: f64) -> u32 {
        self.steps
            .iter()
            .rev()
            .find(|(from, _)| elapsed_fraction >= *from)
            .or_else(|| self.steps.first())
            .map_or(u32::MAX, |(_, gap)| *gap)
    }

    /// Whether a task at `incoming` priority displaces one at `current`.
    pub fn should_preempt(&self, current: u32, incoming: u32, elapsed_fraction: f64) -> bool {
        if incoming >= current {
            return false;
        }
        i64::from(current) - i64::from(incoming) >= i64::from(self.threshold(elapsed_fraction))
    }
}

/// Playback transitions reported to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackNotice {
    Started {
        sequence: u64,
        priority: u32,
        event_id: Option<String>,
    },
    Preempted {
        sequence: u64,
        by: u64,
        resume_chunk: usize,
        elapsed_fraction: f64,
    },
    /// Arrival lost the preemption decision and waits in the pending queue.
    Deferred { sequence: u64, behind: u64 },
    Resumed { sequence: u64, from_chunk: usize },
    Completed {
        sequence: u64,
        event_id: Option<String>,
    },
    Failed {
        sequence: u64,
        event_id: Option<String>,
        reason: String,
    },
}

/// Result of [`PlaybackEngine::poll`].
#[derive(Debug, Default)]
pub struct EngineStep {
    /// Chunk to play now, if any.
    pub chunk: Option<AudioChunk>,
    pub notices: Vec<PlaybackNotice>,
}

#[derive(Debug)]
pub struct PlaybackEngine {
    policy: PreemptionPolicy,
    state: PlaybackState,
    current: Option<PlaybackTask>,
    stack: Vec<InterruptStackEntry>,
    arrivals: PriorityHeap<PlaybackTask>,
    pending: PriorityHeap<PlaybackTask>,
    chunk_outstanding: bool,
}

impl PlaybackEngine {
    pub fn new(policy: PreemptionPolicy) -> Self {
        Self {
            policy,
            state: PlaybackState::Idle,
            current: None,
            stack: Vec::new(),
            arrivals: PriorityHeap::unbounded(),
            pending: PriorityHeap::unbounded(),
            chunk_outstanding: false,
        }
    }

    /// Buffer a task; it is examined at the next chunk boundary.
    pub fn submit(&mut self, task: PlaybackTask) {
        self.arrivals.requeue(QueueEntry {
            priority: task.priority,
            sequence: task.sequence,
            item: task,
        });
    }

    /// Resolve arrivals and return the next chunk to play.
    ///
    /// Returns no chunk while a previously handed-out chunk is still
    /// playing, or when there is nothing left to play.
    pub fn poll(&mut self) -> EngineStep {
        let mut step = EngineStep::default();
        if self.chunk_outstanding {
            return step;
        }

        while let Some(entry) = self.arrivals.pop() {
            self.decide(entry.item, &mut step.notices);
        }

        loop {
            if self.current.is_none() && !self.start_next(&mut step.notices) {
                self.state = PlaybackState::Idle;
                return step;
            }
            let Some(task) = self.current.as_ref() else {
                continue;
            };
            if task.is_finished() {
                // Zero-length audio completes without touching the device.
                self.finish_current(None, &mut step.notices);
                continue;
            }
            step.chunk = Some(task.chunks[task.next_chunk].clone());
            self.chunk_outstanding = true;
            self.state = PlaybackState::Playing;
            return step;
        }
    }

    /// Report the outcome of the chunk last returned by [`Self::poll`].
    ///
    /// A failure marks only the current task failed.
    pub fn chunk_finished(&mut self, outcome: std::result::Result<(), String>) -> Vec<PlaybackNotice> {
        let mut notices = Vec::new();
        if !self.chunk_outstanding {
            return notices;
        }
        self.chunk_outstanding = false;

        match outcome {
            Ok(()) => {
                let finished = match self.current.as_mut() {
                    Some(task) => {
                        if let Some(chunk) = task.chunks.get(task.next_chunk) {
                            task.played += chunk.duration;
                        }
                        task.next_chunk += 1;
                        task.is_finished()
                    }
                    None => false,
                };
                if finished {
                    self.finish_current(None, &mut notices);
                }
            }
            Err(reason) => self.finish_current(Some(reason), &mut notices),
        }
        notices
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current(&self) -> Option<&PlaybackTask> {
        self.current.as_ref()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing playing, suspended, pending, or buffered.
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
            && !self.chunk_outstanding
            && self.stack.is_empty()
            && self.pending.is_empty()
            && self.arrivals.is_empty()
    }

    fn decide(&mut self, incoming: PlaybackTask, notices: &mut Vec<PlaybackNotice>) {
        let Some(current) = self.current.as_ref() else {
            self.defer(incoming);
            return;
        };
        if incoming.priority >= current.priority {
            notices.push(PlaybackNotice::Deferred {
                sequence: incoming.sequence,
                behind: current.sequence,
            });
            self.defer(incoming);
            return;
        }

        self.state = PlaybackState::InterruptDecision;
        let fraction = current.elapsed_fraction();
        if !self
            .policy
            .should_preempt(current.priority, incoming.priority, fraction)
        {
            debug!(
                current = current.sequence,
                incoming = incoming.sequence,
                gap = current.priority - incoming.priority,
                fraction,
                "preemption declined"
            );
            notices.push(PlaybackNotice::Deferred {
                sequence: incoming.sequence,
                behind: current.sequence,
            });
            self.defer(incoming);
            self.state = PlaybackState::Playing;
            return;
        }

        self.state = PlaybackState::Interrupted;
        if let Some(suspended) = self.current.take() {
            info!(
                suspended = suspended.sequence,
                by = incoming.sequence,
                resume_chunk = suspended.next_chunk,
                fraction,
                "playback preempted"
            );
            notices.push(PlaybackNotice::Preempted {
                sequence: suspended.sequence,
                by: incoming.sequence,
                resume_chunk: suspended.next_chunk,
                elapsed_fraction: fraction,
            });
            let resume_chunk = suspended.next_chunk;
            self.stack.push(InterruptStackEntry {
                task: suspended,
                resume_chunk,
            });
        }
        self.begin(incoming, notices);
    }

    fn defer(&mut self, task: PlaybackTask) {
        self.pending.requeue(QueueEntry {
            priority: task.priority,
            sequence: task.sequence,
            item: task,
        });
    }

    fn begin(&mut self, task: PlaybackTask, notices: &mut Vec<PlaybackNotice>) {
        notices.push(PlaybackNotice::Started {
            sequence: task.sequence,
            priority: task.priority,
            event_id: task.event_id.clone(),
        });
        self.current = Some(task);
        self.state = PlaybackState::Playing;
    }

    /// Resume a suspended task, else start the best pending one.
    fn start_next(&mut self, notices: &mut Vec<PlaybackNotice>) -> bool {
        if self.resume_suspended(notices) {
            return true;
        }
        match self.pending.pop() {
            Some(entry) => {
                self.begin(entry.item, notices);
                true
            }
            None => false,
        }
    }

    fn resume_suspended(&mut self, notices: &mut Vec<PlaybackNotice>) -> bool {
        let Some(entry) = self.stack.pop() else {
            return false;
        };
        self.state = PlaybackState::PostInterrupt;
        let mut task = entry.task;
        task.next_chunk = entry.resume_chunk;
        info!(
            sequence = task.sequence,
            from_chunk = entry.resume_chunk,
            "playback resumed"
        );
        notices.push(PlaybackNotice::Resumed {
            sequence: task.sequence,
            from_chunk: entry.resume_chunk,
        });

        // Pending tasks that outrank the resumed one get a fresh decision.
        while self
            .pending
            .peek()
            .is_some_and(|p| p.priority < task.priority)
        {
            if let Some(p) = self.pending.pop() {
                self.arrivals.requeue(p);
            }
        }

        self.current = Some(task);
        self.state = PlaybackState::Playing;
        true
    }

    fn finish_current(&mut self, failure: Option<String>, notices: &mut Vec<PlaybackNotice>) {
        let Some(task) = self.current.take() else {
            return;
        };
        match failure {
            None => {
                debug!(sequence = task.sequence, "playback completed");
                notices.push(PlaybackNotice::Completed {
                    sequence: task.sequence,
                    event_id: task.event_id,
                });
            }
            Some(reason) => {
                warn!(sequence = task.sequence, %reason, "playback failed");
                notices.push(PlaybackNotice::Failed {
                    sequence: task.sequence,
                    event_id: task.event_id,
                    reason,
                });
            }
        }
        if !self.resume_suspended(notices) {
            self.state = PlaybackState::Idle;
        }
    }
}
