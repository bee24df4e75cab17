//! Priority queue scheduler.
//!
//! Pulls events in `(priority, sequence)` order, decides whether each one
//! deserves a reply (per-kind probability, then the global throttle) and
//! hands approved events to the [`Dispatcher`]. Each popped event is
//! processed once and never re-queued.
//!
//! The core is the caller-driven [`Scheduler::process_batch`]; [`Scheduler::run`]
//! is a convenience polling loop around it.

pub mod outcome;
pub mod sampling;
pub mod throttle;

pub use outcome::{Outcome, OutcomeLog, SkipReason};
pub use sampling::{FixedSequence, RandomSource, StdRandom};
pub use throttle::ResponseThrottle;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::dispatch::{
    Dispatcher, ReplyDelivery, ReplySource, ResponseCallback, ResponseContext, ResponseSink,
};
use crate::error::RejectReason;
use crate::events::{EventKind, InteractionEvent};
use crate::intake::Intake;
use crate::queue::{PriorityQueue, QueueEntry};
use crate::runtime::RuntimeEvent;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-kind counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounters {
    pub accepted: u64,
    pub rejected: u64,
    pub processed: u64,
    /// Replies dispatched (each event at most once).
    pub responded: u64,
    pub throttled: u64,
    pub sampled_out: u64,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub active_user_count: usize,
    pub last_response_timestamp: Option<u64>,
    pub counters_by_kind: BTreeMap<EventKind, KindCounters>,
    pub rejected_by_reason: BTreeMap<RejectReason, u64>,
    pub replies_in_flight: usize,
}

/// Pulls classified events and decides which ones get a reply.
pub struct Scheduler {
    config: SchedulerConfig,
    intake: Arc<Intake>,
    queue: Arc<PriorityQueue<InteractionEvent>>,
    clock: Arc<dyn Clock>,
    throttle: Mutex<ResponseThrottle>,
    random: Mutex<Box<dyn RandomSource>>,
    dispatcher: Dispatcher,
    sink: ResponseSink,
    outcomes: Arc<Mutex<OutcomeLog>>,
    delivery: Arc<ReplyDelivery>,
    counters: Mutex<BTreeMap<EventKind, KindCounters>>,
    stop: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        intake: Arc<Intake>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sink: ResponseSink = Arc::new(RwLock::new(None));
        let outcomes = Arc::new(Mutex::new(OutcomeLog::new(config.outcome_history)));
        let delivery = Arc::new(ReplyDelivery::new(
            Arc::clone(&sink),
            Arc::clone(&outcomes),
            None,
        ));
        Self {
            throttle: Mutex::new(ResponseThrottle::new(config.min_response_interval_ms)),
            queue: Arc::clone(intake.queue()),
            config,
            intake,
            clock,
            random: Mutex::new(Box::new(StdRandom::from_entropy())),
            dispatcher,
            sink,
            outcomes,
            delivery,
            counters: Mutex::new(BTreeMap::new()),
            stop: CancellationToken::new(),
        }
    }

    /// Replace the sampling source (deterministic tests and replays).
    pub fn with_random_source(self, random: Box<dyn RandomSource>) -> Self {
        *self.random.lock().unwrap_or_else(|e| e.into_inner()) = random;
        self
    }

    /// Emit reply notices on the given runtime channel.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.delivery = Arc::new(ReplyDelivery::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.outcomes),
            Some(tx),
        ));
        self
    }

    /// Register the reply sink, replacing any previous one.
    pub fn set_response_callback<F>(&self, callback: F)
    where
        F: Fn(String, ResponseContext) + Send + Sync + 'static,
    {
        let callback: ResponseCallback = Arc::new(callback);
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Pop and process up to `max_items` events.
    pub fn process_batch(&self, max_items: usize) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while outcomes.len() < max_items {
            let Some(entry) = self.queue.pop() else {
                break;
            };
            outcomes.push(self.process_entry(entry));
        }
        outcomes
    }

    fn process_entry(&self, entry: QueueEntry<InteractionEvent>) -> Outcome {
        let QueueEntry {
            priority,
            sequence,
            item: mut event,
        } = entry;
        event.processed = true;
        let kind = event.kind();
        let now = self.clock.now_ms();
        self.bump(kind, |c| c.processed += 1);

        let probability = self.config.response_probability.for_kind(kind);
        let sample = self
            .random
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_f64();

        // The throttle slot is only reserved once the sample allows a reply.
        let decision = if !sampling::allows(sample, probability) {
            Err(SkipReason::Sampled)
        } else {
            self.throttle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .try_acquire(now)
                .ok_or(SkipReason::Throttled)
        };

        let mut outcome = Outcome {
            event_id: event.id.clone(),
            kind,
            user: event.user.clone(),
            content: event.content.clone(),
            priority,
            sequence,
            response: None,
            response_generated: false,
            provisional: false,
            source: None,
            skipped: None,
            timestamp_ms: now,
        };

        let slot = match decision {
            Ok(slot) => slot,
            Err(reason) => {
                match reason {
                    SkipReason::Sampled => self.bump(kind, |c| c.sampled_out += 1),
                    SkipReason::Throttled => self.bump(kind, |c| c.throttled += 1),
                }
                debug!(event_id = %event.id, %kind, ?reason, "processed without reply");
                outcome.skipped = Some(reason);
                self.log().record(outcome.clone());
                return outcome;
            }
        };

        self.bump(kind, |c| c.responded += 1);
        outcome.timestamp_ms = slot;
        self.log().record(outcome.clone());

        let ctx = ResponseContext {
            event_id: event.id.clone(),
            kind,
            user: event.user.clone(),
            content: event.content.clone(),
            timestamp_ms: slot,
            priority,
            sequence,
            source: ReplySource::Rule,
        };
        let event_id = event.id.clone();
        self.dispatcher.dispatch(event, ctx, &self.delivery);

        // Re-read: a synchronous reply or a fast background one may already be in.
        self.log().get(&event_id).unwrap_or(outcome)
    }

    /// Latest state of a recent outcome, including resolved generative replies.
    pub fn outcome(&self, event_id: &str) -> Option<Outcome> {
        self.log().get(event_id)
    }

    pub fn recent_outcomes(&self) -> Vec<Outcome> {
        self.log().recent()
    }

    pub fn get_status(&self) -> SchedulerStatus {
        let intake_counters = self.intake.counters();
        let mut counters_by_kind = self
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for kind in EventKind::ALL {
            let entry = counters_by_kind.entry(kind).or_default();
            entry.accepted = intake_counters
                .accepted_by_kind
                .get(&kind)
                .copied()
                .unwrap_or(0);
            entry.rejected = intake_counters
                .rejected_by_kind
                .get(&kind)
                .copied()
                .unwrap_or(0);
        }

        SchedulerStatus {
            queue_size: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            active_user_count: self.intake.active_user_count(),
            last_response_timestamp: self
                .throttle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last_slot_ms(),
            counters_by_kind,
            rejected_by_reason: intake_counters.rejected_by_reason,
            replies_in_flight: self.dispatcher.in_flight(),
        }
    }

    /// Poll the queue until `cancel` fires or [`Scheduler::stop`] is called.
    pub async fn run(&self, cancel: CancellationToken) {
        let poll = Duration::from_millis(self.config.poll_timeout_ms.max(1));
        let batch = self.config.batch_size.max(1);
        info!(batch, poll_ms = poll.as_millis() as u64, "scheduler loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.stop.cancelled() => break,
                entry = self.queue.pop_wait(poll) => {
                    if let Some(entry) = entry {
                        self.process_entry(entry);
                        self.process_batch(batch - 1);
                    }
                }
            }
        }
        info!("scheduler loop stopped");
    }

    /// Halt the polling loop. Dispatched replies keep resolving.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for in-flight generative replies. Anything still outstanding at
    /// the deadline is cancelled and resolves via the fallback answer.
    pub async fn drain(&self, timeout: Duration) -> bool {
        if self.dispatcher.drain(timeout).await {
            return true;
        }
        self.dispatcher.cancel_outstanding();
        self.dispatcher.drain(Duration::from_secs(1)).await;
        false
    }

    pub fn intake(&self) -> &Arc<Intake> {
        &self.intake
    }

    fn log(&self) -> std::sync::MutexGuard<'_, OutcomeLog> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self, kind: EventKind, f: impl FnOnce(&mut KindCounters)) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        f(counters.entry(kind).or_default());
    }
}
