//! Interaction intake: validation, classification and enqueueing.
//!
//! `submit` is synchronous and never blocks on anything slower than a short
//! mutex-guarded structural update of the queue or the active-user table.

pub mod active_users;
pub mod classifier;
pub mod parser;

pub use active_users::{ActiveUserRecord, ActiveUserTracker};
pub use classifier::{Classification, Classifier};
pub use parser::MessageParser;

use crate::clock::Clock;
use crate::config::IntakeConfig;
use crate::error::RejectReason;
use crate::events::{EventKind, Interaction, InteractionEvent, RawEvent};
use crate::queue::PriorityQueue;
use crate::runtime::RuntimeEvent;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Where an accepted event landed in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub event_id: String,
    pub priority: u32,
    pub sequence: u64,
}

/// Intake counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntakeCounters {
    pub accepted_by_kind: BTreeMap<EventKind, u64>,
    pub rejected_by_kind: BTreeMap<EventKind, u64>,
    pub rejected_by_reason: BTreeMap<RejectReason, u64>,
}

impl IntakeCounters {
    pub fn rejected(&self, reason: RejectReason) -> u64 {
        self.rejected_by_reason.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected_by_reason.values().sum()
    }
}

/// Validates raw events and feeds the shared priority queue.
pub struct Intake {
    config: IntakeConfig,
    classifier: Classifier,
    queue: Arc<PriorityQueue<InteractionEvent>>,
    users: Mutex<ActiveUserTracker>,
    clock: Arc<dyn Clock>,
    accepting: AtomicBool,
    counters: Mutex<IntakeCounters>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl Intake {
    pub fn new(
        config: IntakeConfig,
        queue: Arc<PriorityQueue<InteractionEvent>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classifier: Classifier::new(&config),
            users: Mutex::new(ActiveUserTracker::new(
                config.max_active_users,
                config.user_timeout_ms,
            )),
            config,
            queue,
            clock,
            accepting: AtomicBool::new(true),
            counters: Mutex::new(IntakeCounters::default()),
            runtime_tx: None,
        }
    }

    /// Emit accept/reject notices on the given runtime channel.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Submit a raw event. Returns whether it was queued.
    pub fn submit(&self, raw: RawEvent) -> bool {
        self.try_submit(raw).is_ok()
    }

    /// Submit a raw event, reporting where it landed or why it was refused.
    pub fn try_submit(&self, raw: RawEvent) -> Result<Accepted, RejectReason> {
        let kind = raw.interaction.kind();
        match self.admit(raw) {
            Ok(accepted) => {
                self.count_accepted(kind);
                debug!(
                    event_id = %accepted.event_id,
                    %kind,
                    priority = accepted.priority,
                    sequence = accepted.sequence,
                    "event accepted"
                );
                self.emit(RuntimeEvent::EventAccepted {
                    event_id: accepted.event_id.clone(),
                    kind,
                    priority: accepted.priority,
                    sequence: accepted.sequence,
                });
                Ok(accepted)
            }
            Err(reason) => {
                self.count_rejected(kind, reason);
                match reason {
                    RejectReason::Overflow => warn!(%kind, "intake queue full, dropping event"),
                    _ => debug!(%kind, %reason, "event rejected"),
                }
                self.emit(RuntimeEvent::EventRejected { kind, reason });
                Err(reason)
            }
        }
    }

    fn admit(&self, raw: RawEvent) -> Result<Accepted, RejectReason> {
        if !self.is_accepting() {
            return Err(RejectReason::ShuttingDown);
        }
        validate(&raw)?;
        if self.is_blocked(&raw.interaction) {
            return Err(RejectReason::Filtered);
        }

        let now = self.clock.now_ms();
        // Future timestamps count as age zero.
        let age = now.saturating_sub(raw.arrival_ms);
        if age > self.config.stale_after_ms {
            return Err(RejectReason::Stale);
        }

        let classification = self.classifier.classify(&raw.interaction);
        let mut metadata = raw.metadata;
        if let Some(total) = classification.gift_total_value {
            metadata.insert("gift_total_value".into(), total.into());
        }
        if classification.keyword_boost {
            metadata.insert("keyword_boost".into(), true.into());
        }

        let event_id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let event = InteractionEvent {
            id: event_id.clone(),
            content: raw.interaction.describe(),
            interaction: raw.interaction,
            arrival_ms: raw.arrival_ms,
            user: raw.user,
            priority: classification.priority,
            metadata,
            processed: false,
            response_generated: false,
            response_content: None,
        };

        let user_id = event.user.id.clone();
        let level = event.user.level;
        let sequence = self
            .queue
            .push(classification.priority, event)
            .map_err(|_| RejectReason::Overflow)?;

        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .touch(&user_id, level, now);

        Ok(Accepted {
            event_id,
            priority: classification.priority,
            sequence,
        })
    }

    fn is_blocked(&self, interaction: &Interaction) -> bool {
        match interaction {
            Interaction::Comment { text } => self
                .config
                .blocked_keywords
                .iter()
                .any(|k| !k.is_empty() && text.contains(k.as_str())),
            _ => false,
        }
    }

    /// Stop accepting new events.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn active_user_count(&self) -> usize {
        self.users.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn active_user(&self, user_id: &str) -> Option<ActiveUserRecord> {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
    }

    pub fn counters(&self) -> IntakeCounters {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn queue(&self) -> &Arc<PriorityQueue<InteractionEvent>> {
        &self.queue
    }

    fn count_accepted(&self, kind: EventKind) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.accepted_by_kind.entry(kind).or_default() += 1;
    }

    fn count_rejected(&self, kind: EventKind, reason: RejectReason) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.rejected_by_kind.entry(kind).or_default() += 1;
        *counters.rejected_by_reason.entry(reason).or_default() += 1;
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.runtime_tx {
            let _ = tx.send(event);
        }
    }
}

fn validate(raw: &RawEvent) -> Result<(), RejectReason> {
    if raw.user.id.trim().is_empty() {
        return Err(RejectReason::Invalid);
    }
    match &raw.interaction {
        Interaction::Comment { text } if text.trim().is_empty() => Err(RejectReason::Invalid),
        Interaction::Gift { count: 0, .. } => Err(RejectReason::Invalid),
        _ => Ok(()),
    }
}
