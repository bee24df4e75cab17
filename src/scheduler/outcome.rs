//! Per-event processing outcomes and the bounded recent-outcome log.

use crate::dispatch::ReplySource;
use crate::events::{EventKind, UserInfo};
use serde::Serialize;
use std::collections::VecDeque;

/// Why a popped event got no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The per-kind probability sample said no.
    Sampled,
    /// Too soon after the previous reply.
    Throttled,
}

/// What happened to one popped event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub event_id: String,
    pub kind: EventKind,
    pub user: UserInfo,
    pub content: String,
    pub priority: u32,
    pub sequence: u64,
    /// Final reply, or the placeholder while `provisional` is set.
    pub response: Option<String>,
    pub response_generated: bool,
    pub provisional: bool,
    pub source: Option<ReplySource>,
    pub skipped: Option<SkipReason>,
    /// Reply slot time when a reply was allowed, otherwise processing time.
    pub timestamp_ms: u64,
}

/// Most recent outcomes, oldest evicted first.
#[derive(Debug)]
pub struct OutcomeLog {
    entries: VecDeque<Outcome>,
    capacity: usize,
}

impl OutcomeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(outcome);
    }

    /// Apply `f` to the outcome for `event_id`. Returns false if it was evicted.
    pub fn update(&mut self, event_id: &str, f: impl FnOnce(&mut Outcome)) -> bool {
        match self.entries.iter_mut().rev().find(|o| o.event_id == event_id) {
            Some(outcome) => {
                f(outcome);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, event_id: &str) -> Option<Outcome> {
        self.entries
            .iter()
            .rev()
            .find(|o| o.event_id == event_id)
            .cloned()
    }

    pub fn recent(&self) -> Vec<Outcome> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn outcome(id: &str) -> Outcome {
        Outcome {
            event_id: id.into(),
            kind: EventKind::Like,
            user: UserInfo::default(),
            content: String::new(),
            priority: 70,
            sequence: 0,
            response: None,
            response_generated: false,
            provisional: false,
            source: None,
            skipped: None,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut log = OutcomeLog::new(2);
        log.record(outcome("a"));
        log.record(outcome("b"));
        log.record(outcome("c"));
        assert_eq!(log.len(), 2);
        assert!(log.get("a").is_none());
        assert!(!log.update("a", |o| o.provisional = true));
    }

    #[test]
    fn update_mutates_in_place() {
        let mut log = OutcomeLog::new(4);
        log.record(outcome("a"));
        assert!(log.update("a", |o| o.response = Some("hi".into())));
        assert_eq!(log.get("a").unwrap().response.as_deref(), Some("hi"));
    }
}
