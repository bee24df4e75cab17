//! Interaction event types shared by intake, scheduling and dispatch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event kind tag used for counters, probabilities and base priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Comment,
    Gift,
    Follow,
    Enter,
    Like,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Comment,
        EventKind::Gift,
        EventKind::Follow,
        EventKind::Enter,
        EventKind::Like,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Gift => "gift",
            Self::Follow => "follow",
            Self::Enter => "enter",
            Self::Like => "like",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the viewer did, with the fields specific to each kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interaction {
    /// Chat message.
    Comment { text: String },
    /// Gift with its per-unit value in platform currency.
    Gift {
        name: String,
        count: u32,
        unit_value: u64,
    },
    Follow,
    /// Viewer joined the room.
    Enter,
    Like { count: u32 },
}

impl Interaction {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Comment { .. } => EventKind::Comment,
            Self::Gift { .. } => EventKind::Gift,
            Self::Follow => EventKind::Follow,
            Self::Enter => EventKind::Enter,
            Self::Like { .. } => EventKind::Like,
        }
    }

    /// Human-readable content line for outcomes and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Comment { text } => text.trim().to_owned(),
            Self::Gift { name, count, .. } => format!("sent {count} x {name}"),
            Self::Follow => "followed".into(),
            Self::Enter => "joined".into(),
            Self::Like { count } => format!("liked x{count}"),
        }
    }

    /// Total gift value, if this is a gift.
    pub fn gift_total_value(&self) -> Option<u64> {
        match self {
            Self::Gift {
                count, unit_value, ..
            } => Some(u64::from(*count).saturating_mul(*unit_value)),
            _ => None,
        }
    }
}

/// The viewer behind an event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub nickname: String,
    #[serde(default)]
    pub level: u32,
}

/// Untrusted input to intake.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Upstream identity; a fresh one is assigned when absent.
    pub id: Option<String>,
    pub interaction: Interaction,
    /// Arrival time in Unix epoch milliseconds.
    pub arrival_ms: u64,
    pub user: UserInfo,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RawEvent {
    pub fn new(interaction: Interaction, user: UserInfo, arrival_ms: u64) -> Self {
        Self {
            id: None,
            interaction,
            arrival_ms,
            user,
            metadata: HashMap::new(),
        }
    }
}

/// A classified event waiting in, or popped from, the priority queue.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionEvent {
    pub id: String,
    pub interaction: Interaction,
    pub arrival_ms: u64,
    pub user: UserInfo,
    /// Lower is more urgent.
    pub priority: u32,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub processed: bool,
    /// Set at intake; once dispatched, reply state lives in the scheduler's outcome log.
    pub response_generated: bool,
    pub response_content: Option<String>,
}

impl InteractionEvent {
    pub fn kind(&self) -> EventKind {
        self.interaction.kind()
    }
}
