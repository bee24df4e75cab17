//! Error types for the livecast core.

use serde::{Deserialize, Serialize};

/// Top-level error type for the interaction scheduler and speech path.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Malformed, stale or filtered interaction event.
    #[error("validation error: {0}")]
    Validation(String),

    /// Bounded queue or table at capacity.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Language model request error or timeout.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech synthesis engine error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Synthesized audio failed the voice-activity quality gate.
    #[error("quality rejection: {0}")]
    Quality(String),

    /// Audio output device error.
    #[error("device error: {0}")]
    Device(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Why intake refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Structurally invalid record.
    Invalid,
    /// Arrival timestamp older than the staleness threshold.
    Stale,
    /// Queue at capacity; the incoming event was dropped.
    Overflow,
    /// Content matched a blocked keyword.
    Filtered,
    /// Intake is closed for shutdown.
    ShuttingDown,
}

impl RejectReason {
    /// Stable lowercase label used in counters and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Stale => "stale",
            Self::Overflow => "overflow",
            Self::Filtered => "filtered",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RejectReason> for LiveError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::Overflow => LiveError::Capacity("intake queue full".into()),
            other => LiveError::Validation(format!("event rejected: {other}")),
        }
    }
}
