//! Runtime events emitted by the core for UI and observability.
//!
//! Events carry no audio payloads; producers emit on a broadcast channel and
//! never block.

use crate::audio::engine::PlaybackNotice;
use crate::dispatch::ReplySource;
use crate::error::RejectReason;
use crate::events::EventKind;
use serde::Serialize;

/// Events that describe what the core is doing "right now".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Intake queued an event.
    EventAccepted {
        event_id: String,
        kind: EventKind,
        priority: u32,
        sequence: u64,
    },
    /// Intake refused an event.
    EventRejected { kind: EventKind, reason: RejectReason },
    /// Placeholder shown while a generative reply is pending.
    ReplyProvisional { event_id: String, text: String },
    /// Reply delivered to the response callback.
    ReplyFinal {
        event_id: String,
        text: String,
        source: ReplySource,
    },
    /// Synthesis gave up on a reply after exhausting its attempts.
    SynthesisFailed {
        /// Owning event, or `None` for narration lines.
        event_id: Option<String>,
        attempts: u32,
        reason: String,
    },
    /// Playback engine transition.
    Playback { notice: PlaybackNotice },
}
