//! Livecast: priority-driven interaction scheduling for live broadcasts.
//!
//! Viewer interactions (comments, gifts, follows, entries, likes) are
//! classified and queued by urgency, answered under a global reply
//! throttle, synthesized to speech, and played through a preemptive
//! playback engine that lets urgent replies interrupt background narration.
//!
//! # Architecture
//!
//! - **Intake**: validates, classifies and enqueues events; tracks active users
//! - **Scheduler**: pops in `(priority, sequence)` order, samples, throttles
//! - **Dispatch**: rule templates, or a language model with a keyword fallback
//! - **TTS**: cached, bounded synthesis with a VAD quality gate and model rotation
//! - **Audio**: chunked playback on a dedicated thread with an interrupt stack

pub mod audio;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod intake;
pub mod llm;
pub mod pipeline;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod tts;
pub mod vad;

pub use config::LiveConfig;
pub use dispatch::{ReplySource, ResponseContext};
pub use error::{LiveError, RejectReason, Result};
pub use events::{EventKind, Interaction, RawEvent, UserInfo};
pub use pipeline::{LiveCore, LiveStatus, Services};
pub use runtime::RuntimeEvent;
