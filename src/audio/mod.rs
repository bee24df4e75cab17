//! Audio: WAV helpers, chunking, output devices and the preemptive
//! playback engine with its dedicated consumer thread.

pub mod chunk;
pub mod consumer;
pub mod device;
pub mod engine;
#[cfg(feature = "cpal-device")]
pub mod playback;
pub mod wav;

pub use chunk::{AudioChunk, chunk_audio};
pub use consumer::{PlaybackConsumer, PlaybackSnapshot};
pub use device::{AudioOutputDevice, SimulatedDevice};
pub use engine::{
    EngineStep, InterruptStackEntry, PlaybackEngine, PlaybackNotice, PlaybackState, PlaybackTask,
    PreemptionPolicy,
};
