//! Output device seam for the playback consumer.

use super::chunk::AudioChunk;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Most recent plays kept by [`SimulatedDevice`]; older entries are dropped.
pub const PLAYED_LOG_CAPACITY: usize = 1_024;

/// Shared, bounded log of `(task_sequence, chunk_index)` in play order.
pub type PlayedLog = Arc<Mutex<VecDeque<(u64, usize)>>>;

/// Plays one chunk, blocking until it has been rendered.
pub trait AudioOutputDevice: Send {
    /// # Errors
    ///
    /// Returns `LiveError::Device` if the chunk could not be played.
    fn play_chunk(&mut self, chunk: &AudioChunk) -> Result<()>;

    fn name(&self) -> &str {
        "output"
    }
}

/// Device that plays nothing, optionally sleeping for each chunk's duration.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    realtime: bool,
    played: PlayedLog,
}

impl SimulatedDevice {
    pub fn new(realtime: bool) -> Self {
        Self {
            realtime,
            played: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Shared log of the last [`PLAYED_LOG_CAPACITY`] plays.
    pub fn played_log(&self) -> PlayedLog {
        Arc::clone(&self.played)
    }
}

impl AudioOutputDevice for SimulatedDevice {
    fn play_chunk(&mut self, chunk: &AudioChunk) -> Result<()> {
        if self.realtime {
            std::thread::sleep(chunk.duration);
        }
        let mut played = self.played.lock().unwrap_or_else(|e| e.into_inner());
        if played.len() == PLAYED_LOG_CAPACITY {
            played.pop_front();
        }
        played.push_back((chunk.task_sequence, chunk.index));
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
