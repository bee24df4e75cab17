//! Dedicated playback thread driving the [`PlaybackEngine`].
//!
//! All device access happens on this one OS thread, so at most one output
//! stream is active at any instant. Producers hand over tasks through a
//! crossbeam channel and never block.

use super::device::AudioOutputDevice;
use super::engine::{PlaybackEngine, PlaybackNotice, PlaybackState, PlaybackTask, PreemptionPolicy};
use crate::error::{LiveError, Result};
use crate::runtime::RuntimeEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub enum PlaybackCommand {
    Enqueue(PlaybackTask),
    /// Finish everything queued, then exit.
    Shutdown,
}

/// Point-in-time view of the engine for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub current_sequence: Option<u64>,
    pub interrupt_depth: usize,
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            current_sequence: None,
            interrupt_depth: 0,
            pending: 0,
            completed: 0,
            failed: 0,
        }
    }
}

/// Handle to the playback thread.
pub struct PlaybackConsumer {
    tx: Sender<PlaybackCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
    snapshot: Arc<Mutex<PlaybackSnapshot>>,
}

impl PlaybackConsumer {
    /// Start the playback thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS thread cannot be spawned.
    pub fn spawn(
        primary: Box<dyn AudioOutputDevice>,
        backup: Option<Box<dyn AudioOutputDevice>>,
        policy: PreemptionPolicy,
        runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let snapshot = Arc::new(Mutex::new(PlaybackSnapshot::default()));
        let worker = Worker {
            engine: PlaybackEngine::new(policy),
            primary,
            backup,
            runtime_tx,
            snapshot: Arc::clone(&snapshot),
        };
        let handle = std::thread::Builder::new()
            .name("livecast-playback".into())
            .spawn(move || worker.run(rx))
            .map_err(LiveError::Io)?;
        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
            snapshot,
        })
    }

    /// Hand a task to the engine.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Channel` once the thread has exited.
    pub fn enqueue(&self, task: PlaybackTask) -> Result<()> {
        self.tx
            .send(PlaybackCommand::Enqueue(task))
            .map_err(|_| LiveError::Channel("playback thread has stopped".into()))
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Let queued audio drain, then join the thread. Blocks.
    ///
    /// Returns `false` if the thread had already been joined or panicked.
    pub fn shutdown(&self) -> bool {
        let _ = self.tx.send(PlaybackCommand::Shutdown);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(()) => true,
                Err(_) => {
                    error!("playback thread panicked");
                    false
                }
            },
            None => false,
        }
    }
}

struct Worker {
    engine: PlaybackEngine,
    primary: Box<dyn AudioOutputDevice>,
    backup: Option<Box<dyn AudioOutputDevice>>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    snapshot: Arc<Mutex<PlaybackSnapshot>>,
}

impl Worker {
    fn run(mut self, rx: Receiver<PlaybackCommand>) {
        info!(device = self.primary.name(), "playback thread started");
        let mut closing = false;

        loop {
            if self.engine.is_idle() {
                if closing {
                    break;
                }
                match rx.recv() {
                    Ok(cmd) => closing |= self.apply(cmd),
                    Err(_) => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(cmd) => closing |= self.apply(cmd),
                    Err(crossbeam_channel::TryRecvError::Empty) => break,
                    Err(crossbeam_channel::TryRecvError::Disconnected) => {
                        closing = true;
                        break;
                    }
                }
            }

            let step = self.engine.poll();
            self.publish(step.notices);
            match step.chunk {
                Some(chunk) => {
                    let outcome = self.play(&chunk);
                    let notices = self.engine.chunk_finished(outcome);
                    self.publish(notices);
                }
                None if !self.engine.is_idle() => {
                    // Nothing playable yet; wait briefly for new commands.
                    match rx.recv_timeout(Duration::from_millis(10)) {
                        Ok(cmd) => closing |= self.apply(cmd),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => closing = true,
                    }
                }
                None => {}
            }
        }
        self.publish(Vec::new());
        info!("playback thread stopped");
    }

    /// Returns `true` for a shutdown request.
    fn apply(&mut self, cmd: PlaybackCommand) -> bool {
        match cmd {
            PlaybackCommand::Enqueue(task) => {
                debug!(sequence = task.sequence, priority = task.priority, chunks = task.chunks.len(), "playback task queued");
                self.engine.submit(task);
                false
            }
            PlaybackCommand::Shutdown => true,
        }
    }

    /// Play on the primary device, falling back to the backup once.
    fn play(&mut self, chunk: &super::chunk::AudioChunk) -> std::result::Result<(), String> {
        let primary_err = match self.primary.play_chunk(chunk) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(device = self.primary.name(), error = %primary_err, "chunk playback failed");
        match self.backup.as_mut() {
            Some(backup) => match backup.play_chunk(chunk) {
                Ok(()) => {
                    info!(device = backup.name(), "chunk played on backup device");
                    Ok(())
                }
                Err(e) => Err(format!("{primary_err}; backup: {e}")),
            },
            None => Err(primary_err.to_string()),
        }
    }

    fn publish(&mut self, notices: Vec<PlaybackNotice>) {
        {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            for notice in &notices {
                match notice {
                    PlaybackNotice::Completed { .. } => snap.completed += 1,
                    PlaybackNotice::Failed { .. } => snap.failed += 1,
                    _ => {}
                }
            }
            snap.state = self.engine.state();
            snap.current_sequence = self.engine.current().map(|t| t.sequence);
            snap.interrupt_depth = self.engine.stack_depth();
            snap.pending = self.engine.pending_len();
        }
        if let Some(tx) = &self.runtime_tx {
            for notice in notices {
                let _ = tx.send(RuntimeEvent::Playback { notice });
            }
        }
    }
}
