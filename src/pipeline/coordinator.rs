//! Wires intake, scheduling, dispatch, synthesis and playback together.
//!
//! Replies delivered by the scheduler fan out to the registered response
//! callback and to the speech stage, which synthesizes them on background
//! tasks and hands the audio to the playback thread.

use crate::audio::chunk::chunk_audio;
use crate::audio::consumer::{PlaybackConsumer, PlaybackSnapshot};
use crate::audio::device::{AudioOutputDevice, SimulatedDevice};
use crate::audio::engine::{PlaybackTask, PreemptionPolicy};
use crate::clock::{Clock, SystemClock};
use crate::config::{LiveConfig, PlaybackDevice, TtsEngine};
use crate::dispatch::{Dispatcher, ResponseCallback, ResponseContext, ResponseSink};
use crate::error::{LiveError, Result};
use crate::events::RawEvent;
use crate::intake::{Accepted, Intake, MessageParser};
use crate::llm::{LanguageModelService, OllamaClient};
use crate::queue::PriorityQueue;
use crate::runtime::RuntimeEvent;
use crate::scheduler::{Outcome, RandomSource, Scheduler, SchedulerStatus};
use crate::tts::{GptSovitsClient, SpeechSynthesisService, SynthesisPipeline, ToneSynthesizer, VoiceParams};
use crate::vad::{EnergyVad, VoiceActivityDetector};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// External collaborators the core drives.
pub struct Services {
    pub llm: Option<Arc<dyn LanguageModelService>>,
    pub tts: Arc<dyn SpeechSynthesisService>,
    pub vad: Arc<dyn VoiceActivityDetector>,
    pub device: Box<dyn AudioOutputDevice>,
    pub backup_device: Option<Box<dyn AudioOutputDevice>>,
    pub clock: Arc<dyn Clock>,
    /// Sampling source; `None` uses an entropy-seeded generator.
    pub random: Option<Box<dyn RandomSource>>,
}

impl Services {
    /// Build the adapters named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an adapter cannot be constructed, e.g. GPT-SoVITS
    /// without a reference clip, or the cpal device without its feature.
    pub fn from_config(config: &LiveConfig) -> Result<Self> {
        let llm: Option<Arc<dyn LanguageModelService>> = if config.llm.enabled {
            info!(model = %config.llm.model, url = %config.llm.base_url, "language model enabled");
            Some(Arc::new(OllamaClient::new(&config.llm)))
        } else {
            None
        };

        let tts: Arc<dyn SpeechSynthesisService> = match config.tts.engine {
            TtsEngine::Tone => Arc::new(ToneSynthesizer::new(config.tts.sample_rate)),
            TtsEngine::GptSovits => Arc::new(GptSovitsClient::new(&config.tts)?),
        };

        let (device, backup_device): (Box<dyn AudioOutputDevice>, _) = match config.playback.device {
            PlaybackDevice::Simulated => (
                Box::new(SimulatedDevice::new(config.playback.simulate_realtime)),
                None,
            ),
            PlaybackDevice::Cpal => {
                let primary = open_cpal(config.playback.output_device.as_deref())?;
                let backup = match config.playback.backup_output_device.as_deref() {
                    Some(name) => match open_cpal(Some(name)) {
                        Ok(device) => Some(device),
                        Err(e) => {
                            warn!(device = name, error = %e, "backup output device unavailable");
                            None
                        }
                    },
                    None => None,
                };
                (primary, backup)
            }
        };

        Ok(Self {
            llm,
            tts,
            vad: Arc::new(EnergyVad::new(&config.vad)),
            device,
            backup_device,
            clock: Arc::new(SystemClock),
            random: None,
        })
    }
}

#[cfg(feature = "cpal-device")]
fn open_cpal(name: Option<&str>) -> Result<Box<dyn AudioOutputDevice>> {
    Ok(Box::new(crate::audio::playback::CpalDevice::new(name)?))
}

#[cfg(not(feature = "cpal-device"))]
fn open_cpal(_name: Option<&str>) -> Result<Box<dyn AudioOutputDevice>> {
    Err(LiveError::Config(
        "playback.device = \"cpal\" requires the cpal-device feature".into(),
    ))
}

/// Combined status of the scheduler and the playback thread.
#[derive(Debug, Clone, Serialize)]
pub struct LiveStatus {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub playback: PlaybackSnapshot,
    pub cached_clips: u64,
}

/// A line waiting for synthesis.
#[derive(Debug)]
struct SpeechJob {
    text: String,
    event_id: Option<String>,
    priority: u32,
    sequence: u64,
}

/// The running live-interaction core.
pub struct LiveCore {
    config: LiveConfig,
    scheduler: Arc<Scheduler>,
    intake: Arc<Intake>,
    parser: MessageParser,
    clock: Arc<dyn Clock>,
    user_sink: ResponseSink,
    speech_tx: mpsc::UnboundedSender<SpeechJob>,
    synthesis: Arc<SynthesisPipeline>,
    playback: Arc<PlaybackConsumer>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    tracker: TaskTracker,
    speech_cancel: CancellationToken,
}

impl LiveCore {
    /// Validate `config`, spawn the speech stage and the playback thread.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Config` for invalid configuration, or an error if
    /// the playback thread cannot start.
    pub fn start(config: LiveConfig, services: Services) -> Result<Self> {
        config.validate()?;
        let Services {
            llm,
            tts,
            vad,
            device,
            backup_device,
            clock,
            random,
        } = services;

        let (runtime_tx, _) = broadcast::channel(config.scheduler.runtime_event_capacity.max(1));

        let queue = Arc::new(PriorityQueue::new(config.intake.queue_capacity));
        let intake = Arc::new(
            Intake::new(config.intake.clone(), queue, Arc::clone(&clock))
                .with_runtime_events(runtime_tx.clone()),
        );
        let dispatcher = Dispatcher::new(config.dispatch.clone(), config.product.clone(), llm);
        let mut scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&intake),
            dispatcher,
            Arc::clone(&clock),
        )
        .with_runtime_events(runtime_tx.clone());
        if let Some(random) = random {
            scheduler = scheduler.with_random_source(random);
        }
        let scheduler = Arc::new(scheduler);

        let synthesis = Arc::new(SynthesisPipeline::new(&config.synthesis, tts, vad));
        let policy = PreemptionPolicy::from_steps(&config.playback.preemption_steps)?;
        let playback = Arc::new(PlaybackConsumer::spawn(
            device,
            backup_device,
            policy,
            Some(runtime_tx.clone()),
        )?);

        let (speech_tx, speech_rx) = mpsc::unbounded_channel();
        let user_sink: ResponseSink = Arc::new(RwLock::new(None));
        {
            let sink = Arc::clone(&user_sink);
            let tx = speech_tx.clone();
            scheduler.set_response_callback(move |text: String, ctx: ResponseContext| {
                let callback = sink.read().unwrap_or_else(|e| e.into_inner()).clone();
                if let Some(callback) = callback {
                    callback(text.clone(), ctx.clone());
                }
                let job = SpeechJob {
                    text,
                    event_id: Some(ctx.event_id),
                    priority: ctx.priority,
                    sequence: ctx.sequence,
                };
                if tx.send(job).is_err() {
                    debug!("speech stage closed; reply not spoken");
                }
            });
        }

        let tracker = TaskTracker::new();
        let speech_cancel = CancellationToken::new();
        let stage = SpeechStage {
            synthesis: Arc::clone(&synthesis),
            playback: Arc::clone(&playback),
            voice: VoiceParams::from_config(&config.synthesis),
            chunk_ms: config.playback.chunk_ms,
            fallback_byte_rate: config.playback.fallback_byte_rate,
            runtime_tx: runtime_tx.clone(),
            tracker: tracker.clone(),
        };
        tracker.spawn(stage.run(speech_rx, speech_cancel.clone()));

        info!(
            queue_capacity = config.intake.queue_capacity,
            batch = config.scheduler.batch_size,
            "live core started"
        );

        let parser = MessageParser::new(
            config.intake.clean_nicknames,
            config.intake.default_nickname.clone(),
        );
        Ok(Self {
            config,
            scheduler,
            intake,
            parser,
            clock,
            user_sink,
            speech_tx,
            synthesis,
            playback,
            runtime_tx,
            tracker,
            speech_cancel,
        })
    }

    /// Validate, classify and enqueue an event.
    pub fn submit(&self, raw: RawEvent) -> bool {
        self.try_submit(raw).is_ok()
    }

    /// Like [`submit`](Self::submit), reporting where the event landed.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Capacity` when the queue is full and
    /// `LiveError::Validation` for any other rejection.
    pub fn try_submit(&self, raw: RawEvent) -> Result<Accepted> {
        self.intake.try_submit(raw).map_err(LiveError::from)
    }

    /// Parse one line of wire input and submit it.
    ///
    /// Returns `false` for lines that are malformed, ignored, or rejected.
    pub fn submit_json(&self, line: &str) -> bool {
        match self.parser.parse(line, self.clock.now_ms()) {
            Ok(Some(raw)) => self.submit(raw),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "unparsable event line");
                false
            }
        }
    }

    /// Register the reply sink, replacing any previous one.
    pub fn set_response_callback<F>(&self, callback: F)
    where
        F: Fn(String, ResponseContext) + Send + Sync + 'static,
    {
        let callback: ResponseCallback = Arc::new(callback);
        *self.user_sink.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn process_batch(&self, max_items: usize) -> Vec<Outcome> {
        self.scheduler.process_batch(max_items)
    }

    /// Run the scheduler polling loop until `cancel` fires or
    /// [`LiveCore::shutdown`] is called.
    pub async fn run(&self, cancel: CancellationToken) {
        self.scheduler.run(cancel).await;
    }

    /// Queue a narration line at script priority.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Validation` for blank text and
    /// `LiveError::Channel` once the core is shutting down.
    pub fn enqueue_script(&self, text: &str) -> Result<u64> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LiveError::Validation("script line is empty".into()));
        }
        if !self.intake.is_accepting() {
            return Err(LiveError::Channel("core is shutting down".into()));
        }
        let sequence = self.intake.queue().reserve_sequence();
        self.speech_tx
            .send(SpeechJob {
                text: text.to_owned(),
                event_id: None,
                priority: self.config.scheduler.script_priority,
                sequence,
            })
            .map_err(|_| LiveError::Channel("speech stage has stopped".into()))?;
        debug!(sequence, "script line queued");
        Ok(sequence)
    }

    pub fn status(&self) -> LiveStatus {
        LiveStatus {
            scheduler: self.scheduler.get_status(),
            playback: self.playback.snapshot(),
            cached_clips: self.synthesis.cache().entry_count(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_tx.subscribe()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Stop accepting events and halt the polling loop. Replies already
    /// dispatched, synthesis, and playback keep going until [`Self::drain`].
    pub fn shutdown(&self) {
        info!("live core shutting down");
        self.intake.close();
        self.scheduler.stop();
    }

    /// Wait for outstanding replies, synthesis and playback to finish.
    ///
    /// Replies still pending at the deadline are cancelled and resolve via
    /// the fallback answer. Returns `true` if everything finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let replies_done = self.scheduler.drain(timeout).await;

        self.speech_cancel.cancel();
        self.tracker.close();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let speech_done = tokio::time::timeout(remaining, self.tracker.wait())
            .await
            .is_ok();
        if !speech_done {
            warn!("synthesis still running at drain deadline");
        }

        let playback = Arc::clone(&self.playback);
        let playback_done = tokio::task::spawn_blocking(move || playback.shutdown())
            .await
            .unwrap_or(false);

        info!(replies_done, speech_done, playback_done, "live core drained");
        replies_done && speech_done && playback_done
    }
}

/// Synthesizes queued lines and forwards the audio to playback.
struct SpeechStage {
    synthesis: Arc<SynthesisPipeline>,
    playback: Arc<PlaybackConsumer>,
    voice: VoiceParams,
    chunk_ms: u32,
    fallback_byte_rate: u32,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    tracker: TaskTracker,
}

impl SpeechStage {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SpeechJob>, cancel: CancellationToken) {
        let stage = Arc::new(self);
        loop {
            tokio::select! {
                biased;
                job = rx.recv() => match job {
                    Some(job) => stage.spawn_job(job),
                    None => break,
                },
                () = cancel.cancelled() => {
                    // Everything already queued still gets spoken.
                    while let Ok(job) = rx.try_recv() {
                        stage.spawn_job(job);
                    }
                    break;
                }
            }
        }
        debug!("speech stage stopped");
    }

    fn spawn_job(self: &Arc<Self>, job: SpeechJob) {
        let stage = Arc::clone(self);
        self.tracker.spawn(async move { stage.speak(job).await });
    }

    async fn speak(&self, job: SpeechJob) {
        match self.synthesis.synthesize(&job.text, &self.voice).await {
            Ok(done) => {
                let chunks = chunk_audio(
                    done.audio,
                    job.priority,
                    job.sequence,
                    self.chunk_ms,
                    self.fallback_byte_rate,
                );
                let task =
                    PlaybackTask::new(job.event_id, job.text, job.priority, job.sequence, chunks);
                if let Err(e) = self.playback.enqueue(task) {
                    warn!(sequence = job.sequence, error = %e, "playback unavailable");
                }
            }
            Err(failed) => {
                error!(
                    sequence = job.sequence,
                    attempts = failed.attempts.len(),
                    reason = %failed.reason,
                    "synthesis gave up"
                );
                let _ = self.runtime_tx.send(RuntimeEvent::SynthesisFailed {
                    event_id: job.event_id,
                    attempts: failed.attempts.len() as u32,
                    reason: failed.reason,
                });
            }
        }
    }
}
