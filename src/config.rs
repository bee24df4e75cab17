//! Configuration types for the live interaction core.

use crate::error::{LiveError, Result};
use crate::events::EventKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Event intake, classification and active-user tracking.
    pub intake: IntakeConfig,
    /// Priority queue scheduling and response throttling.
    pub scheduler: SchedulerConfig,
    /// Rule-based and generative reply dispatch.
    pub dispatch: DispatchConfig,
    /// Product knowledge used for templated answers.
    pub product: ProductConfig,
    /// Speech synthesis pipeline (cache, retries, model rotation).
    pub synthesis: SynthesisConfig,
    /// Voice activity quality gate.
    pub vad: VadConfig,
    /// Playback engine and output device.
    pub playback: PlaybackConfig,
    /// Language model adapter.
    pub llm: LlmConfig,
    /// Speech synthesis engine adapter.
    pub tts: TtsConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Intake configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Maximum queued events. Submissions beyond this are dropped.
    pub queue_capacity: usize,
    /// Events older than this at submission time are rejected.
    pub stale_after_ms: u64,
    /// Maximum entries in the active-user table.
    pub max_active_users: usize,
    /// Users idle longer than this are evicted on the next sweep.
    pub user_timeout_ms: u64,
    /// Base priority per event kind (lower is more urgent).
    pub base_priority: BasePriorities,
    /// Gift bonus tiers, ascending by `min_total_value`.
    pub gift_value_tiers: Vec<GiftTier>,
    /// Comment keywords that mark a question as urgent.
    pub urgent_keywords: Vec<String>,
    /// Priority bonus applied once when an urgent keyword matches.
    pub keyword_bonus: u32,
    /// Comments containing any of these are rejected as filtered.
    pub blocked_keywords: Vec<String>,
    /// Strip symbols from nicknames and replace numeric ones.
    pub clean_nicknames: bool,
    /// Nickname used when cleaning leaves nothing speakable.
    pub default_nickname: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            stale_after_ms: 30_000,
            max_active_users: 500,
            user_timeout_ms: 300_000,
            base_priority: BasePriorities::default(),
            gift_value_tiers: vec![
                GiftTier {
                    min_total_value: 10,
                    bonus: 2,
                },
                GiftTier {
                    min_total_value: 100,
                    bonus: 5,
                },
                GiftTier {
                    min_total_value: 1000,
                    bonus: 9,
                },
            ],
            urgent_keywords: [
                "多少钱", "价格", "怎么买", "发货", "price", "order", "shipping",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            keyword_bonus: 5,
            blocked_keywords: ["直播间人数", "左上角", "参与一下", "$来了"]
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            clean_nicknames: true,
            default_nickname: "viewer".into(),
        }
    }
}

/// Per-kind base priorities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasePriorities {
    pub gift: u32,
    pub comment: u32,
    pub follow: u32,
    pub enter: u32,
    pub like: u32,
}

impl Default for BasePriorities {
    fn default() -> Self {
        Self {
            gift: 10,
            comment: 30,
            follow: 40,
            enter: 60,
            like: 70,
        }
    }
}

impl BasePriorities {
    pub fn for_kind(&self, kind: EventKind) -> u32 {
        match kind {
            EventKind::Gift => self.gift,
            EventKind::Comment => self.comment,
            EventKind::Follow => self.follow,
            EventKind::Enter => self.enter,
            EventKind::Like => self.like,
        }
    }
}

/// A gift-value threshold and the priority bonus it earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftTier {
    /// Minimum `count * unit value` for this tier.
    pub min_total_value: u64,
    /// Amount subtracted from the base priority.
    pub bonus: u32,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum events popped per `process_batch` call in the polling loop.
    pub batch_size: usize,
    /// How long the polling loop waits for the next event.
    pub poll_timeout_ms: u64,
    /// Minimum spacing between consecutive replies.
    pub min_response_interval_ms: u64,
    /// Per-kind probability of replying, in `[0, 1]`.
    pub response_probability: ResponseProbabilities,
    /// Number of recent outcomes retained for lookup.
    pub outcome_history: usize,
    /// Priority assigned to background narration lines.
    pub script_priority: u32,
    /// Capacity of the runtime event broadcast channel.
    pub runtime_event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_timeout_ms: 500,
            min_response_interval_ms: 3_000,
            response_probability: ResponseProbabilities::default(),
            outcome_history: 256,
            script_priority: 90,
            runtime_event_capacity: 256,
        }
    }
}

/// Per-kind reply probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseProbabilities {
    pub comment: f64,
    pub gift: f64,
    pub follow: f64,
    pub enter: f64,
    pub like: f64,
}

impl Default for ResponseProbabilities {
    fn default() -> Self {
        Self {
            comment: 1.0,
            gift: 1.0,
            follow: 0.8,
            enter: 0.3,
            like: 0.1,
        }
    }
}

impl ResponseProbabilities {
    pub fn for_kind(&self, kind: EventKind) -> f64 {
        match kind {
            EventKind::Comment => self.comment,
            EventKind::Gift => self.gift,
            EventKind::Follow => self.follow,
            EventKind::Enter => self.enter,
            EventKind::Like => self.like,
        }
    }

    fn all(&self) -> [f64; 5] {
        [self.comment, self.gift, self.follow, self.enter, self.like]
    }
}

/// Reply dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Send comments to the language model when one is available.
    pub generative_comments: bool,
    /// Stand-in text surfaced while a generative reply is pending.
    pub placeholder: String,
    /// Maximum concurrent language-model requests.
    pub max_concurrent: usize,
    /// Per-request timeout for the language model.
    pub request_timeout_ms: u64,
    /// System prompt sent with every generative request.
    pub system_prompt: String,
    /// Maximum tokens for a generated reply.
    pub max_tokens: u32,
    /// Reply templates for rule-based kinds.
    pub templates: ReplyTemplates,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            generative_comments: true,
            placeholder: "Good question {nickname}, one moment.".into(),
            max_concurrent: 4,
            request_timeout_ms: 10_000,
            system_prompt: "You are a friendly live-stream host. Answer viewer questions in one or \
                            two short spoken sentences. Do not use lists or emoji."
                .into(),
            max_tokens: 120,
            templates: ReplyTemplates::default(),
        }
    }
}

/// Templates for rule-based replies.
///
/// Placeholders: `{nickname}`, `{gift}`, `{count}`, `{content}`, `{product}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyTemplates {
    pub gift: String,
    pub follow: String,
    pub enter: String,
    pub like: String,
}

impl Default for ReplyTemplates {
    fn default() -> Self {
        Self {
            gift: "Thank you {nickname} for the {count} {gift}!".into(),
            follow: "Thanks for the follow, {nickname}!".into(),
            enter: "Welcome to the stream, {nickname}!".into(),
            like: "Thanks for the likes, {nickname}!".into(),
        }
    }
}

/// Product knowledge for keyword-matched answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductConfig {
    /// Product currently being presented.
    pub name: String,
    /// Answer used when no category keyword matches.
    pub default_answer: String,
    /// Keyword categories checked in order.
    pub categories: Vec<KnowledgeCategory>,
}

impl Default for ProductConfig {
    fn default() -> Self {
        let category = |name: &str, keywords: &[&str], answer: &str| KnowledgeCategory {
            name: name.into(),
            keywords: keywords.iter().map(|k| (*k).to_owned()).collect(),
            answer: answer.into(),
        };
        Self {
            name: "today's featured item".into(),
            default_answer: "{nickname}, thanks for asking about {product}. Check the pinned \
                             link for all the details."
                .into(),
            categories: vec![
                category(
                    "price",
                    &["price", "cost", "how much", "多少钱", "价格"],
                    "{nickname}, {product} has a special live price today, see the pinned link.",
                ),
                category(
                    "material",
                    &["material", "made of", "材质"],
                    "{nickname}, the full material list for {product} is on the product page.",
                ),
                category(
                    "effect",
                    &["effect", "work", "效果"],
                    "{nickname}, most buyers see results with {product} within a couple of weeks.",
                ),
                category(
                    "usage",
                    &["how to use", "usage", "怎么用"],
                    "{nickname}, the usage guide for {product} ships in the box.",
                ),
                category(
                    "shipping",
                    &["shipping", "ship", "delivery", "发货"],
                    "{nickname}, orders of {product} ship within 48 hours.",
                ),
                category(
                    "service",
                    &["return", "refund", "warranty", "售后"],
                    "{nickname}, {product} comes with a no-hassle seven day return.",
                ),
            ],
        }
    }
}

/// One keyword category and its answer template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeCategory {
    pub name: String,
    pub keywords: Vec<String>,
    pub answer: String,
}

/// Speech synthesis pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Maximum concurrent calls into the synthesis engine.
    pub max_concurrent: usize,
    /// Attempts per task before it is reported failed.
    pub max_attempts: u32,
    /// Ordered model-variant rotation list.
    pub model_variants: Vec<String>,
    /// Backoff before the second attempt.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    /// Backoff growth per attempt.
    pub backoff_multiplier: f64,
    /// Maximum cached audio clips.
    pub cache_capacity: u64,
    /// Cached clip lifetime (`None` = no expiry).
    pub cache_ttl_secs: Option<u64>,
    /// Default voice for replies.
    pub voice: VoiceConfig,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_attempts: 3,
            model_variants: vec!["v2".into(), "v2-pro".into(), "v1".into()],
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            cache_capacity: 256,
            cache_ttl_secs: Some(3_600),
            voice: VoiceConfig::default(),
        }
    }
}

/// Default voice parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub speaker: String,
    pub language: String,
    pub speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            speaker: "host".into(),
            language: "zh".into(),
            speed: 1.0,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for a speech frame (samples in `[-1, 1]`).
    pub threshold: f32,
    /// Analysis frame length.
    pub frame_ms: u32,
    /// Fraction of frames that must carry speech.
    pub min_speech_ratio: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            frame_ms: 30,
            min_speech_ratio: 0.1,
        }
    }
}

/// Which output device drives playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackDevice {
    /// Paced by chunk duration, no sound.
    #[default]
    Simulated,
    /// System speakers via cpal (requires the `cpal-device` feature).
    Cpal,
}

/// Playback engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Chunk length; preemption is evaluated between chunks.
    pub chunk_ms: u32,
    /// Preemption threshold steps, ascending by elapsed fraction.
    pub preemption_steps: Vec<PreemptionStep>,
    /// Output device.
    pub device: PlaybackDevice,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Backup output device tried when the primary fails a chunk.
    pub backup_output_device: Option<String>,
    /// Let the simulated device sleep for each chunk's duration.
    pub simulate_realtime: bool,
    /// Byte rate assumed for audio without a WAV header.
    pub fallback_byte_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_ms: 200,
            preemption_steps: vec![
                PreemptionStep {
                    min_elapsed_fraction: 0.0,
                    min_gap: 5,
                },
                PreemptionStep {
                    min_elapsed_fraction: 0.5,
                    min_gap: 6,
                },
                PreemptionStep {
                    min_elapsed_fraction: 0.9,
                    min_gap: 8,
                },
            ],
            device: PlaybackDevice::Simulated,
            output_device: None,
            backup_output_device: None,
            simulate_realtime: true,
            fallback_byte_rate: 32_000,
        }
    }
}

/// Minimum priority gap required once playback has passed an elapsed fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreemptionStep {
    pub min_elapsed_fraction: f64,
    pub min_gap: u32,
}

/// Language model adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Use the language model for comment replies.
    pub enabled: bool,
    /// Ollama-compatible server URL.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:11434".into(),
            model: "qwen2.5:7b".into(),
            temperature: 0.7,
        }
    }
}

/// Synthesis engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsEngine {
    /// Local sine-tone synthesizer.
    #[default]
    Tone,
    /// GPT-SoVITS HTTP API.
    GptSovits,
}

/// Speech synthesis adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub engine: TtsEngine,
    /// GPT-SoVITS server URL.
    pub base_url: String,
    /// Reference audio path on the synthesis server.
    pub ref_audio_path: Option<String>,
    /// Transcript of the reference audio.
    pub prompt_text: String,
    /// Language of the reference transcript.
    pub prompt_lang: String,
    /// Request timeout.
    pub timeout_secs: u64,
    /// Output sample rate for the tone synthesizer.
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: TtsEngine::Tone,
            base_url: "http://127.0.0.1:9880".into(),
            ref_audio_path: None,
            prompt_text: String::new(),
            prompt_lang: "zh".into(),
            timeout_secs: 30,
            sample_rate: 24_000,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rolled log files (None = stderr only).
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directory: None,
        }
    }
}

impl LiveConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| LiveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LiveError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `LiveError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(LiveError::Config(msg));

        if self.intake.queue_capacity == 0 {
            return fail("intake.queue_capacity must be greater than zero".into());
        }
        if self.intake.max_active_users == 0 {
            return fail("intake.max_active_users must be greater than zero".into());
        }
        if self
            .intake
            .gift_value_tiers
            .windows(2)
            .any(|w| w[0].min_total_value >= w[1].min_total_value)
        {
            return fail("intake.gift_value_tiers must be strictly ascending".into());
        }
        if self
            .scheduler
            .response_probability
            .all()
            .iter()
            .any(|p| !(0.0..=1.0).contains(p))
        {
            return fail("scheduler.response_probability values must be within [0, 1]".into());
        }
        if self.scheduler.batch_size == 0 {
            return fail("scheduler.batch_size must be greater than zero".into());
        }
        if self.scheduler.runtime_event_capacity == 0 {
            return fail("scheduler.runtime_event_capacity must be greater than zero".into());
        }
        if self.dispatch.max_concurrent == 0 {
            return fail("dispatch.max_concurrent must be greater than zero".into());
        }
        if self.synthesis.max_concurrent == 0 {
            return fail("synthesis.max_concurrent must be greater than zero".into());
        }
        if self.synthesis.max_attempts == 0 {
            return fail("synthesis.max_attempts must be at least 1".into());
        }
        if self.synthesis.model_variants.is_empty() {
            return fail("synthesis.model_variants must not be empty".into());
        }
        let mut variants = self.synthesis.model_variants.clone();
        variants.sort();
        variants.dedup();
        if variants.len() != self.synthesis.model_variants.len() {
            return fail("synthesis.model_variants must not contain duplicates".into());
        }
        if self.synthesis.max_attempts > 1 && variants.len() < 2 {
            return fail(
                "synthesis.model_variants needs at least two variants when retries are enabled"
                    .into(),
            );
        }
        if self.synthesis.backoff_multiplier < 1.0 {
            return fail("synthesis.backoff_multiplier must be at least 1.0".into());
        }
        if self.playback.chunk_ms == 0 {
            return fail("playback.chunk_ms must be greater than zero".into());
        }
        if self.playback.fallback_byte_rate == 0 {
            return fail("playback.fallback_byte_rate must be greater than zero".into());
        }
        crate::audio::engine::PreemptionPolicy::from_steps(&self.playback.preemption_steps)?;
        Ok(())
    }

    /// Load `path` when it exists, otherwise return the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// fails validation.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default config file path: `~/.config/livecast/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("livecast").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("livecast")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/livecast/config.toml")
        }
    }
}
