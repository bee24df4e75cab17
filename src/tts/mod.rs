//! Speech synthesis: the engine contract, adapters, and the retrying pipeline.
//!
//! [`SynthesisPipeline`] wraps any [`SpeechSynthesisService`] with a
//! fingerprint cache, a concurrency limit, a voice-activity quality gate and
//! model-rotation retries.

pub mod cache;
pub mod gptsovits;
pub mod pipeline;
pub mod rotation;
pub mod tone;

pub use cache::AudioCache;
pub use gptsovits::GptSovitsClient;
pub use pipeline::{AttemptRecord, RetryPolicy, SynthesisPipeline, SynthesizedAudio, TaskFailed};
pub use rotation::ModelRotation;
pub use tone::ToneSynthesizer;

use crate::config::SynthesisConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Voice and style for one synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub speaker: String,
    /// Model variant; rotated on retries.
    pub model_variant: String,
    pub speed: f32,
    pub language: String,
}

impl VoiceParams {
    /// Default voice from configuration, using the first rotation variant.
    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self {
            speaker: config.voice.speaker.clone(),
            model_variant: config.model_variants.first().cloned().unwrap_or_default(),
            speed: config.voice.speed,
            language: config.voice.language.clone(),
        }
    }

    /// Same voice with a different model variant.
    pub fn with_variant(&self, variant: &str) -> Self {
        Self {
            model_variant: variant.to_owned(),
            ..self.clone()
        }
    }

    /// Cache key over text and every voice field.
    pub fn fingerprint(&self, text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            text,
            self.speaker.as_str(),
            self.language.as_str(),
            self.model_variant.as_str(),
        ] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(&self.speed.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Turns text into encoded audio bytes. May fail.
#[async_trait]
pub trait SpeechSynthesisService: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Bytes>;
}
