//! Retrying synthesis: cache lookup, bounded engine concurrency, a VAD
//! quality gate, and model rotation between attempts.

use super::{AudioCache, ModelRotation, SpeechSynthesisService, VoiceParams};
use crate::config::SynthesisConfig;
use crate::vad::VoiceActivityDetector;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Backoff between synthesis attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Delay before attempt `attempt` (zero-based).
    ///
    /// Formula: min(base * multiplier^(attempt-1), max_delay) + jitter
    /// where jitter is a random value between 0 and 10% of the delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }
        let exp = self.backoff_multiplier.powi(attempt as i32 - 1);
        let delay = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        let jitter = delay * (rand::random::<f64>() * 0.1);
        Duration::from_millis((delay + jitter) as u64)
    }
}

/// Audio that passed the quality gate.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub audio: Bytes,
    /// Variant that produced the audio.
    pub variant: String,
    /// Engine calls made; zero on a cache hit.
    pub attempts: u32,
    pub cached: bool,
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub variant: String,
    pub error: String,
}

/// Terminal synthesis failure, with every attempt's outcome.
#[derive(Debug, Clone, thiserror::Error)]
#[error("synthesis failed after {} attempt(s): {reason}", .attempts.len())]
pub struct TaskFailed {
    pub fingerprint: String,
    pub attempts: Vec<AttemptRecord>,
    /// Last error observed.
    pub reason: String,
}

/// Speech synthesis wrapped with caching, concurrency limits and retries.
pub struct SynthesisPipeline {
    engine: Arc<dyn SpeechSynthesisService>,
    vad: Arc<dyn VoiceActivityDetector>,
    cache: AudioCache,
    permits: Arc<Semaphore>,
    variants: Vec<String>,
    retry: RetryPolicy,
}

impl SynthesisPipeline {
    pub fn new(
        config: &SynthesisConfig,
        engine: Arc<dyn SpeechSynthesisService>,
        vad: Arc<dyn VoiceActivityDetector>,
    ) -> Self {
        Self {
            engine,
            vad,
            cache: AudioCache::new(
                config.cache_capacity,
                config.cache_ttl_secs.map(Duration::from_secs),
            ),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            variants: config.model_variants.clone(),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Synthesize `text`, retrying with rotated model variants until the
    /// audio passes the quality gate or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns [`TaskFailed`] for empty text or when every attempt failed.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<SynthesizedAudio, TaskFailed> {
        let fingerprint = voice.fingerprint(text);
        if text.trim().is_empty() {
            return Err(TaskFailed {
                fingerprint,
                attempts: Vec::new(),
                reason: "empty text".into(),
            });
        }

        if let Some(audio) = self.cache.get(&fingerprint) {
            debug!(%fingerprint, "synthesis cache hit");
            return Ok(SynthesizedAudio {
                audio,
                variant: voice.model_variant.clone(),
                attempts: 0,
                cached: true,
            });
        }

        let mut rotation = ModelRotation::new(&self.variants, &voice.model_variant);
        let mut failures = Vec::new();

        for attempt in 0..self.retry.max_attempts {
            let variant = rotation
                .next_variant()
                .unwrap_or(voice.model_variant.as_str())
                .to_owned();
            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.attempt(text, &voice.with_variant(&variant)).await {
                Ok(audio) => {
                    info!(
                        %fingerprint,
                        %variant,
                        attempts = attempt + 1,
                        bytes = audio.len(),
                        "synthesis succeeded"
                    );
                    self.cache.insert(fingerprint, audio.clone());
                    return Ok(SynthesizedAudio {
                        audio,
                        variant,
                        attempts: attempt + 1,
                        cached: false,
                    });
                }
                Err(error) => {
                    warn!(%fingerprint, %variant, attempt = attempt + 1, %error, "synthesis attempt failed");
                    failures.push(AttemptRecord { variant, error });
                }
            }
        }

        let reason = failures
            .last()
            .map(|f| f.error.clone())
            .unwrap_or_else(|| "no attempts made".into());
        Err(TaskFailed {
            fingerprint,
            attempts: failures,
            reason,
        })
    }

    /// One engine call plus the quality gate. The permit only covers the
    /// engine call.
    async fn attempt(&self, text: &str, voice: &VoiceParams) -> Result<Bytes, String> {
        let audio = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| format!("synthesis limiter closed: {e}"))?;
            self.engine
                .synthesize(text, voice)
                .await
                .map_err(|e| e.to_string())?
        };
        if audio.is_empty() {
            return Err("engine returned no audio".into());
        }

        let vad = Arc::clone(&self.vad);
        let clip = audio.clone();
        match tokio::task::spawn_blocking(move || vad.has_speech(&clip)).await {
            Ok(Ok(true)) => Ok(audio),
            Ok(Ok(false)) => Err("quality gate: no speech detected".into()),
            Ok(Err(e)) => Err(format!("quality gate: {e}")),
            Err(e) => Err(format!("quality gate task failed: {e}")),
        }
    }
}
