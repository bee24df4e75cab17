//! GPT-SoVITS HTTP adapter (`POST /tts`, api v2).
//!
//! The server clones the voice from a reference clip it can read locally, so
//! only the path is sent.

use super::{SpeechSynthesisService, VoiceParams};
use crate::config::TtsConfig;
use crate::error::{LiveError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Sampling preset for a model variant.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sampling {
    top_k: u32,
    temperature: f32,
    repetition_penalty: f32,
}

/// Each variant maps to its own sampling preset.
fn sampling_for(variant: &str) -> Sampling {
    match variant {
        "v2-pro" => Sampling {
            top_k: 10,
            temperature: 0.8,
            repetition_penalty: 1.35,
        },
        "v1" => Sampling {
            top_k: 15,
            temperature: 0.6,
            repetition_penalty: 1.5,
        },
        _ => Sampling {
            top_k: 5,
            temperature: 1.0,
            repetition_penalty: 1.35,
        },
    }
}

/// Client for a GPT-SoVITS api v2 server.
#[derive(Clone)]
pub struct GptSovitsClient {
    base_url: String,
    ref_audio_path: String,
    prompt_text: String,
    prompt_lang: String,
    client: reqwest::Client,
}

impl GptSovitsClient {
    /// # Errors
    ///
    /// Returns `LiveError::Config` if no reference audio is configured or the
    /// HTTP client cannot be built.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let ref_audio_path = config
            .ref_audio_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                LiveError::Config("tts.ref_audio_path is required for gpt_sovits".into())
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LiveError::Config(format!("cannot build http client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            ref_audio_path,
            prompt_text: config.prompt_text.clone(),
            prompt_lang: config.prompt_lang.clone(),
            client,
        })
    }
}

#[async_trait]
impl SpeechSynthesisService for GptSovitsClient {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Bytes> {
        // Identical prompt and target text makes the server echo the reference.
        let prompt_text = if self.prompt_text == text {
            format!("{} (reference)", self.prompt_text)
        } else {
            self.prompt_text.clone()
        };
        let sampling = sampling_for(&voice.model_variant);
        let body = serde_json::json!({
            "text": text,
            "text_lang": voice.language,
            "ref_audio_path": self.ref_audio_path,
            "prompt_text": prompt_text,
            "prompt_lang": self.prompt_lang,
            "top_k": sampling.top_k,
            "top_p": 1.0,
            "temperature": sampling.temperature,
            "repetition_penalty": sampling.repetition_penalty,
            "text_split_method": "cut0",
            "speed_factor": voice.speed,
            "media_type": "wav",
            "streaming_mode": false,
        });

        let url = format!("{}/tts", self.base_url);
        debug!(%url, variant = %voice.model_variant, chars = text.chars().count(), "sending tts request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LiveError::Tts(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let detail = response.text().await.unwrap_or_default();
            return Err(LiveError::Tts(format!("server returned {status}: {detail}")));
        }
        let audio = response
            .bytes()
            .await
            .map_err(|e| LiveError::Tts(format!("cannot read audio body: {e}")))?;
        if audio.is_empty() {
            return Err(LiveError::Tts("server returned empty audio".into()));
        }
        Ok(audio)
    }
}
