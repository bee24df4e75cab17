//! Offline synthesizer that renders a tone per line.
//!
//! Stands in for a real engine when none is configured; duration follows
//! the text length so scheduling and preemption behave realistically.

use super::{SpeechSynthesisService, VoiceParams};
use crate::audio::wav;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Seconds of audio per character at speed 1.0.
const SECONDS_PER_CHAR: f32 = 0.08;
const MAX_SECONDS: f32 = 10.0;
const MIN_SECONDS: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(8_000),
        }
    }

    /// Expected clip duration for `text` at `speed`.
    pub fn duration_secs(text: &str, speed: f32) -> f32 {
        let speed = if speed > 0.0 { speed } else { 1.0 };
        (text.chars().count() as f32 * SECONDS_PER_CHAR / speed).clamp(MIN_SECONDS, MAX_SECONDS)
    }
}

#[async_trait]
impl SpeechSynthesisService for ToneSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Bytes> {
        let seconds = Self::duration_secs(text, voice.speed);
        let rate = self.sample_rate as f32;
        let count = (seconds * rate) as usize;
        // Pitch varies per speaker so different voices are distinguishable.
        let pitch = 180.0 + (blake3::hash(voice.speaker.as_bytes()).as_bytes()[0] as f32);
        let samples: Vec<f32> = (0..count)
            .map(|i| 0.3 * (i as f32 * pitch * std::f32::consts::TAU / rate).sin())
            .collect();
        wav::encode_mono_i16(&samples, self.sample_rate)
    }
}
