//! Voice activity detection for the synthesis quality gate.
//!
//! Uses RMS energy thresholding over fixed-length frames: a clip passes when
//! enough of its frames carry energy above the threshold.

use crate::audio::wav;
use crate::config::VadConfig;
use crate::error::{LiveError, Result};
use tracing::debug;

/// Decides whether synthesized audio contains audible speech.
pub trait VoiceActivityDetector: Send + Sync {
    /// `Ok(true)` if speech is present.
    ///
    /// # Errors
    ///
    /// Returns an error when the audio cannot be analyzed; callers treat that
    /// as a quality failure.
    fn has_speech(&self, audio: &[u8]) -> Result<bool>;
}

/// Voice activity detector using RMS energy thresholding.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    frame_ms: u32,
    min_speech_ratio: f32,
}

impl EnergyVad {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold: config.threshold,
            frame_ms: config.frame_ms.max(1),
            min_speech_ratio: config.min_speech_ratio,
        }
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn has_speech(&self, audio: &[u8]) -> Result<bool> {
        let (samples, format) = wav::decode_mono_f32(audio)?;
        if samples.is_empty() {
            return Err(LiveError::Quality("audio has no samples".into()));
        }

        let frame_len = (format.sample_rate as usize * self.frame_ms as usize / 1000).max(1);
        let mut frames = 0usize;
        let mut voiced = 0usize;
        for frame in samples.chunks(frame_len) {
            frames += 1;
            if compute_rms_energy(frame) > self.threshold {
                voiced += 1;
            }
        }

        let ratio = voiced as f32 / frames as f32;
        debug!(frames, voiced, ratio, "vad analysis");
        Ok(ratio >= self.min_speech_ratio && voiced > 0)
    }
}

/// Compute RMS energy of audio samples.
fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
