//! Shared helpers for integration tests.

use livecast::audio::device::SimulatedDevice;
use livecast::audio::wav;
use livecast::clock::ManualClock;
use livecast::config::VadConfig;
use livecast::events::{Interaction, RawEvent, UserInfo};
use livecast::scheduler::FixedSequence;
use livecast::tts::ToneSynthesizer;
use livecast::vad::EnergyVad;
use livecast::{LiveConfig, RuntimeEvent, Services};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Epoch milliseconds used as "now" by most tests.
pub(crate) const START_MS: u64 = 1_700_000_000_000;

pub(crate) fn user(id: &str, nickname: &str) -> UserInfo {
    UserInfo {
        id: id.into(),
        nickname: nickname.into(),
        level: 3,
    }
}

pub(crate) fn comment(user_id: &str, text: &str, at_ms: u64) -> RawEvent {
    RawEvent::new(
        Interaction::Comment { text: text.into() },
        user(user_id, user_id),
        at_ms,
    )
}

pub(crate) fn gift(user_id: &str, name: &str, count: u32, unit_value: u64, at_ms: u64) -> RawEvent {
    RawEvent::new(
        Interaction::Gift {
            name: name.into(),
            count,
            unit_value,
        },
        user(user_id, user_id),
        at_ms,
    )
}

/// Defaults with a headless, instant playback device.
pub(crate) fn headless_config() -> LiveConfig {
    let mut config = LiveConfig::default();
    config.playback.simulate_realtime = false;
    config
}

/// Offline services: tone synthesis, energy VAD, manual clock, and a
/// sampler that always allows a reply.
pub(crate) fn offline_services(clock: Arc<ManualClock>, device: SimulatedDevice) -> Services {
    Services {
        llm: None,
        tts: Arc::new(ToneSynthesizer::new(8_000)),
        vad: Arc::new(EnergyVad::new(&VadConfig::default())),
        device: Box::new(device),
        backup_device: None,
        clock,
        random: Some(Box::new(FixedSequence::new(vec![0.0]))),
    }
}

/// Mono 16-bit WAV holding `seconds` of an audible tone.
pub(crate) fn tone_wav(seconds: f32, sample_rate: u32) -> Bytes {
    let count = (seconds * sample_rate as f32) as usize;
    let samples: Vec<f32> = (0..count)
        .map(|i| 0.3 * (i as f32 * 220.0 * std::f32::consts::TAU / sample_rate as f32).sin())
        .collect();
    wav::encode_mono_i16(&samples, sample_rate).expect("encode tone")
}

/// Mono 16-bit WAV of pure silence.
pub(crate) fn silent_wav(seconds: f32, sample_rate: u32) -> Bytes {
    let count = (seconds * sample_rate as f32) as usize;
    wav::encode_mono_i16(&vec![0.0; count], sample_rate).expect("encode silence")
}

/// Wait until an event matching `pred` arrives, skipping others.
pub(crate) async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<RuntimeEvent>,
    pred: F,
) -> RuntimeEvent
where
    F: Fn(&RuntimeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("runtime channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for runtime event")
}
