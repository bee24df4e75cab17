//! Synthesis pipeline against a mocked GPT-SoVITS server.

use crate::helpers::{silent_wav, tone_wav};
use livecast::config::{SynthesisConfig, TtsConfig, TtsEngine, VadConfig};
use livecast::tts::{GptSovitsClient, SynthesisPipeline, VoiceParams};
use livecast::vad::EnergyVad;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn synthesis_config() -> SynthesisConfig {
    SynthesisConfig {
        base_delay_ms: 5,
        max_delay_ms: 20,
        ..SynthesisConfig::default()
    }
}

fn pipeline(server: &MockServer, config: &SynthesisConfig) -> SynthesisPipeline {
    let tts = GptSovitsClient::new(&TtsConfig {
        engine: TtsEngine::GptSovits,
        base_url: server.uri(),
        ref_audio_path: Some("/refs/host.wav".into()),
        prompt_text: "welcome to the stream".into(),
        ..TtsConfig::default()
    })
    .unwrap();
    SynthesisPipeline::new(
        config,
        Arc::new(tts),
        Arc::new(EnergyVad::new(&VadConfig::default())),
    )
}

fn wav_response(audio: bytes::Bytes) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "audio/wav")
        .set_body_bytes(audio.to_vec())
}

#[tokio::test]
async fn silent_output_rotates_to_the_next_variant() {
    let server = MockServer::start().await;
    // Default variant (top_k 5) returns silence, v2-pro (top_k 10) speaks.
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_partial_json(json!({"top_k": 5})))
        .respond_with(wav_response(silent_wav(0.5, 16_000)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_partial_json(json!({"top_k": 10})))
        .respond_with(wav_response(tone_wav(0.5, 16_000)))
        .expect(1)
        .mount(&server)
        .await;

    let config = synthesis_config();
    let pipeline = pipeline(&server, &config);
    let voice = VoiceParams::from_config(&config);

    let done = pipeline.synthesize("thanks for the rose", &voice).await.unwrap();
    assert_eq!(done.variant, "v2-pro");
    assert_eq!(done.attempts, 2);
    assert!(!done.cached);

    // Same text and voice is served from the cache with no new request.
    let again = pipeline.synthesize("thanks for the rose", &voice).await.unwrap();
    assert!(again.cached);
    assert_eq!(again.audio, done.audio);
}

#[tokio::test]
async fn server_errors_count_as_failed_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_partial_json(json!({"top_k": 5})))
        .respond_with(ResponseTemplate::new(500).set_body_string("cuda out of memory"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_partial_json(json!({"top_k": 10})))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_partial_json(json!({"top_k": 15})))
        .respond_with(wav_response(tone_wav(0.5, 16_000)))
        .mount(&server)
        .await;

    let config = synthesis_config();
    let done = pipeline(&server, &config)
        .synthesize("welcome back", &VoiceParams::from_config(&config))
        .await
        .unwrap();
    assert_eq!(done.variant, "v1");
    assert_eq!(done.attempts, 3);
}

#[tokio::test]
async fn degenerate_output_everywhere_fails_the_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .respond_with(wav_response(silent_wav(0.5, 16_000)))
        .expect(3)
        .mount(&server)
        .await;

    let config = synthesis_config();
    let pipeline = pipeline(&server, &config);
    let voice = VoiceParams::from_config(&config);
    let failed = pipeline.synthesize("is anyone there", &voice).await.unwrap_err();

    assert_eq!(failed.attempts.len(), 3);
    let variants: BTreeSet<&str> = failed.attempts.iter().map(|a| a.variant.as_str()).collect();
    assert_eq!(variants.len(), 3);
    assert!(failed.reason.contains("no speech"));
    assert_eq!(failed.fingerprint, voice.fingerprint("is anyone there"));
    assert_eq!(pipeline.cache().entry_count(), 0);
}

#[tokio::test]
async fn prompt_text_matching_target_is_disambiguated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tts"))
        .and(body_partial_json(json!({
            "text": "welcome to the stream",
            "prompt_text": "welcome to the stream (reference)",
            "ref_audio_path": "/refs/host.wav",
            "media_type": "wav"
        })))
        .respond_with(wav_response(tone_wav(0.3, 16_000)))
        .expect(1)
        .mount(&server)
        .await;

    let config = synthesis_config();
    let done = pipeline(&server, &config)
        .synthesize("welcome to the stream", &VoiceParams::from_config(&config))
        .await
        .unwrap();
    assert_eq!(done.attempts, 1);
}
