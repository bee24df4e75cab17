//! Full core: intake through dispatch, synthesis and playback.

use crate::helpers::{
    START_MS, comment, gift, headless_config, offline_services, silent_wav, wait_for_event,
};
use async_trait::async_trait;
use bytes::Bytes;
use livecast::audio::device::SimulatedDevice;
use livecast::audio::engine::PlaybackNotice;
use livecast::clock::ManualClock;
use livecast::config::LlmConfig;
use livecast::llm::{LanguageModelService, OllamaClient};
use livecast::tts::{SpeechSynthesisService, VoiceParams};
use livecast::{LiveConfig, LiveCore, ReplySource, Result, RuntimeEvent};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ollama(server: &MockServer) -> Arc<dyn LanguageModelService> {
    Arc::new(OllamaClient::new(&LlmConfig {
        enabled: true,
        base_url: server.uri(),
        ..LlmConfig::default()
    }))
}

fn start_with_llm(config: LiveConfig, server: &MockServer, device: SimulatedDevice) -> LiveCore {
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut services = offline_services(clock, device);
    services.llm = Some(ollama(server));
    LiveCore::start(config, services).unwrap()
}

fn is_final_for(id: &str) -> impl Fn(&RuntimeEvent) -> bool + '_ {
    move |event| matches!(event, RuntimeEvent::ReplyFinal { event_id, .. } if event_id == id)
}

fn is_completed_for(id: &str) -> impl Fn(&RuntimeEvent) -> bool + '_ {
    move |event| {
        matches!(
            event,
            RuntimeEvent::Playback {
                notice: PlaybackNotice::Completed { event_id: Some(e), .. }
            } if e == id
        )
    }
}

#[tokio::test]
async fn generated_reply_is_spoken() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"response": "It ships tomorrow!"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let device = SimulatedDevice::new(false);
    let played = device.played_log();
    let core = start_with_llm(headless_config(), &server, device);
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    core.set_response_callback(move |text, ctx| sink.lock().unwrap().push((text, ctx.source)));
    let mut rx = core.subscribe();

    assert!(core.submit(comment("ana", "when does it ship?", START_MS)));
    let outcome = core.process_batch(1).remove(0);
    assert!(outcome.provisional);
    assert!(outcome.response.as_deref().unwrap().contains("ana"));

    let id = outcome.event_id.clone();
    let event = wait_for_event(&mut rx, is_final_for(&id)).await;
    assert!(matches!(
        event,
        RuntimeEvent::ReplyFinal { source: ReplySource::Generated, ref text, .. } if text == "It ships tomorrow!"
    ));
    wait_for_event(&mut rx, is_completed_for(&id)).await;

    assert_eq!(
        replies.lock().unwrap().clone(),
        vec![("It ships tomorrow!".to_owned(), ReplySource::Generated)]
    );
    let resolved = core.scheduler().outcome(&id).unwrap();
    assert!(!resolved.provisional);
    assert_eq!(resolved.source, Some(ReplySource::Generated));
    assert!(played.lock().unwrap().iter().all(|(seq, _)| *seq == outcome.sequence));

    core.shutdown();
    assert!(core.drain(Duration::from_secs(10)).await);
    assert_eq!(core.status().playback.completed, 1);
}

#[tokio::test]
async fn model_failure_falls_back_to_product_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let core = start_with_llm(headless_config(), &server, SimulatedDevice::new(false));
    let mut rx = core.subscribe();
    assert!(core.submit(comment("ben", "what's the price?", START_MS)));
    let id = core.process_batch(1).remove(0).event_id;

    match wait_for_event(&mut rx, is_final_for(&id)).await {
        RuntimeEvent::ReplyFinal { text, source, .. } => {
            assert_eq!(source, ReplySource::Fallback);
            assert!(text.contains("ben"));
            assert!(text.contains("live price"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    core.shutdown();
    assert!(core.drain(Duration::from_secs(10)).await);
}

#[tokio::test]
async fn slow_model_is_cut_off_at_the_drain_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": "too late"}))
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;

    let mut config = headless_config();
    config.dispatch.request_timeout_ms = 60_000;
    let core = start_with_llm(config, &server, SimulatedDevice::new(false));
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    core.set_response_callback(move |_text, ctx| sink.lock().unwrap().push(ctx.source));

    assert!(core.submit(comment("cy", "do you ship abroad?", START_MS)));
    core.process_batch(1);
    core.shutdown();

    assert!(!core.drain(Duration::from_millis(200)).await);
    assert_eq!(replies.lock().unwrap().clone(), vec![ReplySource::Fallback]);
}

#[tokio::test]
async fn gift_thanks_come_from_the_template() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let device = SimulatedDevice::new(false);
    let core = LiveCore::start(headless_config(), offline_services(clock, device)).unwrap();
    let mut rx = core.subscribe();

    assert!(core.submit(gift("dee", "rocket", 2, 500, START_MS)));
    let outcome = core.process_batch(1).remove(0);
    assert_eq!(outcome.source, Some(ReplySource::Rule));
    assert_eq!(
        outcome.response.as_deref(),
        Some("Thank you dee for the 2 rocket!")
    );
    wait_for_event(&mut rx, is_completed_for(&outcome.event_id)).await;

    core.shutdown();
    assert!(core.drain(Duration::from_secs(10)).await);
}

#[tokio::test]
async fn narration_is_interrupted_by_a_reply_and_finishes_later() {
    let mut config = headless_config();
    config.playback.simulate_realtime = true;
    config.playback.chunk_ms = 100;
    let clock = Arc::new(ManualClock::new(START_MS));
    let device = SimulatedDevice::new(true);
    let core = LiveCore::start(config, offline_services(clock, device)).unwrap();
    let mut rx = core.subscribe();

    // A long line keeps the narration playing for a couple of seconds.
    let narration = core
        .enqueue_script("Today we are looking at a brand new kettle with a whole lot of features")
        .unwrap();
    wait_for_event(&mut rx, |e| {
        matches!(e, RuntimeEvent::Playback { notice: PlaybackNotice::Started { sequence, .. } } if *sequence == narration)
    })
    .await;

    assert!(core.submit(gift("eve", "rose", 1, 1, START_MS)));
    let reply = core.process_batch(1).remove(0);
    wait_for_event(&mut rx, |e| {
        matches!(e, RuntimeEvent::Playback { notice: PlaybackNotice::Preempted { sequence, by, .. } }
            if *sequence == narration && *by == reply.sequence)
    })
    .await;
    wait_for_event(&mut rx, |e| {
        matches!(e, RuntimeEvent::Playback { notice: PlaybackNotice::Resumed { sequence, .. } } if *sequence == narration)
    })
    .await;

    core.shutdown();
    assert!(core.drain(Duration::from_secs(30)).await);
    let playback = core.status().playback;
    assert_eq!(playback.completed, 2);
    assert_eq!(playback.interrupt_depth, 0);
}

/// Engine that only ever produces silence.
struct SilentEngine;

#[async_trait]
impl SpeechSynthesisService for SilentEngine {
    async fn synthesize(&self, _text: &str, _voice: &VoiceParams) -> Result<Bytes> {
        Ok(silent_wav(0.3, 8_000))
    }
}

#[tokio::test]
async fn unspeakable_reply_reports_synthesis_failure() {
    let mut config = headless_config();
    config.synthesis.base_delay_ms = 1;
    config.synthesis.max_delay_ms = 5;
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut services = offline_services(clock, SimulatedDevice::new(false));
    services.tts = Arc::new(SilentEngine);
    let core = LiveCore::start(config, services).unwrap();
    let mut rx = core.subscribe();

    assert!(core.submit(gift("fay", "rose", 1, 1, START_MS)));
    let id = core.process_batch(1).remove(0).event_id;

    let event = wait_for_event(&mut rx, |e| matches!(e, RuntimeEvent::SynthesisFailed { .. })).await;
    match event {
        RuntimeEvent::SynthesisFailed {
            event_id,
            attempts,
            reason,
        } => {
            assert_eq!(event_id.as_deref(), Some(id.as_str()));
            assert_eq!(attempts, 3);
            assert!(reason.contains("no speech"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    core.shutdown();
    assert!(core.drain(Duration::from_secs(10)).await);
    assert_eq!(core.status().playback.completed, 0);
}

#[tokio::test]
async fn intake_closes_on_shutdown() {
    let clock = Arc::new(ManualClock::new(START_MS));
    let core = LiveCore::start(
        headless_config(),
        offline_services(clock, SimulatedDevice::new(false)),
    )
    .unwrap();
    core.shutdown();
    assert!(!core.submit(comment("gus", "hello?", START_MS)));
    assert!(core.enqueue_script("late narration").is_err());
    assert!(core.drain(Duration::from_secs(5)).await);
}
