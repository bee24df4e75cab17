//! Intake → scheduler → dispatch flows through the public core API.

use crate::helpers::{START_MS, comment, gift, headless_config, offline_services, user};
use livecast::audio::device::SimulatedDevice;
use livecast::clock::ManualClock;
use livecast::events::{EventKind, Interaction, RawEvent};
use livecast::{LiveCore, RejectReason, ReplySource};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn start(min_interval_ms: u64) -> (LiveCore, Arc<ManualClock>) {
    let mut config = headless_config();
    config.scheduler.min_response_interval_ms = min_interval_ms;
    let clock = Arc::new(ManualClock::new(START_MS));
    let core = LiveCore::start(
        config,
        offline_services(Arc::clone(&clock), SimulatedDevice::new(false)),
    )
    .unwrap();
    (core, clock)
}

#[tokio::test]
async fn mixed_burst_is_answered_by_urgency_then_arrival() {
    let (core, _clock) = start(0);
    let at = START_MS;

    assert!(core.submit(RawEvent::new(Interaction::Like { count: 3 }, user("a", "A"), at)));
    assert!(core.submit(comment("b", "hello there", at)));
    assert!(core.submit(RawEvent::new(Interaction::Enter, user("c", "C"), at)));
    assert!(core.submit(gift("d", "rose", 1, 1, at)));
    assert!(core.submit(comment("e", "second comment", at)));
    assert!(core.submit(RawEvent::new(Interaction::Follow, user("f", "F"), at)));
    assert!(core.submit(gift("g", "rocket", 1, 500, at)));

    let outcomes = core.process_batch(100);
    let kinds: Vec<EventKind> = outcomes.iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Gift,
            EventKind::Gift,
            EventKind::Comment,
            EventKind::Comment,
            EventKind::Follow,
            EventKind::Enter,
            EventKind::Like,
        ]
    );
    // The bigger gift earned a tier bonus and jumps ahead.
    assert_eq!(outcomes[0].user.id, "g");
    assert_eq!(outcomes[2].user.id, "b");
    assert_eq!(outcomes[3].user.id, "e");

    for pair in outcomes.windows(2) {
        let a = (pair[0].priority, pair[0].sequence);
        let b = (pair[1].priority, pair[1].sequence);
        assert!(a < b, "{a:?} should precede {b:?}");
    }
}

#[tokio::test]
async fn replies_respect_the_minimum_interval() {
    let (core, clock) = start(3_000);
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&stamps);
    core.set_response_callback(move |_text, ctx| sink.lock().unwrap().push(ctx.timestamp_ms));

    for round in 0..10u64 {
        let now = START_MS + round * 1_000;
        clock.set(now);
        assert!(core.submit(comment(&format!("u{round}"), "any news?", now)));
        core.process_batch(10);
    }

    let stamps = stamps.lock().unwrap().clone();
    assert_eq!(stamps.len(), 4);
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] >= 3_000);
    }
    let status = core.status();
    assert_eq!(status.scheduler.counters_by_kind[&EventKind::Comment].throttled, 6);
    assert_eq!(status.scheduler.last_response_timestamp, Some(START_MS + 9_000));
}

#[tokio::test]
async fn rejections_are_counted_by_reason() {
    let mut config = headless_config();
    config.intake.queue_capacity = 2;
    config.intake.stale_after_ms = 30_000;
    let clock = Arc::new(ManualClock::new(START_MS));
    let core = LiveCore::start(
        config,
        offline_services(Arc::clone(&clock), SimulatedDevice::new(false)),
    )
    .unwrap();

    // Exactly one unit inside the staleness window is still fresh.
    assert!(core.submit(comment("a", "fresh", START_MS - 29_999)));
    assert!(!core.submit(comment("b", "stale", START_MS - 30_001)));
    assert!(!core.submit(comment("c", "   ", START_MS)));
    assert!(!core.submit(comment("d", "look at the 左上角 link", START_MS)));
    assert!(core.submit(comment("e", "second", START_MS)));
    assert!(!core.submit(comment("f", "overflow", START_MS)));

    let status = core.status().scheduler;
    assert_eq!(status.queue_size, 2);
    assert_eq!(status.queue_capacity, 2);
    assert_eq!(status.rejected_by_reason[&RejectReason::Stale], 1);
    assert_eq!(status.rejected_by_reason[&RejectReason::Invalid], 1);
    assert_eq!(status.rejected_by_reason[&RejectReason::Filtered], 1);
    assert_eq!(status.rejected_by_reason[&RejectReason::Overflow], 1);

    // The overflow left the queued entries untouched and in order.
    let contents: Vec<String> = core.process_batch(10).into_iter().map(|o| o.content).collect();
    assert_eq!(contents, vec!["fresh", "second"]);
}

#[tokio::test]
async fn wire_format_lines_flow_to_rule_replies() {
    let (core, _clock) = start(0);
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    core.set_response_callback(move |text, ctx| sink.lock().unwrap().push((text, ctx.source)));

    let gift_line = r#"{"Type":5,"Data":"{\"User\":{\"Id\":\"42\",\"Nickname\":\"Lily\",\"Level\":7},\"GiftName\":\"rose\",\"GiftCount\":3,\"DiamondCount\":1}"}"#;
    assert!(core.submit_json(gift_line));
    assert!(!core.submit_json("not json"));
    assert!(!core.submit_json(r#"{"Type":6,"Data":"{}"}"#));

    let outcomes = core.process_batch(10);
    assert_eq!(outcomes.len(), 1);
    let replies = replies.lock().unwrap().clone();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].0.contains("Lily"));
    assert!(replies[0].0.contains("rose"));
    assert_eq!(replies[0].1, ReplySource::Rule);

    core.shutdown();
    assert!(core.drain(Duration::from_secs(10)).await);
}

#[tokio::test]
async fn active_users_never_exceed_capacity() {
    let mut config = headless_config();
    config.intake.max_active_users = 5;
    let clock = Arc::new(ManualClock::new(START_MS));
    let core = LiveCore::start(
        config,
        offline_services(Arc::clone(&clock), SimulatedDevice::new(false)),
    )
    .unwrap();

    for i in 0..50u64 {
        clock.advance(10);
        core.submit(comment(&format!("viewer-{i}"), "hi", START_MS + i * 10));
        assert!(core.status().scheduler.active_user_count <= 5);
    }
    assert_eq!(core.status().scheduler.active_user_count, 5);
}
