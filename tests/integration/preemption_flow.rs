//! Preemption decisions over real chunked WAV audio.

use crate::helpers::tone_wav;
use livecast::audio::chunk::chunk_audio;
use livecast::audio::engine::{PlaybackEngine, PlaybackNotice, PlaybackTask, PreemptionPolicy};
use livecast::config::PlaybackConfig;

const RATE: u32 = 8_000;
const CHUNK_MS: u32 = 200;

fn engine() -> PlaybackEngine {
    let policy = PreemptionPolicy::from_steps(&PlaybackConfig::default().preemption_steps).unwrap();
    PlaybackEngine::new(policy)
}

fn task(sequence: u64, priority: u32, seconds: f32) -> PlaybackTask {
    let chunks = chunk_audio(tone_wav(seconds, RATE), priority, sequence, CHUNK_MS, 32_000);
    PlaybackTask::new(None, format!("line {sequence}"), priority, sequence, chunks)
}

/// Drives the engine like the playback thread, with a device that never fails.
struct Driver {
    engine: PlaybackEngine,
    played: Vec<(u64, usize)>,
    notices: Vec<PlaybackNotice>,
}

impl Driver {
    fn new() -> Self {
        Self {
            engine: engine(),
            played: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// Play one chunk. Returns false once nothing is left.
    fn step(&mut self) -> bool {
        let step = self.engine.poll();
        self.notices.extend(step.notices);
        match step.chunk {
            Some(chunk) => {
                self.played.push((chunk.task_sequence, chunk.index));
                let notices = self.engine.chunk_finished(Ok(()));
                self.notices.extend(notices);
                true
            }
            None => false,
        }
    }

    fn steps(&mut self, n: usize) {
        for _ in 0..n {
            assert!(self.step(), "engine ran dry early");
        }
    }

    fn run_to_idle(&mut self) {
        while self.step() {}
        assert!(self.engine.is_idle());
    }

    fn preempted(&self) -> Vec<(u64, u64, usize)> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                PlaybackNotice::Preempted {
                    sequence,
                    by,
                    resume_chunk,
                    ..
                } => Some((*sequence, *by, *resume_chunk)),
                _ => None,
            })
            .collect()
    }

    fn completed(&self) -> Vec<u64> {
        self.notices
            .iter()
            .filter_map(|n| match n {
                PlaybackNotice::Completed { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn wav_chunks_line_up_with_the_chunk_length() {
    let narration = task(1, 90, 2.0);
    assert_eq!(narration.chunks.len(), 10);
    assert!(narration.chunks[0].header_len > 0);
    assert_eq!(narration.chunks[0].pcm().len(), narration.chunks[1].data.len());
    assert_eq!(narration.total.as_millis(), 2_000);
}

#[test]
fn urgent_reply_interrupts_early_narration_and_narration_resumes() {
    let mut d = Driver::new();
    d.engine.submit(task(1, 60, 2.0));
    d.steps(1);
    assert!((d.engine.current().unwrap().elapsed_fraction() - 0.1).abs() < 1e-9);

    d.engine.submit(task(2, 30, 0.4));
    d.run_to_idle();

    assert_eq!(d.preempted(), vec![(1, 2, 1)]);
    let expected: Vec<(u64, usize)> = [(1, 0), (2, 0), (2, 1)]
        .into_iter()
        .chain((1..10).map(|i| (1, i)))
        .collect();
    assert_eq!(d.played, expected);
    assert_eq!(d.completed(), vec![2, 1]);
    assert!(d.notices.contains(&PlaybackNotice::Resumed {
        sequence: 1,
        from_chunk: 1
    }));
}

#[test]
fn same_gap_is_refused_near_the_end() {
    let mut d = Driver::new();
    d.engine.submit(task(1, 40, 4.0));
    d.steps(19);
    assert!((d.engine.current().unwrap().elapsed_fraction() - 0.95).abs() < 1e-9);

    // Gap of 6 clears the opening threshold but not the closing one.
    d.engine.submit(task(2, 34, 0.4));
    d.run_to_idle();

    assert!(d.preempted().is_empty());
    assert!(d.notices.contains(&PlaybackNotice::Deferred {
        sequence: 2,
        behind: 1
    }));
    assert_eq!(d.played[19], (1, 19));
    assert_eq!(&d.played[20..], &[(2, 0), (2, 1)]);
    assert_eq!(d.completed(), vec![1, 2]);
}

#[test]
fn same_gap_preempts_early_on() {
    let mut d = Driver::new();
    d.engine.submit(task(1, 40, 4.0));
    d.steps(2);
    d.engine.submit(task(2, 34, 0.4));
    d.run_to_idle();
    assert_eq!(d.preempted(), vec![(1, 2, 2)]);
    assert_eq!(d.completed(), vec![2, 1]);
}

#[test]
fn nested_interrupts_unwind_most_recent_first() {
    let mut d = Driver::new();
    d.engine.submit(task(1, 90, 2.0));
    d.steps(3);
    d.engine.submit(task(2, 30, 1.0));
    d.steps(2);
    d.engine.submit(task(3, 10, 0.4));
    d.steps(1);
    assert_eq!(d.engine.stack_depth(), 2);

    d.run_to_idle();
    assert_eq!(d.preempted(), vec![(1, 2, 3), (2, 3, 2)]);
    assert_eq!(d.completed(), vec![3, 2, 1]);

    // Each task's chunks play exactly once, in order.
    for sequence in 1..=3 {
        let indices: Vec<usize> = d
            .played
            .iter()
            .filter(|(s, _)| *s == sequence)
            .map(|(_, i)| *i)
            .collect();
        let expected: Vec<usize> = (0..indices.len()).collect();
        assert_eq!(indices, expected, "task {sequence}");
    }
}

#[test]
fn equal_priority_waits_its_turn() {
    let mut d = Driver::new();
    d.engine.submit(task(1, 30, 0.6));
    d.steps(1);
    d.engine.submit(task(2, 30, 0.4));
    d.run_to_idle();
    assert!(d.preempted().is_empty());
    assert_eq!(d.played, vec![(1, 0), (1, 1), (1, 2), (2, 0), (2, 1)]);
}
