//! Injectable randomness for "should we reply" sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform samples in `[0, 1)`.
pub trait RandomSource: Send {
    fn next_f64(&mut self) -> f64;
}

/// Default source backed by `StdRng`.
pub struct StdRandom(StdRng);

impl StdRandom {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for StdRandom {
    fn next_f64(&mut self) -> f64 {
        self.0.r#gen::<f64>()
    }
}

/// Replays a fixed list of samples, cycling when exhausted.
#[derive(Debug, Clone)]
pub struct FixedSequence {
    values: Vec<f64>,
    index: usize,
}

impl FixedSequence {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, index: 0 }
    }
}

impl RandomSource for FixedSequence {
    fn next_f64(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let value = self.values[self.index % self.values.len()];
        self.index += 1;
        value
    }
}

/// Whether a sample permits a reply at probability `p`.
pub fn allows(sample: f64, probability: f64) -> bool {
    sample < probability
}
