//! Random draws for the per-request traffic split
//!
//! Routing goes through [`RandomSource`] so tests can replay a fixed
//! sequence of decisions from a seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Uniform draws in `[0, 100)`
pub trait RandomSource: Send + Sync {
    fn next_percent(&self) -> f64;
}

/// Thread-local generator, used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_percent(&self) -> f64 {
        rand::rng().random_range(0.0..100.0)
    }
}

/// Deterministic generator seeded once
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_percent(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random_range(0.0..100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draws_stay_in_range() {
        let thread = ThreadRandom;
        let seeded = SeededRandom::new(7);
        for _ in 0..10_000 {
            let a = thread.next_percent();
            let b = seeded.next_percent();
            assert!((0.0..100.0).contains(&a));
            assert!((0.0..100.0).contains(&b));
        }
    }

    #[test]
    fn test_same_seed_replays_sequence() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        let first: Vec<f64> = (0..32).map(|_| a.next_percent()).collect();
        let second: Vec<f64> = (0..32).map(|_| b.next_percent()).collect();
        assert_eq!(first, second);
    }
}
