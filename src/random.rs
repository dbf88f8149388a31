//! Random decisions behind injection and classification.
//!
//! The pipeline never touches a global RNG; it asks a [`RandomSource`] so
//! tests can pin every draw with a seed or a script.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of probability draws and index picks.
pub trait RandomSource: Send + Sync {
    /// A draw in `[0, 1)`.
    fn probability(&self) -> f64;

    /// An index in `0..len`. `len` is never zero.
    fn index(&self, len: usize) -> usize;
}

/// [`RandomSource`] backed by a seedable standard RNG.
#[derive(Debug)]
pub struct StdRandom {
    rng: Mutex<StdRng>,
}

impl StdRandom {
    /// Seed from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible sequence for a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for StdRandom {
    fn probability(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    fn index(&self, len: usize) -> usize {
        self.rng.lock().gen_range(0..len)
    }
}
