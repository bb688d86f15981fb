//! Randomized delays that keep competing processes out of lockstep.

use crate::config::Config;
use rand::Rng;
use std::time::Duration;

/// A base delay multiplied by a random factor in `1..=jitter_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    jitter_max: u32,
}

impl Backoff {
    pub fn new(base: Duration, jitter_max: u32) -> Self {
        Self {
            base,
            jitter_max: jitter_max.max(1),
        }
    }

    /// Delay used when a flock attempt would block.
    pub fn contention(config: &Config) -> Self {
        Self::new(config.backoff(), config.jitter_max)
    }

    /// Delay used between head checks.
    pub fn poll(config: &Config) -> Self {
        Self::new(config.poll_interval(), config.jitter_max)
    }

    /// Draw the next delay.
    pub fn delay(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(1..=self.jitter_max);
        self.base * factor
    }

    /// Longest delay this backoff can produce.
    pub fn max_delay(&self) -> Duration {
        self.base * self.jitter_max
    }
}
