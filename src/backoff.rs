//! Exponential backoff with randomized jitter, driving the reconnect loop.

use std::time::Duration;

use rand::Rng;

const DEFAULT_FACTOR: f64 = 2.0;

/// A stateful delay generator: `min * factor^attempts` with a `±rand*jitter`
/// deviation, clamped to `[min, max]`.
///
/// Successive [`duration`](Backoff::duration) calls without a reset produce a
/// non-decreasing trend (modulo jitter) bounded by `max`. The attempt counter
/// is observable so callers can report it in events.
#[derive(Debug)]
pub struct Backoff {
    min: u64,
    max: u64,
    factor: f64,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    /// Create a generator with the given bounds and a jitter in `[0, 1]`.
    pub fn new(min: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            min: min.as_millis() as u64,
            max: max.as_millis() as u64,
            factor: DEFAULT_FACTOR,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    /// Compute the next delay and advance the attempt counter.
    pub fn duration(&mut self) -> Duration {
        let mut ms = self.min as f64 * self.factor.powi(self.attempts as i32);
        if self.jitter > 0.0 {
            let rand: f64 = rand::rng().random();
            let deviation = (rand * self.jitter * ms).floor();
            ms = if ((rand * 10.0) as u64) & 1 == 0 {
                ms - deviation
            } else {
                ms + deviation
            };
        }
        self.attempts += 1;
        // min(max) first: keeps the clamp well-formed even if a live setter
        // pushed max below min.
        Duration::from_millis((ms as u64).min(self.max).max(self.min.min(self.max)))
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the attempt counter, so the next delay starts from `min` again.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Update the lower bound.
    pub fn set_min(&mut self, min: Duration) {
        self.min = min.as_millis() as u64;
    }

    /// Update the upper bound.
    pub fn set_max(&mut self, max: Duration) {
        self.max = max.as_millis() as u64;
    }

    /// Update the jitter, clamped to `[0, 1]`.
    pub fn set_jitter(&mut self, jitter: f64) {
        self.jitter = jitter.clamp(0.0, 1.0);
    }
}
