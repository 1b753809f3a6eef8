//! Reconnect backoff
//!
//! Exponential delay with a cap and uniform jitter, kept as plain data so the
//! reconnect loop can log and report it.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    /// Jitter as a fraction of the delay (0.2 = +/-20%)
    jitter: f64,
    /// Failed attempts since the last reset
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Attempts made since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Undelayed delay for attempt `n` (0-based): `min(initial * 2^n, max)`
    pub fn base_delay(&self, n: u32) -> Duration {
        let factor = 2u32.checked_pow(n).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Record a failed attempt and return how long to wait before the next one
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(factor).min(self.max)
    }

    /// Back to the initial delay after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
