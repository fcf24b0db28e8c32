//! Reconnect backoff: `delay = min(base * 2^attempts, cap)`.
//!
//! No jitter. Alert evaluators watch reconnect timing, and a fixed
//! sequence keeps it predictable.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: u32,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempts: 0,
        }
    }

    /// Delay for a given attempt count, without mutating state.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempts))
            .min(self.cap)
    }

    /// Delay before the next retry; counts one more failed attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Called on a successful open.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}
