//! Bounded retry with doubling backoff.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

use malmo_core::config::TimingConfig;

/// Fixed attempt budget with a sleep that doubles up to a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Policy for the connect-and-greet sequence.
    pub const fn connect(timing: &TimingConfig) -> Self {
        Self::new(
            timing.connect_attempts,
            timing.connect_backoff(),
            timing.connect_backoff_max(),
        )
    }

    /// Sleep after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds or the budget is spent. `op` receives the
    /// 1-based attempt number. The last error is returned.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(%what, attempt, of = attempts, error = %e, ?delay, "retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
