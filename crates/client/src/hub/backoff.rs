//! Reconnect backoff policy and retry bookkeeping.

use std::time::Duration;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts per episode
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (values below 1.0 are treated as 1.0)
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given 0-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * multiplier.powi(exponent);
        let cap = self.max_delay.as_millis() as f64;
        Duration::from_millis(millis.min(cap) as u64)
    }
}

/// Attempts made in the current reconnect episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Claim the next attempt, returning the delay to wait first, or `None`
    /// once `max_attempts` have been used.
    pub fn next_delay(&mut self, config: &ReconnectConfig) -> Option<Duration> {
        if self.attempts >= config.max_attempts {
            return None;
        }
        let delay = config.delay_for_attempt(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
