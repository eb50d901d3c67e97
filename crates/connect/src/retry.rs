//! Backoff state for automatic reconnection attempts
//!
//! Pure state: a consecutive-failure counter mapped to a capped exponential
//! delay. No clock access; scheduling lives with the caller.

use crate::config::RetryConfig;
use std::time::Duration;

/// Tracks consecutive connection failures and derives the next retry delay
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
    failures: u32,
}

impl RetryStrategy {
    /// Create a new strategy with a zeroed failure counter
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Number of consecutive failures recorded since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed or dropped connection attempt
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Reset the failure counter after a successful connect
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Delay to wait before the next attempt
    ///
    /// Non-decreasing in the failure count and capped at
    /// `max_delay_ms`. Counts 0 and 1 both map to the initial delay.
    pub fn delay(&self) -> Duration {
        let initial = self.config.initial_delay_ms as f64;
        let exponent = self.failures.saturating_sub(1) as i32;
        let raw = initial * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}
