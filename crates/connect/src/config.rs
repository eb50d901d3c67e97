//! Configuration types for the connectivity core

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a call session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Health-check ping interval in milliseconds (default: 5000ms)
    pub ping_interval_ms: u64,

    /// How long to wait for a pong before declaring the socket dead
    /// (default: 3000ms, must be shorter than the ping interval)
    pub pong_timeout_ms: u64,

    /// Timeout for opening the signaling transport (default: 10000ms)
    pub connect_timeout_ms: u64,

    /// How long a full join attempt may take before it is counted as
    /// failed (default: 15000ms)
    pub join_timeout_ms: u64,

    /// Wall-clock ceiling on automatic reconnection after the first
    /// observed disconnect (default: 30000ms)
    pub reconnect_window_ms: u64,

    /// Latency probe round trips per edge candidate (default: 3, range: 1-10)
    pub probe_attempts: u32,

    /// Timeout for a single latency probe round trip (default: 2000ms)
    pub probe_timeout_ms: u64,

    /// Keep the signaling channel alive while the app is backgrounded,
    /// using a host-provided background-execution grant (default: true)
    pub keep_alive_in_background: bool,

    /// Reconnection backoff parameters
    pub retry: RetryConfig,
}

/// Backoff parameters for automatic reconnection attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry attempt (default: 250ms)
    pub initial_delay_ms: u64,

    /// Cap on the computed delay (default: 5000ms)
    pub max_delay_ms: u64,

    /// Multiplier applied per consecutive failure (default: 2.0, must be >= 1.0)
    pub multiplier: f64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 5000,
            pong_timeout_ms: 3000,
            connect_timeout_ms: 10_000,
            join_timeout_ms: 15_000,
            reconnect_window_ms: 30_000,
            probe_attempts: 3,
            probe_timeout_ms: 2000,
            keep_alive_in_background: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

impl ConnectConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `ping_interval_ms` is not in range 1000-60000
    /// - `pong_timeout_ms` is below 100 or not shorter than the ping interval
    /// - `probe_attempts` is not in range 1-10
    /// - `reconnect_window_ms` is below 1000
    /// - `retry.multiplier` is below 1.0
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.ping_interval_ms < 1000 || self.ping_interval_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "ping_interval_ms must be in range 1000-60000, got {}",
                self.ping_interval_ms
            )));
        }

        if self.pong_timeout_ms < 100 || self.pong_timeout_ms >= self.ping_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "pong_timeout_ms must be in range 100-{}, got {}",
                self.ping_interval_ms - 1,
                self.pong_timeout_ms
            )));
        }

        if self.probe_attempts == 0 || self.probe_attempts > 10 {
            return Err(Error::InvalidConfig(format!(
                "probe_attempts must be in range 1-10, got {}",
                self.probe_attempts
            )));
        }

        if self.reconnect_window_ms < 1000 {
            return Err(Error::InvalidConfig(format!(
                "reconnect_window_ms must be at least 1000, got {}",
                self.reconnect_window_ms
            )));
        }

        if self.retry.multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.initial_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }

        Ok(())
    }

    /// Ping interval as a [`Duration`]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Pong timeout as a [`Duration`]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Per-round-trip probe timeout as a [`Duration`]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Reconnect window as a [`Duration`]
    pub fn reconnect_window(&self) -> Duration {
        Duration::from_millis(self.reconnect_window_ms)
    }
}
