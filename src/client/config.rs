//! Stream client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the reconnecting stream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Server root, e.g. `http://raspberrypi.local:8080`
    pub base_url: String,
    /// Cadence requested from the server in milliseconds
    pub interval_ms: u64,
    /// Fixed wait between a failure and the next connection attempt
    pub reconnect_delay_ms: u64,
    /// Upper bound on establishing the TCP connection
    pub connect_timeout_ms: u64,
    /// An open stream silent for this long is treated as lost
    pub idle_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{}", crate::DEFAULT_WEB_PORT),
            interval_ms: crate::DEFAULT_INTERVAL_MS,
            reconnect_delay_ms: crate::RECONNECT_DELAY_MS,
            connect_timeout_ms: 5000,
            // Twice the server's 15 s keep-alive period
            idle_timeout_ms: 30_000,
        }
    }
}

impl ControllerConfig {
    /// Create a configuration for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the requested stream cadence.
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Set how long an open stream may stay silent.
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
