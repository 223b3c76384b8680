//! Web server configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the web server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Host to bind the server to
    pub host: String,
    /// Port to bind the server to
    pub port: u16,
    /// Whether to enable CORS
    pub enable_cors: bool,
    /// Stream cadence used when a client does not ask for one
    pub default_interval_ms: u64,
    /// Smaller requested cadences are raised to this
    pub min_interval_ms: u64,
    /// Maximum number of concurrent stream sessions
    pub max_stream_sessions: usize,
    /// Whether `POST /api/shutdown` may power off the host
    pub enable_shutdown: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: crate::DEFAULT_WEB_PORT,
            enable_cors: true,
            default_interval_ms: crate::DEFAULT_INTERVAL_MS,
            min_interval_ms: 250,
            max_stream_sessions: 100,
            enable_shutdown: false,
        }
    }
}

impl WebConfig {
    /// Create a new web configuration with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the host for the web server.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port for the web server.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable_cors: bool) -> Self {
        self.enable_cors = enable_cors;
        self
    }

    /// Set the default stream cadence.
    pub fn with_default_interval_ms(mut self, interval_ms: u64) -> Self {
        self.default_interval_ms = interval_ms;
        self
    }

    /// Set the minimum stream cadence.
    pub fn with_min_interval_ms(mut self, interval_ms: u64) -> Self {
        self.min_interval_ms = interval_ms;
        self
    }

    /// Set the maximum number of concurrent stream sessions.
    pub fn with_max_stream_sessions(mut self, max: usize) -> Self {
        self.max_stream_sessions = max;
        self
    }

    /// Allow or forbid the shutdown endpoint.
    pub fn with_shutdown(mut self, enable: bool) -> Self {
        self.enable_shutdown = enable;
        self
    }

    /// Get the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve a client-requested cadence.
    ///
    /// `None` means the default; zero is invalid; anything below the
    /// minimum is raised to it.
    pub fn cadence(&self, requested_ms: Option<u64>) -> Option<Duration> {
        let ms = requested_ms.unwrap_or(self.default_interval_ms);
        if ms == 0 {
            return None;
        }
        Some(Duration::from_millis(ms.max(self.min_interval_ms.max(1))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_resolution() {
        let config = WebConfig::default().with_min_interval_ms(250);
        assert_eq!(config.cadence(None), Some(Duration::from_millis(5000)));
        assert_eq!(config.cadence(Some(1000)), Some(Duration::from_millis(1000)));
        assert_eq!(config.cadence(Some(10)), Some(Duration::from_millis(250)));
        assert_eq!(config.cadence(Some(0)), None);
    }

    #[test]
    fn test_zero_default_interval_is_invalid() {
        let config = WebConfig::default().with_default_interval_ms(0);
        assert_eq!(config.cadence(None), None);
    }
}
