//! Stream events sent from a session to its client.

use crate::metrics::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message sent in place of a snapshot when a tick's sample fails.
pub const SAMPLE_FAILED_MESSAGE: &str = "Failed to fetch system data";

/// One event on a telemetry stream.
///
/// Serialized as JSON with a `type` discriminator:
/// `{"type":"system-update","data":{..},"timestamp":".."}` or
/// `{"type":"error","message":"..","timestamp":".."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    SystemUpdate {
        data: Box<Snapshot>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn update(snapshot: Snapshot) -> Self {
        Self::SystemUpdate {
            data: Box::new(snapshot),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Self::SystemUpdate { .. })
    }

    /// Encode as a single-line JSON payload.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a JSON payload received from a stream.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}
