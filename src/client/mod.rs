//! Client side of the snapshot stream.
//!
//! A [`spawn_controller`] task holds at most one live connection, applies
//! every inbound event to a [`StreamView`], and reconnects after a fixed delay
//! whenever the connection fails or drops.

pub mod config;
pub mod controller;
pub mod sse;
pub mod transport;

pub use config::ControllerConfig;
pub use controller::{
    spawn_controller, ConnectionHealth, ControllerHandle, ControllerState, StreamController,
    StreamView, CONNECTION_LOST_MESSAGE, PARSE_FAILED_MESSAGE,
};
pub use sse::{Frame, SseDecoder};
pub use transport::{stream_url, HttpTransport, MessageStream, Transport};

use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Start a controller streaming from the server described by `config`.
pub fn connect_http(config: &ControllerConfig) -> Result<ControllerHandle> {
    let transport = HttpTransport::new(config)?;
    info!("Streaming from {}", transport.url());
    Ok(spawn_controller(Arc::new(transport), config))
}
