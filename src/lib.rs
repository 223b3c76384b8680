//! # Slice of Pi - Raspberry Pi Telemetry Streaming
//!
//! A Rust crate for streaming Raspberry Pi health snapshots to dashboards.
//!
//! ## Features
//!
//! - **Snapshot sampling**: CPU temperature, per-core utilization, memory,
//!   root storage, uptime, load average and host metadata, with per-source
//!   fallbacks so a single missing tool never fails a sample
//! - **Streaming sessions**: one independent timer per connected client,
//!   delivered as Server-Sent Events at a client-chosen cadence
//! - **Reconnecting client**: a stream controller that keeps the last good
//!   snapshot and retries a lost connection after a fixed delay
//! - **Library + Binary**: use as a crate or standalone application
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slice_of_pi::{start_web_server, SamplerConfig, WebConfig};
//!
//! #[tokio::main]
//! async fn main() -> slice_of_pi::Result<()> {
//!     // Serve /api/snapshot and /api/stream on port 8080
//!     start_web_server(WebConfig::default(), SamplerConfig::default()).await
//! }
//! ```
//!
//! Watching a server from another process:
//!
//! ```rust,no_run
//! use slice_of_pi::client::{connect_http, ControllerConfig};
//!
//! #[tokio::main]
//! async fn main() -> slice_of_pi::Result<()> {
//!     let config = ControllerConfig::new("http://raspberrypi.local:8080").with_interval_ms(1000);
//!     let handle = connect_http(&config)?;
//!     let mut views = handle.subscribe();
//!     while views.changed().await.is_ok() {
//!         if let Some(snapshot) = &views.borrow().data {
//!             println!("{:.1}°C", snapshot.cpu_temperature_c);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod metrics;
pub mod web;

// Re-export public API
pub use client::{connect_http, ControllerConfig, ControllerHandle, StreamView};
pub use error::{Result, SystemError};
pub use metrics::{
    data::{HostMeta, LoadAverage, MemoryInfo, Snapshot, StorageInfo},
    sampler::{Sampler, SamplerConfig},
    traits::{SnapshotSource, SourceFactory},
};
pub use web::{start_web_server, StreamEvent, WebConfig};

/// The default stream cadence in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 5000;

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 8080;

/// Fixed delay between a lost stream connection and the next attempt
pub const RECONNECT_DELAY_MS: u64 = 3000;
