//! Host telemetry sampling.
//!
//! This module provides the metric source adapters (CPU ticks, temperature,
//! memory, storage, uptime, load averages) and the sampler that merges their
//! readings into one immutable [`Snapshot`].

pub mod command;
pub mod cpu;
pub mod data;
pub mod sampler;
pub mod sources;
pub mod traits;

// Re-export commonly used items
pub use command::{CommandRunner, SystemCommandRunner};
pub use data::Snapshot;
pub use sampler::{Sampler, SamplerConfig};
pub use sources::{Reading, TemperatureSensor};
pub use traits::{SnapshotSource, SourceFactory};
