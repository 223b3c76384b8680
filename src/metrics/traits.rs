//! Traits for snapshot production.

use crate::error::Result;
use crate::metrics::data::Snapshot;
use async_trait::async_trait;

/// Something that can produce host telemetry snapshots.
///
/// A stream session owns its source exclusively, so implementations may keep
/// state between calls (the sampler keeps the previous CPU tick counters).
/// An `Err` means a hard failure for this sample only; the next call may
/// succeed.
#[async_trait]
pub trait SnapshotSource: Send {
    /// Collect one snapshot.
    async fn sample(&mut self) -> Result<Snapshot>;
}

/// Builds a fresh [`SnapshotSource`] for every new stream session.
pub trait SourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn SnapshotSource>;
}

impl<F> SourceFactory for F
where
    F: Fn() -> Box<dyn SnapshotSource> + Send + Sync,
{
    fn create(&self) -> Box<dyn SnapshotSource> {
        self()
    }
}
