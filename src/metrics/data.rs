//! Data structures for host telemetry snapshots.
//!
//! Snapshots serialize with camelCase keys; this is the payload carried by
//! `system-update` stream events and the one-shot snapshot endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display value used by storage and uptime fields when their adapter failed.
pub const UNKNOWN: &str = "Unknown";

/// One immutable point-in-time bundle of host telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// CPU temperature in Celsius
    pub cpu_temperature_c: f64,
    /// Per-core utilization, indexed by logical core number
    pub cpu_utilization_percent: Vec<f64>,
    /// Memory totals in GB
    pub memory: MemoryInfo,
    /// Usage of the monitored filesystem
    pub storage: StorageInfo,
    /// Human readable uptime, e.g. "up 3 hours, 2 minutes"
    pub uptime_human: String,
    /// System load averages
    pub load_average: LoadAverage,
    /// Static host description
    pub host_meta: HostMeta,
    /// When the snapshot was assembled
    pub captured_at: DateTime<Utc>,
}

/// Memory totals in gigabytes, rounded to two decimals.
///
/// `used_gb + free_gb` equals `total_gb` up to floating point noise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    #[serde(rename = "totalGB")]
    pub total_gb: f64,
    #[serde(rename = "usedGB")]
    pub used_gb: f64,
    #[serde(rename = "freeGB")]
    pub free_gb: f64,
}

/// Filesystem usage as reported by `df -h`.
///
/// Size fields are display strings ("29G", "512M") and may hold [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub total: String,
    pub used: String,
    pub available: String,
    /// Usage percentage (0.0 to 100.0)
    pub usage_percent: f64,
    pub mount_point: String,
}

/// System load averages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadAverage {
    pub one_min: f64,
    pub five_min: f64,
    pub fifteen_min: f64,
}

/// Host description gathered from process and OS introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMeta {
    /// Number of logical cores, always at least 1
    pub cpu_count: usize,
    /// Operating system family, e.g. "linux"
    pub platform: String,
    /// CPU architecture, e.g. "aarch64"
    pub arch: String,
    pub hostname: String,
    pub kernel_release: String,
}

impl MemoryInfo {
    /// Build memory totals from byte counts.
    ///
    /// `used` is derived from the rounded totals so the sum invariant holds
    /// after rounding.
    pub fn from_bytes(total_bytes: u64, free_bytes: u64) -> Self {
        let free_bytes = free_bytes.min(total_bytes);
        let total_gb = round2(bytes_to_gb(total_bytes));
        let free_gb = round2(bytes_to_gb(free_bytes));
        Self {
            total_gb,
            used_gb: round2(total_gb - free_gb),
            free_gb,
        }
    }
}

impl StorageInfo {
    /// Sentinel reported when the filesystem query fails.
    pub fn unknown(mount_point: impl Into<String>) -> Self {
        Self {
            total: UNKNOWN.to_string(),
            used: UNKNOWN.to_string(),
            available: UNKNOWN.to_string(),
            usage_percent: 0.0,
            mount_point: mount_point.into(),
        }
    }

    /// Whether this record is the failure sentinel.
    pub fn is_unknown(&self) -> bool {
        self.total == UNKNOWN && self.used == UNKNOWN && self.available == UNKNOWN
    }
}

fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A plausible four-core snapshot whose temperature is `40 + seed`.
#[cfg(test)]
pub(crate) fn fixture_snapshot(seed: f64) -> Snapshot {
    Snapshot {
        cpu_temperature_c: 40.0 + seed,
        cpu_utilization_percent: vec![10.0, 20.0, 30.0, 40.0],
        memory: MemoryInfo::from_bytes(8 * 1024 * 1024 * 1024, 6 * 1024 * 1024 * 1024),
        storage: StorageInfo {
            total: "29G".to_string(),
            used: "5.4G".to_string(),
            available: "22G".to_string(),
            usage_percent: 20.0,
            mount_point: "/".to_string(),
        },
        uptime_human: "up 1 hour".to_string(),
        load_average: LoadAverage {
            one_min: 0.1,
            five_min: 0.2,
            fifteen_min: 0.3,
        },
        host_meta: HostMeta {
            cpu_count: 4,
            platform: "linux".to_string(),
            arch: "aarch64".to_string(),
            hostname: "raspberrypi".to_string(),
            kernel_release: "6.6.31+rpt-rpi-2712".to_string(),
        },
        captured_at: chrono::Utc::now(),
    }
}
