//! Metric source adapters.
//!
//! Each adapter reads one value from the host and reports a [`Reading`]:
//! the value itself, a documented fallback, or a fatal failure. Only the
//! temperature sensor can be fatal.

use crate::error::{Result, SystemError};
use crate::metrics::command::CommandRunner;
use crate::metrics::cpu::{parse_proc_stat, CoreTicks};
use crate::metrics::data::{LoadAverage, StorageInfo, UNKNOWN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::debug;

/// Outcome of a single adapter read.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading<T> {
    /// The adapter produced a real value
    Ok(T),
    /// The adapter failed and a safe substitute was used
    Fallback { value: T, reason: String },
    /// The adapter failed and no substitute is safe
    Fatal(String),
}

impl<T> Reading<T> {
    /// Collapse into a value, turning `Fatal` into a sensor error.
    pub fn into_result(self) -> Result<T> {
        match self {
            Reading::Ok(value) | Reading::Fallback { value, .. } => Ok(value),
            Reading::Fatal(reason) => Err(SystemError::sensor_error(reason)),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Reading::Fallback { .. })
    }
}

/// Where the CPU temperature comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TemperatureSensor {
    /// `vcgencmd measure_temp` on Raspberry Pi firmware
    Vcgencmd,
    /// A sysfs thermal zone file reporting millidegrees Celsius
    ThermalZone { path: PathBuf },
}

impl Default for TemperatureSensor {
    fn default() -> Self {
        Self::Vcgencmd
    }
}

/// Read the CPU temperature. Never substitutes a value.
pub async fn read_temperature(
    runner: &dyn CommandRunner,
    sensor: &TemperatureSensor,
) -> Reading<f64> {
    let result = match sensor {
        TemperatureSensor::Vcgencmd => runner
            .run("vcgencmd", &["measure_temp"])
            .await
            .and_then(|out| parse_vcgencmd_temp(&out)),
        TemperatureSensor::ThermalZone { path } => tokio::fs::read_to_string(path)
            .await
            .map_err(SystemError::from)
            .and_then(|out| parse_thermal_zone(&out)),
    };

    match result {
        Ok(celsius) => Reading::Ok(celsius),
        Err(e) => Reading::Fatal(format!("temperature sensor unavailable: {}", e)),
    }
}

/// Parse `temp=48.3'C`.
pub fn parse_vcgencmd_temp(output: &str) -> Result<f64> {
    let value = output
        .trim()
        .strip_prefix("temp=")
        .ok_or_else(|| SystemError::parse_error(format!("unexpected vcgencmd output: {:?}", output)))?;
    let value = value.trim_end_matches("'C").trim_end_matches("°C");
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| SystemError::parse_error(format!("bad temperature {:?}: {}", value, e)))
}

/// Parse a sysfs thermal zone reading in millidegrees.
pub fn parse_thermal_zone(contents: &str) -> Result<f64> {
    let millis = contents
        .trim()
        .parse::<i64>()
        .map_err(|e| SystemError::parse_error(format!("bad thermal zone value: {}", e)))?;
    Ok(millis as f64 / 1000.0)
}

/// Query filesystem usage for `mount_point`, falling back to the sentinel.
pub async fn read_storage(runner: &dyn CommandRunner, mount_point: &str) -> Reading<StorageInfo> {
    let result = runner
        .run("df", &["-hP", mount_point])
        .await
        .and_then(|out| parse_df_output(&out));

    match result {
        Ok(storage) => Reading::Ok(storage),
        Err(e) => {
            debug!(mount_point, error = %e, "storage query failed, using sentinel");
            Reading::Fallback {
                value: StorageInfo::unknown(mount_point),
                reason: e.to_string(),
            }
        }
    }
}

/// Parse the first data row of `df -hP`.
pub fn parse_df_output(output: &str) -> Result<StorageInfo> {
    let row = output
        .lines()
        .skip(1)
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| SystemError::parse_error("df printed no data row"))?;

    let fields: Vec<&str> = row.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(SystemError::parse_error(format!("short df row: {:?}", row)));
    }

    let usage_percent = fields[4]
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|e| SystemError::parse_error(format!("bad df usage {:?}: {}", fields[4], e)))?
        .clamp(0.0, 100.0);

    Ok(StorageInfo {
        total: fields[1].to_string(),
        used: fields[2].to_string(),
        available: fields[3].to_string(),
        usage_percent,
        mount_point: fields[5..].join(" "),
    })
}

/// Human readable uptime from `uptime -p`, or [`UNKNOWN`].
pub async fn read_uptime(runner: &dyn CommandRunner) -> Reading<String> {
    match runner.run("uptime", &["-p"]).await {
        Ok(out) if !out.trim().is_empty() => Reading::Ok(out.trim().to_string()),
        Ok(_) => Reading::Fallback {
            value: UNKNOWN.to_string(),
            reason: "uptime printed nothing".to_string(),
        },
        Err(e) => {
            debug!(error = %e, "uptime query failed");
            Reading::Fallback {
                value: UNKNOWN.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Load averages as reported by `uptime`, else by the kernel.
pub async fn read_load_average(runner: &dyn CommandRunner) -> Reading<LoadAverage> {
    let result = runner
        .run("uptime", &[])
        .await
        .and_then(|out| parse_uptime_load(&out));

    match result {
        Ok(load) => Reading::Ok(load),
        Err(e) => {
            debug!(error = %e, "shell load average unavailable, asking the kernel");
            Reading::Fallback {
                value: kernel_load_average(),
                reason: e.to_string(),
            }
        }
    }
}

/// Parse the load triplet from `uptime` output.
///
/// Accepts both `load average: 0.10, 0.20, 0.30` and the BSD
/// `load averages: 0.10 0.20 0.30` forms.
pub fn parse_uptime_load(output: &str) -> Result<LoadAverage> {
    let (_, tail) = output
        .rsplit_once("load average")
        .ok_or_else(|| SystemError::parse_error("no load average in uptime output"))?;
    let (_, numbers) = tail
        .split_once(':')
        .ok_or_else(|| SystemError::parse_error("malformed load average"))?;

    let values = numbers
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .take(3)
        .map(|s| s.parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SystemError::parse_error(format!("bad load value: {}", e)))?;

    match values.as_slice() {
        [one, five, fifteen] => Ok(LoadAverage {
            one_min: one.max(0.0),
            five_min: five.max(0.0),
            fifteen_min: fifteen.max(0.0),
        }),
        _ => Err(SystemError::parse_error("expected three load values")),
    }
}

/// Kernel-reported load averages. Never fails.
pub fn kernel_load_average() -> LoadAverage {
    let load = System::load_average();
    LoadAverage {
        one_min: sanitize(load.one),
        five_min: sanitize(load.five),
        fifteen_min: sanitize(load.fifteen),
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Read cumulative per-core tick counters.
pub async fn read_cpu_ticks(proc_stat: &Path) -> Result<Vec<CoreTicks>> {
    let contents = tokio::fs::read_to_string(proc_stat).await?;
    parse_proc_stat(&contents)
}
