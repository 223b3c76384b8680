//! Per-core CPU utilization from cumulative kernel tick counters.

use crate::error::{Result, SystemError};

/// Cumulative tick counters for one logical core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreTicks {
    /// Ticks spent idle or waiting on I/O
    pub idle: u64,
    /// Sum of all accounted ticks, idle included
    pub total: u64,
}

impl CoreTicks {
    /// Utilization over the whole counter history.
    ///
    /// Used when no earlier reading exists. It is biased toward the long-run
    /// average since boot and reacts slowly to load changes.
    pub fn lifetime_utilization(&self) -> f64 {
        utilization(self.idle, self.total)
    }

    /// Utilization between an earlier reading and this one.
    ///
    /// Returns `None` when no ticks elapsed or the counters went backwards.
    pub fn utilization_since(&self, earlier: &CoreTicks) -> Option<f64> {
        let total = self.total.checked_sub(earlier.total)?;
        let idle = self.idle.checked_sub(earlier.idle)?;
        if total == 0 {
            return None;
        }
        Some(utilization(idle, total))
    }
}

fn utilization(idle: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (100.0 - 100.0 * idle as f64 / total as f64).clamp(0.0, 100.0)
}

/// Parse the per-core `cpuN` lines of `/proc/stat`, ordered by core index.
///
/// The aggregate `cpu` line is skipped. Guest time is already folded into
/// user and nice by the kernel, so only the first eight columns are summed.
pub fn parse_proc_stat(contents: &str) -> Result<Vec<CoreTicks>> {
    let mut cores: Vec<(usize, CoreTicks)> = Vec::new();

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let Some(index) = label.strip_prefix("cpu") else {
            continue;
        };
        if index.is_empty() {
            continue;
        }
        let index: usize = index
            .parse()
            .map_err(|_| SystemError::parse_error(format!("bad cpu label: {}", label)))?;

        let values = fields
            .take(8)
            .map(|v| v.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SystemError::parse_error(format!("bad tick counter on {}: {}", label, e)))?;
        if values.len() < 4 {
            return Err(SystemError::parse_error(format!(
                "too few tick counters on {}",
                label
            )));
        }

        // user nice system idle iowait irq softirq steal
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let total = values.iter().sum();
        cores.push((index, CoreTicks { idle, total }));
    }

    if cores.is_empty() {
        return Err(SystemError::parse_error("no per-core cpu lines in /proc/stat"));
    }

    cores.sort_by_key(|(index, _)| *index);
    Ok(cores.into_iter().map(|(_, ticks)| ticks).collect())
}

/// Remembers the previous reading so each sample can use tick deltas.
#[derive(Debug, Default)]
pub struct CpuTracker {
    previous: Option<Vec<CoreTicks>>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-core utilization for `current`, then remember it for next time.
    ///
    /// Cores without a usable delta fall back to their lifetime ratio.
    pub fn observe(&mut self, current: Vec<CoreTicks>) -> Vec<f64> {
        let usage = match &self.previous {
            Some(previous) if previous.len() == current.len() => current
                .iter()
                .zip(previous)
                .map(|(now, before)| {
                    now.utilization_since(before)
                        .unwrap_or_else(|| now.lifetime_utilization())
                })
                .collect(),
            _ => current.iter().map(CoreTicks::lifetime_utilization).collect(),
        };
        self.previous = Some(current);
        usage
    }

    /// Forget the stored reading.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
