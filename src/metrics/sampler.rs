//! Snapshot sampler: runs every adapter and assembles one [`Snapshot`].

use crate::error::{Result, SystemError};
use crate::metrics::command::{CommandRunner, SystemCommandRunner};
use crate::metrics::cpu::CpuTracker;
use crate::metrics::data::{HostMeta, MemoryInfo, Snapshot};
use crate::metrics::sources::{self, Reading, TemperatureSensor};
use crate::metrics::traits::{SnapshotSource, SourceFactory};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, warn};

/// Sampler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Filesystem reported in the storage section
    pub mount_point: String,
    /// Hard temperature sensor
    pub sensor: TemperatureSensor,
    /// Location of the kernel CPU statistics
    pub proc_stat_path: PathBuf,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            mount_point: "/".to_string(),
            sensor: TemperatureSensor::default(),
            proc_stat_path: PathBuf::from("/proc/stat"),
        }
    }
}

impl SamplerConfig {
    /// Set the monitored mount point.
    pub fn with_mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.mount_point = mount_point.into();
        self
    }

    /// Set the temperature sensor.
    pub fn with_sensor(mut self, sensor: TemperatureSensor) -> Self {
        self.sensor = sensor;
        self
    }

    /// Set the `/proc/stat` location.
    pub fn with_proc_stat_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_stat_path = path.into();
        self
    }
}

/// Collects host telemetry snapshots.
///
/// Soft adapter failures (storage, uptime, shell load average) are replaced
/// by fallbacks. A temperature sensor failure aborts the sample with
/// [`SystemError::Sensor`].
pub struct Sampler {
    config: SamplerConfig,
    runner: Arc<dyn CommandRunner>,
    system: System,
    cpu: CpuTracker,
}

impl Sampler {
    /// Create a sampler that runs real host commands.
    pub fn new(config: SamplerConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemCommandRunner))
    }

    /// Create a sampler with a custom command runner.
    pub fn with_runner(config: SamplerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            config,
            runner,
            system,
            cpu: CpuTracker::new(),
        }
    }

    /// A factory handing each stream session its own sampler.
    pub fn factory(config: SamplerConfig, runner: Arc<dyn CommandRunner>) -> Arc<dyn SourceFactory> {
        Arc::new(move || {
            Box::new(Sampler::with_runner(config.clone(), runner.clone())) as Box<dyn SnapshotSource>
        })
    }

    /// Collect one snapshot.
    pub async fn sample(&mut self) -> Result<Snapshot> {
        let cpu_utilization_percent = self.cpu_utilization().await;
        let memory = self.memory();
        let host_meta = host_meta(cpu_utilization_percent.len());

        let runner = self.runner.as_ref();
        let config = &self.config;
        let (temperature, storage, uptime, load_average) = tokio::join!(
            sources::read_temperature(runner, &config.sensor),
            sources::read_storage(runner, &config.mount_point),
            sources::read_uptime(runner),
            sources::read_load_average(runner),
        );

        let cpu_temperature_c = match temperature {
            Reading::Fatal(reason) => {
                warn!(reason = %reason, "temperature read failed, dropping sample");
                return Err(SystemError::sensor_error(reason));
            }
            reading => reading.into_result()?,
        };

        Ok(Snapshot {
            cpu_temperature_c,
            cpu_utilization_percent,
            memory,
            storage: storage.into_result()?,
            uptime_human: uptime.into_result()?,
            load_average: load_average.into_result()?,
            host_meta,
            captured_at: Utc::now(),
        })
    }

    /// Per-core utilization, one entry per logical core.
    ///
    /// Prefers `/proc/stat` tick deltas and falls back to sysinfo's own
    /// per-core accounting when the file is missing or disagrees with the
    /// core count.
    async fn cpu_utilization(&mut self) -> Vec<f64> {
        self.system.refresh_cpu_usage();
        let known_cores = self.system.cpus().len();

        let usage = match sources::read_cpu_ticks(&self.config.proc_stat_path).await {
            Ok(ticks) if known_cores == 0 || ticks.len() == known_cores => self.cpu.observe(ticks),
            Ok(ticks) => {
                debug!(
                    proc_stat_cores = ticks.len(),
                    known_cores, "core count mismatch, using sysinfo usage"
                );
                self.cpu.reset();
                self.sysinfo_usage()
            }
            Err(e) => {
                debug!(error = %e, "cpu tick counters unavailable, using sysinfo usage");
                self.sysinfo_usage()
            }
        };

        if usage.is_empty() {
            let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
            return vec![0.0; cores];
        }
        usage
    }

    fn sysinfo_usage(&self) -> Vec<f64> {
        self.system
            .cpus()
            .iter()
            .map(|cpu| f64::from(cpu.cpu_usage()).clamp(0.0, 100.0))
            .collect()
    }

    /// Current memory totals. Never fails.
    pub fn memory(&mut self) -> MemoryInfo {
        self.system.refresh_memory();
        MemoryInfo::from_bytes(self.system.total_memory(), self.system.available_memory())
    }

    /// Host description without touching any sensor or command.
    pub fn host_meta(&self) -> HostMeta {
        let cores = match self.system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        host_meta(cores)
    }
}

fn host_meta(cpu_count: usize) -> HostMeta {
    HostMeta {
        cpu_count: cpu_count.max(1),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        kernel_release: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
    }
}

#[async_trait]
impl SnapshotSource for Sampler {
    async fn sample(&mut self) -> Result<Snapshot> {
        Sampler::sample(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::data::UNKNOWN;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Answers like a healthy Raspberry Pi unless told to break.
    #[derive(Default)]
    struct FakePi {
        broken_sensor: AtomicBool,
        broken_df: bool,
        broken_uptime: bool,
    }

    #[async_trait]
    impl CommandRunner for FakePi {
        async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
            match (program, args) {
                ("vcgencmd", _) if self.broken_sensor.load(Ordering::SeqCst) => {
                    Err(SystemError::command_error("VCHI initialization failed"))
                }
                ("vcgencmd", _) => Ok("temp=51.6'C\n".to_string()),
                ("df", _) if self.broken_df => Err(SystemError::command_error("df: /: No such file")),
                ("df", _) => Ok("Filesystem Size Used Avail Use% Mounted on\n\
                                 /dev/root 29G 5.4G 22G 20% /\n"
                    .to_string()),
                ("uptime", _) if self.broken_uptime => Err(SystemError::command_error("no uptime")),
                ("uptime", ["-p"]) => Ok("up 1 hour, 5 minutes\n".to_string()),
                ("uptime", _) => Ok("12:00:00 up 1:05, 1 user, load average: 0.10, 0.20, 0.30\n".to_string()),
                _ => Err(SystemError::command_error("unexpected command")),
            }
        }
    }

    fn sampler(pi: FakePi) -> Sampler {
        Sampler::with_runner(SamplerConfig::default(), Arc::new(pi))
    }

    #[tokio::test]
    async fn test_healthy_sample() {
        let snapshot = sampler(FakePi::default()).sample().await.unwrap();

        assert_eq!(snapshot.cpu_temperature_c, 51.6);
        assert_eq!(snapshot.storage.total, "29G");
        assert_eq!(snapshot.storage.usage_percent, 20.0);
        assert_eq!(snapshot.uptime_human, "up 1 hour, 5 minutes");
        assert_eq!(snapshot.load_average.five_min, 0.20);
        assert!(!snapshot.host_meta.hostname.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_invariants() {
        let mut sampler = sampler(FakePi::default());
        for _ in 0..3 {
            let snapshot = sampler.sample().await.unwrap();
            let memory = snapshot.memory;
            assert!((memory.used_gb + memory.free_gb - memory.total_gb).abs() <= 0.01);
            assert!(snapshot.host_meta.cpu_count > 0);
            assert_eq!(
                snapshot.cpu_utilization_percent.len(),
                snapshot.host_meta.cpu_count
            );
            assert!(snapshot
                .cpu_utilization_percent
                .iter()
                .all(|u| (0.0..=100.0).contains(u)));
            assert!((0.0..=100.0).contains(&snapshot.storage.usage_percent));
        }
    }

    #[tokio::test]
    async fn test_soft_failures_degrade_fields() {
        let pi = FakePi {
            broken_df: true,
            broken_uptime: true,
            ..Default::default()
        };
        let snapshot = sampler(pi).sample().await.unwrap();

        assert!(snapshot.storage.is_unknown());
        assert_eq!(snapshot.storage.usage_percent, 0.0);
        assert_eq!(snapshot.uptime_human, UNKNOWN);
        assert!(snapshot.load_average.one_min >= 0.0);
    }

    #[tokio::test]
    async fn test_sensor_failure_is_fatal() {
        let pi = FakePi::default();
        pi.broken_sensor.store(true, Ordering::SeqCst);
        let result = sampler(pi).sample().await;
        assert!(matches!(result, Err(SystemError::Sensor(_))));
    }

    #[tokio::test]
    async fn test_host_meta_without_sensor() {
        let pi = FakePi::default();
        pi.broken_sensor.store(true, Ordering::SeqCst);
        let mut sampler = sampler(pi);
        assert!(sampler.sample().await.is_err());

        let host = sampler.host_meta();
        assert!(host.cpu_count >= 1);
        assert_eq!(host.platform, std::env::consts::OS);
        assert_eq!(host.arch, std::env::consts::ARCH);

        let memory = sampler.memory();
        assert!(memory.total_gb >= memory.free_gb);
    }

    #[tokio::test]
    async fn test_missing_proc_stat_still_reports_every_core() {
        let config = SamplerConfig::default().with_proc_stat_path("/nonexistent/stat");
        let mut sampler = Sampler::with_runner(config, Arc::new(FakePi::default()));
        let snapshot = sampler.sample().await.unwrap();
        assert_eq!(
            snapshot.cpu_utilization_percent.len(),
            snapshot.host_meta.cpu_count
        );
    }

    #[tokio::test]
    async fn test_factory_builds_independent_samplers() {
        let factory = Sampler::factory(SamplerConfig::default(), Arc::new(FakePi::default()));
        let mut first = factory.create();
        let mut second = factory.create();
        assert!(first.sample().await.is_ok());
        assert!(second.sample().await.is_ok());
    }
}
