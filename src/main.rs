//! Slice of Pi - Raspberry Pi Telemetry Streaming Binary
//!
//! Serves live snapshot streams, takes one-shot snapshots, and watches a
//! remote stream from the terminal.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use slice_of_pi::client::{connect_http, ControllerConfig, ControllerState, StreamView};
use slice_of_pi::metrics::TemperatureSensor;
use slice_of_pi::{
    start_web_server, Sampler, SamplerConfig, Snapshot, WebConfig, DEFAULT_INTERVAL_MS,
    DEFAULT_WEB_PORT, RECONNECT_DELAY_MS,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "slice_of_pi")]
#[command(about = "🥧 Slice of Pi - Raspberry Pi Telemetry Streaming")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Streams Raspberry Pi health snapshots to dashboards over Server-Sent Events")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Web server bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Web server port
    #[arg(short, long, default_value_t = DEFAULT_WEB_PORT)]
    port: u16,

    /// Stream cadence in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL_MS)]
    interval: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server (default)
    Serve(ServeArgs),

    /// Take a single snapshot and exit
    Snapshot(SnapshotArgs),

    /// Follow a server's snapshot stream
    Watch(WatchArgs),

    /// Show host information
    Info(SamplerArgs),
}

#[derive(Args, Default)]
struct SamplerArgs {
    /// Filesystem to report storage for
    #[arg(long, default_value = "/")]
    mount: String,

    /// Read temperature from a sysfs thermal zone instead of vcgencmd
    #[arg(long, value_name = "PATH")]
    thermal_zone: Option<PathBuf>,
}

#[derive(Args, Default)]
struct ServeArgs {
    #[command(flatten)]
    sampler: SamplerArgs,

    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Maximum concurrent stream sessions
    #[arg(long, default_value_t = 100)]
    max_sessions: usize,

    /// Smallest cadence a client may request, in milliseconds
    #[arg(long, default_value_t = 250)]
    min_interval: u64,

    /// Enable POST /api/shutdown
    #[arg(long)]
    allow_shutdown: bool,
}

#[derive(Args)]
struct SnapshotArgs {
    #[command(flatten)]
    sampler: SamplerArgs,

    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

#[derive(Args)]
struct WatchArgs {
    /// Server to stream from
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Delay before reconnecting after a lost connection, in milliseconds
    #[arg(long, default_value_t = RECONNECT_DELAY_MS)]
    reconnect_delay: u64,
}

impl SamplerArgs {
    fn sampler_config(&self) -> SamplerConfig {
        let config = SamplerConfig::default().with_mount_point(&self.mount);
        match &self.thermal_zone {
            Some(path) => config.with_sensor(TemperatureSensor::ThermalZone { path: path.clone() }),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve(args)) => {
            print_banner();
            serve_command(&cli, args).await?;
        }
        Some(Commands::Snapshot(args)) => {
            snapshot_command(args).await?;
        }
        Some(Commands::Watch(args)) => {
            watch_command(&cli, args).await?;
        }
        Some(Commands::Info(args)) => {
            info_command(args).await?;
        }
        None => {
            // Default to serve command
            print_banner();
            let serve_args = ServeArgs {
                max_sessions: 100,
                min_interval: 250,
                sampler: SamplerArgs {
                    mount: "/".to_string(),
                    thermal_zone: None,
                },
                ..Default::default()
            };
            serve_command(&cli, &serve_args).await?;
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn print_banner() {
    println!("🥧 Slice of Pi - Raspberry Pi Telemetry Streaming");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}

async fn serve_command(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    let web_config = WebConfig::new(&cli.host, cli.port)
        .with_cors(!args.no_cors)
        .with_default_interval_ms(cli.interval)
        .with_min_interval_ms(args.min_interval)
        .with_max_stream_sessions(args.max_sessions)
        .with_shutdown(args.allow_shutdown);
    let sampler_config = args.sampler.sampler_config();

    info!("Web server configuration:");
    info!("  - Bind address: {}:{}", cli.host, cli.port);
    info!("  - CORS enabled: {}", !args.no_cors);
    info!("  - Max stream sessions: {}", args.max_sessions);
    info!("  - Default cadence: {}ms (min {}ms)", cli.interval, args.min_interval);
    info!("  - Shutdown endpoint: {}", args.allow_shutdown);
    info!("  - Storage mount: {}", sampler_config.mount_point);

    start_web_server(web_config, sampler_config).await?;

    Ok(())
}

async fn take_snapshot(args: &SamplerArgs) -> anyhow::Result<Snapshot> {
    let mut sampler = Sampler::new(args.sampler_config());
    sampler.sample().await.context("Failed to fetch system data")
}

async fn snapshot_command(args: &SnapshotArgs) -> anyhow::Result<()> {
    match args.format.as_str() {
        "json" => {
            let snapshot = take_snapshot(&args.sampler).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        "pretty" => {
            let snapshot = take_snapshot(&args.sampler).await?;
            print_pretty_snapshot(&snapshot);
        }
        other => bail!("Unsupported format: {}. Use 'json' or 'pretty'", other),
    }

    Ok(())
}

async fn watch_command(cli: &Cli, args: &WatchArgs) -> anyhow::Result<()> {
    let config = ControllerConfig::new(&args.url)
        .with_interval_ms(cli.interval)
        .with_reconnect_delay_ms(args.reconnect_delay);
    let handle = connect_http(&config)?;
    let mut views = handle.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_view(&view);
            }
        }
    }

    let view = handle.close().await;
    print_view(&view);
    Ok(())
}

async fn info_command(args: &SamplerArgs) -> anyhow::Result<()> {
    println!("🥧 Slice of Pi Host Information");
    println!("===============================");
    println!();

    let mut sampler = Sampler::new(args.sampler_config());
    let host = sampler.host_meta();
    let memory = sampler.memory();

    println!("System Details:");
    println!("  Hostname: {}", host.hostname);
    println!("  Platform: {}", host.platform);
    println!("  Kernel: {}", host.kernel_release);
    println!();

    println!("Hardware:");
    println!("  CPU cores: {}", host.cpu_count);
    println!("  Architecture: {}", host.arch);
    println!("  Memory: {:.2} GB total", memory.total_gb);

    // The sensor is optional here; host details above never depend on it.
    match sampler.sample().await {
        Ok(snapshot) => {
            println!("  CPU Temperature: {:.1}°C", snapshot.cpu_temperature_c);
            println!("  Uptime: {}", snapshot.uptime_human);
        }
        Err(e) => println!("  CPU Temperature: unavailable ({})", e),
    }

    Ok(())
}

fn print_view(view: &StreamView) {
    let status = match view.state {
        ControllerState::Connecting => "connecting",
        ControllerState::Open => "connected",
        ControllerState::ReconnectWait => "waiting to reconnect",
        ControllerState::Closed => "closed",
    };

    match &view.data {
        Some(snapshot) => println!(
            "[{}] {:.1}°C  cpu {}  mem {:.2}/{:.2} GB  load {:.2}",
            status,
            snapshot.cpu_temperature_c,
            format_cores(&snapshot.cpu_utilization_percent),
            snapshot.memory.used_gb,
            snapshot.memory.total_gb,
            snapshot.load_average.one_min
        ),
        None => println!("[{}] no data yet", status),
    }

    if let Some(error) = &view.health.last_error {
        println!("  ! {}", error);
    }
}

fn format_cores(cores: &[f64]) -> String {
    cores
        .iter()
        .map(|usage| format!("{:.0}%", usage))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_pretty_snapshot(snapshot: &Snapshot) {
    println!(
        "🥧 System Snapshot ({})",
        snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("==========================================");
    println!();

    println!("⚡ CPU:");
    println!("  Cores: {}", snapshot.host_meta.cpu_count);
    println!("  Usage: {}", format_cores(&snapshot.cpu_utilization_percent));
    println!(
        "  Load: {:.2}, {:.2}, {:.2}",
        snapshot.load_average.one_min,
        snapshot.load_average.five_min,
        snapshot.load_average.fifteen_min
    );
    println!();

    println!("🧠 Memory:");
    println!("  Total: {:.2} GB", snapshot.memory.total_gb);
    println!("  Used: {:.2} GB", snapshot.memory.used_gb);
    println!("  Free: {:.2} GB", snapshot.memory.free_gb);
    println!();

    println!("🌡️  Temperature:");
    println!("  CPU: {:.1}°C", snapshot.cpu_temperature_c);
    println!();

    println!("💾 Storage ({}):", snapshot.storage.mount_point);
    println!(
        "  {} total, {} used, {} available ({:.0}%)",
        snapshot.storage.total,
        snapshot.storage.used,
        snapshot.storage.available,
        snapshot.storage.usage_percent
    );
    println!();

    println!("🖥️  System:");
    println!("  Hostname: {}", snapshot.host_meta.hostname);
    println!(
        "  OS: {} {} ({})",
        snapshot.host_meta.platform, snapshot.host_meta.kernel_release, snapshot.host_meta.arch
    );
    println!("  Uptime: {}", snapshot.uptime_human);
}
