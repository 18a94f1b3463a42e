//! ServWatch Agent binary
//!
//! Samples host metrics and streams them to a ServWatch collector.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use servwatch_agent::{
    metrics::data::MetricsSnapshot, Agent, AgentConfig, CliOverrides, MetricsProvider, Sampler,
    SocketIoTransport, StaticSystemInfo, SystemCollector,
};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "servwatch-agent")]
#[command(about = "ServWatch host monitoring agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Samples system metrics and streams them to a ServWatch collector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collector URL (overrides config and SERVWATCH_SERVER)
    #[arg(short, long)]
    server: Option<String>,

    /// Agent identifier
    #[arg(short = 'i', long)]
    agent_id: Option<String>,

    /// Disable GPU monitoring
    #[arg(long)]
    no_gpu: bool,

    /// Sampling interval in milliseconds
    #[arg(long)]
    collect_interval: Option<u64>,

    /// Transmission interval in milliseconds
    #[arg(long)]
    transmit_interval: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    Run,

    /// Take a single snapshot and exit
    Snapshot(SnapshotArgs),

    /// Show static system information
    Info,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        let log_level = if self.debug {
            Some("DEBUG".to_string())
        } else if self.verbose {
            Some("INFO".to_string())
        } else {
            None
        };

        CliOverrides {
            server_url: self.server.clone(),
            agent_id: self.agent_id.clone(),
            enable_gpu: self.no_gpu.then_some(false),
            collect_interval: self.collect_interval,
            transmit_interval: self.transmit_interval,
            log_level,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, source) = AgentConfig::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;

    // Initialize tracing/logging
    init_logging(&config)?;

    match &source.path {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => info!("No configuration file found, using defaults"),
    }
    for (path, reason) in &source.skipped {
        warn!(path = %path.display(), reason = %reason, "Skipped unreadable configuration file");
    }

    match &cli.command {
        Some(Commands::Run) | None => {
            print_banner(&config);
            run_command(config).await?;
        }
        Some(Commands::Snapshot(args)) => {
            snapshot_command(&config, args)?;
        }
        Some(Commands::Info) => {
            info_command(&config)?;
        }
    }

    Ok(())
}

fn init_logging(config: &AgentConfig) -> anyhow::Result<()> {
    let level = config.logging.tracing_level()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn print_banner(config: &AgentConfig) {
    println!("ServWatch Agent v{}", env!("CARGO_PKG_VERSION"));
    println!("   Agent:     {} ({})", config.agent_name(), config.agent_id());
    println!("   Collector: {}", config.server.url);
    println!(
        "   Intervals: collect {} ms, transmit {} ms",
        config.agent.collect_interval, config.agent.transmit_interval
    );
    println!();
}

async fn run_command(config: AgentConfig) -> anyhow::Result<()> {
    let collector = SystemCollector::with_gpu(config.gpu_enabled())
        .context("Failed to initialize system collector")?;
    if config.gpu_enabled() && !collector.gpu_available() {
        info!("GPU monitoring not available on this host");
    }

    let transport = SocketIoTransport::new(config.collector_url()?, config.reconnect_options());
    let mut agent = Agent::new(config, collector, transport);

    let handle = agent.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        handle.stop();
    });

    agent.run().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn snapshot_command(config: &AgentConfig, args: &SnapshotArgs) -> anyhow::Result<()> {
    let collector = SystemCollector::with_gpu(config.gpu_enabled())?;
    let mut sampler = Sampler::new(collector, config.effective_metrics());

    // CPU usage needs two refreshes some time apart.
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    let snapshot = sampler.collect_all()?;

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&snapshot)?;
            println!("{}", json);
        }
        OutputFormat::Pretty => print_pretty_snapshot(&snapshot),
    }

    Ok(())
}

fn info_command(config: &AgentConfig) -> anyhow::Result<()> {
    let mut collector = SystemCollector::with_gpu(config.gpu_enabled())?;
    let info = collector.static_system_info()?;

    println!("ServWatch System Information");
    println!("============================");
    println!();
    print_system_info(&info);
    println!();

    println!("Agent:");
    println!("  ID: {}", config.agent_id());
    println!("  Name: {}", config.agent_name());
    println!("  Collector: {}", config.server.url);
    println!("  GPU available: {}", if collector.gpu_available() { "yes" } else { "no" });

    println!();
    println!("Features compiled:");
    #[cfg(feature = "gpu")]
    println!("  - NVIDIA GPU support: ✓");
    #[cfg(not(feature = "gpu"))]
    println!("  - NVIDIA GPU support: ✗");

    Ok(())
}

fn print_system_info(info: &StaticSystemInfo) {
    println!("System Details:");
    println!("  Hostname: {}", info.hostname);
    println!("  OS: {} {}", info.platform, info.platform_release);
    println!("  Kernel: {}", info.platform_version);
    println!("  Uptime: {} seconds", info.uptime);
    println!();

    println!("Hardware:");
    println!("  CPU: {} ({} cores, {} MHz)", info.processor, info.cpu.cores, info.cpu.frequency);
    println!("  Architecture: {}", info.architecture);
    println!("  Memory: {} total", format_bytes(info.memory.total));
    println!("  Swap: {} total", format_bytes(info.memory.total_swap));
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn print_pretty_snapshot(snapshot: &MetricsSnapshot) {
    println!(
        "System Snapshot ({})",
        chrono::DateTime::from_timestamp_millis(snapshot.timestamp as i64)
            .unwrap_or_default()
            .format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("==========================================");
    println!();

    // CPU info
    println!("CPU:");
    println!("  Model: {}", snapshot.cpu.model);
    println!("  Cores: {}", snapshot.cpu.cores);
    println!("  Usage: {:.1}%", snapshot.cpu.usage);
    println!("  Frequency: {} MHz", snapshot.cpu.speed);
    let [one, five, fifteen] = snapshot.cpu.load_average;
    println!("  Load: {:.2}, {:.2}, {:.2}", one, five, fifteen);
    println!();

    // Memory info
    println!("Memory:");
    println!("  Total: {}", format_bytes(snapshot.memory.total));
    println!("  Used: {}", format_bytes(snapshot.memory.used));
    println!("  Usage: {:.1}%", snapshot.memory.percentage);
    println!("  Swap: {} used", format_bytes(snapshot.memory.swap_used));
    println!();

    // Temperature info
    if !snapshot.temperatures.sensors.is_empty() {
        println!("Temperature:");
        println!("  CPU: {:.1}°C", snapshot.temperatures.cpu);
        println!("  Max: {:.1}°C", snapshot.temperatures.max);
        println!();
    }

    // Storage info
    if !snapshot.disk.drives.is_empty() {
        println!("Storage:");
        for drive in &snapshot.disk.drives {
            println!(
                "  {}: {} total, {:.1}% used",
                drive.mountpoint,
                format_bytes(drive.total),
                drive.use_percent
            );
        }
        println!();
    }

    // Network info
    if !snapshot.network.interfaces.is_empty() {
        println!("Network:");
        for iface in &snapshot.network.interfaces {
            println!(
                "  {}: {}",
                iface.name,
                if iface.is_up { "UP" } else { "DOWN" }
            );
        }
        println!();
    }

    // GPU info
    for gpu in &snapshot.gpu.controllers {
        println!("GPU {}: {} {}", gpu.index, gpu.vendor, gpu.model);
        println!(
            "  Usage: {}%  VRAM: {:.1}%  Temp: {}°C",
            gpu.usage, gpu.vram_percentage, gpu.temperature
        );
    }
    if !snapshot.gpu.controllers.is_empty() {
        println!();
    }

    // Process info
    println!("Processes:");
    println!(
        "  Total: {} (running {}, sleeping {}, zombie {})",
        snapshot.processes.total,
        snapshot.processes.running,
        snapshot.processes.sleeping,
        snapshot.processes.zombie
    );
    for process in snapshot.processes.top_by_cpu.iter().take(5) {
        println!("  {:>7} {:<20} {:.1}%", process.pid, process.name, process.cpu);
    }

    if !snapshot.degraded.is_empty() {
        println!();
        let names: Vec<_> = snapshot.degraded.iter().map(|c| c.as_str()).collect();
        println!("Unavailable: {}", names.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "servwatch-agent",
            "--server",
            "http://collector:3001",
            "-i",
            "edge-01",
            "--no-gpu",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.server_url.as_deref(), Some("http://collector:3001"));
        assert_eq!(overrides.agent_id.as_deref(), Some("edge-01"));
        assert_eq!(overrides.enable_gpu, Some(false));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_default_values() {
        let cli = Cli::try_parse_from(["servwatch-agent"]).unwrap();
        let overrides = cli.overrides();
        assert!(overrides.server_url.is_none());
        assert!(overrides.enable_gpu.is_none());
        assert!(overrides.log_level.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_snapshot_subcommand() {
        let cli = Cli::try_parse_from(["servwatch-agent", "--debug", "snapshot", "--format", "json"]).unwrap();
        assert_eq!(cli.overrides().log_level.as_deref(), Some("DEBUG"));
        match cli.command {
            Some(Commands::Snapshot(args)) => assert!(args.format == OutputFormat::Json),
            _ => panic!("expected snapshot subcommand"),
        }

        assert!(Cli::try_parse_from(["servwatch-agent", "snapshot", "--format", "yaml"]).is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(8 * 1024 * 1024 * 1024), "8.0 GB");
    }
}
