// ============================================================================
// SECTION 18: CLI & MAIN ENTRY POINT
// ============================================================================
// Command-line interface for the telemetry service:
// - `run` (default) starts the poller, retention sweeps and the HTTP surface
// - `validate`, `generate-config` and `version` exit without starting anything
// - SIGHUP reloads the configuration file in place
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use isley_telemetry::cache::QueryCache;
use isley_telemetry::chart::ChartQueryService;
use isley_telemetry::config::{ConfigManager, ConfigSource, TelemetryConfig};
use isley_telemetry::gateway::{GatewayClient, HttpGatewayClient};
use isley_telemetry::grouping::GroupedCache;
use isley_telemetry::logging::init_logging;
use isley_telemetry::poller::Poller;
use isley_telemetry::readings::ReadingStore;
use isley_telemetry::registry::SensorRegistry;
use isley_telemetry::retention::RetentionJob;
use isley_telemetry::server::{self, AppState};
use isley_telemetry::storage::{MemoryStorage, TelemetryStorage};
use isley_telemetry::{TELEMETRY_NAME, TELEMETRY_VERSION};

// ----------------------------------------------------------------------------
// 18.1 CLI Argument Parser
// ----------------------------------------------------------------------------

/// Isley telemetry CLI
#[derive(Parser, Debug)]
#[command(
    name = "isley-telemetry",
    author = "Isley Team",
    version,
    about = "Sensor gateway poller and chart query service for Isley",
    long_about = "Polls AC Infinity and EcoWitt gateways on a fixed cadence, records \
                  every reading against its sensor and serves downsampled, cached \
                  chart data over HTTP."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "isley.toml", env = "ISLEY_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "ISLEY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "ISLEY_DEBUG")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start polling and serving (default)
    Run,

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

// ----------------------------------------------------------------------------
// 18.2 Command Handlers
// ----------------------------------------------------------------------------

fn handle_validate(config_path: &Path, verbose: bool) -> AnyhowResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    let config = TelemetryConfig::load(config_path)
        .with_context(|| format!("Invalid configuration at {}", config_path.display()))?;
    println!("✅ Configuration is valid!");

    if verbose {
        println!("\n📋 Parsed configuration:");
        println!("{}", "=".repeat(60));
        match toml::to_string_pretty(&config) {
            Ok(s) => println!("{}", s),
            Err(e) => println!("Failed to serialize: {}", e),
        }
    }

    println!("\n📊 Configuration Summary:");
    println!("  • Polling interval: {}s", config.polling.interval_secs);
    println!("  • Chart cache TTL: {:?}", config.cache_ttl());
    println!("  • Retention: {} days", config.retention.days);
    println!("  • Zones defined: {}", config.zones.len());
    println!("  • Gateways active:");
    if config.ac_infinity_active() {
        println!("    - AC Infinity");
    }
    if config.ecowitt_active() {
        println!("    - EcoWitt ({} consoles)", config.gateways.ecowitt.devices.len());
    }
    println!("  • HTTP bind: {}", config.server.bind);
    println!(
        "  • Push ingest: {}",
        if config.ingest.enabled { "enabled" } else { "disabled" }
    );

    Ok(())
}

fn handle_generate_config(output: Option<&Path>) -> AnyhowResult<()> {
    let rendered = TelemetryConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

fn handle_version() {
    println!("🌱 {} v{}", TELEMETRY_NAME, TELEMETRY_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!();
    println!("Gateways:");
    println!("  • AC Infinity (cloud)");
    println!("  • EcoWitt (LAN)");
}

fn load_config(path: &Path) -> AnyhowResult<ConfigManager> {
    if path.exists() {
        return ConfigManager::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let config = TelemetryConfig::from_env().context("Invalid environment configuration")?;
    Ok(ConfigManager::new(config).with_path(path))
}

// ----------------------------------------------------------------------------
// 18.3 Signals
// ----------------------------------------------------------------------------

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "isley::main", error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(target: "isley::main", error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(target: "isley::main", "Received SIGINT"),
        _ = terminate => info!(target: "isley::main", "Received SIGTERM"),
    }
}

/// Reload the configuration file on every SIGHUP until shutdown.
#[cfg(unix)]
async fn reload_on_sighup(config: Arc<ConfigManager>, mut shutdown: watch::Receiver<bool>) {
    let mut sighup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(target: "isley::main", error = %e, "SIGHUP reload unavailable");
            return;
        }
    };

    loop {
        tokio::select! {
            received = sighup.recv() => {
                if received.is_none() {
                    break;
                }
                match config.reload() {
                    Ok(()) => info!(
                        target: "isley::main",
                        interval_secs = config.snapshot().polling.interval_secs,
                        "Configuration reloaded"
                    ),
                    Err(e) => warn!(target: "isley::main", error = %e, "Configuration reload failed, keeping previous"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// 18.4 Service Wiring
// ----------------------------------------------------------------------------

async fn run(config: Arc<ConfigManager>) -> AnyhowResult<()> {
    let snapshot = config.snapshot();
    let source: Arc<dyn ConfigSource> = config.clone();

    let storage: Arc<dyn TelemetryStorage> = Arc::new(MemoryStorage::new());
    let client: Arc<dyn GatewayClient> = Arc::new(
        HttpGatewayClient::new(snapshot.polling.http_timeout).context("Failed to build HTTP client")?,
    );
    let registry = Arc::new(SensorRegistry::new(storage.clone()));
    let store = ReadingStore::new(storage.clone());
    let cache = Arc::new(QueryCache::new(source.clone()));
    let chart = Arc::new(ChartQueryService::new(store.clone(), cache));

    let poller = Poller::new(source.clone(), client.clone(), registry.clone(), store.clone());
    let state = AppState {
        config: source.clone(),
        chart,
        grouped: Arc::new(GroupedCache::new(source.clone())),
        registry,
        store,
        storage: storage.clone(),
        client,
        poller_stats: poller.stats(),
        started_at: Instant::now(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_handle = poller.spawn(shutdown_rx.clone());
    let retention_handle = RetentionJob::new(storage, source).spawn(shutdown_rx.clone());

    #[cfg(unix)]
    let reload_handle = tokio::spawn(reload_on_sighup(config.clone(), shutdown_rx));

    info!(
        target: "isley::main",
        interval_secs = snapshot.polling.interval_secs,
        bind = %snapshot.server.bind,
        "Telemetry service started"
    );

    let served = server::serve(state, &snapshot.server.bind, shutdown_signal()).await;

    info!(target: "isley::main", "Starting graceful shutdown");
    let _ = shutdown_tx.send(true);
    if let Err(e) = poller_handle.await {
        warn!(target: "isley::main", error = %e, "Poller task ended abnormally");
    }
    if let Err(e) = retention_handle.await {
        warn!(target: "isley::main", error = %e, "Retention task ended abnormally");
    }
    #[cfg(unix)]
    let _ = reload_handle.await;

    served.context("HTTP server failed")?;
    info!(target: "isley::main", "Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need a running service
    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => {
            return handle_generate_config(output.as_deref());
        }
        Some(Commands::Validate { verbose }) => {
            return handle_validate(&cli.config, *verbose);
        }
        Some(Commands::Run) | None => {}
    }

    let config = Arc::new(load_config(&cli.config)?);

    let mut logging_config = config.snapshot().logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config)?;

    info!("🌱 {} v{}", TELEMETRY_NAME, TELEMETRY_VERSION);
    if !cli.config.exists() {
        warn!(target: "isley::main", path = %cli.config.display(), "Config file not found, using defaults and environment");
    }

    run(config).await
}
