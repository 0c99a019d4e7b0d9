//! # Fleetd - Nodefleet Daemon
//!
//! Keeps every configured node registered, in session, and pinging.
//!
//! ## Architecture
//! ```text
//! id.txt / proxy.txt / user.txt
//!              ↓
//!      FleetSupervisor ──→ NodeLifecycle × N ──→ Remote node API
//!              ↑                  │
//!              └── fatal failure ─┘
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fleetd::config::{AppConfig, ConfigOverrides, parse_env_flag};
use fleetd::lifecycle::NodeDeps;
use fleetd::presenter::TracingPresenter;
use fleetd::sources::{FileCredentialSource, FileIdentitySource, FileProxySource};
use fleetd::supervisor::FleetSupervisor;
use fleetd::transport::HttpTransport;

/// Nodefleet daemon - keeps a fleet of nodes alive against the session API
#[derive(Parser, Debug)]
#[command(name = "fleetd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/fleetd.toml")]
    config: String,

    /// Route each node through its own proxy; only "true" enables it (overrides config)
    #[arg(long, env = "USE_PROXY", value_parser = parse_env_flag)]
    use_proxy: Option<bool>,

    /// Show the startup banner on launch; only "true" enables it
    #[arg(
        long,
        env = "INITIALRUN",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = parse_env_flag
    )]
    initial_run: bool,

    /// File with one nodeId:hardwareId pair per line (overrides config)
    #[arg(long, env = "ID_PATH")]
    id_path: Option<String>,

    /// File with one proxy URL per line (overrides config)
    #[arg(long, env = "PROXY_PATH")]
    proxy_path: Option<String>,

    /// File holding the bearer token (overrides config)
    #[arg(long, env = "USER_PATH")]
    user_path: Option<String>,

    /// Node API base URL (overrides config)
    #[arg(long, env = "API_BASE_URL")]
    api_base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_base_url: self.api_base_url.clone(),
            use_proxy: self.use_proxy,
            id_path: self.id_path.clone(),
            proxy_path: self.proxy_path.clone(),
            user_path: self.user_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; everything has a default
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting fleetd v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config, &args.overrides())?;
    info!(
        api = %config.api_base_url,
        use_proxy = config.use_proxy,
        heartbeat_secs = config.heartbeat_interval_secs,
        "📋 Configuration loaded"
    );

    let transport = HttpTransport::new(
        config.api_base_url.clone(),
        config.ip_service_url.clone(),
        config.request_timeout(),
    )
    .context("Failed to build HTTP transport")?;

    let deps = NodeDeps {
        transport: Arc::new(transport),
        credentials: Arc::new(FileCredentialSource::new(&config.sources.user_path)),
        presenter: Arc::new(TracingPresenter),
    };

    let supervisor = FleetSupervisor::new(
        Arc::new(FileIdentitySource::new(&config.sources.id_path)),
        Arc::new(FileProxySource::new(&config.sources.proxy_path)),
        deps,
        config.lifecycle_settings(),
        config.restart_mode,
    );

    // Handle graceful shutdown
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("🛑 Shutdown signal received");
        signal.cancel();
    });

    supervisor
        .run(config.fleet_config(args.initial_run), shutdown)
        .await
        .context("Fleet could not start")?;

    info!("👋 fleetd shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}
