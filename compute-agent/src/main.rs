//! compute-agent - decentralized compute marketplace worker
//!
//! Entry point: parses CLI arguments, loads configuration, builds the [`AgentService`], and
//! runs it until a shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config
//! compute-agent --config config.toml
//!
//! # Run with specific log level
//! compute-agent --config config.toml --log-level debug
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod collaborators;
mod config;
mod error;
mod service;

use config::Settings;
use service::AgentService;

// ═══════════════════════════════════════════════════════════════════════════════
// CLI ARGUMENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// compute-agent - decentralized compute marketplace worker
#[derive(Parser, Debug)]
#[command(name = "compute-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "COMPUTE_AGENT_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "COMPUTE_AGENT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "COMPUTE_AGENT_JSON_LOGS")]
    json_logs: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "starting compute-agent"
    );

    let settings = Settings::load(args.config.as_deref())
        .with_context(|| format!("failed to load config from {:?}", args.config))?;

    info!(
        router = %settings.chain.router_address,
        coordinator = %settings.chain.coordinator_address,
        containers = settings.containers.len(),
        "configuration loaded"
    );

    let containers = settings
        .containers
        .iter()
        .map(|decl| (decl.id.clone(), agent_core::ContainerMetadata::from(decl)))
        .collect();

    let service = AgentService::build(settings).await.context("failed to initialize compute-agent")?;

    service.run(&containers).await.context("failed to start compute-agent")?;

    let shutdown = setup_shutdown_handler();
    shutdown.await;

    service.stop().await;

    info!("compute-agent stopped");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// INITIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Initialize the tracing subscriber for logging.
fn init_logging(level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    }

    Ok(())
}

/// Wait for SIGINT/SIGTERM, logging which one triggered shutdown.
async fn setup_shutdown_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            warn!("received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            warn!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
