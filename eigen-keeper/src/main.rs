//! Eigen Keeper - autonomous market-making keeper for on-chain token pools.
//!
//! This is the main entry point for the keeper service, which drives a
//! fleet of eigens (per-token trading agents) through periodic trade cycles.
//!
//! # Usage
//!
//! ```bash
//! # Run against one chain
//! eigen-keeper --rpc-urls https://testnet-rpc.monad.xyz
//!
//! # Everything is also settable through the environment
//! KEEPER_PRIVATE_KEY=0x... POLL_INTERVAL=15000 eigen-keeper
//!
//! # Dry run (decisions logged, no transactions)
//! eigen-keeper --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod alerts;
mod config;
mod contracts;
mod error;
mod execution;
mod oracle;
mod process;
mod reactive;
mod recovery;
mod scheduler;
mod wallets;

use config::{Args, Settings};
use keeper_store::Store;
use scheduler::KeeperService;

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments / environment
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dry_run = args.dry_run,
        "Starting Eigen Keeper"
    );

    // Startup validation is the only fatal path (exit code 1)
    let settings = match Settings::from_args(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Startup validation failed");
            std::process::exit(1);
        }
    };

    // Open the local store
    let store = Store::open(&settings.db_path)
        .await
        .context("Failed to open local store")?;

    // Wire the service
    let service = KeeperService::new(settings, store)
        .await
        .context("Failed to initialize keeper service")?;

    // Set up graceful shutdown
    let shutdown = setup_shutdown_handler();

    // Run until shutdown
    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                error!(error = %e, "Service error");
                return Err(e.into());
            }
        }
        () = shutdown => {
            info!("Shutdown signal received");
        }
    }

    info!("Eigen Keeper stopped");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// INITIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Initialize the tracing subscriber for logging.
fn init_logging(level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to init logging: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to init logging: {e}"))?;
    }

    Ok(())
}

/// Set up graceful shutdown handler for SIGINT/SIGTERM.
async fn setup_shutdown_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
