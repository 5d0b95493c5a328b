//! Relay Daemon - runs the Promotion controller
//!
//! Loads Stage, Freight, Promotion and Credentials manifests into memory and
//! reconciles Promotions until interrupted.

use clap::Parser;
use relay_controller::{Manager, PromotionReconcilerBuilder};
use relay_daemon::{apply_manifests, read_manifests, telemetry, DaemonConfig, DaemonResult};
use relay_engine::{InMemoryCredentialsDatabase, StepRunnerRegistry};
use relay_store::InMemoryObjectStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Relay Daemon CLI
#[derive(Parser)]
#[command(name = "relayd")]
#[command(about = "Relay Daemon - Promotion lifecycle controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<String>,

    /// Log level, overrides the configuration file
    #[arg(long, env = "RELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "RELAY_LOG_JSON")]
    json: bool,

    /// Shard this controller is responsible for
    #[arg(long, env = "RELAY_SHARD")]
    shard: Option<String>,

    /// Directory for per-Promotion workspaces
    #[arg(long, env = "RELAY_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Manifest files or directories to load at startup
    #[arg(value_name = "MANIFEST")]
    manifests: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run(Cli::parse()).await?;
    Ok(())
}

async fn run(cli: Cli) -> DaemonResult<()> {
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    if cli.shard.is_some() {
        config.controller.shard_name = cli.shard;
    }
    if let Some(root) = cli.workspace_root {
        config.controller.workspace_root = root;
    }

    telemetry::init(&config.logging);

    let store = Arc::new(InMemoryObjectStore::new());
    let credentials = Arc::new(InMemoryCredentialsDatabase::new(config.credentials.clone()));
    for path in &cli.manifests {
        let manifests = read_manifests(path)?;
        apply_manifests(&store, &credentials, manifests)?;
    }

    let registry = Arc::new(StepRunnerRegistry::with_builtins());
    tracing::info!(
        controller = %config.controller.name(),
        step_kinds = ?registry.kinds(),
        credentials = credentials.len(),
        workspace_root = %config.controller.workspace_root.display(),
        "starting Relay daemon"
    );

    let reconciler = PromotionReconcilerBuilder::new()
        .with_store(store)
        .with_step_runners(registry)
        .with_credentials(credentials)
        .with_config(config.controller)
        .build()?;

    Manager::new(reconciler).run(shutdown_signal()).await?;

    tracing::info!("Relay daemon stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
