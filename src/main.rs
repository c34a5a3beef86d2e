use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pnodewatch::config::IngestorConfig;
use pnodewatch::credits::CreditsClient;
use pnodewatch::rpc::PodRpcClient;
use pnodewatch::scheduler::Scheduler;
use pnodewatch::store::Store;

#[derive(Debug, Parser)]
#[command(name = "pnodewatchd", about = "pNode network ingestion daemon")]
struct Cli {
    /// Path to a TOML configuration file. Tunables not present in the file
    /// fall back to built-in defaults; DATABASE_URL and HEALTH_CHECK_PORT
    /// always come from the environment when set.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "service terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config.as_deref() {
        Some(path) => IngestorConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => IngestorConfig::from_env().context("failed to build configuration")?,
    };

    let store = Store::connect(config.database_url(), config.store_pool_size)
        .await
        .context("failed to connect to the store")?;
    let rpc = PodRpcClient::new(config.rpc_timeout());
    let credits = CreditsClient::new(config.credits_url.clone(), config.credits_timeout());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let scheduler = Scheduler::new(store, rpc, credits, Arc::new(config));
    scheduler
        .run(shutdown_rx)
        .await
        .context("scheduler terminated with error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
