#![forbid(unsafe_code)]

//! `agent-proxy`: session lifecycle daemon.
//!
//! Loads configuration, opens the session database, and runs the fleet
//! reconciliation loop until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_proxy::app::AppState;
use agent_proxy::config::GlobalConfig;
use agent_proxy::orchestrator::reconciler;
use agent_proxy::persistence::db;
use agent_proxy::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-proxy", about = "Agent session lifecycle daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-proxy bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    info!("configuration loaded");

    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    let state = AppState::new(Arc::clone(&config), db)?;

    let ct = CancellationToken::new();
    let reconciler_handle = if config.monitor.enabled {
        let handle = reconciler::spawn_reconciler(
            Arc::new(state.monitor_all()),
            config.monitor_interval(),
            ct.clone(),
        );
        info!(
            interval_seconds = config.monitor.interval_seconds,
            "reconciler started"
        );
        Some(handle)
    } else {
        info!("reconciler disabled");
        None
    };

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Some(handle) = reconciler_handle {
        if let Err(err) = handle.await {
            error!(%err, "reconciler task ended abnormally");
        }
    }
    state.db.close().await;
    info!("agent-proxy shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
