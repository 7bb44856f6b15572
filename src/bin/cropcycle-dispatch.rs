//! # CropCycle Dispatcher
//!
//! Runs due crop tasks against the Postgres store. Invoke it periodically (cron,
//! systemd timer) or pass `--watch` to keep polling.

use anyhow::Context;
use clap::Parser;
use cropcycle_core::config::ConfigManager;
use cropcycle_core::logging::init_structured_logging;
use cropcycle_core::services::{NoopSeedInventory, TracingNotifier};
use cropcycle_core::CropCycleCore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cropcycle-dispatch")]
#[command(about = "Execute due crop lifecycle tasks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: $CROPCYCLE_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment overlay to load (default: $CROPCYCLE_ENV, $APP_ENV or development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Maximum due tasks per run (default: dispatcher.batch_limit)
    #[arg(short, long)]
    limit: Option<i64>,

    /// Apply database migrations before dispatching
    #[arg(long)]
    migrate: bool,

    /// Keep running, dispatching every N seconds
    #[arg(long, value_name = "SECONDS")]
    watch: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = match cli.environment {
        Some(environment) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir, &environment)
        }
        None => ConfigManager::load_from_directory(cli.config_dir),
    }
    .context("failed to load configuration")?;

    init_structured_logging(&config_manager.config().logging);

    let limit = cli
        .limit
        .unwrap_or(config_manager.config().dispatcher.batch_limit);
    let core = CropCycleCore::from_config(
        config_manager.clone(),
        Arc::new(TracingNotifier),
        Arc::new(NoopSeedInventory),
    )
    .await
    .context("failed to initialize crop lifecycle core")?;

    if cli.migrate {
        core.store
            .migrate()
            .await
            .context("failed to apply migrations")?;
    }

    let Some(interval_secs) = cli.watch else {
        let summary = core.dispatcher.process_due_tasks(limit).await?;
        info!(?summary, "Dispatch finished");
        return Ok(());
    };

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = core.dispatcher.process_due_tasks(limit).await {
                    error!(error = %err, "Dispatch run failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                return Ok(());
            }
        }
    }
}
