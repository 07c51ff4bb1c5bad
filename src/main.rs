//! Main entry point for the loyalty screener service
//!
//! Runs screening passes on a fixed interval until interrupted.
//! Pass `--once` to run a single pass and exit.

use anyhow::{bail, Result};
use loyalty_screener::screener::{
    ScreenerBuilder, ScreenerConfig, ScreeningScheduler, ScreeningStorage, SqliteScreeningStorage,
    TonApiLedger,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config = ScreenerConfig::from_env()?;
    info!(
        "Starting loyalty screener (database: {}, indexer: {})",
        config.database_url, config.tonapi_base_url
    );

    let storage = SqliteScreeningStorage::new(&config.database_url).await?;
    if !storage.health_check().await? {
        bail!("Screener database at {} is not responding", config.database_url);
    }
    let ledger = Arc::new(TonApiLedger::new(&config)?);
    let interval_seconds = config.screen_interval_seconds;

    let pipeline = Arc::new(ScreenerBuilder::from_config(config).build(storage, ledger));

    if run_once {
        let report = pipeline.screen().await?;
        info!(
            "Single pass finished: {} coins, {} collections, {} wallets, {} users in {}ms",
            report.coins_scanned,
            report.collections_scanned,
            report.wallets_persisted,
            report.users_updated,
            report.duration_ms
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = ScreeningScheduler::new(pipeline, interval_seconds);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    let _ = shutdown_tx.send(true);

    let passes = scheduler_handle.await?;
    info!("Loyalty screener stopped after {} passes", passes);

    Ok(())
}
