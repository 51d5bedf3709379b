use anyhow::Result;
use engine::{driver::RoundDriver, fairness::OsSeedSource, settlement::SettlementCoordinator};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    engine::init_logging("round-driver", "round_driver=info,engine=info");

    let config = Config::load()?;
    info!(
        betting_window_ms = config.driver.betting_window_ms,
        tick_ms = config.driver.tick_ms,
        round_timeout_ms = config.driver.round_timeout_ms,
        "Configuration loaded"
    );

    let store = engine::open_store(&config.store).await?;
    let coordinator = Arc::new(
        SettlementCoordinator::new(store, &config.engine).with_seed_source(Box::new(OsSeedSource)),
    );

    // Start metrics server
    let metrics_handle = tokio::spawn(engine::start_metrics_server(config.metrics_port));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = RoundDriver::new(coordinator, config.driver);
    let driver_handle = tokio::spawn(async move { driver.run(shutdown_rx).await });

    info!("Round driver running");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    let _ = shutdown_tx.send(true);
    driver_handle.await?;
    metrics_handle.abort();

    info!("Round driver stopped");
    Ok(())
}
