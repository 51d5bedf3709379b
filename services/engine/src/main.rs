use engine::{
    config::Config,
    driver::RoundDriver,
    fairness::OsSeedSource,
    notifier::BroadcastNotifier,
    settlement::SettlementCoordinator,
    state::AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    engine::init_logging("engine-api", "engine=info,engine_api=info,tower_http=info");

    let config = Config::load()?;
    tracing::info!(
        store = ?config.store.backend,
        driver_embedded = config.driver.embedded,
        games_frozen = config.engine.games_frozen,
        "Configuration loaded"
    );

    let store = engine::open_store(&config.store).await?;
    let notifier = Arc::new(BroadcastNotifier::new(1024));
    let coordinator = Arc::new(
        SettlementCoordinator::new(store, &config.engine)
            .with_seed_source(Box::new(OsSeedSource))
            .with_notifier(notifier),
    );

    // Start metrics server
    let metrics_handle = tokio::spawn(engine::start_metrics_server(config.metrics_port));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_handle = if config.driver.embedded {
        let driver = RoundDriver::new(coordinator.clone(), config.driver);
        tracing::info!("Round driver running embedded");
        Some(tokio::spawn(async move { driver.run(shutdown_rx).await }))
    } else {
        None
    };

    let app = engine::build_router(AppState::new(config.clone(), coordinator));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("Engine API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = driver_handle {
        handle.await?;
    }
    metrics_handle.abort();

    tracing::info!("Engine API stopped");
    Ok(())
}
