// Library interface for the engine - exposes modules for the binaries and tests

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod domain;
pub mod driver;
pub mod errors;
pub mod extractors;
pub mod fairness;
pub mod games;
pub mod handlers;
pub mod ledger;
pub mod notifier;
pub mod rate_limit;
pub mod repository;
pub mod retry;
pub mod settlement;
pub mod state;
pub mod validator;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use config::{StoreBackend, StoreConfig};
use repository::{MemoryStore, RedisStore, Store};
use state::AppState;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
        // Wagers
        .route("/api/bets", post(handlers::bets::place_bet))
        .route("/api/bets/:bet_id", get(handlers::bets::get_bet))
        .route("/api/cashout", post(handlers::bets::cashout))
        .route("/api/chicken/:session_id", get(handlers::chicken::get_session))
        .route("/api/chicken/:session_id/step", post(handlers::chicken::step))
        .route("/api/chicken/:session_id/reveal", get(handlers::chicken::reveal_session))
        // Rounds
        .route("/api/rounds/current", get(handlers::rounds::current_round))
        .route("/api/rounds/:round_id/reveal", get(handlers::rounds::reveal_round))
        // Balances
        .route("/api/balances/:user_id", get(handlers::balances::get_balances))
        // Operator endpoints
        .route(
            "/api/admin/games",
            get(handlers::admin::list_games).post(handlers::admin::upsert_game),
        )
        .route("/api/admin/deposits", post(handlers::admin::deposit))
        .route("/api/admin/withdrawals", post(handlers::admin::withdraw))
        // Metrics
        .route("/metrics", get(handlers::metrics::metrics_handler))
        // State
        .with_state(state)
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Open the configured store backend
pub async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url)
                .await
                .with_context(|| format!("failed to connect to redis at {}", config.redis_url))?;
            tracing::info!("Redis connected");
            Ok(Arc::new(store))
        }
    }
}

/// Structured logging for every binary: `LOG_FORMAT=json` for production,
/// human-readable otherwise
pub fn init_logging(service: &'static str, default_filter: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "text".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service,
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting {}",
        service
    );
}

/// Prometheus exporter on its own port
pub async fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let app = Router::new().route("/metrics", get(|| async move { handle.render() }));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
