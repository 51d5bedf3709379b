use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    let store_healthy = state.coordinator.store_healthy().await;
    let breaker = state.coordinator.breaker().state().await;
    let round = state.coordinator.current_round().await.ok().flatten();

    Json(json!({
        "status": if store_healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {
            "store": if store_healthy { "healthy" } else { "unhealthy" },
            "circuit_breaker": format!("{:?}", breaker).to_lowercase(),
            "games_frozen": state.config.engine.games_frozen,
        },
        "round": round.map(|r| json!({
            "round_id": r.round_id,
            "status": r.status,
        })),
    }))
}
