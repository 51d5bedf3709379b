use axum::{
    extract::{Path, State},
    Json,
};
use shared::RoundId;

use crate::{
    domain::{RoundReveal, RoundView},
    errors::{EngineError, EngineResult},
    state::AppState,
};

pub async fn current_round(State(state): State<AppState>) -> EngineResult<Json<RoundView>> {
    state
        .coordinator
        .current_round()
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::GameNotFound("current round".to_string()))
}

pub async fn reveal_round(
    State(state): State<AppState>,
    Path(round_id): Path<RoundId>,
) -> EngineResult<Json<RoundReveal>> {
    let reveal = state.coordinator.reveal_round(round_id).await?;
    tracing::debug!(round_id = %round_id, crash_point = %reveal.crash_point, "Round revealed");
    Ok(Json(reveal))
}
