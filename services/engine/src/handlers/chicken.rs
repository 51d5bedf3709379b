use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::Instrument;
use shared::SessionId;

use crate::{
    domain::{ChickenSession, SessionReveal, StepOutcome},
    errors::EngineResult,
    extractors::{OptionalJson, UserIdentity},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct StepBody {
    #[serde(default)]
    pub request_id: Option<String>,
}

pub async fn step(
    State(state): State<AppState>,
    UserIdentity(user): UserIdentity,
    Path(session_id): Path<SessionId>,
    OptionalJson(body): OptionalJson<StepBody>,
) -> EngineResult<Json<StepOutcome>> {
    let span = tracing::info_span!("chicken_step", user_id = %user, session_id = %session_id);
    let outcome = state
        .coordinator
        .step(user, session_id, body.request_id.as_deref())
        .instrument(span)
        .await?;
    Ok(Json(outcome))
}

pub async fn get_session(
    State(state): State<AppState>,
    UserIdentity(user): UserIdentity,
    Path(session_id): Path<SessionId>,
) -> EngineResult<Json<ChickenSession>> {
    Ok(Json(state.coordinator.session(user, session_id).await?))
}

pub async fn reveal_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> EngineResult<Json<SessionReveal>> {
    Ok(Json(state.coordinator.reveal_session(session_id).await?))
}
