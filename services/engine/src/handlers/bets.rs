use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::Instrument;
use shared::{Amount, BetId, GameKind, Multiplier};

use crate::{
    domain::{CashoutReceipt, CashoutTarget, CrashBet, PlaceBetReceipt, PlaceBetRequest},
    errors::EngineResult,
    extractors::{UserIdentity, ValidatedJson},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PlaceBetBody {
    pub game: GameKind,
    /// Minor units (1 BX = 1_000_000)
    pub stake: Amount,
    pub client_seed: String,
    #[serde(default)]
    pub auto_cashout: Option<Multiplier>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CashoutBody {
    #[serde(flatten)]
    pub target: CashoutTarget,
    #[serde(default)]
    pub request_id: Option<String>,
}

pub async fn place_bet(
    State(state): State<AppState>,
    UserIdentity(user): UserIdentity,
    ValidatedJson(body): ValidatedJson<PlaceBetBody>,
) -> EngineResult<Json<PlaceBetReceipt>> {
    let span = tracing::info_span!(
        "place_bet",
        user_id = %user,
        game = %body.game,
        stake = %body.stake
    );
    let receipt = state
        .coordinator
        .place_bet(PlaceBetRequest {
            user_id: user,
            game: body.game,
            stake: body.stake,
            client_seed: body.client_seed,
            auto_cashout: body.auto_cashout,
            request_id: body.request_id,
        })
        .instrument(span)
        .await?;
    Ok(Json(receipt))
}

pub async fn get_bet(
    State(state): State<AppState>,
    UserIdentity(user): UserIdentity,
    Path(bet_id): Path<BetId>,
) -> EngineResult<Json<CrashBet>> {
    let bet = state.coordinator.crash_bet(user, bet_id).await?;
    tracing::debug!(bet_id = %bet_id, status = ?bet.status, "Bet retrieved");
    Ok(Json(bet))
}

pub async fn cashout(
    State(state): State<AppState>,
    UserIdentity(user): UserIdentity,
    ValidatedJson(body): ValidatedJson<CashoutBody>,
) -> EngineResult<Json<CashoutReceipt>> {
    let span = tracing::info_span!("cashout", user_id = %user, target = ?body.target);
    let receipt = state
        .coordinator
        .cashout(user, body.target, body.request_id.as_deref())
        .instrument(span)
        .await?;
    Ok(Json(receipt))
}
