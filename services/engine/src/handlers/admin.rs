use axum::{extract::State, Json};
use serde::Deserialize;
use shared::{Amount, Asset, UserId};

use crate::{
    domain::GameSettings,
    errors::{EngineError, EngineResult},
    extractors::{AdminAccess, ValidatedJson},
    ledger::JournalEntry,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct FundsBody {
    pub user_id: UserId,
    pub asset: Asset,
    pub amount: Amount,
    /// External reference (transaction hash, payment id)
    pub reference: String,
}

pub async fn list_games(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> EngineResult<Json<Vec<GameSettings>>> {
    Ok(Json(state.coordinator.catalog().all().await?))
}

pub async fn upsert_game(
    State(state): State<AppState>,
    _admin: AdminAccess,
    ValidatedJson(settings): ValidatedJson<GameSettings>,
) -> EngineResult<Json<GameSettings>> {
    Ok(Json(state.coordinator.catalog().upsert(settings).await?))
}

pub async fn deposit(
    State(state): State<AppState>,
    _admin: AdminAccess,
    ValidatedJson(body): ValidatedJson<FundsBody>,
) -> EngineResult<Json<JournalEntry>> {
    if body.amount.is_zero() {
        return Err(EngineError::InvalidRequest("amount must be positive".to_string()));
    }
    let entry = state
        .coordinator
        .ledger()
        .deposit(body.user_id, body.asset, body.amount, &body.reference)
        .await?
        .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("deposit produced no journal entry")))?;
    tracing::info!(
        user_id = %body.user_id,
        asset = %body.asset,
        amount = %body.amount,
        reference = %entry.reference,
        "Deposit credited"
    );
    metrics::counter!("deposits_total", "asset" => body.asset.as_str()).increment(1);
    Ok(Json(entry))
}

pub async fn withdraw(
    State(state): State<AppState>,
    _admin: AdminAccess,
    ValidatedJson(body): ValidatedJson<FundsBody>,
) -> EngineResult<Json<JournalEntry>> {
    let entry = state
        .coordinator
        .ledger()
        .withdraw(body.user_id, body.asset, body.amount, &body.reference)
        .await?;
    tracing::info!(
        user_id = %body.user_id,
        asset = %body.asset,
        amount = %body.amount,
        reference = %entry.reference,
        "Withdrawal debited"
    );
    metrics::counter!("withdrawals_total", "asset" => body.asset.as_str()).increment(1);
    Ok(Json(entry))
}
