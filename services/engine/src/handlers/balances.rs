use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use shared::{Amount, Asset, UserId};

use crate::{
    errors::{EngineError, EngineResult},
    extractors::UserIdentity,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct BalanceEntry {
    pub asset: Asset,
    pub balance: Amount,
}

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub user_id: UserId,
    pub balances: Vec<BalanceEntry>,
}

/// Balances are only visible to their owner
pub async fn get_balances(
    State(state): State<AppState>,
    UserIdentity(caller): UserIdentity,
    Path(user_id): Path<UserId>,
) -> EngineResult<Json<BalancesResponse>> {
    if caller != user_id {
        return Err(EngineError::MissingUser);
    }
    let mut balances = Vec::with_capacity(Asset::ALL.len());
    for asset in Asset::ALL {
        balances.push(BalanceEntry {
            asset,
            balance: state.coordinator.balance(user_id, asset).await?,
        });
    }
    Ok(Json(BalancesResponse { user_id, balances }))
}
