use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::{
    errors::{ErrorCategory, ErrorCode, ServiceError},
    Amount, GameKind, ValidationError,
};

use crate::fairness::FairnessError;
use crate::repository::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("stake {stake} outside limits [{min}, {max}]")]
    BetLimit { stake: Amount, min: Amount, max: Amount },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("game {0} is not accepting bets")]
    GameDisabled(GameKind),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("{0} not found")]
    GameNotFound(String),

    #[error("{target} already ended ({state})")]
    GameEnded { target: String, state: String },

    #[error("{target} already cashed out for {payout}")]
    AlreadyCashed { target: String, payout: Amount },

    #[error("no round is accepting bets")]
    RoundNotOpen,

    #[error("{0} has not resolved yet")]
    RevealBeforeResolution(String),

    #[error("round {round_id} stuck in {status} for {elapsed_ms}ms")]
    RoundStalled {
        round_id: u64,
        status: String,
        elapsed_ms: i64,
    },

    #[error("transaction conflict on {0}")]
    Conflict(String),

    #[error("gave up after {attempts} conflicting attempts: {operation}")]
    Transient { operation: String, attempts: u32 },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("duplicate request {0}")]
    DuplicateRequest(String),

    #[error("missing user identity")]
    MissingUser,

    #[error("admin token required")]
    AdminRequired,

    #[error("fairness check failed: {0}")]
    Fairness(#[from] FairnessError),

    #[error("invalid value: {0}")]
    Validation(#[from] ValidationError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(key) => EngineError::Conflict(key),
            StoreError::Duplicate(key) => EngineError::DuplicateRequest(key),
            StoreError::Unavailable(reason) => EngineError::StorageUnavailable(reason),
            StoreError::InsufficientFunds { .. } => EngineError::InsufficientFunds {
                required: Amount::ZERO,
                available: Amount::ZERO,
            },
            corrupted @ StoreError::Corrupted { .. } => {
                EngineError::Internal(anyhow::anyhow!(corrupted))
            }
        }
    }
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub fn is_storage_failure(&self) -> bool {
        matches!(self, EngineError::StorageUnavailable(_))
    }

    pub fn to_service_error(&self) -> ServiceError {
        match self {
            EngineError::BetLimit { stake, min, max } => ServiceError::bet_limit(stake, min, max),
            EngineError::RateLimited { retry_after_ms } => ServiceError::rate_limited(*retry_after_ms),
            EngineError::GameDisabled(game) => ServiceError::new(
                ErrorCategory::Validation,
                ErrorCode::GAME_DISABLED,
                format!("Game {} is disabled", game),
            ),
            EngineError::InvalidRequest(msg) | EngineError::DuplicateRequest(msg) => {
                ServiceError::new(ErrorCategory::Validation, ErrorCode::INVALID_REQUEST, msg.clone())
            }
            EngineError::Validation(e) => {
                ServiceError::new(ErrorCategory::Validation, ErrorCode::INVALID_REQUEST, e.to_string())
            }
            EngineError::InsufficientFunds { required, available } => {
                ServiceError::insufficient_funds(required, available)
            }
            EngineError::GameNotFound(target) => ServiceError::game_not_found(target),
            EngineError::GameEnded { target, state } => {
                ServiceError::game_ended(target).with_context(format!("state: {}", state))
            }
            EngineError::AlreadyCashed { target, payout } => {
                ServiceError::already_cashed(target).with_context(format!("payout: {}", payout))
            }
            EngineError::RoundNotOpen => ServiceError::new(
                ErrorCategory::State,
                ErrorCode::ROUND_NOT_OPEN,
                "No round is accepting bets",
            ),
            EngineError::RevealBeforeResolution(target) => ServiceError::new(
                ErrorCategory::State,
                ErrorCode::REVEAL_BEFORE_RESOLUTION,
                format!("{} has not resolved yet", target),
            ),
            EngineError::RoundStalled { round_id, status, elapsed_ms } => ServiceError::new(
                ErrorCategory::Unavailable,
                ErrorCode::ROUND_STALLED,
                format!("Round {} stalled", round_id),
            )
            .with_context(format!("status: {}, elapsed_ms: {}", status, elapsed_ms)),
            EngineError::Conflict(key) => ServiceError::transient(format!("Conflict on {}", key)),
            EngineError::Transient { operation, attempts } => {
                ServiceError::transient(format!("Retries exhausted for {}", operation))
                    .with_context(format!("attempts: {}", attempts))
            }
            EngineError::StorageUnavailable(reason) => ServiceError::storage_unavailable(reason),
            EngineError::MissingUser => ServiceError::new(
                ErrorCategory::Unauthorized,
                ErrorCode::MISSING_USER,
                "Missing or invalid x-user-id header",
            ),
            EngineError::AdminRequired => ServiceError::new(
                ErrorCategory::Unauthorized,
                ErrorCode::ADMIN_REQUIRED,
                "Missing or invalid x-admin-token header",
            ),
            EngineError::Fairness(e) => ServiceError::internal(e.to_string()),
            EngineError::Internal(e) => ServiceError::internal(e.to_string()),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let error = self.to_service_error();

        match error.category.log_level() {
            "error" => tracing::error!(code = %error.code, error = %self, "Request failed"),
            "warn" => tracing::warn!(code = %error.code, error = %self, "Request rejected"),
            _ => tracing::info!(code = %error.code, error = %self, "Request refused"),
        }
        metrics::counter!(
            "errors_total",
            "category" => format!("{:?}", error.category),
            "code" => error.code.clone()
        )
        .increment(1);

        let status = StatusCode::from_u16(error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": {
                "code": error.code,
                "message": error.message,
                "category": error.category,
                "context": error.context,
            }
        }));

        (status, body).into_response()
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
