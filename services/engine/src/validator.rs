//! Pre-commit wager checks
//!
//! Everything here runs before any balance effect. The balance check is
//! advisory; the ledger guard at commit is authoritative.

use shared::{Amount, GameKind, UserId, BPS_DENOMINATOR, MAX_CLIENT_SEED_LENGTH, MAX_REQUEST_ID_LENGTH};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::{GameSettings, PlaceBetRequest};
use crate::errors::{EngineError, EngineResult};
use crate::rate_limit::SlidingWindowLimiter;
use crate::repository::Store;

pub struct BetValidator {
    limiter: SlidingWindowLimiter,
    frozen: bool,
}

impl BetValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limiter: SlidingWindowLimiter::new(&config.rate_limit),
            frozen: config.games_frozen,
        }
    }

    /// Shape checks that need no state
    pub fn check_request(&self, request: &PlaceBetRequest) -> EngineResult<()> {
        if request.client_seed.is_empty() || request.client_seed.len() > MAX_CLIENT_SEED_LENGTH {
            return Err(EngineError::InvalidRequest(format!(
                "client_seed must be 1..={} characters",
                MAX_CLIENT_SEED_LENGTH
            )));
        }
        check_request_id(request.request_id.as_deref())?;
        if request.auto_cashout.is_some() && request.game != GameKind::Crash {
            return Err(EngineError::InvalidRequest(
                "auto_cashout only applies to crash".to_string(),
            ));
        }
        if let Some(target) = request.auto_cashout {
            shared::Multiplier::cashout_target(target.hundredths())?;
        }
        Ok(())
    }

    /// Admission: game open, stake within limits, funds present, rate not exceeded
    pub fn check(
        &self,
        settings: &GameSettings,
        user: UserId,
        stake: Amount,
        balance: Amount,
        now_ms: i64,
    ) -> EngineResult<()> {
        if self.frozen || !settings.enabled {
            return Err(EngineError::GameDisabled(settings.game));
        }
        if stake < settings.min_bet || stake > settings.max_bet {
            return Err(EngineError::BetLimit {
                stake,
                min: settings.min_bet,
                max: settings.max_bet,
            });
        }
        if balance < stake {
            return Err(EngineError::InsufficientFunds {
                required: stake,
                available: balance,
            });
        }
        self.limiter
            .try_acquire(user, now_ms)
            .map_err(|retry_after_ms| EngineError::RateLimited { retry_after_ms })
    }

    /// Give back the rate-limit slot of a wager that failed after admission
    pub fn release(&self, user: UserId, admitted_at_ms: i64) {
        self.limiter.release(user, admitted_at_ms);
    }

    pub fn evict_idle(&self, now_ms: i64) -> usize {
        self.limiter.evict_idle(now_ms)
    }
}

pub fn check_request_id(request_id: Option<&str>) -> EngineResult<()> {
    match request_id {
        Some(id) if id.is_empty() || id.len() > MAX_REQUEST_ID_LENGTH => Err(
            EngineError::InvalidRequest(format!(
                "request_id must be 1..={} characters",
                MAX_REQUEST_ID_LENGTH
            )),
        ),
        _ => Ok(()),
    }
}

/// Per-game settings with store overrides over configured defaults
pub struct GameCatalog {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl GameCatalog {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub async fn settings(&self, game: GameKind) -> EngineResult<GameSettings> {
        match self.store.game_settings(game).await? {
            Some(settings) => Ok(settings),
            None => Ok(self.config.defaults_for(game).clone()),
        }
    }

    pub async fn all(&self) -> EngineResult<Vec<GameSettings>> {
        let mut all = Vec::with_capacity(GameKind::ALL.len());
        for game in GameKind::ALL {
            all.push(self.settings(game).await?);
        }
        Ok(all)
    }

    pub async fn upsert(&self, settings: GameSettings) -> EngineResult<GameSettings> {
        if settings.min_bet.is_zero() || settings.min_bet > settings.max_bet {
            return Err(EngineError::InvalidRequest(
                "min_bet must be positive and not above max_bet".to_string(),
            ));
        }
        if settings.house_edge_bps >= BPS_DENOMINATOR {
            return Err(EngineError::InvalidRequest(
                "house_edge_bps must be below 10000".to_string(),
            ));
        }
        self.store.put_game_settings(&settings).await?;
        tracing::info!(
            game = %settings.game,
            min_bet = %settings.min_bet,
            max_bet = %settings.max_bet,
            house_edge_bps = settings.house_edge_bps,
            enabled = settings.enabled,
            "Game settings updated"
        );
        Ok(settings)
    }
}
