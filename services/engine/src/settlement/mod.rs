//! Settlement Coordinator
//!
//! Runs every wager transition as one unit of work: load the rows, let the
//! game machine decide, then commit the row writes, the ledger postings and
//! the idempotency record together. Conflicts reload and retry; anything
//! that would notify the outside world happens only after the commit.

mod rounds;
mod wagers;

use shared::{Amount, Asset, BetId, RoundId, SessionId, UserId};
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::domain::{
    ChickenSession, CrashBet, IdempotentOutcome, Round, RoundReveal, RoundStatus, SeedPair,
    SessionReveal, SessionStatus, SettlementEvent,
};
use crate::errors::{EngineError, EngineResult};
use crate::fairness::{FairnessGenerator, SeedSource};
use crate::games::{ChickenMachine, CrashCurve, CrashMachine};
use crate::ledger::Ledger;
use crate::notifier::{dispatch, LogNotifier, Notifier};
use crate::repository::{Store, StoreError, UnitOfWork, Versioned};
use crate::retry::RetryStrategy;
use crate::validator::{BetValidator, GameCatalog};

pub struct SettlementCoordinator {
    store: Arc<dyn Store>,
    ledger: Ledger,
    fairness: FairnessGenerator,
    validator: BetValidator,
    catalog: GameCatalog,
    crash: CrashMachine,
    chicken: ChickenMachine,
    retry: RetryStrategy,
    breaker: CircuitBreaker,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SettlementCoordinator {
    pub fn new(store: Arc<dyn Store>, config: &EngineConfig) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            fairness: FairnessGenerator::default(),
            validator: BetValidator::new(config),
            catalog: GameCatalog::new(store.clone(), config.clone()),
            crash: CrashMachine::new(CrashCurve::new(config.crash_growth_per_ms)),
            chicken: ChickenMachine::new(config.chicken_curve),
            retry: RetryStrategy::new(&config.retry),
            breaker: CircuitBreaker::new(
                config.breaker.failure_threshold,
                Duration::from_secs(config.breaker.reset_timeout_seconds),
            ),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            store,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_seed_source(mut self, source: Box<dyn SeedSource>) -> Self {
        self.fairness = FairnessGenerator::new(source);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn catalog(&self) -> &GameCatalog {
        &self.catalog
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn crash_machine(&self) -> &CrashMachine {
        &self.crash
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    pub async fn balance(&self, user: UserId, asset: Asset) -> EngineResult<Amount> {
        self.observe(self.ledger.balance(user, asset).await).await
    }

    /// Drop rate-limit windows for users idle long enough to have no history
    pub fn sweep_rate_limits(&self) -> usize {
        self.validator.evict_idle(self.clock.now_ms())
    }

    pub async fn crash_bet(&self, user: UserId, bet_id: BetId) -> EngineResult<CrashBet> {
        let bet = self.observe(self.load_bet(user, bet_id).await).await?;
        Ok(bet.record)
    }

    pub async fn session(&self, user: UserId, session_id: SessionId) -> EngineResult<ChickenSession> {
        let session = self.observe(self.load_session(user, session_id).await).await?;
        Ok(session.record)
    }

    /// Fairness proof for a resolved round
    pub async fn reveal_round(&self, round_id: RoundId) -> EngineResult<RoundReveal> {
        let round = self
            .store
            .round(round_id)
            .await?
            .ok_or_else(|| EngineError::GameNotFound(format!("round {}", round_id)))?;
        round_reveal(&round.record)
    }

    /// Fairness proof for a finished chicken session
    pub async fn reveal_session(&self, session_id: SessionId) -> EngineResult<SessionReveal> {
        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or_else(|| EngineError::GameNotFound(format!("session {}", session_id)))?
            .record;
        if !session.status.is_terminal() {
            return Err(EngineError::RevealBeforeResolution(format!(
                "session {}",
                session_id
            )));
        }
        let seed = self.load_seed(session.seed_id).await?.record;
        let server_seed = seed.revealed_seed()?.to_string();
        let steps_drawn = match session.status {
            SessionStatus::Lost => session.step + 1,
            _ => session.step,
        };
        Ok(SessionReveal {
            session_id,
            server_seed,
            server_seed_hash: seed.server_seed_hash,
            client_seed: session.client_seed,
            steps_drawn,
            status: session.status,
        })
    }

    async fn load_bet(&self, user: UserId, bet_id: BetId) -> EngineResult<Versioned<CrashBet>> {
        self.store
            .crash_bet(bet_id)
            .await?
            .filter(|bet| bet.record.user_id == user)
            .ok_or_else(|| EngineError::GameNotFound(format!("bet {}", bet_id)))
    }

    async fn load_session(
        &self,
        user: UserId,
        session_id: SessionId,
    ) -> EngineResult<Versioned<ChickenSession>> {
        self.store
            .session(session_id)
            .await?
            .filter(|session| session.record.user_id == user)
            .ok_or_else(|| EngineError::GameNotFound(format!("session {}", session_id)))
    }

    async fn load_round(&self, round_id: RoundId) -> EngineResult<Versioned<Round>> {
        self.store
            .round(round_id)
            .await?
            .ok_or_else(|| EngineError::GameNotFound(format!("round {}", round_id)))
    }

    async fn load_seed(&self, seed_id: shared::SeedId) -> EngineResult<Versioned<SeedPair>> {
        self.store.seed(seed_id).await?.ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!("seed {} missing", seed_id))
        })
    }

    /// Commit a unit, turning a failed balance guard into the payer's shortfall
    async fn commit(&self, unit: UnitOfWork, payer: Option<(UserId, Amount)>) -> EngineResult<()> {
        match self.store.commit(unit).await {
            Ok(_) => Ok(()),
            Err(StoreError::InsufficientFunds { account, .. }) => match payer {
                Some((user, required)) => {
                    let available = self.ledger.balance(user, Asset::Bx).await.unwrap_or(Amount::ZERO);
                    Err(EngineError::InsufficientFunds { required, available })
                }
                None => Err(EngineError::Internal(anyhow::anyhow!(
                    "balance guard failed on {} without a payer",
                    account
                ))),
            },
            Err(other) => Err(other.into()),
        }
    }

    /// A keyed request that failed may have lost a race against its own
    /// replay; if the key has been recorded meanwhile, that outcome stands.
    async fn recorded(
        &self,
        result: EngineResult<IdempotentOutcome>,
        key: Option<&str>,
    ) -> EngineResult<IdempotentOutcome> {
        let Some(key) = key else {
            return result;
        };
        match &result {
            Err(e) if !e.is_storage_failure() => {}
            _ => return result,
        }
        match self.store.idempotent_outcome(key).await? {
            Some(outcome) => {
                metrics::counter!("idempotent_replays_total").increment(1);
                Ok(outcome)
            }
            None => result,
        }
    }

    /// Feed storage health into the breaker
    async fn observe<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        match &result {
            Ok(_) => self.breaker.on_success().await,
            Err(e) if e.is_storage_failure() => self.breaker.on_failure().await,
            Err(_) => {}
        }
        result
    }

    async fn emit(&self, events: Vec<SettlementEvent>) {
        for event in events {
            dispatch(self.notifier.as_ref(), event).await;
        }
    }
}

pub fn round_reveal(round: &Round) -> EngineResult<RoundReveal> {
    if round.status != RoundStatus::Resolved {
        return Err(EngineError::RevealBeforeResolution(format!(
            "round {}",
            round.round_id
        )));
    }
    let incomplete = || EngineError::Internal(anyhow::anyhow!("resolved round {} is incomplete", round.round_id));
    Ok(RoundReveal {
        round_id: round.round_id,
        server_seed: round.server_seed.clone().ok_or_else(incomplete)?,
        server_seed_hash: round.server_seed_hash.clone(),
        client_seed: round.client_seed.clone().ok_or_else(incomplete)?,
        nonce: round.round_id.get(),
        house_edge_bps: round.house_edge_bps.ok_or_else(incomplete)?,
        crash_point: round.crash_point.ok_or_else(incomplete)?,
    })
}

fn request_key(operation: &str, scope: &str, request_id: Option<&str>) -> Option<String> {
    request_id.map(|id| format!("{}:{}:{}", operation, scope, id))
}

#[cfg(test)]
mod tests;
