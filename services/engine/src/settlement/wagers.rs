use shared::{Asset, BetId, GameKind, SeedId, SessionId, UserId};
use std::time::Instant;

use super::{request_key, SettlementCoordinator};
use crate::domain::{
    bet_reference, session_reference, CashoutReceipt, CashoutTarget, CrashBet, CrashBetStatus,
    IdempotentOutcome, PlaceBetReceipt, PlaceBetRequest, RoundStatus, SettlementEvent,
    SettlementEventKind, StepOutcome, Ticket,
};
use crate::errors::{EngineError, EngineResult};
use crate::games::{CashoutDecision, StepResult};
use crate::repository::{Row, Sequence, UnitOfWork};

impl SettlementCoordinator {
    /// Accept a wager: validate, debit the stake and register the bet or
    /// session in one commit.
    pub async fn place_bet(&self, request: PlaceBetRequest) -> EngineResult<PlaceBetReceipt> {
        let started = Instant::now();
        self.validator.check_request(&request)?;
        let key = request_key("place", &request.user_id.to_string(), request.request_id.as_deref());

        if let Some(key) = &key {
            if let Some(outcome) = self.observe(self.store.idempotent_outcome(key).await.map_err(Into::into)).await? {
                metrics::counter!("idempotent_replays_total").increment(1);
                return placed(outcome);
            }
        }

        if !self.breaker.allow().await {
            metrics::counter!("bets_rejected_total", "reason" => "breaker_open").increment(1);
            return Err(EngineError::StorageUnavailable(
                "circuit breaker open, not accepting bets".to_string(),
            ));
        }

        let result = self.admit_and_place(&request, key.as_deref()).await;
        let result = self.observe(self.recorded(result, key.as_deref()).await).await;

        match &result {
            Ok(outcome) => {
                metrics::counter!("bets_placed_total", "game" => request.game.as_str()).increment(1);
                metrics::histogram!("bet_placement_duration_seconds").record(started.elapsed().as_secs_f64());
                tracing::info!(
                    user_id = %request.user_id,
                    game = %request.game,
                    stake = %request.stake,
                    outcome = ?outcome,
                    "Bet placed"
                );
            }
            Err(e) => {
                metrics::counter!("bets_rejected_total", "reason" => e.to_service_error().code).increment(1);
            }
        }
        placed(result?)
    }

    async fn admit_and_place(
        &self,
        request: &PlaceBetRequest,
        key: Option<&str>,
    ) -> EngineResult<IdempotentOutcome> {
        if request.game == GameKind::Crash {
            self.store
                .latest_round()
                .await?
                .filter(|round| round.record.status == RoundStatus::Open)
                .ok_or(EngineError::RoundNotOpen)?;
        }
        let settings = self.catalog.settings(request.game).await?;
        let balance = self.ledger.balance(request.user_id, Asset::Bx).await?;
        let admitted_at_ms = self.clock.now_ms();
        self.validator.check(
            &settings,
            request.user_id,
            request.stake,
            balance,
            admitted_at_ms,
        )?;

        let result = match request.game {
            GameKind::Crash => self.place_crash(request, key).await,
            GameKind::Chicken => self.start_chicken(request, key).await,
        };
        // Only accepted wagers count against the rate limit
        if result.is_err() {
            self.validator.release(request.user_id, admitted_at_ms);
        }
        result
    }

    async fn place_crash(
        &self,
        request: &PlaceBetRequest,
        key: Option<&str>,
    ) -> EngineResult<IdempotentOutcome> {
        let bet_id = BetId(self.store.next_id(Sequence::Bet).await?);
        let outcome = self
            .retry
            .run("place_bet", || self.try_place_crash(request, key, bet_id))
            .await?;

        self.emit(vec![SettlementEvent::new(
            SettlementEventKind::BetPlaced,
            bet_reference(bet_id),
            self.clock.now(),
        )
        .for_user(request.user_id)
        .with_amount(request.stake)])
        .await;
        Ok(outcome)
    }

    async fn try_place_crash(
        &self,
        request: &PlaceBetRequest,
        key: Option<&str>,
        bet_id: BetId,
    ) -> EngineResult<IdempotentOutcome> {
        let round = self
            .store
            .latest_round()
            .await?
            .ok_or(EngineError::RoundNotOpen)?;
        let next_round = self.crash.accept_bet(&round.record, &request.client_seed)?;
        let now = self.clock.now();

        let bet = CrashBet {
            bet_id,
            round_id: round.record.round_id,
            user_id: request.user_id,
            stake: request.stake,
            client_seed: request.client_seed.clone(),
            auto_cashout: request.auto_cashout,
            status: CrashBetStatus::Placed,
            cashout_multiplier: None,
            payout: shared::Amount::ZERO,
            placed_at: now,
            settled_at: None,
        };
        let outcome = IdempotentOutcome::Placed(PlaceBetReceipt {
            game: GameKind::Crash,
            ticket: Ticket::Bet {
                bet_id,
                round_id: round.record.round_id,
            },
            committed_seed_hash: round.record.server_seed_hash.clone(),
            stake: request.stake,
        });

        let mut unit = UnitOfWork::new();
        unit.transfer(self.ledger.stake(
            request.user_id,
            Asset::Bx,
            request.stake,
            &bet_reference(bet_id),
        ))
        .update(Row::Round(next_round), round.version)
        .insert(Row::CrashBet(bet))
        .remember(key.map(str::to_string), outcome.clone());
        self.commit(unit, Some((request.user_id, request.stake))).await?;
        Ok(outcome)
    }

    async fn start_chicken(
        &self,
        request: &PlaceBetRequest,
        key: Option<&str>,
    ) -> EngineResult<IdempotentOutcome> {
        let session_id = SessionId(self.store.next_id(Sequence::Session).await?);
        let seed_id = SeedId(self.store.next_id(Sequence::Seed).await?);
        let now = self.clock.now();
        let seed = self.fairness.commit(seed_id, now);
        let session = self.chicken.start(
            session_id,
            request.user_id,
            request.stake,
            &seed,
            &request.client_seed,
            now,
        );
        let outcome = IdempotentOutcome::Placed(PlaceBetReceipt {
            game: GameKind::Chicken,
            ticket: Ticket::Session { session_id },
            committed_seed_hash: seed.server_seed_hash.clone(),
            stake: request.stake,
        });

        let mut unit = UnitOfWork::new();
        unit.transfer(self.ledger.stake(
            request.user_id,
            Asset::Bx,
            request.stake,
            &session_reference(session_id),
        ))
        .insert(Row::Seed(seed))
        .insert(Row::Session(session))
        .remember(key.map(str::to_string), outcome.clone());
        self.commit(unit, Some((request.user_id, request.stake))).await?;

        self.emit(vec![SettlementEvent::new(
            SettlementEventKind::SessionStarted,
            session_reference(session_id),
            now,
        )
        .for_user(request.user_id)
        .with_amount(request.stake)])
        .await;
        Ok(outcome)
    }

    /// Advance a chicken session one step
    pub async fn step(
        &self,
        user: UserId,
        session_id: SessionId,
        request_id: Option<&str>,
    ) -> EngineResult<StepOutcome> {
        crate::validator::check_request_id(request_id)?;
        let key = request_key("step", &session_reference(session_id), request_id);
        if let Some(key) = &key {
            if let Some(outcome) = self.store.idempotent_outcome(key).await? {
                return stepped(outcome);
            }
        }

        let result = self
            .retry
            .run("step", || self.try_step(user, session_id, key.as_deref()))
            .await;
        let outcome = stepped(self.observe(self.recorded(result, key.as_deref()).await).await?)?;

        let reference = session_reference(session_id);
        let kind = if outcome.alive {
            SettlementEventKind::SessionStepped
        } else {
            metrics::counter!("settlements_total", "game" => "chicken", "outcome" => "lost").increment(1);
            SettlementEventKind::SessionLost
        };
        tracing::info!(
            user_id = %user,
            session_id = %session_id,
            alive = outcome.alive,
            step = outcome.step,
            "Chicken step"
        );
        self.emit(vec![SettlementEvent::new(kind, reference, self.clock.now()).for_user(user)])
            .await;
        Ok(outcome)
    }

    async fn try_step(
        &self,
        user: UserId,
        session_id: SessionId,
        key: Option<&str>,
    ) -> EngineResult<IdempotentOutcome> {
        let session = self.load_session(user, session_id).await?;
        crate::games::chicken::check_playing(&session.record)?;
        let seed = self.load_seed(session.record.seed_id).await?;
        let now = self.clock.now();

        let (next, result) = self
            .chicken
            .step(&session.record, &seed.record.server_seed, now)?;
        let outcome = IdempotentOutcome::Stepped(StepOutcome {
            session_id,
            alive: result == StepResult::Survived,
            step: next.step,
            status: next.status,
        });

        let mut unit = UnitOfWork::new();
        unit.update(Row::Session(next), session.version);
        if result == StepResult::Died {
            unit.update(Row::Seed(seed.record.reveal(now)), seed.version);
        }
        unit.remember(key.map(str::to_string), outcome.clone());
        self.commit(unit, None).await?;
        Ok(outcome)
    }

    /// Cash out a crash bet or a chicken session. A crash bet that turns out
    /// to have lost is settled as lost and reported as `GameEnded`.
    pub async fn cashout(
        &self,
        user: UserId,
        target: CashoutTarget,
        request_id: Option<&str>,
    ) -> EngineResult<CashoutReceipt> {
        crate::validator::check_request_id(request_id)?;
        let reference = match &target {
            CashoutTarget::Bet { bet_id, .. } => bet_reference(*bet_id),
            CashoutTarget::Session { session_id } => session_reference(*session_id),
        };
        let key = request_key("cashout", &reference, request_id);
        if let Some(key) = &key {
            if let Some(outcome) = self.store.idempotent_outcome(key).await? {
                return cashed(outcome);
            }
        }

        let result = match &target {
            CashoutTarget::Bet { bet_id, multiplier } => {
                self.retry
                    .run("cashout", || self.try_cashout_bet(user, *bet_id, *multiplier, key.as_deref()))
                    .await
            }
            CashoutTarget::Session { session_id } => {
                self.retry
                    .run("cashout", || self.try_cashout_session(user, *session_id, key.as_deref()))
                    .await
            }
        };
        let outcome = self.observe(self.recorded(result, key.as_deref()).await).await?;

        let game = match target {
            CashoutTarget::Bet { .. } => "crash",
            CashoutTarget::Session { .. } => "chicken",
        };
        let (kind, amount) = match (&outcome, &target) {
            (IdempotentOutcome::Cashed(receipt), CashoutTarget::Bet { .. }) => {
                (SettlementEventKind::BetCashed, Some(receipt.payout))
            }
            (IdempotentOutcome::Cashed(receipt), CashoutTarget::Session { .. }) => {
                (SettlementEventKind::SessionCashed, Some(receipt.payout))
            }
            _ => (SettlementEventKind::BetLost, None),
        };
        let settled = if amount.is_some() { "cashed" } else { "lost" };
        metrics::counter!("settlements_total", "game" => game, "outcome" => settled).increment(1);
        tracing::info!(user_id = %user, reference = %reference, outcome = settled, "Cashout settled");

        let mut event = SettlementEvent::new(kind, reference, self.clock.now()).for_user(user);
        if let Some(amount) = amount {
            event = event.with_amount(amount);
        }
        self.emit(vec![event]).await;
        cashed(outcome)
    }

    async fn try_cashout_bet(
        &self,
        user: UserId,
        bet_id: BetId,
        requested: Option<shared::Multiplier>,
        key: Option<&str>,
    ) -> EngineResult<IdempotentOutcome> {
        let bet = self.load_bet(user, bet_id).await?;
        let round = self.load_round(bet.record.round_id).await?;
        let now = self.clock.now();
        let reference = bet_reference(bet_id);

        let mut unit = UnitOfWork::new();
        let outcome = match self.crash.decide_cashout(&round.record, &bet.record, requested, now)? {
            CashoutDecision::Cashed(multiplier) => {
                let settled = self.crash.cash(&bet.record, multiplier, now)?;
                unit.transfer(self.ledger.payout(user, Asset::Bx, settled.payout, &reference))
                    .update(Row::CrashBet(settled.bet), bet.version);
                IdempotentOutcome::Cashed(CashoutReceipt {
                    target: CashoutTarget::Bet {
                        bet_id,
                        multiplier: requested,
                    },
                    multiplier,
                    payout: settled.payout,
                })
            }
            CashoutDecision::Lost => {
                let settled = self.crash.lose(&bet.record, now);
                unit.update(Row::CrashBet(settled.bet), bet.version);
                IdempotentOutcome::Lost {
                    target: CashoutTarget::Bet {
                        bet_id,
                        multiplier: requested,
                    },
                }
            }
        };
        unit.remember(key.map(str::to_string), outcome.clone());
        self.commit(unit, None).await?;
        Ok(outcome)
    }

    async fn try_cashout_session(
        &self,
        user: UserId,
        session_id: SessionId,
        key: Option<&str>,
    ) -> EngineResult<IdempotentOutcome> {
        let session = self.load_session(user, session_id).await?;
        crate::games::chicken::check_playing(&session.record)?;
        let seed = self.load_seed(session.record.seed_id).await?;
        let now = self.clock.now();

        let (next, multiplier, payout) = self.chicken.cashout(&session.record, now)?;
        let outcome = IdempotentOutcome::Cashed(CashoutReceipt {
            target: CashoutTarget::Session { session_id },
            multiplier,
            payout,
        });

        let mut unit = UnitOfWork::new();
        unit.transfer(self.ledger.payout(
            user,
            Asset::Bx,
            payout,
            &session_reference(session_id),
        ))
        .update(Row::Session(next), session.version)
        .update(Row::Seed(seed.record.reveal(now)), seed.version)
        .remember(key.map(str::to_string), outcome.clone());
        self.commit(unit, None).await?;
        Ok(outcome)
    }
}

fn placed(outcome: IdempotentOutcome) -> EngineResult<PlaceBetReceipt> {
    match outcome {
        IdempotentOutcome::Placed(receipt) => Ok(receipt),
        other => Err(mismatched(other)),
    }
}

fn stepped(outcome: IdempotentOutcome) -> EngineResult<StepOutcome> {
    match outcome {
        IdempotentOutcome::Stepped(step) => Ok(step),
        other => Err(mismatched(other)),
    }
}

fn cashed(outcome: IdempotentOutcome) -> EngineResult<CashoutReceipt> {
    match outcome {
        IdempotentOutcome::Cashed(receipt) => Ok(receipt),
        IdempotentOutcome::Lost { target } => Err(EngineError::GameEnded {
            target: match target {
                CashoutTarget::Bet { bet_id, .. } => format!("bet {}", bet_id),
                CashoutTarget::Session { session_id } => format!("session {}", session_id),
            },
            state: "lost".to_string(),
        }),
        other => Err(mismatched(other)),
    }
}

fn mismatched(outcome: IdempotentOutcome) -> EngineError {
    EngineError::InvalidRequest(format!(
        "request_id already used for a different operation ({:?})",
        outcome
    ))
}
