use chrono::{DateTime, Utc};
use shared::{Asset, GameKind, RoundId, SeedId};

use super::{round_reveal, SettlementCoordinator};
use crate::domain::{
    bet_reference, round_reference, CrashBetStatus, Round, RoundReveal, RoundStatus, RoundView,
    SettlementEvent, SettlementEventKind,
};
use crate::errors::{EngineError, EngineResult};
use crate::repository::{Row, Sequence, UnitOfWork};

impl SettlementCoordinator {
    pub async fn latest_round(&self) -> EngineResult<Option<Round>> {
        let latest = self.observe(self.store.latest_round().await.map_err(Into::into)).await?;
        Ok(latest.map(|round| round.record))
    }

    pub async fn current_round(&self) -> EngineResult<Option<RoundView>> {
        let latest = self.latest_round().await?;
        Ok(latest.map(|round| self.round_view(&round, self.clock.now())))
    }

    /// Public view; the crash point only appears once the round is resolved
    pub fn round_view(&self, round: &Round, now: DateTime<Utc>) -> RoundView {
        RoundView {
            round_id: round.round_id,
            status: round.status,
            server_seed_hash: round.server_seed_hash.clone(),
            bet_count: round.bet_count,
            live_multiplier: self.crash.live_multiplier(round, now),
            crash_point: match round.status {
                RoundStatus::Resolved => round.crash_point,
                _ => None,
            },
            created_at: round.created_at,
        }
    }

    /// Open the next round, committing its seed before any bet can see it
    pub async fn open_round(&self) -> EngineResult<Round> {
        let round = self.retry.run("open_round", || self.try_open_round()).await;
        let round = self.observe(round).await?;

        tracing::info!(
            round_id = %round.round_id,
            server_seed_hash = %round.server_seed_hash,
            "Round opened"
        );
        metrics::counter!("rounds_opened_total").increment(1);
        self.emit(vec![SettlementEvent::new(
            SettlementEventKind::RoundOpened,
            round_reference(round.round_id),
            round.created_at,
        )])
        .await;
        Ok(round)
    }

    /// Close betting and fix the crash point with the current house edge
    pub async fn activate_round(&self, round_id: RoundId) -> EngineResult<Round> {
        let round = self
            .retry
            .run("activate_round", || self.try_activate_round(round_id))
            .await;
        let round = self.observe(round).await?;

        tracing::info!(
            round_id = %round.round_id,
            bet_count = round.bet_count,
            "Round activated"
        );
        self.emit(vec![SettlementEvent::new(
            SettlementEventKind::RoundActivated,
            round_reference(round_id),
            self.clock.now(),
        )])
        .await;
        Ok(round)
    }

    /// Settle bets whose auto cash-out target the live multiplier has passed.
    /// A bet that conflicts is left for the next pass.
    pub async fn settle_auto_cashouts(&self, round_id: RoundId) -> EngineResult<usize> {
        let round = self.observe(self.load_round(round_id).await).await?;
        if round.record.status != RoundStatus::Active {
            return Ok(0);
        }
        let bets = self.store.bets_for_round(round_id).await?;
        let now = self.clock.now();
        let due = self
            .crash
            .due_auto_cashouts(&round.record, bets.iter().map(|b| &b.record), now);

        let mut settled = 0;
        let mut events = Vec::new();
        for (bet, target) in due {
            let Some(version) = bets.iter().find(|b| b.record.bet_id == bet.bet_id).map(|b| b.version) else {
                continue;
            };
            let cashed = self.crash.cash(bet, target, now)?;
            let reference = bet_reference(bet.bet_id);
            let mut unit = UnitOfWork::new();
            unit.transfer(self.ledger.payout(bet.user_id, Asset::Bx, cashed.payout, &reference))
                .update(Row::CrashBet(cashed.bet), version);

            match self.commit(unit, None).await {
                Ok(()) => {
                    settled += 1;
                    events.push(
                        SettlementEvent::new(SettlementEventKind::BetCashed, reference, now)
                            .for_user(bet.user_id)
                            .with_amount(cashed.payout),
                    );
                }
                Err(EngineError::Conflict(key)) => {
                    tracing::debug!(bet_id = %bet.bet_id, conflict = %key, "Auto cashout raced, deferring");
                }
                Err(e) => return self.observe(Err(e)).await,
            }
        }

        if settled > 0 {
            metrics::counter!("settlements_total", "game" => "crash", "outcome" => "auto_cashed")
                .increment(settled as u64);
            tracing::info!(round_id = %round_id, settled, "Auto cashouts settled");
        }
        self.emit(events).await;
        Ok(settled)
    }

    /// Resolve a crashed round: every bet still placed is settled in the same
    /// commit (auto targets below the crash point paid, the rest lost) and
    /// the server seed is revealed. Resolving twice returns the same reveal.
    pub async fn resolve_round(&self, round_id: RoundId) -> EngineResult<RoundReveal> {
        let outcome = self
            .retry
            .run("resolve_round", || self.try_resolve_round(round_id))
            .await;
        let (reveal, events) = self.observe(outcome).await?;

        if !events.is_empty() {
            let lost = events
                .iter()
                .filter(|e| e.kind == SettlementEventKind::BetLost)
                .count();
            metrics::counter!("rounds_resolved_total").increment(1);
            metrics::counter!("settlements_total", "game" => "crash", "outcome" => "lost")
                .increment(lost as u64);
            tracing::info!(
                round_id = %round_id,
                crash_point = %reveal.crash_point,
                settled_bets = events.len() - 1,
                lost,
                "Round resolved"
            );
        }
        self.emit(events).await;
        Ok(reveal)
    }

    /// Surface a round stuck in one phase past `timeout_ms`. Balances are
    /// never touched here; an operator decides what happens next.
    pub fn check_round_deadline(&self, round: &Round, timeout_ms: i64, now: DateTime<Utc>) -> EngineResult<()> {
        let phase_deadline = match round.status {
            RoundStatus::Open => Some(round.created_at),
            RoundStatus::Active => self.crash.crash_time(round),
            RoundStatus::Resolved => None,
        };
        let Some(since) = phase_deadline else {
            return Ok(());
        };
        let elapsed_ms = (now - since).num_milliseconds();
        if elapsed_ms > timeout_ms {
            return Err(EngineError::RoundStalled {
                round_id: round.round_id.get(),
                status: format!("{:?}", round.status).to_lowercase(),
                elapsed_ms,
            });
        }
        Ok(())
    }
}

impl SettlementCoordinator {
    async fn try_open_round(&self) -> EngineResult<Round> {
        let latest = self.store.latest_round().await?;
        let round_id = match &latest {
            Some(previous) if previous.record.status != RoundStatus::Resolved => {
                return Err(EngineError::InvalidRequest(format!(
                    "round {} is still {:?}",
                    previous.record.round_id, previous.record.status
                )))
            }
            Some(previous) => RoundId(previous.record.round_id.get() + 1),
            None => RoundId(1),
        };

        let now = self.clock.now();
        let seed_id = SeedId(self.store.next_id(Sequence::Seed).await?);
        let seed = self.fairness.commit(seed_id, now);
        let round = self.crash.open(round_id, &seed, now);

        // Insert-if-absent on the round row: concurrent openers conflict
        let mut unit = UnitOfWork::new();
        unit.insert(Row::Seed(seed)).insert(Row::Round(round.clone()));
        self.commit(unit, None).await?;
        Ok(round)
    }

    async fn try_activate_round(&self, round_id: RoundId) -> EngineResult<Round> {
        let round = self.load_round(round_id).await?;
        let seed = self.load_seed(round.record.seed_id).await?;
        let settings = self.catalog.settings(GameKind::Crash).await?;
        let active = self.crash.activate(
            &round.record,
            &seed.record.server_seed,
            settings.house_edge_bps,
            self.clock.now(),
        )?;

        let mut unit = UnitOfWork::new();
        unit.update(Row::Round(active.clone()), round.version);
        self.commit(unit, None).await?;
        Ok(active)
    }

    async fn try_resolve_round(
        &self,
        round_id: RoundId,
    ) -> EngineResult<(RoundReveal, Vec<SettlementEvent>)> {
        let round = self.load_round(round_id).await?;
        if round.record.status == RoundStatus::Resolved {
            return Ok((round_reveal(&round.record)?, Vec::new()));
        }
        let now = self.clock.now();
        if !self.crash.has_crashed(&round.record, now) {
            return Err(EngineError::InvalidRequest(format!(
                "round {} has not crashed yet",
                round_id
            )));
        }
        let seed = self.load_seed(round.record.seed_id).await?;
        let bets = self.store.bets_for_round(round_id).await?;
        let resolved = self.crash.resolve(&round.record, &seed.record, now)?;

        let mut unit = UnitOfWork::new();
        let mut events = Vec::new();
        for bet in bets.iter().filter(|b| b.record.status == CrashBetStatus::Placed) {
            let settled = self.crash.settle_at_resolution(&round.record, &bet.record, now)?;
            let reference = bet_reference(bet.record.bet_id);
            let event = if settled.payout.is_zero() {
                SettlementEvent::new(SettlementEventKind::BetLost, reference, now)
            } else {
                unit.transfer(self.ledger.payout(
                    bet.record.user_id,
                    Asset::Bx,
                    settled.payout,
                    &reference,
                ));
                SettlementEvent::new(SettlementEventKind::BetCashed, reference, now)
                    .with_amount(settled.payout)
            };
            events.push(event.for_user(bet.record.user_id));
            unit.update(Row::CrashBet(settled.bet), bet.version);
        }
        unit.update(Row::Seed(seed.record.reveal(now)), seed.version)
            .update(Row::Round(resolved.clone()), round.version);
        self.commit(unit, None).await?;

        events.push(SettlementEvent::new(
            SettlementEventKind::RoundResolved,
            round_reference(round_id),
            now,
        ));
        Ok((round_reveal(&resolved)?, events))
    }
}
