use chrono::{DateTime, Utc};
use shared::{Amount, Multiplier, RoundId, MAX_MULTIPLIER_HUNDREDTHS, MULTIPLIER_SCALE};

use crate::domain::{CrashBet, CrashBetStatus, Round, RoundStatus, SeedPair};
use crate::errors::{EngineError, EngineResult};
use crate::fairness::{crash_point, derive, extend_seed_chain, round_seed_chain};

/// Live multiplier as a function of time since activation:
/// `floor(100 * e^(growth * t_ms))` hundredths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrashCurve {
    growth_per_ms: f64,
}

impl CrashCurve {
    pub fn new(growth_per_ms: f64) -> Self {
        Self { growth_per_ms }
    }

    pub fn multiplier_at(&self, elapsed_ms: i64) -> Multiplier {
        if elapsed_ms <= 0 {
            return Multiplier::ONE;
        }
        let raw = (MULTIPLIER_SCALE as f64 * (self.growth_per_ms * elapsed_ms as f64).exp()).floor();
        let capped = raw.clamp(MULTIPLIER_SCALE as f64, MAX_MULTIPLIER_HUNDREDTHS as f64);
        Multiplier::from_hundredths(capped as u32)
    }

    /// First millisecond at which the curve reaches `target`
    pub fn elapsed_for(&self, target: Multiplier) -> i64 {
        if target <= Multiplier::ONE {
            return 0;
        }
        let ratio = target.hundredths() as f64 / MULTIPLIER_SCALE as f64;
        let mut ms = (ratio.ln() / self.growth_per_ms).ceil().max(0.0) as i64;
        // Float rounding can land one tick either side
        while ms > 0 && self.multiplier_at(ms - 1) >= target {
            ms -= 1;
        }
        while self.multiplier_at(ms) < target {
            ms += 1;
        }
        ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashoutDecision {
    Cashed(Multiplier),
    Lost,
}

/// A bet moved to its terminal state, with the payout it earns
#[derive(Debug, Clone)]
pub struct SettledBet {
    pub bet: CrashBet,
    pub payout: Amount,
}

#[derive(Debug, Clone, Copy)]
pub struct CrashMachine {
    curve: CrashCurve,
}

impl CrashMachine {
    pub fn new(curve: CrashCurve) -> Self {
        Self { curve }
    }

    pub fn curve(&self) -> CrashCurve {
        self.curve
    }

    /// A fresh round committed to `seed`; the hash is public from here on
    pub fn open(&self, round_id: RoundId, seed: &SeedPair, at: DateTime<Utc>) -> Round {
        Round {
            round_id,
            seed_id: seed.seed_id,
            server_seed_hash: seed.server_seed_hash.clone(),
            server_seed: None,
            seed_chain: round_seed_chain(round_id),
            client_seed: None,
            crash_point: None,
            house_edge_bps: None,
            status: RoundStatus::Open,
            bet_count: 0,
            created_at: at,
            activated_at: None,
            resolved_at: None,
        }
    }

    /// Register one bet's client seed against an open round
    pub fn accept_bet(&self, round: &Round, client_seed: &str) -> EngineResult<Round> {
        if round.status != RoundStatus::Open {
            return Err(EngineError::RoundNotOpen);
        }
        let mut next = round.clone();
        next.seed_chain = extend_seed_chain(&round.seed_chain, client_seed);
        next.bet_count += 1;
        Ok(next)
    }

    /// Close betting: the seed chain becomes the client seed and the crash
    /// point is fixed, though not published.
    pub fn activate(
        &self,
        round: &Round,
        server_seed: &str,
        house_edge_bps: u32,
        at: DateTime<Utc>,
    ) -> EngineResult<Round> {
        if round.status != RoundStatus::Open {
            return Err(EngineError::InvalidRequest(format!(
                "round {} is not open",
                round.round_id
            )));
        }
        let outcome = derive(server_seed, &round.seed_chain, round.round_id.get());
        let mut next = round.clone();
        next.client_seed = Some(round.seed_chain.clone());
        next.crash_point = Some(crash_point(&outcome, house_edge_bps));
        next.house_edge_bps = Some(house_edge_bps);
        next.status = RoundStatus::Active;
        next.activated_at = Some(at);
        Ok(next)
    }

    /// Current multiplier of an active round, never past its crash point
    pub fn live_multiplier(&self, round: &Round, now: DateTime<Utc>) -> Option<Multiplier> {
        let activated_at = round.activated_at?;
        let crash = round.crash_point?;
        if round.status != RoundStatus::Active {
            return None;
        }
        let elapsed = (now - activated_at).num_milliseconds();
        Some(self.curve.multiplier_at(elapsed).min(crash))
    }

    pub fn has_crashed(&self, round: &Round, now: DateTime<Utc>) -> bool {
        match (round.status, round.crash_point, round.activated_at) {
            (RoundStatus::Resolved, _, _) => true,
            (RoundStatus::Active, Some(crash), Some(activated_at)) => {
                self.curve.multiplier_at((now - activated_at).num_milliseconds()) >= crash
            }
            _ => false,
        }
    }

    /// When the round is due to crash
    pub fn crash_time(&self, round: &Round) -> Option<DateTime<Utc>> {
        let activated_at = round.activated_at?;
        let crash = round.crash_point?;
        Some(activated_at + chrono::Duration::milliseconds(self.curve.elapsed_for(crash)))
    }

    /// Decide a manual cash-out. The target is the requested multiplier or,
    /// absent one, the live multiplier. A requested multiplier the curve has
    /// not reached yet is refused without looking at the crash point.
    pub fn decide_cashout(
        &self,
        round: &Round,
        bet: &CrashBet,
        requested: Option<Multiplier>,
        now: DateTime<Utc>,
    ) -> EngineResult<CashoutDecision> {
        check_bet_open(bet)?;
        let crash = match (round.status, round.crash_point) {
            (RoundStatus::Active, Some(crash)) => crash,
            (RoundStatus::Open, _) => {
                return Err(EngineError::InvalidRequest(format!(
                    "round {} has not started",
                    round.round_id
                )))
            }
            _ => {
                return Err(EngineError::GameEnded {
                    target: format!("round {}", round.round_id),
                    state: "resolved".to_string(),
                })
            }
        };
        let live = self.live_multiplier(round, now).unwrap_or(Multiplier::ONE);
        // An auto target the multiplier has passed already fired, settled or not
        if let Some(auto) = bet.auto_cashout {
            if auto <= live && auto < crash {
                return Ok(CashoutDecision::Cashed(auto));
            }
        }
        if self.has_crashed(round, now) {
            return Ok(CashoutDecision::Lost);
        }
        let target = match requested {
            Some(requested) => {
                let requested = Multiplier::cashout_target(requested.hundredths())?;
                if requested > live {
                    return Err(EngineError::InvalidRequest(format!(
                        "multiplier {} not reached, live is {}",
                        requested, live
                    )));
                }
                requested
            }
            None => live,
        };
        if target <= Multiplier::ONE {
            return Err(EngineError::InvalidRequest(
                "multiplier has not left 1.00x yet".to_string(),
            ));
        }
        // Not crashed, so target <= live < crash
        if target < crash {
            Ok(CashoutDecision::Cashed(target))
        } else {
            Ok(CashoutDecision::Lost)
        }
    }

    /// Placed bets whose auto target the live multiplier has passed
    pub fn due_auto_cashouts<'a>(
        &self,
        round: &Round,
        bets: impl IntoIterator<Item = &'a CrashBet>,
        now: DateTime<Utc>,
    ) -> Vec<(&'a CrashBet, Multiplier)> {
        let (Some(live), Some(crash)) = (self.live_multiplier(round, now), round.crash_point) else {
            return Vec::new();
        };
        bets.into_iter()
            .filter(|bet| bet.status == CrashBetStatus::Placed)
            .filter_map(|bet| bet.auto_cashout.map(|target| (bet, target)))
            .filter(|(_, target)| *target <= live && *target < crash)
            .collect()
    }

    /// Final state of a bet still placed when the round resolves
    pub fn settle_at_resolution(&self, round: &Round, bet: &CrashBet, at: DateTime<Utc>) -> EngineResult<SettledBet> {
        match (bet.auto_cashout, round.crash_point) {
            (Some(target), Some(crash)) if target < crash => self.cash(bet, target, at),
            _ => Ok(self.lose(bet, at)),
        }
    }

    pub fn cash(&self, bet: &CrashBet, multiplier: Multiplier, at: DateTime<Utc>) -> EngineResult<SettledBet> {
        let payout = bet.stake.times(multiplier)?;
        let mut next = bet.clone();
        next.status = CrashBetStatus::Cashed;
        next.cashout_multiplier = Some(multiplier);
        next.payout = payout;
        next.settled_at = Some(at);
        Ok(SettledBet { bet: next, payout })
    }

    pub fn lose(&self, bet: &CrashBet, at: DateTime<Utc>) -> SettledBet {
        let mut next = bet.clone();
        next.status = CrashBetStatus::Lost;
        next.payout = Amount::ZERO;
        next.settled_at = Some(at);
        SettledBet {
            bet: next,
            payout: Amount::ZERO,
        }
    }

    /// Resolve an active round and reveal its seed
    pub fn resolve(&self, round: &Round, seed: &SeedPair, at: DateTime<Utc>) -> EngineResult<Round> {
        if round.status != RoundStatus::Active {
            return Err(EngineError::InvalidRequest(format!(
                "round {} is not active",
                round.round_id
            )));
        }
        let mut next = round.clone();
        next.server_seed = Some(seed.server_seed.clone());
        next.status = RoundStatus::Resolved;
        next.resolved_at = Some(at);
        Ok(next)
    }
}

/// Terminal bets refuse every further transition
pub fn check_bet_open(bet: &CrashBet) -> EngineResult<()> {
    match bet.status {
        CrashBetStatus::Placed => Ok(()),
        CrashBetStatus::Cashed => Err(EngineError::AlreadyCashed {
            target: format!("bet {}", bet.bet_id),
            payout: bet.payout,
        }),
        CrashBetStatus::Lost => Err(EngineError::GameEnded {
            target: format!("bet {}", bet.bet_id),
            state: "lost".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::{hash_seed, FairnessGenerator, FixedSeedSource};
    use chrono::Duration;
    use shared::{BetId, SeedId, UserId};

    fn machine() -> CrashMachine {
        CrashMachine::new(CrashCurve::new(0.00006))
    }

    fn bet(round_id: RoundId, auto: Option<u32>) -> CrashBet {
        CrashBet {
            bet_id: BetId(1),
            round_id,
            user_id: UserId(1),
            stake: Amount::from_bx(20).unwrap(),
            client_seed: "c".to_string(),
            auto_cashout: auto.map(Multiplier::from_hundredths),
            status: CrashBetStatus::Placed,
            cashout_multiplier: None,
            payout: Amount::ZERO,
            placed_at: Utc::now(),
            settled_at: None,
        }
    }

    fn active_round(crash: u32, activated_at: DateTime<Utc>) -> Round {
        let seed = FairnessGenerator::new(Box::new(FixedSeedSource::new(["s"]))).commit(SeedId(1), activated_at);
        let mut round = machine().open(RoundId(1), &seed, activated_at);
        round.status = RoundStatus::Active;
        round.crash_point = Some(Multiplier::from_hundredths(crash));
        round.activated_at = Some(activated_at);
        round
    }

    #[test]
    fn test_curve_shape() {
        let curve = CrashCurve::new(0.00006);
        assert_eq!(curve.multiplier_at(0).hundredths(), 100);
        assert_eq!(curve.multiplier_at(11_553).hundredths(), 200);
        assert!(curve.multiplier_at(11_000) < curve.multiplier_at(12_000));

        let two = Multiplier::from_hundredths(200);
        let ms = curve.elapsed_for(two);
        assert!(curve.multiplier_at(ms) >= two);
        assert!(curve.multiplier_at(ms - 1) < two);
    }

    #[test]
    fn test_accept_extends_chain() {
        let seed = FairnessGenerator::default().commit(SeedId(1), Utc::now());
        let round = machine().open(RoundId(7), &seed, Utc::now());
        let next = machine().accept_bet(&round, "alice").unwrap();
        assert_eq!(next.bet_count, 1);
        assert_eq!(next.seed_chain, extend_seed_chain(&round_seed_chain(RoundId(7)), "alice"));
    }

    #[test]
    fn test_activation_fixes_client_seed_and_crash_point() {
        let now = Utc::now();
        let seed = FairnessGenerator::new(Box::new(FixedSeedSource::new(["server"]))).commit(SeedId(1), now);
        let open = machine().accept_bet(&machine().open(RoundId(3), &seed, now), "bob").unwrap();
        let active = machine().activate(&open, "server", 300, now).unwrap();

        let expected = crash_point(&derive("server", &open.seed_chain, 3), 300);
        assert_eq!(active.crash_point, Some(expected));
        assert_eq!(active.client_seed.as_deref(), Some(open.seed_chain.as_str()));
        assert_eq!(active.server_seed_hash, hash_seed("server"));
        assert!(machine().accept_bet(&active, "late").is_err());
    }

    #[test]
    fn test_manual_cashout_before_crash() {
        let start = Utc::now();
        let round = active_round(350, start);
        let placed = bet(RoundId(1), None);
        // Progression at about 2.05x, requesting 2.00x
        let now = start + Duration::milliseconds(12_000);
        let decision = machine()
            .decide_cashout(&round, &placed, Some(Multiplier::from_hundredths(200)), now)
            .unwrap();
        assert_eq!(decision, CashoutDecision::Cashed(Multiplier::from_hundredths(200)));

        let settled = machine().cash(&placed, Multiplier::from_hundredths(200), now).unwrap();
        assert_eq!(settled.payout, Amount::from_bx(40).unwrap());
    }

    #[test]
    fn test_requested_multiplier_ahead_of_curve_is_refused() {
        let start = Utc::now();
        let placed = bet(RoundId(1), None);
        let now = start + Duration::milliseconds(1);
        let requested = Some(Multiplier::from_hundredths(120));

        // Same refusal whether the round crashes below or above the request
        for crash in [110, 2_000] {
            let round = active_round(crash, start);
            assert!(matches!(
                machine().decide_cashout(&round, &placed, requested, now),
                Err(EngineError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn test_cashout_at_or_past_crash_loses() {
        let start = Utc::now();
        let round = active_round(150, start);
        let placed = bet(RoundId(1), None);
        let late = start + Duration::milliseconds(20_000);
        assert_eq!(
            machine().decide_cashout(&round, &placed, None, late).unwrap(),
            CashoutDecision::Lost
        );
        assert_eq!(
            machine()
                .decide_cashout(&round, &placed, Some(Multiplier::from_hundredths(120)), late)
                .unwrap(),
            CashoutDecision::Lost
        );
    }

    #[test]
    fn test_terminal_bets_are_refused() {
        let round = active_round(350, Utc::now());
        let mut cashed = bet(RoundId(1), None);
        cashed.status = CrashBetStatus::Cashed;
        assert!(matches!(
            machine().decide_cashout(&round, &cashed, None, Utc::now()),
            Err(EngineError::AlreadyCashed { .. })
        ));
        cashed.status = CrashBetStatus::Lost;
        assert!(matches!(
            machine().decide_cashout(&round, &cashed, None, Utc::now()),
            Err(EngineError::GameEnded { .. })
        ));
    }

    #[test]
    fn test_auto_cashouts_due_and_resolution() {
        let start = Utc::now();
        let round = active_round(300, start);
        let low = bet(RoundId(1), Some(150));
        let high = bet(RoundId(1), Some(400));
        let bets = [low.clone(), high.clone()];

        let now = start + Duration::milliseconds(8_000);
        let due = machine().due_auto_cashouts(&round, bets.iter(), now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1.hundredths(), 150);

        let settled_low = machine().settle_at_resolution(&round, &low, now).unwrap();
        assert_eq!(settled_low.bet.status, CrashBetStatus::Cashed);
        let settled_high = machine().settle_at_resolution(&round, &high, now).unwrap();
        assert_eq!(settled_high.bet.status, CrashBetStatus::Lost);
        assert_eq!(settled_high.payout, Amount::ZERO);
    }

    #[test]
    fn test_passed_auto_target_wins_over_manual_cashout() {
        let start = Utc::now();
        let round = active_round(300, start);
        let auto = bet(RoundId(1), Some(150));
        let late = start + Duration::milliseconds(60_000);
        assert_eq!(
            machine().decide_cashout(&round, &auto, None, late).unwrap(),
            CashoutDecision::Cashed(Multiplier::from_hundredths(150))
        );
    }
}
