use chrono::{DateTime, Utc};
use shared::{Amount, Multiplier, SessionId, UserId};

use crate::domain::{ChickenSession, SeedPair, SessionStatus};
use crate::errors::{EngineError, EngineResult};
use crate::fairness::ChickenCurve;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Survived,
    Died,
}

#[derive(Debug, Clone, Copy)]
pub struct ChickenMachine {
    curve: ChickenCurve,
}

impl ChickenMachine {
    pub fn new(curve: ChickenCurve) -> Self {
        Self { curve }
    }

    pub fn curve(&self) -> ChickenCurve {
        self.curve
    }

    pub fn start(
        &self,
        session_id: SessionId,
        user_id: UserId,
        stake: Amount,
        seed: &SeedPair,
        client_seed: &str,
        at: DateTime<Utc>,
    ) -> ChickenSession {
        ChickenSession {
            session_id,
            user_id,
            stake,
            seed_id: seed.seed_id,
            server_seed_hash: seed.server_seed_hash.clone(),
            client_seed: client_seed.to_string(),
            step: 0,
            status: SessionStatus::Playing,
            payout: Amount::ZERO,
            started_at: at,
            ended_at: None,
        }
    }

    /// Draw the next step with nonce = steps completed so far
    pub fn step(
        &self,
        session: &ChickenSession,
        server_seed: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<(ChickenSession, StepResult)> {
        check_playing(session)?;
        let mut next = session.clone();
        if self.curve.survives(server_seed, &session.client_seed, session.step) {
            next.step += 1;
            Ok((next, StepResult::Survived))
        } else {
            next.status = SessionStatus::Lost;
            next.ended_at = Some(at);
            Ok((next, StepResult::Died))
        }
    }

    /// Payout = stake * (1 + step * increment)
    pub fn cashout(
        &self,
        session: &ChickenSession,
        at: DateTime<Utc>,
    ) -> EngineResult<(ChickenSession, Multiplier, Amount)> {
        check_playing(session)?;
        let multiplier = self.curve.payout_multiplier(session.step);
        let payout = session.stake.times(multiplier)?;
        let mut next = session.clone();
        next.status = SessionStatus::Cashed;
        next.payout = payout;
        next.ended_at = Some(at);
        Ok((next, multiplier, payout))
    }
}

pub fn check_playing(session: &ChickenSession) -> EngineResult<()> {
    match session.status {
        SessionStatus::Playing => Ok(()),
        SessionStatus::Lost => Err(ended(session, "lost")),
        SessionStatus::Cashed => Err(ended(session, "cashed")),
    }
}

fn ended(session: &ChickenSession, state: &str) -> EngineError {
    EngineError::GameEnded {
        target: format!("session {}", session.session_id),
        state: state.to_string(),
    }
}
