use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Amount, BetId, GameKind, Multiplier, RoundId, SeedId, SessionId, UserId};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Open,
    Active,
    Resolved,
}

/// One Crash round. Never deleted; resolved rounds stay queryable for audits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub round_id: RoundId,
    pub seed_id: SeedId,
    /// Published when the round opens, before any bet is accepted
    pub server_seed_hash: String,
    /// Revealed only once the round has resolved
    pub server_seed: Option<String>,
    /// Running hash over the client seeds of every bet placed in the round
    pub seed_chain: String,
    /// Fixed from `seed_chain` when betting closes
    pub client_seed: Option<String>,
    pub crash_point: Option<Multiplier>,
    pub house_edge_bps: Option<u32>,
    pub status: RoundStatus,
    pub bet_count: u32,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrashBetStatus {
    Placed,
    Cashed,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashBet {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub stake: Amount,
    pub client_seed: String,
    /// Target the bet cashes out at automatically once the live multiplier passes it
    pub auto_cashout: Option<Multiplier>,
    pub status: CrashBetStatus,
    pub cashout_multiplier: Option<Multiplier>,
    pub payout: Amount,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Playing,
    Lost,
    Cashed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Playing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChickenSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub stake: Amount,
    pub seed_id: SeedId,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub step: u32,
    pub status: SessionStatus,
    pub payout: Amount,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Committed server seed. The hash is public from creation; the seed is
/// only handed out once `revealed_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeedPair {
    pub seed_id: SeedId,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub created_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
}

/// Per-game limits, edited by the admin surface and read on every bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSettings {
    pub game: GameKind,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub house_edge_bps: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    pub user_id: UserId,
    pub game: GameKind,
    pub stake: Amount,
    pub client_seed: String,
    /// Crash only: cash out automatically at this multiplier
    #[serde(default)]
    pub auto_cashout: Option<Multiplier>,
    /// Idempotency key supplied by the caller
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ticket {
    Bet { bet_id: BetId, round_id: RoundId },
    Session { session_id: SessionId },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceBetReceipt {
    pub game: GameKind,
    pub ticket: Ticket,
    pub committed_seed_hash: String,
    pub stake: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutcome {
    pub session_id: SessionId,
    pub alive: bool,
    pub step: u32,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CashoutTarget {
    Bet {
        bet_id: BetId,
        #[serde(default)]
        multiplier: Option<Multiplier>,
    },
    Session { session_id: SessionId },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashoutReceipt {
    pub target: CashoutTarget,
    pub multiplier: Multiplier,
    pub payout: Amount,
}

/// Everything needed to recompute a round's crash point independently
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundReveal {
    pub round_id: RoundId,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
    pub house_edge_bps: u32,
    pub crash_point: Multiplier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionReveal {
    pub session_id: SessionId,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    /// Nonces drawn: 0..=last_step for a lost session, 0..step for a cashed one
    pub steps_drawn: u32,
    pub status: SessionStatus,
}

/// Public view of a round; never exposes the crash point before resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundView {
    pub round_id: RoundId,
    pub status: RoundStatus,
    pub server_seed_hash: String,
    pub bet_count: u32,
    pub live_multiplier: Option<Multiplier>,
    pub crash_point: Option<Multiplier>,
    pub created_at: DateTime<Utc>,
}

/// Recorded outcome of a request carrying an idempotency key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IdempotentOutcome {
    Placed(PlaceBetReceipt),
    Stepped(StepOutcome),
    Cashed(CashoutReceipt),
    Lost { target: CashoutTarget },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementEventKind {
    BetPlaced,
    BetCashed,
    BetLost,
    SessionStarted,
    SessionStepped,
    SessionCashed,
    SessionLost,
    RoundOpened,
    RoundActivated,
    RoundResolved,
}

/// Emitted after a transition has committed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub event_id: Uuid,
    pub kind: SettlementEventKind,
    pub user_id: Option<UserId>,
    pub reference: String,
    pub amount: Option<Amount>,
    pub at: DateTime<Utc>,
}

impl SettlementEvent {
    pub fn new(kind: SettlementEventKind, reference: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            user_id: None,
            reference: reference.into(),
            amount: None,
            at,
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Ledger reference used for every journal line of a crash bet
pub fn bet_reference(bet_id: BetId) -> String {
    format!("crash:bet:{}", bet_id)
}

/// Ledger reference used for every journal line of a chicken session
pub fn session_reference(session_id: SessionId) -> String {
    format!("chicken:session:{}", session_id)
}

pub fn round_reference(round_id: RoundId) -> String {
    format!("crash:round:{}", round_id)
}
