//! Persistence for balances, game rows, journal and idempotency records
//!
//! Every state change is expressed as a [`UnitOfWork`] and committed by the
//! store all-or-nothing: balance guards are checked first, then row versions,
//! then the idempotency key, and only then is anything written.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{AccountId, Asset, BetId, GameKind, RoundId, SeedId, SessionId};
use std::collections::HashMap;

use crate::domain::{ChickenSession, CrashBet, GameSettings, IdempotentOutcome, Round, SeedPair};
use crate::ledger::{JournalEntry, Transfer};

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("insufficient {asset} balance on {account}")]
    InsufficientFunds { account: String, asset: Asset },

    #[error("version conflict on {0}")]
    Conflict(String),

    #[error("idempotency key already used: {0}")]
    Duplicate(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupted record {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Identifier sequences handed out by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Bet,
    Session,
    Seed,
}

impl Sequence {
    pub fn name(&self) -> &'static str {
        match self {
            Sequence::Bet => "bet",
            Sequence::Session => "session",
            Sequence::Seed => "seed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Round(RoundId),
    CrashBet(BetId),
    Session(SessionId),
    Seed(SeedId),
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKey::Round(id) => write!(f, "round:{}", id),
            RowKey::CrashBet(id) => write!(f, "bet:{}", id),
            RowKey::Session(id) => write!(f, "session:{}", id),
            RowKey::Seed(id) => write!(f, "seed:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum Row {
    Round(Round),
    CrashBet(CrashBet),
    Session(ChickenSession),
    Seed(SeedPair),
}

impl Row {
    pub fn key(&self) -> RowKey {
        match self {
            Row::Round(r) => RowKey::Round(r.round_id),
            Row::CrashBet(b) => RowKey::CrashBet(b.bet_id),
            Row::Session(s) => RowKey::Session(s.session_id),
            Row::Seed(s) => RowKey::Seed(s.seed_id),
        }
    }
}

/// A record together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// Row write guarded by the version the caller read. Version 0 means the
/// row must not exist yet.
#[derive(Debug, Clone)]
pub struct RowWrite {
    pub row: Row,
    pub expected_version: u64,
}

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub outcome: IdempotentOutcome,
}

/// Everything one transition changes, committed atomically
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    transfers: Vec<Transfer>,
    writes: Vec<RowWrite>,
    idempotency: Option<IdempotencyRecord>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer(&mut self, transfer: Transfer) -> &mut Self {
        self.transfers.push(transfer);
        self
    }

    pub fn insert(&mut self, row: Row) -> &mut Self {
        self.writes.push(RowWrite {
            row,
            expected_version: 0,
        });
        self
    }

    pub fn update(&mut self, row: Row, expected_version: u64) -> &mut Self {
        self.writes.push(RowWrite {
            row,
            expected_version,
        });
        self
    }

    pub fn remember(&mut self, key: Option<String>, outcome: IdempotentOutcome) -> &mut Self {
        if let Some(key) = key {
            self.idempotency = Some(IdempotencyRecord { key, outcome });
        }
        self
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn writes(&self) -> &[RowWrite] {
        &self.writes
    }

    pub fn idempotency(&self) -> Option<&IdempotencyRecord> {
        self.idempotency.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty() && self.writes.is_empty() && self.idempotency.is_none()
    }

    /// Net balance change per (account, asset), in first-seen order
    pub fn net_postings(&self) -> StoreResult<Vec<(AccountId, Asset, i64)>> {
        let mut order = Vec::new();
        let mut deltas: HashMap<(AccountId, Asset), i64> = HashMap::new();
        for transfer in &self.transfers {
            let amount = transfer.amount().to_signed().map_err(|e| StoreError::Corrupted {
                key: transfer.reference().to_string(),
                reason: e.to_string(),
            })?;
            for (account, delta) in [
                (transfer.debit_account(), -amount),
                (transfer.credit_account(), amount),
            ] {
                let slot = (account, transfer.asset());
                if !deltas.contains_key(&slot) {
                    order.push(slot);
                }
                let entry = deltas.entry(slot).or_insert(0);
                *entry = entry.checked_add(delta).ok_or_else(|| StoreError::Corrupted {
                    key: account.key(),
                    reason: "balance delta overflow".to_string(),
                })?;
            }
        }
        Ok(order
            .into_iter()
            .map(|slot| (slot.0, slot.1, deltas.get(&slot).copied().unwrap_or(0)))
            .collect())
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn balance(&self, account: AccountId, asset: Asset) -> StoreResult<i64>;

    /// Sum over every account for one asset; constant under transfers
    async fn total_balance(&self, asset: Asset) -> StoreResult<i64>;

    /// Apply a unit of work atomically, returning the journal entries written
    async fn commit(&self, unit: UnitOfWork) -> StoreResult<Vec<JournalEntry>>;

    async fn round(&self, round_id: RoundId) -> StoreResult<Option<Versioned<Round>>>;
    async fn latest_round(&self) -> StoreResult<Option<Versioned<Round>>>;
    async fn crash_bet(&self, bet_id: BetId) -> StoreResult<Option<Versioned<CrashBet>>>;
    async fn bets_for_round(&self, round_id: RoundId) -> StoreResult<Vec<Versioned<CrashBet>>>;
    async fn session(&self, session_id: SessionId) -> StoreResult<Option<Versioned<ChickenSession>>>;
    async fn seed(&self, seed_id: SeedId) -> StoreResult<Option<Versioned<SeedPair>>>;

    async fn idempotent_outcome(&self, key: &str) -> StoreResult<Option<IdempotentOutcome>>;
    async fn journal(&self, reference: &str) -> StoreResult<Vec<JournalEntry>>;
    async fn next_id(&self, sequence: Sequence) -> StoreResult<u64>;

    async fn game_settings(&self, game: GameKind) -> StoreResult<Option<GameSettings>>;
    async fn put_game_settings(&self, settings: &GameSettings) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}
