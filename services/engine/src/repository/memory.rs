//! In-process store
//!
//! One mutex around every table gives linearizable commits. Used by tests
//! and by single-node deployments that run the round driver embedded.

use async_trait::async_trait;
use chrono::Utc;
use shared::{AccountId, Asset, BetId, GameKind, RoundId, SeedId, SessionId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{Row, RowKey, Sequence, Store, StoreError, StoreResult, UnitOfWork, Versioned};
use crate::domain::{ChickenSession, CrashBet, GameSettings, IdempotentOutcome, Round, SeedPair};
use crate::ledger::JournalEntry;

#[derive(Default)]
struct Tables {
    balances: HashMap<(AccountId, Asset), i64>,
    rows: BTreeMap<RowKey, (u64, Row)>,
    round_bets: HashMap<RoundId, Vec<BetId>>,
    latest_round: Option<RoundId>,
    idempotency: HashMap<String, IdempotentOutcome>,
    journal: Vec<JournalEntry>,
    sequences: HashMap<Sequence, u64>,
    settings: HashMap<GameKind, GameSettings>,
}

impl Tables {
    fn row(&self, key: RowKey) -> Option<(u64, Row)> {
        self.rows.get(&key).cloned()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` until restored
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    async fn load<T>(&self, key: RowKey, pick: impl Fn(Row) -> Option<T>) -> StoreResult<Option<Versioned<T>>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        match tables.row(key) {
            Some((version, row)) => pick(row)
                .map(|record| Some(Versioned { version, record }))
                .ok_or_else(|| StoreError::Corrupted {
                    key: key.to_string(),
                    reason: "row stored under the wrong table".to_string(),
                }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn balance(&self, account: AccountId, asset: Asset) -> StoreResult<i64> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.balances.get(&(account, asset)).copied().unwrap_or(0))
    }

    async fn total_balance(&self, asset: Asset) -> StoreResult<i64> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .balances
            .iter()
            .filter(|((_, a), _)| *a == asset)
            .map(|(_, v)| *v)
            .sum())
    }

    async fn commit(&self, unit: UnitOfWork) -> StoreResult<Vec<JournalEntry>> {
        self.check_online()?;
        let postings = unit.net_postings()?;
        let mut tables = self.tables.lock().await;

        for (account, asset, delta) in &postings {
            let current = tables.balances.get(&(*account, *asset)).copied().unwrap_or(0);
            if account.must_stay_non_negative() && current + delta < 0 {
                return Err(StoreError::InsufficientFunds {
                    account: account.key(),
                    asset: *asset,
                });
            }
        }

        for write in unit.writes() {
            let key = write.row.key();
            let current = tables.rows.get(&key).map(|(v, _)| *v).unwrap_or(0);
            if current != write.expected_version {
                return Err(StoreError::Conflict(key.to_string()));
            }
        }

        if let Some(record) = unit.idempotency() {
            if tables.idempotency.contains_key(&record.key) {
                return Err(StoreError::Duplicate(record.key.clone()));
            }
        }

        for (account, asset, delta) in postings {
            *tables.balances.entry((account, asset)).or_insert(0) += delta;
        }

        for write in unit.writes() {
            if write.expected_version == 0 {
                match &write.row {
                    Row::CrashBet(bet) => tables
                        .round_bets
                        .entry(bet.round_id)
                        .or_default()
                        .push(bet.bet_id),
                    Row::Round(round) => {
                        tables.latest_round = tables.latest_round.max(Some(round.round_id));
                    }
                    _ => {}
                }
            }
            tables
                .rows
                .insert(write.row.key(), (write.expected_version + 1, write.row.clone()));
        }

        let now = Utc::now();
        let mut written = Vec::with_capacity(unit.transfers().len());
        for transfer in unit.transfers() {
            let entry_id = tables.journal.len() as u64 + 1;
            let entry = transfer.journal_entry(entry_id, now);
            tables.journal.push(entry.clone());
            written.push(entry);
        }

        if let Some(record) = unit.idempotency() {
            tables
                .idempotency
                .insert(record.key.clone(), record.outcome.clone());
        }

        Ok(written)
    }

    async fn round(&self, round_id: RoundId) -> StoreResult<Option<Versioned<Round>>> {
        self.load(RowKey::Round(round_id), |row| match row {
            Row::Round(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn latest_round(&self) -> StoreResult<Option<Versioned<Round>>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let latest = tables
            .latest_round
            .and_then(|round_id| tables.row(RowKey::Round(round_id)))
            .and_then(|(version, row)| match row {
                Row::Round(record) => Some(Versioned { version, record }),
                _ => None,
            });
        Ok(latest)
    }

    async fn crash_bet(&self, bet_id: BetId) -> StoreResult<Option<Versioned<CrashBet>>> {
        self.load(RowKey::CrashBet(bet_id), |row| match row {
            Row::CrashBet(b) => Some(b),
            _ => None,
        })
        .await
    }

    async fn bets_for_round(&self, round_id: RoundId) -> StoreResult<Vec<Versioned<CrashBet>>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let ids = tables.round_bets.get(&round_id).cloned().unwrap_or_default();
        let mut bets = Vec::with_capacity(ids.len());
        for bet_id in ids {
            if let Some((version, Row::CrashBet(bet))) = tables.row(RowKey::CrashBet(bet_id)) {
                bets.push(Versioned { version, record: bet });
            }
        }
        Ok(bets)
    }

    async fn session(&self, session_id: SessionId) -> StoreResult<Option<Versioned<ChickenSession>>> {
        self.load(RowKey::Session(session_id), |row| match row {
            Row::Session(s) => Some(s),
            _ => None,
        })
        .await
    }

    async fn seed(&self, seed_id: SeedId) -> StoreResult<Option<Versioned<SeedPair>>> {
        self.load(RowKey::Seed(seed_id), |row| match row {
            Row::Seed(s) => Some(s),
            _ => None,
        })
        .await
    }

    async fn idempotent_outcome(&self, key: &str) -> StoreResult<Option<IdempotentOutcome>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.idempotency.get(key).cloned())
    }

    async fn journal(&self, reference: &str) -> StoreResult<Vec<JournalEntry>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .journal
            .iter()
            .filter(|e| e.reference == reference)
            .cloned()
            .collect())
    }

    async fn next_id(&self, sequence: Sequence) -> StoreResult<u64> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let next = tables.sequences.entry(sequence).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn game_settings(&self, game: GameKind) -> StoreResult<Option<GameSettings>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.settings.get(&game).cloned())
    }

    async fn put_game_settings(&self, settings: &GameSettings) -> StoreResult<()> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        tables.settings.insert(settings.game, settings.clone());
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_online()
    }
}
