//! Redis-backed store
//!
//! Balances live in per-account hashes, rows in `{version, data}` hashes,
//! the journal in per-reference lists and the round index in sets. Every
//! commit runs as a single Lua script so guards and writes are atomic.

mod codec;
mod keys;
mod lua_scripts;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use shared::{AccountId, Asset, BetId, GameKind, RoundId, SeedId, SessionId};
use std::collections::HashMap;

use super::{RowKey, Sequence, Store, StoreError, StoreResult, UnitOfWork, Versioned};
use crate::domain::{ChickenSession, CrashBet, GameSettings, IdempotentOutcome, Round, SeedPair};
use crate::ledger::JournalEntry;

pub use codec::*;
pub use keys::*;
pub use lua_scripts::*;

#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let redis = client.get_connection_manager().await?;
        Ok(Self::new(redis))
    }

    async fn load_row<T: DeserializeOwned>(&self, key: RowKey) -> StoreResult<Option<Versioned<T>>> {
        let mut redis_conn = self.redis.clone();
        let key = row_key(key);
        let map: HashMap<String, String> = redis_conn.hgetall(&key).await?;
        decode_row(&key, &map)
    }

    fn script_failure(reply: &[String]) -> StoreError {
        let arg = |i: usize| reply.get(i).cloned().unwrap_or_default();
        match reply.first().map(String::as_str) {
            Some("insufficient_funds") => {
                let account = account_from_balance_key(&arg(1)).to_string();
                match arg(2).parse::<Asset>() {
                    Ok(asset) => StoreError::InsufficientFunds { account, asset },
                    Err(e) => StoreError::Corrupted {
                        key: account,
                        reason: e.to_string(),
                    },
                }
            }
            Some("conflict") => StoreError::Conflict(arg(1)),
            Some("duplicate") => StoreError::Duplicate(arg(1)),
            other => StoreError::Corrupted {
                key: "commit".to_string(),
                reason: format!("unexpected script reply {:?}", other),
            },
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn balance(&self, account: AccountId, asset: Asset) -> StoreResult<i64> {
        let mut redis_conn = self.redis.clone();
        let balance: Option<i64> = redis_conn.hget(balance_key(&account), asset.as_str()).await?;
        Ok(balance.unwrap_or(0))
    }

    async fn total_balance(&self, asset: Asset) -> StoreResult<i64> {
        let mut redis_conn = self.redis.clone();
        let accounts: Vec<String> = redis_conn.smembers(accounts_index_key()).await?;
        let mut total = 0i64;
        for key in accounts {
            let balance: Option<i64> = redis_conn.hget(&key, asset.as_str()).await?;
            total += balance.unwrap_or(0);
        }
        Ok(total)
    }

    async fn commit(&self, unit: UnitOfWork) -> StoreResult<Vec<JournalEntry>> {
        let mut redis_conn = self.redis.clone();

        let transfer_count = unit.transfers().len() as u64;
        let first_entry_id = if transfer_count > 0 {
            let last: u64 = redis_conn
                .incr(journal_sequence_key(), transfer_count)
                .await?;
            last - transfer_count + 1
        } else {
            0
        };

        let (plan, entries) = build_plan(&unit, first_entry_id, Utc::now())?;
        let plan_json = encode_json("commit", &plan)?;

        let reply: Vec<String> = Script::new(COMMIT_UNIT_SCRIPT)
            .arg(plan_json)
            .invoke_async(&mut redis_conn)
            .await?;

        if reply.first().map(String::as_str) == Some("ok") {
            Ok(entries)
        } else {
            Err(Self::script_failure(&reply))
        }
    }

    async fn round(&self, round_id: RoundId) -> StoreResult<Option<Versioned<Round>>> {
        self.load_row(RowKey::Round(round_id)).await
    }

    async fn latest_round(&self) -> StoreResult<Option<Versioned<Round>>> {
        let mut redis_conn = self.redis.clone();
        let latest: Option<u64> = redis_conn.get(latest_round_key()).await?;
        match latest {
            Some(id) => self.round(RoundId(id)).await,
            None => Ok(None),
        }
    }

    async fn crash_bet(&self, bet_id: BetId) -> StoreResult<Option<Versioned<CrashBet>>> {
        self.load_row(RowKey::CrashBet(bet_id)).await
    }

    async fn bets_for_round(&self, round_id: RoundId) -> StoreResult<Vec<Versioned<CrashBet>>> {
        let mut redis_conn = self.redis.clone();
        let members: Vec<String> = redis_conn.smembers(round_bets_key(round_id)).await?;
        let mut ids: Vec<u64> = members.iter().filter_map(|m| m.parse().ok()).collect();
        ids.sort_unstable();

        let mut bets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bet) = self.crash_bet(BetId(id)).await? {
                bets.push(bet);
            }
        }
        Ok(bets)
    }

    async fn session(&self, session_id: SessionId) -> StoreResult<Option<Versioned<ChickenSession>>> {
        self.load_row(RowKey::Session(session_id)).await
    }

    async fn seed(&self, seed_id: SeedId) -> StoreResult<Option<Versioned<SeedPair>>> {
        self.load_row(RowKey::Seed(seed_id)).await
    }

    async fn idempotent_outcome(&self, key: &str) -> StoreResult<Option<IdempotentOutcome>> {
        let mut redis_conn = self.redis.clone();
        let key = idempotency_key(key);
        let raw: Option<String> = redis_conn.get(&key).await?;
        raw.map(|r| decode_json(&key, &r)).transpose()
    }

    async fn journal(&self, reference: &str) -> StoreResult<Vec<JournalEntry>> {
        let mut redis_conn = self.redis.clone();
        let key = journal_key(reference);
        let raw: Vec<String> = redis_conn.lrange(&key, 0, -1).await?;
        raw.iter().map(|r| decode_json(&key, r)).collect()
    }

    async fn next_id(&self, sequence: Sequence) -> StoreResult<u64> {
        let mut redis_conn = self.redis.clone();
        let next: u64 = redis_conn.incr(sequence_key(sequence.name()), 1u64).await?;
        Ok(next)
    }

    async fn game_settings(&self, game: GameKind) -> StoreResult<Option<GameSettings>> {
        let mut redis_conn = self.redis.clone();
        let key = game_settings_key(game);
        let raw: Option<String> = redis_conn.get(&key).await?;
        raw.map(|r| decode_json(&key, &r)).transpose()
    }

    async fn put_game_settings(&self, settings: &GameSettings) -> StoreResult<()> {
        let mut redis_conn = self.redis.clone();
        let key = game_settings_key(settings.game);
        let raw = encode_json(&key, settings)?;
        let _: () = redis_conn.set(&key, raw).await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut redis_conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut redis_conn).await?;
        Ok(())
    }
}
