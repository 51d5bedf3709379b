//! Translation between units of work / rows and their Redis encoding

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

use super::keys::*;
use crate::ledger::JournalEntry;
use crate::repository::{Row, StoreError, StoreResult, UnitOfWork, Versioned};

#[derive(Debug, Serialize)]
pub struct CommitPlan {
    pub accounts_index: &'static str,
    pub balances: Vec<BalanceOp>,
    pub rows: Vec<RowOp>,
    pub set_adds: Vec<SetAdd>,
    pub max_values: Vec<MaxValue>,
    pub journal: Vec<JournalOp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency: Option<KeyValue>,
}

#[derive(Debug, Serialize)]
pub struct BalanceOp {
    pub key: String,
    pub asset: &'static str,
    /// Signed integer as a string so Lua never sees a float
    pub delta: String,
    pub guard: bool,
}

#[derive(Debug, Serialize)]
pub struct RowOp {
    pub key: String,
    pub expected: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct SetAdd {
    pub key: String,
    pub member: String,
}

#[derive(Debug, Serialize)]
pub struct MaxValue {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct JournalOp {
    pub key: String,
    pub entry: String,
}

#[derive(Debug, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

fn to_json<T: Serialize>(key: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupted {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn from_json<T: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupted {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Serialize the record inside a row; the key already names the table
pub fn encode_row(row: &Row) -> StoreResult<String> {
    let key = row.key().to_string();
    match row {
        Row::Round(r) => to_json(&key, r),
        Row::CrashBet(b) => to_json(&key, b),
        Row::Session(s) => to_json(&key, s),
        Row::Seed(s) => to_json(&key, s),
    }
}

/// Decode a `{version, data}` hash; an empty hash is a missing row
pub fn decode_row<T: DeserializeOwned>(
    key: &str,
    map: &HashMap<String, String>,
) -> StoreResult<Option<Versioned<T>>> {
    if map.is_empty() {
        return Ok(None);
    }
    let corrupted = |reason: &str| StoreError::Corrupted {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let version = map
        .get("version")
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| corrupted("missing or invalid version"))?;
    let data = map.get("data").ok_or_else(|| corrupted("missing data"))?;
    Ok(Some(Versioned {
        version,
        record: from_json(key, data)?,
    }))
}

pub fn decode_json<T: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<T> {
    from_json(key, raw)
}

pub fn encode_json<T: Serialize>(key: &str, value: &T) -> StoreResult<String> {
    to_json(key, value)
}

/// Build the script plan for a unit. Journal entries get ids starting at
/// `first_entry_id`; the entries are returned so the caller can hand them back.
pub fn build_plan(
    unit: &UnitOfWork,
    first_entry_id: u64,
    at: DateTime<Utc>,
) -> StoreResult<(CommitPlan, Vec<JournalEntry>)> {
    let balances = unit
        .net_postings()?
        .into_iter()
        .map(|(account, asset, delta)| BalanceOp {
            key: balance_key(&account),
            asset: asset.as_str(),
            delta: delta.to_string(),
            guard: account.must_stay_non_negative(),
        })
        .collect();

    let mut rows = Vec::with_capacity(unit.writes().len());
    let mut set_adds = Vec::new();
    let mut max_values = Vec::new();
    for write in unit.writes() {
        rows.push(RowOp {
            key: row_key(write.row.key()),
            expected: write.expected_version.to_string(),
            data: encode_row(&write.row)?,
        });
        if write.expected_version == 0 {
            match &write.row {
                Row::CrashBet(bet) => set_adds.push(SetAdd {
                    key: round_bets_key(bet.round_id),
                    member: bet.bet_id.to_string(),
                }),
                Row::Round(round) => max_values.push(MaxValue {
                    key: latest_round_key(),
                    value: round.round_id.to_string(),
                }),
                _ => {}
            }
        }
    }

    let mut entries = Vec::with_capacity(unit.transfers().len());
    let mut journal = Vec::with_capacity(unit.transfers().len());
    for (offset, transfer) in unit.transfers().iter().enumerate() {
        let entry = transfer.journal_entry(first_entry_id + offset as u64, at);
        let key = journal_key(&entry.reference);
        journal.push(JournalOp {
            entry: to_json(&key, &entry)?,
            key,
        });
        entries.push(entry);
    }

    let idempotency = match unit.idempotency() {
        Some(record) => {
            let key = idempotency_key(&record.key);
            Some(KeyValue {
                value: to_json(&key, &record.outcome)?,
                key,
            })
        }
        None => None,
    };

    Ok((
        CommitPlan {
            accounts_index: accounts_index_key(),
            balances,
            rows,
            set_adds,
            max_values,
            journal,
            idempotency,
        },
        entries,
    ))
}
