//! Redis key layout
//!
//! Keeps every key pattern in one place so the Lua commit script and the
//! read paths agree.

use shared::{AccountId, GameKind, RoundId};

use crate::repository::RowKey;

const BALANCE_PREFIX: &str = "balance:";
const ROW_PREFIX: &str = "row:";
const JOURNAL_PREFIX: &str = "journal:";
const IDEMPOTENCY_PREFIX: &str = "idem:";
const SEQUENCE_PREFIX: &str = "seq:";
const GAME_SETTINGS_PREFIX: &str = "game_settings:";

/// Every account hash that has ever been posted to
const ACCOUNTS_INDEX: &str = "ledger:accounts";

/// Highest round id inserted so far
const LATEST_ROUND: &str = "rounds:latest";

const JOURNAL_SEQUENCE: &str = "seq:journal";

/// Hash of asset -> balance for one account
pub fn balance_key(account: &AccountId) -> String {
    format!("{}{}", BALANCE_PREFIX, account.key())
}

/// Inverse of [`balance_key`], used when decoding script replies
pub fn account_from_balance_key(key: &str) -> &str {
    key.strip_prefix(BALANCE_PREFIX).unwrap_or(key)
}

/// Hash holding `version` and `data` for one row
pub fn row_key(key: RowKey) -> String {
    format!("{}{}", ROW_PREFIX, key)
}

pub fn round_bets_key(round_id: RoundId) -> String {
    format!("round:{}:bets", round_id)
}

pub fn journal_key(reference: &str) -> String {
    format!("{}{}", JOURNAL_PREFIX, reference)
}

pub fn idempotency_key(key: &str) -> String {
    format!("{}{}", IDEMPOTENCY_PREFIX, key)
}

pub fn sequence_key(name: &str) -> String {
    format!("{}{}", SEQUENCE_PREFIX, name)
}

pub fn game_settings_key(game: GameKind) -> String {
    format!("{}{}", GAME_SETTINGS_PREFIX, game)
}

pub fn accounts_index_key() -> &'static str {
    ACCOUNTS_INDEX
}

pub fn latest_round_key() -> &'static str {
    LATEST_ROUND
}

pub fn journal_sequence_key() -> &'static str {
    JOURNAL_SEQUENCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{BetId, UserId};

    #[test]
    fn test_balance_key_roundtrip() {
        let key = balance_key(&AccountId::User(UserId(42)));
        assert_eq!(key, "balance:user:42");
        assert_eq!(account_from_balance_key(&key), "user:42");
        assert_eq!(balance_key(&AccountId::House), "balance:house");
    }

    #[test]
    fn test_row_keys() {
        assert_eq!(row_key(RowKey::CrashBet(BetId(7))), "row:bet:7");
        assert_eq!(row_key(RowKey::Round(RoundId(3))), "row:round:3");
        assert_eq!(round_bets_key(RoundId(3)), "round:3:bets");
    }

    #[test]
    fn test_index_keys_are_constants() {
        assert_eq!(accounts_index_key(), "ledger:accounts");
        assert_eq!(latest_round_key(), "rounds:latest");
        assert_eq!(sequence_key("bet"), "seq:bet");
        assert_eq!(game_settings_key(GameKind::Chicken), "game_settings:chicken");
    }
}
