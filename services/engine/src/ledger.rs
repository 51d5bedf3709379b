//! Double-entry ledger
//!
//! The only producer of balance movements. Every [`Transfer`] moves an amount
//! between two accounts; the store nets transfers per account, checks the
//! non-negative guard on user wallets and journals each transfer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{AccountId, Amount, Asset, UserId};
use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};
use crate::repository::{Store, StoreError, UnitOfWork};

/// A single balance movement. Only constructible by [`Ledger`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    from: AccountId,
    to: AccountId,
    asset: Asset,
    amount: Amount,
    reference: String,
}

impl Transfer {
    pub fn debit_account(&self) -> AccountId {
        self.from
    }

    pub fn credit_account(&self) -> AccountId {
        self.to
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Journal line for this transfer
    pub fn journal_entry(&self, entry_id: u64, at: DateTime<Utc>) -> JournalEntry {
        JournalEntry {
            entry_id,
            reference: self.reference.clone(),
            debit_account: self.from,
            credit_account: self.to,
            asset: self.asset,
            amount: self.amount,
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: u64,
    pub reference: String,
    /// Account the amount left
    pub debit_account: AccountId,
    /// Account the amount arrived at
    pub credit_account: AccountId,
    pub asset: Asset,
    pub amount: Amount,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Stake movement: user wallet to house
    pub fn stake(&self, user: UserId, asset: Asset, amount: Amount, reference: &str) -> Transfer {
        Transfer {
            from: AccountId::User(user),
            to: AccountId::House,
            asset,
            amount,
            reference: reference.to_string(),
        }
    }

    /// Payout movement: house to user wallet
    pub fn payout(&self, user: UserId, asset: Asset, amount: Amount, reference: &str) -> Transfer {
        Transfer {
            from: AccountId::House,
            to: AccountId::User(user),
            asset,
            amount,
            reference: reference.to_string(),
        }
    }

    pub async fn balance(&self, user: UserId, asset: Asset) -> EngineResult<Amount> {
        let units = self.store.balance(AccountId::User(user), asset).await?;
        Ok(Amount::from_units(units.max(0) as u64))
    }

    /// House position; negative when the operator owes more than it holds
    pub async fn house_balance(&self, asset: Asset) -> EngineResult<i64> {
        Ok(self.store.balance(AccountId::House, asset).await?)
    }

    /// Remove funds from a user; fails without effect when the balance is short
    pub async fn debit(
        &self,
        user: UserId,
        asset: Asset,
        amount: Amount,
        reference: &str,
    ) -> EngineResult<JournalEntry> {
        let transfer = self.stake(user, asset, amount, reference);
        self.post(transfer, user, asset, amount).await
    }

    /// Add funds to a user. Zero is accepted and posts nothing.
    pub async fn credit(
        &self,
        user: UserId,
        asset: Asset,
        amount: Amount,
        reference: &str,
    ) -> EngineResult<Option<JournalEntry>> {
        if amount.is_zero() {
            return Ok(None);
        }
        let transfer = self.payout(user, asset, amount, reference);
        self.post(transfer, user, asset, amount).await.map(Some)
    }

    /// Move funds between two users in one atomic posting
    pub async fn transfer(
        &self,
        from: UserId,
        to: UserId,
        asset: Asset,
        amount: Amount,
        reference: &str,
    ) -> EngineResult<JournalEntry> {
        let transfer = Transfer {
            from: AccountId::User(from),
            to: AccountId::User(to),
            asset,
            amount,
            reference: reference.to_string(),
        };
        self.post(transfer, from, asset, amount).await
    }

    /// Off-platform funds arriving in a user wallet
    pub async fn deposit(
        &self,
        user: UserId,
        asset: Asset,
        amount: Amount,
        reference: &str,
    ) -> EngineResult<Option<JournalEntry>> {
        self.credit(user, asset, amount, &format!("deposit:{}", reference))
            .await
    }

    pub async fn withdraw(
        &self,
        user: UserId,
        asset: Asset,
        amount: Amount,
        reference: &str,
    ) -> EngineResult<JournalEntry> {
        self.debit(user, asset, amount, &format!("withdraw:{}", reference))
            .await
    }

    pub async fn journal(&self, reference: &str) -> EngineResult<Vec<JournalEntry>> {
        Ok(self.store.journal(reference).await?)
    }

    async fn post(
        &self,
        transfer: Transfer,
        payer: UserId,
        asset: Asset,
        amount: Amount,
    ) -> EngineResult<JournalEntry> {
        if amount.is_zero() {
            return Err(EngineError::InvalidRequest("amount must be positive".to_string()));
        }
        let mut unit = UnitOfWork::new();
        unit.transfer(transfer);
        match self.store.commit(unit).await {
            Ok(mut entries) => entries
                .pop()
                .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("posting produced no journal entry"))),
            Err(StoreError::InsufficientFunds { .. }) => {
                let available = self.balance(payer, asset).await.unwrap_or(Amount::ZERO);
                Err(EngineError::InsufficientFunds {
                    required: amount,
                    available,
                })
            }
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    fn bx(n: u64) -> Amount {
        Amount::from_bx(n).unwrap()
    }

    #[tokio::test]
    async fn test_debit_rejects_without_partial_effect() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());
        let user = UserId(1);

        ledger.deposit(user, Asset::Bx, bx(10), "seed").await.unwrap();
        let err = ledger.debit(user, Asset::Bx, bx(20), "bet").await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::InsufficientFunds { required, available } if required == bx(20) && available == bx(10)
        ));
        assert_eq!(ledger.balance(user, Asset::Bx).await.unwrap(), bx(10));
        assert!(ledger.journal("bet").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postings_are_double_entry() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());

        ledger.deposit(UserId(1), Asset::Bx, bx(50), "a").await.unwrap();
        ledger.debit(UserId(1), Asset::Bx, bx(20), "bet:1").await.unwrap();
        ledger.transfer(UserId(1), UserId(2), Asset::Bx, bx(5), "gift").await.unwrap();

        assert_eq!(store.total_balance(Asset::Bx).await.unwrap(), 0);
        assert_eq!(ledger.balance(UserId(1), Asset::Bx).await.unwrap(), bx(25));
        assert_eq!(ledger.balance(UserId(2), Asset::Bx).await.unwrap(), bx(5));
        assert_eq!(ledger.house_balance(Asset::Bx).await.unwrap(), -30_000_000);
    }

    #[tokio::test]
    async fn test_assets_are_independent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store);

        ledger.deposit(UserId(3), Asset::Usdt, bx(100), "usdt-in").await.unwrap();
        assert_eq!(ledger.balance(UserId(3), Asset::Bx).await.unwrap(), Amount::ZERO);
        assert!(ledger.withdraw(UserId(3), Asset::Bx, bx(1), "out").await.is_err());
        let entry = ledger.withdraw(UserId(3), Asset::Usdt, bx(40), "out").await.unwrap();
        assert_eq!(entry.reference, "withdraw:out");
        assert_eq!(ledger.balance(UserId(3), Asset::Usdt).await.unwrap(), bx(60));
    }

    #[tokio::test]
    async fn test_zero_credit_is_a_no_op() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());

        assert!(ledger.credit(UserId(1), Asset::Bx, Amount::ZERO, "noop").await.unwrap().is_none());
        assert!(ledger.deposit(UserId(1), Asset::Bx, Amount::ZERO, "noop").await.unwrap().is_none());
        assert!(ledger.journal("noop").await.unwrap().is_empty());
        assert_eq!(store.total_balance(Asset::Bx).await.unwrap(), 0);

        // Removing nothing is still a malformed request
        assert!(matches!(
            ledger.debit(UserId(1), Asset::Bx, Amount::ZERO, "noop").await,
            Err(EngineError::InvalidRequest(_))
        ));
    }
}
