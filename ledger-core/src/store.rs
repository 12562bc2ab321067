//! Ledger operation contract
//!
//! Every backend implements [`AccountStore`] with identical semantics:
//!
//! - Each call either fully succeeds or leaves no visible effect
//! - Balances are never observed negative
//! - A balance change and its [`Transaction`] record become visible together
//! - Nothing is retried internally

use crate::{
    config::Backend,
    money::MoneyAmount,
    types::{Account, AccountId, BalanceChange, Transaction, TransferResult},
    Error, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Account and transfer storage
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Which backend this is
    fn backend(&self) -> Backend;

    /// Open a new account with a fresh, never reused id
    async fn create_account(&self, initial_balance: MoneyAmount) -> Result<Account>;

    /// Remove an account; its past transactions stay readable
    async fn delete_account(&self, id: AccountId) -> Result<()>;

    /// Consistent snapshot of one account
    async fn get_account(&self, id: AccountId) -> Result<Account>;

    /// Credit money from outside the ledger
    async fn deposit(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange>;

    /// Debit money to outside the ledger
    async fn withdraw(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange>;

    /// Move money between two accounts and record it
    async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: MoneyAmount,
    ) -> Result<TransferResult>;

    /// Transactions touching `account_id` in the last `last_n_days` days,
    /// newest first, at most `limit` of them.
    ///
    /// Account existence is not checked, so history of a deleted account
    /// stays readable.
    async fn transaction_history(
        &self,
        account_id: AccountId,
        last_n_days: u32,
        limit: usize,
    ) -> Result<Vec<Transaction>>;

    /// Release backend resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Every stored amount must fit in `i64` minor units
fn ensure_representable(amount: MoneyAmount) -> Result<()> {
    match amount.minor_units() {
        Some(_) => Ok(()),
        None => Err(Error::InvalidAmount(format!(
            "amount out of range: {}",
            amount
        ))),
    }
}

/// Reject zero, negative and unrepresentable amounts
pub(crate) fn ensure_positive(amount: MoneyAmount) -> Result<()> {
    if !amount.is_positive() {
        return Err(Error::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    ensure_representable(amount)
}

/// Reject negative and unrepresentable opening balances
pub(crate) fn ensure_opening_balance(balance: MoneyAmount) -> Result<()> {
    if balance.is_negative() {
        return Err(Error::InvalidAmount(format!(
            "opening balance must not be negative, got {}",
            balance
        )));
    }
    ensure_representable(balance)
}

/// Balance after crediting `amount`; must stay within `i64` minor units
pub(crate) fn credited(
    account: AccountId,
    balance: MoneyAmount,
    amount: MoneyAmount,
) -> Result<MoneyAmount> {
    balance
        .checked_add(amount)
        .filter(|sum| sum.minor_units().is_some())
        .ok_or_else(|| overflow(account))
}

pub(crate) fn ensure_distinct(from: AccountId, to: AccountId) -> Result<()> {
    if from == to {
        Err(Error::SameAccount(from))
    } else {
        Ok(())
    }
}

pub(crate) fn overflow(account: AccountId) -> Error {
    Error::InvalidAmount(format!("balance of account {} would overflow", account))
}

/// Oldest timestamp included in a `last_n_days` window
pub(crate) fn history_cutoff(now: DateTime<Utc>, last_n_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(last_n_days))
}
