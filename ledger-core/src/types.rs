//! Core types for the ledger
//!
//! Identifiers are plain integers assigned by the ledger. Money is always a
//! [`MoneyAmount`], never a float.

use crate::money::MoneyAmount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Counterparty of deposits and withdrawals: money entering or leaving
    /// the ledger. Never assigned to a stored account.
    pub const EXTERNAL: AccountId = AccountId(0);

    /// Wrap a raw id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this is the external sentinel
    pub const fn is_external(self) -> bool {
        self.0 == Self::EXTERNAL.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier, monotonically increasing per ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(i64);

impl TransactionId {
    /// Wrap a raw id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Balance, never negative
    pub balance: MoneyAmount,
}

/// Immutable record of a completed money movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: TransactionId,

    /// When the balances were changed
    pub timestamp: DateTime<Utc>,

    /// Debited account (`AccountId::EXTERNAL` for deposits)
    pub from_account_id: AccountId,

    /// Credited account (`AccountId::EXTERNAL` for withdrawals)
    pub to_account_id: AccountId,

    /// Amount moved, always positive
    pub amount: MoneyAmount,
}

impl Transaction {
    /// True if the account is either side of this transaction
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// Outcome of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Debited account
    pub from_account_id: AccountId,

    /// Credited account
    pub to_account_id: AccountId,

    /// Debited account balance after the transfer
    pub from_balance: MoneyAmount,

    /// Credited account balance after the transfer
    pub to_balance: MoneyAmount,

    /// Recorded transaction
    pub transaction_id: TransactionId,
}

/// Outcome of a successful deposit or withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account that was credited or debited
    pub account_id: AccountId,

    /// Balance after the change
    pub balance: MoneyAmount,

    /// Recorded transaction
    pub transaction_id: TransactionId,
}
