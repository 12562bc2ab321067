//! Error types for the ledger

use crate::money::MoneyAmount;
use crate::types::AccountId;
use std::time::Duration;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account does not exist
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    /// Amount is not usable for the operation
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Balance is lower than the requested debit
    #[error("Insufficient funds on account {account}: requested {requested}")]
    InsufficientFunds {
        /// Debited account
        account: AccountId,
        /// Requested amount
        requested: MoneyAmount,
    },

    /// Transfer source and destination are the same account
    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    /// Operation exceeded its time budget
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Storage error (SQLite, pool)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Caused by the request rather than by the ledger (4xx-class)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidAmount(_)
                | Error::InsufficientFunds { .. }
                | Error::SameAccount(_)
        )
    }

    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::SameAccount(_) => "same_account",
            Error::Timeout(_) => "timeout",
            Error::Storage(_) => "storage",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }

    /// Fill in the budget of a `Timeout` raised below the operation deadline
    pub(crate) fn with_budget(self, budget: Duration) -> Self {
        match self {
            Error::Timeout(_) => Error::Timeout(budget),
            other => other,
        }
    }
}

/// SQLITE_BUSY, including its extended codes
const SQLITE_BUSY: i32 = 5;

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map_or(false, |code| code & 0xff == SQLITE_BUSY),
        _ => false,
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        // Waiting for a connection or for the database lock ran out of time;
        // the budget itself is known only to the caller
        if matches!(err, sqlx::Error::PoolTimedOut) || is_busy(&err) {
            return Error::Timeout(Duration::ZERO);
        }
        Error::Storage(err.to_string())
    }
}
