//! Transfer Ledger Core
//!
//! Account balances and money transfers with atomic balance + history writes.
//!
//! # Architecture
//!
//! - **Contract**: [`AccountStore`] is the only surface callers use
//! - **In-memory backend**: per-account locks under a structural map lock,
//!   acquired in canonical id order
//! - **Durable backend**: one SQLite transaction per operation, with
//!   `CHECK` constraints guarding balances and a per-operation deadline
//! - **Exact money**: [`MoneyAmount`] fixed-point pairs, never floats
//!
//! # Invariants
//!
//! - Non-negativity: no balance is ever observed below zero
//! - Conservation: a transfer leaves the sum of its two balances unchanged
//! - Atomicity: a balance change and its transaction record commit together
//! - Ids are never reused

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod money;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use config::{Backend, Config, MemoryConfig, StorageConfig};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use memory::MemoryStore;
pub use money::{MoneyAmount, ParseMoneyError};
pub use storage::SqlStore;
pub use store::AccountStore;
pub use types::{Account, AccountId, BalanceChange, Transaction, TransactionId, TransferResult};
