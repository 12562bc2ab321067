//! Main ledger orchestration layer
//!
//! `Ledger` opens the configured backend and forwards every operation to it,
//! adding logging and metrics. It holds no balance state of its own, so the
//! guarantees are exactly those of the backend.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger, MoneyAmount};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(&Config::default()).await?;
//!
//!     let a = ledger.create_account(MoneyAmount::whole(100)).await?;
//!     let b = ledger.create_account(MoneyAmount::ZERO).await?;
//!     let result = ledger.transfer(a.id, b.id, MoneyAmount::whole(30)).await?;
//!     assert_eq!(result.from_balance, MoneyAmount::whole(70));
//!
//!     ledger.close().await
//! }
//! ```

use crate::{
    config::Backend,
    memory::MemoryStore,
    metrics::Metrics,
    money::MoneyAmount,
    storage::SqlStore,
    store::AccountStore,
    types::{Account, AccountId, BalanceChange, Transaction, TransferResult},
    Config, Error, Result,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Main ledger interface
#[derive(Clone)]
pub struct Ledger {
    /// Backend implementing the operation contract
    store: Arc<dyn AccountStore>,

    /// Prometheus metrics
    metrics: Metrics,
}

impl Ledger {
    /// Open the backend selected in the configuration
    pub async fn open(config: &Config) -> Result<Self> {
        let store: Arc<dyn AccountStore> = match config.backend {
            Backend::Memory => Arc::new(MemoryStore::new(&config.memory)),
            Backend::Sql => Arc::new(SqlStore::connect(&config.storage).await?),
        };

        tracing::info!(
            service = %config.service_name,
            backend = %config.backend,
            "Ledger opened"
        );

        Self::with_store(store)
    }

    /// Wrap an already constructed backend
    pub fn with_store(store: Arc<dyn AccountStore>) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;
        Ok(Self { store, metrics })
    }

    /// Active backend
    pub fn backend(&self) -> Backend {
        self.store.backend()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Open a new account
    pub async fn create_account(&self, initial_balance: MoneyAmount) -> Result<Account> {
        let account = self
            .observe("create_account", self.store.create_account(initial_balance))
            .await?;
        self.metrics.record_account_created();
        Ok(account)
    }

    /// Delete an account
    pub async fn delete_account(&self, id: AccountId) -> Result<()> {
        self.observe("delete_account", self.store.delete_account(id))
            .await?;
        self.metrics.record_account_deleted();
        Ok(())
    }

    /// Get an account snapshot
    pub async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.observe("get_account", self.store.get_account(id)).await
    }

    /// Credit an account from outside the ledger
    pub async fn deposit(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange> {
        self.observe("deposit", self.store.deposit(id, amount)).await
    }

    /// Debit an account to outside the ledger
    pub async fn withdraw(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange> {
        self.observe("withdraw", self.store.withdraw(id, amount)).await
    }

    /// Transfer money between two accounts
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: MoneyAmount,
    ) -> Result<TransferResult> {
        let result = self
            .observe("transfer", self.store.transfer(from, to, amount))
            .await?;

        if let Some(units) = amount.minor_units().and_then(|u| u64::try_from(u).ok()) {
            self.metrics.record_transfer_volume(units);
        }

        tracing::debug!(
            transaction_id = %result.transaction_id,
            from = %from,
            to = %to,
            amount = %amount,
            "Transfer committed"
        );

        Ok(result)
    }

    /// Recent transactions of an account, newest first
    pub async fn transaction_history(
        &self,
        account_id: AccountId,
        last_n_days: u32,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        self.observe(
            "transaction_history",
            self.store
                .transaction_history(account_id, last_n_days, limit),
        )
        .await
    }

    /// Shutdown ledger
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        tracing::info!("Ledger closed");
        Ok(())
    }

    async fn observe<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.metrics
            .record_operation(operation, started.elapsed().as_secs_f64());

        if let Err(err) = &result {
            self.metrics.record_failure(operation, err.kind());
            if err.is_client_error() {
                tracing::warn!(operation, error = %err, "Ledger operation rejected");
            } else {
                tracing::error!(operation, error = %err, "Ledger operation failed");
            }
        }

        result
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("backend", &self.backend())
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_ledger() -> Ledger {
        Ledger::open(&Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let ledger = create_test_ledger().await;
        assert_eq!(ledger.backend(), Backend::Memory);
        ledger.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_sql_backend() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.backend = Backend::Sql;
        config.storage.database_url =
            format!("sqlite://{}", temp_dir.path().join("ledger.db").display());

        let ledger = Ledger::open(&config).await.unwrap();
        assert_eq!(ledger.backend(), Backend::Sql);

        let account = ledger.create_account(MoneyAmount::whole(5)).await.unwrap();
        assert_eq!(
            ledger.get_account(account.id).await.unwrap().balance,
            MoneyAmount::whole(5)
        );
        ledger.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_updates_metrics() {
        let ledger = create_test_ledger().await;
        let a = ledger.create_account(MoneyAmount::whole(100)).await.unwrap();
        let b = ledger.create_account(MoneyAmount::ZERO).await.unwrap();

        ledger
            .transfer(a.id, b.id, MoneyAmount::whole(30))
            .await
            .unwrap();

        let metrics = ledger.metrics();
        assert_eq!(metrics.accounts_created.get(), 2);
        assert_eq!(metrics.transferred_minor_units.get(), 3_000);
        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["transfer"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejection_is_counted() {
        let ledger = create_test_ledger().await;
        let a = ledger.create_account(MoneyAmount::whole(10)).await.unwrap();
        let b = ledger.create_account(MoneyAmount::ZERO).await.unwrap();

        let err = ledger
            .transfer(a.id, b.id, MoneyAmount::whole(11))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));

        assert_eq!(
            ledger
                .metrics()
                .failures_total
                .with_label_values(&["transfer", "insufficient_funds"])
                .get(),
            1
        );
        assert_eq!(ledger.metrics().transferred_minor_units.get(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_account() {
        let ledger = create_test_ledger().await;
        let err = ledger.delete_account(AccountId::new(100)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(ledger.metrics().accounts_deleted.get(), 0);
    }
}
