//! Durable backend using SQLite through sqlx
//!
//! # Tables
//!
//! - `account` - one row per live account, `CHECK (balance >= 0)`
//! - `"transaction"` - append-only transfer log, indexed by both account
//!   columns together with the timestamp
//!
//! Money is stored as integer minor units and timestamps as integer
//! microseconds since the Unix epoch, so comparisons in SQL are exact.
//!
//! Every mutation runs in one sqlx transaction bounded by the configured
//! operation timeout. Dropping an unfinished transaction rolls it back, which
//! is how both early returns and deadline expiry discard partial writes.

use crate::{
    config::{Backend, StorageConfig},
    money::MoneyAmount,
    store::{
        ensure_distinct, ensure_opening_balance, ensure_positive, history_cutoff, overflow,
        AccountStore,
    },
    types::{Account, AccountId, BalanceChange, Transaction, TransactionId, TransferResult},
    Error, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: [&str; 4] = [
    r#"CREATE TABLE IF NOT EXISTS account (
        account_id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TIMESTAMP NOT NULL,
        balance    INTEGER NOT NULL,
        CONSTRAINT balance_non_negative CHECK (balance >= 0),
        CONSTRAINT balance_integral CHECK (typeof(balance) = 'integer')
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "transaction" (
        transaction_id  INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp       TIMESTAMP NOT NULL,
        from_account_id INTEGER NOT NULL,
        to_account_id   INTEGER NOT NULL,
        amount          NUMERIC NOT NULL CHECK (amount > 0)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_transaction_from
        ON "transaction" (from_account_id, timestamp)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_transaction_to
        ON "transaction" (to_account_id, timestamp)"#,
];

/// SQLite-backed ledger
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
    operation_timeout: Duration,
}

#[derive(FromRow)]
struct AccountRow {
    account_id: i64,
    created_at: i64,
    balance: i64,
}

#[derive(FromRow)]
struct TransactionRow {
    transaction_id: i64,
    timestamp: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
}

impl TryFrom<AccountRow> for Account {
    type Error = Error;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            id: AccountId::new(row.account_id),
            created_at: from_micros(row.created_at)?,
            balance: MoneyAmount::from_minor_units(row.balance),
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = Error;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Transaction {
            id: TransactionId::new(row.transaction_id),
            timestamp: from_micros(row.timestamp)?,
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: MoneyAmount::from_minor_units(row.amount),
        })
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Storage(format!("Invalid timestamp in storage: {}", micros)))
}

fn minor_units(amount: MoneyAmount) -> Result<i64> {
    amount
        .minor_units()
        .ok_or_else(|| Error::InvalidAmount(format!("amount out of range: {}", amount)))
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_check_violation())
}

/// Debit failures: a CHECK violation means the balance would go negative
fn debit_error(err: sqlx::Error, account: AccountId, amount: MoneyAmount) -> Error {
    if is_check_violation(&err) {
        Error::InsufficientFunds {
            account,
            requested: amount,
        }
    } else {
        err.into()
    }
}

/// Credit failures: a CHECK violation means the integer balance overflowed
fn credit_error(err: sqlx::Error, account: AccountId) -> Error {
    if is_check_violation(&err) {
        overflow(account)
    } else {
        err.into()
    }
}

impl SqlStore {
    /// Open the database and create the schema if missing
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let operation_timeout = config.operation_timeout();

        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(operation_timeout);

        // An in-memory database lives only as long as its one connection
        let max_connections = if config.database_url.contains(":memory:") {
            1
        } else {
            config.max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(operation_timeout)
            .connect_with(options)
            .await
            .map_err(|e| Error::from(e).with_budget(operation_timeout))?;

        let store = Self {
            pool,
            operation_timeout,
        };
        store
            .create_schema()
            .await
            .map_err(|e| e.with_budget(operation_timeout))?;

        tracing::info!(
            database_url = %config.database_url,
            max_connections,
            "Opened SQL ledger storage"
        );

        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Run `operation` within the time budget; on expiry the future is
    /// dropped, rolling back any open transaction.
    async fn with_deadline<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.operation_timeout, operation)
            .await
            .map_err(|_| Error::Timeout(self.operation_timeout))?
            .map_err(|e| e.with_budget(self.operation_timeout))
    }

    async fn exists(conn: &mut SqliteConnection, id: AccountId) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT account_id FROM account WHERE account_id = ?")
                .bind(id.get())
                .fetch_optional(conn)
                .await?;
        Ok(found.is_some())
    }

    async fn balance_of(conn: &mut SqliteConnection, id: AccountId) -> Result<MoneyAmount> {
        let units: i64 = sqlx::query_scalar("SELECT balance FROM account WHERE account_id = ?")
            .bind(id.get())
            .fetch_one(conn)
            .await?;
        Ok(MoneyAmount::from_minor_units(units))
    }

    async fn insert_transaction(
        conn: &mut SqliteConnection,
        from: AccountId,
        to: AccountId,
        units: i64,
    ) -> Result<TransactionId> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO "transaction" (timestamp, from_account_id, to_account_id, amount)
               VALUES (?, ?, ?, ?)
               RETURNING transaction_id"#,
        )
        .bind(Utc::now().timestamp_micros())
        .bind(from.get())
        .bind(to.get())
        .bind(units)
        .fetch_one(conn)
        .await?;
        Ok(TransactionId::new(id))
    }

    /// Close the pool (graceful shutdown)
    pub async fn shutdown(&self) {
        self.pool.close().await;
        tracing::info!("SQL ledger storage closed");
    }
}

#[async_trait]
impl AccountStore for SqlStore {
    fn backend(&self) -> Backend {
        Backend::Sql
    }

    async fn create_account(&self, initial_balance: MoneyAmount) -> Result<Account> {
        ensure_opening_balance(initial_balance)?;
        let units = minor_units(initial_balance)?;

        let account: Account = self
            .with_deadline(async {
                let row: AccountRow = sqlx::query_as(
                    "INSERT INTO account (created_at, balance) VALUES (?, ?)
                     RETURNING account_id, created_at, balance",
                )
                .bind(Utc::now().timestamp_micros())
                .bind(units)
                .fetch_one(&self.pool)
                .await?;
                row.try_into()
            })
            .await?;

        tracing::debug!(account_id = %account.id, balance = %account.balance, "Account created");
        Ok(account)
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let deleted = self
            .with_deadline(async {
                let result = sqlx::query("DELETE FROM account WHERE account_id = ?")
                    .bind(id.get())
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await?;

        if deleted == 0 {
            return Err(Error::NotFound(id));
        }

        tracing::debug!(account_id = %id, "Account deleted");
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.with_deadline(async {
            let row: Option<AccountRow> = sqlx::query_as(
                "SELECT account_id, created_at, balance FROM account WHERE account_id = ?",
            )
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

            row.ok_or(Error::NotFound(id))?.try_into()
        })
        .await
    }

    async fn deposit(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange> {
        ensure_positive(amount)?;
        let units = minor_units(amount)?;

        self.with_deadline(async {
            let mut tx = self.pool.begin().await?;

            let credited = sqlx::query("UPDATE account SET balance = balance + ? WHERE account_id = ?")
                .bind(units)
                .bind(id.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| credit_error(e, id))?;
            if credited.rows_affected() == 0 {
                return Err(Error::NotFound(id));
            }

            let transaction_id =
                Self::insert_transaction(&mut *tx, AccountId::EXTERNAL, id, units).await?;
            let balance = Self::balance_of(&mut *tx, id).await?;
            tx.commit().await?;

            Ok(BalanceChange {
                account_id: id,
                balance,
                transaction_id,
            })
        })
        .await
    }

    async fn withdraw(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange> {
        ensure_positive(amount)?;
        let units = minor_units(amount)?;

        self.with_deadline(async {
            let mut tx = self.pool.begin().await?;

            let debited = sqlx::query("UPDATE account SET balance = balance - ? WHERE account_id = ?")
                .bind(units)
                .bind(id.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| debit_error(e, id, amount))?;
            if debited.rows_affected() == 0 {
                return Err(Error::NotFound(id));
            }

            let transaction_id =
                Self::insert_transaction(&mut *tx, id, AccountId::EXTERNAL, units).await?;
            let balance = Self::balance_of(&mut *tx, id).await?;
            tx.commit().await?;

            Ok(BalanceChange {
                account_id: id,
                balance,
                transaction_id,
            })
        })
        .await
    }

    async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: MoneyAmount,
    ) -> Result<TransferResult> {
        ensure_distinct(from, to)?;
        ensure_positive(amount)?;
        let units = minor_units(amount)?;

        self.with_deadline(async {
            let mut tx = self.pool.begin().await?;

            // Write first: a no-op update of both rows takes the write lock
            // before anything is read, and tells whether both accounts exist
            let touched =
                sqlx::query("UPDATE account SET balance = balance WHERE account_id IN (?, ?)")
                    .bind(from.get())
                    .bind(to.get())
                    .execute(&mut *tx)
                    .await?;
            if touched.rows_affected() < 2 {
                let missing = if Self::exists(&mut *tx, from).await? {
                    to
                } else {
                    from
                };
                return Err(Error::NotFound(missing));
            }

            let debited = sqlx::query("UPDATE account SET balance = balance - ? WHERE account_id = ?")
                .bind(units)
                .bind(from.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| debit_error(e, from, amount))?;
            if debited.rows_affected() == 0 {
                return Err(Error::NotFound(from));
            }

            let credited = sqlx::query("UPDATE account SET balance = balance + ? WHERE account_id = ?")
                .bind(units)
                .bind(to.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| credit_error(e, to))?;
            if credited.rows_affected() == 0 {
                return Err(Error::NotFound(to));
            }

            let transaction_id = Self::insert_transaction(&mut *tx, from, to, units).await?;
            let from_balance = Self::balance_of(&mut *tx, from).await?;
            let to_balance = Self::balance_of(&mut *tx, to).await?;
            tx.commit().await?;

            Ok(TransferResult {
                from_account_id: from,
                to_account_id: to,
                from_balance,
                to_balance,
                transaction_id,
            })
        })
        .await
    }

    async fn transaction_history(
        &self,
        account_id: AccountId,
        last_n_days: u32,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let cutoff = history_cutoff(Utc::now(), last_n_days).timestamp_micros();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_deadline(async {
            let rows: Vec<TransactionRow> = sqlx::query_as(
                r#"SELECT transaction_id, timestamp, from_account_id, to_account_id, amount
                   FROM "transaction"
                   WHERE (from_account_id = ? OR to_account_id = ?) AND timestamp >= ?
                   ORDER BY transaction_id DESC
                   LIMIT ?"#,
            )
            .bind(account_id.get())
            .bind(account_id.get())
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(Transaction::try_from).collect()
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}
