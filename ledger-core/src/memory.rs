//! In-memory backend
//!
//! Two lock levels:
//!
//! - `accounts`: one `RwLock` over the id → entry map. Taken exclusively to
//!   insert or remove an entry, shared for lookups, and never held while
//!   waiting for an entry lock.
//! - `AccountEntry::state`: one `Mutex` per account, held while its balance is
//!   read or changed. Transfers between disjoint pairs run in parallel.
//!
//! A transfer takes its two entry locks in ascending `AccountId` order no
//! matter which side is the source, so two transfers over the same pair in
//! opposite directions cannot wait on each other in a cycle. The transaction
//! log lock is always the innermost lock.
//!
//! The locks are blocking `parking_lot` locks taken inside `async` methods.
//! Each is held only for a lookup or a few arithmetic steps and never across
//! an `.await`, so a waiting task parks its worker thread only briefly. With
//! `lock_timeout_ms` unset that wait is unbounded; set it to cap how long an
//! operation may block a worker before failing with `Timeout`.
//!
//! Nothing survives a restart.

use crate::{
    config::{Backend, MemoryConfig},
    money::MoneyAmount,
    store::{
        credited, ensure_distinct, ensure_opening_balance, ensure_positive, history_cutoff, overflow,
        AccountStore,
    },
    types::{Account, AccountId, BalanceChange, Transaction, TransactionId, TransferResult},
    Error, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Concurrent in-memory ledger
pub struct MemoryStore {
    /// Structural lock: id → entry, plus the account id counter
    accounts: RwLock<AccountTable>,

    /// Transaction log and its id counter
    journal: Mutex<Journal>,

    /// Bound on entry lock acquisition
    lock_timeout: Option<Duration>,
}

struct AccountTable {
    /// Last assigned id; only ever incremented
    last_id: i64,
    entries: HashMap<AccountId, Arc<AccountEntry>>,
}

/// One account and its own lock
struct AccountEntry {
    id: AccountId,
    created_at: DateTime<Utc>,
    state: Mutex<EntryState>,
}

struct EntryState {
    balance: MoneyAmount,
    /// Set once the entry has been removed from the map. A transfer that
    /// looked the entry up before the removal must not touch it.
    closed: bool,
}

struct Journal {
    last_id: i64,
    records: Vec<Transaction>,
}

impl AccountEntry {
    fn lock(&self, deadline: Option<(Duration, Instant)>) -> Result<MutexGuard<'_, EntryState>> {
        match deadline {
            None => Ok(self.state.lock()),
            Some((budget, at)) => self.state.try_lock_until(at).ok_or(Error::Timeout(budget)),
        }
    }

    fn snapshot(&self, state: &EntryState) -> Account {
        Account {
            id: self.id,
            created_at: self.created_at,
            balance: state.balance,
        }
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            accounts: RwLock::new(AccountTable {
                last_id: AccountId::EXTERNAL.get(),
                entries: HashMap::new(),
            }),
            journal: Mutex::new(Journal {
                last_id: 0,
                records: Vec::new(),
            }),
            lock_timeout: config.lock_timeout(),
        }
    }

    /// Number of live accounts
    pub fn account_count(&self) -> usize {
        self.accounts.read().entries.len()
    }

    /// Number of recorded transactions
    pub fn transaction_count(&self) -> usize {
        self.journal.lock().records.len()
    }

    fn entry(&self, id: AccountId) -> Result<Arc<AccountEntry>> {
        self.accounts
            .read()
            .entries
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(id))
    }

    fn deadline(&self) -> Option<(Duration, Instant)> {
        self.lock_timeout
            .map(|budget| (budget, Instant::now() + budget))
    }

    /// Append a record. Callers hold the entry locks of both sides, so the
    /// record and the balance change it describes appear together.
    fn record(&self, from: AccountId, to: AccountId, amount: MoneyAmount) -> Transaction {
        let mut journal = self.journal.lock();
        journal.last_id += 1;

        let transaction = Transaction {
            id: TransactionId::new(journal.last_id),
            timestamp: Utc::now(),
            from_account_id: from,
            to_account_id: to,
            amount,
        };
        journal.records.push(transaction.clone());
        transaction
    }

    /// Credit or debit a single account under its own lock
    fn apply_single(
        &self,
        id: AccountId,
        amount: MoneyAmount,
        credit: bool,
    ) -> Result<BalanceChange> {
        ensure_positive(amount)?;
        let entry = self.entry(id)?;
        let mut state = entry.lock(self.deadline())?;
        if state.closed {
            return Err(Error::NotFound(id));
        }

        let (balance, from, to) = if credit {
            let balance = credited(id, state.balance, amount)?;
            (balance, AccountId::EXTERNAL, id)
        } else {
            if state.balance < amount {
                return Err(Error::InsufficientFunds {
                    account: id,
                    requested: amount,
                });
            }
            let balance = state.balance.checked_sub(amount).ok_or_else(|| overflow(id))?;
            (balance, id, AccountId::EXTERNAL)
        };

        state.balance = balance;
        let transaction = self.record(from, to, amount);

        Ok(BalanceChange {
            account_id: id,
            balance,
            transaction_id: transaction.id,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("accounts", &self.account_count())
            .field("transactions", &self.transaction_count())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    async fn create_account(&self, initial_balance: MoneyAmount) -> Result<Account> {
        ensure_opening_balance(initial_balance)?;

        let mut table = self.accounts.write();
        table.last_id += 1;
        let id = AccountId::new(table.last_id);

        let entry = Arc::new(AccountEntry {
            id,
            created_at: Utc::now(),
            state: Mutex::new(EntryState {
                balance: initial_balance,
                closed: false,
            }),
        });
        let account = Account {
            id,
            created_at: entry.created_at,
            balance: initial_balance,
        };
        table.entries.insert(id, entry);

        tracing::debug!(account_id = %id, balance = %initial_balance, "Account created");
        Ok(account)
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let entry = self
            .accounts
            .write()
            .entries
            .remove(&id)
            .ok_or(Error::NotFound(id))?;

        // Structural lock is released; wait for any in-flight transfer on the entry
        entry.state.lock().closed = true;

        tracing::debug!(account_id = %id, "Account deleted");
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        let entry = self.entry(id)?;
        let state = entry.lock(self.deadline())?;
        if state.closed {
            return Err(Error::NotFound(id));
        }
        Ok(entry.snapshot(&state))
    }

    async fn deposit(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange> {
        self.apply_single(id, amount, true)
    }

    async fn withdraw(&self, id: AccountId, amount: MoneyAmount) -> Result<BalanceChange> {
        self.apply_single(id, amount, false)
    }

    async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: MoneyAmount,
    ) -> Result<TransferResult> {
        ensure_distinct(from, to)?;
        ensure_positive(amount)?;

        // 1. Lookup under the shared structural lock
        let (source, target) = {
            let table = self.accounts.read();
            let source = table.entries.get(&from).cloned().ok_or(Error::NotFound(from))?;
            let target = table.entries.get(&to).cloned().ok_or(Error::NotFound(to))?;
            (source, target)
        };

        // 2. Advisory check, only if the source is uncontended
        if let Some(state) = source.state.try_lock() {
            if !state.closed && state.balance < amount {
                return Err(Error::InsufficientFunds {
                    account: from,
                    requested: amount,
                });
            }
        }

        // 3. Canonical order
        let deadline = self.deadline();
        let source_first = source.id < target.id;
        let (first, second) = if source_first {
            (&source, &target)
        } else {
            (&target, &source)
        };

        let mut first_guard = first.lock(deadline)?;
        let mut second_guard = second.lock(deadline)?;
        let (source_state, target_state) = if source_first {
            (&mut *first_guard, &mut *second_guard)
        } else {
            (&mut *second_guard, &mut *first_guard)
        };

        // 4. Authoritative check with both locks held
        if source_state.closed {
            return Err(Error::NotFound(from));
        }
        if target_state.closed {
            return Err(Error::NotFound(to));
        }
        if source_state.balance < amount {
            return Err(Error::InsufficientFunds {
                account: from,
                requested: amount,
            });
        }

        let from_balance = source_state
            .balance
            .checked_sub(amount)
            .ok_or_else(|| overflow(from))?;
        let to_balance = credited(to, target_state.balance, amount)?;

        // 5. Apply both sides, then record
        source_state.balance = from_balance;
        target_state.balance = to_balance;
        let transaction = self.record(from, to, amount);

        Ok(TransferResult {
            from_account_id: from,
            to_account_id: to,
            from_balance,
            to_balance,
            transaction_id: transaction.id,
        })
    }

    /// Full scan of the log, O(total transactions)
    async fn transaction_history(
        &self,
        account_id: AccountId,
        last_n_days: u32,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let cutoff = history_cutoff(Utc::now(), last_n_days);
        let journal = self.journal.lock();

        Ok(journal
            .records
            .iter()
            .rev()
            .filter(|tx| tx.involves(account_id) && tx.timestamp >= cutoff)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::default()
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let store = store();
        let first = store.create_account(MoneyAmount::ZERO).await.unwrap();
        store.delete_account(first.id).await.unwrap();

        let second = store.create_account(MoneyAmount::ZERO).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn test_first_id_is_not_external() {
        let store = store();
        let account = store.create_account(MoneyAmount::ZERO).await.unwrap();
        assert!(!account.id.is_external());
    }

    #[tokio::test]
    async fn test_transfer_records_transaction() {
        let store = store();
        let a = store.create_account(MoneyAmount::whole(100)).await.unwrap();
        let b = store.create_account(MoneyAmount::ZERO).await.unwrap();

        let result = store.transfer(a.id, b.id, MoneyAmount::whole(30)).await.unwrap();
        assert_eq!(result.from_balance, MoneyAmount::whole(70));
        assert_eq!(result.to_balance, MoneyAmount::whole(30));
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_detached_entry_is_not_written() {
        let store = store();
        let a = store.create_account(MoneyAmount::whole(100)).await.unwrap();
        let b = store.create_account(MoneyAmount::ZERO).await.unwrap();

        // Simulate a transfer that looked the entry up just before deletion
        let detached = store.entry(b.id).unwrap();
        store.delete_account(b.id).await.unwrap();
        assert!(detached.state.lock().closed);

        store.accounts.write().entries.insert(b.id, detached);
        let err = store
            .transfer(a.id, b.id, MoneyAmount::whole(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == b.id));

        let a_after = store.get_account(a.id).await.unwrap();
        assert_eq!(a_after.balance, MoneyAmount::whole(100));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_timeout_leaves_state_unchanged() {
        let store = MemoryStore::new(&MemoryConfig {
            lock_timeout_ms: Some(20),
        });
        let a = store.create_account(MoneyAmount::whole(100)).await.unwrap();
        let b = store.create_account(MoneyAmount::ZERO).await.unwrap();

        let held = store.entry(b.id).unwrap();
        let guard = held.state.lock();

        let err = store
            .transfer(a.id, b.id, MoneyAmount::whole(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        drop(guard);

        assert_eq!(
            store.get_account(a.id).await.unwrap().balance,
            MoneyAmount::whole(100)
        );
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_rejects_overdraft() {
        let store = store();
        let a = store.create_account(MoneyAmount::new(0, 50)).await.unwrap();

        let err = store.withdraw(a.id, MoneyAmount::whole(1)).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let store = store();
        let a = store.create_account(MoneyAmount::whole(100)).await.unwrap();
        let b = store.create_account(MoneyAmount::ZERO).await.unwrap();

        for _ in 0..3 {
            store.transfer(a.id, b.id, MoneyAmount::whole(1)).await.unwrap();
        }

        let history = store.transaction_history(b.id, 1, 10).await.unwrap();
        let ids: Vec<i64> = history.iter().map(|tx| tx.id.get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_opposite_transfers_do_not_deadlock() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();

        rt.block_on(async {
            let store = Arc::new(store());
            let a = store.create_account(MoneyAmount::whole(1_000)).await.unwrap();
            let b = store.create_account(MoneyAmount::whole(1_000)).await.unwrap();

            let mut handles = Vec::new();
            for i in 0..200 {
                let store = store.clone();
                let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
                handles.push(tokio::spawn(async move {
                    store.transfer(from, to, MoneyAmount::whole(1)).await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let a_after = store.get_account(a.id).await.unwrap().balance;
            let b_after = store.get_account(b.id).await.unwrap().balance;
            assert_eq!(a_after, MoneyAmount::whole(1_000));
            assert_eq!(b_after, MoneyAmount::whole(1_000));
        });
    }
}
