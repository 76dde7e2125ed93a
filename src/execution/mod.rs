//! The contract executors consume, not the executors themselves.
//!
//! Query planning, optimizer rewrites, and physical operators (scan, join,
//! insert, delete, aggregate, sort, top-N) are out of scope; this module
//! only specifies the minimal interface such an executor would be built
//! against: a catalog that resolves table identifiers to names, and a
//! thin façade over [`LockManager`] that bakes in the "lock before
//! read/write, release per isolation rules" contract so an executor never
//! has to reimplement that policy itself.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::common::{Error, Result, TableOid};
use crate::concurrency::lock_manager::{LockManager, LockMode};
use crate::concurrency::transaction::{IsolationLevel, TransactionContext};

/// Resolves table identifiers to names. Schema metadata beyond a name
/// (columns, types, indexes) is catalog/binder territory and out of scope.
pub trait Catalog {
    fn table_name(&self, oid: TableOid) -> Option<String>;
    fn table_oid(&self, name: &str) -> Option<TableOid>;
}

/// An in-memory name table, sufficient for the executors' interface
/// contract without a real schema store behind it.
#[derive(Default)]
pub struct SimpleCatalog {
    names: RwLock<HashMap<TableOid, String>>,
}

impl SimpleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, oid: TableOid, name: impl Into<String>) {
        self.names.write().insert(oid, name.into());
    }
}

impl Catalog for SimpleCatalog {
    fn table_name(&self, oid: TableOid) -> Option<String> {
        self.names.read().get(&oid).cloned()
    }

    fn table_oid(&self, name: &str) -> Option<TableOid> {
        self.names
            .read()
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(&oid, _)| oid)
    }
}

/// The lock-before-access contract an executor is expected to follow.
///
/// `RepeatableRead` executors take and hold S-locks through commit;
/// `ReadCommitted` executors may drop a row S-lock immediately once a read
/// completes, per spec.md §5's per-isolation-level release rules.
/// `ReadUncommitted` executors never need a read lock at all, only the
/// intention lock protocol for writes.
pub struct ExecutorLockScope<'a> {
    lock_manager: &'a LockManager,
    txn: &'a TransactionContext,
}

impl<'a> ExecutorLockScope<'a> {
    pub fn new(lock_manager: &'a LockManager, txn: &'a TransactionContext) -> Self {
        Self { lock_manager, txn }
    }

    /// Acquire whatever locks a read of `rid` in `oid` requires under the
    /// transaction's isolation level, returning whether a row S-lock was
    /// actually taken (so the caller knows whether to release it again
    /// immediately under `ReadCommitted`).
    pub fn acquire_for_read(&self, oid: TableOid, rid: crate::common::Rid) -> Result<bool> {
        if self.txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Ok(false);
        }
        self.lock_manager.lock_table(self.txn, LockMode::IntentionShared, oid)?;
        self.lock_manager.lock_row(self.txn, LockMode::Shared, oid, rid)?;
        if self.txn.isolation_level() == IsolationLevel::ReadCommitted {
            self.lock_manager.unlock_row(self.txn, oid, rid)?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Acquire the locks a write of `rid` in `oid` requires, regardless of
    /// isolation level — writers always take and hold X-locks to commit.
    pub fn acquire_for_write(&self, oid: TableOid, rid: crate::common::Rid) -> Result<()> {
        self.lock_manager.lock_table(self.txn, LockMode::IntentionExclusive, oid)?;
        self.lock_manager.lock_row(self.txn, LockMode::Exclusive, oid, rid)?;
        Ok(())
    }

    /// Release every lock the executor is still holding on `oid`, in the
    /// order the lock manager requires (rows before the table lock).
    pub fn release_table(&self, oid: TableOid) -> Result<()> {
        self.lock_manager.unlock_table(self.txn, oid)
    }
}

/// Translate a transaction abort into the terminal error an executor
/// should surface to its caller, per spec.md §7's "typed abort
/// exception/result".
pub fn abort_error(txn: &TransactionContext) -> Error {
    use crate::common::AbortReason;
    debug_assert_eq!(txn.state(), crate::concurrency::transaction::TransactionState::Aborted);
    Error::transaction_aborted(AbortReason::DeadlockVictim)
}
