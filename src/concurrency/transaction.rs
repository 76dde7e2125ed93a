//! Per-transaction bookkeeping (spec.md §3, §4.7).
//!
//! A [`TransactionContext`] tracks everything the lock manager and the
//! (out-of-scope) executors need to enforce two-phase locking and to
//! support abort: its id, 2PL phase, isolation level, the acquired-lock
//! sets at table and row granularity, and a log of write records an
//! executor would use to undo an aborted transaction's effects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Rid, TableOid, TxnId};

use super::lock_manager::LockMode;

/// 2PL phase plus terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Acquiring locks; no lock has yet been released.
    Growing,
    /// At least one lock has been released; no further acquisition is
    /// permitted beyond what the isolation level still allows.
    Shrinking,
    Committed,
    Aborted,
}

/// Isolation level, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// A single write an executor performed under this transaction, kept so
/// that (a future) rollback can undo it. No WAL/recovery protocol is
/// implied (spec.md §1 Non-goals) — this is in-memory bookkeeping only.
#[derive(Debug, Clone, Copy)]
pub enum WriteRecord {
    Insert { table: TableOid, rid: Rid },
    Delete { table: TableOid, rid: Rid },
    Update { table: TableOid, rid: Rid },
}

#[derive(Default)]
struct LockSets {
    table: HashMap<LockMode, HashSet<TableOid>>,
    row: HashMap<LockMode, HashMap<TableOid, HashSet<Rid>>>,
}

struct Inner {
    state: TransactionState,
    locks: LockSets,
    write_set: Vec<WriteRecord>,
}

/// Per-transaction state, per spec.md §3's `Transaction context`.
///
/// `id` and `isolation_level` never change after construction and are
/// plain fields; everything that mutates during the transaction's life
/// (2PL state, lock-set bookkeeping, write log) sits behind one
/// `parking_lot::Mutex` since the lock manager and the owning executor
/// thread are the only concurrent accessors and hold it only briefly.
pub struct TransactionContext {
    id: TxnId,
    isolation_level: IsolationLevel,
    inner: Mutex<Inner>,
}

impl TransactionContext {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            inner: Mutex::new(Inner {
                state: TransactionState::Growing,
                locks: LockSets::default(),
                write_set: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: TransactionState) {
        self.inner.lock().state = state;
    }

    /// Enter `Shrinking` if still `Growing`. Idempotent; a transaction
    /// already `Shrinking`/`Committed`/`Aborted` is left untouched.
    pub fn enter_shrinking(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TransactionState::Growing {
            inner.state = TransactionState::Shrinking;
        }
    }

    pub fn record_write(&self, record: WriteRecord) {
        self.inner.lock().write_set.push(record);
    }

    pub fn write_set(&self) -> Vec<WriteRecord> {
        self.inner.lock().write_set.clone()
    }

    // -- table lock bookkeeping -------------------------------------------------

    pub fn add_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.inner.lock().locks.table.entry(mode).or_default().insert(oid);
    }

    pub fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        if let Some(set) = self.inner.lock().locks.table.get_mut(&mode) {
            set.remove(&oid);
        }
    }

    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let inner = self.inner.lock();
        for mode in LockMode::ALL {
            if inner.locks.table.get(&mode).is_some_and(|s| s.contains(&oid)) {
                return Some(mode);
            }
        }
        None
    }

    pub fn is_table_locked_in_mode(&self, oid: TableOid, mode: LockMode) -> bool {
        self.inner.lock().locks.table.get(&mode).is_some_and(|s| s.contains(&oid))
    }

    pub fn any_table_lock_held(&self, oid: TableOid) -> bool {
        self.table_lock_mode(oid).is_some()
    }

    // -- row lock bookkeeping ----------------------------------------------------

    pub fn add_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        self.inner
            .lock()
            .locks
            .row
            .entry(mode)
            .or_default()
            .entry(oid)
            .or_default()
            .insert(rid);
    }

    pub fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        if let Some(by_table) = self.inner.lock().locks.row.get_mut(&mode) {
            if let Some(set) = by_table.get_mut(&oid) {
                set.remove(&rid);
            }
        }
    }

    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let inner = self.inner.lock();
        for mode in [LockMode::Shared, LockMode::Exclusive] {
            if inner
                .locks
                .row
                .get(&mode)
                .and_then(|by_table| by_table.get(&oid))
                .is_some_and(|s| s.contains(&rid))
            {
                return Some(mode);
            }
        }
        None
    }

    pub fn is_row_locked_in_mode(&self, oid: TableOid, rid: Rid, mode: LockMode) -> bool {
        self.row_lock_mode(oid, rid) == Some(mode)
    }

    /// Whether any row lock on `oid` is still held — `unlock_table` must
    /// reject while this is true (spec.md §4.6.3 `UnlockedBeforeRows`).
    pub fn has_row_locks_on_table(&self, oid: TableOid) -> bool {
        let inner = self.inner.lock();
        [LockMode::Shared, LockMode::Exclusive].iter().any(|mode| {
            inner
                .locks
                .row
                .get(mode)
                .and_then(|by_table| by_table.get(&oid))
                .is_some_and(|s| !s.is_empty())
        })
    }
}

/// Process-wide table of active transactions, passed explicitly to the
/// lock manager's deadlock detector as a context argument rather than
/// reached for as a global singleton (spec.md §9's design note on
/// "global mutable state via static singletons").
#[derive(Default)]
pub struct TransactionManager {
    active: Mutex<HashMap<TxnId, Arc<TransactionContext>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self { active: Mutex::new(HashMap::new()) }
    }

    /// Begin a new transaction in `Growing` state.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<TransactionContext> {
        let id = TxnId::next();
        let txn = Arc::new(TransactionContext::new(id, isolation_level));
        self.active.lock().insert(id, txn.clone());
        txn
    }

    /// Look up a still-tracked transaction by id (used by the deadlock
    /// detector to mark a victim aborted).
    pub fn get(&self, id: TxnId) -> Option<Arc<TransactionContext>> {
        self.active.lock().get(&id).cloned()
    }

    /// Mark `txn` committed and stop tracking it.
    pub fn commit(&self, txn: &Arc<TransactionContext>) {
        txn.set_state(TransactionState::Committed);
        self.active.lock().remove(&txn.id());
    }

    /// Mark `txn` aborted and stop tracking it. Callers are responsible
    /// for releasing any locks still held (e.g. via the lock manager)
    /// before or after calling this — the transaction manager only
    /// records the terminal state.
    pub fn abort(&self, txn: &Arc<TransactionContext>) {
        txn.set_state(TransactionState::Aborted);
        self.active.lock().remove(&txn.id());
    }
}
