//! Multi-granularity two-phase lock manager with deadlock detection
//! (spec.md §4.6).
//!
//! Table-level locks support all five modes (`IS`, `IX`, `S`, `SIX`, `X`);
//! row-level locks support only `S`/`X` — intention locks at row
//! granularity are rejected (`IntentionLockOnRow`). Each lockable object
//! (a [`TableOid`] or a [`Rid`]) owns a [`LockRequestQueue`]: a FIFO list
//! of requests guarded by its own mutex plus a condvar, so that threads
//! block on the specific queue they're waiting for rather than a single
//! global lock. A map-level mutex is held only long enough to look up or
//! create a queue, per spec.md §5's "lock-map latch is never held while
//! waiting on a queue condvar".
//!
//! A background thread periodically detects wait-for cycles and aborts
//! the youngest transaction in each one found (spec.md §4.6.4). The
//! original BusTub skeleton this is grounded in leaves that detector as
//! an empty stub for students to fill in; this implementation builds it
//! for real.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::common::{AbortReason, Config, Error, Result, Rid, TableOid, TxnId};

use super::transaction::{TransactionContext, TransactionManager, TransactionState};

/// Lock mode, per spec.md §3/§4.6. Row-level locking only ever uses
/// `Shared`/`Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    pub const ALL: [LockMode; 5] = [
        LockMode::IntentionShared,
        LockMode::IntentionExclusive,
        LockMode::Shared,
        LockMode::SharedIntentionExclusive,
        LockMode::Exclusive,
    ];

    fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared | LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        )
    }
}

/// Compatibility matrix for table-level locks, spec.md §4.6.1.
fn table_compatible(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match (held, requested) {
        (IntentionShared, Exclusive) => false,
        (IntentionShared, _) => true,
        (IntentionExclusive, IntentionShared | IntentionExclusive) => true,
        (IntentionExclusive, _) => false,
        (Shared, IntentionShared | Shared) => true,
        (Shared, _) => false,
        (SharedIntentionExclusive, IntentionShared) => true,
        (SharedIntentionExclusive, _) => false,
        (Exclusive, _) => false,
    }
}

/// Row-level compatibility uses only `{S, X}` (spec.md §4.6.1).
fn row_compatible(held: LockMode, requested: LockMode) -> bool {
    !matches!((held, requested), (LockMode::Exclusive, _) | (_, LockMode::Exclusive))
}

/// Allowed upgrade targets for a currently-held mode, spec.md §4.6.1.
fn upgrade_allowed(held: LockMode, target: LockMode) -> bool {
    use LockMode::*;
    match held {
        IntentionShared => matches!(target, Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive),
        Shared => matches!(target, Exclusive | SharedIntentionExclusive),
        IntentionExclusive => matches!(target, Exclusive | SharedIntentionExclusive),
        SharedIntentionExclusive => matches!(target, Exclusive),
        Exclusive => false,
    }
}

/// A single entry in a [`LockRequestQueue`], per spec.md §3.
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueState {
    requests: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
}

/// FIFO queue of lock requests against one table or row, per spec.md §3.
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState { requests: VecDeque::new(), upgrading: None }),
            cv: Condvar::new(),
        }
    }

    fn granted_modes(state: &QueueState) -> Vec<LockMode> {
        state.requests.iter().filter(|r| r.granted).map(|r| r.mode).collect()
    }

    /// Whether `txn_id`'s request, once inserted, would sit at the head of
    /// the waiting suffix (i.e. every prior waiter has already been
    /// granted, or there is no prior waiter).
    fn at_head_of_waiters(state: &QueueState, txn_id: TxnId) -> bool {
        for r in &state.requests {
            if r.txn_id == txn_id {
                return true;
            }
            if !r.granted {
                return false;
            }
        }
        true
    }
}

/// Lookup key identifying a lockable object: a table, or a specific row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockTarget {
    Table(TableOid),
    Row(Rid),
}

/// Compatibility/upgrade errors that don't need to examine queue state.
fn require(cond: bool, reason: AbortReason) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::transaction_aborted(reason))
    }
}

pub struct LockManager {
    queues: Mutex<HashMap<LockTarget, Arc<LockRequestQueue>>>,
    txn_manager: Arc<TransactionManager>,
    cycle_detection_interval: Duration,
    running: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: &Config, txn_manager: Arc<TransactionManager>) -> Arc<Self> {
        let manager = Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            txn_manager,
            cycle_detection_interval: Duration::from_millis(config.cycle_detection_interval_ms),
            running: Arc::new(AtomicBool::new(false)),
            detector: Mutex::new(None),
        });
        if config.enable_cycle_detection {
            manager.clone().start_deadlock_detection();
        }
        manager
    }

    fn get_or_create_queue(&self, target: LockTarget) -> Arc<LockRequestQueue> {
        let mut queues = self.queues.lock();
        queues.entry(target).or_insert_with(|| Arc::new(LockRequestQueue::new())).clone()
    }

    // ------------------------------------------------------------------
    // Table locks
    // ------------------------------------------------------------------

    pub fn lock_table(&self, txn: &TransactionContext, mode: LockMode, oid: TableOid) -> Result<bool> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        self.check_isolation_for_acquire(txn, mode)?;

        if let Some(held) = txn.table_lock_mode(oid) {
            if held == mode {
                return Ok(true);
            }
            require(upgrade_allowed(held, mode), AbortReason::IncompatibleUpgrade)?;
            let queue = self.get_or_create_queue(LockTarget::Table(oid));
            self.upgrade_and_wait(txn, &queue, mode, table_compatible)?;
            txn.remove_table_lock(held, oid);
            txn.add_table_lock(mode, oid);
            return Ok(true);
        }

        let queue = self.get_or_create_queue(LockTarget::Table(oid));
        self.append_and_wait(txn, &queue, mode, table_compatible)?;
        txn.add_table_lock(mode, oid);
        Ok(true)
    }

    pub fn unlock_table(&self, txn: &TransactionContext, oid: TableOid) -> Result<()> {
        let held = txn.table_lock_mode(oid).ok_or_else(|| Error::transaction_aborted(AbortReason::NoLockHeld))?;
        require(!txn.has_row_locks_on_table(oid), AbortReason::UnlockedBeforeRows)?;

        let queue = self.get_or_create_queue(LockTarget::Table(oid));
        self.release(&queue, txn, table_compatible);
        txn.remove_table_lock(held, oid);
        self.transition_on_release(txn, held);
        Ok(())
    }

    pub fn is_table_locked_in_mode(&self, txn: &TransactionContext, oid: TableOid, mode: LockMode) -> bool {
        txn.is_table_locked_in_mode(oid, mode)
    }

    // ------------------------------------------------------------------
    // Row locks
    // ------------------------------------------------------------------

    pub fn lock_row(&self, txn: &TransactionContext, mode: LockMode, oid: TableOid, rid: Rid) -> Result<bool> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        require(!mode.is_intention(), AbortReason::IntentionLockOnRow)?;
        self.check_isolation_for_acquire(txn, mode)?;
        self.check_table_lock_prerequisite(txn, mode, oid)?;

        if let Some(held) = txn.row_lock_mode(oid, rid) {
            if held == mode {
                return Ok(true);
            }
            require(upgrade_allowed(held, mode), AbortReason::IncompatibleUpgrade)?;
            let queue = self.get_or_create_queue(LockTarget::Row(rid));
            self.upgrade_and_wait(txn, &queue, mode, row_compatible)?;
            txn.remove_row_lock(held, oid, rid);
            txn.add_row_lock(mode, oid, rid);
            return Ok(true);
        }

        let queue = self.get_or_create_queue(LockTarget::Row(rid));
        self.append_and_wait(txn, &queue, mode, row_compatible)?;
        txn.add_row_lock(mode, oid, rid);
        Ok(true)
    }

    pub fn unlock_row(&self, txn: &TransactionContext, oid: TableOid, rid: Rid) -> Result<()> {
        let held = txn.row_lock_mode(oid, rid).ok_or_else(|| Error::transaction_aborted(AbortReason::NoLockHeld))?;

        let queue = self.get_or_create_queue(LockTarget::Row(rid));
        self.release(&queue, txn, row_compatible);
        txn.remove_row_lock(held, oid, rid);
        self.transition_on_release(txn, held);
        Ok(())
    }

    pub fn is_row_locked_in_mode(&self, txn: &TransactionContext, oid: TableOid, rid: Rid, mode: LockMode) -> bool {
        txn.is_row_locked_in_mode(oid, rid, mode)
    }

    // ------------------------------------------------------------------
    // Shared acquire/release mechanics
    // ------------------------------------------------------------------

    fn check_isolation_for_acquire(&self, txn: &TransactionContext, mode: LockMode) -> Result<()> {
        use super::transaction::IsolationLevel::*;
        match txn.isolation_level() {
            ReadUncommitted => {
                require(
                    matches!(mode, LockMode::IntentionExclusive | LockMode::Exclusive),
                    AbortReason::LockSharedOnReadUncommitted,
                )?;
                require(txn.state() != TransactionState::Shrinking, AbortReason::LockOnShrinking)
            }
            RepeatableRead => require(txn.state() != TransactionState::Shrinking, AbortReason::LockOnShrinking),
            ReadCommitted => {
                let shrinking_ok = matches!(mode, LockMode::Shared | LockMode::IntentionShared);
                require(txn.state() != TransactionState::Shrinking || shrinking_ok, AbortReason::LockOnShrinking)
            }
        }
    }

    fn check_table_lock_prerequisite(&self, txn: &TransactionContext, mode: LockMode, oid: TableOid) -> Result<()> {
        let ok = match mode {
            LockMode::Shared => txn.any_table_lock_held(oid),
            LockMode::Exclusive => matches!(
                txn.table_lock_mode(oid),
                Some(LockMode::IntentionExclusive | LockMode::Exclusive | LockMode::SharedIntentionExclusive)
            ),
            _ => true,
        };
        require(ok, AbortReason::TableLockNotPresent)
    }

    /// Append a fresh request to the tail of the queue and block until
    /// granted (spec.md §4.6.2 steps 5-7, non-upgrade path).
    fn append_and_wait(
        &self,
        txn: &TransactionContext,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        compat: fn(LockMode, LockMode) -> bool,
    ) -> Result<()> {
        let mut state = queue.state.lock();
        let can_grant_immediately = LockRequestQueue::at_head_of_waiters(&state, txn.id())
            && LockRequestQueue::granted_modes(&state).into_iter().all(|held| compat(held, mode));
        state.requests.push_back(LockRequest { txn_id: txn.id(), mode, granted: can_grant_immediately });
        self.wait_for_grant(txn, queue, &mut state, compat)
    }

    /// Remove the previously-granted request for `txn`, reinsert a new one
    /// immediately after the granted prefix (priority over regular
    /// waiters), and block until it is granted (spec.md §4.6.2 step 5,
    /// upgrade path).
    fn upgrade_and_wait(
        &self,
        txn: &TransactionContext,
        queue: &Arc<LockRequestQueue>,
        target: LockMode,
        compat: fn(LockMode, LockMode) -> bool,
    ) -> Result<()> {
        let mut state = queue.state.lock();
        if let Some(other) = state.upgrading {
            if other != txn.id() {
                return Err(Error::transaction_aborted(AbortReason::UpgradeConflict));
            }
        }
        state.upgrading = Some(txn.id());

        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id() && r.granted) {
            state.requests.remove(pos);
        }
        let insert_at = state.requests.iter().position(|r| !r.granted).unwrap_or(state.requests.len());
        state.requests.insert(insert_at, LockRequest { txn_id: txn.id(), mode: target, granted: false });

        // The upgrade was just reinserted immediately after the granted
        // prefix (priority over regular waiters), so it may already be
        // grantable rather than needing to wait for some other release to
        // trigger `promote_waiting` — e.g. a transaction upgrading its own
        // sole lock on an otherwise uncontended object.
        if LockRequestQueue::at_head_of_waiters(&state, txn.id())
            && LockRequestQueue::granted_modes(&state).into_iter().all(|held| compat(held, target))
        {
            if let Some(r) = state.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
                r.granted = true;
            }
        }

        let result = self.wait_for_grant(txn, queue, &mut state, compat);
        state.upgrading = None;
        result
    }

    /// Block on `queue.cv` until this transaction's request is granted or
    /// the transaction is aborted (by the deadlock detector), per
    /// spec.md §5's suspension-point rules.
    fn wait_for_grant(
        &self,
        txn: &TransactionContext,
        queue: &Arc<LockRequestQueue>,
        state: &mut parking_lot::MutexGuard<'_, QueueState>,
        compat: fn(LockMode, LockMode) -> bool,
    ) -> Result<()> {
        loop {
            let granted = state.requests.iter().find(|r| r.txn_id == txn.id()).map(|r| r.granted).unwrap_or(false);
            if granted {
                return Ok(());
            }
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn.id());
                Self::promote_waiting(&mut state, compat);
                queue.cv.notify_all();
                return Err(Error::transaction_aborted(AbortReason::DeadlockVictim));
            }
            queue.cv.wait(state);
        }
    }

    /// Grant every request in the waiting suffix that is compatible with
    /// everything already granted, stopping at the first incompatible one
    /// (FIFO fairness, spec.md §4.6.3).
    fn promote_waiting(state: &mut QueueState, compat: fn(LockMode, LockMode) -> bool) {
        let mut granted_so_far = LockRequestQueue::granted_modes(state);
        for r in state.requests.iter_mut() {
            if r.granted {
                continue;
            }
            if granted_so_far.iter().all(|&held| compat(held, r.mode)) {
                r.granted = true;
                granted_so_far.push(r.mode);
            } else {
                break;
            }
        }
    }

    /// Remove `txn`'s granted request and promote the waiting prefix that
    /// has become compatible, per spec.md §4.6.3.
    fn release(&self, queue: &Arc<LockRequestQueue>, txn: &TransactionContext, compat: fn(LockMode, LockMode) -> bool) {
        let mut state = queue.state.lock();
        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            state.requests.remove(pos);
        }
        Self::promote_waiting(&mut state, compat);
        drop(state);
        queue.cv.notify_all();
    }

    fn transition_on_release(&self, txn: &TransactionContext, mode: LockMode) {
        use super::transaction::IsolationLevel::*;
        let warrants_shrinking = match txn.isolation_level() {
            ReadUncommitted => matches!(mode, LockMode::Exclusive),
            RepeatableRead => matches!(mode, LockMode::Shared | LockMode::Exclusive),
            ReadCommitted => true,
        };
        if warrants_shrinking {
            txn.enter_shrinking();
        }
    }

    // ------------------------------------------------------------------
    // Deadlock detection (spec.md §4.6.4)
    // ------------------------------------------------------------------

    fn start_deadlock_detection(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let manager = self.clone();
        let running = self.running.clone();
        let interval = self.cycle_detection_interval;
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                manager.run_cycle_detection_once();
            }
        });
        *self.detector.lock() = Some(handle);
    }

    /// Build the wait-for graph, find and abort every transaction
    /// currently at the head of a cycle, until none remain, then wake
    /// every queue so aborted waiters unwind.
    pub fn run_cycle_detection_once(&self) {
        let mut graph = self.build_wait_for_graph();
        let mut victims = Vec::new();
        while let Some(victim) = find_cycle(&graph) {
            victims.push(victim);
            graph.remove(&victim);
            for edges in graph.values_mut() {
                edges.retain(|&t| t != victim);
            }
        }
        if victims.is_empty() {
            return;
        }
        for victim in victims {
            if let Some(ctx) = self.txn_manager.get(victim) {
                ctx.set_state(TransactionState::Aborted);
            }
        }
        for queue in self.queues.lock().values() {
            let _state = queue.state.lock();
            queue.cv.notify_all();
        }
    }

    fn build_wait_for_graph(&self) -> HashMap<TxnId, Vec<TxnId>> {
        let mut graph: HashMap<TxnId, Vec<TxnId>> = HashMap::new();
        let queues = self.queues.lock();
        for queue in queues.values() {
            let state = queue.state.lock();
            let waiting: Vec<TxnId> = state.requests.iter().filter(|r| !r.granted).map(|r| r.txn_id).collect();
            let granted: Vec<TxnId> = state.requests.iter().filter(|r| r.granted).map(|r| r.txn_id).collect();
            for &w in &waiting {
                let entry = graph.entry(w).or_default();
                for &g in &granted {
                    if g != w && !entry.contains(&g) {
                        entry.push(g);
                    }
                }
            }
        }
        graph
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

/// DFS from the lowest-numbered transaction id upward; on a back-edge,
/// returns the highest (youngest) transaction id in the cycle just
/// closed, per spec.md §4.6.4.
fn find_cycle(graph: &HashMap<TxnId, Vec<TxnId>>) -> Option<TxnId> {
    let mut nodes: Vec<TxnId> = graph.keys().copied().collect();
    nodes.sort();

    let mut visited: HashSet<TxnId> = HashSet::new();
    for &start in &nodes {
        if visited.contains(&start) {
            continue;
        }
        let mut stack: Vec<TxnId> = Vec::new();
        let mut on_stack: HashSet<TxnId> = HashSet::new();
        if let Some(victim) = dfs_find_cycle(start, graph, &mut visited, &mut stack, &mut on_stack) {
            return Some(victim);
        }
    }
    None
}

fn dfs_find_cycle(
    node: TxnId,
    graph: &HashMap<TxnId, Vec<TxnId>>,
    visited: &mut HashSet<TxnId>,
    stack: &mut Vec<TxnId>,
    on_stack: &mut HashSet<TxnId>,
) -> Option<TxnId> {
    visited.insert(node);
    stack.push(node);
    on_stack.insert(node);

    if let Some(neighbors) = graph.get(&node) {
        let mut sorted = neighbors.clone();
        sorted.sort();
        for next in sorted {
            if on_stack.contains(&next) {
                let cycle_start = stack.iter().position(|&t| t == next).expect("on_stack implies in stack");
                let victim = stack[cycle_start..].iter().copied().max().expect("non-empty cycle");
                return Some(victim);
            }
            if !visited.contains(&next) {
                if let Some(victim) = dfs_find_cycle(next, graph, visited, stack, on_stack) {
                    return Some(victim);
                }
            }
        }
    }

    stack.pop();
    on_stack.remove(&node);
    None
}
