//! Two-phase locking and per-transaction bookkeeping (spec.md §4.6, §4.7).

pub mod lock_manager;
pub mod transaction;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{IsolationLevel, TransactionContext, TransactionManager, TransactionState};
