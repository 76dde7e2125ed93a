//! Error types for InterchangeDB.

use thiserror::Error as ThisError;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// Why the lock manager aborted a transaction.
///
/// Kept distinct from `Error` so callers can match on the exact rule
/// violated without string-parsing a message, matching the reason codes
/// the source used internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock was requested after the transaction entered `SHRINKING`
    /// in a way not permitted by its isolation level.
    LockOnShrinking,
    /// A shared lock was requested under `READ_UNCOMMITTED`.
    LockSharedOnReadUncommitted,
    /// The requested lock upgrade is not a legal transition from the
    /// currently held mode.
    IncompatibleUpgrade,
    /// Another transaction already has an upgrade outstanding on this
    /// queue.
    UpgradeConflict,
    /// `unlock` was called for an object with no lock held.
    NoLockHeld,
    /// `unlock_table` was called while row locks on that table are still
    /// held.
    UnlockedBeforeRows,
    /// A row lock was requested without the required table-level lock.
    TableLockNotPresent,
    /// An intention lock (IS/IX/SIX) was requested at row granularity.
    IntentionLockOnRow,
    /// The deadlock detector chose this transaction as the cycle victim.
    DeadlockVictim,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbortReason::LockOnShrinking => "lock requested while transaction is shrinking",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under READ_UNCOMMITTED"
            }
            AbortReason::IncompatibleUpgrade => "incompatible lock upgrade requested",
            AbortReason::UpgradeConflict => "another transaction is already upgrading this lock",
            AbortReason::NoLockHeld => "no lock held on the requested object",
            AbortReason::UnlockedBeforeRows => "table unlocked while row locks are still held",
            AbortReason::TableLockNotPresent => "required table lock not held for row lock",
            AbortReason::IntentionLockOnRow => "intention lock requested at row granularity",
            AbortReason::DeadlockVictim => "selected as deadlock victim",
        };
        write!(f, "{s}")
    }
}

/// All possible errors in InterchangeDB.
///
/// This enum represents every error that can occur in the database.
/// By having a single error type, we make error handling consistent
/// across all crates.
#[derive(Debug, ThisError)]
pub enum Error {
    /// I/O error from disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist on disk.
    #[error("page {0} not found")]
    PageNotFound(u32),

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when all frames are pinned.
    #[error("buffer pool exhausted: no free frames available")]
    Exhausted,

    /// The provided page ID is invalid (e.g., exceeds max pages).
    #[error("invalid page ID: {0}")]
    InvalidPageId(u32),

    /// Requested key/entry not found in an index or container.
    #[error("key not found")]
    NotFound,

    /// Replacer was asked to remove a frame that is in use and not
    /// marked evictable.
    #[error("frame {0} is not evictable")]
    NotEvictable(usize),

    /// Attempted to unpin a page that wasn't pinned.
    ///
    /// This indicates a bug - unpinning should match pinning.
    #[error("page {0} is not pinned")]
    PageNotPinned(u32),

    /// A transaction was aborted by the lock manager or deadlock
    /// detector; carries the specific rule that was violated.
    #[error("transaction aborted: {0}")]
    TransactionAborted(AbortReason),
}

impl Error {
    /// Convenience constructor matching the spec's named error kinds.
    pub fn transaction_aborted(reason: AbortReason) -> Self {
        Error::TransactionAborted(reason)
    }
}
