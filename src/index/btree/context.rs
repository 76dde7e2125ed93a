//! Latch-crabbing bookkeeping for a single insert/remove descent.
//!
//! An insert or delete holds write latches on an ordered stack of ancestor
//! pages — the dedicated root-pointer latch first, then page latches
//! root-to-leaf — for the whole operation, per `btree::mod`'s module doc:
//! structural changes always re-fetch their target by `PageId` rather than
//! trusting a stale reference, so correctness never depends on releasing
//! an ancestor the instant a descendant is proven safe.

use parking_lot::RwLockWriteGuard;

use crate::buffer::PageWriteGuard;
use crate::common::PageId;

/// `'root` bounds the root-pointer guard, scoped to a single call's borrow
/// of the tree; `'bpm` bounds the page guards, scoped to the buffer pool
/// manager's own lifetime. The two are unrelated: `root_id` is a field
/// owned directly by the tree, while every page guard is handed back by a
/// `&'bpm BufferPoolManager` the tree merely holds a reference to.
pub struct Context<'root, 'bpm> {
    /// The root-pointer latch, held for as long as the root itself (or the
    /// need to replace it) hasn't been ruled out.
    pub root_guard: Option<RwLockWriteGuard<'root, PageId>>,
    /// Write latches on pages from the (possibly already-released) root
    /// down to the current page, in descent order.
    pub write_set: Vec<PageWriteGuard<'bpm>>,
}

impl<'root, 'bpm> Context<'root, 'bpm> {
    pub fn new() -> Self {
        Self {
            root_guard: None,
            write_set: Vec::new(),
        }
    }

    pub fn push(&mut self, guard: PageWriteGuard<'bpm>) {
        self.write_set.push(guard);
    }
}

impl Default for Context<'_, '_> {
    fn default() -> Self {
        Self::new()
    }
}
