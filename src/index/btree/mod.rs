//! Generic B⁺-tree index over fixed-width keys (spec.md §4.5).
//!
//! Every page of the tree lives in a normal buffer-pool page, typed as
//! either [`BTreePageType::Internal`] or [`BTreePageType::Leaf`] via the
//! views in [`page_view`]. Latch crabbing is implemented directly on top of
//! `BufferPoolManager`'s `fetch_page_read`/`fetch_page_write`: a page's
//! latch *is* its frame's `RwLock<Page>`, and dropping the returned guard
//! both releases the latch and unpins the page in one step.
//!
//! Mutating traversals (`insert`/`remove`) hold the dedicated root-pointer
//! latch (`root_id`) for the whole operation rather than releasing it the
//! instant the first safe node is found; structural changes that propagate
//! upward (`insert_in_parent`, `delete_entry`) always re-fetch/re-latch
//! their target by `PageId` rather than trusting a stale reference, so
//! correctness never depends on exactly when an ancestor latch would have
//! been dropped under a finer-grained scheme. Read-only traversals
//! (`get_value`, iteration) crab properly: a child's read latch is
//! acquired before the parent's is released.

pub mod context;
pub mod key;
pub mod page_view;

use crate::buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
use crate::common::{PageId, Rid};
use crate::storage::page::{BTreePageHeader, BTreePageType};

use context::Context;
use key::{Comparator, DefaultComparator, FixedKey};
use page_view::{InternalView, LeafView};

use parking_lot::RwLock;

/// A concurrent B⁺-tree mapping `K` to [`Rid`], backed by pages fetched
/// through a [`BufferPoolManager`].
pub struct BPlusTree<'bpm, K: FixedKey, Cmp: Comparator<K> = DefaultComparator> {
    bpm: &'bpm BufferPoolManager,
    root_id: RwLock<PageId>,
    leaf_max: usize,
    internal_max: usize,
    comparator: Cmp,
    _marker: std::marker::PhantomData<K>,
}

impl<'bpm, K: FixedKey> BPlusTree<'bpm, K, DefaultComparator> {
    /// Create an empty tree ordered by `K`'s natural `Ord`.
    ///
    /// # Panics
    /// Panics if `leaf_max` or `internal_max` is below 3 — below that no
    /// split/merge/redistribute can satisfy the fan-out bounds.
    pub fn new(bpm: &'bpm BufferPoolManager, leaf_max: usize, internal_max: usize) -> Self {
        Self::with_comparator(bpm, leaf_max, internal_max, DefaultComparator)
    }
}

impl<'bpm, K: FixedKey, Cmp: Comparator<K>> BPlusTree<'bpm, K, Cmp> {
    pub fn with_comparator(
        bpm: &'bpm BufferPoolManager,
        leaf_max: usize,
        internal_max: usize,
        comparator: Cmp,
    ) -> Self {
        assert!(leaf_max >= 3, "leaf_max must be >= 3");
        assert!(internal_max >= 3, "internal_max must be >= 3");
        Self {
            bpm,
            root_id: RwLock::new(PageId::INVALID),
            leaf_max,
            internal_max,
            comparator,
            _marker: std::marker::PhantomData,
        }
    }

    /// Whether the tree currently has no pages at all.
    pub fn is_empty(&self) -> bool {
        !self.root_id.read().is_valid()
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_id.read()
    }

    fn min_size(&self, page_type: BTreePageType) -> usize {
        self.max_size_for(page_type).div_ceil(2)
    }

    fn max_size_for(&self, page_type: BTreePageType) -> usize {
        match page_type {
            BTreePageType::Leaf => self.leaf_max,
            BTreePageType::Internal => self.internal_max,
            BTreePageType::Invalid => unreachable!("invalid page type"),
        }
    }

    fn set_parent(&self, page_id: PageId, parent_id: PageId) {
        if !page_id.is_valid() {
            return;
        }
        let mut guard = self
            .bpm
            .fetch_page_write(page_id)
            .expect("child page must exist");
        let mut header = BTreePageHeader::read(guard.as_slice());
        header.parent_page_id = parent_id;
        header.write(guard.as_mut_slice());
    }

    // ------------------------------------------------------------------
    // Search (spec.md §4.5.1)
    // ------------------------------------------------------------------

    /// Look up `key`, returning its `Rid` if present.
    ///
    /// Latch-crabs top to bottom: a child's read latch is acquired before
    /// the parent's is released, so a concurrent structural modification is
    /// never observed half-applied.
    pub fn get_value(&self, key: &K) -> Option<Rid> {
        let root = *self.root_id.read();
        if !root.is_valid() {
            return None;
        }

        let mut guard = self.bpm.fetch_page_read(root).ok()?;
        loop {
            let header = BTreePageHeader::read(guard.as_slice());
            match header.page_type {
                BTreePageType::Leaf => {
                    let size = header.size as usize;
                    return match LeafView::find_slot::<K, Cmp>(
                        guard.as_slice(),
                        size,
                        key,
                        &self.comparator,
                    ) {
                        Ok(i) => Some(LeafView::rid_at::<K>(guard.as_slice(), i)),
                        Err(_) => None,
                    };
                }
                BTreePageType::Internal => {
                    let idx = InternalView::child_index_for::<K, Cmp>(
                        guard.as_slice(),
                        header.size as usize,
                        key,
                        &self.comparator,
                    );
                    let child_id = InternalView::child_at::<K>(guard.as_slice(), idx);
                    let next: PageReadGuard<'_> = self.bpm.fetch_page_read(child_id).ok()?;
                    guard = next; // parent's read latch released here
                }
                BTreePageType::Invalid => unreachable!("invalid page encountered during descent"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Insert (spec.md §4.5.2)
    // ------------------------------------------------------------------

    /// Insert `(key, value)`. Returns `false` without structural change if
    /// `key` already exists.
    pub fn insert<'s>(&'s self, key: K, value: Rid) -> bool {
        let mut ctx = Context::new();
        let mut root_guard = self.root_id.write();

        if !root_guard.is_valid() {
            let mut guard = self.bpm.new_page().expect("buffer pool exhausted");
            let id = guard.page_id();
            LeafView::init::<K>(guard.as_mut_slice(), id, self.leaf_max);
            LeafView::insert_at::<K>(guard.as_mut_slice(), 0, 0, key, value);
            let mut header = BTreePageHeader::read(guard.as_slice());
            header.size = 1;
            header.write(guard.as_mut_slice());
            *root_guard = id;
            return true;
        }

        let mut current_id = *root_guard;
        ctx.root_guard = Some(root_guard);

        loop {
            let guard = self
                .bpm
                .fetch_page_write(current_id)
                .expect("page referenced by the tree must exist");
            let header = BTreePageHeader::read(guard.as_slice());
            let next_child = if header.page_type == BTreePageType::Leaf {
                None
            } else {
                let idx = InternalView::child_index_for::<K, Cmp>(
                    guard.as_slice(),
                    header.size as usize,
                    &key,
                    &self.comparator,
                );
                Some(InternalView::child_at::<K>(guard.as_slice(), idx))
            };
            ctx.push(guard);
            match next_child {
                None => break,
                Some(child_id) => current_id = child_id,
            }
        }

        let leaf_guard = ctx.write_set.last_mut().expect("descent always reaches a leaf");
        let header = BTreePageHeader::read(leaf_guard.as_slice());
        let size = header.size as usize;

        match LeafView::find_slot::<K, Cmp>(leaf_guard.as_slice(), size, &key, &self.comparator) {
            Ok(_) => false,
            Err(pos) => {
                LeafView::insert_at::<K>(leaf_guard.as_mut_slice(), pos, size, key, value);
                let mut new_header = header;
                new_header.size = (size + 1) as u32;
                new_header.write(leaf_guard.as_mut_slice());

                if new_header.size as usize >= self.leaf_max {
                    self.split_leaf_and_propagate(&mut ctx);
                }
                true
            }
        }
    }

    fn split_leaf_and_propagate<'s>(&'s self, ctx: &mut Context<'s, 'bpm>) {
        let mut left_guard = ctx.write_set.pop().expect("leaf just inserted into");
        let left_id = left_guard.page_id();
        let header = BTreePageHeader::read(left_guard.as_slice());
        let total = header.size as usize;
        let keep = total - total / 2; // left keeps the ceil half
        let move_count = total - keep;

        let mut right_guard = self.bpm.new_page().expect("buffer pool exhausted");
        let right_id = right_guard.page_id();
        LeafView::init::<K>(right_guard.as_mut_slice(), right_id, self.leaf_max);
        for i in 0..move_count {
            let k = LeafView::key_at::<K>(left_guard.as_slice(), keep + i);
            let v = LeafView::rid_at::<K>(left_guard.as_slice(), keep + i);
            LeafView::set_entry::<K>(right_guard.as_mut_slice(), i, k, v);
        }

        let mut right_header = BTreePageHeader::read(right_guard.as_slice());
        right_header.size = move_count as u32;
        right_header.next_page_id = header.next_page_id;
        right_header.parent_page_id = header.parent_page_id;
        right_header.write(right_guard.as_mut_slice());

        let mut left_header = header;
        left_header.size = keep as u32;
        left_header.next_page_id = right_id;
        left_header.write(left_guard.as_mut_slice());

        let separator_key = LeafView::key_at::<K>(right_guard.as_slice(), 0);
        drop(left_guard);
        drop(right_guard);

        self.insert_in_parent(ctx, left_id, separator_key, right_id);
    }

    fn insert_in_parent<'s>(&'s self, ctx: &mut Context<'s, 'bpm>, left_id: PageId, key: K, right_id: PageId) {
        if ctx.write_set.is_empty() {
            let mut root_guard = ctx
                .root_guard
                .take()
                .expect("a root-less split must still hold the root-pointer latch");
            let mut new_root = self.bpm.new_page().expect("buffer pool exhausted");
            let new_root_id = new_root.page_id();
            InternalView::init::<K>(new_root.as_mut_slice(), new_root_id, self.internal_max);
            InternalView::set_entry::<K>(new_root.as_mut_slice(), 0, K::default(), left_id);
            InternalView::set_entry::<K>(new_root.as_mut_slice(), 1, key, right_id);
            let mut new_header = BTreePageHeader::read(new_root.as_slice());
            new_header.size = 2;
            new_header.write(new_root.as_mut_slice());
            drop(new_root);

            self.set_parent(left_id, new_root_id);
            self.set_parent(right_id, new_root_id);
            *root_guard = new_root_id;
            return;
        }

        let mut parent_guard = ctx.write_set.pop().expect("checked non-empty above");
        let parent_id = parent_guard.page_id();
        let header = BTreePageHeader::read(parent_guard.as_slice());
        let size = header.size as usize;
        let pos =
            InternalView::insert_pos::<K, Cmp>(parent_guard.as_slice(), size, &key, &self.comparator);
        InternalView::insert_at::<K>(parent_guard.as_mut_slice(), pos, size, key, right_id);
        let mut new_header = header;
        new_header.size = (size + 1) as u32;
        new_header.write(parent_guard.as_mut_slice());
        self.set_parent(right_id, parent_id);

        // Split only on true overflow (one more child than `internal_max`
        // allows), not merely at capacity: splitting at exactly
        // `internal_max` leaves `mid = internal_max / 2` on the left, which
        // underflows `min_size` for odd `internal_max` (e.g. 3 -> mid=1 <
        // ceil(3/2)=2). Splitting at `internal_max + 1` keeps both halves
        // at or above `ceil(internal_max/2)`.
        if new_header.size as usize > self.internal_max {
            self.split_internal_and_propagate(ctx, parent_guard);
        } else {
            ctx.push(parent_guard);
        }
    }

    fn split_internal_and_propagate<'s>(&'s self, ctx: &mut Context<'s, 'bpm>, mut left_guard: PageWriteGuard<'bpm>) {
        let left_id = left_guard.page_id();
        let header = BTreePageHeader::read(left_guard.as_slice());
        let total = header.size as usize;
        let mid = total / 2;
        let median_key = InternalView::key_at::<K>(left_guard.as_slice(), mid);
        let mid_child = InternalView::child_at::<K>(left_guard.as_slice(), mid);

        let mut right_guard = self.bpm.new_page().expect("buffer pool exhausted");
        let right_id = right_guard.page_id();
        InternalView::init::<K>(right_guard.as_mut_slice(), right_id, self.internal_max);
        InternalView::set_entry::<K>(right_guard.as_mut_slice(), 0, K::default(), mid_child);
        for i in (mid + 1)..total {
            let k = InternalView::key_at::<K>(left_guard.as_slice(), i);
            let c = InternalView::child_at::<K>(left_guard.as_slice(), i);
            InternalView::set_entry::<K>(right_guard.as_mut_slice(), i - mid, k, c);
        }
        let right_size = total - mid;
        let mut right_header = BTreePageHeader::read(right_guard.as_slice());
        right_header.size = right_size as u32;
        right_header.parent_page_id = header.parent_page_id;
        right_header.write(right_guard.as_mut_slice());

        let mut left_header = header;
        left_header.size = mid as u32;
        left_header.write(left_guard.as_mut_slice());

        drop(left_guard);
        for i in 0..right_size {
            let child = InternalView::child_at::<K>(right_guard.as_slice(), i);
            self.set_parent(child, right_id);
        }
        drop(right_guard);

        self.insert_in_parent(ctx, left_id, median_key, right_id);
    }

    // ------------------------------------------------------------------
    // Delete (spec.md §4.5.3)
    // ------------------------------------------------------------------

    /// Remove `key` if present. A no-op (not an error) on an empty tree or
    /// absent key, per spec.md §4.5.6.
    pub fn remove<'s>(&'s self, key: &K) {
        let mut ctx = Context::new();
        let root_guard = self.root_id.write();
        if !root_guard.is_valid() {
            return;
        }

        let mut current_id = *root_guard;
        ctx.root_guard = Some(root_guard);

        loop {
            let guard = self
                .bpm
                .fetch_page_write(current_id)
                .expect("page referenced by the tree must exist");
            let header = BTreePageHeader::read(guard.as_slice());
            let next_child = if header.page_type == BTreePageType::Leaf {
                None
            } else {
                let idx =
                    InternalView::child_index_for::<K, Cmp>(guard.as_slice(), header.size as usize, key, &self.comparator);
                Some(InternalView::child_at::<K>(guard.as_slice(), idx))
            };
            ctx.push(guard);
            match next_child {
                None => break,
                Some(child_id) => current_id = child_id,
            }
        }

        let leaf_guard = ctx.write_set.last_mut().expect("descent always reaches a leaf");
        let header = BTreePageHeader::read(leaf_guard.as_slice());
        let size = header.size as usize;

        if let Ok(pos) = LeafView::find_slot::<K, Cmp>(leaf_guard.as_slice(), size, key, &self.comparator) {
            LeafView::remove_at::<K>(leaf_guard.as_mut_slice(), pos, size);
            let mut new_header = header;
            new_header.size = (size - 1) as u32;
            new_header.write(leaf_guard.as_mut_slice());
            self.delete_entry(&mut ctx);
        }
    }

    /// Fix up the page most recently modified in `ctx.write_set` (top of
    /// stack), merging or redistributing with a sibling if it underflowed,
    /// and recursing into the parent when a merge removes an entry there.
    fn delete_entry<'s>(&'s self, ctx: &mut Context<'s, 'bpm>) {
        let guard = ctx.write_set.pop().expect("caller just modified this page");
        let page_id = guard.page_id();
        let header = BTreePageHeader::read(guard.as_slice());

        if ctx.write_set.is_empty() {
            // `guard` is the root.
            if header.page_type == BTreePageType::Internal && header.size == 1 {
                let only_child = InternalView::child_at::<K>(guard.as_slice(), 0);
                drop(guard);
                self.set_parent(only_child, PageId::INVALID);
                self.bpm.delete_page(page_id).ok();
                if let Some(mut root_guard) = ctx.root_guard.take() {
                    *root_guard = only_child;
                }
            } else if header.page_type == BTreePageType::Leaf && header.size == 0 {
                drop(guard);
                self.bpm.delete_page(page_id).ok();
                if let Some(mut root_guard) = ctx.root_guard.take() {
                    *root_guard = PageId::INVALID;
                }
            }
            return;
        }

        if header.size as usize >= self.min_size(header.page_type) {
            return;
        }

        let mut parent_guard = ctx.write_set.pop().expect("non-root has a parent");
        let parent_id = parent_guard.page_id();
        let parent_header = BTreePageHeader::read(parent_guard.as_slice());
        let parent_size = parent_header.size as usize;
        let this_idx = (0..parent_size)
            .find(|&i| InternalView::child_at::<K>(parent_guard.as_slice(), i) == page_id)
            .expect("page must be a child of its recorded parent");

        match header.page_type {
            BTreePageType::Leaf => {
                self.fixup_leaf_underflow(guard, &mut parent_guard, this_idx, parent_size);
            }
            BTreePageType::Internal => {
                self.fixup_internal_underflow(guard, &mut parent_guard, this_idx, parent_size);
            }
            BTreePageType::Invalid => unreachable!("invalid page type"),
        }

        ctx.push(parent_guard);
        self.delete_entry(ctx);
    }

    fn sibling_ids(
        parent_guard: &PageWriteGuard<'bpm>,
        this_idx: usize,
        parent_size: usize,
    ) -> (Option<PageId>, Option<PageId>) {
        let left = if this_idx > 0 {
            Some(InternalView::child_at::<K>(parent_guard.as_slice(), this_idx - 1))
        } else {
            None
        };
        let right = if this_idx + 1 < parent_size {
            Some(InternalView::child_at::<K>(parent_guard.as_slice(), this_idx + 1))
        } else {
            None
        };
        (left, right)
    }

    fn fixup_leaf_underflow(
        &self,
        mut node: PageWriteGuard<'bpm>,
        parent_guard: &mut PageWriteGuard<'bpm>,
        this_idx: usize,
        parent_size: usize,
    ) {
        let node_id = node.page_id();
        let node_size = BTreePageHeader::read(node.as_slice()).size as usize;
        let (left_id, right_id) = Self::sibling_ids(parent_guard, this_idx, parent_size);

        if let Some(left_id) = left_id {
            let mut left = self.bpm.fetch_page_write(left_id).expect("sibling must exist");
            let left_size = BTreePageHeader::read(left.as_slice()).size as usize;
            if left_size + node_size <= self.leaf_max - 1 {
                // Merge node into left sibling; drop the parent slot that
                // pointed at `node`.
                for i in 0..node_size {
                    let k = LeafView::key_at::<K>(node.as_slice(), i);
                    let v = LeafView::rid_at::<K>(node.as_slice(), i);
                    LeafView::set_entry::<K>(left.as_mut_slice(), left_size + i, k, v);
                }
                let node_next = BTreePageHeader::read(node.as_slice()).next_page_id;
                let mut left_header = BTreePageHeader::read(left.as_slice());
                left_header.size = (left_size + node_size) as u32;
                left_header.next_page_id = node_next;
                left_header.write(left.as_mut_slice());
                drop(left);
                drop(node);
                self.bpm.delete_page(node_id).ok();
                InternalView::remove_at::<K>(parent_guard.as_mut_slice(), this_idx, parent_size);
                let mut ph = BTreePageHeader::read(parent_guard.as_slice());
                ph.size = (parent_size - 1) as u32;
                ph.write(parent_guard.as_mut_slice());
                return;
            }
            // Redistribute: move the left sibling's richest entry into
            // `node`, rotate the new first key into the parent.
            let move_idx = left_size - 1;
            let k = LeafView::key_at::<K>(left.as_slice(), move_idx);
            let v = LeafView::rid_at::<K>(left.as_slice(), move_idx);
            LeafView::insert_at::<K>(node.as_mut_slice(), 0, node_size, k, v);
            LeafView::remove_at::<K>(left.as_mut_slice(), move_idx, left_size);
            let mut left_header = BTreePageHeader::read(left.as_slice());
            left_header.size = (left_size - 1) as u32;
            left_header.write(left.as_mut_slice());
            let mut node_header = BTreePageHeader::read(node.as_slice());
            node_header.size = (node_size + 1) as u32;
            node_header.write(node.as_mut_slice());
            InternalView::set_key_at::<K>(parent_guard.as_mut_slice(), this_idx, k);
            return;
        }

        let right_id = right_id.expect("underflowing non-root leaf has at least one sibling");
        let mut right = self.bpm.fetch_page_write(right_id).expect("sibling must exist");
        let right_size = BTreePageHeader::read(right.as_slice()).size as usize;

        if node_size + right_size <= self.leaf_max - 1 {
            for i in 0..right_size {
                let k = LeafView::key_at::<K>(right.as_slice(), i);
                let v = LeafView::rid_at::<K>(right.as_slice(), i);
                LeafView::set_entry::<K>(node.as_mut_slice(), node_size + i, k, v);
            }
            let right_next = BTreePageHeader::read(right.as_slice()).next_page_id;
            let mut node_header = BTreePageHeader::read(node.as_slice());
            node_header.size = (node_size + right_size) as u32;
            node_header.next_page_id = right_next;
            node_header.write(node.as_mut_slice());
            let right_page_id = right.page_id();
            drop(right);
            drop(node);
            self.bpm.delete_page(right_page_id).ok();
            InternalView::remove_at::<K>(parent_guard.as_mut_slice(), this_idx + 1, parent_size);
            let mut ph = BTreePageHeader::read(parent_guard.as_slice());
            ph.size = (parent_size - 1) as u32;
            ph.write(parent_guard.as_mut_slice());
            return;
        }

        // Redistribute: pull the right sibling's first entry into `node`.
        let k = LeafView::key_at::<K>(right.as_slice(), 0);
        let v = LeafView::rid_at::<K>(right.as_slice(), 0);
        LeafView::insert_at::<K>(node.as_mut_slice(), node_size, node_size, k, v);
        LeafView::remove_at::<K>(right.as_mut_slice(), 0, right_size);
        let mut right_header = BTreePageHeader::read(right.as_slice());
        right_header.size = (right_size - 1) as u32;
        right_header.write(right.as_mut_slice());
        let mut node_header = BTreePageHeader::read(node.as_slice());
        node_header.size = (node_size + 1) as u32;
        node_header.write(node.as_mut_slice());
        let new_right_first = LeafView::key_at::<K>(right.as_slice(), 0);
        InternalView::set_key_at::<K>(parent_guard.as_mut_slice(), this_idx + 1, new_right_first);
    }

    fn fixup_internal_underflow(
        &self,
        mut node: PageWriteGuard<'bpm>,
        parent_guard: &mut PageWriteGuard<'bpm>,
        this_idx: usize,
        parent_size: usize,
    ) {
        let node_id = node.page_id();
        let node_size = BTreePageHeader::read(node.as_slice()).size as usize;
        let (left_id, right_id) = Self::sibling_ids(parent_guard, this_idx, parent_size);

        if let Some(left_id) = left_id {
            let mut left = self.bpm.fetch_page_write(left_id).expect("sibling must exist");
            let left_size = BTreePageHeader::read(left.as_slice()).size as usize;
            if left_size + node_size <= self.internal_max {
                let separator = InternalView::key_at::<K>(parent_guard.as_slice(), this_idx);
                let node_first_child = InternalView::child_at::<K>(node.as_slice(), 0);
                InternalView::set_entry::<K>(left.as_mut_slice(), left_size, separator, node_first_child);
                for i in 1..node_size {
                    let k = InternalView::key_at::<K>(node.as_slice(), i);
                    let c = InternalView::child_at::<K>(node.as_slice(), i);
                    InternalView::set_entry::<K>(left.as_mut_slice(), left_size + i, k, c);
                }
                let new_left_size = left_size + node_size;
                let mut left_header = BTreePageHeader::read(left.as_slice());
                left_header.size = new_left_size as u32;
                left_header.write(left.as_mut_slice());
                for i in left_size..new_left_size {
                    let c = InternalView::child_at::<K>(left.as_slice(), i);
                    self.set_parent(c, left_id);
                }
                drop(left);
                drop(node);
                self.bpm.delete_page(node_id).ok();
                InternalView::remove_at::<K>(parent_guard.as_mut_slice(), this_idx, parent_size);
                let mut ph = BTreePageHeader::read(parent_guard.as_slice());
                ph.size = (parent_size - 1) as u32;
                ph.write(parent_guard.as_mut_slice());
                return;
            }
            // Redistribute: rotate the left sibling's last child through
            // the parent's separator into `node`'s front.
            let separator = InternalView::key_at::<K>(parent_guard.as_slice(), this_idx);
            let moved_child = InternalView::child_at::<K>(left.as_slice(), left_size - 1);
            let new_separator = InternalView::key_at::<K>(left.as_slice(), left_size - 1);
            InternalView::insert_at::<K>(node.as_mut_slice(), 0, node_size, separator, moved_child);
            InternalView::remove_at::<K>(left.as_mut_slice(), left_size - 1, left_size);
            let mut left_header = BTreePageHeader::read(left.as_slice());
            left_header.size = (left_size - 1) as u32;
            left_header.write(left.as_mut_slice());
            let mut node_header = BTreePageHeader::read(node.as_slice());
            node_header.size = (node_size + 1) as u32;
            node_header.write(node.as_mut_slice());
            InternalView::set_key_at::<K>(parent_guard.as_mut_slice(), this_idx, new_separator);
            self.set_parent(moved_child, node_id);
            return;
        }

        let right_id = right_id.expect("underflowing non-root internal has at least one sibling");
        let mut right = self.bpm.fetch_page_write(right_id).expect("sibling must exist");
        let right_size = BTreePageHeader::read(right.as_slice()).size as usize;

        if node_size + right_size <= self.internal_max {
            let separator = InternalView::key_at::<K>(parent_guard.as_slice(), this_idx + 1);
            let right_first_child = InternalView::child_at::<K>(right.as_slice(), 0);
            InternalView::set_entry::<K>(node.as_mut_slice(), node_size, separator, right_first_child);
            for i in 1..right_size {
                let k = InternalView::key_at::<K>(right.as_slice(), i);
                let c = InternalView::child_at::<K>(right.as_slice(), i);
                InternalView::set_entry::<K>(node.as_mut_slice(), node_size + i, k, c);
            }
            let new_node_size = node_size + right_size;
            let mut node_header = BTreePageHeader::read(node.as_slice());
            node_header.size = new_node_size as u32;
            node_header.write(node.as_mut_slice());
            for i in node_size..new_node_size {
                let c = InternalView::child_at::<K>(node.as_slice(), i);
                self.set_parent(c, node_id);
            }
            let right_page_id = right.page_id();
            drop(right);
            drop(node);
            self.bpm.delete_page(right_page_id).ok();
            InternalView::remove_at::<K>(parent_guard.as_mut_slice(), this_idx + 1, parent_size);
            let mut ph = BTreePageHeader::read(parent_guard.as_slice());
            ph.size = (parent_size - 1) as u32;
            ph.write(parent_guard.as_mut_slice());
            return;
        }

        // Redistribute: rotate the right sibling's first child through the
        // parent's separator into `node`'s back.
        let separator = InternalView::key_at::<K>(parent_guard.as_slice(), this_idx + 1);
        let moved_child = InternalView::child_at::<K>(right.as_slice(), 0);
        let new_separator = InternalView::key_at::<K>(right.as_slice(), 1);
        InternalView::set_entry::<K>(node.as_mut_slice(), node_size, separator, moved_child);
        InternalView::remove_at::<K>(right.as_mut_slice(), 0, right_size);
        let mut right_header = BTreePageHeader::read(right.as_slice());
        right_header.size = (right_size - 1) as u32;
        right_header.write(right.as_mut_slice());
        let mut node_header = BTreePageHeader::read(node.as_slice());
        node_header.size = (node_size + 1) as u32;
        node_header.write(node.as_mut_slice());
        InternalView::set_key_at::<K>(parent_guard.as_mut_slice(), this_idx + 1, new_separator);
        self.set_parent(moved_child, node_id);
    }

    // ------------------------------------------------------------------
    // Iteration (spec.md §4.5.4)
    // ------------------------------------------------------------------

    /// Forward iterator over the whole tree in ascending key order.
    pub fn iter(&self) -> TreeIter<'_, 'bpm, K, Cmp> {
        self.iter_from_key(None)
    }

    /// Forward iterator starting at the first key `>= key`.
    pub fn iter_from(&self, key: K) -> TreeIter<'_, 'bpm, K, Cmp> {
        self.iter_from_key(Some(key))
    }

    fn iter_from_key(&self, key: Option<K>) -> TreeIter<'_, 'bpm, K, Cmp> {
        let root = *self.root_id.read();
        if !root.is_valid() {
            return TreeIter { tree: self, leaf: None, index: 0 };
        }

        let mut guard = self.bpm.fetch_page_read(root).expect("root page must exist");
        loop {
            let header = BTreePageHeader::read(guard.as_slice());
            if header.page_type == BTreePageType::Leaf {
                break;
            }
            let idx = match &key {
                Some(k) => {
                    InternalView::child_index_for::<K, Cmp>(guard.as_slice(), header.size as usize, k, &self.comparator)
                }
                None => 0,
            };
            let child_id = InternalView::child_at::<K>(guard.as_slice(), idx);
            guard = self.bpm.fetch_page_read(child_id).expect("child page must exist");
        }

        let header = BTreePageHeader::read(guard.as_slice());
        let size = header.size as usize;
        let index = match &key {
            Some(k) => match LeafView::find_slot::<K, Cmp>(guard.as_slice(), size, k, &self.comparator) {
                Ok(i) | Err(i) => i,
            },
            None => 0,
        };

        TreeIter { tree: self, leaf: Some(guard), index }
    }
}

/// Forward iterator yielding `(key, Rid)` pairs in ascending order. Holds a
/// read latch on the current leaf, releasing it only when it advances past
/// the last entry and acquires the next leaf via `next_page_id`. Ends at
/// the sentinel `PageId::INVALID`, per spec.md §4.5.6.
pub struct TreeIter<'a, 'bpm, K: FixedKey, Cmp: Comparator<K>> {
    tree: &'a BPlusTree<'bpm, K, Cmp>,
    leaf: Option<PageReadGuard<'bpm>>,
    index: usize,
}

impl<K: FixedKey, Cmp: Comparator<K>> Iterator for TreeIter<'_, '_, K, Cmp> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.leaf.as_ref()?;
            let header = BTreePageHeader::read(guard.as_slice());
            let size = header.size as usize;
            if self.index < size {
                let key = LeafView::key_at::<K>(guard.as_slice(), self.index);
                let rid = LeafView::rid_at::<K>(guard.as_slice(), self.index);
                self.index += 1;
                return Some((key, rid));
            }
            let next_id = header.next_page_id;
            if !next_id.is_valid() {
                self.leaf = None;
                return None;
            }
            self.leaf = Some(
                self.tree
                    .bpm
                    .fetch_page_read(next_id)
                    .expect("linked leaf page must exist"),
            );
            self.index = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn setup(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("btree_test.db");
        let dm = DiskManager::create(&path).unwrap();
        let mut config = Config::new_for_testing();
        config.pool_size = pool_size;
        (BufferPoolManager::new(config, dm), dir)
    }

    #[test]
    fn test_empty_tree_get_value() {
        let (bpm, _dir) = setup(16);
        let tree: BPlusTree<i32> = BPlusTree::new(&bpm, 5, 5);
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&1), None);
    }

    #[test]
    fn test_insert_and_search_basic() {
        // spec.md E2: leaf_max=5, internal_max=5, keys 1..=5.
        let (bpm, _dir) = setup(32);
        let tree: BPlusTree<i32> = BPlusTree::new(&bpm, 5, 5);

        for k in 1..=5 {
            assert!(tree.insert(k, Rid::new(PageId::new(0), k as u32)));
        }
        for k in 1..=5 {
            assert_eq!(tree.get_value(&k), Some(Rid::new(PageId::new(0), k as u32)));
        }

        let collected: Vec<_> = tree.iter_from(3).map(|(k, _)| k).collect();
        assert_eq!(collected, vec![3, 4, 5]);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let (bpm, _dir) = setup(16);
        let tree: BPlusTree<i32> = BPlusTree::new(&bpm, 4, 4);
        assert!(tree.insert(1, Rid::new(PageId::new(0), 1)));
        assert!(!tree.insert(1, Rid::new(PageId::new(0), 2)));
        assert_eq!(tree.get_value(&1), Some(Rid::new(PageId::new(0), 1)));
    }

    #[test]
    fn test_inserts_cause_splits_and_order_is_preserved() {
        // spec.md E3: leaf_max=3, internal_max=3, descending insert order.
        let (bpm, _dir) = setup(64);
        let tree: BPlusTree<i32> = BPlusTree::new(&bpm, 3, 3);

        for k in [5, 4, 3, 2, 1] {
            assert!(tree.insert(k, Rid::new(PageId::new(0), k as u32)));
        }

        let collected: Vec<_> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected, vec![1, 2, 3, 4, 5]);

        for k in 1..=5 {
            assert_eq!(tree.get_value(&k), Some(Rid::new(PageId::new(0), k as u32)));
        }
    }

    #[test]
    fn test_range_delete_with_coalesce() {
        // spec.md E4: leaf_max=3, internal_max=3.
        let (bpm, _dir) = setup(64);
        let tree: BPlusTree<i32> = BPlusTree::new(&bpm, 3, 3);

        for k in 1..=5 {
            tree.insert(k, Rid::new(PageId::new(0), k as u32));
        }

        tree.remove(&1);
        tree.remove(&5);
        tree.remove(&3);

        let remaining: Vec<_> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(remaining, vec![2, 4]);
        assert_eq!(tree.get_value(&1), None);
        assert_eq!(tree.get_value(&2), Some(Rid::new(PageId::new(0), 2)));
    }

    #[test]
    fn test_round_trip_insert_then_remove_all() {
        // spec.md invariant 7.
        let (bpm, _dir) = setup(64);
        let tree: BPlusTree<i32> = BPlusTree::new(&bpm, 4, 4);

        let keys: Vec<i32> = (0..40).collect();
        for &k in &keys {
            assert!(tree.insert(k, Rid::new(PageId::new(0), k as u32)));
        }
        for &k in &keys {
            tree.remove(&k);
        }

        assert!(tree.is_empty());
        assert_eq!(tree.iter().count(), 0);
    }

    #[test]
    fn test_remove_on_empty_tree_is_noop() {
        let (bpm, _dir) = setup(16);
        let tree: BPlusTree<i32> = BPlusTree::new(&bpm, 4, 4);
        tree.remove(&1); // must not panic
        assert!(tree.is_empty());
    }

    #[test]
    fn test_large_sequential_insert_and_reverse_delete() {
        let (bpm, _dir) = setup(128);
        let tree: BPlusTree<i64> = BPlusTree::new(&bpm, 4, 4);

        let keys: Vec<i64> = (0..200).collect();
        for &k in &keys {
            assert!(tree.insert(k, Rid::new(PageId::new(0), k as u32)));
        }
        let collected: Vec<_> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected, keys);

        for &k in keys.iter().rev() {
            tree.remove(&k);
        }
        assert!(tree.is_empty());
    }
}
