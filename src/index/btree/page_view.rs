//! Typed views over the raw bytes of B⁺-tree leaf and internal pages.
//!
//! Both page kinds share the same physical layout: a [`BTreePageHeader`]
//! followed by a flat array of fixed-width `(key, value)` slots starting at
//! [`BTreePageHeader::ENTRIES_BASE`]. Leaf values are [`Rid`]s; internal
//! values are child [`PageId`]s. Slot 0 of an internal page carries no
//! meaningful key — it only anchors the leftmost child pointer, matching
//! BusTub's internal node layout where `size` counts children and there are
//! always `size - 1` real separator keys.

use crate::common::{PageId, Rid};
use crate::storage::page::{BTreePageHeader, BTreePageType};

use super::key::{Comparator, FixedKey};

/// Byte-level accessors for leaf pages: entries are `(key, Rid)`.
pub struct LeafView;

impl LeafView {
    pub fn entry_size<K: FixedKey>() -> usize {
        K::SIZE + 8
    }

    pub fn max_size<K: FixedKey>() -> usize {
        crate::storage::page::max_entries_for(Self::entry_size::<K>())
    }

    fn offset<K: FixedKey>(i: usize) -> usize {
        BTreePageHeader::ENTRIES_BASE + i * Self::entry_size::<K>()
    }

    pub fn key_at<K: FixedKey>(data: &[u8], i: usize) -> K {
        let off = Self::offset::<K>(i);
        K::from_bytes(&data[off..off + K::SIZE])
    }

    pub fn rid_at<K: FixedKey>(data: &[u8], i: usize) -> Rid {
        let off = Self::offset::<K>(i) + K::SIZE;
        let raw = u64::from_le_bytes(data[off..off + 8].try_into().unwrap());
        Rid::from_u64(raw)
    }

    pub fn set_entry<K: FixedKey>(data: &mut [u8], i: usize, key: K, rid: Rid) {
        let es = Self::entry_size::<K>();
        let off = Self::offset::<K>(i);
        key.write_bytes(&mut data[off..off + K::SIZE]);
        data[off + K::SIZE..off + es].copy_from_slice(&rid.to_u64().to_le_bytes());
    }

    /// Shift entries `[i, size)` one slot to the right, then write `(key,
    /// rid)` into slot `i`. `size` is the entry count *before* the insert.
    pub fn insert_at<K: FixedKey>(data: &mut [u8], i: usize, size: usize, key: K, rid: Rid) {
        let es = Self::entry_size::<K>();
        for j in (i..size).rev() {
            let src = BTreePageHeader::ENTRIES_BASE + j * es;
            let dst = src + es;
            data.copy_within(src..src + es, dst);
        }
        Self::set_entry::<K>(data, i, key, rid);
    }

    /// Shift entries `(i, size)` one slot to the left, overwriting slot `i`.
    /// `size` is the entry count *before* the removal.
    pub fn remove_at<K: FixedKey>(data: &mut [u8], i: usize, size: usize) {
        let es = Self::entry_size::<K>();
        for j in i..size - 1 {
            let src = BTreePageHeader::ENTRIES_BASE + (j + 1) * es;
            let dst = BTreePageHeader::ENTRIES_BASE + j * es;
            data.copy_within(src..src + es, dst);
        }
    }

    pub fn init<K: FixedKey>(data: &mut [u8], page_id: PageId, max_size: usize) {
        BTreePageHeader {
            page_type: BTreePageType::Leaf,
            size: 0,
            max_size: max_size as u32,
            parent_page_id: PageId::INVALID,
            page_id,
            next_page_id: PageId::INVALID,
        }
        .write(data);
    }

    /// Binary search the `size` keys for `key`. `Ok(i)` if an entry with an
    /// equal key exists at slot `i`; `Err(i)` with the sorted insertion point
    /// otherwise.
    pub fn find_slot<K: FixedKey, Cmp: Comparator<K>>(
        data: &[u8],
        size: usize,
        key: &K,
        cmp: &Cmp,
    ) -> Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp.compare(&Self::key_at::<K>(data, mid), key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

/// Byte-level accessors for internal pages: entries are `(key, child PageId)`.
pub struct InternalView;

impl InternalView {
    pub fn entry_size<K: FixedKey>() -> usize {
        K::SIZE + 4
    }

    pub fn max_size<K: FixedKey>() -> usize {
        crate::storage::page::max_entries_for(Self::entry_size::<K>())
    }

    fn offset<K: FixedKey>(i: usize) -> usize {
        BTreePageHeader::ENTRIES_BASE + i * Self::entry_size::<K>()
    }

    /// Meaningful only for `i > 0`.
    pub fn key_at<K: FixedKey>(data: &[u8], i: usize) -> K {
        let off = Self::offset::<K>(i);
        K::from_bytes(&data[off..off + K::SIZE])
    }

    pub fn child_at<K: FixedKey>(data: &[u8], i: usize) -> PageId {
        let off = Self::offset::<K>(i) + K::SIZE;
        let raw = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
        PageId::new(raw)
    }

    pub fn set_entry<K: FixedKey>(data: &mut [u8], i: usize, key: K, child: PageId) {
        let es = Self::entry_size::<K>();
        let off = Self::offset::<K>(i);
        key.write_bytes(&mut data[off..off + K::SIZE]);
        data[off + K::SIZE..off + es].copy_from_slice(&child.0.to_le_bytes());
    }

    pub fn set_child_at<K: FixedKey>(data: &mut [u8], i: usize, child: PageId) {
        let es = Self::entry_size::<K>();
        let off = Self::offset::<K>(i) + K::SIZE;
        data[off..off + es - K::SIZE].copy_from_slice(&child.0.to_le_bytes());
    }

    /// Overwrite only the key bytes of slot `i`, leaving its child untouched.
    /// Used to rotate a separator key through a parent during redistribution.
    pub fn set_key_at<K: FixedKey>(data: &mut [u8], i: usize, key: K) {
        let off = Self::offset::<K>(i);
        key.write_bytes(&mut data[off..off + K::SIZE]);
    }

    /// Shift entries `[i, size)` one slot right, then write `(key, child)`
    /// into slot `i`. `size` is the entry count before the insert.
    pub fn insert_at<K: FixedKey>(data: &mut [u8], i: usize, size: usize, key: K, child: PageId) {
        let es = Self::entry_size::<K>();
        for j in (i..size).rev() {
            let src = BTreePageHeader::ENTRIES_BASE + j * es;
            let dst = src + es;
            data.copy_within(src..src + es, dst);
        }
        Self::set_entry::<K>(data, i, key, child);
    }

    pub fn remove_at<K: FixedKey>(data: &mut [u8], i: usize, size: usize) {
        let es = Self::entry_size::<K>();
        for j in i..size - 1 {
            let src = BTreePageHeader::ENTRIES_BASE + (j + 1) * es;
            let dst = BTreePageHeader::ENTRIES_BASE + j * es;
            data.copy_within(src..src + es, dst);
        }
    }

    pub fn init<K: FixedKey>(data: &mut [u8], page_id: PageId, max_size: usize) {
        BTreePageHeader {
            page_type: BTreePageType::Internal,
            size: 0,
            max_size: max_size as u32,
            parent_page_id: PageId::INVALID,
            page_id,
            next_page_id: PageId::INVALID,
        }
        .write(data);
    }

    /// Binary search among the `size - 1` real separator keys (slots
    /// `1..size`) for the child index to descend into for `key`. Returns the
    /// index `i` such that `key` belongs under `child_at(i)`.
    pub fn child_index_for<K: FixedKey, Cmp: Comparator<K>>(
        data: &[u8],
        size: usize,
        key: &K,
        cmp: &Cmp,
    ) -> usize {
        let mut lo = 1usize;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp.compare(&Self::key_at::<K>(data, mid), key) {
                std::cmp::Ordering::Less | std::cmp::Ordering::Equal => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        lo - 1
    }

    /// Sorted insertion point, among the real separator keys `[1, size)`,
    /// for a new `(key, child)` entry being propagated up from a split.
    pub fn insert_pos<K: FixedKey, Cmp: Comparator<K>>(
        data: &[u8],
        size: usize,
        key: &K,
        cmp: &Cmp,
    ) -> usize {
        let mut lo = 1usize;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp.compare(&Self::key_at::<K>(data, mid), key) {
                std::cmp::Ordering::Less | std::cmp::Ordering::Equal => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        lo
    }
}
