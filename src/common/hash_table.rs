//! Extendible hash table — concurrent `K → V` map used both as the buffer
//! pool's `PageId → FrameId` page table and as a general-purpose container.
//!
//! Amortized O(1) insert/lookup/remove with no full-table rehash: only the
//! overflowing bucket (and, when its local depth has caught up with the
//! global depth, the directory) ever grows.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

/// A bounded list of `(K, V)` entries plus the local depth that determines
/// how many directory slots currently point at this bucket
/// (`2^(global_depth - local_depth)`).
struct Bucket<K, V> {
    entries: Vec<(K, V)>,
    local_depth: usize,
}

impl<K: PartialEq, V> Bucket<K, V> {
    fn new(local_depth: usize) -> Self {
        Self {
            entries: Vec::new(),
            local_depth,
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

struct Directory<K, V> {
    global_depth: usize,
    buckets: Vec<Arc<RwLock<Bucket<K, V>>>>,
}

/// A concurrent extendible hash table mapping `K` to `V`.
///
/// # Concurrency
/// Readers take a shared guard on the directory to find the bucket Arc,
/// then a shared guard on the bucket itself; the directory guard is
/// released before the bucket guard is taken so a reader never blocks a
/// concurrent split any longer than necessary. A split (bucket overflow)
/// takes the directory's exclusive guard for its whole duration, since
/// splitting may rewrite a contiguous range of directory slots atomically
/// with respect to readers.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: RwLock<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new table with the given per-bucket capacity.
    ///
    /// # Panics
    /// Panics if `bucket_size` is 0.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket_size must be > 0");
        Self {
            bucket_size,
            inner: RwLock::new(Directory {
                global_depth: 0,
                buckets: vec![Arc::new(RwLock::new(Bucket::new(0)))],
            }),
        }
    }

    fn hash(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn index_for(key: &K, global_depth: usize) -> usize {
        if global_depth == 0 {
            0
        } else {
            (Self::hash(key) & ((1u64 << global_depth) - 1)) as usize
        }
    }

    /// Look up `key`, returning a clone of its value if present.
    pub fn find(&self, key: &K) -> Option<V> {
        let bucket = {
            let dir = self.inner.read();
            let idx = Self::index_for(key, dir.global_depth);
            Arc::clone(&dir.buckets[idx])
        };
        bucket.read().find(key).cloned()
    }

    /// Insert or update `key -> value`.
    ///
    /// If the key already exists, its value is updated in place. Otherwise
    /// the entry is appended to the target bucket, splitting (and, if
    /// necessary, doubling the directory) as many times as needed to make
    /// room.
    pub fn insert(&self, key: K, value: V) {
        loop {
            let bucket = {
                let dir = self.inner.read();
                let idx = Self::index_for(&key, dir.global_depth);
                Arc::clone(&dir.buckets[idx])
            };

            {
                let mut b = bucket.write();
                if let Some(slot) = b.entries.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                    return;
                }
                if b.entries.len() < self.bucket_size {
                    b.entries.push((key, value));
                    return;
                }
            }

            // Bucket is full: split (and maybe double the directory), then retry.
            self.split(&key);
        }
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let bucket = {
            let dir = self.inner.read();
            let idx = Self::index_for(key, dir.global_depth);
            Arc::clone(&dir.buckets[idx])
        };
        let mut b = bucket.write();
        let pos = b.entries.iter().position(|(k, _)| k == key)?;
        Some(b.entries.remove(pos).1)
    }

    /// Current global depth of the directory (`log2` of its length).
    pub fn global_depth(&self) -> usize {
        self.inner.read().global_depth
    }

    /// Number of directory slots (`2^global_depth`).
    pub fn directory_size(&self) -> usize {
        self.inner.read().buckets.len()
    }

    /// Local depth of the bucket pointed to by directory slot `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn local_depth(&self, index: usize) -> usize {
        self.inner.read().buckets[index].read().local_depth
    }

    /// Whether two directory slots currently point at the same bucket.
    /// Exposed for the extendible-hash invariant test in spec.md §8.
    pub fn same_bucket(&self, i: usize, j: usize) -> bool {
        let dir = self.inner.read();
        Arc::ptr_eq(&dir.buckets[i], &dir.buckets[j])
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        let dir = self.inner.read();
        let mut seen: Vec<*const RwLock<Bucket<K, V>>> = Vec::new();
        let mut total = 0;
        for b in &dir.buckets {
            let ptr = Arc::as_ptr(b);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            total += b.read().entries.len();
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect all `(K, V)` pairs currently stored. Used by callers (e.g.
    /// the buffer pool's `flush_all`) that need to iterate the full
    /// mapping; not constant-time, but bounded by the entry count.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let dir = self.inner.read();
        let mut seen: Vec<*const RwLock<Bucket<K, V>>> = Vec::new();
        let mut out = Vec::new();
        for b in &dir.buckets {
            let ptr = Arc::as_ptr(b);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            out.extend(b.read().entries.iter().cloned());
        }
        out
    }

    /// Split the bucket that owns `key`, doubling the directory first if the
    /// bucket's local depth has caught up with the global depth.
    fn split(&self, key: &K) {
        let mut dir = self.inner.write();
        let idx = Self::index_for(key, dir.global_depth);
        let bucket = Arc::clone(&dir.buckets[idx]);

        // Re-check under the write lock: another thread may have already
        // split this exact bucket while we waited for the lock.
        if bucket.read().entries.len() < self.bucket_size {
            return;
        }

        let local_depth = bucket.read().local_depth;
        if local_depth == dir.global_depth {
            // Append the directory to itself: new slot `j` aliases
            // `old[j & (old_len-1)]`, consistent with `index_for`'s
            // low-order-bit routing (the newly significant bit is the
            // high bit of the doubled directory, not an interleave).
            let old = dir.buckets.clone();
            dir.global_depth += 1;
            dir.buckets.extend(old);
        }

        let new_local_depth = local_depth + 1;
        let split_bit = 1usize << (new_local_depth - 1);
        let sibling = Arc::new(RwLock::new(Bucket::new(new_local_depth)));

        {
            let mut old_bucket = bucket.write();
            old_bucket.local_depth = new_local_depth;
            let drained: Vec<(K, V)> = std::mem::take(&mut old_bucket.entries);
            for (k, v) in drained {
                let h = Self::hash(&k) as usize;
                if h & split_bit != 0 {
                    sibling.write().entries.push((k, v));
                } else {
                    old_bucket.entries.push((k, v));
                }
            }
        }

        for i in 0..dir.buckets.len() {
            if Arc::ptr_eq(&dir.buckets[i], &bucket) && (i & split_bit) != 0 {
                dir.buckets[i] = Arc::clone(&sibling);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let table: ExtendibleHashTable<i32, &str> = ExtendibleHashTable::new(2);
        table.insert(1, "one");
        table.insert(2, "two");
        assert_eq!(table.find(&1), Some("one"));
        assert_eq!(table.find(&2), Some("two"));
        assert_eq!(table.find(&3), None);
    }

    #[test]
    fn test_update_existing_key() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(2);
        table.insert(1, 100);
        table.insert(1, 200);
        assert_eq!(table.find(&1), Some(200));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(2);
        table.insert(1, 100);
        assert_eq!(table.remove(&1), Some(100));
        assert_eq!(table.find(&1), None);
        assert_eq!(table.remove(&1), None);
    }

    #[test]
    fn test_split_grows_directory() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(2);
        for i in 0..64 {
            table.insert(i, i * 10);
        }
        assert!(table.global_depth() > 0);
        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert_eq!(table.len(), 64);
    }

    #[test]
    fn test_local_depth_invariant() {
        // spec.md Invariant 4: if directory[i] == directory[j] then their
        // low local_depth bits are equal.
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(2);
        for i in 0..200 {
            table.insert(i, i);
        }
        let dir_size = table.directory_size();
        for i in 0..dir_size {
            for j in (i + 1)..dir_size {
                if table.same_bucket(i, j) {
                    let depth = table.local_depth(i);
                    let mask = (1usize << depth) - 1;
                    assert_eq!(i & mask, j & mask);
                }
            }
        }
    }

    #[test]
    fn test_page_table_style_usage() {
        // Mirrors the buffer pool's PageId -> FrameId usage.
        let table: ExtendibleHashTable<u32, usize> = ExtendibleHashTable::new(4);
        for pid in 0..20u32 {
            table.insert(pid, pid as usize);
        }
        for pid in 0..20u32 {
            assert_eq!(table.find(&pid), Some(pid as usize));
        }
        table.remove(&5);
        assert_eq!(table.find(&5), None);
        assert_eq!(table.len(), 19);
    }
}
