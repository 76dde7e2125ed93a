//! Buffer Pool Manager - the core page caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting
//! - Automatic dirty page write-back
//! - LRU-K victim selection via the extendible-hash page table

use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::buffer::replacer::LruKReplacer;
use crate::buffer::{BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::{Config, Error, ExtendibleHashTable, FrameId, PageId, Result};
use crate::storage::DiskManager;

/// Manages a pool of buffer frames for caching disk pages.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌──────────────────────┐  ┌───────────────────────────┐   │
/// │  │ page_table           │  │     frames: Vec<Frame>     │   │
/// │  │ ExtendibleHashTable   │─▶│ [Frame0] [Frame1] ...     │   │
/// │  │ PageId → FrameId      │  └───────────────────────────┘   │
/// │  └──────────────────────┘                                   │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
/// │  │  free_list   │  │   replacer   │  │disk_manager  │      │
/// │  │ Vec<FrameId> │  │ LruKReplacer │  │   Mutex      │      │
/// │  └──────────────┘  └──────────────┘  └──────────────┘      │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `page_table`: internally synchronized (`ExtendibleHashTable`)
/// - `free_list`: `Mutex` — always modified
/// - `replacer`: `Mutex` — internal state changes on access
/// - `disk_manager`: `Mutex` — single-threaded I/O
/// - `frames`: No lock — fixed size, each Frame has internal locks
/// - `stats`: No lock — all atomic counters
///
/// # Usage
/// ```ignore
/// let dm = DiskManager::create("test.db")?;
/// let bpm = BufferPoolManager::new(Config::new_for_testing(), dm);
///
/// // Allocate a new page
/// let mut guard = bpm.new_page()?;
/// guard.as_mut_slice()[0] = 0xAB;
/// // guard drops: page marked dirty, unpinned
///
/// // Fetch existing page for reading
/// let guard = bpm.fetch_page_read(PageId::new(0))?;
/// let data = guard.as_slice();
/// ```
pub struct BufferPoolManager {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,

    /// Maps page IDs to frame IDs.
    page_table: ExtendibleHashTable<PageId, FrameId>,

    /// Stack of free frame IDs (LIFO for cache locality).
    free_list: Mutex<Vec<FrameId>>,

    /// Eviction policy for selecting victim frames.
    replacer: Mutex<LruKReplacer>,

    /// Handles all disk I/O.
    disk_manager: Mutex<DiskManager>,

    /// Performance statistics.
    stats: BufferPoolStats,

    /// Number of frames in the pool (immutable after construction).
    pool_size: usize,
}

impl BufferPoolManager {
    /// Create a new buffer pool manager.
    ///
    /// # Panics
    /// Panics if `config.pool_size` is 0.
    pub fn new(config: Config, disk_manager: DiskManager) -> Self {
        assert!(config.pool_size > 0, "pool_size must be > 0");

        let frames: Vec<Frame> = (0..config.pool_size).map(|_| Frame::new()).collect();
        let free_list: Vec<FrameId> = (0..config.pool_size).map(FrameId::new).collect();

        Self {
            frames,
            page_table: ExtendibleHashTable::new(config.bucket_size),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(LruKReplacer::new(config.lru_k)),
            disk_manager: Mutex::new(disk_manager),
            stats: BufferPoolStats::new(),
            pool_size: config.pool_size,
        }
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page for reading (shared access).
    ///
    /// If the page is already in the buffer pool, returns immediately.
    /// Otherwise, loads the page from disk (possibly evicting another page).
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page doesn't exist on disk
    /// - `Error::Exhausted` if all frames are pinned
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page();

        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for writing (exclusive access).
    ///
    /// Same as `fetch_page_read`, but returns an exclusive guard.
    /// The page is automatically marked dirty when the guard drops.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page doesn't exist on disk
    /// - `Error::Exhausted` if all frames are pinned
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_page_internal(page_id)?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    // ========================================================================
    // Public API: Create and delete pages
    // ========================================================================

    /// Allocate a new page on disk and load it into the buffer pool.
    ///
    /// Returns a write guard for the new page.
    ///
    /// # Errors
    /// - `Error::Exhausted` if all frames are pinned
    /// - I/O errors from disk allocation
    pub fn new_page(&self) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.get_free_frame()?;

        let page_id = {
            let mut dm = self.disk_manager.lock();
            dm.allocate_page()?
        };

        let frame = &self.frames[frame_id.0];

        frame.page_mut().reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.insert(page_id, frame_id);

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        let lock = frame.page_mut();

        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    /// Delete a page from the buffer pool.
    ///
    /// The page must not be pinned. This removes the page from the buffer pool
    /// but does NOT deallocate it on disk.
    ///
    /// # Errors
    /// - Returns `Error::PageNotPinned` if page is still pinned
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(()); // Page not in pool, nothing to do
        };

        let frame = &self.frames[frame_id.0];

        if frame.is_pinned() {
            return Err(Error::PageNotPinned(page_id.0));
        }

        self.page_table.remove(&page_id);

        frame.set_page_id(None);
        frame.clear_dirty();

        {
            let mut replacer = self.replacer.lock();
            // Evictable should already be true for an unpinned frame, but
            // mark it explicitly so `remove` never observes NotEvictable.
            replacer.set_evictable(frame_id, true);
            replacer.remove(frame_id);
        }

        {
            let mut fl = self.free_list.lock();
            fl.push(frame_id);
        }

        Ok(())
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Flush a specific page to disk unconditionally.
    ///
    /// # Errors
    /// - I/O errors from disk write
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(()); // Page not in pool
        };
        self.flush_frame_unconditional(frame_id, page_id)
    }

    /// Flush all dirty pages to disk.
    ///
    /// # Errors
    /// - I/O errors from disk writes
    pub fn flush_all_pages(&self) -> Result<()> {
        for (page_id, frame_id) in self.page_table.snapshot() {
            self.flush_frame(frame_id, page_id)?;
        }
        Ok(())
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Get the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Get the number of pages in the buffer pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    // ========================================================================
    // Internal: Called by PageGuard on drop
    // ========================================================================

    /// Unpin a page. Called by PageReadGuard/PageWriteGuard on drop.
    ///
    /// This is `pub(crate)` so guards in the same module can call it.
    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];

        if is_dirty {
            frame.mark_dirty();
        }

        let new_pin_count = frame.unpin();

        if new_pin_count == 0 {
            let mut replacer = self.replacer.lock();
            replacer.set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Fetch a page into the buffer pool, returning its frame ID.
    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        if let Some(frame_id) = self.page_table.find(&page_id) {
            self.handle_cache_hit(frame_id);
            return Ok(frame_id);
        }

        self.handle_cache_miss(page_id)
    }

    /// Handle a cache hit: pin the frame and update replacer.
    fn handle_cache_hit(&self, frame_id: FrameId) {
        let frame = &self.frames[frame_id.0];
        frame.pin();

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Handle a cache miss: get a frame, load from disk, update mappings.
    fn handle_cache_miss(&self, page_id: PageId) -> Result<FrameId> {
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let frame_id = self.get_free_frame()?;

        let page_data = {
            let mut dm = self.disk_manager.lock();
            dm.read_page(page_id)?
        };

        self.stats.pages_read.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];

        {
            let mut page = frame.page_mut();
            page.as_mut_slice().copy_from_slice(page_data.as_slice());
        }

        frame.set_page_id(Some(page_id));
        frame.pin();

        self.page_table.insert(page_id, frame_id);

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
        }

        Ok(frame_id)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    /// Get a free frame, evicting if necessary.
    fn get_free_frame(&self) -> Result<FrameId> {
        {
            let mut fl = self.free_list.lock();
            if let Some(frame_id) = fl.pop() {
                return Ok(frame_id);
            }
        }

        self.evict_page()
    }

    /// Evict a page and return its frame.
    fn evict_page(&self) -> Result<FrameId> {
        let frame_id = {
            let mut replacer = self.replacer.lock();
            replacer.evict().ok_or(Error::Exhausted)?
        };

        self.stats.evictions.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            if let Some(pid) = old_page_id {
                self.flush_frame(frame_id, pid)?;
            }
        }

        if let Some(pid) = old_page_id {
            self.page_table.remove(&pid);
        }

        frame.clear_dirty();
        frame.set_page_id(None);

        Ok(frame_id)
    }

    /// Flush a frame to disk if dirty.
    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];

        if frame.is_dirty() {
            let page = frame.page();
            {
                let mut dm = self.disk_manager.lock();
                dm.write_page(page_id, &page)?;
            }
            drop(page);

            frame.clear_dirty();
            self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Flush a frame to disk unconditionally (used by the public
    /// `flush_page` API, which writes regardless of the dirty flag).
    fn flush_frame_unconditional(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];
        let page = frame.page();
        {
            let mut dm = self.disk_manager.lock();
            dm.write_page(page_id, &page)?;
        }
        drop(page);
        frame.clear_dirty();
        self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Helper to create a BPM with a temporary database file.
    fn create_test_bpm(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let dm = DiskManager::create(&path).unwrap();
        let mut config = Config::new_for_testing();
        config.pool_size = pool_size;
        (BufferPoolManager::new(config, dm), dir)
    }

    #[test]
    fn test_new_page() {
        let (bpm, _dir) = create_test_bpm(10);

        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(0));
        drop(guard);

        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(1));
    }

    #[test]
    fn test_fetch_page_read() {
        let (bpm, _dir) = create_test_bpm(10);

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0xAB;
        }

        {
            let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
            assert_eq!(guard.as_slice()[0], 0xAB);
        }
    }

    #[test]
    fn test_fetch_page_write() {
        let (bpm, _dir) = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }

        {
            let mut guard = bpm.fetch_page_write(PageId::new(0)).unwrap();
            guard.as_mut_slice()[0] = 0xCD;
        }

        {
            let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
            assert_eq!(guard.as_slice()[0], 0xCD);
        }
    }

    #[test]
    fn test_cache_hit() {
        let (bpm, _dir) = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }

        {
            let _guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
        }
        {
            let _guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
        }

        let snapshot = bpm.stats().snapshot();
        assert!(snapshot.cache_hits >= 2);
    }

    #[test]
    fn test_eviction() {
        let (bpm, _dir) = create_test_bpm(3); // Small pool

        for _ in 0..3 {
            let _guard = bpm.new_page().unwrap();
        }

        assert_eq!(bpm.free_frame_count(), 0);

        let guard = bpm.new_page().unwrap();
        assert_eq!(guard.page_id(), PageId::new(3));

        let snapshot = bpm.stats().snapshot();
        assert_eq!(snapshot.evictions, 1);
    }

    #[test]
    fn test_dirty_page_flushed_on_eviction() {
        let (bpm, _dir) = create_test_bpm(1); // Only 1 frame!

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0x42;
        } // Drops, marks dirty

        {
            let _guard = bpm.new_page().unwrap();
        }

        {
            let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
            assert_eq!(guard.as_slice()[0], 0x42);
        }
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _dir) = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }

        assert_eq!(bpm.page_count(), 1);

        bpm.delete_page(PageId::new(0)).unwrap();

        assert_eq!(bpm.free_frame_count(), 10);
        assert_eq!(bpm.page_count(), 0);
    }

    #[test]
    fn test_delete_pinned_page_fails() {
        let (bpm, _dir) = create_test_bpm(10);

        let _guard = bpm.new_page().unwrap();

        let result = bpm.delete_page(PageId::new(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_flush_page() {
        let (bpm, _dir) = create_test_bpm(10);

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0xFF;
        }

        bpm.flush_page(PageId::new(0)).unwrap();

        let snapshot = bpm.stats().snapshot();
        assert!(snapshot.pages_written >= 1);
    }

    #[test]
    fn test_flush_all_pages() {
        let (bpm, _dir) = create_test_bpm(10);

        for i in 0..5 {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = i;
        }

        bpm.flush_all_pages().unwrap();

        let snapshot = bpm.stats().snapshot();
        assert!(snapshot.pages_written >= 5);
    }

    #[test]
    fn test_multiple_read_guards() {
        let (bpm, _dir) = create_test_bpm(10);

        {
            let _guard = bpm.new_page().unwrap();
        }

        let guard1 = bpm.fetch_page_read(PageId::new(0)).unwrap();
        let guard2 = bpm.fetch_page_read(PageId::new(0)).unwrap();

        assert_eq!(guard1.page_id(), guard2.page_id());

        drop(guard1);
        drop(guard2);
    }

    #[test]
    fn test_page_not_found() {
        let (bpm, _dir) = create_test_bpm(10);

        let result = bpm.fetch_page_read(PageId::new(999));
        assert!(result.is_err());
    }

    #[test]
    fn test_no_free_frames() {
        let (bpm, _dir) = create_test_bpm(2);

        let _guard1 = bpm.new_page().unwrap();
        let _guard2 = bpm.new_page().unwrap();

        let result = bpm.new_page();
        assert!(result.is_err());
    }

    #[test]
    fn test_pin_count_tracking() {
        let (bpm, _dir) = create_test_bpm(10);

        let guard = bpm.new_page().unwrap();
        let frame = &bpm.frames[0];
        assert_eq!(frame.pin_count(), 1);
        assert!(!frame.is_evictable());
        drop(guard);

        assert_eq!(frame.pin_count(), 0);
        assert!(frame.page_id().is_some());
        assert!(frame.is_evictable());

        let guard = bpm.fetch_page_read(PageId::new(0)).unwrap();
        assert_eq!(frame.pin_count(), 1);
        assert!(!frame.is_evictable());
        drop(guard);

        assert_eq!(frame.pin_count(), 0);
        assert!(frame.is_evictable());
    }

    #[test]
    fn test_concurrent_reads() {
        use std::sync::Arc;
        use std::thread;

        let (bpm, _dir) = create_test_bpm(10);
        let bpm = Arc::new(bpm);

        {
            let mut guard = bpm.new_page().unwrap();
            guard.as_mut_slice()[0] = 0x42;
        }

        let mut handles = vec![];

        for _ in 0..10 {
            let bpm_clone = Arc::clone(&bpm);
            handles.push(thread::spawn(move || {
                let guard = bpm_clone.fetch_page_read(PageId::new(0)).unwrap();
                assert_eq!(guard.as_slice()[0], 0x42);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_buffer_pool_integrity_invariant() {
        // spec.md Invariant 1: mapped + free == pool_size, pin_count >= 0.
        let (bpm, _dir) = create_test_bpm(5);
        for _ in 0..3 {
            let _guard = bpm.new_page().unwrap();
        }
        assert_eq!(bpm.page_count() + bpm.free_frame_count(), 5);
    }
}
