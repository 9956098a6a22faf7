//! Fixed-capacity buffer pool: frame table, clock-style eviction, and the
//! fix/unfix protocol the B+tree operator and recovery both fix pages
//! through.
//!
//! Grounded on the teacher's `compute::buffer_pool::BufferPool` (capacity
//! bound, simple eviction over an access-ordered map) and
//! `pagestore::page_cache::PageCache` (keyed page cache), generalized into
//! the frame-based pool with pin counts and latches that spec §4.C needs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use mini_aurora_common::{empty_page, Lsn, Page, PageId, StorageError, StoreId};

use crate::frame::Frame;
use crate::write_order::WriteOrderGraph;

/// The "force log before writing the page" collaborator (spec §4.B/§4.C):
/// before a dirty frame with page-LSN `L` can be evicted, `flush_until(L)`
/// must complete. A trait rather than a direct `mini-aurora-wal` dependency
/// keeps the buffer crate from depending on the log crate; `WalWriter`
/// implements it where the two are wired together (`crates/storage`).
pub trait LogFlusher: Send + Sync {
    fn flush_until(&self, lsn: Lsn) -> Result<(), StorageError>;
}

pub struct BufferPool {
    capacity: usize,
    frames: RwLock<HashMap<PageId, Arc<Frame>>>,
    /// Simple clock hand over insertion order, used to pick eviction
    /// candidates among unpinned frames.
    clock: RwLock<Vec<PageId>>,
    /// Which store each resident page belongs to, for `discard_store`.
    store_pages: RwLock<HashMap<StoreId, HashSet<PageId>>>,
    pub write_order: WriteOrderGraph,
    log_flusher: RwLock<Option<Arc<dyn LogFlusher>>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: RwLock::new(HashMap::new()),
            clock: RwLock::new(Vec::new()),
            store_pages: RwLock::new(HashMap::new()),
            write_order: WriteOrderGraph::new(),
            log_flusher: RwLock::new(None),
        }
    }

    /// Wire in the collaborator that forces the log durable before a dirty
    /// frame is evicted. Without one set, `evict_one` refuses to evict
    /// dirty frames at all (correct, if conservative) rather than violate
    /// the write-ahead invariant.
    pub fn set_log_flusher(&self, flusher: Arc<dyn LogFlusher>) {
        *self.log_flusher.write() = Some(flusher);
    }

    /// Fix a page already resident in memory, pinning it. Returns `None` if
    /// not cached — the caller (storage engine) is responsible for loading
    /// it via `install` before retrying.
    pub fn fix(&self, page_id: PageId) -> Option<Arc<Frame>> {
        let frames = self.frames.read();
        let frame = frames.get(&page_id)?.clone();
        frame.pin();
        trace!(page_id, pins = frame.pin_count(), "fix");
        Some(frame)
    }

    /// Unpin a previously fixed frame.
    pub fn unfix(&self, frame: &Frame) {
        let remaining = frame.unpin();
        trace!(page_id = frame.page_id, remaining, "unfix");
    }

    /// Install a freshly-loaded or newly-allocated page image into the
    /// pool under the default store (store 0), evicting a frame if at
    /// capacity.
    pub fn install(&self, page_id: PageId, contents: Page) -> Result<Arc<Frame>, StorageError> {
        self.install_in_store(page_id, 0, contents)
    }

    /// Allocate a fresh zeroed page under `page_id` in the default store.
    pub fn install_new(&self, page_id: PageId) -> Result<Arc<Frame>, StorageError> {
        self.install(page_id, empty_page())
    }

    /// Install a page under an explicit store, so `discard_store` can later
    /// drop every page belonging to it in one call.
    pub fn install_in_store(
        &self,
        page_id: PageId,
        store_id: StoreId,
        contents: Page,
    ) -> Result<Arc<Frame>, StorageError> {
        let mut frames = self.frames.write();
        if let Some(existing) = frames.get(&page_id) {
            return Ok(existing.clone());
        }
        if frames.len() >= self.capacity {
            self.evict_one(&mut frames)?;
        }
        let frame = Arc::new(Frame::new(page_id, contents));
        frames.insert(page_id, frame.clone());
        self.clock.write().push(page_id);
        self.store_pages.write().entry(store_id).or_default().insert(page_id);
        debug!(page_id, store_id, "installed frame");
        Ok(frame)
    }

    fn evict_one(&self, frames: &mut HashMap<PageId, Arc<Frame>>) -> Result<(), StorageError> {
        let mut clock = self.clock.write();
        let mut scanned = 0;
        while scanned < clock.len() {
            let candidate = clock.remove(0);
            scanned += 1;
            let Some(frame) = frames.get(&candidate) else { continue };
            if frame.pin_count() != 0 {
                clock.push(candidate);
                continue;
            }
            if frame.is_dirty() {
                // Never flush a page out of write order: if something this
                // page depends on is still dirty, skip it for now.
                if !self.write_order.predecessors(candidate).is_empty() {
                    clock.push(candidate);
                    continue;
                }
                match self.log_flusher.read().as_ref() {
                    Some(flusher) => {
                        flusher.flush_until(frame.page_lsn())?;
                        frame.mark_clean();
                        self.write_order.resolve(candidate);
                    }
                    // No flusher wired up: can't honor force-log-before-write,
                    // so this frame is simply not a candidate.
                    None => {
                        clock.push(candidate);
                        continue;
                    }
                }
            }
            frames.remove(&candidate);
            self.forget_store_membership(candidate);
            return Ok(());
        }
        Err(StorageError::Other(
            "buffer pool exhausted: no evictable frame (all pinned, or dirty with no log flusher configured)".to_string(),
        ))
    }

    fn forget_store_membership(&self, page_id: PageId) {
        let mut store_pages = self.store_pages.write();
        store_pages.retain(|_, pages| {
            pages.remove(&page_id);
            !pages.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.frames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All frames currently dirty, for checkpoint's dirty-page-table sweep.
    pub fn dirty_frames(&self) -> Vec<(PageId, Lsn)> {
        self.frames
            .read()
            .values()
            .filter(|f| f.is_dirty())
            .map(|f| (f.page_id, f.rec_lsn()))
            .collect()
    }

    /// Mark a resident page dirty at `lsn`, the pool-level entry point
    /// mirroring `Frame::mark_updated` for callers that only hold a
    /// `PageId`, not an `Arc<Frame>`.
    pub fn set_dirty(&self, page_id: PageId, lsn: Lsn) {
        if let Some(frame) = self.frames.read().get(&page_id) {
            frame.mark_updated(lsn);
        }
    }

    /// The smallest `rec_lsn` among all dirty frames — the REDO scan's
    /// starting point, since no dirty page's oldest unwritten update
    /// precedes it.
    pub fn min_rec_lsn(&self) -> Option<Lsn> {
        self.frames
            .read()
            .values()
            .filter(|f| f.is_dirty())
            .map(|f| f.rec_lsn())
            .min()
    }

    /// Register that `dependent` must not be flushed before `depends_on`,
    /// delegating to the write-order graph.
    pub fn register_write_order(&self, dependent: PageId, depends_on: PageId) -> Result<(), StorageError> {
        self.write_order.register(dependent, depends_on)
    }

    /// Force every dirty frame with `page_lsn <= lsn` out to durable
    /// storage: flush the log through `lsn`, then mark those frames clean
    /// and resolve their write-order entries. Used by checkpoint to bound
    /// how far back a future REDO scan needs to go.
    pub fn force_until_lsn(&self, lsn: Lsn) -> Result<(), StorageError> {
        if let Some(flusher) = self.log_flusher.read().as_ref() {
            flusher.flush_until(lsn)?;
        }
        let frames = self.frames.read();
        for (&page_id, frame) in frames.iter() {
            if frame.is_dirty() && frame.page_lsn() <= lsn {
                frame.mark_clean();
                self.write_order.resolve(page_id);
            }
        }
        Ok(())
    }

    /// Drop every resident page belonging to `store_id` without writing it
    /// back — used when a store (table/index) is dropped outright, so its
    /// pages never need to reach durable storage at all.
    pub fn discard_store(&self, store_id: StoreId) {
        let pages: Vec<PageId> = self
            .store_pages
            .write()
            .remove(&store_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        if pages.is_empty() {
            return;
        }
        let mut frames = self.frames.write();
        let mut clock = self.clock.write();
        for page_id in pages {
            frames.remove(&page_id);
            clock.retain(|&p| p != page_id);
            self.write_order.resolve(page_id);
        }
    }

    /// Drop every resident page regardless of store — used when an entire
    /// volume is dropped. This build models a single implicit volume, so
    /// it is equivalent to discarding every store at once.
    pub fn discard_volume(&self) {
        self.frames.write().clear();
        self.clock.write().clear();
        self.store_pages.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn install_and_fix() {
        let pool = BufferPool::new(4);
        pool.install_new(1).unwrap();
        let frame = pool.fix(1).unwrap();
        assert_eq!(frame.page_id, 1);
        pool.unfix(&frame);
    }

    #[test]
    fn fix_miss_returns_none() {
        let pool = BufferPool::new(4);
        assert!(pool.fix(99).is_none());
    }

    #[test]
    fn eviction_skips_pinned_frames() {
        let pool = BufferPool::new(1);
        let frame = pool.install_new(1).unwrap();
        frame.pin();
        assert!(pool.install_new(2).is_err());
        pool.unfix(&frame);
    }

    #[test]
    fn eviction_makes_room_for_clean_unpinned_frame() {
        let pool = BufferPool::new(1);
        pool.install_new(1).unwrap();
        pool.install_new(2).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.fix(2).is_some());
    }

    #[test]
    fn mark_updated_sets_rec_lsn_once() {
        let pool = BufferPool::new(4);
        let frame = pool.install_new(1).unwrap();
        frame.mark_updated(5);
        frame.mark_updated(7);
        assert_eq!(frame.rec_lsn(), 5);
        assert_eq!(frame.page_lsn(), 7);
    }

    struct CountingFlusher {
        flushed_through: AtomicU64,
    }

    impl LogFlusher for CountingFlusher {
        fn flush_until(&self, lsn: Lsn) -> Result<(), StorageError> {
            self.flushed_through.fetch_max(lsn, Ordering::AcqRel);
            Ok(())
        }
    }

    #[test]
    fn dirty_frame_without_flusher_is_not_evicted() {
        let pool = BufferPool::new(1);
        let frame = pool.install_new(1).unwrap();
        frame.mark_updated(1);
        pool.unfix(&frame); // pin_count back to 0, but still dirty
        assert!(pool.install_new(2).is_err());
    }

    #[test]
    fn dirty_frame_is_evicted_after_flushing_the_log_through_its_lsn() {
        let pool = BufferPool::new(1);
        pool.set_log_flusher(Arc::new(CountingFlusher {
            flushed_through: AtomicU64::new(0),
        }));
        let frame = pool.install_new(1).unwrap();
        frame.mark_updated(5);
        pool.unfix(&frame);

        pool.install_new(2).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.fix(2).is_some());
    }

    #[test]
    fn discard_store_drops_only_that_stores_pages() {
        let pool = BufferPool::new(8);
        pool.install_in_store(1, 10, empty_page()).unwrap();
        pool.install_in_store(2, 10, empty_page()).unwrap();
        pool.install_in_store(3, 20, empty_page()).unwrap();

        pool.discard_store(10);

        assert!(pool.fix(1).is_none());
        assert!(pool.fix(2).is_none());
        assert!(pool.fix(3).is_some());
    }

    #[test]
    fn discard_volume_drops_everything() {
        let pool = BufferPool::new(8);
        pool.install_in_store(1, 10, empty_page()).unwrap();
        pool.install_in_store(2, 20, empty_page()).unwrap();

        pool.discard_volume();

        assert!(pool.is_empty());
    }

    #[test]
    fn min_rec_lsn_tracks_oldest_dirty_update() {
        let pool = BufferPool::new(8);
        let a = pool.install_new(1).unwrap();
        let b = pool.install_new(2).unwrap();
        a.mark_updated(10);
        b.mark_updated(4);
        assert_eq!(pool.min_rec_lsn(), Some(4));
    }

    #[test]
    fn force_until_lsn_cleans_matching_frames_and_resolves_write_order() {
        let pool = BufferPool::new(8);
        pool.set_log_flusher(Arc::new(CountingFlusher {
            flushed_through: AtomicU64::new(0),
        }));
        let frame = pool.install_new(1).unwrap();
        frame.mark_updated(3);
        pool.register_write_order(2, 1).unwrap();

        pool.force_until_lsn(3).unwrap();

        assert!(!frame.is_dirty());
        assert!(pool.write_order.predecessors(2).is_empty());
    }
}
