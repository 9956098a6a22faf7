//! A single buffer-pool frame: one cached page plus the bookkeeping the
//! pool and the recovery subsystems need around it.
//!
//! Grounded on the fields the teacher's `compute::buffer_pool::CachedPage`
//! and `pagestore::page_cache::PageCache` track between them (page image,
//! LSN), generalized with the pin count, dirty bit, rec-LSN and in-doubt
//! flag that instant restart and the write-order graph require.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use mini_aurora_common::{Lsn, Page, PageId, PAGE_SIZE};

/// A cached page and its control state. Frames are never moved once
/// allocated; callers share them via `Arc<Frame>`.
pub struct Frame {
    pub page_id: PageId,
    contents: RwLock<[u8; PAGE_SIZE]>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    /// LSN of the oldest update not yet reflected on durable storage — the
    /// watermark the checkpoint's dirty-page table entry uses.
    rec_lsn: AtomicU64,
    /// Set while the page is known dirty from log analysis but has not yet
    /// been fixed and REDO'd by this restart episode (component J).
    in_doubt: AtomicBool,
    /// LSN of the most recent update applied to this frame.
    page_lsn: AtomicU64,
}

impl Frame {
    pub fn new(page_id: PageId, contents: Page) -> Self {
        Self {
            page_id,
            contents: RwLock::new(contents),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            rec_lsn: AtomicU64::new(0),
            in_doubt: AtomicBool::new(false),
            page_lsn: AtomicU64::new(0),
        }
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the pin count after unpinning.
    pub fn unpin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn rec_lsn(&self) -> Lsn {
        self.rec_lsn.load(Ordering::Acquire)
    }

    pub fn page_lsn(&self) -> Lsn {
        self.page_lsn.load(Ordering::Acquire)
    }

    pub fn is_in_doubt(&self) -> bool {
        self.in_doubt.load(Ordering::Acquire)
    }

    pub fn mark_in_doubt(&self) {
        self.in_doubt.store(true, Ordering::Release);
    }

    pub fn clear_in_doubt(&self) {
        self.in_doubt.store(false, Ordering::Release);
    }

    /// Record an update made to the frame at `lsn`. The first update since
    /// the frame became clean sets `rec_lsn`; every update advances
    /// `page_lsn`.
    pub fn mark_updated(&self, lsn: Lsn) {
        if !self.dirty.swap(true, Ordering::AcqRel) {
            self.rec_lsn.store(lsn, Ordering::Release);
        }
        self.page_lsn.store(lsn, Ordering::Release);
    }

    /// Called once the frame's image has been flushed to durable storage.
    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
        self.rec_lsn.store(0, Ordering::Release);
    }

    pub fn read(&self) -> Page {
        *self.contents.read()
    }

    pub fn with_write<R>(&self, f: impl FnOnce(&mut Page) -> R) -> R {
        let mut guard = self.contents.write();
        f(&mut guard)
    }
}
