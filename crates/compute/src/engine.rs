use std::sync::Arc;
use tokio::sync::Mutex;

use mini_aurora_common::{Lsn, Page, PageId, StorageApi, StorageError, PAGE_SIZE};

use crate::buffer_pool::BufferPool;
use crate::transaction::MiniTransaction;

/// Compute engine â€” the "SQL layer" in Aurora's architecture.
///
/// Generates redo records and sends them to storage. Maintains a local buffer
/// pool for read caching. In Phase 1 this talks to storage in-process; in
/// Phase 2+ it goes over RPC.
pub struct ComputeEngine {
    storage: Arc<dyn StorageApi>,
    inner: Mutex<ComputeInner>,
}

struct ComputeInner {
    buffer_pool: BufferPool,
    next_mtr_id: u64,
    /// Current read point (tracks VDL for consistent reads).
    read_point: Lsn,
}

impl ComputeEngine {
    pub fn new(storage: Arc<dyn StorageApi>, buffer_pool_capacity: usize) -> Self {
        Self {
            storage,
            inner: Mutex::new(ComputeInner {
                buffer_pool: BufferPool::new(buffer_pool_capacity),
                next_mtr_id: 1,
                read_point: 0,
            }),
        }
    }

    /// Write bytes to a page at a given offset. This is a single-record MTR.
    pub async fn put(
        &self,
        page_id: PageId,
        offset: u16,
        data: Vec<u8>,
    ) -> Result<Lsn, StorageError> {
        if offset as usize + data.len() > PAGE_SIZE {
            return Err(StorageError::PageOverflow {
                offset,
                len: data.len(),
            });
        }

        let mtr_id = {
            let mut inner = self.inner.lock().await;
            let id = inner.next_mtr_id;
            inner.next_mtr_id += 1;
            id
        };

        let mut mtr = MiniTransaction::new(mtr_id);
        mtr.write(page_id, offset, data);
        let records = mtr.finish().unwrap();

        let vdl = self.storage.append_redo(records).await?;

        // Update read point and invalidate cache for this page
        {
            let mut inner = self.inner.lock().await;
            inner.read_point = vdl;
            inner.buffer_pool.invalidate(page_id);
        }

        Ok(vdl)
    }

    /// Execute a multi-record mini-transaction.
    /// `writes` is a list of (page_id, offset, data) tuples.
    pub async fn put_multi(
        &self,
        writes: Vec<(PageId, u16, Vec<u8>)>,
    ) -> Result<Lsn, StorageError> {
        for &(_, offset, ref data) in &writes {
            if offset as usize + data.len() > PAGE_SIZE {
                return Err(StorageError::PageOverflow {
                    offset,
                    len: data.len(),
                });
            }
        }

        let mtr_id = {
            let mut inner = self.inner.lock().await;
            let id = inner.next_mtr_id;
            inner.next_mtr_id += 1;
            id
        };

        let mut mtr = MiniTransaction::new(mtr_id);
        for (page_id, offset, data) in &writes {
            mtr.write(*page_id, *offset, data.clone());
        }

        let records = match mtr.finish() {
            Some(r) => r,
            None => return Ok(self.inner.lock().await.read_point),
        };

        let vdl = self.storage.append_redo(records).await?;

        // Update read point and invalidate caches
        {
            let mut inner = self.inner.lock().await;
            inner.read_point = vdl;
            for (page_id, _, _) in &writes {
                inner.buffer_pool.invalidate(*page_id);
            }
        }

        Ok(vdl)
    }

    /// Read a page at the current read point.
    pub async fn get(&self, page_id: PageId) -> Result<Page, StorageError> {
        let read_point = self.inner.lock().await.read_point;
        self.get_at(page_id, read_point).await
    }

    /// Read a page at a specific LSN.
    pub async fn get_at(&self, page_id: PageId, lsn: Lsn) -> Result<Page, StorageError> {
        // Check buffer pool first
        {
            let mut inner = self.inner.lock().await;
            if let Some(page) = inner.buffer_pool.get(page_id, lsn) {
                return Ok(*page);
            }
        }

        // Fetch from storage
        let page = self.storage.get_page(page_id, lsn).await?;

        // Cache in buffer pool
        {
            let mut inner = self.inner.lock().await;
            inner.buffer_pool.insert(page_id, lsn, page);
        }

        Ok(page)
    }

    /// Get the current read point (VDL as seen by this compute node).
    pub async fn read_point(&self) -> Lsn {
        self.inner.lock().await.read_point
    }

    /// Refresh the read point from storage's durability state.
    pub async fn refresh_read_point(&self) -> Result<Lsn, StorageError> {
        let state = self.storage.get_durability_state().await?;
        let mut inner = self.inner.lock().await;
        inner.read_point = state.vdl;
        Ok(state.vdl)
    }
}
