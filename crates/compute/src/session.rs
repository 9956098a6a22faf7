//! Transactional sessions: an async-facing handle onto the index/transaction
//! engine, carrying the Early Lock Release mode a deployment has chosen so
//! callers get ELR's commit semantics without reaching into
//! `mini_aurora_storage::txn_engine::Transaction`'s private lock bookkeeping.
//!
//! Shaped like `ComputeEngine` in `crate::engine`: a thin `Arc`-wrapped
//! handle around the synchronous engine it talks to.

use std::path::Path;
use std::sync::Arc;

use mini_aurora_common::{Lsn, StorageError, TxnId};
use mini_aurora_lock::ElrMode;
use mini_aurora_storage::txn_engine::{Engine as TxnEngine, Transaction};

pub struct Session {
    engine: Arc<TxnEngine>,
}

impl Session {
    /// Open a session backed by the WAL at `wal_path`, with locks released
    /// per `elr_mode`.
    pub fn open(wal_path: &Path, elr_mode: ElrMode) -> Result<Self, StorageError> {
        Ok(Self {
            engine: Arc::new(TxnEngine::open_with_elr_mode(wal_path, elr_mode)?),
        })
    }

    /// Start a new transaction against this session's engine.
    pub fn begin(&self) -> Transaction<'_> {
        self.engine.begin()
    }

    pub async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.engine.lookup(key)
    }

    pub async fn checkpoint(&self) -> Result<Lsn, std::io::Error> {
        self.engine.checkpoint()
    }

    /// Register that `dependent` inherited a lock another transaction
    /// released early; under `ElrMode::Clv` `dependent` cannot itself
    /// commit until `lender_commit_lsn` is durable.
    pub fn record_elr_dependency(&self, dependent: TxnId, lender_commit_lsn: Lsn) {
        self.engine.record_elr_dependency(dependent, lender_commit_lsn);
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn session_roundtrips_through_checkpoint() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&dir.path().join("session.wal"), ElrMode::None).unwrap();

        let mut txn = session.begin();
        txn.insert(b"k".to_vec(), b"v".to_vec()).unwrap();
        txn.commit().unwrap();

        assert_eq!(session.get(b"k").await, Some(b"v".to_vec()));
        session.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn clv_session_tracks_dependency_across_clone() {
        let dir = TempDir::new().unwrap();
        let session = Session::open(&dir.path().join("session.wal"), ElrMode::Clv).unwrap();
        let other = session.clone();

        let mut lender = session.begin();
        lender.insert(b"k".to_vec(), b"1".to_vec()).unwrap();
        let lender_lsn = lender.commit().unwrap();

        let mut dependent = other.begin();
        dependent.update(b"k".to_vec(), b"2".to_vec()).unwrap();
        other.record_elr_dependency(dependent.id(), lender_lsn);
        dependent.commit().unwrap();

        assert_eq!(other.get(b"k").await, Some(b"2".to_vec()));
    }
}
