//! Early Lock Release (ELR): let a committing transaction's locks be taken
//! by a waiter before the commit record is durable, trading a small window
//! of speculative visibility for shorter lock hold times.
//!
//! Grounded on spec §4.D's four ELR modes. `Clv` (commit-lsn-voting)
//! additionally tracks a watermark so a dependent transaction can be held
//! back at commit until the lender's commit record is actually durable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use mini_aurora_common::{Lsn, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElrMode {
    /// No early release: locks held until the commit record is durable.
    None,
    /// Release S-mode locks early; X locks still wait for durability.
    SOnly,
    /// Release S and X locks early.
    Sx,
    /// Release everything early, but record a commit-LSN dependency so a
    /// transaction that inherited a lock from an uncommitted-durable
    /// lender cannot itself commit until the lender's commit LSN is durable.
    Clv,
}

/// Tracks, for each transaction that inherited an early-released lock, the
/// highest commit LSN it must wait for before its own commit may become
/// durable.
#[derive(Default)]
pub struct CommitLsnDependencies {
    watermarks: Mutex<HashMap<TxnId, Lsn>>,
    durable_commit_lsn: AtomicU64,
}

impl CommitLsnDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` must wait for `lender_commit_lsn` before
    /// committing.
    pub fn record_dependency(&self, dependent: TxnId, lender_commit_lsn: Lsn) {
        let mut watermarks = self.watermarks.lock();
        let entry = watermarks.entry(dependent).or_insert(0);
        if lender_commit_lsn > *entry {
            *entry = lender_commit_lsn;
        }
    }

    /// Called as the durable commit-LSN watermark advances.
    pub fn advance_durable(&self, lsn: Lsn) {
        self.durable_commit_lsn.fetch_max(lsn, Ordering::AcqRel);
    }

    /// Whether `txn` may commit yet, given its recorded dependency (if any).
    pub fn can_commit(&self, txn: TxnId) -> bool {
        let watermarks = self.watermarks.lock();
        match watermarks.get(&txn) {
            Some(&needed) => needed <= self.durable_commit_lsn.load(Ordering::Acquire),
            None => true,
        }
    }

    pub fn clear(&self, txn: TxnId) {
        self.watermarks.lock().remove(&txn);
    }
}

impl ElrMode {
    pub fn releases_shared_early(self) -> bool {
        !matches!(self, ElrMode::None)
    }

    pub fn releases_exclusive_early(self) -> bool {
        matches!(self, ElrMode::Sx | ElrMode::Clv)
    }

    pub fn tracks_commit_lsn_dependency(self) -> bool {
        matches!(self, ElrMode::Clv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clv_blocks_until_lender_durable() {
        let deps = CommitLsnDependencies::new();
        deps.record_dependency(2, 100);
        assert!(!deps.can_commit(2));
        deps.advance_durable(100);
        assert!(deps.can_commit(2));
    }

    #[test]
    fn txn_with_no_dependency_can_always_commit() {
        let deps = CommitLsnDependencies::new();
        assert!(deps.can_commit(5));
    }

    #[test]
    fn mode_flags() {
        assert!(!ElrMode::None.releases_shared_early());
        assert!(ElrMode::SOnly.releases_shared_early());
        assert!(!ElrMode::SOnly.releases_exclusive_early());
        assert!(ElrMode::Sx.releases_exclusive_early());
        assert!(ElrMode::Clv.tracks_commit_lsn_dependency());
    }
}
