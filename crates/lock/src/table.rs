//! Sharded key-range lock table.
//!
//! Grounded on spec §4.D; the sharded concurrent map follows the
//! `dashmap`-based pattern used throughout `harborgrid-justin-rusty-db` for
//! hot, independently-lockable keys, paired with `parking_lot`'s `Condvar`
//! the way the WAL crate's `DaemonControl` waits on activation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use parking_lot::{Condvar, Mutex};

use mini_aurora_common::{StorageError, TxnId};

use crate::deadlock::{self, WaitsForGraph};
use crate::okvl::LockMode;

pub type LockKey = Vec<u8>;

/// How often a blocked `acquire` re-checks the waits-for graph for a cycle
/// instead of sleeping all the way to its own timeout.
const DEADLOCK_CHECK_INTERVAL: Duration = Duration::from_millis(20);

struct EntryState {
    holders: Vec<(TxnId, LockMode)>,
    waiters: Vec<(TxnId, LockMode)>,
}

impl EntryState {
    fn empty() -> Self {
        Self {
            holders: Vec::new(),
            waiters: Vec::new(),
        }
    }

    fn compatible_with_all(&self, txn: TxnId, mode: LockMode) -> bool {
        self.holders
            .iter()
            .all(|&(h, m)| h == txn || mode.compatible_with(m) || m.compatible_with(mode))
    }

    fn holder_modes_excluding(&self, txn: TxnId) -> Vec<(TxnId, LockMode)> {
        self.holders.iter().copied().filter(|&(h, _)| h != txn).collect()
    }
}

/// Sharded lock table. One `Mutex<EntryState>` per key, one shared
/// `Condvar` for wakeups — waiters re-check their own key's state when
/// notified, so spurious wakeups just cost a cheap re-check.
pub struct LockTable {
    entries: DashMap<LockKey, Mutex<EntryState>>,
    cond: Condvar,
    aborted: DashSet<TxnId>,
    clock: AtomicU64,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            cond: Condvar::new(),
            aborted: DashSet::new(),
            clock: AtomicU64::new(0),
        }
    }

    /// Monotonic counter for ordering transactions by age (used by the
    /// youngest-victim deadlock policy).
    pub fn next_sequence(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Acquire `mode` on `key` for `txn`, blocking up to `timeout`. While
    /// blocked, periodically rebuilds the global waits-for graph and runs
    /// cycle detection; if `txn` itself is the chosen victim it aborts
    /// immediately, and if another transaction is chosen that transaction
    /// is marked aborted so it unwinds the next time it checks in.
    pub fn acquire(
        &self,
        txn: TxnId,
        key: &LockKey,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<(), StorageError> {
        let deadline = Instant::now() + timeout;
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(EntryState::empty()));

        loop {
            if self.aborted.remove(&txn).is_some() {
                self.remove_waiter(key, txn);
                return Err(StorageError::Deadlock(txn));
            }

            {
                let entry = self.entries.get(key).expect("entry created above");
                let mut state = entry.lock();
                if state.holders.iter().any(|&(h, m)| h == txn && m.subsumes(mode)) {
                    return Ok(());
                }
                if state.compatible_with_all(txn, mode) {
                    state.holders.retain(|&(h, _)| h != txn);
                    state.holders.push((txn, mode));
                    state.waiters.retain(|&(w, _)| w != txn);
                    return Ok(());
                }
                if !state.waiters.iter().any(|&(w, _)| w == txn) {
                    state.waiters.push((txn, mode));
                }
            }

            if self.check_for_deadlock(txn) {
                self.remove_waiter(key, txn);
                return Err(StorageError::Deadlock(txn));
            }

            let now = Instant::now();
            if now >= deadline {
                self.remove_waiter(key, txn);
                return Err(StorageError::LockTimeout);
            }

            let wait_slice = (deadline - now).min(DEADLOCK_CHECK_INTERVAL);
            let entry = self.entries.get(key).expect("entry created above");
            let mut state = entry.lock();
            self.cond.wait_for(&mut state, wait_slice);
        }
    }

    fn remove_waiter(&self, key: &LockKey, txn: TxnId) {
        if let Some(entry) = self.entries.get(key) {
            let mut state = entry.lock();
            state.waiters.retain(|&(w, _)| w != txn);
        }
    }

    /// Build the current waits-for graph, run cycle detection, and resolve
    /// it: if a cycle exists and `txn` is the chosen victim, returns `true`
    /// so the caller unwinds; otherwise marks whatever victim was chosen
    /// (if any) aborted and returns `false`.
    fn check_for_deadlock(&self, txn: TxnId) -> bool {
        let graph = self.waits_for_graph();
        match deadlock::detect(&graph) {
            Some(victim) if victim == txn => true,
            Some(victim) => {
                self.mark_aborted(victim);
                false
            }
            None => false,
        }
    }

    /// Snapshot the waits-for graph across every key: `txn -> {txns it is
    /// blocked behind}`. Never called while this thread holds a guard on
    /// any single entry, so it's safe to walk every shard.
    pub fn waits_for_graph(&self) -> WaitsForGraph {
        let mut graph = WaitsForGraph::new();
        for entry in self.entries.iter() {
            let state = entry.value().lock();
            for &(waiter, wmode) in &state.waiters {
                let blockers: HashSet<TxnId> = state
                    .holder_modes_excluding(waiter)
                    .into_iter()
                    .filter(|&(_, m)| !wmode.compatible_with(m))
                    .map(|(h, _)| h)
                    .collect();
                if !blockers.is_empty() {
                    graph.entry(waiter).or_default().extend(blockers);
                }
            }
        }
        graph
    }

    /// Release every lock `txn` holds on `key`.
    pub fn release(&self, txn: TxnId, key: &LockKey) {
        if let Some(entry) = self.entries.get(key) {
            let mut state = entry.lock();
            state.holders.retain(|&(h, _)| h != txn);
        }
        self.cond.notify_all();
    }

    /// Current waits-for edges for a single key: `txn -> {txns it is
    /// blocked behind}`. Exposed for callers that want to inspect one
    /// key's contention directly; `waits_for_graph` is what the background
    /// detector actually uses.
    pub fn waits_for_edges(&self, txn: TxnId, key: &LockKey, mode: LockMode) -> HashSet<TxnId> {
        match self.entries.get(key) {
            Some(entry) => {
                let state = entry.lock();
                state
                    .holder_modes_excluding(txn)
                    .into_iter()
                    .filter(|&(_, m)| !mode.compatible_with(m))
                    .map(|(h, _)| h)
                    .collect()
            }
            None => HashSet::new(),
        }
    }

    /// Mark `txn` to be aborted with a deadlock error the next time it
    /// checks in (either already waiting, or on its next `acquire` call).
    pub fn mark_aborted(&self, txn: TxnId) {
        self.aborted.insert(txn);
        self.cond.notify_all();
    }
}
