//! Background prefetcher for backup segments: a fixed-size slot buffer
//! filled by a worker thread draining a priority-ordered request queue, so
//! restore can overlap backup reads with log archive reads instead of
//! serializing them.
//!
//! Grounded on `original_source/src/sm/backup_reader.h`'s
//! `BackupPrefetcher`: slot states `SLOT_FREE/READING/UNFIXED/FIXED`, a
//! FIFO request deque where priority > 0 jumps the queue, and eviction of
//! the oldest unfixed slot when the buffer is full.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::backup::{BackupReader, Segment};



#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Reading,
    Unfixed,
    Fixed,
}

struct Slot {
    segment: Option<u32>,
    state: SlotState,
    data: Segment,
}

struct Shared {
    slots: Vec<Mutex<Slot>>,
    /// segment -> index into `slots`, for slots currently holding data.
    index: Mutex<HashMap<u32, usize>>,
    requests: Mutex<VecDeque<u32>>,
    cond: Condvar,
    shutdown: Mutex<bool>,
    source: Arc<dyn BackupReader>,
    segment_bytes: usize,
    /// Round-robin eviction pointer, mirroring the original's `lastEvicted`.
    last_evicted: Mutex<usize>,
}

pub struct BackupPrefetcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackupPrefetcher {
    pub fn new(source: Arc<dyn BackupReader>, num_segments: usize, segment_bytes: usize) -> Arc<Self> {
        let slots = (0..num_segments)
            .map(|_| {
                Mutex::new(Slot {
                    segment: None,
                    state: SlotState::Free,
                    data: Vec::new(),
                })
            })
            .collect();
        let shared = Arc::new(Shared {
            slots,
            index: Mutex::new(HashMap::new()),
            requests: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            shutdown: Mutex::new(false),
            source,
            segment_bytes,
            last_evicted: Mutex::new(0),
        });

        let worker_shared = shared.clone();
        let handle = std::thread::spawn(move || worker_loop(worker_shared));

        Arc::new(Self { shared, worker: Mutex::new(Some(handle)) })
    }

    /// Request `segment` be prefetched. `priority > 0` jumps it to the
    /// front of the queue; priority 0 goes to the back (default FIFO).
    pub fn prefetch(&self, segment: u32, priority: i32) {
        {
            let index = self.shared.index.lock();
            if index.contains_key(&segment) {
                return;
            }
        }
        let mut requests = self.shared.requests.lock();
        if priority > 0 {
            requests.push_front(segment);
        } else {
            requests.push_back(segment);
        }
        drop(requests);
        self.shared.cond.notify_all();
    }

    /// Block until `segment` is available, reading it synchronously if the
    /// prefetcher hasn't gotten to it yet.
    pub fn fix(&self, segment: u32) -> Segment {
        loop {
            let slot_idx = {
                let index = self.shared.index.lock();
                index.get(&segment).copied()
            };
            if let Some(idx) = slot_idx {
                let mut slot = self.shared.slots[idx].lock();
                if slot.segment == Some(segment) && slot.state != SlotState::Reading {
                    slot.state = SlotState::Fixed;
                    return slot.data.clone();
                }
            }
            // Not resident: read synchronously (the "fixWaiting" case from
            // the original — restore caught up with the prefetcher).
            let data = self.shared.source.fix(segment);
            install(&self.shared, segment, data.clone(), SlotState::Fixed);
            return data;
        }
    }

    pub fn unfix(&self, segment: u32) {
        let index = self.shared.index.lock();
        if let Some(&idx) = index.get(&segment) {
            let mut slot = self.shared.slots[idx].lock();
            if slot.state == SlotState::Fixed {
                slot.state = SlotState::Unfixed;
            }
        }
    }

    pub fn finish(&self) {
        *self.shared.shutdown.lock() = true;
        self.shared.cond.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Lets `RestoreManager` treat a prefetcher exactly like any other backup
/// source: `restore_segment`'s `fix`/`unfix` calls drain whatever the
/// background worker already has resident, and `restore_all` can call
/// `prefetch` to request segments ahead of the sweep.
impl BackupReader for BackupPrefetcher {
    fn fix(&self, segment: u32) -> Segment {
        BackupPrefetcher::fix(self, segment)
    }

    fn unfix(&self, segment: u32) {
        BackupPrefetcher::unfix(self, segment)
    }

    fn prefetch(&self, segment: u32, priority: i32) {
        BackupPrefetcher::prefetch(self, segment, priority)
    }

    fn finish(&self) {
        BackupPrefetcher::finish(self)
    }
}

fn install(shared: &Shared, segment: u32, data: Segment, state: SlotState) {
    let mut index = shared.index.lock();
    let idx = evict_slot_for(shared, &mut index, segment);
    let mut slot = shared.slots[idx].lock();
    slot.segment = Some(segment);
    slot.data = data;
    slot.state = state;
    index.insert(segment, idx);
}

/// Find a slot to hold `segment`: a free one if available, otherwise evict
/// the oldest unfixed slot starting from `last_evicted` (round robin, as in
/// the original).
fn evict_slot_for(shared: &Shared, index: &mut HashMap<u32, usize>, _segment: u32) -> usize {
    for (i, slot) in shared.slots.iter().enumerate() {
        if slot.lock().state == SlotState::Free {
            return i;
        }
    }
    let n = shared.slots.len();
    let mut last = shared.last_evicted.lock();
    for offset in 0..n {
        let i = (*last + offset) % n;
        let mut slot = shared.slots[i].lock();
        if slot.state != SlotState::Fixed {
            if let Some(old_segment) = slot.segment.take() {
                index.remove(&old_segment);
            }
            slot.state = SlotState::Free;
            *last = (i + 1) % n;
            return i;
        }
    }
    // All slots fixed: fall back to the first one anyway (matches the
    // original's unconditional "evict slot 0" worst case).
    *last = 1 % n.max(1);
    0
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let segment = {
            let mut requests = shared.requests.lock();
            loop {
                if *shared.shutdown.lock() {
                    return;
                }
                if let Some(segment) = requests.pop_front() {
                    break segment;
                }
                shared.cond.wait(&mut requests);
            }
        };

        {
            let index = shared.index.lock();
            if index.contains_key(&segment) {
                continue;
            }
        }

        let data = shared.source.fix(segment);
        install(&shared, segment, data, SlotState::Unfixed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::DummyBackupReader;
    use std::time::Duration;

    #[test]
    fn prefetched_segment_becomes_fixable() {
        let source = Arc::new(DummyBackupReader::new(2));
        let prefetcher = BackupPrefetcher::new(source, 4, 2 * mini_aurora_common::PAGE_SIZE);
        prefetcher.prefetch(3, 0);
        std::thread::sleep(Duration::from_millis(50));
        let data = prefetcher.fix(3);
        assert_eq!(data.len(), 2 * mini_aurora_common::PAGE_SIZE);
        prefetcher.unfix(3);
        prefetcher.finish();
    }

    #[test]
    fn fix_without_prefetch_reads_synchronously() {
        let source = Arc::new(DummyBackupReader::new(1));
        let prefetcher = BackupPrefetcher::new(source, 2, mini_aurora_common::PAGE_SIZE);
        let data = prefetcher.fix(7);
        assert_eq!(data.len(), mini_aurora_common::PAGE_SIZE);
        prefetcher.finish();
    }

    #[test]
    fn priority_request_jumps_queue() {
        let source = Arc::new(DummyBackupReader::new(1));
        let prefetcher = BackupPrefetcher::new(source, 4, mini_aurora_common::PAGE_SIZE);
        prefetcher.prefetch(1, 0);
        prefetcher.prefetch(2, 10);
        std::thread::sleep(Duration::from_millis(50));
        // Both should be resolvable regardless of arrival order.
        let _ = prefetcher.fix(1);
        let _ = prefetcher.fix(2);
        prefetcher.finish();
    }
}
