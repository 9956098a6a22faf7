//! K-way run merger: merges several page-sorted runs into a single
//! page-sorted stream, used both for archive range queries and for
//! single-pass restore's merge phase.
//!
//! Grounded on `ArchiveScanner::RunMerger` (`MergeHeapEntry`/
//! `MergeHeapCmp`) in `original_source/src/sm/logarchiver.h`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use mini_aurora_common::LogRecord;

use crate::scanner::RunScanner;

struct MergeEntry {
    record: LogRecord,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.page_id == other.record.page_id && self.record.lsn == other.record.lsn
    }
}
impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .page_id
            .cmp(&self.record.page_id)
            .then_with(|| other.record.lsn.cmp(&self.record.lsn))
    }
}

/// Merges `N` `RunScanner`s by page id, then LSN within a page.
pub struct RunMerger {
    scanners: Vec<RunScanner>,
    heap: BinaryHeap<MergeEntry>,
}

impl RunMerger {
    pub fn new(mut scanners: Vec<RunScanner>) -> Self {
        let mut heap = BinaryHeap::new();
        for (source, scanner) in scanners.iter_mut().enumerate() {
            if let Some(record) = scanner.next() {
                heap.push(MergeEntry { record, source });
            }
        }
        Self { scanners, heap }
    }

    pub fn next(&mut self) -> Option<LogRecord> {
        let MergeEntry { record, source } = self.heap.pop()?;
        if let Some(next_record) = self.scanners[source].next() {
            self.heap.push(MergeEntry {
                record: next_record,
                source,
            });
        }
        Some(record)
    }
}
