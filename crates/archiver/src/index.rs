//! Sparse per-run index: one `(block_offset, first_page_id)` entry per
//! block, letting a probe binary-search straight to the block that might
//! contain a given page instead of scanning the whole run.
//!
//! Grounded on `LogArchiver::ArchiveIndex` (`probeFirst`/`probeNext`/
//! `findEntry`) in `original_source/src/sm/logarchiver.h`.

use mini_aurora_common::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub offset: u64,
    pub first_pid: PageId,
}

#[derive(Debug, Clone, Default)]
pub struct RunIndex {
    /// Sorted ascending by `first_pid` (also the write order, since each
    /// run is page-sorted before it's written).
    entries: Vec<BlockEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Byte offset of the first block that might contain `page_id`.
    pub offset: u64,
    /// Byte offset just past the last block that might contain it, or
    /// `None` if it may extend to the end of the run.
    pub end_offset: Option<u64>,
}

impl RunIndex {
    pub fn push(&mut self, entry: BlockEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `probeFirst` — find the first block whose `first_pid` is `<= page_id`
    /// and whose successor's `first_pid` is `> page_id` (or the last block).
    pub fn probe_first(&self, page_id: PageId) -> Option<ProbeResult> {
        if self.entries.is_empty() || page_id < self.entries[0].first_pid {
            return None;
        }
        let idx = self
            .entries
            .partition_point(|e| e.first_pid <= page_id)
            .saturating_sub(1);
        Some(ProbeResult {
            offset: self.entries[idx].offset,
            end_offset: self.entries.get(idx + 1).map(|e| e.offset),
        })
    }

    /// `probeNext` — the block immediately following the one at `offset`.
    pub fn probe_next(&self, offset: u64) -> Option<ProbeResult> {
        let idx = self.entries.iter().position(|e| e.offset == offset)?;
        let next = self.entries.get(idx + 1)?;
        Some(ProbeResult {
            offset: next.offset,
            end_offset: self.entries.get(idx + 2).map(|e| e.offset),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunIndex {
        let mut idx = RunIndex::default();
        idx.push(BlockEntry { offset: 0, first_pid: 1 });
        idx.push(BlockEntry { offset: 100, first_pid: 50 });
        idx.push(BlockEntry { offset: 200, first_pid: 120 });
        idx
    }

    #[test]
    fn probe_first_finds_containing_block() {
        let idx = sample();
        let result = idx.probe_first(60).unwrap();
        assert_eq!(result.offset, 100);
        assert_eq!(result.end_offset, Some(200));
    }

    #[test]
    fn probe_first_below_range_is_none() {
        let idx = sample();
        assert!(idx.probe_first(0).is_none());
    }

    #[test]
    fn probe_first_in_last_block_has_no_end() {
        let idx = sample();
        let result = idx.probe_first(500).unwrap();
        assert_eq!(result.offset, 200);
        assert_eq!(result.end_offset, None);
    }

    #[test]
    fn probe_next_walks_forward() {
        let idx = sample();
        let first = idx.probe_first(1).unwrap();
        let next = idx.probe_next(first.offset).unwrap();
        assert_eq!(next.offset, 100);
    }
}
