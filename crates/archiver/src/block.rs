//! Block assembly: pack encoded log records into fixed-size blocks, the
//! unit the archiver writes to a run file and the unit a scanner reads
//! back.
//!
//! Grounded on `LogArchiver::BlockAssembly` in
//! `original_source/src/sm/logarchiver.h`: a block has a small trailing
//! header recording which run it belongs to and the LSN of its last
//! record, and `add` returns `false` once a record wouldn't fit so the
//! caller can close the block and start a new one.

use mini_aurora_common::{logrec, Lsn, LogRecord};

/// Default block size (1 MiB in the original design); kept small here so
/// tests exercise multiple blocks without huge fixtures.
pub const DFT_BLOCK_SIZE: usize = 64 * 1024;

/// Trailing metadata written after a block's record bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub run: u64,
    pub end_lsn: Lsn,
}

pub const BLOCK_HEADER_SIZE: usize = 16;

impl BlockHeader {
    fn encode(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.run.to_le_bytes());
        buf[8..16].copy_from_slice(&self.end_lsn.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            run: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            end_lsn: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// Accumulates encoded records for a single run into fixed-size blocks.
pub struct BlockAssembly {
    run: u64,
    block_size: usize,
    buf: Vec<u8>,
    last_lsn: Lsn,
}

impl BlockAssembly {
    pub fn new(run: u64, block_size: usize) -> Self {
        Self {
            run,
            block_size,
            buf: Vec::with_capacity(block_size),
            last_lsn: 0,
        }
    }

    /// Try to append `record`. Returns `false` if it doesn't fit in the
    /// current block (including the trailing header) — the caller should
    /// `finish()` the block and start a fresh one before retrying.
    pub fn add(&mut self, record: &LogRecord) -> bool {
        let encoded = logrec::encode(record);
        if self.buf.len() + encoded.len() + BLOCK_HEADER_SIZE > self.block_size {
            return false;
        }
        self.buf.extend_from_slice(&encoded);
        self.last_lsn = record.lsn;
        true
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Close the block out: pad to `block_size` and append the header, so
    /// every block on disk is exactly `block_size` bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let header = BlockHeader {
            run: self.run,
            end_lsn: self.last_lsn,
        };
        self.buf.resize(self.block_size - BLOCK_HEADER_SIZE, 0);
        self.buf.extend_from_slice(&header.encode());
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mini_aurora_common::logrec::RecordBody;

    fn tick(lsn: Lsn) -> LogRecord {
        LogRecord {
            lsn,
            txn_id: 0,
            prev_lsn_of_txn: 0,
            page_id: 0,
            page2_id: None,
            page_prev_lsn: 0,
            page2_prev_lsn: None,
            body: RecordBody::Tick,
        }
    }

    #[test]
    fn finished_block_is_exactly_block_size() {
        let mut assembly = BlockAssembly::new(1, DFT_BLOCK_SIZE);
        assembly.add(&tick(1));
        let block = assembly.finish();
        assert_eq!(block.len(), DFT_BLOCK_SIZE);
        let header = BlockHeader::decode(&block[DFT_BLOCK_SIZE - BLOCK_HEADER_SIZE..]);
        assert_eq!(header.run, 1);
        assert_eq!(header.end_lsn, 1);
    }

    #[test]
    fn add_rejects_once_block_is_full() {
        let mut assembly = BlockAssembly::new(1, 64);
        let mut added = 0;
        while assembly.add(&tick(added + 1)) {
            added += 1;
        }
        assert!(added > 0);
    }
}
