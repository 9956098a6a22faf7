//! Run scanner: iterates the records of one closed run file block by
//! block.
//!
//! Grounded on `ArchiveScanner::RunScanner` in
//! `original_source/src/sm/logarchiver.h`.

use std::fs;

use mini_aurora_common::{logrec, LogRecord};

use crate::block::BLOCK_HEADER_SIZE;
use crate::directory::RunInfo;

pub struct RunScanner {
    blocks: Vec<u8>,
    block_size: usize,
    block_idx: usize,
    offset_in_block: usize,
}

impl RunScanner {
    pub fn open(run: &RunInfo, block_size: usize) -> Result<Self, std::io::Error> {
        let blocks = fs::read(&run.path)?;
        Ok(Self {
            blocks,
            block_size,
            block_idx: 0,
            offset_in_block: 0,
        })
    }

    /// Next record in the run, or `None` once every block has been
    /// consumed.
    pub fn next(&mut self) -> Option<LogRecord> {
        loop {
            let block_start = self.block_idx * self.block_size;
            if block_start >= self.blocks.len() {
                return None;
            }
            let block_end = (block_start + self.block_size).min(self.blocks.len());
            let payload_end = block_end - BLOCK_HEADER_SIZE;
            let pos = block_start + self.offset_in_block;

            if pos >= payload_end || self.blocks[pos..payload_end].iter().all(|&b| b == 0) {
                self.block_idx += 1;
                self.offset_in_block = 0;
                continue;
            }

            match logrec::parse(&self.blocks[..payload_end], pos) {
                logrec::ParseOutcome::Record(record, consumed) => {
                    self.offset_in_block += consumed;
                    return Some(record);
                }
                _ => {
                    self.block_idx += 1;
                    self.offset_in_block = 0;
                    continue;
                }
            }
        }
    }
}
