//! Writer thread: drains the run-ordered heap one fixed-LSN-window run at
//! a time, packs records into blocks, and closes each finished run through
//! the archive directory.
//!
//! Grounded on `LogArchiver::WriterThread` in
//! `original_source/src/sm/logarchiver.h`.

use mini_aurora_common::Lsn;

use crate::block::{BlockAssembly, DFT_BLOCK_SIZE};
use crate::directory::{ArchiveDirectory, RunInfo};
use crate::heap::ArchiverHeap;

pub struct WriterThread {
    directory: ArchiveDirectory,
    block_size: usize,
    next_run_id: u64,
}

impl WriterThread {
    pub fn new(directory: ArchiveDirectory, block_size: usize) -> Self {
        Self {
            directory,
            block_size,
            next_run_id: 1,
        }
    }

    pub fn with_default_block_size(directory: ArchiveDirectory) -> Self {
        Self::new(directory, DFT_BLOCK_SIZE)
    }

    /// Drain `heap` until it is empty (the caller has already fed it every
    /// record up to the activation's end LSN), writing one run file per
    /// fixed-LSN-window run boundary.
    pub fn drain(&mut self, heap: &mut ArchiverHeap) -> Result<Vec<RunInfo>, std::io::Error> {
        let mut closed_runs = Vec::new();
        if heap.is_empty() {
            return Ok(closed_runs);
        }

        let mut run_id = self.next_run_id;
        let mut assembly = BlockAssembly::new(run_id, self.block_size);
        let mut begin_lsn: Option<Lsn> = None;
        let mut end_lsn: Lsn = 0;
        let mut blocks = Vec::new();
        let mut current_heap_run = heap.top_run();

        while let Some(record) = heap.pop() {
            if heap.top_run() != current_heap_run && !assembly.is_empty() {
                // A fixed-LSN-window run boundary: close out this run.
                blocks.extend(assembly.finish());
                closed_runs.push(self.directory.close_current_run(
                    run_id,
                    begin_lsn.unwrap_or(0),
                    end_lsn,
                    &blocks,
                )?);
                run_id += 1;
                assembly = BlockAssembly::new(run_id, self.block_size);
                blocks = Vec::new();
                begin_lsn = None;
                current_heap_run = heap.top_run();
            }

            begin_lsn.get_or_insert(record.lsn);
            end_lsn = record.lsn;
            if !assembly.add(&record) {
                blocks.extend(std::mem::replace(&mut assembly, BlockAssembly::new(run_id, self.block_size)).finish());
                assembly.add(&record);
            }
        }

        if !assembly.is_empty() || !blocks.is_empty() {
            blocks.extend(assembly.finish());
            closed_runs.push(self.directory.close_current_run(
                run_id,
                begin_lsn.unwrap_or(0),
                end_lsn,
                &blocks,
            )?);
            run_id += 1;
        }

        self.next_run_id = run_id;
        Ok(closed_runs)
    }
}
