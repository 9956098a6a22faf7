//! Log consumer: the archiver's view of the recovery log as a plain
//! sequence of tagged records, hiding the reader's block-boundary carry
//! buffer from the heap stage.
//!
//! Grounded on `LogArchiver::LogConsumer` (`open`/`next`/`getNextLSN`) in
//! `original_source/src/sm/logarchiver.h`.

use std::path::Path;

use mini_aurora_common::{Lsn, LogRecord};

use crate::reader::ReaderThread;

pub struct LogConsumer {
    reader: ReaderThread,
    offset: u64,
    carry: Vec<u8>,
    next_lsn: Lsn,
}

impl LogConsumer {
    pub fn open(wal_path: &Path, start_offset: u64) -> Result<Self, std::io::Error> {
        Ok(Self {
            reader: ReaderThread::open(wal_path)?,
            offset: start_offset,
            carry: Vec::new(),
            next_lsn: 0,
        })
    }

    /// Pull the next record, or `None` at the current end of the log.
    pub fn next(&mut self) -> Result<Option<LogRecord>, std::io::Error> {
        match self.reader.read_next(self.offset, &mut self.carry)? {
            Some((record, next_offset)) => {
                self.offset = next_offset;
                self.next_lsn = record.lsn + 1;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// LSN the consumer expects next — used by the orchestrator to decide
    /// how far an activation cycle has progressed.
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mini_aurora_common::logrec::RecordBody;
    use mini_aurora_wal::writer::WalWriter;
    use tempfile::NamedTempFile;

    #[test]
    fn drains_the_log_in_order() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();

        let mut writer = WalWriter::open(&path).unwrap();
        for lsn in 1..=4 {
            writer
                .append_record(&LogRecord {
                    lsn,
                    txn_id: 0,
                    prev_lsn_of_txn: 0,
                    page_id: lsn,
                    page2_id: None,
                    page_prev_lsn: 0,
                    page2_prev_lsn: None,
                    body: RecordBody::Tick,
                })
                .unwrap();
        }
        writer.sync().unwrap();
        drop(writer);

        let mut consumer = LogConsumer::open(&path, 0).unwrap();
        let mut seen = Vec::new();
        while let Some(record) = consumer.next().unwrap() {
            seen.push(record.lsn);
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(consumer.next_lsn(), 5);
    }
}
