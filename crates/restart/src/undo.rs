//! UNDO pass: walk each transaction still `Active` at crash time backward
//! through its own log chain (via `prev_lsn_of_txn`), undoing update
//! records and writing a Compensation Log Record (CLR) for each one so a
//! second crash during UNDO never re-undoes work already rolled back.
//!
//! Grounded on spec §4.I/§4.J and the teacher's `wal::recovery` backward
//! scan, generalized to produce CLRs rather than just a VDL watermark.

use std::collections::HashMap;

use mini_aurora_buffer::BufferPool;
use mini_aurora_common::logrec::{CompensationPayload, RecordBody, UpdateKind};
use mini_aurora_common::{Lsn, LogRecord, TxnId};
use mini_aurora_wal::writer::WalWriter;

use crate::analysis::AnalysisResult;

/// Undo one transaction's chain. `chain` must hold every log record for
/// `txn_id`, ordered oldest-first (the caller gathers this by following
/// `prev_lsn_of_txn` from `entry.last_lsn` back through the log).
///
/// Returns the CLRs produced, in the order they were appended.
pub fn undo_transaction(
    pool: &BufferPool,
    writer: &mut WalWriter,
    next_lsn: &mut Lsn,
    txn_id: TxnId,
    chain: &[LogRecord],
) -> Result<Vec<LogRecord>, std::io::Error> {
    let mut clrs = Vec::new();

    for record in chain.iter().rev() {
        if record.txn_id != txn_id {
            continue;
        }
        let payload = match &record.body {
            RecordBody::Update(payload) if payload.kind != UpdateKind::RedoOnly => payload,
            _ => continue,
        };
        let Some(before) = payload.before.as_ref() else {
            continue;
        };

        if let Some(frame) = pool.fix(record.page_id) {
            frame.with_write(|page| {
                let start = payload.offset as usize;
                let end = start + before.len();
                if end <= page.len() {
                    page[start..end].copy_from_slice(before);
                }
            });
            let clr_lsn = *next_lsn;
            *next_lsn += 1;
            frame.mark_updated(clr_lsn);
            pool.unfix(&frame);

            let clr = LogRecord {
                lsn: clr_lsn,
                txn_id,
                prev_lsn_of_txn: record.prev_lsn_of_txn,
                page_id: record.page_id,
                page2_id: None,
                page_prev_lsn: record.page_prev_lsn,
                page2_prev_lsn: None,
                body: RecordBody::Compensation(CompensationPayload {
                    undo_next: record.prev_lsn_of_txn,
                    offset: payload.offset,
                    data: before.clone(),
                }),
            };
            writer.append_record(&clr)?;
            clrs.push(clr);
        }
    }

    let end_lsn = *next_lsn;
    *next_lsn += 1;
    let xct_end = LogRecord {
        lsn: end_lsn,
        txn_id,
        prev_lsn_of_txn: chain.last().map(|r| r.lsn).unwrap_or(0),
        page_id: 0,
        page2_id: None,
        page_prev_lsn: 0,
        page2_prev_lsn: None,
        body: RecordBody::XctEnd,
    };
    writer.append_record(&xct_end)?;
    writer.sync()?;
    clrs.push(xct_end);

    Ok(clrs)
}

/// Undo every transaction the analysis pass found still active, oldest
/// transaction id first (an arbitrary but deterministic order; transactions
/// don't share locks with each other during single-threaded restart).
pub fn undo_all(
    pool: &BufferPool,
    writer: &mut WalWriter,
    next_lsn: &mut Lsn,
    analysis: &AnalysisResult,
    chains: &HashMap<TxnId, Vec<LogRecord>>,
) -> Result<(), std::io::Error> {
    let mut txns: Vec<TxnId> = analysis.active_txn_table.keys().copied().collect();
    txns.sort_unstable();
    for txn_id in txns {
        if let Some(chain) = chains.get(&txn_id) {
            undo_transaction(pool, writer, next_lsn, txn_id, chain)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mini_aurora_common::logrec::UpdatePayload;
    use mini_aurora_wal::reader::WalReader;
    use tempfile::NamedTempFile;

    fn update_with_before(lsn: Lsn, txn: TxnId, page: u64, before: u8, after: u8) -> LogRecord {
        LogRecord {
            lsn,
            txn_id: txn,
            prev_lsn_of_txn: lsn.saturating_sub(1),
            page_id: page,
            page2_id: None,
            page_prev_lsn: lsn.saturating_sub(1),
            page2_prev_lsn: None,
            body: RecordBody::Update(UpdatePayload {
                kind: UpdateKind::RedoUndo,
                offset: 0,
                after: vec![after],
                before: Some(vec![before]),
            }),
        }
    }

    #[test]
    fn undo_restores_before_image_and_writes_clr_and_end() {
        let pool = BufferPool::new(4);
        let frame = pool.install_new(7).unwrap();
        frame.mark_updated(1);
        frame.with_write(|p| p[0] = 0x22);
        pool.unfix(&frame);

        let tmp = NamedTempFile::new().unwrap();
        let mut writer = WalWriter::open(tmp.path()).unwrap();
        let mut next_lsn = 100;
        let chain = vec![update_with_before(1, 1, 7, 0x11, 0x22)];

        let clrs = undo_transaction(&pool, &mut writer, &mut next_lsn, 1, &chain).unwrap();
        assert_eq!(clrs.len(), 2);
        assert!(matches!(clrs[0].body, RecordBody::Compensation(_)));
        assert!(matches!(clrs[1].body, RecordBody::XctEnd));

        let frame = pool.fix(7).unwrap();
        assert_eq!(frame.read()[0], 0x11);
        drop(writer);

        let mut reader = WalReader::open(tmp.path()).unwrap();
        let records = reader.scan_all_records().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn redo_only_records_are_skipped_during_undo() {
        let pool = BufferPool::new(4);
        let tmp = NamedTempFile::new().unwrap();
        let mut writer = WalWriter::open(tmp.path()).unwrap();
        let mut next_lsn = 1;
        let chain = vec![LogRecord {
            lsn: 1,
            txn_id: 2,
            prev_lsn_of_txn: 0,
            page_id: 9,
            page2_id: None,
            page_prev_lsn: 0,
            page2_prev_lsn: None,
            body: RecordBody::Update(UpdatePayload {
                kind: UpdateKind::RedoOnly,
                offset: 0,
                after: vec![1],
                before: None,
            }),
        }];
        let clrs = undo_transaction(&pool, &mut writer, &mut next_lsn, 2, &chain).unwrap();
        assert_eq!(clrs.len(), 1);
        assert!(matches!(clrs[0].body, RecordBody::XctEnd));
    }
}
