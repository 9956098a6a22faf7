//! Log analysis: a single backward scan from the end of the log to the
//! last checkpoint (or the start of the log, if none) rebuilding the
//! Dirty-Page Table and Active-Transaction Table restart needs before it
//! can start REDO.
//!
//! Grounded on spec §4.I and the teacher's own `wal::recovery::recover`
//! VCL/VDL scan, generalized from a single watermark computation to full
//! DPT/ATT reconstruction over the tagged `LogRecord` stream.

use std::collections::HashMap;

use mini_aurora_common::logrec::RecordBody;
use mini_aurora_common::{Lsn, LogRecord, PageId, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum TxnStatus {
    /// Still running (or in-doubt) at crash time; needs UNDO.
    Active,
    /// Committed (`XctEnd` seen); no UNDO needed.
    Committed,
}

#[derive(Debug, Clone, Copy)]
pub struct TxnEntry {
    pub status: TxnStatus,
    /// Most recent LSN written by this transaction — UNDO's starting
    /// point.
    pub last_lsn: Lsn,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    /// page_id -> earliest LSN not yet reflected on durable storage.
    pub dirty_page_table: HashMap<PageId, Lsn>,
    pub active_txn_table: HashMap<TxnId, TxnEntry>,
}

/// Run log analysis over `records`, which must be in ascending LSN order
/// (oldest first) starting from the last checkpoint's begin record (or the
/// start of the log).
pub fn analyze(records: &[LogRecord]) -> AnalysisResult {
    let mut result = AnalysisResult::default();

    for record in records {
        match &record.body {
            RecordBody::Update(_) | RecordBody::Compensation(_) => {
                result
                    .dirty_page_table
                    .entry(record.page_id)
                    .or_insert(record.lsn);
                if let Some(p2) = record.page2_id {
                    result.dirty_page_table.entry(p2).or_insert(record.lsn);
                }
                result.active_txn_table.insert(
                    record.txn_id,
                    TxnEntry {
                        status: TxnStatus::Active,
                        last_lsn: record.lsn,
                    },
                );
            }
            RecordBody::XctEnd => {
                result.active_txn_table.insert(
                    record.txn_id,
                    TxnEntry {
                        status: TxnStatus::Committed,
                        last_lsn: record.lsn,
                    },
                );
            }
            RecordBody::PageWrite(page_id, clean_lsn) => {
                // The page reached durable storage as of `clean_lsn`;
                // retire the DPT entry if nothing dirtied it since.
                if let Some(&rec_lsn) = result.dirty_page_table.get(page_id) {
                    if rec_lsn <= *clean_lsn {
                        result.dirty_page_table.remove(page_id);
                    }
                }
            }
            RecordBody::ChkptDpt(entries) => {
                for &(pid, lsn) in entries {
                    result.dirty_page_table.entry(pid).or_insert(lsn);
                }
            }
            RecordBody::ChkptAtt(entries) => {
                for &(txn, lsn) in entries {
                    result.active_txn_table.entry(txn).or_insert(TxnEntry {
                        status: TxnStatus::Active,
                        last_lsn: lsn,
                    });
                }
            }
            RecordBody::ChkptBegin | RecordBody::ChkptEnd | RecordBody::Tick | RecordBody::Skip(_) => {}
        }
    }

    result.active_txn_table.retain(|_, entry| entry.status == TxnStatus::Active);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(lsn: Lsn, txn: TxnId, page: PageId) -> LogRecord {
        LogRecord {
            lsn,
            txn_id: txn,
            prev_lsn_of_txn: lsn.saturating_sub(1),
            page_id: page,
            page2_id: None,
            page_prev_lsn: lsn.saturating_sub(1),
            page2_prev_lsn: None,
            body: RecordBody::Update(mini_aurora_common::logrec::UpdatePayload {
                kind: mini_aurora_common::logrec::UpdateKind::RedoOnly,
                offset: 0,
                after: vec![1],
                before: None,
            }),
        }
    }

    fn end(lsn: Lsn, txn: TxnId) -> LogRecord {
        LogRecord {
            lsn,
            txn_id: txn,
            prev_lsn_of_txn: lsn - 1,
            page_id: 0,
            page2_id: None,
            page_prev_lsn: 0,
            page2_prev_lsn: None,
            body: RecordBody::XctEnd,
        }
    }

    #[test]
    fn committed_txn_not_in_active_table() {
        let records = vec![update(1, 10, 1), end(2, 10)];
        let result = analyze(&records);
        assert!(!result.active_txn_table.contains_key(&10));
    }

    #[test]
    fn active_txn_tracked_with_last_lsn() {
        let records = vec![update(1, 10, 1), update(2, 10, 2)];
        let result = analyze(&records);
        let entry = result.active_txn_table[&10];
        assert_eq!(entry.last_lsn, 2);
        assert_eq!(entry.status, TxnStatus::Active);
    }

    #[test]
    fn dpt_records_earliest_dirtying_lsn() {
        let records = vec![update(1, 10, 5), update(2, 11, 5)];
        let result = analyze(&records);
        assert_eq!(result.dirty_page_table[&5], 1);
    }

    #[test]
    fn page_write_retires_dpt_entry() {
        let records = vec![update(1, 10, 5), LogRecord {
            lsn: 2,
            txn_id: 0,
            prev_lsn_of_txn: 0,
            page_id: 5,
            page2_id: None,
            page_prev_lsn: 0,
            page2_prev_lsn: None,
            body: RecordBody::PageWrite(5, 1),
        }];
        let result = analyze(&records);
        assert!(!result.dirty_page_table.contains_key(&5));
    }
}
