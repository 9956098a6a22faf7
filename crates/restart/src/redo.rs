//! REDO pass: replay every update record for a dirty page from its
//! rec-LSN forward, eagerly (before the system reopens for new
//! transactions) or on demand (the first time a user transaction fixes
//! that page).
//!
//! Grounded on spec §4.J. Exactly one of `Eager`/`OnDemand` is selected per
//! restart episode — see the "mixed restart" decision in this crate's
//! grounding ledger.

use std::collections::HashMap;

use mini_aurora_buffer::BufferPool;
use mini_aurora_common::logrec::{RecordBody, UpdatePayload};
use mini_aurora_common::{Lsn, LogRecord, PageId};

use crate::analysis::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoMode {
    /// Replay every dirty page before accepting new work.
    Eager,
    /// Replay a page's chain the first time it's fixed after a restart.
    OnDemand,
}

fn apply_update(pool: &BufferPool, page_id: PageId, lsn: Lsn, payload: &UpdatePayload) {
    let frame = match pool.fix(page_id) {
        Some(frame) => frame,
        None => {
            pool.install_new(page_id)
                .expect("buffer pool has room during restart");
            let frame = pool.fix(page_id).expect("just installed");
            frame
        }
    };
    if frame.page_lsn() < lsn {
        frame.with_write(|page| {
            let start = payload.offset as usize;
            let end = start + payload.after.len();
            if end <= page.len() {
                page[start..end].copy_from_slice(&payload.after);
            }
        });
        frame.mark_updated(lsn);
    }
    pool.unfix(&frame);
}

/// Eagerly replay every record from `records` whose page is in the dirty
/// page table, oldest first. `records` must already be filtered/ordered by
/// the caller to start at the minimum rec_lsn in `analysis.dirty_page_table`.
pub fn redo_eager(pool: &BufferPool, analysis: &AnalysisResult, records: &[LogRecord]) {
    for record in records {
        if !analysis.dirty_page_table.contains_key(&record.page_id) {
            continue;
        }
        match &record.body {
            RecordBody::Update(payload) => apply_update(pool, record.page_id, record.lsn, payload),
            RecordBody::Compensation(clr) => {
                let payload = UpdatePayload {
                    kind: mini_aurora_common::logrec::UpdateKind::RedoOnly,
                    offset: clr.offset,
                    after: clr.data.clone(),
                    before: None,
                };
                apply_update(pool, record.page_id, record.lsn, &payload);
            }
            _ => {}
        }
    }
}

/// On-demand REDO: replay only the chain for `page_id`, using a
/// pre-built per-page record list (the caller is responsible for
/// collecting it, e.g. via the archive or the WAL's page-chain index).
pub fn redo_on_demand(pool: &BufferPool, page_id: PageId, chain: &[LogRecord]) {
    for record in chain {
        match &record.body {
            RecordBody::Update(payload) => apply_update(pool, page_id, record.lsn, payload),
            RecordBody::Compensation(clr) => {
                let payload = UpdatePayload {
                    kind: mini_aurora_common::logrec::UpdateKind::RedoOnly,
                    offset: clr.offset,
                    after: clr.data.clone(),
                    before: None,
                };
                apply_update(pool, page_id, record.lsn, &payload);
            }
            _ => {}
        }
    }
}

/// Group dirty-page-table records by page for the eager pass's replay
/// order (lowest rec_lsn per page first).
pub fn group_by_rec_lsn(analysis: &AnalysisResult) -> Vec<(PageId, Lsn)> {
    let mut pages: Vec<(PageId, Lsn)> = analysis
        .dirty_page_table
        .iter()
        .map(|(&pid, &lsn)| (pid, lsn))
        .collect();
    pages.sort_by_key(|&(_, lsn)| lsn);
    pages
}
