//! Archiver coverage: the per-page projection of the merged archive must
//! reconstruct the same per-page LSN order as the original log.

use std::collections::HashMap;
use std::time::Duration;

use mini_aurora_archiver::directory::ArchiveDirectory;
use mini_aurora_archiver::merger::RunMerger;
use mini_aurora_archiver::scanner::RunScanner;
use mini_aurora_archiver::ArchiverPipeline;
use mini_aurora_common::logrec::RecordBody;
use mini_aurora_common::LogRecord;
use mini_aurora_wal::writer::WalWriter;
use tempfile::tempdir;

fn tick(lsn: u64, page_id: u64) -> LogRecord {
    LogRecord {
        lsn,
        txn_id: 0,
        prev_lsn_of_txn: 0,
        page_id,
        page2_id: None,
        page_prev_lsn: 0,
        page2_prev_lsn: None,
        body: RecordBody::Tick,
    }
}

#[test]
fn archiver_coverage_matches_the_logs_redo_projection_per_page() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("wal.log");
    let archive_path = dir.path().join("archive");

    let pages = [1u64, 2, 3, 4, 5];
    let k = 40u64;
    let mut writer = WalWriter::open(&wal_path).unwrap();
    let mut original_by_page: HashMap<u64, Vec<u64>> = HashMap::new();
    for lsn in 1..=k {
        let page = pages[(lsn as usize - 1) % pages.len()];
        writer.append_record(&tick(lsn, page)).unwrap();
        original_by_page.entry(page).or_default().push(lsn);
    }
    writer.sync().unwrap();
    drop(writer);

    let block_size = 512;
    let run_window = 10;
    let archive_dir = ArchiveDirectory::open(&archive_path).unwrap();
    let pipeline = ArchiverPipeline::start(wal_path, archive_dir, run_window, block_size).unwrap();
    pipeline.activate(k);
    pipeline
        .next_runs(Duration::from_secs(2))
        .expect("archiver did not seal a run within the deadline");
    pipeline.shutdown();

    let archive_dir = ArchiveDirectory::open(&archive_path).unwrap();
    let runs = archive_dir.list_runs().unwrap();
    assert!(runs.len() > 1, "a 10-LSN run window over 40 records should force more than one run");

    let scanners: Vec<RunScanner> = runs.iter().map(|r| RunScanner::open(r, block_size).unwrap()).collect();
    let mut merger = RunMerger::new(scanners);
    let mut merged_by_page: HashMap<u64, Vec<u64>> = HashMap::new();
    while let Some(record) = merger.next() {
        merged_by_page.entry(record.page_id).or_default().push(record.lsn);
    }

    assert_eq!(merged_by_page, original_by_page);
}
