//! On-disk layout of the run archive: one file per closed run, named by
//! the LSN range it covers, plus helpers to open a run for writing or
//! scanning and to list existing runs in order.
//!
//! Grounded on `LogArchiver::ArchiveDirectory` (`openNewRun`/
//! `closeCurrentRun`/`openForScan`/`listFiles`/`parseLSN`) in
//! `original_source/src/sm/logarchiver.h`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use mini_aurora_common::{Lsn, StorageError};

/// A closed, immutable run file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub run: u64,
    pub begin_lsn: Lsn,
    pub end_lsn: Lsn,
    pub path: PathBuf,
}

pub struct ArchiveDirectory {
    base_dir: PathBuf,
}

fn run_filename(run: u64, begin: Lsn, end: Lsn) -> String {
    format!("archive_{run:010}_{begin:020}_{end:020}.run")
}

/// Parse `(run, begin_lsn, end_lsn)` out of a run filename, mirroring
/// `ArchiveDirectory::parseLSN`.
pub fn parse_run_filename(name: &str) -> Option<(u64, Lsn, Lsn)> {
    let stem = name.strip_prefix("archive_")?.strip_suffix(".run")?;
    let mut parts = stem.split('_');
    let run = parts.next()?.parse().ok()?;
    let begin = parts.next()?.parse().ok()?;
    let end = parts.next()?.parse().ok()?;
    Some((run, begin, end))
}

impl ArchiveDirectory {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Write out a fully-assembled run (already laid out as fixed-size
    /// blocks) under its final name. Runs are written whole rather than
    /// incrementally so a crash mid-write never leaves a partially-named
    /// file other readers could mistake for a complete run.
    pub fn close_current_run(
        &self,
        run: u64,
        begin_lsn: Lsn,
        end_lsn: Lsn,
        blocks: &[u8],
    ) -> Result<RunInfo, StorageError> {
        let final_path = self.base_dir.join(run_filename(run, begin_lsn, end_lsn));
        let tmp_path = self.base_dir.join(format!(".tmp_{run}"));
        {
            let mut file: File = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(blocks)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(RunInfo {
            run,
            begin_lsn,
            end_lsn,
            path: final_path,
        })
    }

    /// List runs in ascending LSN order (`ArchiveDirectory::listFiles`).
    pub fn list_runs(&self) -> Result<Vec<RunInfo>, StorageError> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some((run, begin, end)) = parse_run_filename(&name) {
                runs.push(RunInfo {
                    run,
                    begin_lsn: begin,
                    end_lsn: end,
                    path: entry.path(),
                });
            }
        }
        runs.sort_by_key(|r| r.begin_lsn);
        Ok(runs)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
