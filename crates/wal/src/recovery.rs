use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::path::Path;

use mini_aurora_common::{DurabilityState, Lsn, PageId};

use crate::reader::{ReadResult, WalReader};

/// Result of WAL recovery: the durable state plus rebuilt indexes.
#[derive(Debug)]
pub struct RecoveryResult {
    /// Durability watermarks after recovery.
    pub durability: DurabilityState,
    /// Page → latest durable LSN index (only includes records ≤ VDL).
    pub page_index: HashMap<PageId, Lsn>,
    /// LSN → file offset mapping (only includes records ≤ VDL).
    pub lsn_offsets: HashMap<Lsn, u64>,
}

/// Perform WAL recovery:
/// 1. Scan forward, collecting all valid entries.
/// 2. Compute VCL (highest contiguous LSN).
/// 3. Compute VDL (highest CPL ≤ VCL).
/// 4. Truncate the WAL at VDL (discard incomplete MTRs).
/// 5. Rebuild page→LSN index from surviving records.
pub fn recover(wal_path: &Path) -> Result<RecoveryResult, std::io::Error> {
    let mut reader = WalReader::open(wal_path)?;

    // Phase 1: Scan all valid entries
    let mut all_lsns = BTreeSet::new();
    let mut cpls = BTreeSet::new(); // MTR completion points
    let mut entries: Vec<ScannedEntry> = Vec::new();

    reader.seek_start()?;
    loop {
        let file_offset = reader.stream_position()?;
        match reader.read_entry()? {
            ReadResult::Entry(hdr, _data) => {
                all_lsns.insert(hdr.lsn);
                if hdr.is_mtr_end() {
                    cpls.insert(hdr.lsn);
                }
                entries.push(ScannedEntry {
                    lsn: hdr.lsn,
                    page_id: hdr.page_id,
                    file_offset,
                    is_mtr_end: hdr.is_mtr_end(),
                });
            }
            ReadResult::Eof | ReadResult::Corrupted { .. } => break,
        }
    }

    // Phase 2: Compute VCL — highest LSN N where all 1..=N are present
    let vcl = compute_vcl(&all_lsns);

    // Phase 3: Compute VDL — highest CPL ≤ VCL
    let vdl = cpls
        .iter()
        .rev()
        .find(|&&lsn| lsn <= vcl)
        .copied()
        .unwrap_or(0);

    // Phase 4: Truncate WAL at VDL
    // Find the file offset just past the VDL entry
    let truncate_at = if vdl == 0 {
        0
    } else {
        find_end_of_entry(wal_path, vdl, &entries)?
    };

    let file = OpenOptions::new().write(true).open(wal_path)?;
    file.set_len(truncate_at)?;
    drop(file);

    // Phase 5: Rebuild indexes from surviving entries (LSN ≤ VDL)
    let mut page_index: HashMap<PageId, Lsn> = HashMap::new();
    let mut lsn_offsets: HashMap<Lsn, u64> = HashMap::new();

    for entry in &entries {
        if entry.lsn > vdl {
            break;
        }
        lsn_offsets.insert(entry.lsn, entry.file_offset);
        let latest = page_index.entry(entry.page_id).or_insert(0);
        if entry.lsn > *latest {
            *latest = entry.lsn;
        }
    }

    Ok(RecoveryResult {
        durability: DurabilityState { vcl, vdl },
        page_index,
        lsn_offsets,
    })
}

#[derive(Debug)]
struct ScannedEntry {
    lsn: Lsn,
    page_id: PageId,
    file_offset: u64,
    #[allow(dead_code)]
    is_mtr_end: bool,
}

/// Compute VCL: highest N such that all LSNs 1..=N are present.
fn compute_vcl(lsns: &BTreeSet<Lsn>) -> Lsn {
    let mut expected = 1u64;
    for &lsn in lsns {
        if lsn != expected {
            return expected - 1;
        }
        expected += 1;
    }
    expected - 1
}

/// Find the byte offset in the WAL file immediately after the entry with the given LSN.
fn find_end_of_entry(
    wal_path: &Path,
    target_lsn: Lsn,
    entries: &[ScannedEntry],
) -> Result<u64, std::io::Error> {
    // Find the entry with this LSN
    for (i, entry) in entries.iter().enumerate() {
        if entry.lsn == target_lsn {
            // The end is the start of the next entry, or we need to compute from the entry
            if i + 1 < entries.len() {
                return Ok(entries[i + 1].file_offset);
            } else {
                // Last entry — use file size (the reader stopped after this entry)
                let metadata = std::fs::metadata(wal_path)?;
                return Ok(metadata.len());
            }
        }
    }
    Ok(0)
}

// Helper methods on WalReader for recovery
impl WalReader {
    pub fn seek_start(&mut self) -> Result<(), std::io::Error> {
        use std::io::Seek;
        self.file.seek(std::io::SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn stream_position(&mut self) -> Result<u64, std::io::Error> {
        use std::io::Seek;
        self.file.stream_position()
    }
}
