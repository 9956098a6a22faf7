use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use mini_aurora_common::{DurabilityState, Lsn, PageId, RedoRecord, LOG_ENTRY_HEADER_SIZE};
use serde::{Deserialize, Serialize};

use crate::reader::WalReader;
use crate::writer::WalWriter;

pub type SegmentId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Hot,
    Cold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    pub filename: String,
    pub tier: Tier,
    pub lsn_range: (Lsn, Lsn),
    pub size_bytes: u64,
    pub sealed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LsnLocation {
    pub segment_id: SegmentId,
    pub file_offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub segments: Vec<SegmentMeta>,
    /// The ID of the currently active (unsealed) segment.
    pub active_segment_id: SegmentId,
}

impl Manifest {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            active_segment_id: 1,
        }
    }
}

/// Manages multiple WAL segment files with hot/cold tiering.
pub struct SegmentManager {
    hot_dir: PathBuf,
    cold_dir: PathBuf,
    manifest: Manifest,
    active_writer: WalWriter,
    active_segment_id: SegmentId,
    active_first_lsn: Option<Lsn>,
    active_bytes_written: u64,
    max_segment_bytes: u64,
    cold_latency: Duration,
    base_dir: PathBuf,
    /// Where each LSN physically lives, populated as records are appended
    /// and rebuilt wholesale by `recover`. Backs `read_at`.
    lsn_offsets: HashMap<Lsn, LsnLocation>,
}

impl SegmentManager {
    /// Open or create a segmented WAL in `base_dir`.
    pub fn open(base_dir: &Path, max_segment_bytes: u64, cold_latency: Duration) -> Result<Self, std::io::Error> {
        let hot_dir = base_dir.join("hot");
        let cold_dir = base_dir.join("cold");
        fs::create_dir_all(&hot_dir)?;
        fs::create_dir_all(&cold_dir)?;

        let manifest_path = base_dir.join("manifest.json");
        let manifest: Manifest = if manifest_path.exists() {
            let content = fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
        } else {
            Manifest::new()
        };

        // Open (or create) the active segment for appending.
        // WalWriter::open uses create+append mode, so existing data is preserved.
        let active_segment_id = manifest.active_segment_id;
        let active_path = hot_dir.join(segment_filename(active_segment_id));
        let active_writer = WalWriter::open(&active_path)?;
        let active_bytes_written = fs::metadata(&active_path).map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            hot_dir,
            cold_dir,
            manifest,
            active_writer,
            active_segment_id,
            active_first_lsn: None,
            active_bytes_written,
            max_segment_bytes,
            cold_latency,
            base_dir: base_dir.to_path_buf(),
            lsn_offsets: HashMap::new(),
        })
    }

    /// Append a batch of records, rotating segments as needed.
    /// Returns LsnLocations for each record.
    pub fn append_batch(&mut self, records: &[RedoRecord]) -> Result<Vec<LsnLocation>, std::io::Error> {
        let mut locations = Vec::with_capacity(records.len());

        for record in records {
            // Check if we need to rotate before writing
            let entry_size = LOG_ENTRY_HEADER_SIZE as u64 + record.data.len() as u64;
            if self.active_bytes_written > 0 && self.active_bytes_written + entry_size > self.max_segment_bytes {
                self.rotate()?;
            }

            let file_offset = self.active_bytes_written;

            if self.active_first_lsn.is_none() {
                self.active_first_lsn = Some(record.lsn);
            }

            let location = LsnLocation {
                segment_id: self.active_segment_id,
                file_offset,
            };
            locations.push(location);
            self.lsn_offsets.insert(record.lsn, location);

            self.active_writer.append(record)?;
            self.active_bytes_written += entry_size;
        }

        Ok(locations)
    }

    /// Fsync the active segment.
    pub fn sync(&mut self) -> Result<(), std::io::Error> {
        self.active_writer.sync()
    }

    /// Seal the current segment and open a new one.
    /// Returns (sealed_id, new_id).
    pub fn rotate(&mut self) -> Result<(SegmentId, SegmentId), std::io::Error> {
        let sealed_id = self.active_segment_id;

        // Sync before sealing
        self.active_writer.sync()?;

        // Record the sealed segment in the manifest
        let sealed_filename = segment_filename(sealed_id);
        let first_lsn = self.active_first_lsn.unwrap_or(0);
        let sealed_meta = SegmentMeta {
            id: sealed_id,
            filename: sealed_filename,
            tier: Tier::Hot,
            lsn_range: (first_lsn, first_lsn), // updated by caller via update_sealed_lsn_range
            size_bytes: self.active_bytes_written,
            sealed: true,
        };
        self.manifest.segments.push(sealed_meta);

        // Open new segment
        let new_id = sealed_id + 1;
        self.manifest.active_segment_id = new_id;
        self.save_manifest()?;

        let new_path = self.hot_dir.join(segment_filename(new_id));
        self.active_writer = WalWriter::open(&new_path)?;

        self.active_segment_id = new_id;
        self.active_first_lsn = None;
        self.active_bytes_written = 0;

        Ok((sealed_id, new_id))
    }

    /// Update the LSN range on a sealed segment.
    pub fn update_sealed_lsn_range(&mut self, segment_id: SegmentId, lsn_range: (Lsn, Lsn)) {
        for seg in &mut self.manifest.segments {
            if seg.id == segment_id {
                seg.lsn_range = lsn_range;
            }
        }
    }

    /// Open a reader for a given segment. Returns the reader and its tier.
    pub fn open_segment_reader(&self, segment_id: SegmentId) -> Result<(WalReader, Tier), std::io::Error> {
        // Check if it's the active segment
        if segment_id == self.active_segment_id {
            let path = self.hot_dir.join(segment_filename(segment_id));
            let reader = WalReader::open(&path)?;
            return Ok((reader, Tier::Hot));
        }

        // Check manifest for sealed segments
        for seg in &self.manifest.segments {
            if seg.id == segment_id {
                let path = match seg.tier {
                    Tier::Hot => self.hot_dir.join(&seg.filename),
                    Tier::Cold => self.cold_dir.join(&seg.filename),
                };
                let reader = WalReader::open(&path)?;
                return Ok((reader, seg.tier));
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("segment {} not found", segment_id),
        ))
    }

    /// Move old sealed segments from hot to cold.
    /// Keeps the most recent `keep_hot` sealed segments in hot tier.
    pub fn cool_segments(&mut self, keep_hot: usize) -> Result<Vec<SegmentId>, std::io::Error> {
        let mut cooled = Vec::new();
        let sealed_hot: Vec<usize> = self.manifest.segments.iter()
            .enumerate()
            .filter(|(_, s)| s.sealed && s.tier == Tier::Hot)
            .map(|(i, _)| i)
            .collect();

        if sealed_hot.len() <= keep_hot {
            return Ok(cooled);
        }

        let to_cool = sealed_hot.len() - keep_hot;
        for &idx in sealed_hot.iter().take(to_cool) {
            let seg = &self.manifest.segments[idx];
            let src = self.hot_dir.join(&seg.filename);
            let dst = self.cold_dir.join(&seg.filename);
            fs::rename(&src, &dst)?;
            let seg_id = seg.id;
            self.manifest.segments[idx].tier = Tier::Cold;
            cooled.push(seg_id);
        }

        if !cooled.is_empty() {
            self.save_manifest()?;
        }

        Ok(cooled)
    }

    /// Inject cold-tier latency (blocking sleep).
    pub fn inject_cold_latency(&self) {
        if !self.cold_latency.is_zero() {
            thread::sleep(self.cold_latency);
        }
    }

    /// Get the cold latency duration.
    pub fn cold_latency(&self) -> Duration {
        self.cold_latency
    }

    /// Recover: scan all segments to rebuild indexes.
    pub fn recover(&mut self) -> Result<RecoveryData, std::io::Error> {
        let mut page_index: HashMap<PageId, Lsn> = HashMap::new();
        let mut lsn_offsets: HashMap<Lsn, LsnLocation> = HashMap::new();
        let mut all_lsns = std::collections::BTreeSet::new();
        let mut cpls = std::collections::BTreeSet::new();

        // Collect sealed segment info first to avoid borrow conflict
        let sealed_info: Vec<(PathBuf, SegmentId)> = self.manifest.segments.iter().map(|seg| {
            let path = match seg.tier {
                Tier::Hot => self.hot_dir.join(&seg.filename),
                Tier::Cold => self.cold_dir.join(&seg.filename),
            };
            (path, seg.id)
        }).collect();

        // Scan sealed segments in order
        for (path, seg_id) in &sealed_info {
            if !path.exists() {
                continue;
            }
            let mut reader = WalReader::open(path)?;
            self.scan_segment(&mut reader, *seg_id, &mut all_lsns, &mut cpls, &mut lsn_offsets, &mut page_index)?;
        }

        // Scan active segment
        let active_path = self.hot_dir.join(segment_filename(self.active_segment_id));
        if active_path.exists() {
            let mut reader = WalReader::open(&active_path)?;
            self.scan_segment(&mut reader, self.active_segment_id, &mut all_lsns, &mut cpls, &mut lsn_offsets, &mut page_index)?;
            self.active_bytes_written = fs::metadata(&active_path).map(|m| m.len()).unwrap_or(0);
        }

        // Compute VCL and VDL
        let vcl = compute_vcl(&all_lsns);
        let vdl = cpls.iter().rev().find(|&&lsn| lsn <= vcl).copied().unwrap_or(0);

        self.lsn_offsets = lsn_offsets.clone();

        Ok(RecoveryData {
            durability: DurabilityState { vcl, vdl },
            page_index,
            lsn_offsets,
        })
    }

    /// Open a partition (segment) for reading by number, the `open_partition`
    /// collaborator operation named independently of `open_segment_reader`'s
    /// tier-aware tuple so callers that only care about "give me a handle to
    /// partition N" don't need to unpack a `Tier`.
    pub fn open_partition(&self, partition_num: SegmentId) -> Result<WalReader, std::io::Error> {
        self.open_segment_reader(partition_num).map(|(reader, _tier)| reader)
    }

    /// Read the raw record data stored at `lsn` into `buf`, looking up its
    /// physical location via the index populated by `append_batch`/`recover`.
    pub fn read_at(&self, lsn: Lsn, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        let location = self.lsn_offsets.get(&lsn).copied().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("lsn {} not indexed", lsn))
        })?;
        let (mut reader, _tier) = self.open_segment_reader(location.segment_id)?;
        reader.seek_to(location.file_offset)?;
        match reader.read_entry()? {
            crate::reader::ReadResult::Entry(_hdr, data) => {
                buf.clear();
                buf.extend_from_slice(&data);
                Ok(())
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("no entry at lsn {}", lsn),
            )),
        }
    }

    fn scan_segment(
        &mut self,
        reader: &mut WalReader,
        segment_id: SegmentId,
        all_lsns: &mut std::collections::BTreeSet<Lsn>,
        cpls: &mut std::collections::BTreeSet<Lsn>,
        lsn_offsets: &mut HashMap<Lsn, LsnLocation>,
        page_index: &mut HashMap<PageId, Lsn>,
    ) -> Result<(), std::io::Error> {
        loop {
            let file_offset = reader.stream_position()?;
            match reader.read_entry()? {
                crate::reader::ReadResult::Entry(hdr, _data) => {
                    all_lsns.insert(hdr.lsn);
                    if hdr.is_mtr_end() {
                        cpls.insert(hdr.lsn);
                    }
                    lsn_offsets.insert(hdr.lsn, LsnLocation {
                        segment_id,
                        file_offset,
                    });
                    let entry = page_index.entry(hdr.page_id).or_insert(0);
                    if hdr.lsn > *entry {
                        *entry = hdr.lsn;
                    }
                    if segment_id == self.active_segment_id && self.active_first_lsn.is_none() {
                        self.active_first_lsn = Some(hdr.lsn);
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), std::io::Error> {
        let manifest_path = self.base_dir.join("manifest.json");
        let tmp_path = self.base_dir.join("manifest.json.tmp");
        let content = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &manifest_path)?;
        Ok(())
    }
}

/// Data returned from segment recovery.
pub struct RecoveryData {
    pub durability: DurabilityState,
    pub page_index: HashMap<PageId, Lsn>,
    pub lsn_offsets: HashMap<Lsn, LsnLocation>,
}

fn segment_filename(id: SegmentId) -> String {
    format!("wal_{:06}.seg", id)
}

fn compute_vcl(lsns: &std::collections::BTreeSet<Lsn>) -> Lsn {
    let mut expected = 1u64;
    for &lsn in lsns {
        if lsn != expected {
            return expected - 1;
        }
        expected += 1;
    }
    expected - 1
}
