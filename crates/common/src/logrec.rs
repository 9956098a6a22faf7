//! Tagged log-record variant and its on-disk codec (component A).
//!
//! Log records are variable-length and length-prefixed. The header is a
//! fixed-size prefix shared by every record kind; the body is kind-specific
//! and framed with explicit length prefixes for every variable-length field,
//! so a reader can always tell how many bytes to skip without interpreting
//! the payload. A trailing CRC32 covers the whole record (header + body).
//!
//! This replaces the union-of-record-kinds pattern of the original `logrec_t`
//! (a C++ tagged union) with a safe Rust enum: `RecordBody` carries exactly
//! the fields each kind needs, and `parse`/`encode` validate the declared
//! length against the kind before trusting any payload bytes.

use crc32fast::Hasher;

use crate::{Lsn, PageId, TxnId};

/// Outcome of decoding from the front of a byte buffer.
#[derive(Debug)]
pub enum ParseOutcome {
    /// Successfully decoded a record; `.1` is the number of bytes consumed.
    Record(LogRecord, usize),
    /// Not enough bytes in the buffer yet; caller should read at least this
    /// many additional bytes before retrying.
    NeedMore(usize),
    /// Length header or checksum is inconsistent.
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Update = 0,
    Compensation = 1,
    XctEnd = 2,
    Tick = 3,
    ChkptBegin = 4,
    ChkptDpt = 5,
    ChkptAtt = 6,
    ChkptEnd = 7,
    Skip = 8,
    PageWrite = 9,
}

impl RecordKind {
    fn from_u8(v: u8) -> Option<Self> {
        use RecordKind::*;
        Some(match v {
            0 => Update,
            1 => Compensation,
            2 => XctEnd,
            3 => Tick,
            4 => ChkptBegin,
            5 => ChkptDpt,
            6 => ChkptAtt,
            7 => ChkptEnd,
            8 => Skip,
            9 => PageWrite,
            _ => return None,
        })
    }
}

/// Whether an update record carries redo bytes, undo bytes, or both — the
/// spec's "redo-only / undo-only / redo+undo" record classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    RedoOnly,
    UndoOnly,
    RedoUndo,
}

/// Physical page delta carried by an `Update` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePayload {
    pub kind: UpdateKind,
    pub offset: u16,
    /// Present when `kind` includes redo: the bytes to write at `offset`.
    pub after: Vec<u8>,
    /// Present when `kind` includes undo: the bytes to restore at `offset`.
    pub before: Option<Vec<u8>>,
}

/// Compensation log record (CLR): always redo-only and idempotent. Replaying
/// it re-applies `data` at `offset` and remembers `undo_next`, the LSN of the
/// next record to visit when continuing to undo the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationPayload {
    pub undo_next: Lsn,
    pub offset: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    Update(UpdatePayload),
    Compensation(CompensationPayload),
    XctEnd,
    Tick,
    ChkptBegin,
    /// Dirty-page table snapshot: (page_id, rec_lsn) pairs.
    ChkptDpt(Vec<(PageId, Lsn)>),
    /// Active-transaction table snapshot: (txn_id, last_lsn) pairs.
    ChkptAtt(Vec<(TxnId, Lsn)>),
    ChkptEnd,
    /// Terminates a partition; the LSN is the first LSN of the next partition.
    Skip(Lsn),
    /// Retires DPT entries with clean_lsn >= this write's LSN.
    PageWrite(PageId, Lsn),
}

impl RecordBody {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBody::Update(_) => RecordKind::Update,
            RecordBody::Compensation(_) => RecordKind::Compensation,
            RecordBody::XctEnd => RecordKind::XctEnd,
            RecordBody::Tick => RecordKind::Tick,
            RecordBody::ChkptBegin => RecordKind::ChkptBegin,
            RecordBody::ChkptDpt(_) => RecordKind::ChkptDpt,
            RecordBody::ChkptAtt(_) => RecordKind::ChkptAtt,
            RecordBody::ChkptEnd => RecordKind::ChkptEnd,
            RecordBody::Skip(_) => RecordKind::Skip,
            RecordBody::PageWrite(..) => RecordKind::PageWrite,
        }
    }

    /// Non-update, administrative records that don't participate in the
    /// per-page redo/undo chain (spec's "non-update" record class).
    pub fn is_non_update(&self) -> bool {
        !matches!(
            self,
            RecordBody::Update(_) | RecordBody::Compensation(_)
        )
    }
}

/// A fully-decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn_of_txn: Lsn,
    pub page_id: PageId,
    pub page2_id: Option<PageId>,
    pub page_prev_lsn: Lsn,
    pub page2_prev_lsn: Option<Lsn>,
    pub body: RecordBody,
}

impl LogRecord {
    pub fn is_mtr_end(&self) -> bool {
        matches!(self.body, RecordBody::XctEnd)
    }

    /// The record's contribution to undo traversal: the LSN to visit next
    /// when walking backward through this transaction's chain.
    pub fn undo_next(&self) -> Lsn {
        match &self.body {
            RecordBody::Compensation(c) => c.undo_next,
            _ => self.prev_lsn_of_txn,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}
fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    put_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

/// Encode a record's header + body (everything except the outer length
/// prefix and trailing CRC, which `encode` adds).
fn encode_inner(record: &LogRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    put_u8(&mut buf, record.body.kind() as u8);
    put_u64(&mut buf, record.txn_id);
    put_u64(&mut buf, record.prev_lsn_of_txn);
    put_u64(&mut buf, record.page_id);
    match record.page2_id {
        Some(p2) => {
            put_u8(&mut buf, 1);
            put_u64(&mut buf, p2);
        }
        None => put_u8(&mut buf, 0),
    }
    put_u64(&mut buf, record.page_prev_lsn);
    match record.page2_prev_lsn {
        Some(l) => {
            put_u8(&mut buf, 1);
            put_u64(&mut buf, l);
        }
        None => put_u8(&mut buf, 0),
    }
    put_u64(&mut buf, record.lsn);

    match &record.body {
        RecordBody::Update(u) => {
            put_u8(&mut buf, u.kind as u8);
            put_u16(&mut buf, u.offset);
            put_bytes(&mut buf, &u.after);
            match &u.before {
                Some(b) => {
                    put_u8(&mut buf, 1);
                    put_bytes(&mut buf, b);
                }
                None => put_u8(&mut buf, 0),
            }
        }
        RecordBody::Compensation(c) => {
            put_u64(&mut buf, c.undo_next);
            put_u16(&mut buf, c.offset);
            put_bytes(&mut buf, &c.data);
        }
        RecordBody::XctEnd | RecordBody::Tick | RecordBody::ChkptBegin | RecordBody::ChkptEnd => {}
        RecordBody::ChkptDpt(entries) => {
            put_u32(&mut buf, entries.len() as u32);
            for (pid, lsn) in entries {
                put_u64(&mut buf, *pid);
                put_u64(&mut buf, *lsn);
            }
        }
        RecordBody::ChkptAtt(entries) => {
            put_u32(&mut buf, entries.len() as u32);
            for (txn, lsn) in entries {
                put_u64(&mut buf, *txn);
                put_u64(&mut buf, *lsn);
            }
        }
        RecordBody::Skip(next_lsn) => put_u64(&mut buf, *next_lsn),
        RecordBody::PageWrite(pid, clean_lsn) => {
            put_u64(&mut buf, *pid);
            put_u64(&mut buf, *clean_lsn);
        }
    }
    buf
}

/// Copy `UpdateKind` ordinal so it round-trips through a single byte.
impl UpdateKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(UpdateKind::RedoOnly),
            1 => Some(UpdateKind::UndoOnly),
            2 => Some(UpdateKind::RedoUndo),
            _ => None,
        }
    }
}

/// Encode a complete record: `[len:u32][inner bytes][crc32:u32]`.
pub fn encode(record: &LogRecord) -> Vec<u8> {
    let inner = encode_inner(record);
    let mut out = Vec::with_capacity(inner.len() + 8);
    put_u32(&mut out, inner.len() as u32);
    out.extend_from_slice(&inner);
    let mut hasher = Hasher::new();
    hasher.update(&inner);
    put_u32(&mut out, hasher.finalize());
    out
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
    fn need(&self, n: usize) -> Result<(), usize> {
        if self.remaining() < n {
            Err(n - self.remaining())
        } else {
            Ok(())
        }
    }
    fn take_u8(&mut self) -> Result<u8, usize> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }
    fn take_u16(&mut self) -> Result<u16, usize> {
        self.need(2)?;
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }
    fn take_u32(&mut self) -> Result<u32, usize> {
        self.need(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }
    fn take_u64(&mut self) -> Result<u64, usize> {
        self.need(8)?;
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }
    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], usize> {
        self.need(n)?;
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
    fn take_vec(&mut self) -> Result<Vec<u8>, usize> {
        let len = self.take_u32()? as usize;
        Ok(self.take_bytes(len)?.to_vec())
    }
}

/// Decode the header+body (i.e. everything `encode_inner` produced) from a
/// byte slice known to be exactly `len` bytes long.
fn decode_inner(buf: &[u8]) -> Result<LogRecord, String> {
    let mut c = Cursor { buf, pos: 0 };
    let kind = c
        .take_u8()
        .map_err(|_| "truncated record kind".to_string())?;
    let kind = RecordKind::from_u8(kind).ok_or_else(|| format!("unknown record kind {kind}"))?;
    let txn_id = c.take_u64().map_err(|_| "truncated txn_id")?;
    let prev_lsn_of_txn = c.take_u64().map_err(|_| "truncated prev_lsn_of_txn")?;
    let page_id = c.take_u64().map_err(|_| "truncated page_id")?;
    let has_page2 = c.take_u8().map_err(|_| "truncated page2 flag")?;
    let page2_id = if has_page2 != 0 {
        Some(c.take_u64().map_err(|_| "truncated page2_id")?)
    } else {
        None
    };
    let page_prev_lsn = c.take_u64().map_err(|_| "truncated page_prev_lsn")?;
    let has_page2_prev = c.take_u8().map_err(|_| "truncated page2_prev flag")?;
    let page2_prev_lsn = if has_page2_prev != 0 {
        Some(c.take_u64().map_err(|_| "truncated page2_prev_lsn")?)
    } else {
        None
    };
    let lsn = c.take_u64().map_err(|_| "truncated lsn")?;

    let body = match kind {
        RecordKind::Update => {
            let update_kind = c.take_u8().map_err(|_| "truncated update kind")?;
            let update_kind = UpdateKind::from_u8(update_kind)
                .ok_or_else(|| format!("unknown update kind {update_kind}"))?;
            let offset = c.take_u16().map_err(|_| "truncated offset")?;
            let after = c.take_vec().map_err(|_| "truncated after bytes")?;
            let has_before = c.take_u8().map_err(|_| "truncated before flag")?;
            let before = if has_before != 0 {
                Some(c.take_vec().map_err(|_| "truncated before bytes")?)
            } else {
                None
            };
            RecordBody::Update(UpdatePayload {
                kind: update_kind,
                offset,
                after,
                before,
            })
        }
        RecordKind::Compensation => {
            let undo_next = c.take_u64().map_err(|_| "truncated undo_next")?;
            let offset = c.take_u16().map_err(|_| "truncated offset")?;
            let data = c.take_vec().map_err(|_| "truncated clr data")?;
            RecordBody::Compensation(CompensationPayload {
                undo_next,
                offset,
                data,
            })
        }
        RecordKind::XctEnd => RecordBody::XctEnd,
        RecordKind::Tick => RecordBody::Tick,
        RecordKind::ChkptBegin => RecordBody::ChkptBegin,
        RecordKind::ChkptEnd => RecordBody::ChkptEnd,
        RecordKind::ChkptDpt => {
            let n = c.take_u32().map_err(|_| "truncated dpt count")? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let pid = c.take_u64().map_err(|_| "truncated dpt pid")?;
                let lsn = c.take_u64().map_err(|_| "truncated dpt lsn")?;
                entries.push((pid, lsn));
            }
            RecordBody::ChkptDpt(entries)
        }
        RecordKind::ChkptAtt => {
            let n = c.take_u32().map_err(|_| "truncated att count")? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let txn = c.take_u64().map_err(|_| "truncated att txn")?;
                let lsn = c.take_u64().map_err(|_| "truncated att lsn")?;
                entries.push((txn, lsn));
            }
            RecordBody::ChkptAtt(entries)
        }
        RecordKind::Skip => {
            let next = c.take_u64().map_err(|_| "truncated skip target")?;
            RecordBody::Skip(next)
        }
        RecordKind::PageWrite => {
            let pid = c.take_u64().map_err(|_| "truncated page_write pid")?;
            let clean_lsn = c.take_u64().map_err(|_| "truncated page_write lsn")?;
            RecordBody::PageWrite(pid, clean_lsn)
        }
    };

    Ok(LogRecord {
        lsn,
        txn_id,
        prev_lsn_of_txn,
        page_id,
        page2_id,
        page_prev_lsn,
        page2_prev_lsn,
        body,
    })
}

/// Parse one record from the front of `buf`, starting at `offset`.
pub fn parse(buf: &[u8], offset: usize) -> ParseOutcome {
    let remaining = &buf[offset..];
    if remaining.len() < 4 {
        return ParseOutcome::NeedMore(4 - remaining.len());
    }
    let inner_len = u32::from_le_bytes(remaining[0..4].try_into().unwrap()) as usize;
    let total_len = 4 + inner_len + 4;
    if remaining.len() < total_len {
        return ParseOutcome::NeedMore(total_len - remaining.len());
    }

    let inner = &remaining[4..4 + inner_len];
    let stored_crc = u32::from_le_bytes(
        remaining[4 + inner_len..4 + inner_len + 4]
            .try_into()
            .unwrap(),
    );
    let mut hasher = Hasher::new();
    hasher.update(inner);
    if hasher.finalize() != stored_crc {
        return ParseOutcome::Corrupt(format!("CRC mismatch at offset {offset}"));
    }

    match decode_inner(inner) {
        Ok(record) => ParseOutcome::Record(record, total_len),
        Err(e) => ParseOutcome::Corrupt(e),
    }
}

/// Maximum record size this engine ever writes (three blocks' worth), used
/// by the archiver's carry buffer to reassemble records spanning block
/// boundaries.
pub const MAX_RECORD_CARRY_BLOCKS: usize = 3;
