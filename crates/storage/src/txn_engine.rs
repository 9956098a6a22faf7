//! The transactional `Engine` handle: an in-memory B+tree index guarded by
//! range locks, durable through a tagged write-ahead log, checkpointed and
//! restartable through `mini-aurora-restart`, and archivable through
//! `mini-aurora-archiver`.
//!
//! This sits alongside the original `StorageEngine`/`StorageApi` (the
//! single-page redo-record pipeline `crate::engine` still implements) as a
//! second, independent storage surface — the index/transaction model this
//! crate now needs rather than a replacement for the page-materialization
//! one. Grounded on spec §9's engine handle and the component crates it
//! composes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use mini_aurora_btree::BTree;
use mini_aurora_buffer::pool::LogFlusher;
use mini_aurora_buffer::BufferPool;
use mini_aurora_common::logrec::{RecordBody, UpdateKind, UpdatePayload};
use mini_aurora_common::{Lsn, LogRecord, StorageError, TxnId};
use mini_aurora_lock::{CommitLsnDependencies, ElrMode, LockMode, LockTable};
use mini_aurora_restart::{analyze, restart as run_restart, take_checkpoint, CommitLsnGate, RedoMode};
use mini_aurora_wal::reader::WalReader;
use mini_aurora_wal::writer::WalWriter;

/// How long a transaction waits on a contended key before giving up.
const LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Adapts the shared WAL writer to the buffer pool's `LogFlusher`
/// collaborator, so `BufferPool::evict_one` can force the log durable
/// before writing back a dirty frame without the buffer crate depending on
/// the WAL crate directly.
struct WalFlusher(Arc<StdMutex<WalWriter>>);

impl LogFlusher for WalFlusher {
    fn flush_until(&self, lsn: Lsn) -> Result<(), StorageError> {
        self.0
            .lock()
            .unwrap()
            .flush_until(lsn)
            .map_err(|e| StorageError::Other(e.to_string()))
    }
}

pub struct Engine {
    tree: StdMutex<BTree>,
    locks: LockTable,
    pool: BufferPool,
    writer: Arc<StdMutex<WalWriter>>,
    wal_path: PathBuf,
    next_lsn: AtomicU64,
    next_txn_id: AtomicU64,
    commit_gate: CommitLsnGate,
    elr_mode: ElrMode,
    elr_deps: CommitLsnDependencies,
}

impl Engine {
    /// Open (creating if needed) a transactional engine backed by the WAL
    /// at `wal_path`, running instant restart over any existing log tail.
    /// Locks are held to commit durability (`ElrMode::None`); use
    /// `open_with_elr_mode` for early release.
    pub fn open(wal_path: &Path) -> Result<Self, StorageError> {
        Self::open_with_elr_mode(wal_path, ElrMode::None)
    }

    /// Open a transactional engine with a given Early Lock Release mode
    /// governing how soon `Transaction::commit` releases locks relative to
    /// the commit record's durability.
    pub fn open_with_elr_mode(wal_path: &Path, elr_mode: ElrMode) -> Result<Self, StorageError> {
        if !wal_path.exists() {
            std::fs::File::create(wal_path)?;
        }

        let mut tree = BTree::create();
        let pool = BufferPool::new(256);
        let mut next_lsn: Lsn = 1;

        let mut reader = WalReader::open(wal_path)?;
        let records = reader.scan_all_records()?;
        if !records.is_empty() {
            next_lsn = records.iter().map(|r| r.lsn).max().unwrap_or(0) + 1;
            replay_into_tree(&records, &mut tree);

            let gate = CommitLsnGate::new();
            let mut writer = WalWriter::open(wal_path)?;
            run_restart(&pool, &mut writer, &mut next_lsn, &records, RedoMode::Eager, &gate)?;
        }

        let writer = Arc::new(StdMutex::new(WalWriter::open(wal_path)?));
        pool.set_log_flusher(Arc::new(WalFlusher(writer.clone())));

        Ok(Self {
            tree: StdMutex::new(tree),
            locks: LockTable::new(),
            pool,
            writer,
            wal_path: wal_path.to_path_buf(),
            next_lsn: AtomicU64::new(next_lsn),
            next_txn_id: AtomicU64::new(1),
            commit_gate: CommitLsnGate::new(),
            elr_mode,
            elr_deps: CommitLsnDependencies::new(),
        })
    }

    fn alloc_lsn(&self) -> Lsn {
        self.next_lsn.fetch_add(1, Ordering::AcqRel)
    }

    pub fn begin(&self) -> Transaction<'_> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::AcqRel);
        Transaction {
            engine: self,
            txn_id,
            shared_locks: Vec::new(),
            exclusive_locks: Vec::new(),
            log: Vec::new(),
            finished: false,
        }
    }

    /// Record that `dependent` inherited a lock released early by a
    /// transaction whose commit is durable only once LSN `lender_commit_lsn`
    /// is durable. Only meaningful under `ElrMode::Clv`.
    pub fn record_elr_dependency(&self, dependent: TxnId, lender_commit_lsn: Lsn) {
        self.elr_deps.record_dependency(dependent, lender_commit_lsn);
    }

    /// Take an advisory checkpoint of the current dirty-page table. The
    /// active-transaction table is empty here since this engine commits
    /// synchronously with no cross-call-boundary open transactions.
    pub fn checkpoint(&self) -> Result<Lsn, std::io::Error> {
        let mut writer = self.writer.lock().unwrap();
        let mut next_lsn = self.next_lsn.load(Ordering::Acquire);
        let lsn = take_checkpoint(&mut writer, &mut next_lsn, &self.pool, &[])?;
        self.next_lsn.store(next_lsn, Ordering::Release);
        Ok(lsn)
    }

    pub fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tree.lock().unwrap().lookup(key)
    }

    /// Every committed row currently visible in the index, in key order.
    pub fn scan_all(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let tree = self.tree.lock().unwrap();
        let mut cursor = mini_aurora_btree::Cursor::open(&tree, None, None);
        let mut rows = Vec::new();
        while let Some(row) = cursor.next() {
            rows.push(row);
        }
        rows
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }
}

fn replay_into_tree(records: &[LogRecord], tree: &mut BTree) {
    let analysis = analyze(records);
    for record in records {
        if let RecordBody::Update(payload) = &record.body {
            // A transaction still in the active table never committed
            // before the crash; its effects must not reappear in the
            // recovered tree.
            if analysis.active_txn_table.contains_key(&record.txn_id) {
                continue;
            }
            apply_logical_op(tree, payload);
        }
    }
}

/// `UpdatePayload::after` is the logical operation's encoded effect:
/// `[0, key_len as u16 LE, key, value]` for insert/put, `[1, key_len, key]`
/// for remove. See `Transaction::log_op`.
fn apply_logical_op(tree: &mut BTree, payload: &UpdatePayload) {
    if payload.after.is_empty() {
        return;
    }
    match payload.after[0] {
        0 => {
            if payload.after.len() < 3 {
                return;
            }
            let key_len = u16::from_le_bytes([payload.after[1], payload.after[2]]) as usize;
            let key = payload.after[3..3 + key_len].to_vec();
            let value = payload.after[3 + key_len..].to_vec();
            tree.put(key, value);
        }
        1 => {
            if payload.after.len() < 3 {
                return;
            }
            let key_len = u16::from_le_bytes([payload.after[1], payload.after[2]]) as usize;
            let key = payload.after[3..3 + key_len].to_vec();
            let _ = tree.remove(&key);
        }
        _ => {}
    }
}

fn encode_put(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8];
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

fn encode_remove(key: &[u8]) -> Vec<u8> {
    let mut out = vec![1u8];
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(key);
    out
}

pub struct Transaction<'e> {
    engine: &'e Engine,
    txn_id: TxnId,
    shared_locks: Vec<Vec<u8>>,
    exclusive_locks: Vec<Vec<u8>>,
    /// Logical undo journal: `(key, prior_value)`, oldest first. `None`
    /// prior value means the key didn't exist before this transaction
    /// touched it.
    log: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    finished: bool,
}

impl<'e> Transaction<'e> {
    /// The transaction identifier assigned by `Engine::begin`, needed by
    /// callers that register an Early Lock Release commit-LSN dependency
    /// on this transaction's behalf.
    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    fn lock_key(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.engine
            .locks
            .acquire(self.txn_id, &key.to_vec(), LockMode::X, LOCK_TIMEOUT)?;
        if !self.exclusive_locks.iter().any(|k| k == key) {
            self.exclusive_locks.push(key.to_vec());
        }
        Ok(())
    }

    fn append(&self, after: Vec<u8>) -> Result<(), StorageError> {
        let lsn = self.engine.alloc_lsn();
        let record = LogRecord {
            lsn,
            txn_id: self.txn_id,
            prev_lsn_of_txn: lsn.saturating_sub(1),
            page_id: 0,
            page2_id: None,
            page_prev_lsn: 0,
            page2_prev_lsn: None,
            body: RecordBody::Update(UpdatePayload {
                kind: UpdateKind::RedoOnly,
                offset: 0,
                after,
                before: None,
            }),
        };
        let mut writer = self.engine.writer.lock().unwrap();
        writer.append_record(&record)?;
        Ok(())
    }

    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.engine
            .locks
            .acquire(self.txn_id, &key.to_vec(), LockMode::S, LOCK_TIMEOUT)?;
        if !self.shared_locks.iter().any(|k| k == key) && !self.exclusive_locks.iter().any(|k| k == key) {
            self.shared_locks.push(key.to_vec());
        }
        Ok(self.engine.tree.lock().unwrap().lookup(key))
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        self.lock_key(&key)?;
        self.engine.tree.lock().unwrap().insert(key.clone(), value.clone())?;
        self.append(encode_put(&key, &value))?;
        self.log.push((key, None));
        Ok(())
    }

    pub fn update(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        self.lock_key(&key)?;
        let prior = self.engine.tree.lock().unwrap().lookup(&key);
        self.engine.tree.lock().unwrap().update(&key, value.clone())?;
        self.append(encode_put(&key, &value))?;
        self.log.push((key, prior));
        Ok(())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        self.lock_key(&key)?;
        let prior = self.engine.tree.lock().unwrap().lookup(&key);
        self.engine.tree.lock().unwrap().put(key.clone(), value.clone());
        self.append(encode_put(&key, &value))?;
        self.log.push((key, prior));
        Ok(())
    }

    pub fn remove(&mut self, key: Vec<u8>) -> Result<(), StorageError> {
        self.lock_key(&key)?;
        let prior = self.engine.tree.lock().unwrap().lookup(&key);
        self.engine.tree.lock().unwrap().remove(&key)?;
        self.append(encode_remove(&key))?;
        self.log.push((key, prior));
        Ok(())
    }

    /// Commit the transaction, honoring the engine's configured
    /// `ElrMode`: under early release the lock(s) this transaction held
    /// are freed as soon as the commit record is queued rather than after
    /// it is durable, and under `Clv` this transaction first blocks until
    /// any lender it depends on is itself durable.
    pub fn commit(mut self) -> Result<Lsn, StorageError> {
        self.wait_for_elr_dependency()?;

        let lsn = self.engine.alloc_lsn();
        let record = LogRecord {
            lsn,
            txn_id: self.txn_id,
            prev_lsn_of_txn: lsn.saturating_sub(1),
            page_id: 0,
            page2_id: None,
            page_prev_lsn: 0,
            page2_prev_lsn: None,
            body: RecordBody::XctEnd,
        };
        {
            let mut writer = self.engine.writer.lock().unwrap();
            writer.append_record(&record)?;

            let mode = self.engine.elr_mode;
            self.release_early(mode);

            writer.sync()?;
        }
        self.engine.commit_gate.advance(lsn);
        self.engine.elr_deps.advance_durable(lsn);
        // Whatever wasn't released early (or ever granted, under `None`)
        // is freed now that the commit record is durable.
        self.release_locks();
        self.engine.elr_deps.clear(self.txn_id);
        self.finished = true;
        Ok(lsn)
    }

    /// Release locks this mode allows releasing ahead of durability.
    fn release_early(&mut self, mode: ElrMode) {
        if mode.releases_shared_early() {
            for key in self.shared_locks.drain(..) {
                self.engine.locks.release(self.txn_id, &key);
            }
        }
        if mode.releases_exclusive_early() {
            for key in self.exclusive_locks.drain(..) {
                self.engine.locks.release(self.txn_id, &key);
            }
        }
    }

    fn wait_for_elr_dependency(&self) -> Result<(), StorageError> {
        if !self.engine.elr_mode.tracks_commit_lsn_dependency() {
            return Ok(());
        }
        let deadline = std::time::Instant::now() + LOCK_TIMEOUT;
        while !self.engine.elr_deps.can_commit(self.txn_id) {
            if std::time::Instant::now() >= deadline {
                return Err(StorageError::LockTimeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Roll back every change this transaction made, newest first, using
    /// its in-memory logical undo journal.
    pub fn abort(mut self) -> Result<(), StorageError> {
        let mut tree = self.engine.tree.lock().unwrap();
        for (key, prior) in self.log.drain(..).rev() {
            match prior {
                Some(value) => tree.put(key, value),
                None => {
                    let _ = tree.remove(&key);
                }
            }
        }
        drop(tree);
        self.release_locks();
        self.finished = true;
        Ok(())
    }

    fn release_locks(&mut self) {
        for key in self.shared_locks.drain(..) {
            self.engine.locks.release(self.txn_id, &key);
        }
        for key in self.exclusive_locks.drain(..) {
            self.engine.locks.release(self.txn_id, &key);
        }
    }
}

impl Drop for Transaction<'_> {
    /// A transaction dropped without an explicit commit/abort releases its
    /// locks so it can't wedge the lock table, but leaves the tree as-is
    /// (callers are expected to call `abort()` for rollback semantics).
    fn drop(&mut self) {
        if !self.finished {
            self.release_locks();
        }
    }
}
