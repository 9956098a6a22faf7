//! Two-thread archiver pipeline: a reader thread drives the log consumer
//! forward under `ArchiverControl`'s activation protocol and hands records
//! across a bounded channel to a second thread that feeds the run-ordered
//! heap and seals runs through `WriterThread`.
//!
//! Grounded on `LogArchiver::{ReaderThread, WriterThread}` running as
//! independent threads joined only by queues, in
//! `original_source/src/sm/logarchiver.h`; the activation handshake is
//! `control::ArchiverControl` (`mini_aurora_common::DaemonControl`).

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use mini_aurora_common::LogRecord;

use crate::consumer::LogConsumer;
use crate::control::ArchiverControl;
use crate::directory::{ArchiveDirectory, RunInfo};
use crate::heap::ArchiverHeap;
use crate::writer::WriterThread;

enum PipelineMsg {
    Record(LogRecord),
    ActivationDone,
}

/// Channel depth between the reader and heap/writer threads. Bounded so a
/// slow writer thread applies backpressure to the reader instead of an
/// unconsumed activation cycle growing the queue without limit.
const CHANNEL_DEPTH: usize = 1024;

/// Owns the reader and heap/writer threads for one archiver instance.
/// `start` spawns both; `activate` drives one cycle; `next_runs` collects
/// the runs that cycle sealed; `shutdown` joins both threads.
pub struct ArchiverPipeline {
    control: Arc<ArchiverControl>,
    runs: Receiver<Vec<RunInfo>>,
    reader_handle: StdMutex<Option<JoinHandle<()>>>,
    writer_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl ArchiverPipeline {
    pub fn start(
        wal_path: PathBuf,
        directory: ArchiveDirectory,
        run_window: u64,
        block_size: usize,
    ) -> Result<Arc<Self>, std::io::Error> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let control = Arc::new(ArchiverControl::new(shutdown));

        let (record_tx, record_rx) = bounded::<PipelineMsg>(CHANNEL_DEPTH);
        let (runs_tx, runs_rx) = bounded::<Vec<RunInfo>>(CHANNEL_DEPTH);

        let consumer = LogConsumer::open(&wal_path, 0)?;
        let reader_control = control.clone();
        let reader_handle = std::thread::spawn(move || reader_loop(reader_control, consumer, record_tx));

        let writer_control = control.clone();
        let heap = ArchiverHeap::new(run_window);
        let writer = WriterThread::new(directory, block_size);
        let writer_handle =
            std::thread::spawn(move || writer_loop(writer_control, record_rx, heap, writer, runs_tx));

        Ok(Arc::new(Self {
            control,
            runs: runs_rx,
            reader_handle: StdMutex::new(Some(reader_handle)),
            writer_handle: StdMutex::new(Some(writer_handle)),
        }))
    }

    /// Signal both threads to consume and archive every record up to
    /// `end_lsn`, blocking until the activation has been delivered.
    pub fn activate(&self, end_lsn: u64) {
        self.control.activate(end_lsn, true);
    }

    /// Wait for the runs sealed by the next completed activation cycle.
    /// Returns `None` on timeout or once the pipeline has shut down.
    pub fn next_runs(&self, timeout: Duration) -> Option<Vec<RunInfo>> {
        match self.runs.recv_timeout(timeout) {
            Ok(runs) => Some(runs),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Shut both threads down cooperatively and join them.
    pub fn shutdown(&self) {
        self.control.start_shutdown();
        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn reader_loop(control: Arc<ArchiverControl>, mut consumer: LogConsumer, tx: Sender<PipelineMsg>) {
    loop {
        let end_lsn = match control.wait_for_activation() {
            Some(end_lsn) => end_lsn,
            None => return,
        };

        loop {
            match consumer.next() {
                Ok(Some(record)) => {
                    let reached_end = record.lsn >= end_lsn;
                    if tx.send(PipelineMsg::Record(record)).is_err() {
                        return;
                    }
                    if reached_end {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(?err, "archiver reader thread stopped a cycle early");
                    break;
                }
            }
        }

        if tx.send(PipelineMsg::ActivationDone).is_err() {
            return;
        }
    }
}

fn writer_loop(
    _control: Arc<ArchiverControl>,
    rx: Receiver<PipelineMsg>,
    mut heap: ArchiverHeap,
    mut writer: WriterThread,
    runs_tx: Sender<Vec<RunInfo>>,
) {
    while let Ok(msg) = rx.recv() {
        match msg {
            PipelineMsg::Record(record) => heap.push(record),
            PipelineMsg::ActivationDone => match writer.drain(&mut heap) {
                Ok(runs) => {
                    if runs_tx.send(runs).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::error!(?err, "archiver writer thread failed to seal a run");
                }
            },
        }
    }
}
