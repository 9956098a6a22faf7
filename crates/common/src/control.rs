//! Generic background-daemon activation protocol.
//!
//! Every long-running worker in this engine (log flusher, archiver reader
//! and writer threads, merge daemon, restart worker, restore scheduler,
//! backup prefetcher) follows the same "activation cycle" shape: the worker
//! parks on a condition variable until an orchestrating thread activates it,
//! optionally carrying a target LSN that the worker treats as its end point
//! for this cycle. Shutdown is cooperative: the current unit of work always
//! finishes; only the *next* cycle is skipped.
//!
//! This mirrors `ArchiverControl` as documented in the original log archiver
//! design: a mutex + condvar pair gated by an `activated` flag and a shared
//! `shutdown` flag, with the worker loop:
//! `lock -> while !activated && !shutdown: wait -> take work -> unlock -> do work -> loop`.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::Lsn;

struct State {
    activated: bool,
    end_lsn: Lsn,
}

/// Shared control block between an orchestrator and one background worker.
pub struct DaemonControl {
    state: Mutex<State>,
    cond: Condvar,
    shutdown: Arc<AtomicBool>,
}

impl DaemonControl {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            state: Mutex::new(State {
                activated: false,
                end_lsn: 0,
            }),
            cond: Condvar::new(),
            shutdown,
        }
    }

    /// Wake the worker, optionally raising its end-LSN watermark. Returns
    /// `false` immediately (without blocking) if the worker is already
    /// running and `wait` is false; otherwise blocks until the signal has
    /// been delivered.
    pub fn activate(&self, end_lsn: Lsn, wait: bool) -> bool {
        let mut guard = if wait {
            self.state.lock()
        } else {
            match self.state.try_lock() {
                Some(g) => g,
                None => return false,
            }
        };
        if end_lsn > guard.end_lsn {
            guard.end_lsn = end_lsn;
        }
        guard.activated = true;
        self.cond.notify_one();
        true
    }

    /// Called by the worker thread. Blocks until activated or shutdown.
    /// Returns `Some(end_lsn)` on activation, `None` if shutting down.
    pub fn wait_for_activation(&self) -> Option<Lsn> {
        let mut guard = self.state.lock();
        while !guard.activated && !self.shutdown.load(Ordering::Acquire) {
            self.cond.wait(&mut guard);
        }
        if self.shutdown.load(Ordering::Acquire) && !guard.activated {
            return None;
        }
        guard.activated = false;
        Some(guard.end_lsn)
    }

    /// Non-blocking poll with a timeout, used by daemons that also need to
    /// perform periodic background work (e.g. single-pass restore) even
    /// without an explicit activation.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Lsn> {
        let mut guard = self.state.lock();
        if !guard.activated && !self.shutdown.load(Ordering::Acquire) {
            let result = self.cond.wait_for(&mut guard, timeout);
            if result.timed_out() {
                return None;
            }
        }
        if self.shutdown.load(Ordering::Acquire) && !guard.activated {
            return None;
        }
        guard.activated = false;
        Some(guard.end_lsn)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Request shutdown and wake the worker so it observes the flag.
    pub fn start_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _guard = self.state.lock();
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn activate_wakes_waiter() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let control = Arc::new(DaemonControl::new(shutdown));

        let worker_control = control.clone();
        let handle = thread::spawn(move || worker_control.wait_for_activation());

        thread::sleep(Duration::from_millis(20));
        control.activate(42, true);

        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn shutdown_unblocks_waiter() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let control = Arc::new(DaemonControl::new(shutdown));

        let worker_control = control.clone();
        let handle = thread::spawn(move || worker_control.wait_for_activation());

        thread::sleep(Duration::from_millis(20));
        control.start_shutdown();

        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn end_lsn_only_increases() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let control = DaemonControl::new(shutdown);
        control.activate(10, true);
        control.activate(5, true);
        assert_eq!(control.wait_for_activation(), Some(10));
    }
}
