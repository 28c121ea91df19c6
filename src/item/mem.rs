use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Barrier,
    },
    time::Duration,
};

use parking_lot::Mutex;

use super::Closable;

/// An item backed by nothing but an open flag.
///
/// Counts reopen and close calls, can be told to fail its next reopens, and can
/// make reopen slow or hold it at a barrier. Useful for tests and benchmarks.
#[derive(Debug)]
pub struct MemItem {
    open: AtomicBool,
    reopens: AtomicUsize,
    closes: AtomicUsize,
    failures: AtomicUsize,
    reopen_delay: Mutex<Option<Duration>>,
    reopen_gate: Mutex<Option<Arc<Barrier>>>,
}

impl MemItem {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            reopens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            reopen_delay: Mutex::new(None),
            reopen_gate: Mutex::new(None),
        }
    }

    /// Make the next `count` reopen attempts fail.
    pub fn fail_reopens(&self, count: usize) {
        self.failures.store(count, Ordering::Release);
    }

    /// Sleep for `delay` on every reopen, before the item becomes open.
    pub fn set_reopen_delay(&self, delay: Option<Duration>) {
        *self.reopen_delay.lock() = delay;
    }

    /// Wait on `gate` when a reopen starts and again before it returns, so another
    /// thread can act while the reopen is in progress.
    pub fn set_reopen_gate(&self, gate: Option<Arc<Barrier>>) {
        *self.reopen_gate.lock() = gate;
    }

    /// Number of successful reopens.
    pub fn reopens(&self) -> usize {
        self.reopens.load(Ordering::Acquire)
    }

    /// Number of close calls that found the item open.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn finish_reopen(&self) -> io::Result<()> {
        if self.take_failure() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected reopen failure",
            ));
        }

        if !self.open.swap(true, Ordering::AcqRel) {
            self.reopens.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Default for MemItem {
    fn default() -> Self {
        Self::new()
    }
}

impl Closable for MemItem {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.closes.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn reopen(&self) -> io::Result<()> {
        let gate = self.reopen_gate.lock().clone();
        if let Some(gate) = &gate {
            gate.wait();
        }
        let delay = *self.reopen_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let result = self.finish_reopen();
        if let Some(gate) = &gate {
            gate.wait();
        }
        result
    }
}
