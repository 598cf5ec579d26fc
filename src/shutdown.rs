//! Process-wide shutdown signal shared by every service loop.
//!
//! Interval waits block on a condvar, so `trigger()` wakes them at once
//! instead of letting them sleep out the interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    stopped: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.inner.stopped.load(Ordering::Acquire)
    }

    /// Request shutdown and wake every waiter. Returns false if already stopped.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.stopped.swap(true, Ordering::AcqRel);
        // Taking the lock orders the store before any waiter re-checks.
        let _guard = self.inner.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.inner.cvar.notify_all();
        first
    }

    /// Sleep up to `timeout`, returning early on shutdown.
    /// Returns true while the node is still running.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock().unwrap_or_else(|p| p.into_inner());
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = match self.inner.cvar.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(p) => p.into_inner().0,
            };
        }
        self.is_running()
    }
}
