//! Time source and cooperative shutdown.
//!
//! All backoff sleeps and fetch timings go through [`Clock`] so the producer
//! loop can be driven by a manual clock in tests.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Process-wide cooperative cancellation flag.
///
/// Cloning shares the flag. Sleepers parked in [`ShutdownSignal::wait_timeout`]
/// wake as soon as [`ShutdownSignal::trigger`] is called.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    flag: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ShutdownSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown and wake every sleeper
    pub fn trigger(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.cond.notify_all();
    }

    /// Park for up to `timeout`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_triggered() {
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_triggered()
    }
}

/// Source of time for the producer loop
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Park the calling thread for `duration`, waking early on shutdown
    fn sleep(&self, duration: Duration, shutdown: &ShutdownSignal);
}

/// Wall clock backed by `Instant` and thread parking
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, shutdown: &ShutdownSignal) {
        shutdown.wait_timeout(duration);
    }
}
