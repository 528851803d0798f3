//! Manual clock

use crate::clock::{Clock, ShutdownSignal};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct ClockInner {
    base: Instant,
    offset: Duration,
    sleeps: Vec<Duration>,
    trigger: Option<(usize, ShutdownSignal)>,
}

/// Clock whose time only advances through [`ManualClock::advance`] and
/// [`Clock::sleep`]. Sleeps return immediately and are recorded.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ClockInner>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base: Instant::now(),
                offset: Duration::ZERO,
                sleeps: Vec::new(),
                trigger: None,
            })),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.inner.lock().offset += by;
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }

    /// Trigger `signal` once `count` sleeps have been recorded
    pub fn trigger_after_sleeps(&self, count: usize, signal: ShutdownSignal) {
        self.inner.lock().trigger = Some((count, signal));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let inner = self.inner.lock();
        inner.base + inner.offset
    }

    fn sleep(&self, duration: Duration, _shutdown: &ShutdownSignal) {
        let fire = {
            let mut inner = self.inner.lock();
            inner.sleeps.push(duration);
            inner.offset += duration;
            match &inner.trigger {
                Some((count, signal)) if inner.sleeps.len() >= *count => Some(signal.clone()),
                _ => None,
            }
        };
        if let Some(signal) = fire {
            signal.trigger();
        }
    }
}
