//! Pooled debounce timers
//!
//! Watch fan-out can be high, and every coalesced watch arms a fresh timer
//! per incoming event; the pool recycles timer allocations instead. All
//! timers in one pool share the same fixed interval.

use parking_lot::Mutex;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep_until, Instant, Sleep};

/// A reusable single-shot timer handed out by [`TimerPool::acquire`].
pub type PooledTimer = Pin<Box<Sleep>>;

/// Free list of reusable timers, all armed for the same interval.
pub struct TimerPool {
    interval: Duration,
    idle: Mutex<Vec<PooledTimer>>,
    max_idle: usize,
}

impl TimerPool {
    /// Create a pool whose timers fire `interval` after acquisition,
    /// retaining at most `max_idle` released timers.
    pub fn new(interval: Duration, max_idle: usize) -> Self {
        Self {
            interval,
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// The fixed interval timers in this pool are armed for
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A timer armed to fire `interval` from now
    pub fn acquire(&self) -> PooledTimer {
        let deadline = Instant::now() + self.interval;
        match self.idle.lock().pop() {
            Some(mut timer) => {
                timer.as_mut().reset(deadline);
                timer
            }
            None => Box::pin(sleep_until(deadline)),
        }
    }

    /// Return a timer for reuse; dropped once the pool is full
    pub fn release(&self, timer: PooledTimer) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(timer);
        }
    }

    #[cfg(test)]
    fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}
