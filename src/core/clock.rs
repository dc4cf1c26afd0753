//! Wall Clock
//!
//! Millisecond timestamps for the `t1`/`t2`/`tSend` envelope fields.
//! Only the network layer reads the wall clock; the simulation runs on ticks.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of millisecond timestamps.
pub trait Clock {
    /// Milliseconds since an arbitrary per-clock origin.
    fn now_ms(&self) -> f64;
}

/// Monotonic clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Clock whose origin is the moment of creation.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock, shared by cloning.
///
/// Both peers of an in-process test hold clones of the same clock so
/// that simulated wire delay is exact.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    /// Clock starting at `start_ms`.
    pub fn new(start_ms: f64) -> Self {
        Self { now: Rc::new(Cell::new(start_ms)) }
    }

    /// Move time forward.
    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: f64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}
