//! Clock sources
//!
//! The recording path reads the clock once per event (twice while
//! calibrating), so implementations must be cheap and must not block.

use flowstamp_common::Timeval;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock readings with microsecond resolution
pub trait Clock: Send + Sync {
    /// Read the current time
    fn now(&self) -> Timeval;
}

/// Wall clock backed by [`SystemTime`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Timeval {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Timeval {
                secs: elapsed.as_secs() as i64,
                micros: elapsed.subsec_micros(),
            },
            // Clock set before the epoch
            Err(err) => Timeval::from_micros(-(err.duration().as_micros() as i64)),
        }
    }
}

/// Deterministic clock that advances a fixed step on every read
///
/// Used for reproducible replays and tests, where the overhead estimate
/// and every timestamp must be known in advance.
#[derive(Debug)]
pub struct StepClock {
    next_micros: AtomicI64,
    step_micros: i64,
}

impl StepClock {
    /// Create a clock whose first reading is `start` and which advances
    /// `step_micros` per read
    pub fn new(start: Timeval, step_micros: i64) -> Self {
        Self {
            next_micros: AtomicI64::new(start.as_micros()),
            step_micros,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> Timeval {
        let micros = self.next_micros.fetch_add(self.step_micros, Ordering::Relaxed);
        Timeval::from_micros(micros)
    }
}
