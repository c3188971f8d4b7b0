//! Diagnostic counters
//!
//! Failures on the recording path are never logged per packet; they bump a
//! relaxed atomic counter instead. Indices are the `STAT_*` constants.

use flowstamp_common::constants::*;
use log::warn;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters describing what the recording path did with its input
#[derive(Debug, Default)]
pub struct Diagnostics {
    counters: [AtomicU64; MAX_STATS],
    exhaustion_reported: AtomicBool,
}

/// Point-in-time copy of the diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub recorded: u64,
    pub capacity_exhausted: u64,
    pub malformed_payloads: u64,
    pub control_segments: u64,
    pub unparsed_packets: u64,
    pub implicit_inits: u64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter (see STAT_* constants)
    #[inline(always)]
    pub fn increment(&self, stat: usize) {
        if let Some(counter) = self.counters.get(stat) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current value of a counter
    pub fn get(&self, stat: usize) -> u64 {
        self.counters
            .get(stat)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Count a rejected record call, warning on the first one since the
    /// last reset
    pub fn capacity_exhausted(&self, capacity: usize) {
        self.increment(STAT_CAPACITY_EXHAUSTED);
        if !self.exhaustion_reported.swap(true, Ordering::Relaxed) {
            warn!("event log full: capacity of {} records exceeded", capacity);
        }
    }

    /// Re-arm the capacity warning after the log has been cleared
    pub fn log_cleared(&self) {
        self.exhaustion_reported.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            recorded: self.get(STAT_RECORDED),
            capacity_exhausted: self.get(STAT_CAPACITY_EXHAUSTED),
            malformed_payloads: self.get(STAT_MALFORMED_PAYLOADS),
            control_segments: self.get(STAT_CONTROL_SEGMENTS),
            unparsed_packets: self.get(STAT_UNPARSED_PACKETS),
            implicit_inits: self.get(STAT_IMPLICIT_INITS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let diagnostics = Diagnostics::new();
        diagnostics.increment(STAT_MALFORMED_PAYLOADS);
        diagnostics.increment(STAT_MALFORMED_PAYLOADS);
        diagnostics.capacity_exhausted(10);
        diagnostics.capacity_exhausted(10);

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.malformed_payloads, 2);
        assert_eq!(snapshot.capacity_exhausted, 2);
        assert_eq!(snapshot.recorded, 0);
    }

    #[test]
    fn test_out_of_range_stat_is_ignored() {
        let diagnostics = Diagnostics::new();
        diagnostics.increment(MAX_STATS);
        assert_eq!(diagnostics.get(MAX_STATS), 0);
    }
}
