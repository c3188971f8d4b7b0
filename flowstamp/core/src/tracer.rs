//! Tracer context
//!
//! A [`Tracer`] owns everything the recording path touches: the clock, the
//! overhead calibrator, the log storage and the diagnostic counters. It is
//! built once at startup and shared by reference (or `Arc`) with every
//! probe point; recording only needs `&self`.
//!
//! Entry points for the pipeline:
//!
//! - [`Tracer::notify`] scans a payload for flow records
//! - [`Tracer::notify_packet`] / [`Tracer::notify_transport`] narrow a
//!   packet or segment to its payload first
//! - [`Tracer::notify_raw`] records values the probe already knows
//!
//! None of them return an error: anything that goes wrong means the event
//! is not captured, and the matching diagnostic counter is bumped.

use crate::calibration::Calibrator;
use crate::clock::{Clock, SystemClock};
use crate::config::TraceConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{PacketError, TraceError};
use crate::event_log::EventLog;
use crate::packet::{Segment, Transport};
use crate::readout::Readout;
use crate::scanner;
use flowstamp_common::constants::*;
use flowstamp_common::{EventRecord, ProbePoint};
use log::{info, warn};
use std::sync::OnceLock;

/// Probe-point event recorder
#[derive(Debug)]
pub struct Tracer<C: Clock = SystemClock> {
    config: TraceConfig,
    clock: C,
    calibrator: Calibrator,
    log: OnceLock<EventLog>,
    diagnostics: Diagnostics,
}

impl Tracer<SystemClock> {
    /// Build a tracer on the system clock and allocate its storage
    pub fn new(config: TraceConfig) -> Result<Self, TraceError> {
        Self::with_clock(config, SystemClock)
    }

    /// Build a tracer on the system clock without allocating storage
    pub fn deferred(config: TraceConfig) -> Result<Self, TraceError> {
        Self::deferred_with_clock(config, SystemClock)
    }
}

impl<C: Clock> Tracer<C> {
    /// Build a tracer on `clock` and allocate its storage
    pub fn with_clock(config: TraceConfig, clock: C) -> Result<Self, TraceError> {
        let tracer = Self::deferred_with_clock(config, clock)?;
        tracer.initialize();
        Ok(tracer)
    }

    /// Build a tracer on `clock`; storage is allocated by
    /// [`Tracer::initialize`], or by the first record as a fallback
    pub fn deferred_with_clock(config: TraceConfig, clock: C) -> Result<Self, TraceError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            calibrator: Calibrator::new(config.calibration),
            log: OnceLock::new(),
            diagnostics: Diagnostics::new(),
        })
    }

    /// Allocate log storage if it is not allocated yet
    ///
    /// Idempotent; returns whether this call did the allocation.
    pub fn initialize(&self) -> bool {
        let mut allocated = false;
        let log = self.log.get_or_init(|| {
            allocated = true;
            EventLog::with_capacity(self.config.capacity)
        });
        if allocated {
            info!(
                "flowstamp: {} bytes allocated for {} records",
                log.allocated_bytes(),
                log.capacity()
            );
        }
        allocated
    }

    /// Storage for the recording path, allocating it if startup skipped
    /// [`Tracer::initialize`]
    #[inline]
    fn storage(&self) -> &EventLog {
        if let Some(log) = self.log.get() {
            return log;
        }
        if self.initialize() {
            warn!("flowstamp: implicit storage initialization, initialize() should run at startup");
            self.diagnostics.increment(STAT_IMPLICIT_INITS);
        }
        // initialize() has populated the cell one way or another
        self.log.get_or_init(|| EventLog::with_capacity(self.config.capacity))
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Whether storage has been allocated
    pub fn is_initialized(&self) -> bool {
        self.log.get().is_some()
    }

    /// Append one event and return its slot index
    ///
    /// The timestamp is corrected by the overhead estimate in effect when
    /// the call began. While calibration is running the clock is read once
    /// more just before the event timestamp and that window is sampled.
    pub fn record(
        &self,
        probe: ProbePoint,
        sequence: u32,
        worker_id: u32,
        repeat_count: u32,
    ) -> Result<u64, TraceError> {
        let log = self.storage();
        let slot_index = match log.reserve() {
            Ok(slot) => slot,
            Err(err) => {
                self.diagnostics.capacity_exhausted(log.capacity());
                return Err(err);
            }
        };

        let overhead = self.calibrator.estimate();
        let window_start = (!self.calibrator.is_complete()).then(|| self.clock.now());
        let now = self.clock.now();
        if let Some(start) = window_start {
            self.calibrator.sample(start, now);
        }

        log.commit(&EventRecord {
            slot_index,
            probe_id: probe.as_raw(),
            timestamp: now.saturating_sub_micros(overhead),
            sequence,
            worker_id,
            repeat_count,
        });
        self.diagnostics.increment(STAT_RECORDED);

        Ok(slot_index)
    }

    /// Record an event whose flow values are already known
    #[inline]
    pub fn notify_raw(&self, probe: ProbePoint, sequence: u32, worker_id: u32, repeat_count: u32) {
        let _ = self.record(probe, sequence, worker_id, repeat_count);
    }

    /// Scan a payload and record one event per run of flow records
    ///
    /// Returns the number of events recorded. A payload without a marker is
    /// dropped and counted as malformed.
    pub fn notify(&self, probe: ProbePoint, payload: &[u8]) -> usize {
        let runs = match scanner::scan(payload) {
            Ok(runs) => runs,
            Err(_) => {
                self.diagnostics.increment(STAT_MALFORMED_PAYLOADS);
                return 0;
            }
        };

        let mut recorded = 0;
        for (tag, count) in runs {
            if self.record(probe, tag.sequence, tag.worker_id, count).is_ok() {
                recorded += 1;
            }
        }
        recorded
    }

    /// Narrow an IPv4 packet to its transport payload, then scan it
    pub fn notify_packet(&self, probe: ProbePoint, packet: &[u8]) -> usize {
        let segment = Segment::from_ipv4(packet);
        self.notify_segment(probe, segment)
    }

    /// Narrow a TCP or UDP segment to its payload, then scan it
    pub fn notify_transport(&self, probe: ProbePoint, transport: Transport, segment: &[u8]) -> usize {
        let segment = Segment::from_transport(transport, segment);
        self.notify_segment(probe, segment)
    }

    fn notify_segment(&self, probe: ProbePoint, segment: Result<Segment<'_>, PacketError>) -> usize {
        match segment {
            Ok(segment) => self.notify(probe, segment.payload),
            Err(PacketError::ControlSegment { .. }) => {
                self.diagnostics.increment(STAT_CONTROL_SEGMENTS);
                0
            }
            Err(_) => {
                self.diagnostics.increment(STAT_UNPARSED_PACKETS);
                0
            }
        }
    }

    /// Number of records in the log
    pub fn record_count(&self) -> usize {
        self.log.get().map_or(0, EventLog::len)
    }

    /// Read the record at `index`
    pub fn get_record(&self, index: usize) -> Result<EventRecord, TraceError> {
        match self.log.get() {
            Some(log) => log.get(index),
            None => Err(TraceError::NotFound { index, count: 0 }),
        }
    }

    /// Committed records in slot order
    pub fn records(&self) -> impl Iterator<Item = EventRecord> + '_ {
        self.log.get().into_iter().flat_map(EventLog::iter)
    }

    /// Zero the log and set the record count back to zero
    ///
    /// Calibration is not repeated.
    pub fn reset(&mut self) {
        if let Some(log) = self.log.get_mut() {
            log.reset();
        }
        self.diagnostics.log_cleared();
    }

    /// Start an exclusive read-out session
    pub fn readout(&mut self) -> Readout<'_, C> {
        Readout::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StepClock;
    use crate::config::CalibrationConfig;
    use crate::packet::tests::{ipv4_packet, tcp_segment};
    use crate::scanner::tests::tagged_payload;
    use flowstamp_common::Timeval;

    fn config(capacity: usize, sample_count: usize) -> TraceConfig {
        TraceConfig {
            capacity,
            calibration: CalibrationConfig {
                sample_count,
                trim_percent: 0,
            },
        }
    }

    fn step_tracer(capacity: usize, sample_count: usize) -> Tracer<StepClock> {
        let clock = StepClock::new(Timeval { secs: 100, micros: 0 }, 3);
        Tracer::with_clock(config(capacity, sample_count), clock).unwrap()
    }

    #[test]
    fn test_record_assigns_sequential_slots() {
        let tracer = step_tracer(8, 0);
        for expected in 0..5u64 {
            assert_eq!(tracer.record(ProbePoint::NetSend, 1, 1, 1), Ok(expected));
        }
        assert_eq!(tracer.record_count(), 5);
        assert_eq!(tracer.diagnostics().snapshot().recorded, 5);
    }

    #[test]
    fn test_calibration_subtracts_overhead() {
        // Every clock read advances 3us, so each calibration window is 3us
        let tracer = step_tracer(16, 2);

        tracer.record(ProbePoint::TcpToIp, 1, 1, 1).unwrap(); // reads 100.000000, 100.000003
        tracer.record(ProbePoint::TcpToIp, 2, 1, 1).unwrap(); // reads 100.000006, 100.000009
        assert_eq!(tracer.calibrator().estimate(), 3);

        tracer.record(ProbePoint::TcpToIp, 3, 1, 1).unwrap(); // reads 100.000012

        let stamps: Vec<Timeval> = tracer.records().map(|r| r.timestamp).collect();
        assert_eq!(
            stamps,
            vec![
                Timeval { secs: 100, micros: 3 },
                // Completing call still used the estimate from when it began
                Timeval { secs: 100, micros: 9 },
                Timeval { secs: 100, micros: 9 },
            ]
        );
    }

    #[test]
    fn test_overhead_borrows_across_second() {
        let clock = StepClock::new(Timeval { secs: 5, micros: 999_985 }, 10);
        let tracer = Tracer::with_clock(config(4, 1), clock).unwrap();
        tracer.record(ProbePoint::NetSend, 0, 0, 1).unwrap(); // reads 5.999985, 5.999995
        tracer.record(ProbePoint::NetSend, 0, 0, 1).unwrap(); // reads 6.000005, minus 10us

        let second = tracer.get_record(1).unwrap();
        assert_eq!(second.timestamp, Timeval { secs: 5, micros: 999_995 });
    }

    #[test]
    fn test_calibration_window_spans_second() {
        let clock = StepClock::new(Timeval { secs: 5, micros: 999_996 }, 7);
        let tracer = Tracer::with_clock(config(4, 1), clock).unwrap();
        tracer.record(ProbePoint::NetSend, 0, 0, 1).unwrap(); // reads 5.999996, 6.000003
        assert_eq!(tracer.calibrator().estimate(), 7);
    }

    #[test]
    fn test_capacity_exhausted() {
        let tracer = step_tracer(2, 0);
        tracer.notify_raw(ProbePoint::NetSend, 1, 1, 1);
        tracer.notify_raw(ProbePoint::NetSend, 2, 1, 1);
        assert_eq!(
            tracer.record(ProbePoint::NetSend, 3, 1, 1),
            Err(TraceError::CapacityExhausted { capacity: 2 })
        );
        tracer.notify_raw(ProbePoint::NetSend, 4, 1, 1);

        assert_eq!(tracer.record_count(), 2);
        assert_eq!(tracer.diagnostics().snapshot().capacity_exhausted, 2);
    }

    #[test]
    fn test_reset_restarts_slots() {
        let mut tracer = step_tracer(2, 0);
        tracer.notify_raw(ProbePoint::NetSend, 1, 1, 1);
        tracer.notify_raw(ProbePoint::NetSend, 2, 1, 1);
        tracer.reset();

        assert_eq!(tracer.record_count(), 0);
        assert!(tracer.get_record(0).is_err());
        assert_eq!(tracer.record(ProbePoint::NetSend, 3, 1, 1), Ok(0));
    }

    #[test]
    fn test_deferred_storage_initialized_on_first_record() {
        let clock = StepClock::new(Timeval::default(), 1);
        let tracer = Tracer::deferred_with_clock(config(4, 0), clock).unwrap();
        assert!(!tracer.is_initialized());
        assert_eq!(tracer.record_count(), 0);
        assert!(tracer.get_record(0).is_err());

        assert_eq!(tracer.record(ProbePoint::SocketSend, 1, 1, 1), Ok(0));
        assert!(tracer.is_initialized());
        assert_eq!(tracer.record(ProbePoint::SocketSend, 1, 1, 1), Ok(1));
        assert_eq!(tracer.diagnostics().snapshot().implicit_inits, 1);
    }

    #[test]
    fn test_explicit_initialize_is_idempotent() {
        let tracer = Tracer::deferred_with_clock(config(4, 0), StepClock::new(Timeval::default(), 1)).unwrap();
        assert!(tracer.initialize());
        assert!(!tracer.initialize());
        tracer.record(ProbePoint::SocketSend, 1, 1, 1).unwrap();
        assert_eq!(tracer.diagnostics().snapshot().implicit_inits, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Tracer::new(TraceConfig::with_capacity(0)).is_err());
    }

    #[test]
    fn test_notify_records_runs() {
        let tracer = step_tracer(16, 0);
        let payload = tagged_payload(&[0u8; 4], 8, &[(5, 1), (5, 1), (5, 1), (6, 1), (6, 1)]);

        assert_eq!(tracer.notify(ProbePoint::IpToTcp, &payload), 2);

        let events: Vec<(u16, u32, u32, u32)> = tracer
            .records()
            .map(|r| (r.probe_id, r.sequence, r.worker_id, r.repeat_count))
            .collect();
        assert_eq!(events, vec![(8, 5, 1, 3), (8, 6, 1, 2)]);
    }

    #[test]
    fn test_notify_counts_malformed_payloads() {
        let tracer = step_tracer(16, 0);
        assert_eq!(tracer.notify(ProbePoint::IpToTcp, &[0u8; 40]), 0);
        assert_eq!(tracer.record_count(), 0);
        assert_eq!(tracer.diagnostics().snapshot().malformed_payloads, 1);
    }

    #[test]
    fn test_notify_packet_filters_control_segments() {
        let tracer = step_tracer(16, 0);
        let payload = tagged_payload(&[], 8, &[(1, 2)]);

        let syn = ipv4_packet(IPPROTO_TCP, &tcp_segment(TCP_FLAG_SYN, &payload));
        assert_eq!(tracer.notify_packet(ProbePoint::NetReceive, &syn), 0);

        let data = ipv4_packet(IPPROTO_TCP, &tcp_segment(TCP_FLAG_ACK, &payload));
        assert_eq!(tracer.notify_packet(ProbePoint::NetReceive, &data), 1);

        assert_eq!(tracer.notify_packet(ProbePoint::NetReceive, &[0x45]), 0);

        let snapshot = tracer.diagnostics().snapshot();
        assert_eq!(snapshot.control_segments, 1);
        assert_eq!(snapshot.unparsed_packets, 1);
        assert_eq!(tracer.get_record(0).unwrap().worker_id, 2);
    }

    #[test]
    fn test_notify_transport_udp() {
        let tracer = step_tracer(16, 0);
        let mut datagram = vec![0u8; 8];
        datagram.extend(tagged_payload(&[], 8, &[(3, 9), (4, 9)]));

        assert_eq!(tracer.notify_transport(ProbePoint::IpToUdp, Transport::Udp, &datagram), 2);
    }

    #[test]
    fn test_readout_writes_and_clears() {
        let mut tracer = step_tracer(16, 0);
        tracer.notify_raw(ProbePoint::SocketReceive, 11, 2, 1);
        tracer.notify_raw(ProbePoint::SocketReceive, 12, 2, 4);

        let readout = tracer.readout();
        let mut out = Vec::new();
        assert_eq!(readout.write_text(&mut out).unwrap(), 2);
        readout.finish();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("1    id 10 seq 12"));
        assert!(lines[1].ends_with("x4"));
        assert_eq!(tracer.record_count(), 0);
    }
}
