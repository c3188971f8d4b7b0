//! Export type definitions
//!
//! Serializable views of a tracer's log, calibration state and diagnostic
//! counters. The core types stay plain `repr(C)` structs; everything that
//! needs serde lives here.

use chrono::{DateTime, SecondsFormat, Utc};
use flowstamp_core::{Clock, DiagnosticsSnapshot, EventRecord, ProbePoint, Timeval, Tracer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full export of one replay or read-out
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExportReport {
    /// RFC 3339 timestamp when the report was generated
    pub generated_at: String,
    /// Log capacity in records
    pub capacity: usize,
    /// Number of records in the log
    pub record_count: usize,
    /// Overhead estimator state
    pub calibration: CalibrationReport,
    /// Diagnostic counters
    pub diagnostics: DiagnosticsReport,
    /// Records per probe point name
    pub probe_breakdown: BTreeMap<String, u64>,
    /// Every record in slot order
    pub records: Vec<ExportedRecord>,
}

impl ExportReport {
    /// Snapshot a tracer's log and counters
    pub fn from_tracer<C: Clock>(tracer: &Tracer<C>) -> Self {
        let records: Vec<ExportedRecord> = tracer.records().map(ExportedRecord::from).collect();

        let mut probe_breakdown = BTreeMap::new();
        for record in &records {
            *probe_breakdown.entry(record.probe.clone()).or_insert(0) += 1;
        }

        let calibrator = tracer.calibrator();
        let config = calibrator.config();

        Self {
            generated_at: Utc::now().to_rfc3339(),
            capacity: tracer.config().capacity,
            record_count: tracer.record_count(),
            calibration: CalibrationReport {
                sample_count: config.sample_count,
                trim_percent: config.trim_percent,
                samples_taken: calibrator.samples_taken(),
                complete: calibrator.is_complete(),
                overhead_micros: calibrator.estimate(),
            },
            diagnostics: tracer.diagnostics().snapshot().into(),
            probe_breakdown,
            records,
        }
    }
}

/// Calibration state at export time
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationReport {
    pub sample_count: usize,
    pub trim_percent: u8,
    pub samples_taken: usize,
    pub complete: bool,
    /// Trimmed-mean overhead subtracted from every timestamp
    pub overhead_micros: i64,
}

/// Diagnostic counters at export time
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsReport {
    pub recorded: u64,
    pub capacity_exhausted: u64,
    pub malformed_payloads: u64,
    pub control_segments: u64,
    pub unparsed_packets: u64,
    pub implicit_inits: u64,
}

impl From<DiagnosticsSnapshot> for DiagnosticsReport {
    fn from(snapshot: DiagnosticsSnapshot) -> Self {
        Self {
            recorded: snapshot.recorded,
            capacity_exhausted: snapshot.capacity_exhausted,
            malformed_payloads: snapshot.malformed_payloads,
            control_segments: snapshot.control_segments,
            unparsed_packets: snapshot.unparsed_packets,
            implicit_inits: snapshot.implicit_inits,
        }
    }
}

/// One exported event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExportedRecord {
    pub slot_index: u64,
    pub probe_id: u16,
    /// Probe point name, or "unknown" for ids outside the enumeration
    pub probe: String,
    pub sequence: u32,
    pub worker_id: u32,
    pub seconds: i64,
    pub microseconds: u32,
    /// RFC 3339 rendering of the timestamp with microsecond precision
    pub time: Option<String>,
    pub repeat_count: u32,
}

impl From<EventRecord> for ExportedRecord {
    fn from(record: EventRecord) -> Self {
        Self {
            slot_index: record.slot_index,
            probe_id: record.probe_id,
            probe: record.probe().map_or("unknown", ProbePoint::name).to_string(),
            sequence: record.sequence,
            worker_id: record.worker_id,
            seconds: record.timestamp.secs,
            microseconds: record.timestamp.micros,
            time: timestamp_to_rfc3339(record.timestamp),
            repeat_count: record.repeat_count,
        }
    }
}

impl ExportedRecord {
    /// Rebuild the core record, e.g. for the fixed text rendering
    pub fn to_event_record(&self) -> EventRecord {
        EventRecord {
            slot_index: self.slot_index,
            probe_id: self.probe_id,
            timestamp: Timeval {
                secs: self.seconds,
                micros: self.microseconds,
            },
            sequence: self.sequence,
            worker_id: self.worker_id,
            repeat_count: self.repeat_count,
        }
    }
}

/// Convert a timeval to an RFC 3339 string
///
/// Returns `None` for times chrono cannot represent.
pub fn timestamp_to_rfc3339(timestamp: Timeval) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp.secs, timestamp.micros * 1_000)
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Micros, true))
}
