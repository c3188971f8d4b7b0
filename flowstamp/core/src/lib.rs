//! Flowstamp core
//!
//! A low-overhead event log for timestamping packets at fixed probe points.
//! The recording path never allocates, locks or blocks: storage is sized up
//! front, slot assignment is a single atomic step and timestamp overhead is
//! estimated once at startup and subtracted from every event.
//!
//! ## Architecture
//!
//! ```text
//! pipeline -> Tracer::notify*  -> scanner (marker search, coalescing)
//!                              |
//!                              v
//!             Tracer::record   -> Clock + Calibrator -> EventLog
//!                                                         |
//!                                                         v
//!                              readout (text lines, reset)
//! ```

pub mod calibration;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event_log;
pub mod packet;
pub mod readout;
pub mod scanner;
pub mod tracer;

pub use calibration::{trimmed_mean, Calibrator};
pub use clock::{Clock, StepClock, SystemClock};
pub use config::{CalibrationConfig, TraceConfig};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::{PacketError, ReadoutError, ScanError, TraceError};
pub use event_log::EventLog;
pub use packet::{Segment, Transport};
pub use readout::{parse_line, Readout, TextLine};
pub use scanner::{scan, FlowTag};
pub use tracer::Tracer;

pub use flowstamp_common::{EventRecord, ProbePoint, Timeval};
