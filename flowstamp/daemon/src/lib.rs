//! Flowstamp daemon library
//!
//! Provides reusable components for replaying probe captures through a
//! tracer and exporting the resulting event log.

pub mod events;
pub mod exporter;
pub mod loader;
pub mod types;

pub use events::ReplayProcessor;
pub use exporter::{ExporterType, JsonExporter, PrometheusExporter, RecordExporter, TextExporter};
pub use loader::{synth_frames, tagged_payload, udp_packet, Capture, Frame, FrameBody, SynthOptions};
pub use types::*;
