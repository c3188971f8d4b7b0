//! Record exporters
//!
//! Provides different exporters for the event log (text lines, JSON,
//! Prometheus counters)

use crate::types::ExportReport;
use anyhow::{Context, Result};
use flowstamp_core::TextLine;
use std::{
    fmt::Write as _,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Trait for record exporters
pub trait RecordExporter {
    /// Export a report
    ///
    /// # Arguments
    ///
    /// * `report` - Snapshot of the log to export
    ///
    /// # Returns
    ///
    /// Result indicating success or failure
    fn export(&self, report: &ExportReport) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// One fixed-layout text line per record
    Text,
    /// JSON document with records, calibration and diagnostics
    Json,
    /// Prometheus exposition of the diagnostic counters
    Prometheus,
}

impl ExporterType {
    /// Parse a format name as given on the command line
    pub fn parse(format: &str) -> Result<Self> {
        match format.to_lowercase().as_str() {
            "text" | "txt" => Ok(ExporterType::Text),
            "json" => Ok(ExporterType::Json),
            "prometheus" | "prom" => Ok(ExporterType::Prometheus),
            _ => anyhow::bail!("Unsupported format: {}. Use text, json, or prometheus", format),
        }
    }

    /// Build the exporter for this format writing to `output_path`
    pub fn exporter(self, output_path: PathBuf) -> Box<dyn RecordExporter> {
        match self {
            ExporterType::Text => Box::new(TextExporter::new(output_path)),
            ExporterType::Json => Box::new(JsonExporter::new(output_path, true)),
            ExporterType::Prometheus => Box::new(PrometheusExporter::new(output_path)),
        }
    }
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;
    Ok(BufWriter::new(file))
}

/// Text exporter
///
/// Writes the same line layout the in-process read-out produces.
pub struct TextExporter {
    output_path: PathBuf,
}

impl TextExporter {
    /// Create a new text exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    fn write_lines<W: Write>(report: &ExportReport, mut out: W) -> std::io::Result<()> {
        for record in &report.records {
            writeln!(out, "{}", TextLine(&record.to_event_record()))?;
        }
        out.flush()
    }
}

impl RecordExporter for TextExporter {
    fn export(&self, report: &ExportReport) -> Result<()> {
        let out = create_output(&self.output_path)?;
        Self::write_lines(report, out)
            .with_context(|| format!("Failed to write to output file: {:?}", self.output_path))
    }
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl RecordExporter for JsonExporter {
    fn export(&self, report: &ExportReport) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };

        let mut out = create_output(&self.output_path)?;
        out.write_all(json.as_bytes())
            .and_then(|()| out.flush())
            .with_context(|| format!("Failed to write to output file: {:?}", self.output_path))?;

        Ok(())
    }
}

/// Prometheus exporter
pub struct PrometheusExporter {
    output_path: PathBuf,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Convert a report to Prometheus format
    fn to_prometheus_format(report: &ExportReport) -> String {
        let mut output = String::new();
        let diagnostics = &report.diagnostics;

        let counters = [
            ("recorded", "Events written to the log", diagnostics.recorded),
            ("capacity_exhausted", "Record calls rejected by a full log", diagnostics.capacity_exhausted),
            ("malformed_payloads", "Payloads dropped without a flow marker", diagnostics.malformed_payloads),
            ("control_segments", "TCP control segments skipped", diagnostics.control_segments),
            ("unparsed_packets", "Packets with unparsable headers", diagnostics.unparsed_packets),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP flowstamp_{}_total {}", name, help);
            let _ = writeln!(output, "# TYPE flowstamp_{}_total counter", name);
            let _ = writeln!(output, "flowstamp_{}_total {}", name, value);
            output.push('\n');
        }

        // Log fill level
        output.push_str("# HELP flowstamp_log_records Records currently held by the log\n");
        output.push_str("# TYPE flowstamp_log_records gauge\n");
        let _ = writeln!(output, "flowstamp_log_records {}", report.record_count);
        let _ = writeln!(output, "flowstamp_log_capacity {}", report.capacity);
        output.push('\n');

        // Calibration
        output.push_str("# HELP flowstamp_calibration_overhead_microseconds Trimmed-mean clock read overhead\n");
        output.push_str("# TYPE flowstamp_calibration_overhead_microseconds gauge\n");
        let _ = writeln!(
            output,
            "flowstamp_calibration_overhead_microseconds{{trim_percent=\"{}\"}} {}",
            report.calibration.trim_percent, report.calibration.overhead_micros
        );
        output.push('\n');

        // Records per probe
        output.push_str("# HELP flowstamp_records_by_probe Records broken down by probe point\n");
        output.push_str("# TYPE flowstamp_records_by_probe gauge\n");
        for (probe, count) in &report.probe_breakdown {
            let _ = writeln!(output, "flowstamp_records_by_probe{{probe=\"{}\"}} {}", probe, count);
        }

        output
    }
}

impl RecordExporter for PrometheusExporter {
    fn export(&self, report: &ExportReport) -> Result<()> {
        let prometheus_data = Self::to_prometheus_format(report);

        let mut out = create_output(&self.output_path)?;
        out.write_all(prometheus_data.as_bytes())
            .and_then(|()| out.flush())
            .with_context(|| format!("Failed to write to output file: {:?}", self.output_path))?;

        Ok(())
    }
}
