//! Flowstamp - probe-point event log driver
//!
//! Replays captured probe notifications through the event log, exports the
//! resulting records, and measures the timestamp overhead of this host.
//!
//! ## Usage
//!
//! ```bash
//! # Write a synthetic capture with 4 workers
//! ./flowstamp synth --output capture.bin --workers 4 --packets 1000
//!
//! # Replay captures concurrently and write the text read-out
//! ./flowstamp replay capture.bin other.bin --output flowstamp.log
//!
//! # Export as JSON with a deterministic clock
//! ./flowstamp replay capture.bin --format json --output records.json --clock-step 3
//!
//! # Measure clock read overhead
//! ./flowstamp calibrate --samples 1000 --trim-percent 5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowstamp_common::constants::{CALIBRATION_SAMPLES, LOG_CAPACITY, TRIM_PERCENT};
use flowstamp_core::{
    CalibrationConfig, Clock, ProbePoint, StepClock, Timeval, TraceConfig, Tracer,
};
use flowstamp_daemon::{
    events::ReplayProcessor,
    exporter::ExporterType,
    loader::{synth_frames, Capture, SynthOptions},
    types::ExportReport,
};
use log::{info, warn};
use std::{path::PathBuf, sync::Arc};

/// Low-overhead probe-point event log
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Verbose logging
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay capture files into one shared event log and export it
    Replay(ReplayArgs),
    /// Measure the clock read overhead with the system clock
    Calibrate(CalibrateArgs),
    /// Write a synthetic capture file
    Synth(SynthArgs),
}

#[derive(clap::Args, Debug)]
struct ReplayArgs {
    /// Capture files, each replayed by its own producer
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file for the exported records
    #[clap(short, long, default_value = "flowstamp.log")]
    output: PathBuf,

    /// Output format (text, json, prometheus)
    #[clap(short, long, default_value = "text")]
    format: String,

    /// Maximum number of records held by the log
    #[clap(short, long, default_value_t = LOG_CAPACITY)]
    capacity: usize,

    /// Record calls sampled for overhead calibration (0 disables it)
    #[clap(long, default_value_t = CALIBRATION_SAMPLES)]
    calibration_samples: usize,

    /// Percentage trimmed from each tail of the calibration samples
    #[clap(long, default_value_t = TRIM_PERCENT)]
    trim_percent: u8,

    /// Use a synthetic clock advancing this many microseconds per read
    #[clap(long)]
    clock_step: Option<i64>,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,
}

#[derive(clap::Args, Debug)]
struct CalibrateArgs {
    /// Number of record calls to sample
    #[clap(short, long, default_value_t = CALIBRATION_SAMPLES)]
    samples: usize,

    /// Percentage trimmed from each tail of the samples
    #[clap(short, long, default_value_t = TRIM_PERCENT)]
    trim_percent: u8,
}

#[derive(clap::Args, Debug)]
struct SynthArgs {
    /// Output capture file
    #[clap(short, long, default_value = "capture.bin")]
    output: PathBuf,

    /// Probe point name or numeric id
    #[clap(short, long, default_value = "sock_send", value_parser = parse_probe)]
    probe: ProbePoint,

    /// Number of distinct worker ids
    #[clap(short, long, default_value_t = 4)]
    workers: u32,

    /// Packets written per worker
    #[clap(short = 'n', long, default_value_t = 100)]
    packets: u32,

    /// Flow records carried by each packet
    #[clap(short, long, default_value_t = 1)]
    records_per_packet: u32,

    /// Copies of each record, coalesced into one event when scanned
    #[clap(long, default_value_t = 1)]
    repeat: u32,

    /// Wrap payloads in IPv4/UDP headers
    #[clap(long)]
    udp: bool,
}

fn parse_probe(value: &str) -> Result<ProbePoint, String> {
    if let Ok(raw) = value.parse::<u16>() {
        return ProbePoint::from_raw(raw).ok_or_else(|| format!("unknown probe id {}", raw));
    }
    ProbePoint::ALL
        .into_iter()
        .find(|probe| probe.name() == value)
        .ok_or_else(|| format!("unknown probe point {}", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    print_banner();

    match args.command {
        Command::Replay(args) => replay(args).await,
        Command::Calibrate(args) => calibrate(args),
        Command::Synth(args) => synth(args).await,
    }
}

async fn replay(args: ReplayArgs) -> Result<()> {
    let config = TraceConfig {
        capacity: args.capacity,
        calibration: CalibrationConfig {
            sample_count: args.calibration_samples,
            trim_percent: args.trim_percent,
        },
    };

    match args.clock_step {
        Some(step) => {
            let clock = StepClock::new(Timeval::new(0, 0), step);
            run_replay(&args, Tracer::with_clock(config, clock)?).await
        }
        None => run_replay(&args, Tracer::new(config)?).await,
    }
}

async fn run_replay<C: Clock + 'static>(args: &ReplayArgs, tracer: Tracer<C>) -> Result<()> {
    let export_format = ExporterType::parse(&args.format)?;

    info!("Starting replay...");
    info!("   Inputs: {}", args.inputs.len());
    info!("   Output: {:?}", args.output);
    info!("   Format: {}", args.format);
    info!("   Capacity: {} records", args.capacity);

    let mut captures = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        captures.push(Capture::load(input).await?);
    }

    tracer.initialize();
    let tracer = Arc::new(tracer);
    let processor = ReplayProcessor::new(Arc::clone(&tracer));

    let reporter = processor.spawn_progress_reporter(args.progress_interval);
    let outcomes = processor.replay_all(captures).await;
    reporter.abort();

    for outcome in outcomes? {
        info!(
            "   {}: {} frames -> {} events",
            outcome.capture, outcome.frames, outcome.events
        );
    }

    let report = ExportReport::from_tracer(&tracer);
    export_format
        .exporter(args.output.clone())
        .export(&report)?;

    info!("Records written to {:?}", args.output);

    print_summary(&report);

    Ok(())
}

fn calibrate(args: CalibrateArgs) -> Result<()> {
    let config = TraceConfig {
        capacity: args.samples.max(1),
        calibration: CalibrationConfig {
            sample_count: args.samples,
            trim_percent: args.trim_percent,
        },
    };
    let tracer = Tracer::new(config)?;
    if args.samples == 0 {
        warn!("Calibration disabled, no overhead estimate");
        return Ok(());
    }

    info!("Calibrating over {} record calls...", args.samples);
    for sequence in 0..args.samples {
        tracer.notify_raw(ProbePoint::SocketSend, sequence as u32, 0, 1);
    }

    let calibrator = tracer.calibrator();

    info!(
        "Timestamp overhead: {} us ({}% trimmed from each tail of {} samples)",
        calibrator.estimate(),
        args.trim_percent,
        calibrator.samples_taken()
    );
    Ok(())
}

async fn synth(args: SynthArgs) -> Result<()> {
    let frames = synth_frames(&SynthOptions {
        probe: args.probe,
        workers: args.workers,
        packets: args.packets,
        records_per_packet: args.records_per_packet,
        repeat: args.repeat,
        udp: args.udp,
    })
    .context("Invalid synthetic capture size")?;

    Capture::save(&args.output, &frames)
        .await
        .with_context(|| format!("Failed to write synthetic capture to {:?}", args.output))?;

    info!(
        "Wrote {} frames ({} workers x {} packets) to {:?}",
        frames.len(),
        args.workers,
        args.packets,
        args.output
    );
    Ok(())
}

fn print_banner() {
    println!(
        r#"
╔═══════════════════════════════════════════════════╗
║        Flowstamp - Probe-Point Event Log          ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_summary(report: &ExportReport) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Records:            {}", report.record_count);
    info!("  Capacity:           {}", report.capacity);
    info!("");
    info!("  Calibration:");
    info!(
        "    samples:          {} / {}",
        report.calibration.samples_taken, report.calibration.sample_count
    );
    info!("    overhead (us):    {}", report.calibration.overhead_micros);
    info!("");
    info!("  Diagnostics:");
    info!("    rejected (full):  {:>8}", report.diagnostics.capacity_exhausted);
    info!("    malformed:        {:>8}", report.diagnostics.malformed_payloads);
    info!("    control segments: {:>8}", report.diagnostics.control_segments);
    info!("    unparsed packets: {:>8}", report.diagnostics.unparsed_packets);
    info!("");
    info!("  Probe Breakdown:");
    for (probe, count) in &report.probe_breakdown {
        info!("    {:<18}{:>8}", probe, count);
    }
    info!("");
    info!("============================================");
}
