//! Capture replay
//!
//! Replays each capture on its own blocking task so several producer
//! contexts write into the shared tracer at once, the way independent
//! packet-processing contexts would.

use crate::loader::Capture;
use anyhow::{Context, Result};
use flowstamp_core::{Clock, Tracer};
use log::{debug, info};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::interval};

/// Outcome of replaying one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub capture: String,
    pub frames: usize,
    pub events: usize,
}

/// Replays captures into a shared tracer
pub struct ReplayProcessor<C: Clock + 'static> {
    tracer: Arc<Tracer<C>>,
}

impl<C: Clock + 'static> ReplayProcessor<C> {
    /// Create a new replay processor
    ///
    /// # Arguments
    ///
    /// * `tracer` - Shared tracer every capture is replayed into
    pub fn new(tracer: Arc<Tracer<C>>) -> Self {
        Self { tracer }
    }

    /// Replay all captures concurrently
    ///
    /// Spawns one blocking task per capture and waits for all of them.
    /// Outcomes are returned in the order the captures were given.
    pub async fn replay_all(&self, captures: Vec<Capture>) -> Result<Vec<ReplayOutcome>> {
        info!("Replaying {} captures", captures.len());

        let handles: Vec<_> = captures
            .into_iter()
            .map(|capture| {
                let tracer = Arc::clone(&self.tracer);
                tokio::task::spawn_blocking(move || {
                    let events = capture.frames.iter().map(|frame| frame.replay(&tracer)).sum();
                    let outcome = ReplayOutcome {
                        capture: capture.path.display().to_string(),
                        frames: capture.frames.len(),
                        events,
                    };
                    debug!(
                        "Replayed {}: {} frames -> {} events",
                        outcome.capture, outcome.frames, outcome.events
                    );
                    outcome
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.context("Replay task failed")?);
        }

        Ok(outcomes)
    }

    /// Spawn progress reporter
    ///
    /// Creates a task that periodically reports how full the log is. The
    /// caller aborts the returned handle once replay is done.
    ///
    /// # Arguments
    ///
    /// * `interval_secs` - Reporting interval in seconds
    pub fn spawn_progress_reporter(&self, interval_secs: u64) -> JoinHandle<()> {
        let tracer = Arc::clone(&self.tracer);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let diagnostics = tracer.diagnostics().snapshot();
                info!(
                    "Progress: {} / {} records, {} rejected, {} malformed payloads",
                    tracer.record_count(),
                    tracer.config().capacity,
                    diagnostics.capacity_exhausted,
                    diagnostics.malformed_payloads
                );
            }
        })
    }
}
