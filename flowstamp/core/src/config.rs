//! Startup configuration for the event log
//!
//! Defaults come from the shared constants; nothing here can change once a
//! tracer has been built.

use crate::error::TraceError;
use flowstamp_common::constants::{CALIBRATION_SAMPLES, LOG_CAPACITY, TRIM_PERCENT};

/// Parameters of the timestamp overhead estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationConfig {
    /// Number of record calls sampled before the estimate freezes
    /// (0 disables calibration)
    pub sample_count: usize,
    /// Percentage trimmed from each tail of the sorted samples
    pub trim_percent: u8,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sample_count: CALIBRATION_SAMPLES,
            trim_percent: TRIM_PERCENT,
        }
    }
}

impl CalibrationConfig {
    /// Calibration that never samples; the overhead estimate stays 0
    pub const fn disabled() -> Self {
        Self {
            sample_count: 0,
            trim_percent: 0,
        }
    }

    /// Check the trim percentage leaves samples to average
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.trim_percent >= 50 {
            return Err(TraceError::InvalidConfig(format!(
                "trim percentage must be below 50, got {}",
                self.trim_percent
            )));
        }
        Ok(())
    }
}

/// Tracer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceConfig {
    /// Maximum number of records held by the log
    pub capacity: usize,
    /// Overhead estimator parameters
    pub calibration: CalibrationConfig,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            capacity: LOG_CAPACITY,
            calibration: CalibrationConfig::default(),
        }
    }
}

impl TraceConfig {
    /// Default configuration with a different log capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Validate every parameter
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.capacity == 0 {
            return Err(TraceError::InvalidConfig(
                "log capacity must be at least 1".to_string(),
            ));
        }
        self.calibration.validate()
    }
}
