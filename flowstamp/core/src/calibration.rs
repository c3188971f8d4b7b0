//! Timestamp overhead calibration
//!
//! The first `sample_count` record calls each measure how long it takes to
//! read the clock twice in a row. Once every sample is in, the samples are
//! sorted, `trim_percent` of them are dropped from each tail and the rest
//! are averaged. The result is frozen for the life of the calibrator and
//! subtracted from every recorded timestamp.
//!
//! Storing a sample takes no lock: a reservation counter hands out sample
//! slots, and a fill counter tells exactly one caller that the last sample
//! has landed. That caller copies the samples into a preallocated scratch
//! buffer behind a `Mutex` (only ever locked by the completing caller, so
//! never contended), computes the estimate and publishes it behind
//! `complete`.

use crate::config::CalibrationConfig;
use flowstamp_common::Timeval;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// One-shot estimator of clock-read overhead
#[derive(Debug)]
pub struct Calibrator {
    config: CalibrationConfig,
    samples: Box<[AtomicI64]>,
    /// Next sample slot to hand out
    reserved: AtomicUsize,
    /// Number of samples stored so far
    filled: AtomicUsize,
    /// Sort buffer, only touched by the caller that completes calibration
    scratch: Mutex<Box<[i64]>>,
    estimate: AtomicI64,
    complete: AtomicBool,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        let samples = (0..config.sample_count).map(|_| AtomicI64::new(0)).collect();
        let scratch = vec![0i64; config.sample_count].into_boxed_slice();

        Self {
            config,
            samples,
            reserved: AtomicUsize::new(0),
            filled: AtomicUsize::new(0),
            scratch: Mutex::new(scratch),
            estimate: AtomicI64::new(0),
            complete: AtomicBool::new(config.sample_count == 0),
        }
    }

    pub fn config(&self) -> CalibrationConfig {
        self.config
    }

    /// Whether the estimate is final
    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Current overhead estimate in microseconds (0 until complete)
    #[inline(always)]
    pub fn estimate(&self) -> i64 {
        if self.is_complete() {
            self.estimate.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Number of samples stored so far
    pub fn samples_taken(&self) -> usize {
        self.filled.load(Ordering::Acquire).min(self.config.sample_count)
    }

    /// Feed the measurement window of one clock-read pair
    pub fn sample(&self, start: Timeval, end: Timeval) -> Option<i64> {
        self.observe(end.micros_since(&start))
    }

    /// Feed one overhead delta in microseconds
    ///
    /// Returns the final estimate on the call that completes calibration
    /// and `None` otherwise. Calls after the sample list is full are
    /// ignored.
    pub fn observe(&self, delta_micros: i64) -> Option<i64> {
        let n = self.config.sample_count;
        if self.is_complete() {
            return None;
        }

        let slot = self.reserved.fetch_add(1, Ordering::Relaxed);
        let sample = self.samples.get(slot)?;
        sample.store(delta_micros, Ordering::Relaxed);

        // AcqRel: the completing caller must see every other stored sample
        if self.filled.fetch_add(1, Ordering::AcqRel) + 1 != n {
            return None;
        }

        Some(self.finish())
    }

    fn finish(&self) -> i64 {
        let mut scratch = match self.scratch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (dst, src) in scratch.iter_mut().zip(self.samples.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }

        let mean = trimmed_mean(&mut scratch, self.config.trim_percent);
        debug!("calibration samples (sorted): {:?}", &scratch[..]);
        info!(
            "calibration finished: {} samples, {}% trimmed mean overhead {} usec",
            scratch.len(),
            self.config.trim_percent,
            mean
        );

        self.estimate.store(mean, Ordering::Relaxed);
        self.complete.store(true, Ordering::Release);
        mean
    }
}

/// Sort `samples` and average them after dropping `trim_percent` percent
/// from each tail
///
/// The kept range is `[n * trim / 100, n * (100 - trim) / 100)`. Returns 0
/// when nothing is left to average.
pub fn trimmed_mean(samples: &mut [i64], trim_percent: u8) -> i64 {
    samples.sort_unstable();

    let n = samples.len();
    let trim = usize::from(trim_percent.min(100));
    let lo = n * trim / 100;
    let hi = n * (100 - trim) / 100;

    match samples.get(lo..hi) {
        Some(kept) if !kept.is_empty() => kept.iter().sum::<i64>() / kept.len() as i64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sample_count: usize, trim_percent: u8) -> CalibrationConfig {
        CalibrationConfig {
            sample_count,
            trim_percent,
        }
    }

    #[test]
    fn test_trimmed_mean_drops_tails() {
        // 1..=100 shuffled: dropping 5 from each end leaves 6..=95
        let mut samples: Vec<i64> = (1..=100).rev().collect();
        assert_eq!(trimmed_mean(&mut samples, 5), (6..=95).sum::<i64>() / 90);
        assert_eq!(samples[0], 1);
    }

    #[test]
    fn test_trimmed_mean_ignores_outliers() {
        let mut samples = vec![2i64; 100];
        samples[0] = 10_000;
        samples[1] = -10_000;
        assert_eq!(trimmed_mean(&mut samples, 5), 2);
    }

    #[test]
    fn test_trimmed_mean_empty() {
        assert_eq!(trimmed_mean(&mut [], 5), 0);
        assert_eq!(trimmed_mean(&mut [7], 0), 7);
        // a single sample is trimmed away entirely at 49%
        assert_eq!(trimmed_mean(&mut [7], 49), 0);
    }

    #[test]
    fn test_estimate_zero_until_complete() {
        let calibrator = Calibrator::new(config(4, 0));
        assert_eq!(calibrator.observe(3), None);
        assert_eq!(calibrator.observe(3), None);
        assert_eq!(calibrator.observe(3), None);
        assert!(!calibrator.is_complete());
        assert_eq!(calibrator.estimate(), 0);

        assert_eq!(calibrator.observe(7), Some(4));
        assert!(calibrator.is_complete());
        assert_eq!(calibrator.estimate(), 4);
    }

    #[test]
    fn test_estimate_frozen_after_completion() {
        let calibrator = Calibrator::new(config(2, 0));
        calibrator.observe(1);
        calibrator.observe(1);
        assert_eq!(calibrator.observe(1_000), None);
        assert_eq!(calibrator.estimate(), 1);
        assert_eq!(calibrator.samples_taken(), 2);
    }

    #[test]
    fn test_disabled_calibration() {
        let calibrator = Calibrator::new(CalibrationConfig::disabled());
        assert!(calibrator.is_complete());
        assert_eq!(calibrator.observe(5), None);
        assert_eq!(calibrator.estimate(), 0);
    }

    #[test]
    fn test_sample_window_crosses_second() {
        let calibrator = Calibrator::new(config(1, 0));
        let start = Timeval { secs: 4, micros: 999_999 };
        let end = Timeval { secs: 5, micros: 1 };
        assert_eq!(calibrator.sample(start, end), Some(2));
    }

    #[test]
    fn test_concurrent_sampling_completes_once() {
        let calibrator = Calibrator::new(config(100, 5));

        let completions: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| (0..50).filter(|_| calibrator.observe(3).is_some()).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(completions, 1);
        assert_eq!(calibrator.estimate(), 3);
    }
}
