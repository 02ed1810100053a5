//! Sliding window median over a calibrated log.
//!
//! Once the window is full, every new sample first emits the medians of the
//! current window and then slides it by one. The last full window is never
//! emitted, so `n` samples through a window of `w` yield `n - w` lines.

use crate::{csv_writer, power_samples, AnalysisError, AnalysisResult, PowerSample};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{Read, Write};
use tracing::debug;

/// Medians of one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MedianSample {
    /// Median offset time in nanoseconds.
    pub offset_ns: f64,
    /// Median current in mA.
    pub current: f64,
    /// Median voltage in mV.
    pub voltage: f64,
    /// Product of the two medians, in µW.
    pub power: f64,
}

/// Streaming median filter.
#[derive(Debug, Clone)]
pub struct MedianFilter {
    window: usize,
    offsets: VecDeque<f64>,
    currents: VecDeque<f64>,
    voltages: VecDeque<f64>,
}

impl MedianFilter {
    /// Create a filter over `window` samples.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidWindow`] for a zero window.
    pub fn new(window: usize) -> AnalysisResult<Self> {
        if window == 0 {
            return Err(AnalysisError::InvalidWindow);
        }
        Ok(Self {
            window,
            offsets: VecDeque::with_capacity(window),
            currents: VecDeque::with_capacity(window),
            voltages: VecDeque::with_capacity(window),
        })
    }

    /// Feed one sample, returning the medians of the window it displaced.
    pub fn push(&mut self, sample: &PowerSample) -> Option<MedianSample> {
        let emitted = (self.offsets.len() >= self.window).then(|| {
            let current = median(&self.currents);
            let voltage = median(&self.voltages);
            let out = MedianSample {
                offset_ns: median(&self.offsets),
                current,
                voltage,
                power: current * voltage,
            };
            self.offsets.pop_front();
            self.currents.pop_front();
            self.voltages.pop_front();
            out
        });

        // Exact for any realistic log duration (< 2^53 ns)
        #[allow(clippy::cast_precision_loss)]
        let offset = sample.offset_ns as f64;
        self.offsets.push_back(offset);
        self.currents.push_back(sample.current);
        self.voltages.push_back(sample.voltage);

        emitted
    }
}

/// Median of a non-empty window; the mean of the two middle values for an
/// even count.
fn median(values: &VecDeque<f64>) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Filter a calibrated log from `input` into `output`.
///
/// Returns the number of lines written.
///
/// # Errors
///
/// Returns [`AnalysisError::InvalidWindow`] for a zero window, or an error
/// on the first malformed line or I/O failure.
pub fn median_filter<R: Read, W: Write>(input: R, output: W, window: usize) -> AnalysisResult<u64> {
    let mut filter = MedianFilter::new(window)?;
    let mut writer = csv_writer(output);
    let mut lines = 0;

    for sample in power_samples(input) {
        if let Some(out) = filter.push(&sample?) {
            writer.serialize(out)?;
            lines += 1;
        }
    }

    writer.flush().map_err(csv::Error::from)?;
    debug!(lines, window, "Median stage finished");
    Ok(lines)
}
