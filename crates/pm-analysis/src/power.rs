//! Calibration stage: raw log to current, voltage, and power.

use crate::calibration::Calibration;
use crate::{csv_reader, csv_writer, AnalysisResult, PowerSample, RawSample};
use std::io::{Read, Write};
use tracing::debug;

/// Converts raw samples, tracking the first timestamp of the log.
#[derive(Debug, Clone)]
pub struct PowerConverter {
    calibration: Calibration,
    first_timestamp: Option<u64>,
}

impl PowerConverter {
    /// Create a converter for a new log.
    #[must_use]
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration,
            first_timestamp: None,
        }
    }

    /// Calibrate one sample.
    ///
    /// The offset of the first sample is zero. Timestamps earlier than the
    /// first one clamp to zero.
    pub fn convert(&mut self, raw: RawSample) -> PowerSample {
        let first = *self.first_timestamp.get_or_insert(raw.timestamp_ns);
        let current = self.calibration.current.apply(raw.value_a);
        let voltage = self.calibration.voltage.apply(raw.value_b);

        PowerSample {
            timestamp_ns: raw.timestamp_ns,
            value_a: raw.value_a,
            value_b: raw.value_b,
            current,
            voltage,
            power: current * voltage,
            offset_ns: raw.timestamp_ns.saturating_sub(first),
        }
    }
}

/// Calibrate a raw log from `input` into `output`.
///
/// Returns the number of lines written.
///
/// # Errors
///
/// Returns an error on the first malformed line or I/O failure.
pub fn add_power<R: Read, W: Write>(
    input: R,
    output: W,
    calibration: Calibration,
) -> AnalysisResult<u64> {
    let mut converter = PowerConverter::new(calibration);
    let mut writer = csv_writer(output);
    let mut lines = 0;

    for record in csv_reader(input).into_records() {
        let raw = RawSample::from_record(&record?)?;
        writer.serialize(converter.convert(raw))?;
        lines += 1;
    }

    writer.flush().map_err(csv::Error::from)?;
    debug!(lines, "Power stage finished");
    Ok(lines)
}
