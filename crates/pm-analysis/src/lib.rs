//! # pm-analysis
//!
//! Offline processing of powermeter logs.
//!
//! A raw log holds one `timestamp_ns,value_a,value_b` line per tick. The
//! stages below turn it into physical quantities:
//!
//! - [`power`]: calibrate both inputs to current (mA) and voltage (mV), derive
//!   power (µW) and the time offset from the first sample.
//! - [`median`]: sliding window median over a calibrated log.
//! - [`energy`]: trapezoidal integration of power over a time range.
//!
//! Every stage streams its input; memory use is bounded by the median
//! window.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod calibration;
pub mod energy;
pub mod median;
pub mod power;

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;

pub use calibration::{Calibration, LinearCalibration};
pub use energy::EnergyIntegrator;
pub use median::MedianFilter;
pub use power::PowerConverter;

/// Columns in a calibrated log line.
pub const POWER_COLUMNS: usize = 7;

/// Errors raised while processing a log.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Malformed CSV or an I/O failure underneath it.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A line has fewer columns than the stage needs.
    #[error(
        "line {line}: expected {expected} columns, found {found} (run `pm-analyze power` first?)"
    )]
    MissingColumns {
        /// 1-based input line.
        line: u64,
        /// Columns the stage needs.
        expected: usize,
        /// Columns present.
        found: usize,
    },

    /// A column could not be parsed.
    #[error("line {line}, column {column}: invalid value {value:?}")]
    InvalidField {
        /// 1-based input line.
        line: u64,
        /// 0-based column.
        column: usize,
        /// Offending text.
        value: String,
    },

    /// The median window must hold at least one sample.
    #[error("window size must be at least 1")]
    InvalidWindow,

    /// The integration range is empty.
    #[error("start {start} is after end {end}")]
    InvalidRange {
        /// Range start in nanoseconds.
        start: u64,
        /// Range end in nanoseconds.
        end: u64,
    },
}

/// Result alias for analysis operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// One line of the acquisition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    /// Monotonic timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Reading of the first input.
    pub value_a: u16,
    /// Reading of the second input.
    pub value_b: u16,
}

/// One line of a calibrated log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Monotonic timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Raw reading of the first input.
    pub value_a: u16,
    /// Raw reading of the second input.
    pub value_b: u16,
    /// Current in mA.
    pub current: f64,
    /// Voltage in mV.
    pub voltage: f64,
    /// Power in µW.
    pub power: f64,
    /// Nanoseconds since the first sample of the log.
    pub offset_ns: u64,
}

/// Headerless, comma-separated reader tolerant of varying line lengths.
pub fn csv_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input)
}

/// Headerless, comma-separated writer.
pub fn csv_writer<W: std::io::Write>(output: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(output)
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, csv::Position::line)
}

fn require_columns(record: &csv::StringRecord, expected: usize) -> AnalysisResult<()> {
    if record.len() < expected {
        return Err(AnalysisError::MissingColumns {
            line: line_of(record),
            expected,
            found: record.len(),
        });
    }
    Ok(())
}

fn field<T: FromStr>(record: &csv::StringRecord, column: usize) -> AnalysisResult<T> {
    let text = record.get(column).unwrap_or_default();
    text.parse().map_err(|_| AnalysisError::InvalidField {
        line: line_of(record),
        column,
        value: text.to_string(),
    })
}

impl RawSample {
    /// Parse the first three columns of a log line.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::MissingColumns`] or
    /// [`AnalysisError::InvalidField`] for malformed lines.
    pub fn from_record(record: &csv::StringRecord) -> AnalysisResult<Self> {
        require_columns(record, 3)?;
        Ok(Self {
            timestamp_ns: field(record, 0)?,
            value_a: field(record, 1)?,
            value_b: field(record, 2)?,
        })
    }
}

impl PowerSample {
    /// Parse a calibrated log line.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::MissingColumns`] when the line has not been
    /// through the power stage, or [`AnalysisError::InvalidField`].
    pub fn from_record(record: &csv::StringRecord) -> AnalysisResult<Self> {
        require_columns(record, POWER_COLUMNS)?;
        Ok(Self {
            timestamp_ns: field(record, 0)?,
            value_a: field(record, 1)?,
            value_b: field(record, 2)?,
            current: field(record, 3)?,
            voltage: field(record, 4)?,
            power: field(record, 5)?,
            offset_ns: field(record, 6)?,
        })
    }
}

/// Iterate over the calibrated samples of a reader.
pub fn power_samples<R: Read>(input: R) -> impl Iterator<Item = AnalysisResult<PowerSample>> {
    csv_reader(input)
        .into_records()
        .map(|record| PowerSample::from_record(&record?))
}
