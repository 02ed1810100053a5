//! Persistent record output.
//!
//! The logging thread is the only writer. Sinks buffer internally and are
//! flushed periodically and once more at shutdown.

use pm_common::config::{SinkConfig, SinkFormat};
use pm_common::error::{PmError, PmResult};
use pm_common::record::Record;
use static_assertions::const_assert_eq;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem::size_of;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Size of one record in the binary format.
pub const BINARY_RECORD_LEN: usize = 12;

const_assert_eq!(BINARY_RECORD_LEN, size_of::<u64>() + 2 * size_of::<u16>());

/// Destination for acquired records.
pub trait Sink: Send {
    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Sink`] if the record could not be written. The
    /// caller counts the failure and carries on with the next record.
    fn write(&mut self, record: &Record) -> PmResult<()>;

    /// Push buffered records to the underlying storage.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Sink`] if the flush fails.
    fn flush(&mut self) -> PmResult<()>;
}

impl<K: Sink + ?Sized> Sink for Box<K> {
    fn write(&mut self, record: &Record) -> PmResult<()> {
        (**self).write(record)
    }

    fn flush(&mut self) -> PmResult<()> {
        (**self).flush()
    }
}

fn sink_error(err: &std::io::Error) -> PmError {
    PmError::Sink(err.to_string())
}

fn csv_error(err: &csv::Error) -> PmError {
    PmError::Sink(err.to_string())
}

/// One `timestamp,value1,value2` line per record, no header.
#[derive(Debug)]
pub struct CsvSink<W: Write> {
    out: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            out: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(writer),
        }
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Sink`] if the final flush fails.
    pub fn into_inner(self) -> PmResult<W> {
        self.out
            .into_inner()
            .map_err(|e| sink_error(e.error()))
    }
}

impl<W: Write + Send> Sink for CsvSink<W> {
    fn write(&mut self, record: &Record) -> PmResult<()> {
        self.out
            .serialize((record.timestamp_ns(), record.value1(), record.value2()))
            .map_err(|e| csv_error(&e))
    }

    fn flush(&mut self) -> PmResult<()> {
        self.out.flush().map_err(|e| sink_error(&e))
    }
}

/// Encode a record as `u64 timestamp | u16 value1 | u16 value2`, little-endian.
#[must_use]
pub fn encode_binary(record: &Record) -> [u8; BINARY_RECORD_LEN] {
    let mut buf = [0u8; BINARY_RECORD_LEN];
    buf[..8].copy_from_slice(&record.timestamp_ns().to_le_bytes());
    buf[8..10].copy_from_slice(&record.value1().to_le_bytes());
    buf[10..].copy_from_slice(&record.value2().to_le_bytes());
    buf
}

/// Fixed-size little-endian records.
#[derive(Debug)]
pub struct BinarySink<W: Write> {
    out: BufWriter<W>,
}

impl<W: Write> BinarySink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            out: BufWriter::new(writer),
        }
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Sink`] if the final flush fails.
    pub fn into_inner(self) -> PmResult<W> {
        self.out
            .into_inner()
            .map_err(|e| sink_error(e.error()))
    }
}

impl<W: Write + Send> Sink for BinarySink<W> {
    fn write(&mut self, record: &Record) -> PmResult<()> {
        self.out
            .write_all(&encode_binary(record))
            .map_err(|e| sink_error(&e))
    }

    fn flush(&mut self) -> PmResult<()> {
        self.out.flush().map_err(|e| sink_error(&e))
    }
}

/// Create (or truncate) the configured output file.
///
/// # Errors
///
/// Returns [`PmError::Sink`] if the file cannot be created.
pub fn open_sink(config: &SinkConfig) -> PmResult<Box<dyn Sink>> {
    let file = File::create(&config.path).map_err(|e| {
        PmError::Sink(format!("cannot create {}: {e}", config.path.display()))
    })?;

    info!(path = %config.path.display(), format = ?config.format, "Output sink opened");

    Ok(match config.format {
        SinkFormat::Csv => Box::new(CsvSink::new(file)),
        SinkFormat::Binary => Box::new(BinarySink::new(file)),
    })
}

/// Sink collecting records in memory, shared with a handle kept by the test.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
    flushes: Arc<Mutex<u64>>,
    /// Write indices (0-based) that fail.
    failing_writes: BTreeSet<u64>,
    attempts: u64,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given write attempts fail.
    #[must_use]
    pub fn failing_writes(mut self, writes: impl IntoIterator<Item = u64>) -> Self {
        self.failing_writes.extend(writes);
        self
    }

    /// Records written so far, across all clones.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Flushes so far, across all clones.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        *self.flushes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for MemorySink {
    fn write(&mut self, record: &Record) -> PmResult<()> {
        let attempt = self.attempts;
        self.attempts += 1;
        if self.failing_writes.contains(&attempt) {
            return Err(PmError::Sink(format!("simulated write failure {attempt}")));
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*record);
        Ok(())
    }

    fn flush(&mut self) -> PmResult<()> {
        *self.flushes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
