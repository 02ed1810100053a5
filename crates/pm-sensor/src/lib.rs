//! Sensor layer for the acquisition pipeline.
//!
//! This crate provides:
//! - [`Sensor`] trait, the single call the sampling loop makes per channel
//! - [`mcp320x`] module with the MCP3204/3208 command encoding and decoding
//! - [`spi`] module with the [`SpiBus`] abstraction and the Linux spidev backend
//! - [`SimulatedSensor`] for tests and dry runs without hardware

pub mod mcp320x;
pub mod spi;

pub use mcp320x::*;
pub use spi::*;

use pm_common::config::MAX_CHANNEL_SELECTOR;
use pm_common::error::PmError;
use pm_common::record::Reading;
use std::fmt;

/// Sensor-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// Device node could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Device node path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Bus parameters could not be applied.
    #[error("failed to configure bus: {0}")]
    Configure(String),

    /// A bus transaction failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The platform has no driver for this bus.
    #[error("bus not supported on this platform")]
    Unsupported,

    /// Failure injected by the simulated sensor.
    #[error("simulated failure on read {0}")]
    Injected(u64),
}

/// Convenience type alias for sensor operations.
pub type SensorResult<T> = Result<T, SensorError>;

impl From<SensorError> for PmError {
    fn from(err: SensorError) -> Self {
        PmError::Bus(err.to_string())
    }
}

/// Converter input selector, 0 to 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Wrap a selector, rejecting anything above 7.
    #[must_use]
    pub const fn new(selector: u8) -> Option<Self> {
        if selector <= MAX_CHANNEL_SELECTOR {
            Some(Self(selector))
        } else {
            None
        }
    }

    /// Raw selector value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = PmError;

    fn try_from(selector: u8) -> Result<Self, Self::Error> {
        Self::new(selector).ok_or_else(|| {
            PmError::Config(format!(
                "ADC channel must be in range 0 to {MAX_CHANNEL_SELECTOR}, got {selector}"
            ))
        })
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Converter input mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Input measured against ground.
    #[default]
    SingleEnded,
    /// Input measured against its paired input (CH0/CH1, CH2/CH3, ...).
    Differential,
}

/// Analog sensor abstraction.
///
/// A read is a single synchronous bus transaction taking small, bounded
/// time. It is called from the sampling thread only.
pub trait Sensor: Send {
    /// Read one 12-bit value from the given input.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus transaction fails. The caller skips the
    /// tick; the error never stops sampling.
    fn read_channel(&mut self, channel: ChannelId) -> SensorResult<Reading>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn read_channel(&mut self, channel: ChannelId) -> SensorResult<Reading> {
        (**self).read_channel(channel)
    }
}

/// Simulated sensor for testing.
///
/// Each input produces a deterministic sawtooth, see
/// [`SimulatedSensor::waveform`]. Individual reads can be scripted to fail
/// and a hook can run on every read (for example to advance a simulated
/// clock by the read latency).
#[cfg(feature = "simulated")]
pub struct SimulatedSensor {
    /// Read attempts so far, across all channels.
    reads: u64,
    /// Read attempts so far, per channel.
    channel_reads: [u64; 8],
    /// Read indices (0-based, across all channels) that fail.
    failing_reads: std::collections::BTreeSet<u64>,
    /// Called with the read index before each read completes.
    on_read: Option<Box<dyn FnMut(u64) + Send>>,
}

#[cfg(feature = "simulated")]
impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "simulated")]
impl fmt::Debug for SimulatedSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedSensor")
            .field("reads", &self.reads)
            .field("failing_reads", &self.failing_reads)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "simulated")]
impl SimulatedSensor {
    /// Create a simulated sensor that never fails.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reads: 0,
            channel_reads: [0; 8],
            failing_reads: std::collections::BTreeSet::new(),
            on_read: None,
        }
    }

    /// Make the given read indices fail.
    ///
    /// Reads are counted across channels, so with two channels per tick the
    /// reads of tick `k` are `2k` and `2k + 1`.
    #[must_use]
    pub fn failing_reads(mut self, reads: impl IntoIterator<Item = u64>) -> Self {
        self.failing_reads.extend(reads);
        self
    }

    /// Run `hook` with the read index on every read.
    #[must_use]
    pub fn on_read(mut self, hook: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_read = Some(Box::new(hook));
        self
    }

    /// Total read attempts so far.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Value produced by the `n`-th read (0-based) of `channel`.
    #[must_use]
    pub fn waveform(channel: ChannelId, n: u64) -> Reading {
        #[allow(clippy::cast_possible_truncation)]
        let value = ((u64::from(channel.get()) * 512 + n * 37) % 4096) as u16;
        Reading::from_masked(value)
    }
}

#[cfg(feature = "simulated")]
impl Sensor for SimulatedSensor {
    fn read_channel(&mut self, channel: ChannelId) -> SensorResult<Reading> {
        let index = self.reads;
        self.reads += 1;

        let slot = usize::from(channel.get());
        let n = self.channel_reads[slot];
        self.channel_reads[slot] += 1;

        if let Some(hook) = self.on_read.as_mut() {
            hook(index);
        }

        if self.failing_reads.contains(&index) {
            tracing::trace!(index, %channel, "Injecting simulated read failure");
            return Err(SensorError::Injected(index));
        }

        Ok(Self::waveform(channel, n))
    }
}
