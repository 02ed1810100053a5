//! Sample records passed from the sampling thread to the logging thread.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::fmt;

/// Largest value a 12-bit converter can report.
pub const READING_MAX: u16 = 0x0FFF;

// Records are copied through the channel by value; keep them within two words.
const_assert!(std::mem::size_of::<Record>() <= 16);

/// A single 12-bit converter reading. Upper four bits are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Reading(u16);

impl Reading {
    /// Zero reading.
    pub const ZERO: Reading = Reading(0);

    /// Wrap a raw value, rejecting anything wider than 12 bits.
    #[must_use]
    pub const fn new(raw: u16) -> Option<Self> {
        if raw <= READING_MAX {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Build a reading from a raw value by discarding the upper four bits.
    #[must_use]
    pub const fn from_masked(raw: u16) -> Self {
        Self(raw & READING_MAX)
    }

    /// Raw 12-bit value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for Reading {
    type Error = String;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("reading {raw} exceeds 12 bits"))
    }
}

impl From<Reading> for u16 {
    fn from(reading: Reading) -> Self {
        reading.0
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One timestamped sample of both channels.
///
/// The timestamp is in nanoseconds on the monotonic clock. Records are
/// immutable once built and are copied, never mutated, after enqueueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    timestamp_ns: u64,
    value1: Reading,
    value2: Reading,
}

impl Record {
    /// Build a record from a timestamp and the two channel readings.
    #[must_use]
    pub const fn new(timestamp_ns: u64, value1: Reading, value2: Reading) -> Self {
        Self {
            timestamp_ns,
            value1,
            value2,
        }
    }

    /// Monotonic timestamp in nanoseconds.
    #[must_use]
    pub const fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Reading of the first configured channel.
    #[must_use]
    pub const fn value1(&self) -> u16 {
        self.value1.get()
    }

    /// Reading of the second configured channel.
    #[must_use]
    pub const fn value2(&self) -> u16 {
        self.value2.get()
    }
}
