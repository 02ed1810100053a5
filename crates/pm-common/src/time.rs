//! Monotonic time arithmetic for absolute-deadline scheduling.
//!
//! Deadlines are kept as seconds + nanoseconds and advanced with carry
//! normalisation, so tick `k` is always exactly `start + k * interval`
//! regardless of how long individual ticks took.

use crate::error::{PmError, PmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point on (or span of) the monotonic clock.
///
/// Invariant: `nsec < 1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timespec {
    sec: u64,
    nsec: u32,
}

impl Timespec {
    /// Origin of the clock.
    pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

    /// Build a normalised timespec from seconds and a possibly overflowing
    /// nanosecond part.
    #[must_use]
    pub const fn new(sec: u64, nsec: u64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let subsec = (nsec % NANOS_PER_SEC) as u32;
        Self {
            sec: sec + nsec / NANOS_PER_SEC,
            nsec: subsec,
        }
    }

    /// Build a timespec from plain nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self::new(0, nanos)
    }

    /// Whole seconds.
    #[must_use]
    pub const fn secs(&self) -> u64 {
        self.sec
    }

    /// Sub-second nanoseconds.
    #[must_use]
    pub const fn subsec_nanos(&self) -> u32 {
        self.nsec
    }

    /// Collapse to plain nanoseconds. 64 bits cover several centuries.
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.sec * NANOS_PER_SEC + self.nsec as u64
    }

    /// Add with carry from the nanosecond field into the seconds field.
    #[must_use]
    pub const fn add_normalized(self, rhs: Timespec) -> Timespec {
        let mut sec = self.sec + rhs.sec;
        let mut nsec = self.nsec + rhs.nsec;
        if nsec >= 1_000_000_000 {
            sec += 1;
            nsec -= 1_000_000_000;
        }
        Timespec { sec, nsec }
    }

    /// Nanoseconds elapsed from `earlier` to `self`, saturating at zero.
    #[must_use]
    pub const fn saturating_nanos_since(&self, earlier: Timespec) -> u64 {
        self.as_nanos().saturating_sub(earlier.as_nanos())
    }
}

impl Add for Timespec {
    type Output = Timespec;

    fn add(self, rhs: Timespec) -> Timespec {
        self.add_normalized(rhs)
    }
}

impl From<Duration> for Timespec {
    fn from(d: Duration) -> Self {
        Self {
            sec: d.as_secs(),
            nsec: d.subsec_nanos(),
        }
    }
}

impl From<Timespec> for Duration {
    fn from(t: Timespec) -> Self {
        Duration::new(t.sec, t.nsec)
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.sec, self.nsec)
    }
}

/// Convert a sampling frequency to the tick interval.
///
/// `interval_ns = round(1e9 / frequency_hz)`.
///
/// # Errors
///
/// Returns [`PmError::Config`] if the frequency is not a positive finite
/// number or is so high that the interval rounds to zero.
pub fn interval_from_frequency(frequency_hz: f64) -> PmResult<Timespec> {
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return Err(PmError::Config(format!(
            "sampling frequency must be positive, got {frequency_hz}"
        )));
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let interval_ns = (NANOS_PER_SEC as f64 / frequency_hz).round() as u64;

    if interval_ns == 0 {
        return Err(PmError::Config(format!(
            "sampling frequency {frequency_hz} Hz is above 1 GHz"
        )));
    }

    Ok(Timespec::from_nanos(interval_ns))
}
