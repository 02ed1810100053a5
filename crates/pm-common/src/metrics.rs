//! Inter-tick timing statistic for the sampling loop.
//!
//! Only the running maximum of the time between consecutive ticks is kept.
//! It is a diagnostic and never feeds back into scheduling decisions.

use serde::Serialize;
use std::time::Duration;

/// Running maximum of the interval between consecutive sampling ticks.
///
/// Allocation-free; owned by the sampling thread and handed to the
/// controller by value once the thread has stopped.
#[derive(Debug, Clone)]
pub struct JitterTracker {
    /// Timestamp of the previous tick in nanoseconds.
    previous_tick_ns: u64,
    /// Largest observed inter-tick delta in nanoseconds.
    max_interval_ns: u64,
    /// Number of ticks observed.
    ticks: u64,
}

impl JitterTracker {
    /// Start tracking from the loop start time.
    #[must_use]
    pub fn new(start_ns: u64) -> Self {
        Self {
            previous_tick_ns: start_ns,
            max_interval_ns: 0,
            ticks: 0,
        }
    }

    /// Record a tick timestamp and return the delta to the previous one.
    pub fn observe(&mut self, now_ns: u64) -> u64 {
        let delta = now_ns.saturating_sub(self.previous_tick_ns);
        self.max_interval_ns = self.max_interval_ns.max(delta);
        self.previous_tick_ns = now_ns;
        self.ticks += 1;
        delta
    }

    /// Largest observed inter-tick delta in nanoseconds.
    #[must_use]
    pub fn max_interval_ns(&self) -> u64 {
        self.max_interval_ns
    }

    /// Largest observed inter-tick delta.
    #[must_use]
    pub fn max_interval(&self) -> Duration {
        Duration::from_nanos(self.max_interval_ns)
    }

    /// Number of ticks observed.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Final counters of a sampling run, produced when the sampling thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    /// Ticks executed, including those skipped because of sensor errors.
    pub ticks: u64,
    /// Records placed into the channel.
    pub enqueued: u64,
    /// Ticks skipped because a sensor read failed.
    pub sensor_errors: u64,
    /// Largest observed inter-tick delta in nanoseconds.
    pub max_interval_ns: u64,
}

/// Final counters of the logging thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Records handed to the sink successfully.
    pub written: u64,
    /// Records the sink failed to write.
    pub write_errors: u64,
    /// Number of sink flushes.
    pub flushes: u64,
}
