//! Logging thread: drains the channel into the sink.
//!
//! Runs one priority level below the sampling thread so that disk I/O can
//! never delay a tick. Write failures are counted and logged; they never
//! reach the sampling thread.

use crate::cancel::CancelReason;
use crate::lifecycle::AcquisitionContext;
use crate::realtime::{init_thread, RtPlatform};
use crate::sink::Sink;
use pm_common::error::PmResult;
use pm_common::metrics::ConsumerStats;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The logging thread body.
pub struct LogConsumer<'a, K: Sink> {
    ctx: &'a AcquisitionContext<'a>,
    sink: K,
    stats: ConsumerStats,
}

impl<'a, K: Sink> LogConsumer<'a, K> {
    /// Create a consumer writing to `sink`.
    pub fn new(ctx: &'a AcquisitionContext<'a>, sink: K) -> Self {
        Self {
            ctx,
            sink,
            stats: ConsumerStats::default(),
        }
    }

    /// Apply the logging thread priority and prefault the stack.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Priority`](pm_common::error::PmError::Priority)
    /// after cancelling the acquisition if the priority is refused.
    pub fn initialize(&self, platform: &dyn RtPlatform) -> PmResult<()> {
        let realtime = &self.ctx.config().realtime;
        if let Err(err) = init_thread(platform, realtime, realtime.consumer_priority()) {
            error!(%err, "Logging thread setup failed");
            self.ctx.request_cancel(CancelReason::Fault);
            return Err(err);
        }
        Ok(())
    }

    /// Write records until the channel is closed and drained, then flush
    /// one last time and release the sink.
    pub fn run(mut self) -> ConsumerStats {
        let ctx = self.ctx;
        let flush_interval = ctx.config().sink.flush_interval;
        let channel = ctx.channel();
        let mut last_flush = Instant::now();

        debug!(?flush_interval, "Logging started");

        while let Ok(record) = channel.get() {
            match self.sink.write(&record) {
                Ok(()) => self.stats.written += 1,
                Err(err) => {
                    self.stats.write_errors += 1;
                    warn!(%err, timestamp_ns = record.timestamp_ns(), "Dropping record");
                }
            }

            if last_flush.elapsed() >= flush_interval {
                self.flush();
                last_flush = Instant::now();
            }
        }

        self.flush();

        info!(
            written = self.stats.written,
            write_errors = self.stats.write_errors,
            flushes = self.stats.flushes,
            "Logging stopped"
        );
        self.stats
    }

    fn flush(&mut self) {
        match self.sink.flush() {
            Ok(()) => self.stats.flushes += 1,
            Err(err) => warn!(%err, "Sink flush failed"),
        }
    }
}
