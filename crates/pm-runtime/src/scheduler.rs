//! Drift-free periodic sampling loop.
//!
//! Every tick reads both converter inputs, timestamps the pair and hands it
//! to the logging thread, then sleeps until the next absolute deadline.
//! Deadlines advance from the previous *scheduled* wake-up, never from the
//! time the tick actually finished, so after `k` ticks the schedule is
//! exactly `start + k * interval` however long the individual ticks took.
//!
//! A failed sensor read skips that tick's record. It never stops sampling
//! and never shifts the schedule.

use crate::cancel::CancelReason;
use crate::clock::Clock;
use crate::lifecycle::AcquisitionContext;
use crate::realtime::{init_thread, RtPlatform};
use pm_common::error::{PmError, PmResult};
use pm_common::metrics::{JitterTracker, ProducerStats};
use pm_common::record::{Reading, Record};
use pm_common::state::{ProducerState, StateMachine};
use pm_common::time::Timespec;
use pm_sensor::{ChannelId, Sensor};
use tracing::{debug, error, info, trace, warn};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A record was placed into the channel.
    Enqueued,
    /// A sensor read failed; no record was produced.
    Skipped,
    /// The channel was closed while enqueueing. The loop must stop.
    ChannelClosed,
}

/// The sampling thread body.
pub struct SamplingScheduler<'a, S: Sensor, C: Clock> {
    ctx: &'a AcquisitionContext<'a>,
    sensor: S,
    clock: C,
    state: StateMachine,
    /// Deadline of the most recent tick; the next one is this plus the interval.
    last_scheduled_wake: Timespec,
    jitter: JitterTracker,
    enqueued: u64,
    sensor_errors: u64,
}

impl<'a, S: Sensor, C: Clock> SamplingScheduler<'a, S, C> {
    /// Create a scheduler in INITIALIZING.
    pub fn new(ctx: &'a AcquisitionContext<'a>, sensor: S, clock: C) -> Self {
        Self {
            ctx,
            sensor,
            clock,
            state: StateMachine::new(),
            last_scheduled_wake: Timespec::ZERO,
            jitter: JitterTracker::new(0),
            enqueued: 0,
            sensor_errors: 0,
        }
    }

    /// Current state of the loop.
    pub fn state(&self) -> ProducerState {
        self.state.state()
    }

    /// Deadline of the most recently completed tick.
    pub fn last_scheduled_wake(&self) -> Timespec {
        self.last_scheduled_wake
    }

    /// Inter-tick timing collected so far.
    pub fn jitter(&self) -> &JitterTracker {
        &self.jitter
    }

    /// Counters collected so far.
    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            ticks: self.jitter.ticks(),
            enqueued: self.enqueued,
            sensor_errors: self.sensor_errors,
            max_interval_ns: self.jitter.max_interval_ns(),
        }
    }

    /// Apply the real-time priority and prefault the stack.
    ///
    /// Must run on the sampling thread itself. A refused priority is fatal:
    /// the whole acquisition is cancelled and the error returned.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Priority`] if the priority cannot be applied.
    pub fn initialize(&mut self, platform: &dyn RtPlatform) -> PmResult<()> {
        let ctx = self.ctx;
        let realtime = &ctx.config().realtime;
        if let Err(err) = init_thread(platform, realtime, realtime.priority) {
            error!(%err, "Sampling thread setup failed");
            self.state.cancel();
            ctx.request_cancel(CancelReason::Fault);
            return Err(err);
        }
        debug!(
            enabled = realtime.enabled,
            priority = realtime.priority,
            "Sampling thread initialized"
        );
        Ok(())
    }

    /// Enter RUNNING and anchor the schedule at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::InvalidStateTransition`] unless in INITIALIZING.
    pub fn start(&mut self) -> PmResult<()> {
        self.state.transition(ProducerState::Running)?;

        let now = self.clock.now();
        self.last_scheduled_wake = now;
        self.jitter = JitterTracker::new(now.as_nanos());

        info!(
            interval_ns = self.ctx.interval().as_nanos(),
            start = %now,
            "Sampling started"
        );
        Ok(())
    }

    /// Execute one tick without sleeping.
    ///
    /// Reads both inputs, timestamps the pair after the reads, updates the
    /// inter-tick statistic and enqueues the record, blocking while the
    /// channel is full. The schedule advances by one interval whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::InvalidStateTransition`] unless RUNNING.
    pub fn run_tick(&mut self) -> PmResult<TickOutcome> {
        if self.state.state() != ProducerState::Running {
            return Err(PmError::InvalidStateTransition {
                from: self.state.state().to_string(),
                to: ProducerState::Running.to_string(),
            });
        }

        let next_wake = self.last_scheduled_wake + self.ctx.interval();
        let (a, b) = self.ctx.channels();

        let value1 = self.read(a);
        let value2 = self.read(b);
        let now = self.clock.now().as_nanos();
        let delta = self.jitter.observe(now);

        let outcome = match (value1, value2) {
            (Ok(value1), Ok(value2)) => {
                let record = Record::new(now, value1, value2);
                match self.ctx.channel().put(record) {
                    Ok(()) => {
                        self.enqueued += 1;
                        TickOutcome::Enqueued
                    }
                    Err(_) => TickOutcome::ChannelClosed,
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                self.sensor_errors += 1;
                warn!(tick = self.jitter.ticks(), %err, "Sensor read failed, skipping tick");
                TickOutcome::Skipped
            }
        };

        self.last_scheduled_wake = next_wake;

        trace!(tick = self.jitter.ticks(), delta_ns = delta, ?outcome, "Tick complete");
        Ok(outcome)
    }

    fn read(&mut self, channel: ChannelId) -> PmResult<Reading> {
        self.sensor
            .read_channel(channel)
            .map_err(|e| PmError::Sensor {
                channel: channel.get(),
                reason: e.to_string(),
            })
    }

    /// Run the loop until cancelled, the channel closes, or the configured
    /// sample limit is reached.
    ///
    /// On exit the state is CANCELLED and the channel is closed, so the
    /// logging thread drains what is left and stops.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::InvalidStateTransition`] if the loop was already
    /// cancelled before it started.
    pub fn run(&mut self) -> PmResult<ProducerStats> {
        let result = self.start().map(|()| self.sample_until_stopped());
        self.state.cancel();
        self.ctx.channel().close();

        let stats = self.stats();
        info!(
            ticks = stats.ticks,
            enqueued = stats.enqueued,
            sensor_errors = stats.sensor_errors,
            max_interval_ns = stats.max_interval_ns,
            "Sampling stopped"
        );
        result.map(|()| stats)
    }

    fn sample_until_stopped(&mut self) {
        let ctx = self.ctx;
        let cancel = ctx.cancel_token();
        let max_samples = ctx.config().max_samples;

        while !cancel.is_cancelled() {
            match self.run_tick() {
                Ok(TickOutcome::ChannelClosed) | Err(_) => return,
                Ok(TickOutcome::Enqueued | TickOutcome::Skipped) => {}
            }

            if max_samples.is_some_and(|max| self.jitter.ticks() >= max) {
                debug!(ticks = self.jitter.ticks(), "Sample limit reached");
                cancel.cancel(CancelReason::SampleLimit);
                return;
            }

            if cancel.is_cancelled() {
                return;
            }
            self.clock.sleep_until(self.last_scheduled_wake);
        }
    }
}
