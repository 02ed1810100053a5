//! Acquisition lifecycle: startup, the two worker threads, shutdown.
//!
//! [`AcquisitionContext`] is built once from the validated configuration
//! and borrowed by every participant. [`LifecycleController::run`] locks
//! memory, starts the sampling and logging threads, watches for
//! cancellation, then joins both threads and releases the memory lock.
//!
//! Cancellation is observed through the [`CancelToken`]: the sampling loop
//! checks it before every sleep, and the controller closes the channel so
//! that a thread blocked in `put` or `get` wakes up. The logging thread
//! drains whatever is still buffered before it exits.

use crate::cancel::{CancelReason, CancelToken};
use crate::channel::BoundedChannel;
use crate::clock::Clock;
use crate::consumer::LogConsumer;
use crate::realtime::RtPlatform;
use crate::scheduler::SamplingScheduler;
use crate::sink::Sink;
use pm_common::config::AcquisitionConfig;
use pm_common::error::{PmError, PmResult};
use pm_common::metrics::{ConsumerStats, ProducerStats};
use pm_common::record::Record;
use pm_common::time::Timespec;
use pm_sensor::{ChannelId, Sensor};
use serde::Serialize;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Name of the sampling thread.
pub const SAMPLER_THREAD: &str = "pm-sampler";

/// Name of the logging thread.
pub const LOGGER_THREAD: &str = "pm-logger";

/// How often the controller checks the cancel token and worker status.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything the workers share, built once before any thread starts.
#[derive(Debug)]
pub struct AcquisitionContext<'a> {
    config: AcquisitionConfig,
    interval: Timespec,
    channels: (ChannelId, ChannelId),
    channel: BoundedChannel<Record>,
    cancel: &'a CancelToken,
}

impl<'a> AcquisitionContext<'a> {
    /// Validate `config` and allocate the channel.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Config`] if the configuration is invalid.
    pub fn new(config: AcquisitionConfig, cancel: &'a CancelToken) -> PmResult<Self> {
        config.validate()?;
        let interval = config.sampling_interval()?;
        let channels = (
            ChannelId::try_from(config.channels.a)?,
            ChannelId::try_from(config.channels.b)?,
        );
        let channel = BoundedChannel::new(config.buffer.capacity)?;

        Ok(Self {
            config,
            interval,
            channels,
            channel,
            cancel,
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Tick interval.
    pub fn interval(&self) -> Timespec {
        self.interval
    }

    /// Inputs recorded as `value1` and `value2`.
    pub fn channels(&self) -> (ChannelId, ChannelId) {
        self.channels
    }

    /// Handoff channel between the two workers.
    pub fn channel(&self) -> &BoundedChannel<Record> {
        &self.channel
    }

    /// Shared cancellation flag.
    pub fn cancel_token(&self) -> &'a CancelToken {
        self.cancel
    }

    /// Cancel the acquisition and wake every blocked worker.
    pub fn request_cancel(&self, reason: CancelReason) {
        self.cancel.cancel(reason);
        self.channel.close();
    }
}

/// Summary of a finished acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    /// Why the acquisition stopped.
    pub reason: Option<CancelReason>,
    /// Sampling thread counters.
    pub producer: ProducerStats,
    /// Logging thread counters.
    pub consumer: ConsumerStats,
    /// Channel slots.
    pub channel_capacity: usize,
    /// Highest channel fill level reached.
    pub channel_high_water: usize,
}

impl ShutdownReport {
    /// Largest observed interval between consecutive ticks.
    #[must_use]
    pub fn max_interval(&self) -> Duration {
        Duration::from_nanos(self.producer.max_interval_ns)
    }

    /// Whether the run ended through a normal path (signal or sample limit).
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.reason.is_some_and(CancelReason::is_clean)
    }
}

/// Drives one acquisition from startup to shutdown.
#[derive(Debug)]
pub struct LifecycleController<P: RtPlatform> {
    platform: P,
    poll_interval: Duration,
}

impl<P: RtPlatform> LifecycleController<P> {
    /// Create a controller on top of `platform`.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override how often cancellation is polled.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The platform the controller was built with.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Run the acquisition until it is cancelled or reaches its sample
    /// limit.
    ///
    /// Blocks the calling thread. The sensor and clock move to the sampling
    /// thread, the sink to the logging thread.
    ///
    /// # Errors
    ///
    /// Returns the fatal setup error ([`PmError::MemoryLock`],
    /// [`PmError::Priority`], [`PmError::Thread`]) that ended the run.
    pub fn run<S, K, C>(
        &self,
        ctx: &AcquisitionContext<'_>,
        sensor: S,
        sink: K,
        clock: C,
    ) -> PmResult<ShutdownReport>
    where
        S: Sensor,
        K: Sink,
        C: Clock,
    {
        let realtime = &ctx.config().realtime;

        let memory_locked = realtime.enabled && realtime.lock_memory;
        if memory_locked {
            self.platform.lock_memory()?;
        }

        info!(
            frequency_hz = ctx.config().sampling_frequency,
            channel_a = %ctx.channels().0,
            channel_b = %ctx.channels().1,
            capacity = ctx.channel().capacity(),
            realtime = realtime.enabled,
            "Starting acquisition"
        );

        let outcome = self.run_workers(ctx, sensor, sink, clock);

        if memory_locked {
            if let Err(err) = self.platform.unlock_memory() {
                warn!(%err, "Failed to release memory lock");
            }
        }

        let (producer, consumer) = outcome?;
        let report = ShutdownReport {
            reason: ctx.cancel_token().reason(),
            producer,
            consumer,
            channel_capacity: ctx.channel().capacity(),
            channel_high_water: ctx.channel().high_water_mark(),
        };

        info!(
            reason = ?report.reason,
            enqueued = report.producer.enqueued,
            written = report.consumer.written,
            high_water = report.channel_high_water,
            max_interval_ns = report.producer.max_interval_ns,
            "Acquisition finished"
        );
        Ok(report)
    }

    fn run_workers<S, K, C>(
        &self,
        ctx: &AcquisitionContext<'_>,
        sensor: S,
        sink: K,
        clock: C,
    ) -> PmResult<(ProducerStats, ConsumerStats)>
    where
        S: Sensor,
        K: Sink,
        C: Clock,
    {
        let platform: &dyn RtPlatform = &self.platform;
        let stack_size = ctx.config().realtime.thread_stack_size;

        thread::scope(|scope| {
            let producer = thread::Builder::new()
                .name(SAMPLER_THREAD.into())
                .stack_size(stack_size)
                .spawn_scoped(scope, move || -> PmResult<ProducerStats> {
                    let mut scheduler = SamplingScheduler::new(ctx, sensor, clock);
                    scheduler.initialize(platform)?;
                    scheduler.run()
                })
                .map_err(|e| spawn_failed(ctx, SAMPLER_THREAD, &e))?;

            let consumer = thread::Builder::new()
                .name(LOGGER_THREAD.into())
                .stack_size(stack_size)
                .spawn_scoped(scope, move || -> PmResult<ConsumerStats> {
                    let consumer = LogConsumer::new(ctx, sink);
                    consumer.initialize(platform)?;
                    Ok(consumer.run())
                })
                .map_err(|e| spawn_failed(ctx, LOGGER_THREAD, &e))?;

            self.supervise(ctx, &producer, &consumer);

            let producer = join(producer, SAMPLER_THREAD);
            let consumer = join(consumer, LOGGER_THREAD);
            Ok((producer?, consumer?))
        })
    }

    /// Poll until both workers have exited, propagating cancellation.
    fn supervise<T, U>(
        &self,
        ctx: &AcquisitionContext<'_>,
        producer: &ScopedJoinHandle<'_, T>,
        consumer: &ScopedJoinHandle<'_, U>,
    ) {
        loop {
            let producer_done = producer.is_finished();
            let consumer_done = consumer.is_finished();
            if producer_done && consumer_done {
                return;
            }

            let cancel = ctx.cancel_token();
            if !ctx.channel().is_closed() {
                if cancel.is_cancelled() {
                    debug!(reason = ?cancel.reason(), "Cancellation observed, closing channel");
                    ctx.channel().close();
                } else if producer_done {
                    // Sampling thread died without closing the channel
                    ctx.channel().close();
                }
            }
            if consumer_done && !cancel.is_cancelled() {
                error!("Logging thread exited early, stopping sampling");
                ctx.request_cancel(CancelReason::Fault);
            }

            thread::sleep(self.poll_interval);
        }
    }
}

fn spawn_failed(ctx: &AcquisitionContext<'_>, name: &str, err: &std::io::Error) -> PmError {
    ctx.request_cancel(CancelReason::Fault);
    PmError::Thread(format!("cannot spawn {name}: {err}"))
}

fn join<T>(handle: ScopedJoinHandle<'_, PmResult<T>>, name: &str) -> PmResult<T> {
    handle
        .join()
        .map_err(|_| PmError::Thread(format!("{name} panicked")))?
}
