//! Shutdown paths: external cancellation, sample limit, and setup failures.
//!
//! Cancellation tests use the monotonic clock so that the pipeline really
//! sleeps between ticks while another thread cancels it.

use super::common::{read_csv_log, simulated_config};
use pm_common::error::PmError;
use pm_runtime::cancel::{CancelReason, CancelToken};
use pm_runtime::clock::{MonotonicClock, SimulatedClock};
use pm_runtime::lifecycle::{AcquisitionContext, LifecycleController};
use pm_runtime::realtime::SimulatedPlatform;
use pm_runtime::sink::open_sink;
use pm_sensor::SimulatedSensor;
use std::thread;
use std::time::Duration;

fn controller(platform: SimulatedPlatform) -> LifecycleController<SimulatedPlatform> {
    LifecycleController::new(platform).with_poll_interval(Duration::from_millis(2))
}

#[test]
fn test_external_cancel_drains_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(simulated_config(&path, 1000.0, None, 1024), &token).unwrap();
    let sink = open_sink(&ctx.config().sink).unwrap();

    let report = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(100));
            token.cancel(CancelReason::Interrupt);
        });
        controller(SimulatedPlatform::new())
            .run(&ctx, SimulatedSensor::new(), sink, MonotonicClock::new())
            .unwrap()
    });

    assert_eq!(report.reason, Some(CancelReason::Interrupt));
    assert!(report.is_clean());
    assert!(report.producer.enqueued > 0);
    assert_eq!(report.consumer.written, report.producer.enqueued);

    let log = read_csv_log(&path);
    assert_eq!(u64::try_from(log.len()).unwrap(), report.consumer.written);
    assert!(log.windows(2).all(|w| w[0].timestamp_ns < w[1].timestamp_ns));
}

#[test]
fn test_terminate_reason_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(simulated_config(&path, 500.0, None, 64), &token).unwrap();
    let sink = open_sink(&ctx.config().sink).unwrap();

    let report = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(30));
            token.cancel(CancelReason::Terminate);
            // A later signal does not overwrite the first reason
            token.cancel(CancelReason::Interrupt);
        });
        controller(SimulatedPlatform::new())
            .run(&ctx, SimulatedSensor::new(), sink, MonotonicClock::new())
            .unwrap()
    });

    assert_eq!(report.reason, Some(CancelReason::Terminate));
}

#[test]
fn test_sample_limit_with_real_clock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(simulated_config(&path, 1000.0, Some(50), 16), &token).unwrap();
    let sink = open_sink(&ctx.config().sink).unwrap();

    let report = controller(SimulatedPlatform::new())
        .run(&ctx, SimulatedSensor::new(), sink, MonotonicClock::new())
        .unwrap();

    assert_eq!(report.reason, Some(CancelReason::SampleLimit));
    assert_eq!(read_csv_log(&path).len(), 50);
    assert!(report.producer.max_interval_ns > 0);
}

#[test]
fn test_sensor_failures_skip_ticks_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(simulated_config(&path, 1000.0, Some(20), 16), &token).unwrap();
    let sink = open_sink(&ctx.config().sink).unwrap();

    // Tick 3 fails on its first read, tick 7 on its second
    let sensor = SimulatedSensor::new().failing_reads([6, 15]);
    let report = controller(SimulatedPlatform::new())
        .run(&ctx, sensor, sink, SimulatedClock::default())
        .unwrap();

    assert_eq!(report.producer.ticks, 20);
    assert_eq!(report.producer.sensor_errors, 2);
    assert_eq!(report.producer.enqueued, 18);
    assert_eq!(read_csv_log(&path).len(), 18);
}

#[test]
fn test_memory_lock_refusal_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let mut config = simulated_config(&path, 1000.0, Some(10), 16);
    config.realtime.enabled = true;
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(config, &token).unwrap();
    let sink = open_sink(&ctx.config().sink).unwrap();

    let err = controller(SimulatedPlatform::new().refuse_memory_lock())
        .run(&ctx, SimulatedSensor::new(), sink, SimulatedClock::default())
        .unwrap_err();

    assert!(matches!(err, PmError::MemoryLock(_)));
    assert_eq!(err.exit_code(), 4);
    assert!(read_csv_log(&path).is_empty());
}

#[test]
fn test_logger_priority_refusal_stops_sampler() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let mut config = simulated_config(&path, 1000.0, None, 16);
    config.realtime.enabled = true;
    config.realtime.lock_memory = false;
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(config, &token).unwrap();
    let sink = open_sink(&ctx.config().sink).unwrap();

    let err = controller(SimulatedPlatform::new().refuse_priority(48))
        .run(&ctx, SimulatedSensor::new(), sink, MonotonicClock::new())
        .unwrap_err();

    assert!(matches!(err, PmError::Priority(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(token.reason(), Some(CancelReason::Fault));
}

#[test]
fn test_setup_errors_map_to_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancelToken::new();

    let mut config = simulated_config(&dir.path().join("run.csv"), 1000.0, None, 16);
    config.channels.b = 8;
    let err = AcquisitionContext::new(config, &token).err().unwrap();
    assert_eq!(err.exit_code(), 2);

    let config = simulated_config(&dir.path().join("missing/run.csv"), 1000.0, None, 16);
    let err = open_sink(&config.sink).err().unwrap();
    assert_eq!(err.exit_code(), 5);

    let config = simulated_config(&dir.path().join("run.csv"), 0.0, None, 16);
    assert!(matches!(
        AcquisitionContext::new(config, &token),
        Err(PmError::Config(_))
    ));
}
