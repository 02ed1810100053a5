//! End-to-end pipeline tests against the simulated sensor.
//!
//! The simulated clock makes every tick land exactly on its deadline, so the
//! produced logs are fully deterministic.

use super::common::{read_binary_log, read_csv_log, simulated_config, LoggedSample};
use pm_analysis::calibration::Calibration;
use pm_analysis::energy::integrate_energy;
use pm_analysis::median::median_filter;
use pm_analysis::power::add_power;
use pm_common::config::SinkFormat;
use pm_common::time::Timespec;
use pm_runtime::cancel::{CancelReason, CancelToken};
use pm_runtime::clock::SimulatedClock;
use pm_runtime::lifecycle::{AcquisitionContext, LifecycleController, ShutdownReport};
use pm_runtime::realtime::{PlatformCall, SimulatedPlatform};
use pm_runtime::sink::open_sink;
use pm_sensor::{ChannelId, SimulatedSensor};
use std::time::Duration;

const START: Timespec = Timespec::new(100, 0);

fn run_simulated(ctx: &AcquisitionContext<'_>, platform: SimulatedPlatform) -> ShutdownReport {
    let sink = open_sink(&ctx.config().sink).expect("sink opens");
    LifecycleController::new(platform)
        .with_poll_interval(Duration::from_millis(1))
        .run(ctx, SimulatedSensor::new(), sink, SimulatedClock::new(START))
        .expect("acquisition succeeds")
}

fn expected_sample(k: u64, interval_ns: u64) -> LoggedSample {
    let a = ChannelId::new(0).unwrap();
    let b = ChannelId::new(1).unwrap();
    LoggedSample {
        timestamp_ns: START.as_nanos() + k * interval_ns,
        value1: SimulatedSensor::waveform(a, k).get(),
        value2: SimulatedSensor::waveform(b, k).get(),
    }
}

#[test]
fn test_csv_log_matches_schedule_and_waveform() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(simulated_config(&path, 1000.0, Some(500), 64), &token)
        .unwrap();

    let report = run_simulated(&ctx, SimulatedPlatform::new());

    assert_eq!(report.reason, Some(CancelReason::SampleLimit));
    assert_eq!(report.producer.enqueued, 500);
    assert_eq!(report.consumer.written, 500);
    assert_eq!(report.consumer.write_errors, 0);
    assert_eq!(report.producer.max_interval_ns, 1_000_000);

    let log = read_csv_log(&path);
    assert_eq!(log.len(), 500);
    for (k, sample) in (0u64..).zip(&log) {
        assert_eq!(*sample, expected_sample(k, 1_000_000), "line {k}");
    }
}

#[test]
fn test_binary_log_holds_same_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.bin");
    let mut config = simulated_config(&path, 250.0, Some(200), 32);
    config.sink.format = SinkFormat::Binary;
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(config, &token).unwrap();

    run_simulated(&ctx, SimulatedPlatform::new());

    let log = read_binary_log(&path);
    assert_eq!(log.len(), 200);
    assert_eq!(log[0], expected_sample(0, 4_000_000));
    assert_eq!(log[199], expected_sample(199, 4_000_000));
}

#[test]
fn test_single_slot_channel_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(simulated_config(&path, 10_000.0, Some(2_000), 1), &token)
        .unwrap();

    let report = run_simulated(&ctx, SimulatedPlatform::new());

    assert_eq!(report.channel_capacity, 1);
    assert_eq!(report.channel_high_water, 1);
    assert_eq!(report.consumer.written, 2_000);
    let log = read_csv_log(&path);
    assert!(log.windows(2).all(|w| w[1].timestamp_ns - w[0].timestamp_ns == 100_000));
}

#[test]
fn test_realtime_setup_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let mut config = simulated_config(&path, 1000.0, Some(10), 16);
    config.realtime.enabled = true;
    config.realtime.priority = 80;
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(config, &token).unwrap();

    let sink = open_sink(&ctx.config().sink).unwrap();
    let controller = LifecycleController::new(SimulatedPlatform::new())
        .with_poll_interval(Duration::from_millis(1));
    controller
        .run(&ctx, SimulatedSensor::new(), sink, SimulatedClock::new(START))
        .unwrap();

    let calls = controller.platform().calls();
    assert_eq!(calls.first(), Some(&PlatformCall::LockMemory));
    assert_eq!(calls.last(), Some(&PlatformCall::UnlockMemory));
    let priorities: Vec<u8> = calls
        .iter()
        .filter_map(|call| match call {
            PlatformCall::SetPriority(_, priority) => Some(*priority),
            _ => None,
        })
        .collect();
    assert_eq!(priorities.len(), 2);
    assert!(priorities.contains(&80));
    assert!(priorities.contains(&79));
}

#[test]
fn test_log_feeds_analysis_stages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let token = CancelToken::new();
    let ctx = AcquisitionContext::new(simulated_config(&path, 1000.0, Some(100), 64), &token)
        .unwrap();
    run_simulated(&ctx, SimulatedPlatform::new());

    let raw = std::fs::read(&path).unwrap();
    let mut calibrated = Vec::new();
    let lines = add_power(raw.as_slice(), &mut calibrated, Calibration::default()).unwrap();
    assert_eq!(lines, 100);

    let mut filtered = Vec::new();
    let medians = median_filter(calibrated.as_slice(), &mut filtered, 9).unwrap();
    assert_eq!(medians, 91);

    // The log spans 99 ms; every calibrated power value is positive
    let joules = integrate_energy(calibrated.as_slice(), 0, 99_000_000).unwrap();
    assert!(joules > 0.0);
    let partial = integrate_energy(calibrated.as_slice(), 0, 49_000_000).unwrap();
    assert!(partial < joules);
}
