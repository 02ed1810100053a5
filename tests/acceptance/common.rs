//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Building simulated configurations
//! - Reading back CSV and binary logs
//! - Checking real-time prerequisites

#![allow(dead_code)]

use pm_common::config::{AcquisitionConfig, BusDriver, SinkFormat};
use pm_runtime::sink::BINARY_RECORD_LEN;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// One parsed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedSample {
    pub timestamp_ns: u64,
    pub value1: u16,
    pub value2: u16,
}

/// Unprivileged simulated configuration writing to `output`.
pub fn simulated_config(
    output: &Path,
    frequency: f64,
    max_samples: Option<u64>,
    capacity: usize,
) -> AcquisitionConfig {
    let mut config = AcquisitionConfig::default();
    config.sampling_frequency = frequency;
    config.max_samples = max_samples;
    config.buffer.capacity = capacity;
    config.bus.driver = BusDriver::Simulated;
    config.sink.path = output.to_path_buf();
    config.sink.format = SinkFormat::Csv;
    config.sink.flush_interval = Duration::from_millis(100);
    config.realtime.enabled = false;
    config
}

/// Parse a CSV log, failing the test on any malformed line.
pub fn read_csv_log(path: &Path) -> Vec<LoggedSample> {
    let file = fs::File::open(path).expect("log readable");
    let mut reader = pm_analysis::csv_reader(file);
    reader
        .records()
        .map(|row| {
            let row = row.expect("well-formed log line");
            assert_eq!(row.len(), 3, "malformed line {row:?}");
            let (timestamp_ns, value1, value2): (u64, u16, u16) =
                row.deserialize(None).expect("numeric fields");
            LoggedSample {
                timestamp_ns,
                value1,
                value2,
            }
        })
        .collect()
}

/// Parse a binary log.
pub fn read_binary_log(path: &Path) -> Vec<LoggedSample> {
    let bytes = fs::read(path).expect("log readable");
    assert_eq!(bytes.len() % BINARY_RECORD_LEN, 0, "truncated binary log");
    bytes
        .chunks_exact(BINARY_RECORD_LEN)
        .map(|chunk| LoggedSample {
            timestamp_ns: u64::from_le_bytes(chunk[..8].try_into().unwrap()),
            value1: u16::from_le_bytes(chunk[8..10].try_into().unwrap()),
            value2: u16::from_le_bytes(chunk[10..].try_into().unwrap()),
        })
        .collect()
}

/// Check if the system has PREEMPT_RT kernel.
pub fn has_preempt_rt() -> bool {
    fs::read_to_string("/proc/version")
        .map(|version| version.contains("PREEMPT_RT") || version.contains("PREEMPT RT"))
        .unwrap_or(false)
}

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check real-time prerequisites, describing what is missing.
pub fn check_rt_prerequisites() -> Result<(), String> {
    if !is_root() {
        return Err("Root privileges required".into());
    }
    if !has_preempt_rt() {
        eprintln!("Warning: PREEMPT_RT kernel not detected, timing may be degraded");
    }
    Ok(())
}
