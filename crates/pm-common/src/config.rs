//! Configuration structures for the acquisition daemon.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.
//! Command-line flags are applied on top by the daemon, and the merged
//! result is checked once with [`AcquisitionConfig::validate`].

use crate::error::{PmError, PmResult};
use crate::time::{interval_from_frequency, Timespec};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::PathBuf;
use std::time::Duration;

/// Default channel capacity: more than eight seconds of samples at 1 kHz.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8192;

/// Default sampling thread priority. The logging thread runs one below.
pub const DEFAULT_TASK_PRIORITY: u8 = 49;

/// Highest selectable converter input.
pub const MAX_CHANNEL_SELECTOR: u8 = 7;

const_assert!(DEFAULT_CHANNEL_CAPACITY.is_power_of_two());

/// Top-level acquisition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Sampling frequency in Hz.
    pub sampling_frequency: f64,

    /// Stop after this many ticks. `None` samples until interrupted.
    pub max_samples: Option<u64>,

    /// Converter inputs sampled on every tick.
    pub channels: ChannelPair,

    /// Sensor bus configuration.
    pub bus: BusConfig,

    /// Handoff buffer configuration.
    pub buffer: BufferConfig,

    /// Output sink configuration.
    pub sink: SinkConfig,

    /// Real-time configuration.
    pub realtime: RealtimeConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sampling_frequency: 1000.0,
            max_samples: None,
            channels: ChannelPair::default(),
            bus: BusConfig::default(),
            buffer: BufferConfig::default(),
            sink: SinkConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

/// The two converter inputs recorded as `value1` and `value2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPair {
    /// Selector for `value1`.
    pub a: u8,
    /// Selector for `value2`.
    pub b: u8,
}

impl Default for ChannelPair {
    fn default() -> Self {
        Self { a: 0, b: 1 }
    }
}

/// Supported sensor bus drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusDriver {
    /// Linux spidev character device.
    #[default]
    Spidev,
    /// Synthetic readings for testing without hardware.
    Simulated,
}

/// Sensor bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus driver type.
    pub driver: BusDriver,

    /// Chip-select line the converter is wired to.
    pub chip_select: u8,

    /// Bus clock frequency in Hz.
    pub clock_hz: u32,

    /// Explicit device node, overriding the one derived from `chip_select`.
    pub device: Option<PathBuf>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            driver: BusDriver::Spidev,
            chip_select: 0,
            clock_hz: 1_000_000,
            device: None,
        }
    }
}

impl BusConfig {
    /// Device node to open for this bus.
    #[must_use]
    pub fn device_path(&self) -> PathBuf {
        self.device
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/dev/spidev0.{}", self.chip_select)))
    }
}

/// Handoff buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of record slots. Must be a power of two.
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// On-disk record encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    /// `timestamp,value1,value2` text lines.
    #[default]
    Csv,
    /// Fixed 12-byte little-endian records.
    Binary,
}

/// Output sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Output file, created or truncated at startup.
    pub path: PathBuf,

    /// Record encoding.
    pub format: SinkFormat,

    /// Maximum time between sink flushes.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("powermeter.csv"),
            format: SinkFormat::Csv,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling and memory locking (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo" or "rr" (round-robin).
    pub policy: SchedPolicy,

    /// Sampling thread priority (1-99). The logging thread uses one less.
    pub priority: u8,

    /// Lock all current and future memory pages (mlockall).
    pub lock_memory: bool,

    /// Stack bytes each real-time thread touches before its loop starts.
    pub prefault_stack_size: usize,

    /// Stack size of the sampling and logging threads.
    pub thread_stack_size: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: SchedPolicy::Fifo,
            priority: DEFAULT_TASK_PRIORITY,
            lock_memory: true,
            prefault_stack_size: 256 * 1024,
            thread_stack_size: 1024 * 1024,
        }
    }
}

impl RealtimeConfig {
    /// Priority of the logging thread, strictly below the sampling thread.
    #[must_use]
    pub fn consumer_priority(&self) -> u8 {
        self.priority.saturating_sub(1)
    }

    /// Largest stack pre-fault that fits a thread of `thread_stack_size`.
    ///
    /// Half the stack stays free for per-frame overhead and for whatever
    /// the thread has used before it pre-faults.
    #[must_use]
    pub fn max_prefault_stack_size(&self) -> usize {
        self.thread_stack_size / 2
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
}

impl AcquisitionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Tick interval derived from the sampling frequency.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Config`] for a non-positive or non-finite frequency.
    pub fn sampling_interval(&self) -> PmResult<Timespec> {
        interval_from_frequency(self.sampling_frequency)
    }

    /// Check the merged configuration before any resource is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Config`] describing the first invalid value.
    pub fn validate(&self) -> PmResult<()> {
        self.sampling_interval()?;

        if self.max_samples == Some(0) {
            return Err(PmError::Config("max_samples must be at least 1".into()));
        }

        for (name, selector) in [("a", self.channels.a), ("b", self.channels.b)] {
            if selector > MAX_CHANNEL_SELECTOR {
                return Err(PmError::Config(format!(
                    "channel {name} must be in range 0 to {MAX_CHANNEL_SELECTOR}, got {selector}"
                )));
            }
        }

        if self.bus.clock_hz == 0 {
            return Err(PmError::Config("bus clock frequency must be non-zero".into()));
        }

        if !self.buffer.capacity.is_power_of_two() {
            return Err(PmError::Config(format!(
                "buffer capacity must be a non-zero power of two, got {}",
                self.buffer.capacity
            )));
        }

        if self.realtime.enabled && !(2..=99).contains(&self.realtime.priority) {
            return Err(PmError::Config(format!(
                "real-time priority must be in range 2 to 99, got {}",
                self.realtime.priority
            )));
        }

        if self.realtime.prefault_stack_size > self.realtime.max_prefault_stack_size() {
            return Err(PmError::Config(format!(
                "prefault_stack_size ({}) must be at most half of thread_stack_size ({})",
                self.realtime.prefault_stack_size, self.realtime.thread_stack_size
            )));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for PmError {
    fn from(err: ConfigError) -> Self {
        PmError::Config(err.to_string())
    }
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
