//! Powermeter daemon entry point.
//!
//! Samples two converter inputs at a fixed frequency under real-time
//! scheduling and logs timestamped pairs until interrupted or until the
//! configured sample limit is reached.

mod signals;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pm_common::config::{AcquisitionConfig, BusDriver, SinkFormat};
use pm_common::error::PmError;
use pm_runtime::clock::MonotonicClock;
use pm_runtime::lifecycle::{AcquisitionContext, LifecycleController, ShutdownReport};
use pm_runtime::realtime::{check_rt_capabilities, SystemPlatform};
use pm_runtime::sink::open_sink;
use pm_sensor::mcp320x::Mcp320x;
use pm_sensor::spi::Spidev;
use pm_sensor::SimulatedSensor;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Powermeter command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "powermeter",
    about = "Two-channel real-time power acquisition",
    version,
    long_about = None
)]
struct Args {
    /// Path to an acquisition configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// SPI chip select the converter is wired to.
    #[arg(long = "spi-channel", short = 's', value_name = "CS")]
    spi_channel: Option<u8>,

    /// SPI clock frequency in Hz.
    #[arg(long = "spi-frequency", short = 'f', value_name = "HZ")]
    spi_frequency: Option<u32>,

    /// First converter input (0-7).
    #[arg(long = "channel-a", short = 'a', value_name = "N")]
    channel_a: Option<u8>,

    /// Second converter input (0-7).
    #[arg(long = "channel-b", short = 'b', value_name = "N")]
    channel_b: Option<u8>,

    /// Sampling frequency in Hz.
    #[arg(long = "sampling-frequency", short = 'F', value_name = "HZ")]
    sampling_frequency: Option<f64>,

    /// Output file for the recorded samples.
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Sampling thread priority; the logging thread runs one level below.
    #[arg(long, short = 'p', value_name = "PRIO")]
    priority: Option<u8>,

    /// Output encoding.
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Stop after this many ticks.
    #[arg(long, value_name = "N")]
    max_samples: Option<u64>,

    /// Read from the simulated sensor instead of SPI hardware.
    #[arg(long)]
    simulated: bool,

    /// Run without real-time priorities or memory locking.
    #[arg(long)]
    no_realtime: bool,

    /// Write a JSON shutdown report to this file.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Check real-time capabilities for the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Csv,
    Binary,
}

impl From<FormatArg> for SinkFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => SinkFormat::Csv,
            FormatArg::Binary => SinkFormat::Binary,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting powermeter");

    let result = if args.check {
        check(&args)
    } else {
        run(&args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("powermeter: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "powermeter={level},pm_runtime={level},pm_sensor={level},pm_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Process exit status for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PmError>())
        .map_or(1, PmError::exit_code)
}

fn from_file(path: &Path) -> Result<AcquisitionConfig> {
    AcquisitionConfig::from_file(path)
        .map_err(PmError::from)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `PM_CONFIG_PATH` environment variable
/// 3. `/etc/powermeter/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(explicit: Option<&Path>) -> Result<AcquisitionConfig> {
    if let Some(config_path) = explicit {
        info!(?config_path, "Loading config from command-line argument");
        return from_file(config_path);
    }

    if let Ok(env_path) = std::env::var("PM_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from PM_CONFIG_PATH");
            return from_file(&config_path);
        }
        warn!(
            path = %env_path,
            "PM_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/powermeter/config.toml", "config/default.toml"] {
        let config_path = Path::new(candidate);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return from_file(config_path);
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(AcquisitionConfig::default())
}

/// Command-line flags take precedence over the configuration file.
fn apply_overrides(config: &mut AcquisitionConfig, args: &Args) {
    if let Some(cs) = args.spi_channel {
        config.bus.chip_select = cs;
    }
    if let Some(hz) = args.spi_frequency {
        config.bus.clock_hz = hz;
    }
    if let Some(a) = args.channel_a {
        config.channels.a = a;
    }
    if let Some(b) = args.channel_b {
        config.channels.b = b;
    }
    if let Some(hz) = args.sampling_frequency {
        config.sampling_frequency = hz;
    }
    if let Some(path) = &args.output {
        config.sink.path.clone_from(path);
    }
    if let Some(priority) = args.priority {
        config.realtime.priority = priority;
    }
    if let Some(format) = args.format {
        config.sink.format = format.into();
    }
    if args.max_samples.is_some() {
        config.max_samples = args.max_samples;
    }
    if args.simulated {
        config.bus.driver = BusDriver::Simulated;
    }
    if args.no_realtime {
        config.realtime.enabled = false;
    }
}

fn resolve_config(args: &Args) -> Result<AcquisitionConfig> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, args);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Report whether this host can run the configuration with real-time
/// guarantees.
fn check(args: &Args) -> Result<()> {
    let config = resolve_config(args)?;
    let capabilities = check_rt_capabilities();

    println!("{}", serde_json::to_string_pretty(&capabilities)?);

    let issues = capabilities.issues(&config.realtime);
    if issues.is_empty() {
        println!("Real-time requirements satisfied");
        return Ok(());
    }
    for issue in &issues {
        println!("  - {issue}");
    }
    anyhow::bail!("{} real-time requirement(s) not met", issues.len())
}

/// Run one acquisition to completion.
fn run(args: &Args) -> Result<()> {
    let config = resolve_config(args)?;

    for issue in check_rt_capabilities().issues(&config.realtime) {
        warn!(%issue, "Real-time setup is likely to fail");
    }

    info!(
        frequency_hz = config.sampling_frequency,
        driver = ?config.bus.driver,
        output = %config.sink.path.display(),
        "Configuration loaded"
    );

    signals::install().context("Failed to set up signal handlers")?;

    let ctx = AcquisitionContext::new(config, &signals::SHUTDOWN)?;
    let controller = LifecycleController::new(SystemPlatform);
    let bus = &ctx.config().bus;

    let report = match bus.driver {
        BusDriver::Spidev => {
            let device = bus.device_path();
            let spi = Spidev::open(&device, bus.clock_hz)
                .map_err(PmError::from)
                .with_context(|| format!("Failed to open {}", device.display()))?;
            let sink = open_sink(&ctx.config().sink)?;
            controller.run(&ctx, Mcp320x::new(spi), sink, MonotonicClock::new())?
        }
        BusDriver::Simulated => {
            let sink = open_sink(&ctx.config().sink)?;
            controller.run(&ctx, SimulatedSensor::new(), sink, MonotonicClock::new())?
        }
    };

    println!("Max. sampling interval was {} ns", report.producer.max_interval_ns);

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(PmError::Thread(format!(
            "acquisition stopped abnormally ({})",
            report
                .reason
                .map_or_else(|| "no reason recorded".to_string(), |r| r.to_string())
        ))
        .into())
    }
}

fn write_report(path: &Path, report: &ShutdownReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Shutdown report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["powermeter", "--simulated"]);
        assert!(args.simulated);
        assert!(args.config.is_none());
        assert!(args.max_samples.is_none());
    }

    #[test]
    fn test_short_flags_override_config() {
        let args = Args::parse_from([
            "powermeter", "-s", "1", "-f", "2000000", "-a", "2", "-b", "5", "-F", "500", "-o",
            "run.csv", "-p", "80",
        ]);
        let mut config = AcquisitionConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.bus.chip_select, 1);
        assert_eq!(config.bus.clock_hz, 2_000_000);
        assert_eq!(config.channels.a, 2);
        assert_eq!(config.channels.b, 5);
        assert!((config.sampling_frequency - 500.0).abs() < f64::EPSILON);
        assert_eq!(config.sink.path, PathBuf::from("run.csv"));
        assert_eq!(config.realtime.priority, 80);
        assert_eq!(config.realtime.consumer_priority(), 79);
    }

    #[test]
    fn test_long_flags() {
        let args = Args::parse_from([
            "powermeter",
            "--format",
            "binary",
            "--max-samples",
            "1000",
            "--no-realtime",
            "--simulated",
        ]);
        let mut config = AcquisitionConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.sink.format, SinkFormat::Binary);
        assert_eq!(config.max_samples, Some(1000));
        assert!(!config.realtime.enabled);
        assert_eq!(config.bus.driver, BusDriver::Simulated);
    }

    #[test]
    fn test_out_of_range_channel_is_config_error() {
        let args = Args::parse_from(["powermeter", "-a", "8"]);
        let err = resolve_config(&args).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("powermeter.toml");
        std::fs::write(&path, "sampling_frequency = 250.0\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!((config.sampling_frequency - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_config_file_is_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/powermeter.toml"))).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_unrelated_error_exits_with_one() {
        let err = anyhow::anyhow!("report path unwritable");
        assert_eq!(exit_code(&err), 1);
    }
}
