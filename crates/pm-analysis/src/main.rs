//! `pm-analyze`: post-processing for powermeter logs.
//!
//! ```bash
//! pm-analyze power run.csv > run-power.csv
//! pm-analyze median run-power.csv 25 > run-median.csv
//! pm-analyze energy run-power.csv 0 1000000000
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pm_analysis::calibration::{Calibration, LinearCalibration};
use pm_analysis::energy::integrate_energy;
use pm_analysis::median::median_filter;
use pm_analysis::power::add_power;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pm-analyze", about = "Post-process powermeter logs", version, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a raw log to current, voltage, power, and offset time.
    Power {
        /// Raw `timestamp,value_a,value_b` log.
        input: PathBuf,

        /// Output file (defaults to stdout).
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        #[command(flatten)]
        calibration: CalibrationArgs,
    },

    /// Sliding window median over a calibrated log.
    Median {
        /// Output of `pm-analyze power`.
        input: PathBuf,

        /// Window size in samples.
        window: usize,

        /// Output file (defaults to stdout).
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Integrate power between two offset times (ns) and print joules.
    Energy {
        /// Output of `pm-analyze power`.
        input: PathBuf,

        /// Range start, nanoseconds from the first sample.
        start: u64,

        /// Range end, nanoseconds from the first sample.
        end: u64,
    },
}

#[derive(Args, Debug)]
struct CalibrationArgs {
    /// Current at a raw reading of zero (mA).
    #[arg(long, default_value_t = LinearCalibration::CURRENT_MA.offset)]
    current_offset: f64,

    /// Current per raw count (mA).
    #[arg(long, default_value_t = LinearCalibration::CURRENT_MA.gain)]
    current_gain: f64,

    /// Voltage at a raw reading of zero (mV).
    #[arg(long, default_value_t = LinearCalibration::VOLTAGE_MV.offset)]
    voltage_offset: f64,

    /// Voltage per raw count (mV).
    #[arg(long, default_value_t = LinearCalibration::VOLTAGE_MV.gain)]
    voltage_gain: f64,
}

impl From<&CalibrationArgs> for Calibration {
    fn from(args: &CalibrationArgs) -> Self {
        Self {
            current: LinearCalibration::new(args.current_offset, args.current_gain),
            voltage: LinearCalibration::new(args.voltage_offset, args.voltage_gain),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Power {
            input,
            output,
            calibration,
        } => {
            let lines = add_power(open(input)?, create(output.as_deref())?, calibration.into())
                .with_context(|| format!("Failed to process {}", input.display()))?;
            info!(lines, "Calibrated log written");
        }
        Command::Median {
            input,
            window,
            output,
        } => {
            let lines = median_filter(open(input)?, create(output.as_deref())?, *window)
                .with_context(|| format!("Failed to filter {}", input.display()))?;
            info!(lines, "Median log written");
        }
        Command::Energy { input, start, end } => {
            let joules = integrate_energy(open(input)?, *start, *end)
                .with_context(|| format!("Failed to integrate {}", input.display()))?;
            println!("energy: {joules}");
        }
    }

    Ok(())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn create(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_calibration_flags() {
        let cli = Cli::parse_from(["pm-analyze", "power", "run.csv"]);
        let Command::Power { calibration, .. } = &cli.command else {
            panic!("expected power command");
        };
        assert_eq!(Calibration::from(calibration), Calibration::default());
    }

    #[test]
    fn test_energy_args() {
        let cli = Cli::parse_from(["pm-analyze", "energy", "run-power.csv", "10", "2000"]);
        assert!(matches!(
            cli.command,
            Command::Energy {
                start: 10,
                end: 2000,
                ..
            }
        ));
    }

    #[test]
    fn test_power_then_energy_files() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.csv");
        let calibrated = dir.path().join("power.csv");
        std::fs::write(&raw, "1000,0,0\n2000,0,0\n").unwrap();

        let calibration = Calibration {
            current: LinearCalibration::new(1000.0, 0.0),
            voltage: LinearCalibration::new(1000.0, 0.0),
        };
        add_power(open(&raw).unwrap(), create(Some(&calibrated)).unwrap(), calibration).unwrap();

        // 1e6 µW over 1000 ns
        let joules = integrate_energy(open(&calibrated).unwrap(), 0, 1000).unwrap();
        assert!((joules - 1e-6).abs() < 1e-18);
    }
}
