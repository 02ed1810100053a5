//! Linear conversion of raw converter readings to physical units.

use serde::{Deserialize, Serialize};

/// `offset + gain * raw`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearCalibration {
    /// Value at a raw reading of zero.
    pub offset: f64,
    /// Change per raw count.
    pub gain: f64,
}

impl LinearCalibration {
    /// Default current calibration of the measurement front end, in mA.
    pub const CURRENT_MA: Self = Self::new(26.722, 0.9904);

    /// Default voltage calibration of the measurement front end, in mV.
    pub const VOLTAGE_MV: Self = Self::new(6.787, 1.236);

    /// Create a calibration.
    #[must_use]
    pub const fn new(offset: f64, gain: f64) -> Self {
        Self { offset, gain }
    }

    /// Convert a raw reading.
    #[must_use]
    pub fn apply(&self, raw: u16) -> f64 {
        self.offset + f64::from(raw) * self.gain
    }
}

/// Calibration of both inputs: input A measures current, input B voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Input A to mA.
    pub current: LinearCalibration,
    /// Input B to mV.
    pub voltage: LinearCalibration,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            current: LinearCalibration::CURRENT_MA,
            voltage: LinearCalibration::VOLTAGE_MV,
        }
    }
}
