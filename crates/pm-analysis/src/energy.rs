//! Trapezoidal energy integration over a time range of a calibrated log.

use crate::{power_samples, AnalysisError, AnalysisResult};
use std::io::Read;
use tracing::debug;

/// µW·ns per joule.
const MICROWATT_NANOSECONDS_PER_JOULE: f64 = 1e15;

/// Accumulates `(t1 - t0) * (p0 + p1) / 2` over samples whose offset time
/// lies in `[start_ns, end_ns]`.
#[derive(Debug, Clone)]
pub struct EnergyIntegrator {
    start_ns: u64,
    end_ns: u64,
    last: Option<(u64, f64)>,
    accumulated: f64,
    samples: u64,
}

impl EnergyIntegrator {
    /// Create an integrator over the inclusive range `[start_ns, end_ns]`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidRange`] if `start_ns > end_ns`.
    pub fn new(start_ns: u64, end_ns: u64) -> AnalysisResult<Self> {
        if start_ns > end_ns {
            return Err(AnalysisError::InvalidRange {
                start: start_ns,
                end: end_ns,
            });
        }
        Ok(Self {
            start_ns,
            end_ns,
            last: None,
            accumulated: 0.0,
            samples: 0,
        })
    }

    /// Add a power sample (µW) at `offset_ns`. Samples outside the range are
    /// ignored.
    pub fn push(&mut self, offset_ns: u64, power: f64) {
        if !(self.start_ns..=self.end_ns).contains(&offset_ns) {
            return;
        }
        if let Some((last_ns, last_power)) = self.last {
            #[allow(clippy::cast_precision_loss)]
            let dt = offset_ns.abs_diff(last_ns) as f64;
            self.accumulated += dt * (last_power + power) / 2.0;
        }
        self.last = Some((offset_ns, power));
        self.samples += 1;
    }

    /// Samples inside the range so far.
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Integrated energy in joules.
    #[must_use]
    pub fn joules(&self) -> f64 {
        self.accumulated / MICROWATT_NANOSECONDS_PER_JOULE
    }
}

/// Integrate the power column of a calibrated log between two offsets.
///
/// # Errors
///
/// Returns [`AnalysisError::InvalidRange`] for an empty range, or an error
/// on the first malformed line.
pub fn integrate_energy<R: Read>(input: R, start_ns: u64, end_ns: u64) -> AnalysisResult<f64> {
    let mut integrator = EnergyIntegrator::new(start_ns, end_ns)?;
    for sample in power_samples(input) {
        let sample = sample?;
        integrator.push(sample.offset_ns, sample.power);
    }
    debug!(samples = integrator.samples(), "Energy stage finished");
    Ok(integrator.joules())
}
