//! Loudness / DRC energy-ratio checks
//!
//! The same stream is decoded under two DRC configurations. The ratio of
//! the two total energies, normalized by the gain the configurations should
//! produce, has to land within a tolerance band around 1.0.

use crate::energy::EnergyReport;
use crate::error::{Result, VerificationError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tolerance for steady-state loudness comparisons (+/- 5%)
pub const GENERAL_TOLERANCE: f64 = 0.05;

/// Tolerance when the configuration changes mid-stream (+/- 15%)
pub const STREAM_SWITCH_TOLERANCE: f64 = 0.15;

/// Which tolerance band a comparison uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceClass {
    #[default]
    General,
    /// Configuration switched during playback; transients at the switch
    /// point widen the band
    StreamSwitch,
}

impl ToleranceClass {
    pub fn default_fraction(&self) -> f64 {
        match self {
            ToleranceClass::General => GENERAL_TOLERANCE,
            ToleranceClass::StreamSwitch => STREAM_SWITCH_TOLERANCE,
        }
    }
}

/// Normalization factor for a level difference of `delta_db`
///
/// `1 / 10^(delta_db / 10)`, where `delta_db` is the gain of the first decode
/// over the second. A first decode 6 dB quieter (`delta_db = -6`) gives 3.98,
/// which scales the measured energy ratio back to 1.0.
pub fn norm_factor_from_db(delta_db: f64) -> f64 {
    1.0 / 10f64.powf(delta_db / 10.0)
}

/// Compare two energies against an expected normalization factor
///
/// Computes `ratio = energy_a / energy_b` and passes when
/// `|ratio * norm_factor - 1| <= tolerance`. Returns the normalized ratio.
pub fn check_loudness_ratio(
    energy_a: f64,
    energy_b: f64,
    norm_factor: f64,
    tolerance: f64,
) -> Result<f64> {
    if !(energy_b.is_finite() && energy_b > 0.0) {
        return Err(VerificationError::InvalidInput(format!(
            "reference energy {} must be positive",
            energy_b
        )));
    }
    if !(norm_factor.is_finite() && norm_factor > 0.0) {
        return Err(VerificationError::InvalidInput(format!(
            "normalization factor {} must be positive",
            norm_factor
        )));
    }

    let ratio = energy_a / energy_b;
    let normalized = ratio * norm_factor;
    debug!(ratio, normalized, tolerance, "loudness ratio");

    if (normalized - 1.0).abs() > tolerance {
        return Err(VerificationError::LoudnessRatioOutOfTolerance {
            ratio,
            normalized,
            tolerance,
        });
    }

    Ok(normalized)
}

/// [`check_loudness_ratio`] on the total energies of two analyses
pub fn check_report_ratio(
    report_a: &EnergyReport,
    report_b: &EnergyReport,
    norm_factor: f64,
    tolerance: f64,
) -> Result<f64> {
    check_loudness_ratio(
        report_a.total_energy,
        report_b.total_energy,
        norm_factor,
        tolerance,
    )
}

/// Total energy measured at a target reference level
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelEnergy {
    /// Target reference level (-0.25 dBFS steps; lower is louder)
    pub target_level: u8,
    pub energy: f64,
}

/// Direction check independent of the exact ratio
///
/// Lowering the target level value (louder output) must not reduce energy
/// and raising it must not increase energy.
pub fn check_monotonic(baseline: LevelEnergy, test: LevelEnergy) -> Result<()> {
    let ok = match test.target_level.cmp(&baseline.target_level) {
        std::cmp::Ordering::Less => test.energy >= baseline.energy,
        std::cmp::Ordering::Greater => test.energy <= baseline.energy,
        std::cmp::Ordering::Equal => true,
    };

    if !ok {
        return Err(VerificationError::EnergyNotMonotonic {
            baseline_level: baseline.target_level,
            baseline_energy: baseline.energy,
            test_level: test.target_level,
            test_energy: test.energy,
        });
    }
    Ok(())
}
