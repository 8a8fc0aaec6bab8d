//! Verification settings
//!
//! Defaults reproduce the platform conformance thresholds. A JSON file can
//! override any subset of them:
//!
//! ```json
//! { "general_tolerance": 0.05, "thd_n_limit_db": -60.0, "test_tone_hz": 1000.0 }
//! ```

use crate::clipping::THD_N_LIMIT_DB;
use crate::loudness::{ToleranceClass, GENERAL_TOLERANCE, STREAM_SWITCH_TOLERANCE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default test tone of the clipping content
pub const DEFAULT_TEST_TONE_HZ: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Loudness ratio tolerance for steady-state comparisons
    pub general_tolerance: f64,
    /// Loudness ratio tolerance for mid-stream configuration switches
    pub stream_switch_tolerance: f64,
    /// THD+N limit for the clipping check, in dB
    pub thd_n_limit_db: f64,
    /// Frequency of the clipping test tone, in Hz
    pub test_tone_hz: f64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            general_tolerance: GENERAL_TOLERANCE,
            stream_switch_tolerance: STREAM_SWITCH_TOLERANCE,
            thd_n_limit_db: THD_N_LIMIT_DB,
            test_tone_hz: DEFAULT_TEST_TONE_HZ,
        }
    }
}

impl VerifyConfig {
    /// Load settings from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("general_tolerance", self.general_tolerance),
            ("stream_switch_tolerance", self.stream_switch_tolerance),
        ] {
            if !(value > 0.0 && value < 1.0) {
                anyhow::bail!("{} must be in (0, 1), got {}", name, value);
            }
        }
        if !(self.thd_n_limit_db < 0.0) {
            anyhow::bail!("thd_n_limit_db must be negative, got {}", self.thd_n_limit_db);
        }
        if !(self.test_tone_hz > 0.0) {
            anyhow::bail!("test_tone_hz must be positive, got {}", self.test_tone_hz);
        }
        Ok(())
    }

    /// Tolerance fraction for a class
    pub fn tolerance(&self, class: ToleranceClass) -> f64 {
        match class {
            ToleranceClass::General => self.general_tolerance,
            ToleranceClass::StreamSwitch => self.stream_switch_tolerance,
        }
    }
}
