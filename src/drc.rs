//! DRC / loudness configuration handed to the decoder under test
//!
//! Mirrors the parameter set an AAC/USAC decoder accepts: boost and cut
//! factors, target reference level, heavy compression and the MPEG-D DRC
//! effect type.

use crate::error::{Result, VerificationError};
use serde::{Deserialize, Serialize};

/// Maximum value of boost, cut and target reference level
pub const DRC_PARAM_MAX: u8 = 127;

/// Target reference level step in dB (level 64 = -16 dBFS)
pub const TARGET_LEVEL_STEP_DB: f64 = 0.25;

/// Decoder default target reference level (-16 dBFS)
pub const DEFAULT_TARGET_LEVEL: u8 = 64;

/// MPEG-D DRC effect type request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrcEffectType {
    /// DRC processing switched off
    Off,
    /// No effect requested
    None,
    LateNight,
    NoisyEnvironment,
    LimitedRange,
    LowPlaybackLevel,
    DialogEnhancement,
    GeneralCompression,
}

impl DrcEffectType {
    /// Platform integer code (-1 = off)
    pub fn code(&self) -> i32 {
        match self {
            DrcEffectType::Off => -1,
            DrcEffectType::None => 0,
            DrcEffectType::LateNight => 1,
            DrcEffectType::NoisyEnvironment => 2,
            DrcEffectType::LimitedRange => 3,
            DrcEffectType::LowPlaybackLevel => 4,
            DrcEffectType::DialogEnhancement => 5,
            DrcEffectType::GeneralCompression => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => DrcEffectType::Off,
            0 => DrcEffectType::None,
            1 => DrcEffectType::LateNight,
            2 => DrcEffectType::NoisyEnvironment,
            3 => DrcEffectType::LimitedRange,
            4 => DrcEffectType::LowPlaybackLevel,
            5 => DrcEffectType::DialogEnhancement,
            6 => DrcEffectType::GeneralCompression,
            _ => return None,
        })
    }
}

/// Immutable DRC parameter set for one decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrcConfig {
    /// Boost factor, 0..=127
    pub boost: u8,
    /// Cut (attenuation) factor, 0..=127
    pub cut: u8,
    /// Target reference level in -0.25 dBFS steps, 0..=127
    pub target_ref_level: u8,
    /// RF-mode heavy compression
    pub heavy_compression: bool,
    /// Requested effect type; `None` leaves the decoder default
    pub effect_type: Option<DrcEffectType>,
}

impl Default for DrcConfig {
    fn default() -> Self {
        Self {
            boost: DRC_PARAM_MAX,
            cut: DRC_PARAM_MAX,
            target_ref_level: DEFAULT_TARGET_LEVEL,
            heavy_compression: true,
            effect_type: None,
        }
    }
}

fn check_range(name: &str, value: u8) -> Result<u8> {
    if value > DRC_PARAM_MAX {
        return Err(VerificationError::InvalidInput(format!(
            "{} {} is out of range 0..={}",
            name, value, DRC_PARAM_MAX
        )));
    }
    Ok(value)
}

impl DrcConfig {
    pub fn with_boost(mut self, boost: u8) -> Result<Self> {
        self.boost = check_range("boost", boost)?;
        Ok(self)
    }

    pub fn with_cut(mut self, cut: u8) -> Result<Self> {
        self.cut = check_range("cut", cut)?;
        Ok(self)
    }

    pub fn with_target_level(mut self, level: u8) -> Result<Self> {
        self.target_ref_level = check_range("target reference level", level)?;
        Ok(self)
    }

    pub fn with_heavy_compression(mut self, heavy: bool) -> Self {
        self.heavy_compression = heavy;
        self
    }

    pub fn with_effect_type(mut self, effect: DrcEffectType) -> Self {
        self.effect_type = Some(effect);
        self
    }

    /// Check every field is in range (values deserialized from JSON skip the builders)
    pub fn validate(&self) -> Result<()> {
        check_range("boost", self.boost)?;
        check_range("cut", self.cut)?;
        check_range("target reference level", self.target_ref_level)?;
        Ok(())
    }

    /// Target reference level in dBFS
    pub fn target_level_db(&self) -> f64 {
        -TARGET_LEVEL_STEP_DB * self.target_ref_level as f64
    }

    /// Expected output gain of `self` relative to `reference`, in dB
    ///
    /// Only the target level contributes; effect types and compression
    /// modes have content-dependent gains.
    pub fn gain_relative_to(&self, reference: &DrcConfig) -> f64 {
        self.target_level_db() - reference.target_level_db()
    }

    /// Effect type code as passed to the decoder (-1 when absent)
    pub fn effect_type_code(&self) -> i32 {
        self.effect_type.map(|e| e.code()).unwrap_or(-1)
    }
}
