//! # drccheck
//!
//! DRC (Dynamic Range Control) and loudness verification for black-box
//! AAC/USAC decoders.
//!
//! The decoder under test is treated as a pure function: compressed stream
//! plus [`DrcConfig`] in, interleaved 16-bit PCM out. This crate analyses
//! that PCM to decide whether the decoder applied the DRC and loudness
//! parameters it was given.
//!
//! ## Pipeline
//!
//! ```text
//! Decoder ──► PcmBuffer ──► energy::analyze_energy ──► EnergyReport
//!                 │                  │
//!                 │                  └── mapping (channel onsets, LFE)
//!                 │
//!                 ├──► loudness::check_loudness_ratio  (two decodes)
//!                 └──► clipping::check_clipping        (notch::NotchFilter)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use drccheck::energy::{analyze_energy, AnalysisMode};
//! use drccheck::loudness::{check_report_ratio, norm_factor_from_db};
//! # fn decode(_level: u8) -> drccheck::PcmBuffer { unimplemented!() }
//!
//! let reference = analyze_energy(&decode(64), 2, AnalysisMode::DrcContext).unwrap();
//! let quieter = analyze_energy(&decode(88), 2, AnalysisMode::DrcContext).unwrap();
//!
//! // Target level 88 is 6 dB below level 64
//! check_report_ratio(&quieter, &reference, norm_factor_from_db(-6.0), 0.05).unwrap();
//! ```

pub mod clipping;
pub mod config;
pub mod decoder;
pub mod drc;
pub mod energy;
pub mod error;
pub mod loudness;
pub mod mapping;
pub mod notch;
pub mod verify;

pub use config::VerifyConfig;
pub use decoder::{Decoder, DecoderCatalog, DecoderRegistry};
pub use drc::{DrcConfig, DrcEffectType};
pub use energy::{analyze_energy, AnalysisMode, EnergyReport};
pub use error::{FailureKind, Result, VerificationError};

use std::ops::Range;

/// Output format negotiated by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: usize,
}

impl AudioParams {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// Decoded 16-bit PCM, interleaved by channel (`samples[frame * channels + ch]`)
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub params: AudioParams,
}

impl PcmBuffer {
    /// Wrap interleaved samples, checking the layout is consistent
    pub fn new(samples: Vec<i16>, params: AudioParams) -> Result<Self> {
        let buffer = Self { samples, params };
        buffer.validate()?;
        Ok(buffer)
    }

    /// Check channel count and sample count agree
    pub fn validate(&self) -> Result<()> {
        if self.params.channels == 0 {
            return Err(VerificationError::InvalidInput(
                "buffer has zero channels".into(),
            ));
        }
        if self.samples.len() % self.params.channels != 0 {
            return Err(VerificationError::InvalidInput(format!(
                "{} samples do not divide into {} channels",
                self.samples.len(),
                self.params.channels
            )));
        }
        Ok(())
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.params.channels == 0 {
            return 0;
        }
        self.samples.len() / self.params.channels
    }

    /// Iterate over one channel's samples
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = i16> + '_ {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.params.channels.max(1))
            .copied()
    }

    /// Sum of squared sample values of one channel over a frame range
    pub fn channel_energy(&self, channel: usize, frames: Range<usize>) -> f64 {
        let nch = self.params.channels;
        let end = frames.end.min(self.frames());
        (frames.start..end)
            .map(|frame| {
                let v = self.samples[frame * nch + channel] as f64;
                v * v
            })
            .sum()
    }
}

/// Convert a gain in dB to an energy (power) ratio
pub fn db_to_energy_ratio(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert an energy (power) ratio to dB
pub fn energy_ratio_to_db(ratio: f64) -> f64 {
    10.0 * ratio.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_energy_conversion() {
        assert!((db_to_energy_ratio(10.0) - 10.0).abs() < 1e-12);
        assert!((db_to_energy_ratio(-3.0) - 0.501187).abs() < 1e-6);
        assert!((energy_ratio_to_db(100.0) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_buffer_validation() {
        assert!(PcmBuffer::new(vec![0; 6], AudioParams::new(48000, 2)).is_ok());
        assert!(PcmBuffer::new(vec![0; 5], AudioParams::new(48000, 2)).is_err());
        assert!(PcmBuffer::new(vec![0; 4], AudioParams::new(48000, 0)).is_err());
    }

    #[test]
    fn test_channel_access() {
        let pcm = PcmBuffer::new(vec![1, -2, 3, -4, 5, -6], AudioParams::new(8000, 2)).unwrap();
        assert_eq!(pcm.frames(), 3);
        assert_eq!(pcm.channel(0).collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(pcm.channel(1).collect::<Vec<_>>(), vec![-2, -4, -6]);
        assert_eq!(pcm.channel_energy(1, 0..3), 4.0 + 16.0 + 36.0);
        assert_eq!(pcm.channel_energy(0, 1..10), 9.0 + 25.0);
    }
}
