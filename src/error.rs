//! Failure taxonomy for the verification engine
//!
//! Every check in this crate fails fast with one of these variants. The
//! variants carry the channel, segment and measured values involved so a
//! caller can tell failure kinds apart without parsing messages.

use std::fmt;
use thiserror::Error;

/// Result type for analysis and checks
pub type Result<T> = std::result::Result<T, VerificationError>;

/// Which energy bound of a channel's active window was violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyBound {
    /// Lowest segment energy inside the window
    Min,
    /// Highest segment energy inside the window
    Max,
}

impl fmt::Display for EnergyBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergyBound::Min => f.write_str("min"),
            EnergyBound::Max => f.write_str("max"),
        }
    }
}

/// Discriminant of [`VerificationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    SignalNotFound,
    InsufficientSegments,
    MultipleLfeDetected,
    WrongChannelMapping,
    ChannelMappingCollision,
    SegmentEnergyOutOfBounds,
    UnexpectedSignalInSilentSegment,
    SilentSegment,
    LoudnessRatioOutOfTolerance,
    EnergyNotMonotonic,
    ClippingThresholdExceeded,
    InvalidInput,
}

/// A failed verification step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    /// The decoder produced silence (no sample above the detection threshold)
    #[error("no signal found in any channel ({samples_per_channel} samples per channel)")]
    SignalNotFound { samples_per_channel: usize },

    /// Not enough samples after signal start to fill one segment/window
    #[error(
        "no segments left to test: {available} samples available from offset {signal_start}, {required} required"
    )]
    InsufficientSegments {
        signal_start: usize,
        available: usize,
        required: usize,
    },

    /// More than one analyzed channel never rose above the energy threshold
    #[error("more than one LFE detected (channels without signal: {channels:?})")]
    MultipleLfeDetected { channels: Vec<usize> },

    /// The first three channel onsets match neither C/L/R nor L/R/C
    #[error("wrong front channel mapping (onsets {onsets:?})")]
    WrongChannelMapping { onsets: Vec<Option<usize>> },

    /// A logical channel position was claimed by zero or several decoded channels
    #[error("channel {position} occurs {occurrences} times in the mapping")]
    ChannelMappingCollision { position: usize, occurrences: usize },

    /// Active-window energy of a channel is too low compared to the first channel
    #[error(
        "{bound} energy of channel {channel} is too low ({measured:.1} <= {expected:.1})"
    )]
    SegmentEnergyOutOfBounds {
        channel: usize,
        bound: EnergyBound,
        measured: f64,
        expected: f64,
    },

    /// Energy found where the channel should be silent
    #[error(
        "unexpected energy in segment {segment} of channel {channel} ({measured:.1} >= {threshold:.1})"
    )]
    UnexpectedSignalInSilentSegment {
        channel: usize,
        segment: usize,
        measured: f64,
        threshold: f64,
    },

    /// No analyzed channel carries energy in this segment
    #[error("no channel has energy in segment {segment} (threshold {threshold:.1})")]
    SilentSegment { segment: usize, threshold: f64 },

    /// Normalized energy ratio of two decodes is outside the tolerance band
    #[error(
        "energy ratio {ratio:.4} normalized to {normalized:.4} is outside 1.0 +/- {tolerance}"
    )]
    LoudnessRatioOutOfTolerance {
        ratio: f64,
        normalized: f64,
        tolerance: f64,
    },

    /// Changing the target level moved the energy the wrong way
    #[error(
        "energy not monotonic: level {baseline_level} -> {test_level} changed energy {baseline_energy:.1} -> {test_energy:.1}"
    )]
    EnergyNotMonotonic {
        baseline_level: u8,
        baseline_energy: f64,
        test_level: u8,
        test_energy: f64,
    },

    /// Residual after notching the test tone is above the THD+N limit
    #[error("THD+N of channel {channel} is {thd_n_db:.2} dB (limit {limit_db:.2} dB)")]
    ClippingThresholdExceeded {
        channel: usize,
        thd_n_db: f64,
        limit_db: f64,
    },

    /// Parameters that make the analysis meaningless
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl VerificationError {
    /// Failure kind without the context payload
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SignalNotFound { .. } => FailureKind::SignalNotFound,
            Self::InsufficientSegments { .. } => FailureKind::InsufficientSegments,
            Self::MultipleLfeDetected { .. } => FailureKind::MultipleLfeDetected,
            Self::WrongChannelMapping { .. } => FailureKind::WrongChannelMapping,
            Self::ChannelMappingCollision { .. } => FailureKind::ChannelMappingCollision,
            Self::SegmentEnergyOutOfBounds { .. } => FailureKind::SegmentEnergyOutOfBounds,
            Self::UnexpectedSignalInSilentSegment { .. } => {
                FailureKind::UnexpectedSignalInSilentSegment
            }
            Self::SilentSegment { .. } => FailureKind::SilentSegment,
            Self::LoudnessRatioOutOfTolerance { .. } => FailureKind::LoudnessRatioOutOfTolerance,
            Self::EnergyNotMonotonic { .. } => FailureKind::EnergyNotMonotonic,
            Self::ClippingThresholdExceeded { .. } => FailureKind::ClippingThresholdExceeded,
            Self::InvalidInput(_) => FailureKind::InvalidInput,
        }
    }
}
