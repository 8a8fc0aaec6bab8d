//! THD+N clipping check
//!
//! The test content is a single stationary tone. Notching that tone out of
//! the decoded signal leaves harmonic distortion plus noise; a clipping
//! decoder leaves strong harmonics behind.

use crate::error::{Result, VerificationError};
use crate::notch::NotchFilter;
use crate::{energy_ratio_to_db, PcmBuffer};
use serde::Serialize;
use tracing::debug;

/// Default THD+N limit in dB
pub const THD_N_LIMIT_DB: f64 = -60.0;

/// Transient block length in frames (one AAC frame)
pub const TRANSIENT_BLOCK_LEN: usize = 2048;

/// Blocks excluded at each end of the signal
const TRANSIENT_BLOCKS: usize = 2;

/// Floating-point slack on the limit comparison
const LIMIT_EPSILON_DB: f64 = 1e-9;

/// THD+N of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelThdN {
    pub channel: usize,
    pub energy_before: f64,
    pub energy_after: f64,
    /// `None` for a silent channel
    pub thd_n_db: Option<f64>,
}

/// Result of a passing clipping check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClippingReport {
    pub tone_hz: f64,
    pub limit_db: f64,
    /// Stationary window in frames
    pub window: (usize, usize),
    pub channels: Vec<ChannelThdN>,
}

impl ClippingReport {
    /// Highest THD+N over all non-silent channels
    pub fn worst_thd_n_db(&self) -> Option<f64> {
        self.channels
            .iter()
            .filter_map(|c| c.thd_n_db)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }
}

/// Compare energies before and after notching against `limit_db`
///
/// Returns `10 * log10(after / before)`.
pub fn check_thd_n(energy_before: f64, energy_after: f64, limit_db: f64) -> Result<f64> {
    check_channel_thd_n(0, energy_before, energy_after, limit_db)
}

fn check_channel_thd_n(
    channel: usize,
    energy_before: f64,
    energy_after: f64,
    limit_db: f64,
) -> Result<f64> {
    if !(energy_before > 0.0) {
        return Err(VerificationError::InvalidInput(format!(
            "channel {} has no energy before notch filtering",
            channel
        )));
    }

    let thd_n_db = energy_ratio_to_db(energy_after / energy_before);
    if thd_n_db > limit_db + LIMIT_EPSILON_DB {
        return Err(VerificationError::ClippingThresholdExceeded {
            channel,
            thd_n_db,
            limit_db,
        });
    }
    Ok(thd_n_db)
}

/// Verify the decoded test tone is free of clipping artifacts
///
/// # Arguments
/// * `pcm` - Decoded signal containing a stationary tone
/// * `tone_hz` - Frequency of the test tone
/// * `limit_db` - THD+N limit, usually [`THD_N_LIMIT_DB`]
pub fn check_clipping(pcm: &PcmBuffer, tone_hz: f64, limit_db: f64) -> Result<ClippingReport> {
    pcm.validate()?;

    let frames = pcm.frames();
    let skip = TRANSIENT_BLOCKS * TRANSIENT_BLOCK_LEN;
    if frames <= 2 * skip {
        return Err(VerificationError::InsufficientSegments {
            signal_start: skip,
            available: frames,
            required: 2 * skip + 1,
        });
    }
    let window = skip..frames - skip;

    let energies: Vec<f64> = (0..pcm.params.channels)
        .map(|ch| pcm.channel_energy(ch, window.clone()))
        .collect();
    if energies.iter().all(|&e| e == 0.0) {
        return Err(VerificationError::SignalNotFound {
            samples_per_channel: frames,
        });
    }

    let mut filter = NotchFilter::new(tone_hz, pcm.params.sample_rate)?;
    let filtered = filter.filtered(pcm);

    let mut channels = Vec::with_capacity(pcm.params.channels);
    for (ch, &energy_before) in energies.iter().enumerate() {
        let energy_after = filtered.channel_energy(ch, window.clone());

        let thd_n_db = if energy_before > 0.0 {
            Some(check_channel_thd_n(ch, energy_before, energy_after, limit_db)?)
        } else {
            debug!(channel = ch, "silent channel skipped");
            None
        };

        channels.push(ChannelThdN {
            channel: ch,
            energy_before,
            energy_after,
            thd_n_db,
        });
    }
    debug!(?channels, "THD+N per channel");

    Ok(ClippingReport {
        tone_hz,
        limit_db,
        window: (window.start, window.end),
        channels,
    })
}
