//! Channel-mapping resolution from channel onsets
//!
//! Multichannel test content plays each channel's tone in turn, two blocks
//! per channel. The onset of each decoded channel (in units of those
//! two-block groups) therefore tells which physical speaker it carries.

use crate::error::{Result, VerificationError};
use serde::Serialize;

/// Analyzed channel count from which the front channel order is enforced
pub const MULTICHANNEL_MIN_CHANNELS: usize = 5;

/// Onsets of decoded channels 0..3 when the decoder outputs C, L, R
const CENTER_LEFT_RIGHT: [usize; 3] = [2, 0, 1];

/// Onsets of decoded channels 0..3 when the decoder outputs L, R, C
const LEFT_RIGHT_CENTER: [usize; 3] = [0, 1, 2];

/// Order of the front channels in the decoder output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrontLayout {
    CenterLeftRight,
    LeftRightCenter,
}

/// Validate the front channel order of multichannel output
///
/// Returns `None` for content with fewer than five analyzed channels.
pub fn check_front_layout(onsets: &[Option<usize>]) -> Result<Option<FrontLayout>> {
    if onsets.len() < MULTICHANNEL_MIN_CHANNELS {
        return Ok(None);
    }

    let front = &onsets[..3];
    let matches = |expected: &[usize; 3]| {
        front
            .iter()
            .zip(expected.iter())
            .all(|(onset, &want)| *onset == Some(want))
    };

    if matches(&CENTER_LEFT_RIGHT) {
        Ok(Some(FrontLayout::CenterLeftRight))
    } else if matches(&LEFT_RIGHT_CENTER) {
        Ok(Some(FrontLayout::LeftRightCenter))
    } else {
        Err(VerificationError::WrongChannelMapping {
            onsets: front.to_vec(),
        })
    }
}

/// Map logical positions (playback order) to decoded channel indices
///
/// Every position in `0..effective` must be claimed by exactly one decoded
/// channel. Channels without onset (the LFE) are appended last.
pub fn resolve_channel_map(onsets: &[Option<usize>], effective: usize) -> Result<Vec<usize>> {
    let mut map = Vec::with_capacity(onsets.len());

    for position in 0..effective {
        let claimants: Vec<usize> = onsets
            .iter()
            .enumerate()
            .filter(|(_, onset)| **onset == Some(position))
            .map(|(idx, _)| idx)
            .collect();

        if claimants.len() != 1 {
            return Err(VerificationError::ChannelMappingCollision {
                position,
                occurrences: claimants.len(),
            });
        }
        map.push(claimants[0]);
    }

    map.extend(
        onsets
            .iter()
            .enumerate()
            .filter(|(_, onset)| onset.is_none())
            .map(|(idx, _)| idx),
    );

    Ok(map)
}

/// Decoded order taken as-is
pub fn identity_map(channels: usize) -> Vec<usize> {
    (0..channels).collect()
}
