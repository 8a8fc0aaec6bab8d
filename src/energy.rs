//! Segmental energy analysis of decoded PCM
//!
//! The decoded signal is cut into quarter-second segments starting at the
//! first audible sample. Per-channel segment energies give:
//!
//! 1. the onset of each channel (which speaker it carries),
//! 2. the LFE channel (the one that never rises above the threshold),
//! 3. per-channel and total energies used by the loudness checks.
//!
//! In strict mode the energies are also checked against the layout of the
//! channel-identification test signal: each channel is active for its own
//! window only, at a level close to the first channel.

use crate::error::{EnergyBound, Result, VerificationError};
use crate::mapping::{self, FrontLayout};
use crate::PcmBuffer;
use serde::Serialize;
use tracing::{debug, warn};

/// Segments per one-second block
pub const SEGMENTS_PER_BLOCK: usize = 4;

/// Segments per channel-offset unit (two blocks)
pub const SEGMENTS_PER_GROUP: usize = 2 * SEGMENTS_PER_BLOCK;

/// Samples with a magnitude above this count as signal
const SIGNAL_THRESHOLD: u16 = 1;

/// Zero-energy threshold relative to the loudest segment of the first channel
const ZERO_MAX_ENERGY_RATIO: f64 = 0.001;

/// Minimum window energy relative to the first channel
const MIN_ENERGY_RATIO: f64 = 0.85;

/// Same, for the second channel of a downmix
const DOWNMIX_MIN_ENERGY_RATIO: f64 = 0.50;

/// Share of a window's max energy allowed to bleed into the following segment
const BLEED_RATIO: f64 = 0.2;

/// How strictly the decoded signal is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AnalysisMode {
    /// Content is the staggered channel-identification signal; all checks apply
    #[default]
    Strict,
    /// Arbitrary DRC test content; layout-specific post-checks are skipped
    DrcContext,
}

/// Post-checks that only apply to the channel-identification signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PostCheck {
    /// Front channel order of content with five or more channels
    FrontLayout,
    /// Each logical position claimed by exactly one decoded channel
    ChannelUniqueness,
    /// Min/max window energy against the first channel
    WindowEnergyBounds,
    /// No energy outside a channel's window
    SilenceOutsideWindow,
}

const STRICT_ONLY_CHECKS: [PostCheck; 4] = [
    PostCheck::FrontLayout,
    PostCheck::ChannelUniqueness,
    PostCheck::WindowEnergyBounds,
    PostCheck::SilenceOutsideWindow,
];

/// Energies per analyzed channel and segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentEnergyTable {
    /// Energy of each segment on its own
    pub segment: Vec<Vec<f64>>,
    /// Running total from signal start through the end of each segment
    pub cumulative: Vec<Vec<f64>>,
}

impl SegmentEnergyTable {
    fn build(
        pcm: &PcmBuffer,
        signal_start: usize,
        segment_len: usize,
        segments: usize,
        channels: usize,
    ) -> Self {
        let mut segment = Vec::with_capacity(channels);
        let mut cumulative = Vec::with_capacity(channels);

        for ch in 0..channels {
            let mut running = 0.0;
            let mut seg_row = Vec::with_capacity(segments);
            let mut cum_row = Vec::with_capacity(segments);

            for seg in 0..segments {
                let start = signal_start + seg * segment_len;
                let energy = pcm.channel_energy(ch, start..start + segment_len);
                running += energy;
                seg_row.push(energy);
                cum_row.push(running);
            }

            segment.push(seg_row);
            cumulative.push(cum_row);
        }

        Self {
            segment,
            cumulative,
        }
    }

    pub fn channels(&self) -> usize {
        self.segment.len()
    }

    pub fn segments(&self) -> usize {
        self.segment.first().map_or(0, |row| row.len())
    }
}

/// Outcome of a successful energy analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyReport {
    /// First frame of the signal
    pub signal_start: usize,
    /// Segment length in frames
    pub segment_len: usize,
    /// Number of complete segments after signal start
    pub segments: usize,
    /// Onset group per analyzed channel; `None` for the LFE
    pub onsets: Vec<Option<usize>>,
    /// Decoded index of the channel classified as LFE
    pub lfe_channel: Option<usize>,
    /// Analyzed channels minus the LFE
    pub effective_channels: usize,
    /// Decoded channel index per logical position, LFE last
    pub channel_map: Vec<usize>,
    /// Front order for five or more channels
    pub front_layout: Option<FrontLayout>,
    /// Decoder output has fewer channels than the encoded content
    pub downmix: bool,
    /// Energy per analyzed channel over all segments
    pub channel_energy: Vec<f64>,
    /// Sum of `channel_energy`
    pub total_energy: f64,
    /// Final zero-energy threshold
    pub zero_threshold: f64,
    /// Segment energies before any post-check
    pub table: SegmentEnergyTable,
    /// Post-checks not run in this mode
    pub skipped_checks: Vec<PostCheck>,
}

impl EnergyReport {
    pub fn analyzed_channels(&self) -> usize {
        self.onsets.len()
    }
}

/// Locate the first frame of the signal
///
/// A few low-level nonzero samples right before the real signal are
/// accepted as its start.
fn find_signal_start(samples: &[i16], channels: usize) -> Option<usize> {
    let mut noise_start = None;

    for (i, sample) in samples.iter().enumerate() {
        let magnitude = sample.unsigned_abs();
        let frame = i / channels;

        if magnitude > 0 && noise_start.is_none() {
            noise_start = Some(frame);
        }

        if magnitude > SIGNAL_THRESHOLD {
            let noise = noise_start.unwrap_or(frame);
            return Some(if frame > noise + 1 { frame } else { noise });
        }
    }

    None
}

/// Analyze the segmental energy of a decoded buffer
///
/// # Arguments
/// * `pcm` - Decoder output
/// * `encoded_channels` - Channel count of the encoded content; fewer decoded
///   channels means the decoder downmixed
/// * `mode` - Strict checks for the channel-identification signal, or
///   DRC-context checks for arbitrary content
pub fn analyze_energy(
    pcm: &PcmBuffer,
    encoded_channels: usize,
    mode: AnalysisMode,
) -> Result<EnergyReport> {
    pcm.validate()?;
    if encoded_channels == 0 {
        return Err(VerificationError::InvalidInput(
            "encoded channel count is zero".into(),
        ));
    }

    let channels = pcm.params.channels;
    let segment_len = pcm.params.sample_rate as usize / SEGMENTS_PER_BLOCK;
    if segment_len == 0 {
        return Err(VerificationError::InvalidInput(format!(
            "sample rate {} Hz is too low to segment",
            pcm.params.sample_rate
        )));
    }

    let frames = pcm.frames();
    let proc_channels = channels.min(encoded_channels);
    let downmix = channels < encoded_channels;

    let signal_start =
        find_signal_start(&pcm.samples, channels).ok_or(VerificationError::SignalNotFound {
            samples_per_channel: frames,
        })?;

    let available = frames - signal_start;
    let segments = available / segment_len;
    if segments == 0 {
        return Err(VerificationError::InsufficientSegments {
            signal_start,
            available,
            required: segment_len,
        });
    }
    debug!(signal_start, segment_len, segments, "signal located");

    let table = SegmentEnergyTable::build(pcm, signal_start, segment_len, segments, proc_channels);

    // Onset per channel; the threshold tightens after the first channel
    let mut threshold = (segment_len * segment_len) as f64;
    let mut onsets = Vec::with_capacity(proc_channels);
    for ch in 0..proc_channels {
        let onset = table.cumulative[ch]
            .iter()
            .position(|&e| e > threshold)
            .map(|seg| seg / SEGMENTS_PER_GROUP);
        onsets.push(onset);

        if ch == 0 {
            let max_energy = table.segment[0].iter().copied().fold(0.0, f64::max);
            threshold = ZERO_MAX_ENERGY_RATIO * max_energy;
        }
    }
    debug!(?onsets, threshold, "channel onsets");

    let silent: Vec<usize> = onsets
        .iter()
        .enumerate()
        .filter(|(_, onset)| onset.is_none())
        .map(|(ch, _)| ch)
        .collect();
    if silent.len() > 1 {
        return Err(VerificationError::MultipleLfeDetected { channels: silent });
    }
    let lfe_channel = silent.first().copied();
    let effective_channels = proc_channels - silent.len();

    // Multichannel DRC content starts every channel together; the order is
    // only reported there
    let front_layout = match mode {
        AnalysisMode::Strict => mapping::check_front_layout(&onsets)?,
        AnalysisMode::DrcContext => mapping::check_front_layout(&onsets).ok().flatten(),
    };
    check_coverage(&table, threshold)?;

    let (channel_map, skipped_checks) = match mode {
        AnalysisMode::Strict => {
            let map = mapping::resolve_channel_map(&onsets, effective_channels)?;
            let windows = WindowLayout {
                onsets: &onsets,
                channel_map: &map,
                effective_channels,
                segments,
                encoded_channels,
                downmix,
            };
            check_windows(&table, &windows, threshold)?;
            (map, Vec::new())
        }
        AnalysisMode::DrcContext => {
            warn!(
                skipped = ?STRICT_ONLY_CHECKS,
                "DRC-context analysis: channel layout post-checks not run"
            );
            (
                mapping::identity_map(proc_channels),
                STRICT_ONLY_CHECKS.to_vec(),
            )
        }
    };

    let channel_energy: Vec<f64> = table
        .cumulative
        .iter()
        .map(|row| row.last().copied().unwrap_or(0.0))
        .collect();
    let total_energy = channel_energy.iter().sum();

    Ok(EnergyReport {
        signal_start,
        segment_len,
        segments,
        onsets,
        lfe_channel,
        effective_channels,
        channel_map,
        front_layout,
        downmix,
        channel_energy,
        total_energy,
        zero_threshold: threshold,
        table,
        skipped_checks,
    })
}

/// Where each channel is expected to carry signal
struct WindowLayout<'a> {
    onsets: &'a [Option<usize>],
    channel_map: &'a [usize],
    effective_channels: usize,
    segments: usize,
    encoded_channels: usize,
    downmix: bool,
}

impl WindowLayout<'_> {
    /// Segment range `[start, end)` of a channel's window
    fn window(&self, position: usize, channel: usize) -> Option<(usize, usize)> {
        let start = self.onsets[channel]? * SEGMENTS_PER_GROUP;
        if position >= self.effective_channels || start >= self.segments {
            return None;
        }

        // The first channel of mono/stereo content plays throughout
        let end = if self.encoded_channels <= 2 && position == 0 {
            self.segments
        } else {
            (start + SEGMENTS_PER_GROUP).min(self.segments)
        };
        Some((start, end))
    }
}

/// Window energy bounds and silence outside the windows
fn check_windows(table: &SegmentEnergyTable, layout: &WindowLayout, threshold: f64) -> Result<()> {
    let mut energy = table.segment.clone();
    // (end of window, max window energy) per decoded channel
    let mut verified: Vec<Option<(usize, f64)>> = vec![None; table.channels()];

    // Minimum window energy of decoded channel 0; the channel at position 0
    // stands in when channel 0 is the LFE
    let reference_channel = layout
        .channel_map
        .iter()
        .position(|&ch| ch == 0)
        .and_then(|position| layout.window(position, 0).map(|w| (0, w)))
        .or_else(|| {
            let &ch = layout.channel_map.first()?;
            layout.window(0, ch).map(|w| (ch, w))
        });
    let reference = reference_channel
        .map(|(ch, (start, end))| {
            energy[ch][start..end]
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min)
        })
        .unwrap_or(0.0);

    for (position, &ch) in layout.channel_map.iter().enumerate() {
        let Some((start, end)) = layout.window(position, ch) else {
            continue;
        };

        let window = &energy[ch][start..end];
        let min = window.iter().copied().fold(f64::INFINITY, f64::min);
        let max = window.iter().copied().fold(0.0, f64::max);

        let ratio = if layout.downmix && position == 1 {
            DOWNMIX_MIN_ENERGY_RATIO
        } else {
            MIN_ENERGY_RATIO
        };
        let expected = reference * ratio;

        for (bound, measured) in [(EnergyBound::Max, max), (EnergyBound::Min, min)] {
            if measured <= expected {
                return Err(VerificationError::SegmentEnergyOutOfBounds {
                    channel: ch,
                    bound,
                    measured,
                    expected,
                });
            }
        }

        energy[ch][start..end].fill(0.0);
        verified[ch] = Some((end, max));
    }

    for (ch, row) in energy.iter().enumerate() {
        for (segment, &measured) in row.iter().enumerate() {
            if measured < threshold {
                continue;
            }

            let bleed = verified[ch]
                .is_some_and(|(end, max)| segment == end && measured < BLEED_RATIO * max);
            if !bleed {
                return Err(VerificationError::UnexpectedSignalInSilentSegment {
                    channel: ch,
                    segment,
                    measured,
                    threshold,
                });
            }
        }
    }

    Ok(())
}

/// Every segment must carry signal in at least one channel
fn check_coverage(table: &SegmentEnergyTable, threshold: f64) -> Result<()> {
    for segment in 0..table.segments() {
        if !table.segment.iter().any(|row| row[segment] > threshold) {
            return Err(VerificationError::SilentSegment { segment, threshold });
        }
    }
    Ok(())
}
