//! Integration tests for drccheck
//!
//! Tests include:
//! - Synthetic decoders driving the scenario orchestrator
//! - Suite runs over a fake decoder registry
//! - Property-based tests with proptest

use drccheck::decoder::MIME_AAC;
use drccheck::energy::{analyze_energy, AnalysisMode};
use drccheck::loudness::{check_loudness_ratio, ToleranceClass, GENERAL_TOLERANCE};
use drccheck::notch::NotchFilter;
use drccheck::verify::{
    target_level_sweep, ClippingScenario, LayoutScenario, LoudnessScenario, Scenario,
    ScenarioOutcome, Suite, Verifier,
};
use drccheck::{
    AudioParams, Decoder, DecoderCatalog, DecoderRegistry, DrcConfig, FailureKind, PcmBuffer,
    VerificationError, VerifyConfig,
};
use proptest::prelude::*;

// ========== Helper Functions ==========

const RATE: u32 = 48000;

/// Amplitude of the test tone at the default target level
const BASE_AMPLITUDE: f64 = 8000.0;

/// Interleaved 1 kHz sine, identical on every channel
fn generate_sine(channels: usize, amplitude: f64, ceiling: f64, duration_secs: f64) -> PcmBuffer {
    let frames = (RATE as f64 * duration_secs) as usize;
    let mut samples = Vec::with_capacity(frames * channels);

    for i in 0..frames {
        let t = i as f64 / RATE as f64;
        let v = (amplitude * (2.0 * std::f64::consts::PI * 1000.0 * t).sin())
            .clamp(-ceiling, ceiling);
        for _ in 0..channels {
            samples.push(v as i16);
        }
    }

    PcmBuffer::new(samples, AudioParams::new(RATE, channels)).unwrap()
}

/// Stereo identification signal: `full` plays every segment, the other
/// channel only the second group
fn identification_signal(full: usize) -> PcmBuffer {
    let seg = RATE as usize / 4;
    let frames = 16 * seg;
    let mut samples = vec![0i16; frames * 2];

    for frame in 0..frames {
        let value = if frame % 2 == 0 { 1000 } else { -1000 };
        samples[frame * 2 + full] = value;
        if frame >= 8 * seg {
            samples[frame * 2 + (1 - full)] = value;
        }
    }

    PcmBuffer::new(samples, AudioParams::new(RATE, 2)).unwrap()
}

/// How a fake decoder responds to the DRC configuration
#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Output level follows the target level exactly
    Compliant,
    /// Output level never changes
    IgnoresDrc,
    /// Gain applied with the wrong sign
    Inverted,
    /// Energy 10% above the expected value whenever the level moves
    Sloppy,
    /// Compliant, but hard-clips at the given sample value
    Clipping(f64),
    /// Emits the stereo identification signal, optionally swapped
    Identification { swapped: bool },
}

struct FakeDecoder {
    name: String,
    behavior: Behavior,
}

impl FakeDecoder {
    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
        }
    }
}

impl Decoder for FakeDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, stream: &[u8], drc: &DrcConfig) -> anyhow::Result<PcmBuffer> {
        if stream.is_empty() {
            anyhow::bail!("empty stream");
        }

        let gain_db = drc.gain_relative_to(&DrcConfig::default());
        let amplitude = |db: f64| BASE_AMPLITUDE * 10f64.powf(db / 20.0);

        Ok(match self.behavior {
            Behavior::Compliant => generate_sine(2, amplitude(gain_db), f64::MAX, 2.0),
            Behavior::IgnoresDrc => generate_sine(2, BASE_AMPLITUDE, f64::MAX, 2.0),
            Behavior::Inverted => generate_sine(2, amplitude(-gain_db), f64::MAX, 2.0),
            Behavior::Sloppy => {
                let extra = if gain_db != 0.0 { 1.1f64.sqrt() } else { 1.0 };
                generate_sine(2, amplitude(gain_db) * extra, f64::MAX, 2.0)
            }
            Behavior::Clipping(ceiling) => generate_sine(2, amplitude(gain_db), ceiling, 2.0),
            Behavior::Identification { swapped } => {
                identification_signal(if swapped { 1 } else { 0 })
            }
        })
    }
}

struct FakeRegistry;

impl DecoderRegistry for FakeRegistry {
    fn decoder_names(&self, mime: &str) -> Vec<String> {
        if mime == MIME_AAC {
            vec!["fake.compliant".to_string(), "fake.flat".to_string()]
        } else {
            Vec::new()
        }
    }

    fn open(&self, name: &str) -> anyhow::Result<Box<dyn Decoder>> {
        let behavior = match name {
            "fake.compliant" => Behavior::Compliant,
            "fake.flat" => Behavior::IgnoresDrc,
            _ => anyhow::bail!("no such decoder: {}", name),
        };
        Ok(Box::new(FakeDecoder::new(name, behavior)))
    }
}

const STREAM: &[u8] = b"synthetic";

fn failure_kind(error: &anyhow::Error) -> Option<FailureKind> {
    error
        .downcast_ref::<VerificationError>()
        .map(VerificationError::kind)
}

// ========== Property-Based Tests ==========

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Filtering silence twice leaves silence
    #[test]
    fn notch_on_silence_is_idempotent(
        frequency in 20.0f64..3000.0,
        rate_index in 0usize..4,
        len in 0usize..4096,
    ) {
        let sample_rate = [8000u32, 16000, 44100, 48000][rate_index];
        let mut filter = NotchFilter::new(frequency, sample_rate).unwrap();
        let mut buffer = vec![0i16; len];

        filter.apply(&mut buffer, 0, 1);
        filter.apply(&mut buffer, 0, 1);

        prop_assert!(buffer.iter().all(|&s| s == 0));
    }

    /// Every segment after signal start has a channel above the zero
    /// threshold, and the segments leave less than one segment over
    #[test]
    fn segments_cover_signal(
        channels in 1usize..=4,
        amplitudes in prop::collection::vec(1000i16..20000, 4),
        masks in prop::collection::vec(any::<u16>(), 4),
        lead_in in 0usize..500,
        segments in 1usize..10,
        tail in 0usize..2000,
    ) {
        let sample_rate = 8000u32;
        let segment_len = 2000;
        let frames = lead_in + segments * segment_len + tail;
        let mut samples = vec![0i16; frames * channels];

        // channel 0 plays throughout; the others in a random subset of
        // segments that always includes the first
        for frame in lead_in..frames {
            let i = frame - lead_in;
            let segment = i / segment_len;
            for ch in 0..channels {
                let active = ch == 0
                    || (segment < segments && (segment == 0 || masks[ch] & (1 << (segment % 16)) != 0));
                if active {
                    let amplitude = amplitudes[ch];
                    samples[frame * channels + ch] = if i % 2 == 0 { amplitude } else { -amplitude };
                }
            }
        }
        let pcm = PcmBuffer::new(samples, AudioParams::new(sample_rate, channels)).unwrap();

        let report = analyze_energy(&pcm, channels, AnalysisMode::DrcContext).unwrap();
        let covered = report.segments * report.segment_len;

        prop_assert_eq!(report.signal_start, lead_in);
        prop_assert_eq!(report.segment_len, segment_len);
        prop_assert_eq!(report.segments, segments);
        prop_assert!(frames - (report.signal_start + covered) < report.segment_len);
        prop_assert_eq!(report.table.segment.len(), channels);
        prop_assert!((0..report.segments).all(|seg| report
            .table
            .segment
            .iter()
            .any(|row| row[seg] > report.zero_threshold)));
    }

    /// Ratios inside the band pass, ratios outside fail
    #[test]
    fn ratio_band(
        energy_b in 1.0f64..1e12,
        norm_factor in 0.01f64..100.0,
        inside in -0.045f64..0.045,
        outside in 0.055f64..0.5,
        below in any::<bool>(),
    ) {
        let energy_a = energy_b / norm_factor * (1.0 + inside);
        let normalized =
            check_loudness_ratio(energy_a, energy_b, norm_factor, GENERAL_TOLERANCE).unwrap();
        prop_assert!((normalized - 1.0 - inside).abs() < 1e-9);

        let deviation = if below { -outside } else { outside };
        let energy_a = energy_b / norm_factor * (1.0 + deviation);
        let err = check_loudness_ratio(energy_a, energy_b, norm_factor, GENERAL_TOLERANCE)
            .unwrap_err();
        prop_assert_eq!(err.kind(), FailureKind::LoudnessRatioOutOfTolerance);
    }
}

// ========== Loudness Scenarios ==========

#[test]
fn test_energy_monotonic_across_target_levels() {
    let config = VerifyConfig::default();
    let decoder = FakeDecoder::new("fake.compliant", Behavior::Compliant);
    let verifier = Verifier::new(&decoder, &config);

    let energies: Vec<f64> = [40u8, 64, 80, 96, 124]
        .iter()
        .map(|&level| {
            let drc = DrcConfig::default().with_target_level(level).unwrap();
            verifier
                .decode_and_analyze(STREAM, &drc, 2, AnalysisMode::DrcContext)
                .unwrap()
                .total_energy
        })
        .collect();

    for pair in energies.windows(2) {
        assert!(pair[0] > pair[1], "energies not decreasing: {:?}", energies);
    }
}

#[test]
fn test_compliant_decoder_passes_six_db() {
    let config = VerifyConfig::default();
    let decoder = FakeDecoder::new("fake.compliant", Behavior::Compliant);
    let verifier = Verifier::new(&decoder, &config);

    let scenario = LoudnessScenario::target_levels("-22 dBFS", 2, 64, 88).unwrap();
    let outcome = verifier.verify_loudness(STREAM, &scenario).unwrap();

    assert_eq!(outcome.expected_gain_db, -6.0);
    assert!((outcome.normalized_ratio - 1.0).abs() < 0.01);
    assert!(outcome.test_energy < outcome.reference_energy);
    assert_eq!(outcome.tolerance, GENERAL_TOLERANCE);
}

#[test]
fn test_decoder_ignoring_drc_fails_ratio() {
    let config = VerifyConfig::default();
    let decoder = FakeDecoder::new("fake.flat", Behavior::IgnoresDrc);
    let verifier = Verifier::new(&decoder, &config);

    let scenario = LoudnessScenario::target_levels("-22 dBFS", 2, 64, 88).unwrap();
    let err = verifier.verify_loudness(STREAM, &scenario).unwrap_err();
    assert_eq!(
        failure_kind(&err),
        Some(FailureKind::LoudnessRatioOutOfTolerance)
    );
}

#[test]
fn test_inverted_gain_is_not_monotonic() {
    let config = VerifyConfig::default();
    let decoder = FakeDecoder::new("fake.inverted", Behavior::Inverted);
    let verifier = Verifier::new(&decoder, &config);

    let scenario = LoudnessScenario::target_levels("-22 dBFS", 2, 64, 88).unwrap();
    let err = verifier.verify_loudness(STREAM, &scenario).unwrap_err();
    match err.downcast_ref::<VerificationError>() {
        Some(VerificationError::EnergyNotMonotonic {
            baseline_level,
            test_level,
            ..
        }) => {
            assert_eq!(*baseline_level, 64);
            assert_eq!(*test_level, 88);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_stream_switch_tolerance_is_wider() {
    let config = VerifyConfig::default();
    let decoder = FakeDecoder::new("fake.sloppy", Behavior::Sloppy);
    let verifier = Verifier::new(&decoder, &config);

    let mut scenario = LoudnessScenario::target_levels("switch", 2, 64, 96).unwrap();
    let err = verifier.verify_loudness(STREAM, &scenario).unwrap_err();
    assert_eq!(
        failure_kind(&err),
        Some(FailureKind::LoudnessRatioOutOfTolerance)
    );

    scenario.tolerance = ToleranceClass::StreamSwitch;
    let outcome = verifier.verify_loudness(STREAM, &scenario).unwrap();
    assert!((outcome.normalized_ratio - 1.1).abs() < 0.01);
}

#[test]
fn test_decoder_error_is_not_a_verification_failure() {
    let config = VerifyConfig::default();
    let decoder = FakeDecoder::new("fake.compliant", Behavior::Compliant);
    let verifier = Verifier::new(&decoder, &config);

    let scenario = LoudnessScenario::target_levels("empty", 2, 64, 88).unwrap();
    let err = verifier.verify_loudness(&[], &scenario).unwrap_err();
    assert_eq!(failure_kind(&err), None);
}

// ========== Clipping and Layout Scenarios ==========

#[test]
fn test_clipping_scenario() {
    let config = VerifyConfig::default();
    let scenario = ClippingScenario {
        name: "+6 dB".to_string(),
        drc: DrcConfig::default().with_target_level(40).unwrap(),
        tone_hz: None,
    };

    let clean = FakeDecoder::new("fake.compliant", Behavior::Compliant);
    let report = Verifier::new(&clean, &config)
        .verify_clipping(STREAM, &scenario)
        .unwrap();
    assert_eq!(report.tone_hz, 1000.0);
    assert!(report.worst_thd_n_db().unwrap() < config.thd_n_limit_db);

    let clipping = FakeDecoder::new("fake.clipping", Behavior::Clipping(12000.0));
    let err = Verifier::new(&clipping, &config)
        .verify_clipping(STREAM, &scenario)
        .unwrap_err();
    assert_eq!(
        failure_kind(&err),
        Some(FailureKind::ClippingThresholdExceeded)
    );
}

#[test]
fn test_layout_scenario_resolves_swapped_channels() {
    let config = VerifyConfig::default();
    let scenario = LayoutScenario {
        name: "stereo".to_string(),
        encoded_channels: 2,
        drc: DrcConfig::default(),
    };

    let straight = FakeDecoder::new("fake.ident", Behavior::Identification { swapped: false });
    let report = Verifier::new(&straight, &config)
        .verify_layout(STREAM, &scenario)
        .unwrap();
    assert_eq!(report.channel_map, vec![0, 1]);

    let swapped = FakeDecoder::new("fake.ident", Behavior::Identification { swapped: true });
    let report = Verifier::new(&swapped, &config)
        .verify_layout(STREAM, &scenario)
        .unwrap();
    assert_eq!(report.onsets, vec![Some(1), Some(0)]);
    assert_eq!(report.channel_map, vec![1, 0]);
}

// ========== Suite ==========

#[test]
fn test_suite_over_registry() {
    let config = VerifyConfig::default();
    let catalog = DecoderCatalog::discover(&FakeRegistry, MIME_AAC);
    assert_eq!(catalog.names().len(), 2);

    let scenarios = target_level_sweep(2);
    let results = Suite::new(&FakeRegistry, &catalog, &config).run(STREAM, &scenarios);
    assert_eq!(results.len(), 2 * scenarios.len());

    for result in &results {
        match result.decoder.as_str() {
            "fake.compliant" => {
                assert!(result.passed(), "{}: {:?}", result.scenario, result.outcome);
                assert!(matches!(
                    result.outcome,
                    Ok(ScenarioOutcome::Loudness(_))
                ));
            }
            "fake.flat" => {
                assert_eq!(
                    result.failure_kind(),
                    Some(FailureKind::LoudnessRatioOutOfTolerance)
                );
            }
            other => panic!("unexpected decoder {other}"),
        }
    }
}

#[test]
fn test_suite_continues_past_unavailable_decoder() {
    let config = VerifyConfig::default();
    let catalog = DecoderCatalog::from_names(
        MIME_AAC,
        vec!["fake.missing".to_string(), "fake.compliant".to_string()],
    );
    let scenarios = vec![Scenario::Clipping(ClippingScenario {
        name: "tone".to_string(),
        drc: DrcConfig::default(),
        tone_hz: Some(1000.0),
    })];

    let mut seen = Vec::new();
    let results = Suite::new(&FakeRegistry, &catalog, &config).run_with_progress(
        STREAM,
        &scenarios,
        |r| seen.push(r.decoder.clone()),
    );

    assert_eq!(seen, vec!["fake.missing", "fake.compliant"]);
    assert!(!results[0].passed());
    assert_eq!(results[0].failure_kind(), None);
    assert!(results[1].passed());
}

#[test]
fn test_empty_catalog_runs_nothing() {
    let config = VerifyConfig::default();
    let catalog = DecoderCatalog::discover(&FakeRegistry, "audio/opus");
    assert!(catalog.is_empty());

    let results = Suite::new(&FakeRegistry, &catalog, &config).run(STREAM, &target_level_sweep(2));
    assert!(results.is_empty());
}
