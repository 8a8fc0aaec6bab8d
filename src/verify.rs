//! Scenario orchestration
//!
//! A scenario drives the decoder collaborator with one or two DRC
//! configurations and runs the matching checks on its output. [`Suite`]
//! runs a list of scenarios against every decoder of a [`DecoderCatalog`].

use crate::clipping::{check_clipping, ClippingReport};
use crate::config::VerifyConfig;
use crate::decoder::{Decoder, DecoderCatalog, DecoderRegistry};
use crate::drc::DrcConfig;
use crate::energy::{analyze_energy, AnalysisMode, EnergyReport};
use crate::error::{FailureKind, VerificationError};
use crate::loudness::{
    check_loudness_ratio, check_monotonic, norm_factor_from_db, LevelEnergy, ToleranceClass,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Decode twice and compare total energies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessScenario {
    pub name: String,
    pub encoded_channels: usize,
    pub reference: DrcConfig,
    pub test: DrcConfig,
    /// Gain of `test` over `reference` in dB; derived from the target
    /// levels when absent
    #[serde(default)]
    pub expected_gain_db: Option<f64>,
    #[serde(default)]
    pub tolerance: ToleranceClass,
}

impl LoudnessScenario {
    /// Scenario comparing two target reference levels, all else default
    pub fn target_levels(
        name: &str,
        encoded_channels: usize,
        reference_level: u8,
        test_level: u8,
    ) -> crate::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            encoded_channels,
            reference: DrcConfig::default().with_target_level(reference_level)?,
            test: DrcConfig::default().with_target_level(test_level)?,
            expected_gain_db: None,
            tolerance: ToleranceClass::General,
        })
    }

    pub fn expected_gain_db(&self) -> f64 {
        self.expected_gain_db
            .unwrap_or_else(|| self.test.gain_relative_to(&self.reference))
    }

    /// Configurations differ in target level only
    fn is_level_sweep(&self) -> bool {
        let aligned = DrcConfig {
            target_ref_level: self.reference.target_ref_level,
            ..self.test
        };
        aligned == self.reference && self.test.target_ref_level != self.reference.target_ref_level
    }
}

/// Decode once and check the notched test tone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClippingScenario {
    pub name: String,
    #[serde(default)]
    pub drc: DrcConfig,
    /// Overrides the configured test tone
    #[serde(default)]
    pub tone_hz: Option<f64>,
}

/// Decode once and check the channel-identification layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutScenario {
    pub name: String,
    pub encoded_channels: usize,
    #[serde(default)]
    pub drc: DrcConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scenario {
    Loudness(LoudnessScenario),
    Clipping(ClippingScenario),
    Layout(LayoutScenario),
}

impl Scenario {
    pub fn name(&self) -> &str {
        match self {
            Scenario::Loudness(s) => &s.name,
            Scenario::Clipping(s) => &s.name,
            Scenario::Layout(s) => &s.name,
        }
    }

    fn validate(&self) -> crate::Result<()> {
        match self {
            Scenario::Loudness(s) => {
                s.reference.validate()?;
                s.test.validate()
            }
            Scenario::Clipping(s) => s.drc.validate(),
            Scenario::Layout(s) => s.drc.validate(),
        }
    }
}

/// Target-level sweep around the decoder default (-16 dBFS)
pub fn target_level_sweep(encoded_channels: usize) -> Vec<Scenario> {
    // (name, level): -10, -20, -24 and -31 dBFS
    const LEVELS: [(&str, u8); 4] = [
        ("target -10 dBFS", 40),
        ("target -20 dBFS", 80),
        ("target -24 dBFS", 96),
        ("target -31 dBFS", 124),
    ];

    LEVELS
        .iter()
        .filter_map(|&(name, level)| {
            LoudnessScenario::target_levels(
                name,
                encoded_channels,
                crate::drc::DEFAULT_TARGET_LEVEL,
                level,
            )
            .ok()
        })
        .map(Scenario::Loudness)
        .collect()
}

/// Read a JSON array of scenarios
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenarios: {}", path.display()))?;
    let scenarios: Vec<Scenario> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse scenarios: {}", path.display()))?;
    for scenario in &scenarios {
        scenario
            .validate()
            .with_context(|| format!("Invalid scenario '{}'", scenario.name()))?;
    }
    Ok(scenarios)
}

/// Measured result of a loudness scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoudnessOutcome {
    pub reference_energy: f64,
    pub test_energy: f64,
    pub expected_gain_db: f64,
    pub norm_factor: f64,
    pub normalized_ratio: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Loudness(LoudnessOutcome),
    Clipping(ClippingReport),
    Layout(EnergyReport),
}

/// Runs scenarios against one decoder
pub struct Verifier<'a> {
    decoder: &'a dyn Decoder,
    config: &'a VerifyConfig,
}

impl<'a> Verifier<'a> {
    pub fn new(decoder: &'a dyn Decoder, config: &'a VerifyConfig) -> Self {
        Self { decoder, config }
    }

    /// Decode `stream` under `drc` and analyze the output
    pub fn decode_and_analyze(
        &self,
        stream: &[u8],
        drc: &DrcConfig,
        encoded_channels: usize,
        mode: AnalysisMode,
    ) -> Result<EnergyReport> {
        let pcm = self
            .decoder
            .decode(stream, drc)
            .with_context(|| format!("{} failed to decode", self.decoder.name()))?;
        Ok(analyze_energy(&pcm, encoded_channels, mode)?)
    }

    pub fn verify_loudness(
        &self,
        stream: &[u8],
        scenario: &LoudnessScenario,
    ) -> Result<LoudnessOutcome> {
        let reference = self.decode_and_analyze(
            stream,
            &scenario.reference,
            scenario.encoded_channels,
            AnalysisMode::DrcContext,
        )?;
        let test = self.decode_and_analyze(
            stream,
            &scenario.test,
            scenario.encoded_channels,
            AnalysisMode::DrcContext,
        )?;

        if scenario.is_level_sweep() {
            check_monotonic(
                LevelEnergy {
                    target_level: scenario.reference.target_ref_level,
                    energy: reference.total_energy,
                },
                LevelEnergy {
                    target_level: scenario.test.target_ref_level,
                    energy: test.total_energy,
                },
            )?;
        }

        let expected_gain_db = scenario.expected_gain_db();
        let norm_factor = norm_factor_from_db(expected_gain_db);
        let tolerance = self.config.tolerance(scenario.tolerance);
        let normalized_ratio = check_loudness_ratio(
            test.total_energy,
            reference.total_energy,
            norm_factor,
            tolerance,
        )?;

        Ok(LoudnessOutcome {
            reference_energy: reference.total_energy,
            test_energy: test.total_energy,
            expected_gain_db,
            norm_factor,
            normalized_ratio,
            tolerance,
        })
    }

    pub fn verify_clipping(
        &self,
        stream: &[u8],
        scenario: &ClippingScenario,
    ) -> Result<ClippingReport> {
        let pcm = self
            .decoder
            .decode(stream, &scenario.drc)
            .with_context(|| format!("{} failed to decode", self.decoder.name()))?;
        let tone_hz = scenario.tone_hz.unwrap_or(self.config.test_tone_hz);
        Ok(check_clipping(&pcm, tone_hz, self.config.thd_n_limit_db)?)
    }

    pub fn verify_layout(&self, stream: &[u8], scenario: &LayoutScenario) -> Result<EnergyReport> {
        self.decode_and_analyze(
            stream,
            &scenario.drc,
            scenario.encoded_channels,
            AnalysisMode::Strict,
        )
    }

    pub fn run(&self, stream: &[u8], scenario: &Scenario) -> Result<ScenarioOutcome> {
        Ok(match scenario {
            Scenario::Loudness(s) => ScenarioOutcome::Loudness(self.verify_loudness(stream, s)?),
            Scenario::Clipping(s) => ScenarioOutcome::Clipping(self.verify_clipping(stream, s)?),
            Scenario::Layout(s) => ScenarioOutcome::Layout(self.verify_layout(stream, s)?),
        })
    }
}

/// Outcome of one scenario on one decoder
#[derive(Debug)]
pub struct ScenarioResult {
    pub decoder: String,
    pub scenario: String,
    pub outcome: Result<ScenarioOutcome>,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Verification failure kind, `None` on success or on decoder errors
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.outcome
            .as_ref()
            .err()
            .and_then(|e| e.downcast_ref::<VerificationError>())
            .map(VerificationError::kind)
    }
}

/// Scenarios × decoders
pub struct Suite<'a> {
    registry: &'a dyn DecoderRegistry,
    catalog: &'a DecoderCatalog,
    config: &'a VerifyConfig,
}

impl<'a> Suite<'a> {
    pub fn new(
        registry: &'a dyn DecoderRegistry,
        catalog: &'a DecoderCatalog,
        config: &'a VerifyConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            config,
        }
    }

    /// Run every scenario on every cataloged decoder
    ///
    /// A failing scenario aborts only itself; the remaining scenarios and
    /// decoders still run.
    pub fn run(&self, stream: &[u8], scenarios: &[Scenario]) -> Vec<ScenarioResult> {
        self.run_with_progress(stream, scenarios, |_| {})
    }

    /// [`Suite::run`] calling `on_result` after each scenario
    pub fn run_with_progress<F>(
        &self,
        stream: &[u8],
        scenarios: &[Scenario],
        mut on_result: F,
    ) -> Vec<ScenarioResult>
    where
        F: FnMut(&ScenarioResult),
    {
        let mut results = Vec::with_capacity(self.catalog.names().len() * scenarios.len());

        for name in self.catalog.names() {
            let decoder = match self.registry.open(name) {
                Ok(d) => d,
                Err(e) => {
                    warn!(decoder = %name, error = %e, "decoder unavailable");
                    for scenario in scenarios {
                        let result = ScenarioResult {
                            decoder: name.clone(),
                            scenario: scenario.name().to_string(),
                            outcome: Err(anyhow::anyhow!("Failed to open {}: {}", name, e)),
                        };
                        on_result(&result);
                        results.push(result);
                    }
                    continue;
                }
            };

            let verifier = Verifier::new(decoder.as_ref(), self.config);
            for scenario in scenarios {
                let outcome = verifier.run(stream, scenario);
                info!(
                    decoder = %name,
                    scenario = scenario.name(),
                    passed = outcome.is_ok(),
                    "scenario finished"
                );
                let result = ScenarioResult {
                    decoder: name.clone(),
                    scenario: scenario.name().to_string(),
                    outcome,
                };
                on_result(&result);
                results.push(result);
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drc::DrcEffectType;

    #[test]
    fn test_expected_gain_from_levels() {
        let scenario = LoudnessScenario::target_levels("sweep", 2, 64, 88).unwrap();
        assert_eq!(scenario.expected_gain_db(), -6.0);
        assert!(scenario.is_level_sweep());
    }

    #[test]
    fn test_explicit_gain_overrides_levels() {
        let mut scenario = LoudnessScenario::target_levels("night", 2, 64, 64).unwrap();
        scenario.test = scenario.test.with_effect_type(DrcEffectType::LateNight);
        scenario.expected_gain_db = Some(-3.0);
        assert_eq!(scenario.expected_gain_db(), -3.0);
        assert!(!scenario.is_level_sweep());
    }

    #[test]
    fn test_sweep_presets() {
        let scenarios = target_level_sweep(2);
        assert_eq!(scenarios.len(), 4);
        match &scenarios[3] {
            Scenario::Loudness(s) => assert_eq!(s.expected_gain_db(), -15.0),
            other => panic!("unexpected scenario: {other:?}"),
        }
    }

    #[test]
    fn test_scenario_json() {
        let json = r#"[
            {"kind": "loudness", "name": "switch", "encoded_channels": 2,
             "reference": {"target_ref_level": 64},
             "test": {"target_ref_level": 96},
             "tolerance": "stream_switch"},
            {"kind": "clipping", "name": "clip", "tone_hz": 997.0},
            {"kind": "layout", "name": "5.1", "encoded_channels": 6}
        ]"#;
        let scenarios: Vec<Scenario> = serde_json::from_str(json).unwrap();
        assert_eq!(scenarios.len(), 3);
        assert_eq!(scenarios[0].name(), "switch");
        match &scenarios[0] {
            Scenario::Loudness(s) => {
                assert_eq!(s.tolerance, ToleranceClass::StreamSwitch);
                assert_eq!(s.expected_gain_db(), -8.0);
            }
            other => panic!("unexpected scenario: {other:?}"),
        }
        assert!(scenarios.iter().all(|s| s.validate().is_ok()));
    }

    #[test]
    fn test_scenario_validation_catches_range() {
        let json = r#"[{"kind": "clipping", "name": "bad", "drc": {"boost": 200}}]"#;
        let scenarios: Vec<Scenario> = serde_json::from_str(json).unwrap();
        assert!(scenarios[0].validate().is_err());
    }
}
