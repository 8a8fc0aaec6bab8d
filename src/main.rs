//! drccheck - DRC and loudness verification for AAC/USAC decoders
//!
//! Decodes local files with the reference backend and runs the energy,
//! loudness and clipping checks against the output.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use drccheck::clipping::{check_clipping, ClippingReport};
use drccheck::decoder::{SymphoniaDecoder, SymphoniaRegistry, MIME_AAC};
use drccheck::loudness::{
    check_monotonic, check_report_ratio, norm_factor_from_db, LevelEnergy, ToleranceClass,
};
use drccheck::verify::{load_scenarios, target_level_sweep, ScenarioOutcome, ScenarioResult, Suite};
use drccheck::{
    analyze_energy, AnalysisMode, Decoder, DecoderCatalog, DrcConfig, EnergyReport, PcmBuffer,
    VerificationError, VerifyConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Options
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "drccheck", version, about = "DRC and loudness verification for AAC decoders")]
struct Cli {
    /// JSON file overriding tolerances, THD+N limit and test tone
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode (tab-separated output)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segmental energy analysis of one decoded file
    Analyze {
        file: PathBuf,

        /// Channels in the encoded content (defaults to the decoded count)
        #[arg(long)]
        channels: Option<usize>,

        /// Run the channel-identification post-checks
        #[arg(long)]
        strict: bool,
    },
    /// THD+N clipping check on a decoded test tone
    Clip {
        file: PathBuf,

        /// Test tone frequency in Hz
        #[arg(long)]
        tone: Option<f64>,
    },
    /// Compare the loudness of two decodes of the same content
    Compare(CompareArgs),
    /// Run a scenario list against every available decoder
    Suite {
        file: PathBuf,

        /// JSON scenario list (defaults to a target-level sweep)
        #[arg(long)]
        scenarios: Option<PathBuf>,

        /// Channels in the encoded content, for the default sweep
        #[arg(long, default_value_t = 2)]
        channels: usize,
    },
}

#[derive(Args, Debug)]
struct CompareArgs {
    reference: PathBuf,
    test: PathBuf,

    /// Expected gain of TEST over REFERENCE in dB
    #[arg(long, allow_hyphen_values = true, conflicts_with_all = ["ref_level", "test_level"])]
    gain_db: Option<f64>,

    /// Target reference level REFERENCE was decoded with
    #[arg(long, requires = "test_level")]
    ref_level: Option<u8>,

    /// Target reference level TEST was decoded with
    #[arg(long, requires = "ref_level")]
    test_level: Option<u8>,

    /// Configuration switched mid-stream; use the wider tolerance
    #[arg(long)]
    switching: bool,

    /// Channels in the encoded content (defaults to the decoded count)
    #[arg(long)]
    channels: Option<usize>,
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            report_error(&cli, &e);
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when a check ran and failed without aborting
fn run(cli: &Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => VerifyConfig::load(path)?,
        None => VerifyConfig::default(),
    };

    match &cli.command {
        Command::Analyze {
            file,
            channels,
            strict,
        } => cmd_analyze(cli, file, *channels, *strict),
        Command::Clip { file, tone } => cmd_clip(cli, &config, file, *tone),
        Command::Compare(args) => cmd_compare(cli, &config, args),
        Command::Suite {
            file,
            scenarios,
            channels,
        } => cmd_suite(cli, &config, file, scenarios.as_deref(), *channels),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_analyze(cli: &Cli, file: &Path, channels: Option<usize>, strict: bool) -> Result<bool> {
    let pcm = decode_file(file, cli.quiet || cli.json)?;
    let encoded = channels.unwrap_or(pcm.params.channels);
    let mode = if strict {
        AnalysisMode::Strict
    } else {
        AnalysisMode::DrcContext
    };

    let report = analyze_energy(&pcm, encoded, mode)?;

    if cli.json {
        print_json(&report)?;
    } else if cli.quiet {
        println!(
            "{}\t{}\t{}\t{}\t{:.0}",
            display_name(file),
            report.signal_start,
            report.segments,
            report.effective_channels,
            report.total_energy
        );
    } else {
        print_energy_report(file, &pcm, &report);
    }
    Ok(true)
}

fn cmd_clip(cli: &Cli, config: &VerifyConfig, file: &Path, tone: Option<f64>) -> Result<bool> {
    let pcm = decode_file(file, cli.quiet || cli.json)?;
    let tone_hz = tone.unwrap_or(config.test_tone_hz);

    let report = check_clipping(&pcm, tone_hz, config.thd_n_limit_db)?;

    if cli.json {
        print_json(&report)?;
    } else if cli.quiet {
        println!(
            "{}\t{}",
            display_name(file),
            report
                .worst_thd_n_db()
                .map_or_else(|| "silent".to_string(), |v| format!("{:.1}", v))
        );
    } else {
        print_clipping_report(file, &report);
    }
    Ok(true)
}

#[derive(Serialize)]
struct CompareOutput {
    reference_energy: f64,
    test_energy: f64,
    expected_gain_db: f64,
    norm_factor: f64,
    normalized_ratio: f64,
    tolerance: f64,
}

fn cmd_compare(cli: &Cli, config: &VerifyConfig, args: &CompareArgs) -> Result<bool> {
    let silent = cli.quiet || cli.json;
    let reference_pcm = decode_file(&args.reference, silent)?;
    let test_pcm = decode_file(&args.test, silent)?;

    let reference = analyze_energy(
        &reference_pcm,
        args.channels.unwrap_or(reference_pcm.params.channels),
        AnalysisMode::DrcContext,
    )?;
    let test = analyze_energy(
        &test_pcm,
        args.channels.unwrap_or(test_pcm.params.channels),
        AnalysisMode::DrcContext,
    )?;

    let expected_gain_db = match (args.gain_db, args.ref_level, args.test_level) {
        (Some(gain), _, _) => gain,
        (None, Some(ref_level), Some(test_level)) => {
            let ref_drc = DrcConfig::default().with_target_level(ref_level)?;
            let test_drc = DrcConfig::default().with_target_level(test_level)?;
            check_monotonic(
                LevelEnergy {
                    target_level: ref_level,
                    energy: reference.total_energy,
                },
                LevelEnergy {
                    target_level: test_level,
                    energy: test.total_energy,
                },
            )?;
            test_drc.gain_relative_to(&ref_drc)
        }
        _ => 0.0,
    };

    let class = if args.switching {
        ToleranceClass::StreamSwitch
    } else {
        ToleranceClass::General
    };
    let tolerance = config.tolerance(class);
    let norm_factor = norm_factor_from_db(expected_gain_db);
    let normalized_ratio = check_report_ratio(&test, &reference, norm_factor, tolerance)?;

    let output = CompareOutput {
        reference_energy: reference.total_energy,
        test_energy: test.total_energy,
        expected_gain_db,
        norm_factor,
        normalized_ratio,
        tolerance,
    };

    if cli.json {
        print_json(&output)?;
    } else if cli.quiet {
        println!(
            "{}\t{}\t{:+.2}\t{:.4}",
            display_name(&args.reference),
            display_name(&args.test),
            expected_gain_db,
            normalized_ratio
        );
    } else {
        println!(
            "{} {} vs {}",
            "compare".cyan().bold(),
            display_name(&args.reference),
            display_name(&args.test)
        );
        println!("  Reference:   {:.0}", output.reference_energy);
        println!("  Test:        {:.0}", output.test_energy);
        println!("  Expected:    {:+.2} dB", expected_gain_db);
        println!(
            "  Normalized:  {} (tolerance +/-{:.0}%)",
            format!("{:.4}", normalized_ratio).green(),
            tolerance * 100.0
        );
        println!("  {} loudness within tolerance", "✓".green());
    }
    Ok(true)
}

fn cmd_suite(
    cli: &Cli,
    config: &VerifyConfig,
    file: &Path,
    scenarios: Option<&Path>,
    channels: usize,
) -> Result<bool> {
    let stream =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let scenarios = match scenarios {
        Some(path) => load_scenarios(path)?,
        None => target_level_sweep(channels),
    };

    let registry = match extension(file) {
        Some(ext) => SymphoniaRegistry::with_extension(ext),
        None => SymphoniaRegistry::default(),
    };
    let catalog = DecoderCatalog::discover(&registry, MIME_AAC);
    if catalog.is_empty() {
        anyhow::bail!(
            "No decoder available for {}.\n\
            Install with: cargo install drccheck --features decode",
            catalog.mime()
        );
    }

    let suite = Suite::new(&registry, &catalog, config);
    let print_live = !cli.json;
    let results = suite.run_with_progress(&stream, &scenarios, |result| {
        if print_live {
            print_scenario_result(cli.quiet, result);
        }
    });

    let passed = results.iter().filter(|r| r.passed()).count();
    if cli.json {
        let rows: Vec<_> = results.iter().map(SuiteRow::from).collect();
        print_json(&rows)?;
    } else if !cli.quiet {
        println!();
        let summary = format!("{}/{} scenarios passed", passed, results.len());
        if passed == results.len() {
            println!("{}", summary.green().bold());
        } else {
            println!("{}", summary.red().bold());
        }
    }

    Ok(passed == results.len())
}

// =============================================================================
// Decoding
// =============================================================================

fn decode_file(file: &Path, silent: bool) -> Result<PcmBuffer> {
    let stream = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let decoder = match extension(file) {
        Some(ext) => SymphoniaDecoder::with_extension(ext),
        None => SymphoniaDecoder::new(),
    };

    let spinner = if silent {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Decoding {}", display_name(file)));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let result = decoder.decode(&stream, &DrcConfig::default());
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    result.with_context(|| format!("Failed to decode {}", file.display()))
}

fn extension(file: &Path) -> Option<&str> {
    file.extension().and_then(|e| e.to_str())
}

fn display_name(file: &Path) -> &str {
    file.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
}

// =============================================================================
// Output
// =============================================================================

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_energy_report(file: &Path, pcm: &PcmBuffer, report: &EnergyReport) {
    println!("{}", display_name(file).cyan().bold());
    println!(
        "  Format:      {} Hz, {} channel(s)",
        pcm.params.sample_rate, pcm.params.channels
    );
    println!(
        "  Signal:      starts at frame {}, {} segment(s) of {} frames",
        report.signal_start, report.segments, report.segment_len
    );
    for (ch, onset) in report.onsets.iter().enumerate() {
        let label = match onset {
            Some(group) => format!("group {}", group),
            None => "LFE".yellow().to_string(),
        };
        println!(
            "  Channel {}:   {:<10} energy {:.0}",
            ch, label, report.channel_energy[ch]
        );
    }
    println!("  Map:         {:?}", report.channel_map);
    if let Some(layout) = report.front_layout {
        println!("  Front:       {:?}", layout);
    }
    if report.downmix {
        println!("  {}", "downmixed output".yellow());
    }
    println!("  Total:       {}", format!("{:.0}", report.total_energy).green());
    if !report.skipped_checks.is_empty() {
        println!("  Skipped:     {:?}", report.skipped_checks);
    }
    println!();
}

fn print_clipping_report(file: &Path, report: &ClippingReport) {
    println!("{}", display_name(file).cyan().bold());
    println!(
        "  Tone:        {} Hz, limit {:.1} dB, frames {}..{}",
        report.tone_hz, report.limit_db, report.window.0, report.window.1
    );
    for channel in &report.channels {
        match channel.thd_n_db {
            Some(db) => println!(
                "  {} channel {}: THD+N {:.1} dB",
                "✓".green(),
                channel.channel,
                db
            ),
            None => println!("  - channel {}: silent", channel.channel),
        }
    }
    println!();
}

fn print_scenario_result(quiet: bool, result: &ScenarioResult) {
    if quiet {
        println!(
            "{}\t{}\t{}",
            result.decoder,
            result.scenario,
            if result.passed() { "pass" } else { "fail" }
        );
        return;
    }

    match &result.outcome {
        Ok(outcome) => {
            let detail = match outcome {
                ScenarioOutcome::Loudness(l) => format!("ratio {:.4}", l.normalized_ratio),
                ScenarioOutcome::Clipping(c) => c
                    .worst_thd_n_db()
                    .map_or_else(|| "silent".to_string(), |v| format!("THD+N {:.1} dB", v)),
                ScenarioOutcome::Layout(r) => format!("map {:?}", r.channel_map),
            };
            println!(
                "  {} {} / {} ({})",
                "✓".green(),
                result.decoder,
                result.scenario,
                detail
            );
        }
        Err(e) => {
            eprintln!(
                "  {} {} / {} - {:#}",
                "✗".red(),
                result.decoder,
                result.scenario,
                e
            );
        }
    }
}

#[derive(Serialize)]
struct SuiteRow<'a> {
    decoder: &'a str,
    scenario: &'a str,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<&'a ScenarioOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a ScenarioResult> for SuiteRow<'a> {
    fn from(result: &'a ScenarioResult) -> Self {
        Self {
            decoder: &result.decoder,
            scenario: &result.scenario,
            passed: result.passed(),
            outcome: result.outcome.as_ref().ok(),
            failure: result.failure_kind().map(|k| format!("{:?}", k)),
            error: result.outcome.as_ref().err().map(|e| format!("{:#}", e)),
        }
    }
}

fn report_error(cli: &Cli, error: &anyhow::Error) {
    let kind = error
        .downcast_ref::<VerificationError>()
        .map(|e| format!("{:?}", e.kind()));

    if cli.json {
        let value = serde_json::json!({
            "passed": false,
            "failure": kind,
            "error": format!("{:#}", error),
        });
        println!("{}", value);
    } else if kind.is_some() {
        eprintln!("{} {:#}", "✗ FAIL".red().bold(), error);
    } else {
        eprintln!("{}: {:#}", "error".red().bold(), error);
    }
}
