//! leafcare-bench: CLI tool for running the cascade on image files.
//!
//! Decodes an image, runs pixel analysis, the rejection gate and the
//! two classifier stages, and prints per-stage diagnostics together with
//! the JSON response a service would return. No models are bundled: the
//! two classifiers are scripted with fixed output vectors so thresholds
//! and gate settings can be explored without any inference runtime.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin leafcare-bench -- [OPTIONS] <IMAGE_PATH>
//! cargo run --release --bin leafcare-bench -- leaf.jpg \
//!     --stage1 0.1,0.9 --stage2 0.05,0.8,0.15 --labels healthy,rust,miner
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use leafcare_pipeline::{
    CascadeConfig, CascadeDiagnostics, CascadeOrchestrator, ClassifierError, ClassifierPort,
    Dimensions, InputTensor, LabelMap, RejectionPolicyKind, SystemClock, Thresholds, grayscale,
};
use leafcare_response::{Messages, build_response, status};
use leafcare_worker::{PoolConfig, PooledClassifier};

/// Run the leafcare cascade on an image and print diagnostics.
///
/// Classifier outputs are scripted: each stage returns the given vector
/// for every call. Omit a stage to simulate a missing model.
#[derive(Parser)]
#[command(name = "leafcare-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Scripted stage-1 output (`not_coffee,coffee`); index 0 is the
    /// not-coffee probability.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    stage1: Option<Vec<f32>>,

    /// Scripted stage-2 output, one value per disease class.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    stage2: Option<Vec<f32>>,

    /// Disease labels in output order.
    ///
    /// Defaults to `class_0`, `class_1`, ... sized to `--stage2`.
    #[arg(long, value_delimiter = ',', conflicts_with = "label_map")]
    labels: Option<Vec<String>>,

    /// Class-index mapping file (`{"label": index, ...}`).
    #[arg(long)]
    label_map: Option<PathBuf>,

    /// Rejection gate strategy.
    #[arg(long, value_enum, default_value_t = Policy::Weighted)]
    policy: Policy,

    /// Skip stage 1 when `--stage1` is absent instead of failing.
    #[arg(long)]
    allow_degraded: bool,

    /// Serve each scripted classifier through an inference pool with
    /// this per-call timeout.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u64>::new().range(1..))]
    timeout_ms: Option<u64>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Also print the status payload for the configured cascade.
    #[arg(long)]
    status: bool,

    /// Full cascade config as a JSON string.
    ///
    /// When provided, `--policy` and `--allow-degraded` are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Decision thresholds as a JSON string. Missing fields keep their
    /// defaults.
    #[arg(long)]
    thresholds_json: Option<String>,
}

/// Rejection gate selection.
#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Weighted leaf score over every pixel feature.
    Weighted,
    /// Legacy hard rules on a few features.
    Binary,
}

/// A classifier that answers every call with the same vector.
struct Scripted(Vec<f32>);

impl ClassifierPort for Scripted {
    fn predict(&self, _input: &InputTensor) -> Result<Vec<f32>, ClassifierError> {
        Ok(self.0.clone())
    }
}

/// Build a [`CascadeConfig`] from CLI arguments.
fn config_from_cli(cli: &Cli) -> Result<CascadeConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let mut config = CascadeConfig {
        allow_degraded: cli.allow_degraded,
        ..CascadeConfig::default()
    };
    config.analysis.rejection_policy = match cli.policy {
        Policy::Weighted => RejectionPolicyKind::Weighted,
        Policy::Binary => RejectionPolicyKind::Binary,
    };
    Ok(config)
}

fn thresholds_from_cli(cli: &Cli) -> Result<Thresholds, String> {
    let thresholds = match cli.thresholds_json {
        Some(ref json) => serde_json::from_str(json)
            .map_err(|e| format!("Error parsing --thresholds-json: {e}"))?,
        None => Thresholds::default(),
    };
    thresholds
        .validate()
        .map_err(|e| format!("Invalid thresholds: {e}"))?;
    Ok(thresholds)
}

fn labels_from_cli(cli: &Cli) -> Result<LabelMap, String> {
    if let Some(ref path) = cli.label_map {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
        return serde_json::from_str(&text)
            .map_err(|e| format!("Error parsing {}: {e}", path.display()));
    }
    let labels = cli.labels.clone().unwrap_or_else(|| {
        let count = cli.stage2.as_ref().map_or(1, |out| out.len().max(1));
        (0..count).map(|i| format!("class_{i}")).collect()
    });
    LabelMap::new(labels).map_err(|e| e.to_string())
}

/// Wrap a scripted output, optionally behind an inference pool.
fn port(
    output: Option<&[f32]>,
    timeout_ms: Option<u64>,
) -> Result<Option<Arc<dyn ClassifierPort>>, String> {
    let Some(output) = output else {
        return Ok(None);
    };
    let scripted: Arc<dyn ClassifierPort> = Arc::new(Scripted(output.to_vec()));
    let Some(ms) = timeout_ms else {
        return Ok(Some(scripted));
    };
    let config = PoolConfig {
        workers: 1,
        timeout: Duration::from_millis(ms),
        ..PoolConfig::default()
    };
    let pooled = PooledClassifier::new(scripted, config).map_err(|e| e.to_string())?;
    Ok(Some(Arc::new(pooled)))
}

fn build_cascade(cli: &Cli) -> Result<(CascadeOrchestrator, Thresholds), String> {
    let config = config_from_cli(cli)?;
    let thresholds = thresholds_from_cli(cli)?;
    let labels = labels_from_cli(cli)?;
    let stage1 = port(cli.stage1.as_deref(), cli.timeout_ms)?;
    let stage2 = port(cli.stage2.as_deref(), cli.timeout_ms)?;
    let cascade = CascadeOrchestrator::new(stage1, stage2, labels, config)
        .map_err(|e| format!("Invalid cascade: {e}"))?;
    Ok((cascade, thresholds))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let (cascade, thresholds) = match build_cascade(&cli) {
        Ok(built) => built,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };
    let image = match grayscale::decode(&image_bytes) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let dimensions = Dimensions::of(&image);
    eprintln!(
        "Image: {} ({} bytes, {}x{})",
        cli.image_path.display(),
        image_bytes.len(),
        dimensions.width,
        dimensions.height,
    );
    eprintln!("Cascade: {cascade:#?}");
    eprintln!("Thresholds: {thresholds:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);
    let mut last_decision = None;

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (decision, diagnostics) =
            cascade.classify_with_diagnostics(&image, &thresholds, &SystemClock);
        if cli.json {
            match serde_json::to_string_pretty(&diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", diagnostics.report());
        }
        all_diagnostics.push(diagnostics);
        last_decision = Some(decision);
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    if let Some(decision) = last_decision {
        println!();
        println!("Decision: {}", decision.outcome);
        let response = build_response(&decision, &Messages::default());
        match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing response: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if cli.status {
        match serde_json::to_string_pretty(&status(&cascade, env!("CARGO_PKG_VERSION"))) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing status: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&CascadeDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[CascadeDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Analysis", |d| Some(d.analysis.duration)),
        ("Gate", |d| Some(d.gate.duration)),
        ("Screening", |d| d.screening.as_ref().map(|s| s.duration)),
        ("Disease", |d| d.disease.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
