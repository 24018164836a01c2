//! scriptorium-bench: CLI tool for running the restoration pipeline on a file.
//!
//! Loads a scanned page, builds a transformation chain from flags (or a
//! JSON chain description), runs it through a [`Pipeline`] and prints
//! per-stage timings plus PSNR/SSIM against the original. Useful for:
//!
//! - Tuning binarizer parameters on real scans
//! - Comparing exhaustive and accelerated threshold search
//! - Checking DPI normalization output before binarization
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin scriptorium-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use scriptorium_pipeline::{
    BinarizerParams, ParamValue, Pipeline, PipelineConfig, QualityReport, Raster, ScalerParams,
    ThresholdPair, Transform, TransformationKind, TransformationSpec,
};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run the document restoration pipeline on an image file.
///
/// By default the chain is a single 2D Otsu binarizer. Any scaling flag
/// inserts a Lanczos-4 scaler in front of it.
#[derive(Parser)]
#[command(name = "scriptorium-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, TIFF, BMP, WebP).
    image_path: PathBuf,

    /// Scale factor applied before binarization.
    #[arg(long)]
    scale: Option<f64>,

    /// Resolution the page was scanned at, in DPI.
    #[arg(long, requires = "target_dpi")]
    original_dpi: Option<f64>,

    /// Resolution to normalize to, in DPI.
    #[arg(long, requires = "original_dpi")]
    target_dpi: Option<f64>,

    /// Resize large reductions in a single Lanczos pass.
    #[arg(long)]
    no_iterative: bool,

    /// Skip the binarizer stage.
    #[arg(long)]
    no_binarize: bool,

    /// Guided filter window radius.
    #[arg(long, default_value_t = BinarizerParams::DEFAULT_WINDOW_RADIUS)]
    window_radius: u32,

    /// Guided filter regularizer (normalized intensity units).
    #[arg(long, default_value_t = BinarizerParams::DEFAULT_EPSILON)]
    epsilon: f64,

    /// Morphological cleanup kernel size (0 or 1 disables).
    #[arg(long, default_value_t = BinarizerParams::DEFAULT_MORPH_KERNEL_SIZE)]
    morph_kernel_size: u32,

    /// Smooth scan noise before thresholding.
    #[arg(long)]
    noise_reduction: bool,

    /// Use the exhaustive threshold search instead of summed-area tables.
    #[arg(long)]
    exhaustive: bool,

    /// Binarize independently on an N x N grid of regions.
    #[arg(long, default_value_t = BinarizerParams::DEFAULT_REGION_COUNT)]
    regions: u32,

    /// Full chain as a JSON array of stage descriptions.
    ///
    /// When provided, all stage flags are ignored. Example:
    /// `[{"kind":"lanczos4","params":{"scale_factor":0.5}},{"kind":"two_d_otsu"}]`
    #[arg(long)]
    chain_json: Option<String>,

    /// Pipeline config as a JSON string (`PipelineConfig` serialization).
    #[arg(long)]
    config_json: Option<String>,

    /// Write the processed image to file (format from extension).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the preview image to file (format from extension).
    #[arg(long)]
    preview_output: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output run reports as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,
}

/// Timing for one stage of one run.
#[derive(Serialize)]
struct StageTiming {
    name: &'static str,
    millis: f64,
}

/// Everything measured during one run.
#[derive(Serialize)]
struct RunReport {
    load_millis: f64,
    stages: Vec<StageTiming>,
    preview_millis: f64,
    total_millis: f64,
    width: u32,
    height: u32,
    channels: u8,
    quality: QualityReport,
    thresholds: Vec<ThresholdPair>,
}

impl RunReport {
    fn print(&self) {
        println!("{:<24} {:>12}", "Stage", "Time (ms)");
        println!("{}", "-".repeat(40));
        println!("{:<24} {:>10.3}ms", "Load", self.load_millis);
        for stage in &self.stages {
            println!("{:<24} {:>10.3}ms", stage.name, stage.millis);
        }
        println!("{:<24} {:>10.3}ms", "Preview", self.preview_millis);
        println!("{:<24} {:>10.3}ms", "Total", self.total_millis);
        println!();
        println!(
            "Output: {}x{} ({} channel{})",
            self.width,
            self.height,
            self.channels,
            if self.channels == 1 { "" } else { "s" }
        );
        for (region, pair) in self.thresholds.iter().enumerate() {
            println!(
                "Thresholds[{region}]: s={} t={} score={:.3}",
                pair.intensity, pair.guidance, pair.score
            );
        }
        println!(
            "PSNR: {:.3} dB  SSIM: {:.4}",
            self.quality.psnr, self.quality.ssim
        );
    }
}

fn millis_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    cli.config_json.as_ref().map_or_else(
        || Ok(PipelineConfig::default()),
        |json| serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}")),
    )
}

/// Build the chain description from `--chain-json` or the stage flags.
fn chain_from_cli(cli: &Cli) -> Result<Vec<TransformationSpec>, String> {
    if let Some(ref json) = cli.chain_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --chain-json: {e}"));
    }

    let mut chain = Vec::new();

    let wants_scaler = cli.scale.is_some() || cli.target_dpi.is_some();
    if wants_scaler {
        let mut params = BTreeMap::new();
        params.insert(
            "scale_factor".to_string(),
            ParamValue::Float(cli.scale.unwrap_or(ScalerParams::DEFAULT_SCALE_FACTOR)),
        );
        if let (Some(original), Some(target)) = (cli.original_dpi, cli.target_dpi) {
            params.insert("original_dpi".to_string(), ParamValue::Float(original));
            params.insert("target_dpi".to_string(), ParamValue::Float(target));
        }
        params.insert(
            "use_iterative_downscale".to_string(),
            ParamValue::Bool(!cli.no_iterative),
        );
        chain.push(TransformationSpec {
            kind: TransformationKind::Lanczos4,
            params,
        });
    }

    if !cli.no_binarize {
        let params = BTreeMap::from([
            ("window_radius".to_string(), ParamValue::from(cli.window_radius)),
            ("epsilon".to_string(), ParamValue::Float(cli.epsilon)),
            (
                "morph_kernel_size".to_string(),
                ParamValue::from(cli.morph_kernel_size),
            ),
            ("noise_reduction".to_string(), ParamValue::Bool(cli.noise_reduction)),
            (
                "use_accelerated_search".to_string(),
                ParamValue::Bool(!cli.exhaustive),
            ),
            ("region_count".to_string(), ParamValue::from(cli.regions)),
        ]);
        chain.push(TransformationSpec {
            kind: TransformationKind::TwoDOtsu,
            params,
        });
    }

    Ok(chain)
}

/// Run the chain once on a fresh pipeline.
fn run_once(
    original: &Raster,
    config: &PipelineConfig,
    chain: &[TransformationSpec],
) -> Result<(Pipeline, RunReport), String> {
    let started = Instant::now();
    let pipeline = Pipeline::new(config.clone()).map_err(|e| format!("Invalid config: {e}"))?;

    let load_started = Instant::now();
    pipeline
        .set_original(original)
        .map_err(|e| format!("Error loading image: {e}"))?;
    let load_millis = millis_since(load_started);

    let mut stages = Vec::with_capacity(chain.len());
    let mut thresholds = Vec::new();
    for spec in chain {
        let stage = Arc::new(spec.build());
        debug!(stage = stage.name(), params = ?stage.params(), "adding stage");
        let stage_started = Instant::now();
        pipeline
            .add_transformation(Arc::clone(&stage))
            .map_err(|e| format!("Pipeline error: {e}"))?;
        stages.push(StageTiming {
            name: stage.name(),
            millis: millis_since(stage_started),
        });
        if let Some(binarizer) = stage.as_binarizer() {
            thresholds = binarizer.last_thresholds();
        }
    }

    let preview_started = Instant::now();
    pipeline
        .reprocess_preview()
        .map_err(|e| format!("Preview error: {e}"))?;
    let preview_millis = millis_since(preview_started);

    let processed = pipeline
        .processed()
        .map_err(|e| format!("Pipeline error: {e}"))?;
    let quality = pipeline
        .quality()
        .map_err(|e| format!("Pipeline error: {e}"))?;

    let report = RunReport {
        load_millis,
        stages,
        preview_millis,
        total_millis: millis_since(started),
        width: processed.width(),
        height: processed.height(),
        channels: processed.channels(),
        quality,
        thresholds,
    };
    Ok((pipeline, report))
}

fn write_raster(raster: Raster, path: &Path, what: &str) {
    match raster.into_dynamic().save(path) {
        Ok(()) => eprintln!("{what} written to {}", path.display()),
        Err(e) => eprintln!("Error writing {what} to {}: {e}", path.display()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scriptorium_pipeline=info,scriptorium_bench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let cli = Cli::parse();

    let (config, chain) = match config_from_cli(&cli).and_then(|c| Ok((c, chain_from_cli(&cli)?))) {
        Ok(parsed) => parsed,
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
    let original = match Raster::decode(&image_bytes) {
        Ok(raster) => raster,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    info!(
        path = %cli.image_path.display(),
        bytes = image_bytes.len(),
        width = original.width(),
        height = original.height(),
        stages = chain.len(),
        runs = cli.runs,
        "starting bench"
    );

    let mut totals = Vec::with_capacity(cli.runs);
    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (pipeline, report) = match run_once(&original, &config, &chain) {
            Ok(result) => result,
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing report: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            report.print();
        }

        // Write images on the first run only.
        if run == 0 {
            if let Some(ref path) = cli.output
                && let Ok(processed) = pipeline.processed()
            {
                write_raster(processed, path, "Processed image");
            }
            if let Some(ref path) = cli.preview_output
                && let Ok(preview) = pipeline.preview()
            {
                write_raster(preview, path, "Preview image");
            }
        }

        totals.push(report.total_millis);
    }

    if cli.runs > 1 {
        print_multi_run_summary(&totals);
    }

    ExitCode::SUCCESS
}

/// Print min/mean/max total duration across runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(totals: &[f64]) {
    println!();
    println!("Summary ({} runs)\n{}", totals.len(), "=".repeat(60));
    let min = totals.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = totals.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = totals.iter().sum::<f64>() / totals.len().max(1) as f64;
    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
}
