//! `denoise-model` CLI: train and score the residual U-Net denoiser, generate a
//! synthetic paired dataset, or denoise a single image with saved weights.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use denoise_model::{
    pipeline::{denoise_image, load_config, load_model, model_config_path},
    synth::{synthesize_pairs, SynthConfig},
    unet::ResUNetConfig,
    CpuBackend, Pipeline, PipelineConfig, TrainBackend,
};

/// Residual U-Net image denoising.
#[derive(Parser, Debug)]
#[command(name = "denoise-model")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on paired images, then report PSNR on the validation split.
    Train(TrainArgs),
    /// Write a synthetic paired dataset (identical controls plus noisy copies).
    Synth(SynthArgs),
    /// Denoise one image with saved weights.
    Denoise(DenoiseArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Directory of low quality images.
    #[arg(long, value_name = "DIR")]
    low: Option<PathBuf>,

    /// Directory of high quality images, paired with --low by sorted file name.
    #[arg(long, value_name = "DIR")]
    high: Option<PathBuf>,

    /// JSON pipeline configuration; flags below override its fields.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of epochs.
    #[arg(long, value_name = "INT")]
    epochs: Option<usize>,

    /// Samples per batch.
    #[arg(long, value_name = "INT")]
    batch_size: Option<usize>,

    /// Adam learning rate.
    #[arg(long, value_name = "FLOAT")]
    learning_rate: Option<f64>,

    /// First encoder width; the others are 2x, 4x, 8x and the bottleneck 16x.
    #[arg(long, value_name = "INT")]
    base_channels: Option<usize>,

    /// Write denoised validation images here.
    #[arg(long, value_name = "DIR")]
    predictions: Option<PathBuf>,

    /// Save the fitted weights (and their config) under this path.
    #[arg(long, value_name = "PATH")]
    save_model: Option<PathBuf>,

    /// Write the full run report as JSON.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SynthArgs {
    /// Output directory for low quality images.
    #[arg(long, value_name = "DIR")]
    low: PathBuf,

    /// Output directory for high quality images.
    #[arg(long, value_name = "DIR")]
    high: PathBuf,

    /// Number of pairs.
    #[arg(long, default_value = "10", value_name = "INT")]
    count: usize,

    /// Leading pairs written without noise.
    #[arg(long, default_value = "5", value_name = "INT")]
    controls: usize,

    /// Image side in pixels.
    #[arg(long, default_value = "256", value_name = "INT")]
    size: u32,

    /// Noise standard deviation on the [0, 1] scale.
    #[arg(long, default_value = "0.1", value_name = "FLOAT")]
    sigma: f32,

    /// Random seed for reproducibility.
    #[arg(long, default_value = "48", value_name = "INT")]
    seed: u64,
}

#[derive(Args, Debug)]
struct DenoiseArgs {
    /// Saved weights, as passed to `train --save-model`.
    #[arg(long, value_name = "PATH")]
    model: PathBuf,

    /// Pipeline configuration; defaults to the one saved next to the model.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Input image path.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output image path.
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("denoise_model={log_level},ip_functions={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let result = match &cli.command {
        Command::Train(args) => train(args),
        Command::Synth(args) => synth(args),
        Command::Denoise(args) => denoise(args),
    };

    if let Err(err) = result {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn train(args: &TrainArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config(path).context("Failed to load pipeline config")?,
        None => {
            let (Some(low), Some(high)) = (&args.low, &args.high) else {
                anyhow::bail!("--low and --high are required without --config");
            };
            PipelineConfig::new(low.display().to_string(), high.display().to_string())
        }
    };

    // Flags override the file
    if let Some(low) = &args.low {
        config.low_dir = low.display().to_string();
    }
    if let Some(high) = &args.high {
        config.high_dir = high.display().to_string();
    }
    if let Some(epochs) = args.epochs {
        config.training.num_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.training.learning_rate = learning_rate;
    }
    if let Some(base) = args.base_channels {
        config.model = ResUNetConfig::scaled(base);
    }
    if let Some(dir) = &args.predictions {
        config.prediction_dir = Some(dir.display().to_string());
    }
    if let Some(path) = &args.save_model {
        config.model_path = Some(path.display().to_string());
    }

    let pipeline = Pipeline::new(config).context("Invalid pipeline configuration")?;
    let report = pipeline
        .run::<TrainBackend>(&NdArrayDevice::Cpu)
        .context("Denoising run failed")?;

    println!("Mean PSNR score: {}", report.evaluation.mean_psnr);
    println!("Mean Squared Error (MSE): {}", report.evaluation.mean_mse);
    println!("Mean Absolute Error (MAE): {}", report.evaluation.mean_mae);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(())
}

fn synth(args: &SynthArgs) -> Result<()> {
    let config = SynthConfig::new()
        .with_count(args.count)
        .with_controls(args.controls)
        .with_size(args.size)
        .with_sigma(args.sigma)
        .with_seed(args.seed);

    let written = synthesize_pairs(&args.low, &args.high, &config).context("Failed to write dataset")?;
    println!(
        "Wrote {written} pairs to {} and {}",
        args.low.display(),
        args.high.display()
    );
    Ok(())
}

fn denoise(args: &DenoiseArgs) -> Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| model_config_path(&args.model));
    let config = load_config(&config_path).context("Failed to load model config")?;

    let device = NdArrayDevice::Cpu;
    let model = load_model::<CpuBackend>(&config.model, &args.model, &device).context("Failed to load model")?;

    let img = image::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let output = denoise_image(&model, &img, config.image_width, config.image_height, &device)
        .context("Failed to denoise image")?;
    output
        .save(&args.output)
        .with_context(|| format!("Failed to save {}", args.output.display()))?;

    println!(
        "Successfully denoised {} -> {}",
        args.input.display(),
        args.output.display()
    );
    Ok(())
}
