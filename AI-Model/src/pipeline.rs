//! The end-to-end run: load -> split -> build -> train -> evaluate, plus the
//! optional artifacts (validation predictions, model weights) and single-image
//! inference with saved weights.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use image::{DynamicImage, RgbImage};
use ip_functions::{color::lab8_array_to_rgb_image, preprocess_image};
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::{validation_size, PairedDataset};
use crate::error::{self, Error};
use crate::evaluation::{predict, score_predictions, EvaluationReport};
use crate::training::{train, TrainingConfig, TrainingReport};
use crate::unet::{ResUNet, ResUNetConfig};

/// Everything a run needs. Defaults reproduce the reference setup: 256x256,
/// 10% validation with seed 48, Adam 1e-4 clipped at 1.0, batch 2, one epoch.
#[derive(Config, Debug)]
pub struct PipelineConfig {
    /// Directory of low quality (noisy) inputs.
    pub low_dir: String,
    /// Directory of high quality targets, paired by sorted file name.
    pub high_dir: String,
    #[config(default = "256")]
    pub image_width: u32,
    #[config(default = "256")]
    pub image_height: u32,
    #[config(default = "0.1")]
    pub validation_fraction: f64,
    #[config(default = "48")]
    pub seed: u64,
    #[config(default = "ResUNetConfig::new()")]
    pub model: ResUNetConfig,
    #[config(default = "TrainingConfig::new()")]
    pub training: TrainingConfig,
    /// Write denoised validation images (sRGB PNG) here.
    pub prediction_dir: Option<String>,
    /// Save the fitted weights here (burn appends the record extension).
    pub model_path: Option<String>,
}

/// Outcome of one full run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub validation_names: Vec<String>,
    pub training: TrainingReport,
    pub evaluation: EvaluationReport,
}

/// Ordered, single-threaded denoising run.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate the configuration up front so that bad parameters never reach
    /// the loader or the network.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for out-of-range values.
    pub fn new(config: PipelineConfig) -> error::Result<Self> {
        if !(0.0..1.0).contains(&config.validation_fraction) {
            return Err(Error::invalid(
                "validation_fraction",
                format!("{} is outside [0, 1)", config.validation_fraction),
            ));
        }
        config.model.validate()?;
        config
            .model
            .check_input_size(config.image_width as usize, config.image_height as usize)?;
        config.training.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage in order on backend `B`.
    ///
    /// # Errors
    ///
    /// Any input, shape or numeric failure aborts the run; an empty validation
    /// split is rejected before training starts.
    pub fn run<B: AutodiffBackend>(&self, device: &B::Device) -> error::Result<RunReport> {
        let config = &self.config;

        // 1. load
        let dataset = PairedDataset::load(
            Path::new(&config.low_dir),
            Path::new(&config.high_dir),
            config.image_width,
            config.image_height,
        )?;

        // 2. split
        let total = dataset.len();
        if validation_size(total, config.validation_fraction) == 0 {
            return Err(Error::EmptyValidationSet {
                samples: total,
                fraction: config.validation_fraction,
            });
        }
        let split = dataset.split(config.validation_fraction, config.seed)?;
        if split.train.is_empty() {
            return Err(Error::EmptyDataset {
                what: "training split".to_string(),
            });
        }
        info!(
            "Split {} pairs into {} training / {} validation",
            total,
            split.train.len(),
            split.validation.len()
        );

        // 3. build
        info!("Model architecture:");
        for line in config
            .model
            .describe(config.image_width as usize, config.image_height as usize)
        {
            info!("  {line}");
        }
        let model = config.model.init::<B>(device);

        // 4. train
        let (model, training) = train(
            model,
            &split.train.low,
            &split.train.high,
            &config.training,
            device,
        )?;

        // 5. evaluate, forward only on the inner backend
        let model = model.valid();
        let predictions = predict(&model, &split.validation.low, config.training.batch_size, device)?;
        let evaluation = score_predictions(&split.validation.high, &predictions)?;
        info!(
            "Validation: mean PSNR {:.4} dB, MSE {:.6}, MAE {:.6}",
            evaluation.mean_psnr, evaluation.mean_mse, evaluation.mean_mae
        );

        // 6. artifacts
        if let Some(dir) = &config.prediction_dir {
            save_predictions(Path::new(dir), &split.validation.names, &predictions)?;
        }
        if let Some(path) = &config.model_path {
            save_model(&model, Path::new(path))?;
            let config_path = model_config_path(Path::new(path));
            config.save(&config_path)?;
            info!("Saved model to {path} and config to {}", config_path.display());
        }

        Ok(RunReport {
            train_samples: split.train.len(),
            validation_samples: split.validation.len(),
            validation_names: split.validation.names,
            training,
            evaluation,
        })
    }
}

/// Load a pipeline configuration from JSON.
pub fn load_config(path: &Path) -> error::Result<PipelineConfig> {
    PipelineConfig::load(path).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        reason: format!("{e:?}"),
    })
}

/// Where the configuration belonging to a saved model lives.
pub fn model_config_path(model_path: &Path) -> PathBuf {
    let mut name = model_path.as_os_str().to_owned();
    name.push(".config.json");
    PathBuf::from(name)
}

/// Save weights with burn's compact (half precision, gzipped) recorder.
pub fn save_model<B: Backend>(model: &ResUNet<B>, path: &Path) -> error::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    model
        .clone()
        .save_file(path, &CompactRecorder::new())
        .map_err(|e| Error::Record {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })
}

/// Rebuild the architecture from `config` and load saved weights into it.
pub fn load_model<B: Backend>(config: &ResUNetConfig, path: &Path, device: &B::Device) -> error::Result<ResUNet<B>> {
    config.validate()?;
    config
        .init::<B>(device)
        .load_file(path, &CompactRecorder::new(), device)
        .map_err(|e| Error::Record {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        })
}

/*
Denoise one decoded image with a fitted model: same preprocessing as training, one forward pass, then Lab back to sRGB.

@param model: fitted ResUNet
@param img: decoded input image
@param width, height: the resolution the model was trained at
@param device: burn backend device
@return: denoised image at (width, height)
*/
pub fn denoise_image<B: Backend>(
    model: &ResUNet<B>,
    img: &DynamicImage,
    width: u32,
    height: u32,
    device: &B::Device,
) -> error::Result<RgbImage> {
    let input = preprocess_image(img, width, height);
    let prediction = predict(model, std::slice::from_ref(&input), 1, device)?
        .pop()
        .ok_or_else(|| Error::TensorData("model returned no prediction".to_string()))?;
    Ok(lab8_array_to_rgb_image(&prediction))
}

/// Each prediction is written as `<validation file name>.png`, so every input keeps its own output file.
fn save_predictions(dir: &Path, names: &[String], predictions: &[ndarray::Array3<f32>]) -> error::Result<()> {
    fs::create_dir_all(dir)?;
    for (name, prediction) in names.iter().zip(predictions) {
        let path = dir.join(prediction_file_name(name));
        lab8_array_to_rgb_image(prediction)
            .save(&path)
            .map_err(|source| Error::ImageSave {
                path: path.clone(),
                source,
            })?;
    }
    if names.len() != predictions.len() {
        warn!(
            "{} names for {} predictions, extra predictions were not written",
            names.len(),
            predictions.len()
        );
    }
    info!("Wrote {} predictions to {}", predictions.len().min(names.len()), dir.display());
    Ok(())
}

fn prediction_file_name(name: &str) -> String {
    format!("{name}.png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{synthesize_pairs, SynthConfig};
    use crate::{CpuBackend, TrainBackend};
    use burn::backend::ndarray::NdArrayDevice;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    const SIZE: u32 = 256;

    fn small_config(root: &Path) -> PipelineConfig {
        PipelineConfig::new(
            root.join("low").display().to_string(),
            root.join("high").display().to_string(),
        )
        .with_image_width(SIZE)
        .with_image_height(SIZE)
        .with_model(ResUNetConfig::scaled(2))
    }

    fn synth(root: &Path, count: usize) {
        let config = SynthConfig::new()
            .with_count(count)
            .with_controls(count / 2)
            .with_size(SIZE);
        synthesize_pairs(&root.join("low"), &root.join("high"), &config).unwrap();
    }

    #[test]
    fn test_ten_pairs_end_to_end() {
        let root = TempDir::new().unwrap();
        synth(root.path(), 10);

        let pipeline = Pipeline::new(small_config(root.path())).unwrap();
        let report = pipeline.run::<TrainBackend>(&NdArrayDevice::Cpu).unwrap();

        assert_eq!(report.validation_samples, 1);
        assert_eq!(report.train_samples, 9);
        assert_eq!(report.training.samples, 9);
        assert_eq!(report.training.batches_per_epoch, 5);
        assert_eq!(report.training.last_batch_size, 1);
        assert_eq!(report.training.steps, 5);
        assert_eq!(report.evaluation.images.len(), 1);
        assert!(report.evaluation.mean_psnr.is_finite());
        assert!(report.evaluation.mean_psnr > 0.0);
    }

    #[test]
    fn test_mismatched_directories_fail_before_training() {
        let root = TempDir::new().unwrap();
        synth(root.path(), 10);
        RgbImage::from_pixel(SIZE, SIZE, Rgb([1, 2, 3]))
            .save(root.path().join("low").join("extra_999.png"))
            .unwrap();

        let pipeline = Pipeline::new(small_config(root.path())).unwrap();
        let err = pipeline.run::<TrainBackend>(&NdArrayDevice::Cpu).unwrap_err();
        assert!(matches!(err, Error::PairCountMismatch { low: 11, high: 10 }));
    }

    #[test]
    fn test_too_few_samples_for_validation() {
        let root = TempDir::new().unwrap();
        synth(root.path(), 4);

        let pipeline = Pipeline::new(small_config(root.path())).unwrap();
        let err = pipeline.run::<TrainBackend>(&NdArrayDevice::Cpu).unwrap_err();
        assert!(matches!(err, Error::EmptyValidationSet { samples: 4, .. }));
    }

    #[test]
    fn test_invalid_parameters_are_rejected_up_front() {
        let root = TempDir::new().unwrap();
        let base = small_config(root.path());

        assert!(Pipeline::new(base.clone().with_validation_fraction(1.5)).is_err());
        assert!(Pipeline::new(base.clone().with_image_width(100)).is_err());
        assert!(Pipeline::new(base.with_training(TrainingConfig::new().with_num_epochs(0))).is_err());
    }

    #[test]
    fn test_zero_width_model_is_rejected_before_init() {
        let root = TempDir::new().unwrap();
        let config = small_config(root.path()).with_model(ResUNetConfig::scaled(0));
        assert!(matches!(
            Pipeline::new(config),
            Err(Error::InvalidParameter { .. })
        ));

        let device = NdArrayDevice::Cpu;
        let err = load_model::<CpuBackend>(&ResUNetConfig::scaled(0), &root.path().join("unet"), &device)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_predictions_keep_the_full_file_name() {
        let root = TempDir::new().unwrap();
        let names = vec!["x.png".to_string(), "x.jpeg".to_string(), "x.jpeg.png".to_string()];
        let predictions = vec![
            ndarray::Array3::<f32>::zeros((8, 8, 3)),
            ndarray::Array3::<f32>::ones((8, 8, 3)),
            ndarray::Array3::<f32>::zeros((8, 8, 3)),
        ];

        save_predictions(root.path(), &names, &predictions).unwrap();

        assert!(root.path().join("x.png.png").is_file());
        assert!(root.path().join("x.jpeg.png").is_file());
        assert!(root.path().join("x.jpeg.png.png").is_file());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_artifacts_and_reload() {
        let root = TempDir::new().unwrap();
        synth(root.path(), 10);
        let prediction_dir = root.path().join("predictions");
        let model_path = root.path().join("model").join("unet");

        let config = small_config(root.path())
            .with_prediction_dir(Some(prediction_dir.display().to_string()))
            .with_model_path(Some(model_path.display().to_string()));
        let report = Pipeline::new(config).unwrap().run::<TrainBackend>(&NdArrayDevice::Cpu).unwrap();

        let written: Vec<_> = fs::read_dir(&prediction_dir).unwrap().collect();
        assert_eq!(written.len(), report.validation_samples);

        let saved = load_config(&model_config_path(&model_path)).unwrap();
        assert_eq!(saved.image_width, SIZE);

        let device = NdArrayDevice::Cpu;
        let model = load_model::<CpuBackend>(&saved.model, &model_path, &device).unwrap();
        let input = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 40, Rgb([120, 60, 200])));
        let output = denoise_image(&model, &input, saved.image_width, saved.image_height, &device).unwrap();
        assert_eq!(output.dimensions(), (SIZE, SIZE));
    }
}
