//Evaluation of a fitted model on held-out pairs: forward passes only, then PSNR / MSE / MAE per image

use burn::prelude::*;
use ip_functions::{image_metrics, ImageMetrics};
use ndarray::Array3;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::tensor::{batch_to_images, images_to_batch};
use crate::unet::ResUNet;

/// Scores of one prediction against its ground truth.
#[derive(Debug, Clone, Serialize)]
pub struct ImageScore {
    pub index: usize,
    pub psnr: f64,
    pub mse: f64,
    pub mae: f64,
}

/// Per-image scores and their arithmetic means. `mean_psnr` is the headline number.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub mean_psnr: f64,
    pub mean_mse: f64,
    pub mean_mae: f64,
    pub images: Vec<ImageScore>,
}

/*
Run the model over a set of inputs without touching its parameters.

@param model: fitted ResUNet, usually the inner-backend copy from AutodiffModule::valid()
@param inputs: images as Array3<f32> of shape [H, W, 3]
@param batch_size: images per forward pass
@param device: burn backend device
@return: one prediction per input, same order and shape
*/
pub fn predict<B: Backend>(
    model: &ResUNet<B>,
    inputs: &[Array3<f32>],
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<Array3<f32>>> {
    let mut predictions = Vec::with_capacity(inputs.len());
    for chunk in inputs.chunks(batch_size.max(1)) {
        let batch = images_to_batch::<B, _>(chunk, device)?;
        predictions.extend(batch_to_images(model.forward(batch))?);
    }
    Ok(predictions)
}

/*
Score predictions against ground truth, PSNR assumes a peak pixel value of 1.0 and is capped at ip_functions::MAX_PSNR for identical pairs.

@param targets: ground truth images
@param predictions: model outputs aligned with targets
@return: EvaluationReport, or an error on empty input / count or shape mismatch
*/
pub fn score_predictions(targets: &[Array3<f32>], predictions: &[Array3<f32>]) -> Result<EvaluationReport> {
    if targets.len() != predictions.len() {
        return Err(Error::PairCountMismatch {
            low: predictions.len(),
            high: targets.len(),
        });
    }
    if targets.is_empty() {
        return Err(Error::EmptyValidationSet {
            samples: 0,
            fraction: 0.0,
        });
    }

    let mut images = Vec::with_capacity(targets.len());
    for (index, (target, prediction)) in targets.iter().zip(predictions).enumerate() {
        let ImageMetrics { psnr, mse, mae } =
            image_metrics(target, prediction).ok_or_else(|| Error::ShapeMismatch {
                context: format!("evaluation pair {index}"),
                expected: format!("{:?}", target.dim()),
                actual: format!("{:?}", prediction.dim()),
            })?;
        images.push(ImageScore { index, psnr, mse, mae });
    }

    let count = images.len() as f64;
    let mean = |f: fn(&ImageScore) -> f64| images.iter().map(f).sum::<f64>() / count;

    Ok(EvaluationReport {
        mean_psnr: mean(|s| s.psnr),
        mean_mse: mean(|s| s.mse),
        mean_mae: mean(|s| s.mae),
        images,
    })
}

/// Predict every input and score it against its target.
pub fn evaluate<B: Backend>(
    model: &ResUNet<B>,
    inputs: &[Array3<f32>],
    targets: &[Array3<f32>],
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport> {
    if inputs.len() != targets.len() {
        return Err(Error::PairCountMismatch {
            low: inputs.len(),
            high: targets.len(),
        });
    }
    let predictions = predict(model, inputs, batch_size, device)?;
    score_predictions(targets, &predictions)
}
