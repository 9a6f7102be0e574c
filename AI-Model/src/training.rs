//Training driver for the residual U-Net
//Adam with per-value gradient clipping, mean absolute error loss, fixed number of passes over the training split

use burn::{
    grad_clipping::GradientClippingConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use ndarray::Array3;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{self, Error};
use crate::tensor::images_to_batch;
use crate::unet::ResUNet;

/*
Training hyperparameters. Defaults are a single smoke-test scale pass.

@field learning_rate: Adam step size (default 1e-4)
@field grad_clip: every gradient component is clipped to [-grad_clip, grad_clip] (default 1.0)
@field epsilon: Adam denominator term (default 1e-7)
@field batch_size: samples per parameter update (default 2), the final batch may be smaller
@field num_epochs: full passes over the training split (default 1)
@field shuffle: reshuffle the sample order at the start of every epoch (default true)
@field seed: rng seed for the shuffle (default 48)
*/
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "1e-4")]
    pub learning_rate: f64,
    #[config(default = "1.0")]
    pub grad_clip: f32,
    #[config(default = "1e-7")]
    pub epsilon: f32,
    #[config(default = "2")]
    pub batch_size: usize,
    #[config(default = "1")]
    pub num_epochs: usize,
    #[config(default = "true")]
    pub shuffle: bool,
    #[config(default = "48")]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> error::Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::invalid("learning_rate", format!("{} must be positive", self.learning_rate)));
        }
        if !(self.grad_clip.is_finite() && self.grad_clip > 0.0) {
            return Err(Error::invalid("grad_clip", format!("{} must be positive", self.grad_clip)));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(Error::invalid("epsilon", format!("{} must be positive", self.epsilon)));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid("batch_size", "must be at least 1"));
        }
        if self.num_epochs == 0 {
            return Err(Error::invalid("num_epochs", "must be at least 1"));
        }
        Ok(())
    }
}

/// What happened during fitting.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub batches_per_epoch: usize,
    /// Samples in the final, possibly short, batch of an epoch.
    pub last_batch_size: usize,
    pub steps: usize,
    /// Mean batch loss of each epoch.
    pub epoch_losses: Vec<f32>,
}

/*
Mean absolute error loss: mean(|predictions - targets|)

@param predictions: model output, shape [batch, C, H, W]
@param targets: ground truth of the same shape
@return: scalar loss tensor
*/
pub fn l1_loss<B: Backend>(predictions: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    (predictions - targets).abs().mean()
}

/*
Fit the model on aligned (input, target) pairs. Parameters are updated after every batch; a non-finite loss stops the run instead of handing back an unusable model.

@param model: freshly initialized ResUNet
@param inputs: low quality images, Array3<f32> of shape [H, W, 3]
@param targets: high quality images, aligned with inputs
@param config: training hyperparameters
@param device: burn backend device
@return: trained model and a TrainingReport
*/
pub fn train<B: AutodiffBackend>(
    model: ResUNet<B>,
    inputs: &[Array3<f32>],
    targets: &[Array3<f32>],
    config: &TrainingConfig,
    device: &B::Device,
) -> error::Result<(ResUNet<B>, TrainingReport)> {
    config.validate()?;
    if inputs.len() != targets.len() {
        return Err(Error::PairCountMismatch {
            low: inputs.len(),
            high: targets.len(),
        });
    }
    if inputs.is_empty() {
        return Err(Error::EmptyDataset {
            what: "training split".to_string(),
        });
    }

    let num_samples = inputs.len();
    let batches_per_epoch = num_samples.div_ceil(config.batch_size);
    info!(
        "Training on {} samples: {} epoch(s), {} batches of up to {}, learning rate {}",
        num_samples, config.num_epochs, batches_per_epoch, config.batch_size, config.learning_rate
    );

    let mut optimizer = AdamConfig::new()
        .with_epsilon(config.epsilon)
        .with_grad_clipping(Some(GradientClippingConfig::Value(config.grad_clip)))
        .init::<B, ResUNet<B>>();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order: Vec<usize> = (0..num_samples).collect();

    let mut current_model = model;
    let mut epoch_losses = Vec::with_capacity(config.num_epochs);
    let mut steps = 0;
    let mut last_batch_size = 0;

    for epoch in 0..config.num_epochs {
        if config.shuffle {
            order.shuffle(&mut rng);
        }
        let mut epoch_loss = 0.0f32;

        for (batch, indices) in order.chunks(config.batch_size).enumerate() {
            let x = images_to_batch::<B, _>(indices.iter().map(|&i| &inputs[i]), device)?;
            let y = images_to_batch::<B, _>(indices.iter().map(|&i| &targets[i]), device)?;

            //forward pass and loss
            let prediction = current_model.forward(x);
            let loss = l1_loss(prediction, y);
            let loss_value: f32 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(Error::NonFiniteLoss {
                    epoch: epoch + 1,
                    batch: batch + 1,
                    value: loss_value,
                });
            }
            epoch_loss += loss_value;
            steps += 1;
            last_batch_size = indices.len();
            debug!(
                "Epoch {}/{} batch {}/{} ({} samples): L1 loss = {:.6}",
                epoch + 1,
                config.num_epochs,
                batch + 1,
                batches_per_epoch,
                indices.len(),
                loss_value
            );

            //backward pass: gradients, then one clipped Adam step
            let grads = loss.backward();
            let grads_params = GradientsParams::from_grads(grads, &current_model);
            current_model = optimizer.step(config.learning_rate, current_model, grads_params);
        }

        let avg_loss = epoch_loss / batches_per_epoch as f32;
        info!("Epoch {}/{}: L1 loss = {:.6}", epoch + 1, config.num_epochs, avg_loss);
        epoch_losses.push(avg_loss);
    }

    Ok((
        current_model,
        TrainingReport {
            samples: num_samples,
            batches_per_epoch,
            last_batch_size,
            steps,
            epoch_losses,
        },
    ))
}
