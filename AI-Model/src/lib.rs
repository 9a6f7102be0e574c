//! # `denoise-model`
//!
//! Trains a residual U-Net to map low quality (noisy) images to their high
//! quality counterparts, then scores it on a held-out split with PSNR.
//!
//! Images are handled in 8-bit Lab normalized to `[0, 1]`; the pixel-level
//! routines live in the `ip_functions` crate, this crate holds the network,
//! the data handling and the training/evaluation pipeline.
//!
//! ## Example
//!
//! ```no_run
//! use burn::backend::ndarray::NdArrayDevice;
//! use denoise_model::{Pipeline, PipelineConfig, TrainBackend};
//!
//! # fn main() -> denoise_model::Result<()> {
//! let config = PipelineConfig::new("data/low".into(), "data/high".into());
//! let report = Pipeline::new(config)?.run::<TrainBackend>(&NdArrayDevice::Cpu)?;
//! println!("Mean PSNR score: {}", report.evaluation.mean_psnr);
//! # Ok(())
//! # }
//! ```

pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod pipeline;
pub mod synth;
pub mod tensor;
pub mod training;
pub mod unet;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineConfig, RunReport};

/// CPU backend used for inference.
pub type CpuBackend = burn::backend::ndarray::NdArray<f32>;
/// Autodiff wrapper of [`CpuBackend`] used for training.
pub type TrainBackend = burn::backend::Autodiff<CpuBackend>;
