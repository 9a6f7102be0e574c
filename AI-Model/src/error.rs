//! Error types for the denoising pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Every failure is run-terminating; callers get the offending path or shape back.
#[derive(Error, Debug)]
pub enum Error {
    /// An input directory does not exist or is not a directory.
    #[error("image directory does not exist: {path}")]
    MissingDirectory { path: PathBuf },

    /// Listing a directory failed.
    #[error("failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to decode an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to write an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The low and high quality sides do not pair up one to one.
    #[error("paired inputs differ in length: {low} low quality vs {high} high quality")]
    PairCountMismatch { low: usize, high: usize },

    /// An image or tensor does not have the shape the network expects.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// Nothing to work on.
    #[error("no samples in {what}")]
    EmptyDataset { what: String },

    /// No samples to validate on: the split rounded down to zero, or evaluation got an empty set.
    #[error("no validation samples: {samples} pairs at validation fraction {fraction}")]
    EmptyValidationSet { samples: usize, fraction: f64 },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Training diverged.
    #[error("loss became non-finite ({value}) at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, value: f32 },

    /// Reading values back out of a tensor failed.
    #[error("tensor data conversion failed: {0}")]
    TensorData(String),

    /// Saving or loading model weights failed.
    #[error("model record error at {path}: {reason}")]
    Record { path: PathBuf, reason: String },

    /// A configuration file could not be loaded.
    #[error("failed to load config from {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for denoising operations.
pub type Result<T> = std::result::Result<T, Error>;
