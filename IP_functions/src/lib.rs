//Pixel-level image processing routines shared by the denoising model: color conversion, preprocessing, quality metrics and noise injection
//Nothing in here knows about the learning backend, everything works on ndarray arrays or image buffers

pub mod color;
pub mod metrics;
pub mod noise;
pub mod preprocess;

pub use metrics::{image_metrics, mae, mse, psnr, ImageMetrics, MAX_PSNR};
pub use preprocess::{array3_to_image, image_to_array3, preprocess_image, CHANNELS};
