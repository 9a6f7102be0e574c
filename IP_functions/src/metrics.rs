//Full-reference image quality metrics for arrays normalized to a peak value of 1.0

use ndarray::{Array3, Zip};

/// Peak pixel value of normalized images.
pub const PIXEL_MAX: f64 = 1.0;

/// PSNR reported for identical images, and the cap for every other pair.
pub const MAX_PSNR: f64 = 100.0;

/// Per-image quality scores of a prediction against its ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageMetrics {
    pub psnr: f64,
    pub mse: f64,
    pub mae: f64,
}

/*
Mean squared error over every pixel channel

@param: target: ground truth array
@param: prediction: array of the same shape
@return: None if the shapes differ or the arrays are empty
*/
pub fn mse(target: &Array3<f32>, prediction: &Array3<f32>) -> Option<f64> {
    mean_of(target, prediction, |d| d * d)
}

/// Mean absolute error over every pixel channel, `None` on shape mismatch.
pub fn mae(target: &Array3<f32>, prediction: &Array3<f32>) -> Option<f64> {
    mean_of(target, prediction, f64::abs)
}

/*
Peak Signal-to-Noise Ratio in dB: 20 * log10(PIXEL_MAX) - 10 * log10(MSE)
Identical images have MSE = 0 and an infinite PSNR, so the result is capped at MAX_PSNR.

@param: target: ground truth array
@param: prediction: array of the same shape
@return: None if the shapes differ or the arrays are empty
*/
pub fn psnr(target: &Array3<f32>, prediction: &Array3<f32>) -> Option<f64> {
    mse(target, prediction).map(psnr_from_mse)
}

pub fn psnr_from_mse(mse: f64) -> f64 {
    if mse <= 0.0 {
        return MAX_PSNR;
    }
    (20.0 * PIXEL_MAX.log10() - 10.0 * mse.log10()).min(MAX_PSNR)
}

/// All three scores in a single pass pair, `None` on shape mismatch.
pub fn image_metrics(target: &Array3<f32>, prediction: &Array3<f32>) -> Option<ImageMetrics> {
    let mse = mse(target, prediction)?;
    let mae = mae(target, prediction)?;
    Some(ImageMetrics {
        psnr: psnr_from_mse(mse),
        mse,
        mae,
    })
}

fn mean_of(target: &Array3<f32>, prediction: &Array3<f32>, f: impl Fn(f64) -> f64) -> Option<f64> {
    if target.dim() != prediction.dim() || target.is_empty() {
        return None;
    }
    let sum = Zip::from(target)
        .and(prediction)
        .fold(0.0_f64, |acc, &t, &p| acc + f(f64::from(t) - f64::from(p)));
    Some(sum / target.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::add_gaussian_noise;
    use approx::assert_relative_eq;

    fn test_image() -> Array3<f32> {
        Array3::from_shape_fn((32, 32, 3), |(y, x, c)| {
            0.25 + 0.5 * ((x + y + c) % 16) as f32 / 16.0
        })
    }

    #[test]
    fn test_identical_images_hit_the_cap() {
        let img = test_image();
        assert_eq!(psnr(&img, &img), Some(MAX_PSNR));
        assert_eq!(mse(&img, &img), Some(0.0));
        assert_eq!(mae(&img, &img), Some(0.0));
    }

    #[test]
    fn test_known_values() {
        let a = Array3::<f32>::zeros((4, 4, 3));
        let b = Array3::<f32>::from_elem((4, 4, 3), 0.1);

        assert_relative_eq!(mse(&a, &b).unwrap(), 0.01, epsilon = 1e-6);
        assert_relative_eq!(mae(&a, &b).unwrap(), 0.1, epsilon = 1e-6);
        //MSE 0.01 -> 20 dB
        assert_relative_eq!(psnr(&a, &b).unwrap(), 20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_psnr_decreases_as_noise_grows() {
        let img = test_image();
        let sigmas = [0.01_f32, 0.02, 0.05, 0.1, 0.2];

        let scores: Vec<f64> = sigmas
            .iter()
            .map(|&sigma| psnr(&img, &add_gaussian_noise(&img, sigma, 7)).unwrap())
            .collect();

        for pair in scores.windows(2) {
            assert!(pair[0] > pair[1], "PSNR not decreasing: {scores:?}");
        }
        assert!(scores.iter().all(|s| *s < MAX_PSNR));
    }

    #[test]
    fn test_shape_mismatch_is_none() {
        let a = Array3::<f32>::zeros((4, 4, 3));
        let b = Array3::<f32>::zeros((4, 5, 3));
        assert!(psnr(&a, &b).is_none());
        assert!(image_metrics(&a, &b).is_none());
    }

    #[test]
    fn test_image_metrics_agree_with_individual_functions() {
        let img = test_image();
        let noisy = add_gaussian_noise(&img, 0.05, 3);
        let metrics = image_metrics(&img, &noisy).unwrap();

        assert_eq!(metrics.mse, mse(&img, &noisy).unwrap());
        assert_eq!(metrics.mae, mae(&img, &noisy).unwrap());
        assert_eq!(metrics.psnr, psnr(&img, &noisy).unwrap());
    }
}
