//Synthetic corruption used to build paired low/high quality samples

use std::f32::consts::PI;

use ndarray::Array3;
use rand::{rngs::StdRng, Rng, SeedableRng};

/*
Add zero-mean Gaussian noise to every pixel channel, then clamp back into [0, 1].
The same seed always produces the same noise field, so corrupted datasets are reproducible.

@param: img: normalized image array
@param: sigma: standard deviation of the noise in normalized units
@param: seed: rng seed
@return: noisy copy of img
*/
pub fn add_gaussian_noise(img: &Array3<f32>, sigma: f32, seed: u64) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    img.mapv(|v| (v + sigma * standard_normal(&mut rng)).clamp(0.0, 1.0))
}

//Box-Muller transform, only the cosine branch is used
fn standard_normal<R: Rng>(rng: &mut R) -> f32 {
    let u1 = rng.random::<f32>().max(f32::MIN_POSITIVE); //ln(0) guard
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_noise() {
        let img = Array3::<f32>::from_elem((8, 8, 3), 0.5);
        assert_eq!(add_gaussian_noise(&img, 0.1, 11), add_gaussian_noise(&img, 0.1, 11));
        assert_ne!(add_gaussian_noise(&img, 0.1, 11), add_gaussian_noise(&img, 0.1, 12));
    }

    #[test]
    fn test_output_stays_in_range() {
        let img = Array3::<f32>::from_shape_fn((16, 16, 3), |(y, _, _)| if y % 2 == 0 { 0.0 } else { 1.0 });
        let noisy = add_gaussian_noise(&img, 0.5, 1);
        assert!(noisy.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let img = Array3::<f32>::from_elem((4, 4, 3), 0.3);
        assert_eq!(add_gaussian_noise(&img, 0.0, 5), img);
    }

    #[test]
    fn test_noise_is_roughly_zero_mean() {
        let img = Array3::<f32>::from_elem((64, 64, 3), 0.5);
        let noisy = add_gaussian_noise(&img, 0.05, 9);
        let mean = noisy.iter().map(|&v| f64::from(v)).sum::<f64>() / noisy.len() as f64;
        assert!((mean - 0.5).abs() < 0.01, "mean {mean}");
    }
}
