//Synthetic paired dataset for demos and smoke tests
//High quality images are smooth procedural patterns, low quality copies are either identical (controls) or carry Gaussian noise

use std::fs;
use std::path::Path;

use burn::prelude::*;
use image::{Rgb, RgbImage};
use ip_functions::{array3_to_image, image_to_array3, noise::add_gaussian_noise};
use tracing::info;

use crate::error::{self, Error};

/*
@field count: number of pairs to write (default 10)
@field controls: how many of the first pairs are identical low/high copies (default 5)
@field size: square image side in pixels (default 256)
@field sigma: noise standard deviation on the [0, 1] scale (default 0.1)
@field seed: base seed, pair i uses seed + i wrapping at u64::MAX (default 48)
*/
#[derive(Config, Debug)]
pub struct SynthConfig {
    #[config(default = "10")]
    pub count: usize,
    #[config(default = "5")]
    pub controls: usize,
    #[config(default = "256")]
    pub size: u32,
    #[config(default = "0.1")]
    pub sigma: f32,
    #[config(default = "48")]
    pub seed: u64,
}

/*
Write config.count pairs named pair_000.png, pair_001.png, ... into both directories (created if missing).

@param low_dir: destination of the low quality copies
@param high_dir: destination of the clean images
@param config: what to generate
@return: number of pairs written
*/
pub fn synthesize_pairs(low_dir: &Path, high_dir: &Path, config: &SynthConfig) -> error::Result<usize> {
    if config.controls > config.count {
        return Err(Error::invalid(
            "controls",
            format!("{} controls for only {} pairs", config.controls, config.count),
        ));
    }
    if config.size == 0 {
        return Err(Error::invalid("size", "must be positive"));
    }
    fs::create_dir_all(low_dir)?;
    fs::create_dir_all(high_dir)?;

    for index in 0..config.count {
        let name = format!("pair_{index:03}.png");
        let high = procedural_image(index, config.size);

        let low = if index < config.controls {
            high.clone()
        } else {
            let seed = config.seed.wrapping_add(index as u64);
            let noisy = add_gaussian_noise(&image_to_array3(&high), config.sigma, seed);
            array3_to_image(&noisy)
        };

        save(&high, &high_dir.join(&name))?;
        save(&low, &low_dir.join(&name))?;
    }

    info!(
        "Wrote {} pairs ({} controls, sigma {}) to {} and {}",
        config.count,
        config.controls,
        config.sigma,
        low_dir.display(),
        high_dir.display()
    );
    Ok(config.count)
}

//smooth sinusoidal color pattern, phase shifted per index so no two images are the same
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn procedural_image(index: usize, size: u32) -> RgbImage {
    let phase = index as f32 * 0.7;
    RgbImage::from_fn(size, size, |x, y| {
        let u = x as f32 / size as f32;
        let v = y as f32 / size as f32;
        let channels = [
            0.5 + 0.4 * (6.0 * u + phase).sin(),
            0.5 + 0.4 * (5.0 * v - phase).cos(),
            0.5 + 0.4 * (4.0 * (u + v) + 2.0 * phase).sin(),
        ];
        Rgb(channels.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8))
    })
}

fn save(img: &RgbImage, path: &Path) -> error::Result<()> {
    img.save(path).map_err(|source| Error::ImageSave {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::list_image_files;
    use tempfile::TempDir;

    #[test]
    fn test_controls_identical_rest_noisy() {
        let root = TempDir::new().unwrap();
        let (low, high) = (root.path().join("low"), root.path().join("high"));
        let config = SynthConfig::new().with_count(4).with_controls(2).with_size(16);

        assert_eq!(synthesize_pairs(&low, &high, &config).unwrap(), 4);

        let low_files = list_image_files(&low).unwrap();
        let high_files = list_image_files(&high).unwrap();
        assert_eq!(low_files.len(), 4);
        assert_eq!(high_files.len(), 4);

        for (i, (l, h)) in low_files.iter().zip(&high_files).enumerate() {
            let l = image::open(l).unwrap().to_rgb8();
            let h = image::open(h).unwrap().to_rgb8();
            assert_eq!(l.dimensions(), (16, 16));
            if i < 2 {
                assert_eq!(l, h);
            } else {
                assert_ne!(l, h);
            }
        }
    }

    #[test]
    fn test_more_controls_than_pairs_is_rejected() {
        let root = TempDir::new().unwrap();
        let config = SynthConfig::new().with_count(2).with_controls(3);
        assert!(synthesize_pairs(&root.path().join("l"), &root.path().join("h"), &config).is_err());
    }

    #[test]
    fn test_seed_near_max_wraps() {
        let root = TempDir::new().unwrap();
        let config = SynthConfig::new()
            .with_count(3)
            .with_controls(0)
            .with_size(8)
            .with_seed(u64::MAX);
        assert_eq!(
            synthesize_pairs(&root.path().join("low"), &root.path().join("high"), &config).unwrap(),
            3
        );
    }
}
