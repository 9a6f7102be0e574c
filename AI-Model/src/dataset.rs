//Paired dataset loading and the train/validation split
//Pairs are aligned purely by sorted file name, so both directories must list the same number of images

use std::fs;
use std::path::{Path, PathBuf};

use ip_functions::{preprocess_image, CHANNELS};
use ndarray::Array3;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Exact, case-sensitive file name suffixes that are picked up.
pub const SUPPORTED_EXTENSIONS: [&str; 2] = [".png", ".jpeg"];

/*
List every supported image file in a flat directory, sorted by file name.
Subdirectories and files with other suffixes are skipped silently (".PNG" and ".jpg" included).

@param dir: directory to scan
@return: sorted paths, or MissingDirectory / ReadDirectory
*/
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::MissingDirectory {
            path: dir.to_path_buf(),
        });
    }

    let read_err = |source: std::io::Error| Error::ReadDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if !path.is_file() {
            continue;
        }
        let supported = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| SUPPORTED_EXTENSIONS.iter().any(|ext| name.ends_with(ext)));
        if supported {
            files.push(path);
        } else {
            debug!("skipping {}", path.display());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/*
Decode and preprocess one image file. A decode failure is fatal and carries the file path.

@param path: image file
@param width, height: target resolution
@return: normalized Lab array of shape (height, width, 3)
*/
pub fn load_image(path: &Path, width: u32, height: u32) -> Result<Array3<f32>> {
    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let array = preprocess_image(&img, width, height);
    let expected = (height as usize, width as usize, CHANNELS);
    if array.dim() != expected {
        return Err(Error::ShapeMismatch {
            context: path.display().to_string(),
            expected: format!("{expected:?}"),
            actual: format!("{:?}", array.dim()),
        });
    }
    debug!("loaded {}", path.display());
    Ok(array)
}

/// Load every supported image of a directory in sorted order.
pub fn load_images(dir: &Path, width: u32, height: u32) -> Result<Vec<Array3<f32>>> {
    let files = list_image_files(dir)?;
    files.iter().map(|path| load_image(path, width, height)).collect()
}

/// Index-aligned low/high quality images. `names` holds the low quality file names.
#[derive(Debug, Clone)]
pub struct PairedDataset {
    pub names: Vec<String>,
    pub low: Vec<Array3<f32>>,
    pub high: Vec<Array3<f32>>,
}

/// Training and validation halves of a [`PairedDataset`], each still row-aligned.
#[derive(Debug, Clone)]
pub struct SplitDataset {
    pub train: PairedDataset,
    pub validation: PairedDataset,
}

impl PairedDataset {
    /*
    Build a dataset from in-memory arrays, checking that both sides have the same length and every image the same shape.

    @param names: one label per pair
    @param low, high: aligned image sequences
    */
    pub fn new(names: Vec<String>, low: Vec<Array3<f32>>, high: Vec<Array3<f32>>) -> Result<Self> {
        if low.len() != high.len() {
            return Err(Error::PairCountMismatch {
                low: low.len(),
                high: high.len(),
            });
        }
        if names.len() != low.len() {
            return Err(Error::invalid(
                "names",
                format!("{} names for {} pairs", names.len(), low.len()),
            ));
        }
        if let Some(first) = low.first() {
            let shape = first.dim();
            let mismatch = low
                .iter()
                .chain(high.iter())
                .enumerate()
                .find(|(_, img)| img.dim() != shape);
            if let Some((i, img)) = mismatch {
                return Err(Error::ShapeMismatch {
                    context: format!("dataset image {i}"),
                    expected: format!("{shape:?}"),
                    actual: format!("{:?}", img.dim()),
                });
            }
        }
        Ok(Self { names, low, high })
    }

    /*
    Load low/high pairs from two directories.
    Both listings are compared before anything is decoded, so a count mismatch aborts before any work is done instead of silently misaligning pairs.

    @param low_dir: directory of low quality (noisy) images
    @param high_dir: directory of high quality (clean) images
    @param width, height: target resolution for every sample
    */
    pub fn load(low_dir: &Path, high_dir: &Path, width: u32, height: u32) -> Result<Self> {
        let low_files = list_image_files(low_dir)?;
        let high_files = list_image_files(high_dir)?;

        if low_files.len() != high_files.len() {
            return Err(Error::PairCountMismatch {
                low: low_files.len(),
                high: high_files.len(),
            });
        }
        if low_files.is_empty() {
            return Err(Error::EmptyDataset {
                what: low_dir.display().to_string(),
            });
        }

        info!(
            "Loading {} image pairs from {} and {} at {}x{}",
            low_files.len(),
            low_dir.display(),
            high_dir.display(),
            width,
            height
        );

        let names = low_files
            .iter()
            .map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            })
            .collect();
        let low = low_files
            .iter()
            .map(|path| load_image(path, width, height))
            .collect::<Result<Vec<_>>>()?;
        let high = high_files
            .iter()
            .map(|path| load_image(path, width, height))
            .collect::<Result<Vec<_>>>()?;

        Self::new(names, low, high)
    }

    pub fn len(&self) -> usize {
        self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.low.is_empty()
    }

    /*
    Partition into training and validation subsets, see split_indices.
    An empty validation subset is returned as-is, the pipeline decides whether that is acceptable.
    */
    pub fn split(self, validation_fraction: f64, seed: u64) -> Result<SplitDataset> {
        let (train_idx, val_idx) = split_indices(self.len(), validation_fraction, seed)?;

        let (names_train, names_val) = partition_rows(self.names, &train_idx, &val_idx);
        let (low_train, low_val) = partition_rows(self.low, &train_idx, &val_idx);
        let (high_train, high_val) = partition_rows(self.high, &train_idx, &val_idx);

        Ok(SplitDataset {
            train: Self {
                names: names_train,
                low: low_train,
                high: high_train,
            },
            validation: Self {
                names: names_val,
                low: low_val,
                high: high_val,
            },
        })
    }
}

/// Number of validation samples: `round(fraction * n)`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn validation_size(n: usize, validation_fraction: f64) -> usize {
    ((validation_fraction * n as f64).round() as usize).min(n)
}

/*
Shuffle 0..n with a seeded rng, the first round(fraction * n) indices become validation and the rest training.
The same (n, fraction, seed) always gives the same partition.

@param n: number of samples
@param validation_fraction: share held out for validation, in [0, 1)
@param seed: rng seed
@return: (train indices, validation indices)
*/
pub fn split_indices(n: usize, validation_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(0.0..1.0).contains(&validation_fraction) {
        return Err(Error::invalid(
            "validation_fraction",
            format!("{validation_fraction} is outside [0, 1)"),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);

    let train = order.split_off(validation_size(n, validation_fraction));
    Ok((train, order))
}

fn partition_rows<T>(rows: Vec<T>, train_idx: &[usize], val_idx: &[usize]) -> (Vec<T>, Vec<T>) {
    let mut slots: Vec<Option<T>> = rows.into_iter().map(Some).collect();
    let mut take = |indices: &[usize]| -> Vec<T> {
        indices.iter().filter_map(|&i| slots.get_mut(i).and_then(Option::take)).collect()
    };
    let train = take(train_idx);
    let val = take(val_idx);
    (train, val)
}
