//Conversion between ndarray images (height, width, channels) and burn batches [batch, channels, height, width]

use burn::prelude::*;
use burn::tensor::TensorData;
use ndarray::{Array3, Array4};

use crate::error::{Error, Result};

/*
Stack images into one NCHW batch tensor, burn follows the channel-first convention while ndarray images are stored channel-last.
Every image must share the first image's shape, a mismatch is reported instead of being left for the network to trip over.

@param images: images as Array3<f32> of shape [height, width, channels]
@param device: burn backend device to allocate the tensor on
@return: tensor shaped [n, channels, height, width]
*/
pub fn images_to_batch<'a, B, I>(images: I, device: &B::Device) -> Result<Tensor<B, 4>>
where
    B: Backend,
    I: IntoIterator<Item = &'a Array3<f32>>,
{
    let mut images = images.into_iter().peekable();
    let (height, width, channels) = images
        .peek()
        .map(|img| img.dim())
        .ok_or_else(|| Error::EmptyDataset {
            what: "batch".to_string(),
        })?;

    let mut data = Vec::new();
    let mut count = 0;
    for img in images {
        if img.dim() != (height, width, channels) {
            return Err(Error::ShapeMismatch {
                context: format!("batch item {count}"),
                expected: format!("{:?}", (height, width, channels)),
                actual: format!("{:?}", img.dim()),
            });
        }
        //HWC -> CHW, iter() walks the permuted view in logical order
        data.extend(img.view().permuted_axes([2, 0, 1]).iter().copied());
        count += 1;
    }

    let data = TensorData::new(data, [count, channels, height, width]).convert::<B::FloatElem>();
    Ok(Tensor::<B, 4>::from_data(data, device))
}

/*
Split an NCHW batch back into individual channel-last images

@param batch: tensor shaped [n, channels, height, width]
@return: n arrays of shape [height, width, channels]
*/
pub fn batch_to_images<B: Backend>(batch: Tensor<B, 4>) -> Result<Vec<Array3<f32>>> {
    let [n, channels, height, width] = batch.dims();
    let values = batch
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::TensorData(format!("{e:?}")))?;

    let nchw = Array4::from_shape_vec((n, channels, height, width), values).map_err(|e| {
        Error::ShapeMismatch {
            context: "tensor readback".to_string(),
            expected: format!("{:?}", [n, channels, height, width]),
            actual: e.to_string(),
        }
    })?;

    Ok(nchw
        .outer_iter()
        .map(|chw| chw.permuted_axes([1, 2, 0]).as_standard_layout().into_owned())
        .collect())
}
