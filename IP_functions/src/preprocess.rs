//Preprocessing of decoded images into the network's input representation
//Pipeline per image: force 3 channels -> 8-bit Lab -> resize to the target resolution -> divide by 255

use image::{
    imageops::{self, FilterType},
    DynamicImage, Rgb, RgbImage,
};
use ndarray::Array3;

use crate::color::rgb_image_to_lab8;

pub const CHANNELS: usize = 3; //L, a, b

/*
Turn a decoded image into a normalized Lab array of exactly (height, width, 3).
Color conversion happens before resizing, and resizing uses a bilinear (triangle) filter.

@param: img: decoded image in any color type, alpha and extra channels are dropped
@param: width: target width in pixels
@param: height: target height in pixels
@return: Array3<f32> of shape (height, width, 3) with values in [0, 1]
*/
pub fn preprocess_image(img: &DynamicImage, width: u32, height: u32) -> Array3<f32> {
    let rgb = img.to_rgb8();
    let lab = rgb_image_to_lab8(&rgb);
    let resized = imageops::resize(&lab, width, height, FilterType::Triangle);
    image_to_array3(&resized)
}

//convert a 3-channel 8-bit buffer to a height x width x 3 array scaled from 0-255 to 0.0-1.0
pub fn image_to_array3(img: &RgbImage) -> Array3<f32> {
    let (width, height) = img.dimensions();
    let mut array = Array3::<f32>::zeros((height as usize, width as usize, CHANNELS));

    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..CHANNELS {
            array[[y as usize, x as usize, c]] = f32::from(pixel[c]) / 255.0;
        }
    }
    array
}

//convert a normalized height x width x 3 array back to an 8-bit buffer, clamping out-of-range values
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn array3_to_image(matrix: &Array3<f32>) -> RgbImage {
    let (height, width, _) = matrix.dim();
    let mut img = RgbImage::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let px = [0, 1, 2].map(|c| (matrix[[y, x, c]].clamp(0.0, 1.0) * 255.0).round() as u8);
            img.put_pixel(x as u32, y as u32, Rgb(px));
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, LumaA, Rgba, RgbaImage};

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                ((x + y) % 256) as u8,
            ])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_output_has_target_shape() {
        let img = gradient_image(100, 60);
        let array = preprocess_image(&img, 32, 48);
        assert_eq!(array.dim(), (48, 32, 3));
    }

    #[test]
    fn test_values_are_normalized() {
        let img = gradient_image(300, 200);
        let array = preprocess_image(&img, 256, 256);
        assert_eq!(array.dim(), (256, 256, 3));
        assert!(array.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_alpha_and_gray_inputs_become_three_channels() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([10, 200, 30, 40])));
        let gray = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(10, 10, LumaA([90, 255])));

        assert_eq!(preprocess_image(&rgba, 8, 8).dim(), (8, 8, 3));
        assert_eq!(preprocess_image(&gray, 8, 8).dim(), (8, 8, 3));
    }

    #[test]
    fn test_white_image_maps_to_full_lightness_neutral_chroma() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([255, 255, 255])));
        let array = preprocess_image(&img, 8, 8);
        for y in 0..8 {
            for x in 0..8 {
                assert!((array[[y, x, 0]] - 1.0).abs() < 1e-6);
                assert!((array[[y, x, 1]] - 128.0 / 255.0).abs() < 1e-6);
                assert!((array[[y, x, 2]] - 128.0 / 255.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_array_image_conversion_dimensions() {
        let array = Array3::<f32>::from_elem((20, 10, 3), 0.5);
        let img = array3_to_image(&array);
        assert_eq!(img.dimensions(), (10, 20));
        assert_eq!(image_to_array3(&img).dim(), (20, 10, 3));
    }
}
