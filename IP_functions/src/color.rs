//Color space conversion between 8-bit sRGB and CIE Lab (D65 white point)
//Lab separates lightness (L) from the two chrominance axes (a, b), so pixel distances follow perceived difference more closely than RGB distances

use image::{Rgb, RgbImage};
use ndarray::Array3;

//D65 reference white
const XN: f32 = 0.950_47;
const YN: f32 = 1.0;
const ZN: f32 = 1.088_83;

const DELTA: f32 = 6.0 / 29.0;
const LINEAR_SCALE: f32 = 1.0 / (3.0 * DELTA * DELTA);
const LINEAR_OFFSET: f32 = 4.0 / 29.0;

//8-bit Lab layout: L scaled from [0, 100] to [0, 255], a and b offset by 128
const L8_SCALE: f32 = 255.0 / 100.0;
const AB8_OFFSET: f32 = 128.0;

/// Decode one gamma-encoded sRGB component in [0, 1] to linear light.
#[inline]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Encode one linear-light component in [0, 1] with the sRGB transfer curve.
#[inline]
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/*
Convert a gamma-encoded sRGB pixel to CIE Lab.
The RGB -> XYZ step uses the fixed sRGB/D65 matrix, then XYZ is normalized by the white point and pushed through the Lab companding curve.

@param: r, g, b: sRGB components in [0, 1]
@return: [L, a, b] with L in [0, 100] and a, b roughly in [-128, 127]
*/
pub fn srgb_to_lab(r: f32, g: f32, b: f32) -> [f32; 3] {
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
    let z = 0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b;

    let fx = lab_f(x / XN);
    let fy = lab_f(y / YN);
    let fz = lab_f(z / ZN);

    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/*
Convert a CIE Lab pixel back to gamma-encoded sRGB.
Out-of-gamut colors are clamped in linear light before encoding.

@param: l, a, b: Lab components
@return: [r, g, b] sRGB components in [0, 1]
*/
pub fn lab_to_srgb(l: f32, a: f32, b: f32) -> [f32; 3] {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let x = XN * lab_f_inv(fx);
    let y = YN * lab_f_inv(fy);
    let z = ZN * lab_f_inv(fz);

    let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
    let g = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
    let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

    [r, g, b].map(|c| linear_to_srgb(c.clamp(0.0, 1.0)))
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t * LINEAR_SCALE + LINEAR_OFFSET
    }
}

#[inline]
fn lab_f_inv(t: f32) -> f32 {
    if t > DELTA {
        t * t * t
    } else {
        (t - LINEAR_OFFSET) / LINEAR_SCALE
    }
}

/// Pack a Lab triple into the 8-bit layout (rounded, saturated).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn lab_to_lab8([l, a, b]: [f32; 3]) -> [u8; 3] {
    [
        (l * L8_SCALE).round().clamp(0.0, 255.0) as u8,
        (a + AB8_OFFSET).round().clamp(0.0, 255.0) as u8,
        (b + AB8_OFFSET).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Unpack the 8-bit layout (as floats in [0, 255]) into a Lab triple.
pub fn lab8_to_lab([l8, a8, b8]: [f32; 3]) -> [f32; 3] {
    [l8 / L8_SCALE, a8 - AB8_OFFSET, b8 - AB8_OFFSET]
}

/*
Convert a whole RGB buffer into 8-bit Lab.
The result reuses the 3-channel u8 buffer type, but its channels hold (L, a, b) and not (R, G, B).

@param: img: 8-bit sRGB image
@return: same-sized buffer of 8-bit Lab pixels
*/
pub fn rgb_image_to_lab8(img: &RgbImage) -> RgbImage {
    let mut out = RgbImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(|c| f32::from(c) / 255.0);
        out.put_pixel(x, y, Rgb(lab_to_lab8(srgb_to_lab(r, g, b))));
    }
    out
}

/*
Convert a normalized Lab array (height x width x 3, 8-bit layout divided by 255) back to an sRGB image for saving.
Values outside [0, 1] are clamped first, so raw network output can be passed straight in.

@param: lab: normalized Lab array
@return: 8-bit sRGB image
*/
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn lab8_array_to_rgb_image(lab: &Array3<f32>) -> RgbImage {
    let (height, width, _) = lab.dim();
    let mut out = RgbImage::new(width as u32, height as u32);

    for y in 0..height {
        for x in 0..width {
            let lab8 = [0, 1, 2].map(|c| lab[[y, x, c]].clamp(0.0, 1.0) * 255.0);
            let [l, a, b] = lab8_to_lab(lab8);
            let rgb = lab_to_srgb(l, a, b).map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8);
            out.put_pixel(x as u32, y as u32, Rgb(rgb));
        }
    }
    out
}
