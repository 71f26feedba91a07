//! Generic 3×3 convolution over RGBA buffers.
//!
//! Samples outside the image are clamped to the nearest edge pixel. Each
//! color channel is weighted, divided by the divisor, rounded and clamped
//! to `[0, 255]`; alpha is copied from the source unchanged.

use image::{Rgba, RgbaImage};

/// A 3×3 kernel in row-major order.
pub type Kernel3 = [f32; 9];

/// Sharpening kernel used as the local enhancement fallback.
pub const SHARPEN: Kernel3 = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Convolve `image` with `kernel`, dividing each weighted sum by `divisor`.
///
/// A zero divisor is treated as 1.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn convolve(image: &RgbaImage, kernel: &Kernel3, divisor: f32) -> RgbaImage {
    let divisor = if divisor.abs() < f32::EPSILON { 1.0 } else { divisor };
    let (w, h) = image.dimensions();
    let (max_x, max_y) = (w.saturating_sub(1), h.saturating_sub(1));

    RgbaImage::from_fn(w, h, |x, y| {
        let mut sum = [0.0f32; 3];
        for (ky, dy) in (-1i64..=1).enumerate() {
            let sy = clamp_coord(i64::from(y) + dy, max_y);
            for (kx, dx) in (-1i64..=1).enumerate() {
                let sx = clamp_coord(i64::from(x) + dx, max_x);
                let weight = kernel[ky * 3 + kx];
                let p = image.get_pixel(sx, sy).0;
                for (acc, &channel) in sum.iter_mut().zip(&p[..3]) {
                    *acc = weight.mul_add(f32::from(channel), *acc);
                }
            }
        }
        let alpha = image.get_pixel(x, y).0[3];
        let [r, g, b] = sum.map(|v| (v / divisor).round().clamp(0.0, 255.0) as u8);
        Rgba([r, g, b, alpha])
    })
}

/// Apply the [`SHARPEN`] kernel.
#[must_use]
pub fn sharpen(image: &RgbaImage) -> RgbaImage {
    convolve(image, &SHARPEN, 1.0)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_coord(v: i64, max: u32) -> u32 {
    v.clamp(0, i64::from(max)) as u32
}
