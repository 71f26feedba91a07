//! Per-pixel edge strength.
//!
//! Luma is approximated as `0.299*R + 0.587*G + 0.114*B`; the gradient at
//! a pixel is the magnitude of the central differences against its
//! horizontal and vertical neighbors, with clamp-to-edge sampling at the
//! border. Values are raw magnitudes, not normalized.

use image::RgbaImage;

use crate::types::Dimensions;

/// Luma of an RGB triple.
#[must_use]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.114f32.mul_add(
        f32::from(b),
        0.299f32.mul_add(f32::from(r), 0.587 * f32::from(g)),
    )
}

/// Edge-strength scalar per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientField {
    dims: Dimensions,
    values: Vec<f32>,
}

impl GradientField {
    /// Compute the gradient field of `image`.
    #[must_use]
    pub fn compute(image: &RgbaImage) -> Self {
        let dims = Dimensions::of(image);
        let (w, h) = (dims.width as usize, dims.height as usize);
        let lum: Vec<f32> = image
            .pixels()
            .map(|p| luma(p.0[0], p.0[1], p.0[2]))
            .collect();

        let mut values = Vec::with_capacity(lum.len());
        for y in 0..h {
            let (up, down) = (y.saturating_sub(1), (y + 1).min(h - 1));
            for x in 0..w {
                let (left, right) = (x.saturating_sub(1), (x + 1).min(w - 1));
                let gx = lum[y * w + right] - lum[y * w + left];
                let gy = lum[down * w + x] - lum[up * w + x];
                values.push(gx.hypot(gy));
            }
        }

        Self { dims, values }
    }

    /// Field dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dims
    }

    /// Gradient at `(x, y)`; out-of-bounds reads return 0.
    #[must_use]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        if x >= self.dims.width || y >= self.dims.height {
            return 0.0;
        }
        self.values[y as usize * self.dims.width as usize + x as usize]
    }

    /// All values, row-major.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}
