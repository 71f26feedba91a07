//! Per-pixel coverage masks.
//!
//! A [`CoverageMask`] is a binary membership raster backed by a
//! [`GrayImage`] holding 255 for covered pixels and 0 elsewhere, the same
//! encoding `imageproc`'s morphology operators expect. Every producer in
//! the crate (region growing, mask decoding, cluster extraction) returns
//! this type, and every consumer (compositing, scoring, export) reads it.

use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::types::Dimensions;

/// Raster value of a covered pixel.
pub const COVERED: u8 = 255;

/// Raster value of an uncovered pixel.
pub const UNCOVERED: u8 = 0;

/// A binary per-pixel membership mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageMask(GrayImage);

impl CoverageMask {
    /// An empty (fully uncovered) mask.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    /// An empty mask with the given dimensions.
    #[must_use]
    pub fn empty(dims: Dimensions) -> Self {
        Self::new(dims.width, dims.height)
    }

    /// Build a mask from a per-pixel predicate.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, mut covered: impl FnMut(u32, u32) -> bool) -> Self {
        Self(GrayImage::from_fn(width, height, |x, y| {
            Luma([if covered(x, y) { COVERED } else { UNCOVERED }])
        }))
    }

    /// Wrap a grayscale raster; any nonzero pixel counts as covered.
    #[must_use]
    pub fn from_gray(mut raster: GrayImage) -> Self {
        for pixel in raster.pixels_mut() {
            if pixel.0[0] != UNCOVERED {
                pixel.0[0] = COVERED;
            }
        }
        Self(raster)
    }

    /// Interpret an RGBA bitmap as a mask.
    ///
    /// A pixel is covered when its alpha is nonzero or its red channel
    /// exceeds 127, which accepts both transparent-background masks and
    /// opaque white-on-black masks.
    #[must_use]
    pub fn from_rgba(image: &RgbaImage) -> Self {
        Self::from_fn(image.width(), image.height(), |x, y| {
            let Rgba([r, _, _, a]) = *image.get_pixel(x, y);
            a > 0 || r > 127
        })
    }

    /// Mask width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    /// Mask height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Mask dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width(), self.height())
    }

    /// Whether `(x, y)` is covered. Out-of-bounds coordinates are not.
    #[must_use]
    pub fn is_covered(&self, x: u32, y: u32) -> bool {
        self.0
            .get_pixel_checked(x, y)
            .is_some_and(|p| p.0[0] != UNCOVERED)
    }

    /// Mark `(x, y)` covered or uncovered. Out-of-bounds writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, covered: bool) {
        if let Some(pixel) = self.0.get_pixel_mut_checked(x, y) {
            pixel.0[0] = if covered { COVERED } else { UNCOVERED };
        }
    }

    /// Number of covered pixels.
    #[must_use]
    pub fn covered_count(&self) -> usize {
        self.0.as_raw().iter().filter(|&&v| v != UNCOVERED).count()
    }

    /// Whether at least one pixel is covered.
    #[must_use]
    pub fn has_coverage(&self) -> bool {
        self.0.as_raw().iter().any(|&v| v != UNCOVERED)
    }

    /// OR `other` into this mask, resampling it first if its dimensions differ.
    pub fn union_with(&mut self, other: &Self) {
        self.combine(other, |own, theirs| own || theirs);
    }

    /// Clear every pixel `other` covers (`self AND NOT other`).
    pub fn subtract(&mut self, other: &Self) {
        self.combine(other, |own, theirs| own && !theirs);
    }

    fn combine(&mut self, other: &Self, op: impl Fn(bool, bool) -> bool) {
        let resized;
        let other = if other.dimensions() == self.dimensions() {
            other
        } else {
            resized = other.resized(self.dimensions());
            &resized
        };
        for (own, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            let keep = op(*own != UNCOVERED, *theirs != UNCOVERED);
            *own = if keep { COVERED } else { UNCOVERED };
        }
    }

    /// Nearest-neighbor resample to `target`.
    ///
    /// Each output pixel takes the value of the source pixel whose cell
    /// contains the output pixel's center, so the binary decision is
    /// preserved exactly.
    #[must_use]
    pub fn resized(&self, target: Dimensions) -> Self {
        if target == self.dimensions() {
            return self.clone();
        }
        let (sw, sh) = (u64::from(self.width()), u64::from(self.height()));
        let (tw, th) = (u64::from(target.width), u64::from(target.height));
        Self(GrayImage::from_fn(target.width, target.height, |x, y| {
            let sx = nearest_source(u64::from(x), sw, tw);
            let sy = nearest_source(u64::from(y), sh, th);
            *self.0.get_pixel(sx, sy)
        }))
    }

    /// Borrow the backing raster.
    #[must_use]
    pub const fn as_gray(&self) -> &GrayImage {
        &self.0
    }

    /// Consume the mask and return the backing raster.
    #[must_use]
    pub fn into_gray(self) -> GrayImage {
        self.0
    }

    /// Render the mask as an RGBA image: opaque black where covered,
    /// fully transparent elsewhere.
    #[must_use]
    pub fn to_alpha_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width(), self.height(), |x, y| {
            if self.is_covered(x, y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }
}

/// Index of the source cell containing the center of output cell `i`.
#[allow(clippy::cast_possible_truncation)]
fn nearest_source(i: u64, source_len: u64, target_len: u64) -> u32 {
    let s = (2 * i + 1) * source_len / (2 * target_len);
    s.min(source_len.saturating_sub(1)) as u32
}
