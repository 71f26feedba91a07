//! Mask compositing.
//!
//! [`CompositeState`] is the per-session accumulator: it keeps the
//! untouched base image, a visual copy that every applied mask tints, the
//! union of all applied masks, and a run counter used to cycle palette
//! colors. The free functions do the pixel work and are also used for
//! one-shot renders outside a session.

use std::borrow::Cow;

use image::{Rgba, RgbaImage};

use crate::coverage::CoverageMask;
use crate::kmeans::ClusterAssignment;
use crate::types::{Dimensions, Rgb};

/// Palette for simultaneous regions (clusters, multi-mask responses).
pub const REGION_PALETTE: [Rgb; 8] = [
    [255, 99, 132],
    [54, 162, 235],
    [255, 206, 86],
    [75, 192, 192],
    [153, 102, 255],
    [255, 159, 64],
    [199, 199, 199],
    [255, 0, 255],
];

/// Palette for successive interactive runs.
pub const RUN_PALETTE: [Rgb; 10] = [
    [255, 0, 0],
    [0, 150, 255],
    [0, 200, 100],
    [255, 160, 0],
    [170, 0, 255],
    [255, 0, 170],
    [0, 255, 200],
    [100, 100, 255],
    [255, 100, 100],
    [0, 255, 0],
];

/// Color at `index`, wrapping around the palette.
#[must_use]
pub fn palette_color(palette: &[Rgb], index: usize) -> Rgb {
    if palette.is_empty() {
        return [0, 0, 0];
    }
    palette[index % palette.len()]
}

/// Blend `color` into the pixels of `image` that `mask` covers.
///
/// `out = round(base * (1 - alpha) + color * alpha)` per color channel;
/// uncovered pixels and the alpha channel are untouched. `alpha` is
/// clamped to `[0, 1]` and the mask is resampled if its size differs.
pub fn blend_mask(image: &mut RgbaImage, mask: &CoverageMask, color: Rgb, alpha: f32) {
    let mask = fit(mask, Dimensions::of(image));
    let alpha = alpha.clamp(0.0, 1.0);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if mask.is_covered(x, y) {
            blend_pixel(pixel, color, alpha);
        }
    }
}

/// Paint every cluster of `assignment` with its [`REGION_PALETTE`] color.
///
/// Labels are expanded to the image size by block expansion first.
pub fn blend_clusters(image: &mut RgbaImage, assignment: &ClusterAssignment, alpha: f32) {
    let labels = assignment.upsample(Dimensions::of(image));
    let alpha = alpha.clamp(0.0, 1.0);
    for (pixel, &label) in image.pixels_mut().zip(labels.labels()) {
        blend_pixel(pixel, palette_color(&REGION_PALETTE, label), alpha);
    }
}

/// `base` restricted to `mask`: covered pixels keep their value, the rest
/// become fully transparent.
#[must_use]
pub fn cutout(base: &RgbaImage, mask: &CoverageMask) -> RgbaImage {
    let mask = fit(mask, Dimensions::of(base));
    RgbaImage::from_fn(base.width(), base.height(), |x, y| {
        if mask.is_covered(x, y) {
            *base.get_pixel(x, y)
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend_pixel(pixel: &mut Rgba<u8>, color: Rgb, alpha: f32) {
    for (channel, &tint) in pixel.0.iter_mut().zip(&color) {
        let base = f32::from(*channel);
        let mixed = base.mul_add(1.0 - alpha, f32::from(tint) * alpha);
        *channel = mixed.round().clamp(0.0, 255.0) as u8;
    }
}

fn fit(mask: &CoverageMask, dims: Dimensions) -> Cow<'_, CoverageMask> {
    if mask.dimensions() == dims {
        Cow::Borrowed(mask)
    } else {
        Cow::Owned(mask.resized(dims))
    }
}

/// Accumulated compositing state of one interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeState {
    base: RgbaImage,
    visual: RgbaImage,
    union: CoverageMask,
    run_index: usize,
}

impl CompositeState {
    /// Start a session over `base`.
    #[must_use]
    pub fn new(base: RgbaImage) -> Self {
        let union = CoverageMask::empty(Dimensions::of(&base));
        Self {
            visual: base.clone(),
            base,
            union,
            run_index: 0,
        }
    }

    /// The untouched base image.
    #[must_use]
    pub const fn base(&self) -> &RgbaImage {
        &self.base
    }

    /// The tinted working copy.
    #[must_use]
    pub const fn visual(&self) -> &RgbaImage {
        &self.visual
    }

    /// Union of every mask applied since the last reset.
    #[must_use]
    pub const fn union_mask(&self) -> &CoverageMask {
        &self.union
    }

    /// Number of runs applied since the last reset.
    #[must_use]
    pub const fn run_index(&self) -> usize {
        self.run_index
    }

    /// Whether anything has been segmented since the last reset.
    #[must_use]
    pub fn has_coverage(&self) -> bool {
        self.union.has_coverage()
    }

    /// Tint the covered pixels of the visual copy with `color`.
    pub fn apply_mask(&mut self, mask: &CoverageMask, color: Rgb, alpha: f32) -> &RgbaImage {
        blend_mask(&mut self.visual, mask, color, alpha);
        &self.visual
    }

    /// OR `mask` into the union.
    pub fn union(&mut self, mask: &CoverageMask) -> &CoverageMask {
        self.union.union_with(mask);
        &self.union
    }

    /// Apply one run: tint with the next [`RUN_PALETTE`] color, add to the
    /// union and advance the run counter.
    pub fn apply_run(&mut self, mask: &CoverageMask, alpha: f32) -> &RgbaImage {
        let color = palette_color(&RUN_PALETTE, self.run_index);
        self.run_index += 1;
        self.union(mask);
        self.apply_mask(mask, color, alpha)
    }

    /// Apply several simultaneous regions as one run, each tinted with its
    /// own [`REGION_PALETTE`] color and all added to the union.
    pub fn apply_regions(&mut self, masks: &[CoverageMask], alpha: f32) -> &RgbaImage {
        for (i, mask) in masks.iter().enumerate() {
            self.union(mask);
            blend_mask(&mut self.visual, mask, palette_color(&REGION_PALETTE, i), alpha);
        }
        self.run_index += 1;
        &self.visual
    }

    /// Forget every applied mask and restore the visual copy.
    pub fn reset(&mut self) {
        self.visual = self.base.clone();
        self.union = CoverageMask::empty(Dimensions::of(&self.base));
        self.run_index = 0;
    }

    /// The base image restricted to the union mask.
    #[must_use]
    pub fn cutout(&self) -> RgbaImage {
        cutout(&self.base, &self.union)
    }
}
