//! Working-resolution downsampling.
//!
//! The clustering and seed-color stages run on a reduced copy of the
//! input: the working width is half the source width clamped into
//! `[working_min, working_max]` and never larger than the source, with
//! the height following the source aspect ratio. Seed points are mapped
//! into the same space with [`map_point`].

use std::fmt;

use image::RgbaImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, PromptPoint};

/// Resampling filter for the working-resolution copy, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownsampleFilter {
    /// Disabled: work at the source resolution.
    Disabled,
    /// Nearest neighbor.
    Nearest,
    /// Bilinear.
    #[default]
    Triangle,
    /// Bicubic Catmull-Rom.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Three-lobe Lanczos.
    Lanczos3,
}

impl DownsampleFilter {
    /// Variant name as written in configs and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Nearest => "Nearest",
            Self::Triangle => "Triangle",
            Self::CatmullRom => "CatmullRom",
            Self::Gaussian => "Gaussian",
            Self::Lanczos3 => "Lanczos3",
        }
    }

    /// The resampling kernel, or `None` when resampling is disabled.
    const fn kernel(self) -> Option<FilterType> {
        Some(match self {
            Self::Disabled => return None,
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        })
    }
}

impl fmt::Display for DownsampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Working-resolution dimensions for a source of size `source`.
///
/// Width is `clamp(source.width / 2, min, max)` capped at the source
/// width; height keeps the aspect ratio (rounded, at least 1).
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn working_dimensions(source: Dimensions, min: u32, max: u32) -> Dimensions {
    let width = (source.width / 2).clamp(min, max.max(min)).min(source.width).max(1);
    let height = (f64::from(source.height) * f64::from(width) / f64::from(source.width.max(1)))
        .round()
        .max(1.0) as u32;
    Dimensions::new(width, height)
}

/// Resize `image` to `target` with the given filter.
///
/// Returns the (possibly unchanged) image and whether resampling was
/// actually applied. [`DownsampleFilter::Disabled`] and a `target`
/// equal to the source size both return a copy of the input.
#[must_use]
pub fn downsample(
    image: &RgbaImage,
    target: Dimensions,
    filter: DownsampleFilter,
) -> (RgbaImage, bool) {
    match filter.kernel() {
        Some(kernel) if Dimensions::of(image) != target => (
            image::imageops::resize(image, target.width, target.height, kernel),
            true,
        ),
        _ => (image.clone(), false),
    }
}

/// Map a point from `source` pixel space into `target` pixel space,
/// rounding to the nearest pixel and clamping into bounds.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn map_point(point: PromptPoint, source: Dimensions, target: Dimensions) -> PromptPoint {
    let scale = |v: u32, from: u32, to: u32| -> u32 {
        let mapped = (f64::from(v) * f64::from(to) / f64::from(from.max(1))).round();
        (mapped.max(0.0) as u32).min(to.saturating_sub(1))
    };
    PromptPoint {
        x: scale(point.x, source.width, target.width),
        y: scale(point.y, source.height, target.height),
        positive: point.positive,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_image(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([128, 128, 128, 255]))
    }

    #[test]
    fn default_filter_is_triangle() {
        assert_eq!(DownsampleFilter::default(), DownsampleFilter::Triangle);
        assert_eq!(DownsampleFilter::default().to_string(), "Triangle");
    }

    #[test]
    fn working_width_is_half_source_within_bounds() {
        let dims = working_dimensions(Dimensions::new(400, 300), 64, 256);
        assert_eq!(dims, Dimensions::new(200, 150));
    }

    #[test]
    fn working_width_capped_at_max() {
        let dims = working_dimensions(Dimensions::new(1024, 768), 64, 256);
        assert_eq!(dims, Dimensions::new(256, 192));
    }

    #[test]
    fn working_width_raised_to_min() {
        // Half of 100 is 50, below the minimum of 64.
        let dims = working_dimensions(Dimensions::new(100, 100), 64, 256);
        assert_eq!(dims, Dimensions::new(64, 64));
    }

    #[test]
    fn working_width_never_upscales() {
        let dims = working_dimensions(Dimensions::new(40, 20), 64, 256);
        assert_eq!(dims, Dimensions::new(40, 20));
    }

    #[test]
    fn working_dimensions_of_single_pixel() {
        let dims = working_dimensions(Dimensions::new(1, 1), 64, 256);
        assert_eq!(dims, Dimensions::new(1, 1));
    }

    #[test]
    fn downsample_resizes_to_target() {
        let img = test_image(400, 300);
        let (result, applied) =
            downsample(&img, Dimensions::new(200, 150), DownsampleFilter::Triangle);
        assert!(applied);
        assert_eq!(result.dimensions(), (200, 150));
    }

    #[test]
    fn no_downsample_when_exact_match() {
        let img = test_image(64, 48);
        let (result, applied) =
            downsample(&img, Dimensions::new(64, 48), DownsampleFilter::Triangle);
        assert!(!applied);
        assert_eq!(result, img);
    }

    #[test]
    fn disabled_filter_keeps_source() {
        let img = test_image(400, 300);
        let (result, applied) =
            downsample(&img, Dimensions::new(200, 150), DownsampleFilter::Disabled);
        assert!(!applied);
        assert_eq!(result.dimensions(), (400, 300));
    }

    #[test]
    fn map_point_scales_and_rounds() {
        let p = map_point(
            PromptPoint::include(101, 50),
            Dimensions::new(400, 200),
            Dimensions::new(200, 100),
        );
        // 101 * 0.5 = 50.5 rounds away from zero.
        assert_eq!((p.x, p.y, p.positive), (51, 25, true));
    }

    #[test]
    fn map_point_clamps_last_pixel() {
        let p = map_point(
            PromptPoint::exclude(399, 199),
            Dimensions::new(400, 200),
            Dimensions::new(200, 100),
        );
        assert_eq!((p.x, p.y, p.positive), (199, 99, false));
    }
}
