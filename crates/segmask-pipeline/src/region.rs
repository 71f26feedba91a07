//! Seeded region growing.
//!
//! Grows one coverage mask per seed point and combines them as
//! `positive AND NOT negative`, followed by a morphological open/close
//! pass that removes speckle and fills pinholes. Traversals are
//! independent per seed and OR-combined per polarity, so seed order never
//! affects the result.
//!
//! Two strategies are available through [`RegionGrowerKind`]:
//!
//! - [`Adaptive`](RegionGrowerKind::Adaptive): full-resolution growth with
//!   a color tolerance derived from the seed's 7×7 neighborhood, a
//!   running region mean, an edge gate, and distance/size caps.
//! - [`SeedColor`](RegionGrowerKind::SeedColor): a cheap fill on the
//!   working-resolution copy that accepts pixels close to the seed's own
//!   color, upsampled back to full size.

use std::collections::VecDeque;

use image::RgbaImage;
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};

use crate::coverage::CoverageMask;
use crate::downsample::{downsample, map_point, working_dimensions};
use crate::gradient::GradientField;
use crate::types::{Dimensions, PromptPoint, RegionGrowConfig, SegmentConfig};

/// 8-connected neighbor offsets.
const NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Selects which region growing algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegionGrowerKind {
    /// Locally adaptive tolerance with edge gating, at full resolution.
    #[default]
    Adaptive,
    /// Fixed tolerance around the seed color, at working resolution.
    SeedColor,
}

/// Strategy for growing a coverage mask from labeled seed points.
pub trait RegionGrower {
    /// Grow a mask over `image` from `seeds`.
    ///
    /// The result always has the dimensions of `image`. An empty seed
    /// list, or one with only negative seeds, yields an empty mask.
    fn grow(&self, image: &RgbaImage, seeds: &[PromptPoint], config: &SegmentConfig)
    -> CoverageMask;
}

impl RegionGrower for RegionGrowerKind {
    fn grow(
        &self,
        image: &RgbaImage,
        seeds: &[PromptPoint],
        config: &SegmentConfig,
    ) -> CoverageMask {
        let dims = Dimensions::of(image);
        if dims.area() == 0 || !seeds.iter().any(|s| s.positive) {
            return CoverageMask::empty(dims);
        }

        let (positive, negative) = match *self {
            Self::Adaptive => grow_adaptive(image, seeds, &config.region),
            Self::SeedColor => grow_seed_color(image, seeds, config),
        };
        combine(positive, &negative, seeds, config.region.refine_radius)
    }
}

/// Morphological open followed by close with a square structuring
/// element of the given radius. A radius of 0 returns the mask unchanged.
#[must_use]
pub fn refine(mask: &CoverageMask, radius: u8) -> CoverageMask {
    if radius == 0 {
        return mask.clone();
    }
    let opened = imageproc::morphology::open(mask.as_gray(), Norm::LInf, radius);
    CoverageMask::from_gray(imageproc::morphology::close(&opened, Norm::LInf, radius))
}

/// `positive AND NOT negative`, refined.
///
/// Refinement may neither re-cover excluded pixels nor drop a positive
/// seed pixel that no negative region covers.
fn combine(
    mut positive: CoverageMask,
    negative: &CoverageMask,
    seeds: &[PromptPoint],
    refine_radius: u8,
) -> CoverageMask {
    positive.subtract(negative);
    let mut mask = refine(&positive, refine_radius);
    mask.subtract(negative);

    let dims = mask.dimensions();
    for seed in seeds.iter().filter(|s| s.positive) {
        let seed = seed.clamped(dims);
        if !negative.is_covered(seed.x, seed.y) {
            mask.set(seed.x, seed.y, true);
        }
    }
    mask
}

// ───── Adaptive ─────

/// Color and gradient statistics of the neighborhood around a seed.
#[derive(Debug, Clone, Copy)]
struct NeighborhoodStats {
    mean: [f64; 3],
    std_sum: f64,
    gradient_mean: f64,
    gradient_std: f64,
    count: usize,
}

impl NeighborhoodStats {
    #[allow(clippy::cast_precision_loss)]
    fn sample(image: &RgbaImage, gradient: &GradientField, seed: PromptPoint, radius: u32) -> Self {
        let (w, h) = image.dimensions();
        let (x0, x1) = (seed.x.saturating_sub(radius), seed.x.saturating_add(radius).min(w - 1));
        let (y0, y1) = (seed.y.saturating_sub(radius), seed.y.saturating_add(radius).min(h - 1));

        let mut sum = [0.0f64; 3];
        let mut sum_sq = [0.0f64; 3];
        let (mut g_sum, mut g_sum_sq) = (0.0f64, 0.0f64);
        let mut count = 0usize;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let p = image.get_pixel(x, y).0;
                for c in 0..3 {
                    let v = f64::from(p[c]);
                    sum[c] += v;
                    sum_sq[c] = v.mul_add(v, sum_sq[c]);
                }
                let g = f64::from(gradient.at(x, y));
                g_sum += g;
                g_sum_sq = g.mul_add(g, g_sum_sq);
                count += 1;
            }
        }

        let n = count as f64;
        let mean = sum.map(|s| s / n);
        let mut std_sum = 0.0;
        for c in 0..3 {
            std_sum += mean[c].mul_add(-mean[c], sum_sq[c] / n).max(0.0).sqrt();
        }
        let gradient_mean = g_sum / n;
        let gradient_std = gradient_mean
            .mul_add(-gradient_mean, g_sum_sq / n)
            .max(0.0)
            .sqrt();

        Self {
            mean,
            std_sum,
            gradient_mean,
            gradient_std,
            count,
        }
    }
}

/// Distance and size caps shared by every seed in one request.
#[derive(Debug, Clone, Copy)]
struct GrowthLimits {
    radius_sq: u64,
    max_region: usize,
}

impl GrowthLimits {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn new(dims: Dimensions, config: &RegionGrowConfig) -> Self {
        let shorter = dims.width.min(dims.height);
        let radius = ((f64::from(shorter) * f64::from(config.max_radius_fraction)).floor() as u32)
            .min(config.max_radius_cap);
        let max_region =
            ((dims.area() as f64 * f64::from(config.max_region_fraction)).floor() as usize).max(1);
        Self {
            radius_sq: u64::from(radius) * u64::from(radius),
            max_region,
        }
    }
}

fn grow_adaptive(
    image: &RgbaImage,
    seeds: &[PromptPoint],
    config: &RegionGrowConfig,
) -> (CoverageMask, CoverageMask) {
    let dims = Dimensions::of(image);
    let gradient = GradientField::compute(image);
    let limits = GrowthLimits::new(dims, config);

    let mut positive = CoverageMask::empty(dims);
    let mut negative = CoverageMask::empty(dims);
    for seed in seeds {
        let seed = seed.clamped(dims);
        let region = grow_from_seed(image, &gradient, seed, config, limits);
        if seed.positive {
            positive.union_with(&region);
        } else {
            negative.union_with(&region);
        }
    }
    (positive, negative)
}

/// Stack-based fill from one seed against a running region mean.
#[allow(clippy::cast_precision_loss)]
fn grow_from_seed(
    image: &RgbaImage,
    gradient: &GradientField,
    seed: PromptPoint,
    config: &RegionGrowConfig,
    limits: GrowthLimits,
) -> CoverageMask {
    let stats = NeighborhoodStats::sample(image, gradient, seed, config.neighborhood_radius);
    let threshold = f64::from(config.tolerance_scale).mul_add(
        stats.std_sum / 3.0,
        f64::from(config.base_tolerance),
    );
    let threshold_sq = threshold * threshold;
    let gradient_threshold = f64::from(config.edge_factor)
        .mul_add(stats.gradient_std, stats.gradient_mean);

    // The running mean starts from the neighborhood so that a noisy
    // seed pixel does not dominate the first few comparisons.
    let mut sum = stats.mean.map(|m| m * stats.count as f64);
    let mut count = stats.count as f64;

    let mut region = CoverageMask::empty(Dimensions::of(image));
    region.set(seed.x, seed.y, true);
    let mut stack = vec![(seed.x, seed.y)];
    let mut size = 1usize;

    'grow: while let Some((x, y)) = stack.pop() {
        let p = image.get_pixel(x, y).0;
        for c in 0..3 {
            sum[c] += f64::from(p[c]);
        }
        count += 1.0;

        let mean = sum.map(|s| s / count);
        for (dx, dy) in NEIGHBORS {
            if size >= limits.max_region {
                break 'grow;
            }
            let Some((nx, ny)) = offset(x, y, dx, dy, image.dimensions()) else {
                continue;
            };
            if region.is_covered(nx, ny) {
                continue;
            }
            let (ddx, ddy) = (u64::from(nx.abs_diff(seed.x)), u64::from(ny.abs_diff(seed.y)));
            if ddx * ddx + ddy * ddy > limits.radius_sq {
                continue;
            }
            let q = image.get_pixel(nx, ny).0;
            if color_distance_sq(mean, q) > threshold_sq {
                continue;
            }
            if f64::from(gradient.at(nx, ny)) > gradient_threshold {
                continue;
            }
            region.set(nx, ny, true);
            stack.push((nx, ny));
            size += 1;
        }
    }

    region
}

// ───── Seed color ─────

fn grow_seed_color(
    image: &RgbaImage,
    seeds: &[PromptPoint],
    config: &SegmentConfig,
) -> (CoverageMask, CoverageMask) {
    let source = Dimensions::of(image);
    let target = working_dimensions(source, config.working_min, config.working_max);
    let (small, _) = downsample(image, target, config.downsample_filter);
    let working = Dimensions::of(&small);
    let max_region = seed_color_cap(working, config.region.seed_color_region_fraction);
    let tolerance_sq = f64::from(config.region.seed_color_tolerance).powi(2);

    let mut positive = CoverageMask::empty(working);
    let mut negative = CoverageMask::empty(working);
    for seed in seeds {
        let mapped = map_point(seed.clamped(source), source, working);
        let region = flood_seed_color(&small, mapped, tolerance_sq, max_region);
        if seed.positive {
            positive.union_with(&region);
        } else {
            negative.union_with(&region);
        }
    }
    (positive.resized(source), negative.resized(source))
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn seed_color_cap(working: Dimensions, fraction: f32) -> usize {
    ((working.area() as f64 * f64::from(fraction)).floor() as usize).max(1)
}

/// Breadth-first 8-connected fill of pixels near the seed's own color.
fn flood_seed_color(
    image: &RgbaImage,
    seed: PromptPoint,
    tolerance_sq: f64,
    max_region: usize,
) -> CoverageMask {
    let p = image.get_pixel(seed.x, seed.y).0;
    let seed_color = [f64::from(p[0]), f64::from(p[1]), f64::from(p[2])];

    let mut region = CoverageMask::empty(Dimensions::of(image));
    region.set(seed.x, seed.y, true);
    let mut queue = VecDeque::from([(seed.x, seed.y)]);
    let mut size = 1usize;

    'fill: while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in NEIGHBORS {
            if size >= max_region {
                break 'fill;
            }
            let Some((nx, ny)) = offset(x, y, dx, dy, image.dimensions()) else {
                continue;
            };
            if region.is_covered(nx, ny) {
                continue;
            }
            if color_distance_sq(seed_color, image.get_pixel(nx, ny).0) > tolerance_sq {
                continue;
            }
            region.set(nx, ny, true);
            queue.push_back((nx, ny));
            size += 1;
        }
    }

    region
}

// ───── Shared helpers ─────

fn color_distance_sq(mean: [f64; 3], pixel: [u8; 4]) -> f64 {
    let dr = f64::from(pixel[0]) - mean[0];
    let dg = f64::from(pixel[1]) - mean[1];
    let db = f64::from(pixel[2]) - mean[2];
    db.mul_add(db, dr.mul_add(dr, dg * dg))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn offset(x: u32, y: u32, dx: i64, dy: i64, (w, h): (u32, u32)) -> Option<(u32, u32)> {
    let nx = i64::from(x) + dx;
    let ny = i64::from(y) + dy;
    if nx < 0 || ny < 0 || nx >= i64::from(w) || ny >= i64::from(h) {
        return None;
    }
    Some((nx as u32, ny as u32))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 200, 0, 255]);

    /// 100×100 blue image with a 40×40 red square covering 30..70.
    fn red_square_on_blue() -> RgbaImage {
        RgbaImage::from_fn(100, 100, |x, y| {
            if (30..70).contains(&x) && (30..70).contains(&y) {
                RED
            } else {
                BLUE
            }
        })
    }

    /// Left half red, right half green.
    fn two_halves(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, _| if x < w / 2 { RED } else { GREEN })
    }

    fn config_with(grower: RegionGrowerKind) -> SegmentConfig {
        let mut config = SegmentConfig::default();
        config.region.grower = grower;
        config
    }

    #[test]
    fn default_grower_is_adaptive() {
        assert_eq!(RegionGrowerKind::default(), RegionGrowerKind::Adaptive);
    }

    #[test]
    fn seed_inside_red_square_covers_the_square() {
        let image = red_square_on_blue();
        let config = SegmentConfig::default();
        let mask = RegionGrowerKind::Adaptive.grow(&image, &[PromptPoint::include(50, 50)], &config);

        assert_eq!(mask.dimensions(), Dimensions::new(100, 100));
        for y in 0..100 {
            for x in 0..100 {
                let inside = (30..70).contains(&x) && (30..70).contains(&y);
                let interior = (32..68).contains(&x) && (32..68).contains(&y);
                if mask.is_covered(x, y) {
                    assert!(inside, "({x}, {y}) is outside the red square");
                }
                if interior {
                    assert!(mask.is_covered(x, y), "({x}, {y}) inside the square is uncovered");
                }
            }
        }
    }

    #[test]
    fn single_positive_seed_is_always_covered() {
        // A lone bright pixel is removed by the open pass, but the seed
        // itself must survive refinement.
        let image = RgbaImage::from_fn(9, 9, |x, y| if (x, y) == (4, 4) { RED } else { BLUE });
        for grower in [RegionGrowerKind::Adaptive, RegionGrowerKind::SeedColor] {
            let mask = grower.grow(&image, &[PromptPoint::include(4, 4)], &config_with(grower));
            assert!(mask.is_covered(4, 4), "{grower:?} dropped the seed pixel");
        }
    }

    #[test]
    fn single_pixel_image_covers_its_only_pixel() {
        let image = RgbaImage::from_pixel(1, 1, RED);
        let mask = RegionGrowerKind::Adaptive.grow(
            &image,
            &[PromptPoint::include(0, 0)],
            &SegmentConfig::default(),
        );
        assert_eq!(mask.covered_count(), 1);
    }

    #[test]
    fn oversized_neighborhood_samples_the_whole_image() {
        let image = two_halves(8, 8);
        let mut config = SegmentConfig::default();
        config.region.neighborhood_radius = u32::MAX;
        let mask = RegionGrowerKind::Adaptive.grow(&image, &[PromptPoint::include(6, 6)], &config);
        assert!(mask.is_covered(6, 6));
    }

    #[test]
    fn no_seeds_yields_empty_mask() {
        let image = red_square_on_blue();
        let mask = RegionGrowerKind::Adaptive.grow(&image, &[], &SegmentConfig::default());
        assert!(!mask.has_coverage());
        assert_eq!(mask.dimensions(), Dimensions::new(100, 100));
    }

    #[test]
    fn only_negative_seeds_yield_empty_mask() {
        let image = red_square_on_blue();
        let mask = RegionGrowerKind::Adaptive.grow(
            &image,
            &[PromptPoint::exclude(50, 50)],
            &SegmentConfig::default(),
        );
        assert!(!mask.has_coverage());
    }

    #[test]
    fn negative_region_is_never_covered() {
        let image = two_halves(40, 20);
        let config = SegmentConfig::default();
        let dims = Dimensions::of(&image);
        let gradient = GradientField::compute(&image);
        let limits = GrowthLimits::new(dims, &config.region);

        let seeds = [
            PromptPoint::include(5, 10),
            PromptPoint::include(8, 4),
            PromptPoint::exclude(6, 12),
        ];
        let mask = RegionGrowerKind::Adaptive.grow(&image, &seeds, &config);
        let negative = grow_from_seed(&image, &gradient, seeds[2], &config.region, limits);

        assert!(negative.has_coverage());
        for y in 0..dims.height {
            for x in 0..dims.width {
                if negative.is_covered(x, y) {
                    assert!(!mask.is_covered(x, y), "({x}, {y}) is excluded but covered");
                }
            }
        }
    }

    #[test]
    fn disjoint_negative_seed_leaves_positive_region() {
        let image = two_halves(40, 20);
        let seeds = [PromptPoint::include(5, 10), PromptPoint::exclude(30, 10)];
        let mask = RegionGrowerKind::Adaptive.grow(&image, &seeds, &SegmentConfig::default());
        assert!(mask.is_covered(5, 10));
        assert!(!mask.is_covered(30, 10));
        assert!((0..20).all(|y| !mask.is_covered(35, y)));
    }

    #[test]
    fn seed_order_does_not_matter() {
        let image = red_square_on_blue();
        let config = SegmentConfig::default();
        let seeds = [
            PromptPoint::include(50, 50),
            PromptPoint::include(10, 10),
            PromptPoint::exclude(60, 60),
        ];
        let mut reversed = seeds;
        reversed.reverse();
        for grower in [RegionGrowerKind::Adaptive, RegionGrowerKind::SeedColor] {
            let config = SegmentConfig {
                region: RegionGrowConfig {
                    grower,
                    ..config.region.clone()
                },
                ..config.clone()
            };
            assert_eq!(
                grower.grow(&image, &seeds, &config),
                grower.grow(&image, &reversed, &config),
                "{grower:?} depends on seed order",
            );
        }
    }

    #[test]
    fn region_size_is_capped() {
        let image = RgbaImage::from_pixel(40, 40, RED);
        let mut config = SegmentConfig::default();
        config.region.refine_radius = 0;
        config.region.max_radius_fraction = 1.0;
        let mask = RegionGrowerKind::Adaptive.grow(&image, &[PromptPoint::include(20, 20)], &config);
        assert_eq!(mask.covered_count(), 800);
    }

    #[test]
    fn growth_radius_is_capped() {
        let image = RgbaImage::from_pixel(60, 60, RED);
        let mut config = SegmentConfig::default();
        config.region.refine_radius = 0;
        config.region.max_radius_fraction = 0.1;
        let mask = RegionGrowerKind::Adaptive.grow(&image, &[PromptPoint::include(30, 30)], &config);
        // Radius 6 around (30, 30).
        assert!(mask.is_covered(36, 30));
        assert!(!mask.is_covered(37, 30));
        assert!(!mask.is_covered(35, 35));
    }

    #[test]
    fn out_of_bounds_seed_is_clamped() {
        let image = RgbaImage::from_pixel(10, 10, RED);
        let mask = RegionGrowerKind::Adaptive.grow(
            &image,
            &[PromptPoint::include(500, 500)],
            &SegmentConfig::default(),
        );
        assert!(mask.is_covered(9, 9));
    }

    #[test]
    fn seed_color_fills_matching_half_at_full_resolution() {
        let image = two_halves(200, 100);
        let config = config_with(RegionGrowerKind::SeedColor);
        let mask = RegionGrowerKind::SeedColor.grow(&image, &[PromptPoint::include(20, 50)], &config);
        assert_eq!(mask.dimensions(), Dimensions::new(200, 100));
        assert!(mask.is_covered(20, 50));
        assert!(mask.is_covered(60, 10));
        assert!(!mask.is_covered(150, 50));
    }

    #[test]
    fn seed_color_respects_region_cap() {
        let image = RgbaImage::from_pixel(128, 128, RED);
        let mut config = config_with(RegionGrowerKind::SeedColor);
        config.region.refine_radius = 0;
        let mask = RegionGrowerKind::SeedColor.grow(&image, &[PromptPoint::include(64, 64)], &config);
        // Working size is 64×64 and the cap is 60%: 2457 working pixels,
        // each covering a 2×2 block at full size.
        assert_eq!(mask.covered_count(), 2457 * 4);
    }

    #[test]
    fn refine_removes_speckle_and_fills_pinholes() {
        let mut mask = CoverageMask::from_fn(20, 20, |x, y| {
            (5..15).contains(&x) && (5..15).contains(&y)
        });
        mask.set(10, 10, false);
        mask.set(1, 1, true);
        let refined = refine(&mask, 1);
        assert!(refined.is_covered(10, 10), "pinhole should be closed");
        assert!(!refined.is_covered(1, 1), "speckle should be opened away");
        assert!(refined.is_covered(5, 5));
    }

    #[test]
    fn refine_radius_zero_is_identity() {
        let mask = CoverageMask::from_fn(5, 5, |x, y| x == y);
        assert_eq!(refine(&mask, 0), mask);
    }
}
