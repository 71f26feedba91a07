//! segmask-pipeline: Pure segmentation and mask compositing engine (sans-IO).
//!
//! Turns decoded images plus optional seed points into coverage masks
//! and rendered overlays:
//!
//! - interactive: seeded region growing (`positive AND NOT negative`)
//! - automatic: k-means color clustering on a working-resolution copy
//! - remote: request building and response interpretation for a
//!   point-prompted segmentation service
//! - enhancement fallback: 3×3 sharpening
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! buffers and returns structured data. Network transport, the session
//! state machine and file output live in `segmask-io`.

pub mod composite;
pub mod convolution;
pub mod coverage;
pub mod decode;
pub mod downsample;
pub mod gradient;
pub mod kmeans;
pub mod mask_decode;
pub mod region;
pub mod remote;
pub mod types;

use rand::Rng;

pub use composite::CompositeState;
pub use coverage::CoverageMask;
pub use downsample::DownsampleFilter;
pub use kmeans::ClusterAssignment;
pub use mask_decode::MaskPayload;
pub use region::{RegionGrower, RegionGrowerKind};
pub use remote::{RemoteSegmentation, SegmentationRequest};
pub use types::{
    Dimensions, GrayImage, KMeansConfig, PromptPoint, RegionGrowConfig, Rgb, RgbaImage,
    ScoreWeights, SegmentConfig, SegmentError,
};

/// Grow a coverage mask from seed points with the configured strategy.
///
/// The mask has the dimensions of `image`.
#[must_use]
pub fn segment_points(
    image: &RgbaImage,
    points: &[PromptPoint],
    config: &SegmentConfig,
) -> CoverageMask {
    config.region.grower.grow(image, points, config)
}

/// Cluster `image` into color classes without any seeds.
///
/// # Pipeline steps
///
/// 1. Downsample to the working resolution
/// 2. k-means over the working copy
/// 3. Block-expand the labels back to the source size
#[must_use]
pub fn segment_automatic<R: Rng + ?Sized>(
    image: &RgbaImage,
    config: &SegmentConfig,
    rng: &mut R,
) -> ClusterAssignment {
    let source = Dimensions::of(image);
    let target = downsample::working_dimensions(source, config.working_min, config.working_max);
    let (working, _) = downsample::downsample(image, target, config.downsample_filter);
    kmeans::segment(
        &working,
        config.kmeans.clusters,
        config.kmeans.iterations,
        rng,
    )
    .upsample(source)
}

/// Render a cluster assignment over a copy of `image`.
#[must_use]
pub fn render_clusters(image: &RgbaImage, assignment: &ClusterAssignment, alpha: f32) -> RgbaImage {
    let mut out = image.clone();
    composite::blend_clusters(&mut out, assignment, alpha);
    out
}

/// Render simultaneous regions over a copy of `image`, one
/// [`REGION_PALETTE`](composite::REGION_PALETTE) color each.
#[must_use]
pub fn render_regions(image: &RgbaImage, masks: &[CoverageMask], alpha: f32) -> RgbaImage {
    let mut out = image.clone();
    for (i, mask) in masks.iter().enumerate() {
        composite::blend_mask(
            &mut out,
            mask,
            composite::palette_color(&composite::REGION_PALETTE, i),
            alpha,
        );
    }
    out
}

/// Local enhancement fallback: sharpen with the 3×3 kernel.
#[must_use]
pub fn enhance_locally(image: &RgbaImage) -> RgbaImage {
    convolution::sharpen(image)
}

/// Parse and interpret a remote segmentation response in one step.
///
/// # Errors
///
/// Propagates the errors of [`remote::parse_response`] and
/// [`remote::interpret`].
pub fn interpret_remote_response(
    content_type: &str,
    body: &[u8],
    seeds: &[PromptPoint],
    source: Dimensions,
    weights: ScoreWeights,
) -> Result<RemoteSegmentation, SegmentError> {
    let response = remote::parse_response(content_type, body)?;
    remote::interpret(response, seeds, source, weights)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgba;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// 100×100 PNG: 40×40 red square centered at (50, 50) on blue.
    fn red_square_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(100, 100, |x, y| {
            if (30..70).contains(&x) && (30..70).contains(&y) {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        decode::encode_png(&img).unwrap()
    }

    #[test]
    fn decoded_png_segments_the_clicked_square() {
        let image = decode::decode(&red_square_png()).unwrap();
        let mask = segment_points(
            &image,
            &[PromptPoint::include(50, 50)],
            &SegmentConfig::default(),
        );
        let covered = mask.covered_count();
        // The square is 1600 pixels; only its one-pixel edge ring may be lost.
        assert!(
            (1444..=1600).contains(&covered),
            "expected about 1600 covered pixels, got {covered}",
        );
        assert!(!mask.is_covered(10, 10));
    }

    #[test]
    fn automatic_segmentation_labels_full_resolution() {
        let image = decode::decode(&red_square_png()).unwrap();
        let config = SegmentConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let assignment = segment_automatic(&image, &config, &mut rng);
        assert_eq!(assignment.dimensions(), Dimensions::new(100, 100));
        assert!(assignment.labels().iter().all(|&l| l < config.kmeans.clusters));
        // Deep inside each color the labels agree.
        assert_eq!(assignment.label(50, 50), assignment.label(45, 55));
        assert_eq!(assignment.label(5, 5), assignment.label(95, 90));
    }

    #[test]
    fn rendered_clusters_keep_dimensions_and_alpha() {
        let image = decode::decode(&red_square_png()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let assignment = segment_automatic(&image, &SegmentConfig::default(), &mut rng);
        let rendered = render_clusters(&image, &assignment, 0.5);
        assert_eq!(rendered.dimensions(), image.dimensions());
        assert!(rendered.pixels().all(|p| p.0[3] == 255));
        assert_ne!(rendered, image);
    }

    #[test]
    fn rendered_regions_tint_each_mask() {
        let image = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        let masks = [
            CoverageMask::from_fn(2, 1, |x, _| x == 0),
            CoverageMask::from_fn(2, 1, |x, _| x == 1),
        ];
        let out = render_regions(&image, &masks, 1.0);
        assert_eq!(out.get_pixel(0, 0).0, [255, 99, 132, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [54, 162, 235, 255]);
    }

    #[test]
    fn enhance_locally_is_noop_on_uniform_image() {
        let image = RgbaImage::from_pixel(10, 10, Rgba([100, 100, 100, 255]));
        assert_eq!(enhance_locally(&image), image);
    }

    #[test]
    fn remote_response_interpreted_end_to_end() {
        let body = br#"{"masks":[{"mask":[[0,0],[0,1]],"score":0.9},{"mask":[[1,0],[0,0]],"score":0.1}]}"#;
        let result = interpret_remote_response(
            "application/json",
            body,
            &[PromptPoint::include(0, 0)],
            Dimensions::new(4, 4),
            ScoreWeights::default(),
        )
        .unwrap();
        let RemoteSegmentation::Selected(mask) = result else {
            unreachable!("a single seed selects one candidate");
        };
        assert_eq!(mask.dimensions(), Dimensions::new(4, 4));
        assert!(mask.is_covered(0, 0) && mask.is_covered(1, 1));
        assert_eq!(mask.covered_count(), 4);
    }
}
