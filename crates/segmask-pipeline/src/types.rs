//! Shared types for the segmask segmentation engine.

use serde::{Deserialize, Serialize};

use crate::downsample::DownsampleFilter;
use crate::region::RegionGrowerKind;

/// Re-export `GrayImage` so downstream crates can reference coverage
/// rasters without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference decoded
/// pixel buffers without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new dimensions value.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an existing RGBA image.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn area(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A user-supplied seed point with polarity.
///
/// Coordinates are in the original image's pixel space, never in a
/// downsampled working space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPoint {
    /// Horizontal position (pixels from left edge).
    pub x: u32,
    /// Vertical position (pixels from top edge).
    pub y: u32,
    /// `true` to include the region around the point, `false` to
    /// exclude it.
    pub positive: bool,
}

impl PromptPoint {
    /// A positive (include) seed.
    #[must_use]
    pub const fn include(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            positive: true,
        }
    }

    /// A negative (exclude) seed.
    #[must_use]
    pub const fn exclude(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            positive: false,
        }
    }

    /// The point clamped into the bounds of `dims`.
    #[must_use]
    pub const fn clamped(self, dims: Dimensions) -> Self {
        let max_x = dims.width.saturating_sub(1);
        let max_y = dims.height.saturating_sub(1);
        Self {
            x: if self.x > max_x { max_x } else { self.x },
            y: if self.y > max_y { max_y } else { self.y },
            positive: self.positive,
        }
    }

    /// Numeric label used by the remote prompt encoding (1 include, 0 exclude).
    #[must_use]
    pub fn label(self) -> u8 {
        u8::from(self.positive)
    }
}

/// An RGB color.
pub type Rgb = [u8; 3];

/// Parameters for seeded region growing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionGrowConfig {
    /// Which region growing strategy to use.
    pub grower: RegionGrowerKind,

    /// Color tolerance applied even in perfectly flat neighborhoods.
    pub base_tolerance: f32,

    /// Multiplier on the mean local channel standard deviation that is
    /// added to `base_tolerance`.
    pub tolerance_scale: f32,

    /// Number of local gradient standard deviations above the local
    /// gradient mean a pixel may reach and still join the region.
    pub edge_factor: f32,

    /// Half-size of the square neighborhood sampled around each seed
    /// (3 gives a 7×7 window).
    pub neighborhood_radius: u32,

    /// Maximum growth distance from the seed as a fraction of the
    /// shorter image side.
    pub max_radius_fraction: f32,

    /// Absolute upper bound on the growth distance in pixels.
    pub max_radius_cap: u32,

    /// Maximum region size as a fraction of the image area.
    pub max_region_fraction: f32,

    /// Structuring radius of the open/close refinement (0 disables it).
    pub refine_radius: u8,

    /// Euclidean RGB tolerance of the seed-color strategy.
    pub seed_color_tolerance: f32,

    /// Maximum region size of the seed-color strategy as a fraction of
    /// the working area.
    pub seed_color_region_fraction: f32,
}

impl RegionGrowConfig {
    /// Default growing strategy.
    pub const DEFAULT_GROWER: RegionGrowerKind = RegionGrowerKind::Adaptive;
    /// Default base color tolerance.
    pub const DEFAULT_BASE_TOLERANCE: f32 = 8.0;
    /// Default scale on local color spread.
    pub const DEFAULT_TOLERANCE_SCALE: f32 = 2.0;
    /// Default edge gate factor.
    pub const DEFAULT_EDGE_FACTOR: f32 = 1.2;
    /// Default neighborhood half-size (7×7 window).
    pub const DEFAULT_NEIGHBORHOOD_RADIUS: u32 = 3;
    /// Largest accepted neighborhood half-size.
    pub const MAX_NEIGHBORHOOD_RADIUS: u32 = 64;
    /// Default growth radius as a fraction of the shorter side.
    pub const DEFAULT_MAX_RADIUS_FRACTION: f32 = 0.5;
    /// Default absolute growth radius cap.
    pub const DEFAULT_MAX_RADIUS_CAP: u32 = 200;
    /// Default region size cap as a fraction of the image area.
    pub const DEFAULT_MAX_REGION_FRACTION: f32 = 0.5;
    /// Default refinement radius.
    pub const DEFAULT_REFINE_RADIUS: u8 = 1;
    /// Default seed-color tolerance.
    pub const DEFAULT_SEED_COLOR_TOLERANCE: f32 = 28.0;
    /// Default seed-color region cap.
    pub const DEFAULT_SEED_COLOR_REGION_FRACTION: f32 = 0.6;
}

impl Default for RegionGrowConfig {
    fn default() -> Self {
        Self {
            grower: Self::DEFAULT_GROWER,
            base_tolerance: Self::DEFAULT_BASE_TOLERANCE,
            tolerance_scale: Self::DEFAULT_TOLERANCE_SCALE,
            edge_factor: Self::DEFAULT_EDGE_FACTOR,
            neighborhood_radius: Self::DEFAULT_NEIGHBORHOOD_RADIUS,
            max_radius_fraction: Self::DEFAULT_MAX_RADIUS_FRACTION,
            max_radius_cap: Self::DEFAULT_MAX_RADIUS_CAP,
            max_region_fraction: Self::DEFAULT_MAX_REGION_FRACTION,
            refine_radius: Self::DEFAULT_REFINE_RADIUS,
            seed_color_tolerance: Self::DEFAULT_SEED_COLOR_TOLERANCE,
            seed_color_region_fraction: Self::DEFAULT_SEED_COLOR_REGION_FRACTION,
        }
    }
}

/// Parameters for automatic color clustering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    /// Number of clusters.
    pub clusters: usize,
    /// Number of assignment/update iterations.
    pub iterations: usize,
    /// Seed for centroid initialisation. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl KMeansConfig {
    /// Default cluster count.
    pub const DEFAULT_CLUSTERS: usize = 4;
    /// Default iteration count.
    pub const DEFAULT_ITERATIONS: usize = 15;
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            clusters: Self::DEFAULT_CLUSTERS,
            iterations: Self::DEFAULT_ITERATIONS,
            seed: None,
        }
    }
}

/// Weights of the single-point candidate scoring heuristic.
///
/// Candidates are ranked by seed coverage first, then by the service's
/// own confidence, then by area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Added when the candidate covers the seed pixel.
    pub coverage_bonus: f64,
    /// Multiplier on the candidate's covered pixel count.
    pub area_weight: f64,
}

impl ScoreWeights {
    /// Default coverage bonus.
    pub const DEFAULT_COVERAGE_BONUS: f64 = 1000.0;
    /// Default area weight.
    pub const DEFAULT_AREA_WEIGHT: f64 = 0.0001;
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            coverage_bonus: Self::DEFAULT_COVERAGE_BONUS,
            area_weight: Self::DEFAULT_AREA_WEIGHT,
        }
    }
}

/// Configuration for the segmentation engine.
///
/// All parameters have defaults; partial JSON documents deserialize
/// with the remaining fields filled in from [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Seeded region growing parameters.
    pub region: RegionGrowConfig,

    /// Automatic clustering parameters.
    pub kmeans: KMeansConfig,

    /// Lower bound on the working-resolution width.
    pub working_min: u32,

    /// Upper bound on the working-resolution width.
    pub working_max: u32,

    /// Resampling filter used when building the working-resolution copy.
    pub downsample_filter: DownsampleFilter,

    /// Opacity of the color overlay painted onto covered pixels.
    pub overlay_alpha: f32,

    /// Candidate scoring weights for single-point remote requests.
    pub score: ScoreWeights,
}

impl SegmentConfig {
    /// Default lower bound on the working width.
    pub const DEFAULT_WORKING_MIN: u32 = 64;
    /// Default upper bound on the working width.
    pub const DEFAULT_WORKING_MAX: u32 = 256;
    /// Default working-resolution filter.
    pub const DEFAULT_DOWNSAMPLE_FILTER: DownsampleFilter = DownsampleFilter::Triangle;
    /// Default overlay opacity.
    pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.5;

    /// Check the parameters for values no algorithm can work with.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.kmeans.clusters == 0 {
            return Err(SegmentError::InvalidConfig(
                "kmeans.clusters must be at least 1".to_owned(),
            ));
        }
        if self.kmeans.iterations == 0 {
            return Err(SegmentError::InvalidConfig(
                "kmeans.iterations must be at least 1".to_owned(),
            ));
        }
        if self.working_min == 0 || self.working_min > self.working_max {
            return Err(SegmentError::InvalidConfig(format!(
                "working resolution bounds must satisfy 0 < min <= max, got {}..{}",
                self.working_min, self.working_max,
            )));
        }
        if !(0.0..=1.0).contains(&self.overlay_alpha) {
            return Err(SegmentError::InvalidConfig(format!(
                "overlay_alpha must be within 0..=1, got {}",
                self.overlay_alpha,
            )));
        }
        if self.region.neighborhood_radius > RegionGrowConfig::MAX_NEIGHBORHOOD_RADIUS {
            return Err(SegmentError::InvalidConfig(format!(
                "region.neighborhood_radius must be at most {}, got {}",
                RegionGrowConfig::MAX_NEIGHBORHOOD_RADIUS,
                self.region.neighborhood_radius,
            )));
        }
        let fractions = [
            ("region.max_radius_fraction", self.region.max_radius_fraction),
            ("region.max_region_fraction", self.region.max_region_fraction),
            (
                "region.seed_color_region_fraction",
                self.region.seed_color_region_fraction,
            ),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(SegmentError::InvalidConfig(format!(
                    "{name} must be within (0, 1], got {value}",
                )));
            }
        }
        Ok(())
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            region: RegionGrowConfig::default(),
            kmeans: KMeansConfig::default(),
            working_min: Self::DEFAULT_WORKING_MIN,
            working_max: Self::DEFAULT_WORKING_MAX,
            downsample_filter: Self::DEFAULT_DOWNSAMPLE_FILTER,
            overlay_alpha: Self::DEFAULT_OVERLAY_ALPHA,
            score: ScoreWeights::default(),
        }
    }
}

/// Errors that can occur while decoding images or interpreting masks.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Failed to decode an image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// A mask payload matched none of the recognized encodings.
    #[error("unsupported mask format: {0}")]
    UnsupportedFormat(String),

    /// The remote service answered with a failure status or a payload
    /// that could not be interpreted.
    #[error("remote service error: {0}")]
    RemoteService(String),

    /// The remote response contained no usable mask.
    #[error("remote response contained no usable masks")]
    NoCandidates,

    /// Segmentation configuration is invalid.
    #[error("invalid segmentation configuration: {0}")]
    InvalidConfig(String),
}
