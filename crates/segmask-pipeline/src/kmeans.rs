//! Unsupervised color clustering.
//!
//! Lloyd's k-means over RGB: centroids start at uniformly sampled pixels,
//! then every iteration assigns each pixel to its nearest centroid by
//! squared Euclidean distance (ties go to the lowest index) and moves
//! each centroid to the mean of its members. An empty cluster keeps a
//! zero-sum centroid instead of dividing by zero.
//!
//! Clustering runs on the working-resolution copy; [`ClusterAssignment::upsample`]
//! expands the labels back to the source size.

use image::RgbaImage;
use rand::Rng;

use crate::coverage::CoverageMask;
use crate::types::Dimensions;

/// Per-pixel cluster labels in `[0, k)`, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    dims: Dimensions,
    k: usize,
    labels: Vec<usize>,
}

impl ClusterAssignment {
    /// Label grid dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dims
    }

    /// Number of clusters the labels were drawn from.
    #[must_use]
    pub const fn cluster_count(&self) -> usize {
        self.k
    }

    /// Label of `(x, y)`.
    #[must_use]
    pub fn label(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.dims.width || y >= self.dims.height {
            return None;
        }
        self.labels
            .get(y as usize * self.dims.width as usize + x as usize)
            .copied()
    }

    /// All labels, row-major.
    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Member count of every cluster.
    #[must_use]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    /// Coverage mask of the pixels labelled `cluster`.
    #[must_use]
    pub fn mask_for(&self, cluster: usize) -> CoverageMask {
        CoverageMask::from_fn(self.dims.width, self.dims.height, |x, y| {
            self.label(x, y) == Some(cluster)
        })
    }

    /// Expand to `target` by nearest-neighbor block expansion: output
    /// pixel `(x, y)` takes the label of source cell
    /// `(x * w / W, y * h / H)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn upsample(&self, target: Dimensions) -> Self {
        if target == self.dims {
            return self.clone();
        }
        let (sw, sh) = (u64::from(self.dims.width), u64::from(self.dims.height));
        let (tw, th) = (u64::from(target.width), u64::from(target.height));
        let mut labels = Vec::with_capacity(target.area());
        for y in 0..th {
            let sy = (y * sh / th).min(sh.saturating_sub(1)) as usize;
            for x in 0..tw {
                let sx = (x * sw / tw).min(sw.saturating_sub(1)) as usize;
                labels.push(self.labels[sy * sw as usize + sx]);
            }
        }
        Self {
            dims: target,
            k: self.k,
            labels,
        }
    }
}

/// Cluster the pixels of `image` into `k` color classes.
///
/// `k` and `iterations` below 1 are raised to 1. Results are
/// deterministic for a given `rng` state.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn segment<R: Rng + ?Sized>(
    image: &RgbaImage,
    k: usize,
    iterations: usize,
    rng: &mut R,
) -> ClusterAssignment {
    let dims = Dimensions::of(image);
    let k = k.max(1);
    let pixels: Vec<[f64; 3]> = image
        .pixels()
        .map(|p| [f64::from(p.0[0]), f64::from(p.0[1]), f64::from(p.0[2])])
        .collect();
    let mut labels = vec![0usize; pixels.len()];
    if pixels.is_empty() {
        return ClusterAssignment { dims, k, labels };
    }

    let mut centroids: Vec<[f64; 3]> = (0..k)
        .map(|_| pixels[rng.gen_range(0..pixels.len())])
        .collect();

    for _ in 0..iterations.max(1) {
        for (label, pixel) in labels.iter_mut().zip(&pixels) {
            *label = nearest_centroid(&centroids, *pixel);
        }

        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (&label, pixel) in labels.iter().zip(&pixels) {
            for c in 0..3 {
                sums[label][c] += pixel[c];
            }
            counts[label] += 1;
        }
        for ((centroid, sum), &count) in centroids.iter_mut().zip(&sums).zip(&counts) {
            let n = count.max(1) as f64;
            *centroid = sum.map(|s| s / n);
        }
    }

    ClusterAssignment { dims, k, labels }
}

/// Index of the closest centroid; the first one wins ties.
fn nearest_centroid(centroids: &[[f64; 3]], pixel: [f64; 3]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let dr = pixel[0] - centroid[0];
        let dg = pixel[1] - centroid[1];
        let db = pixel[2] - centroid[2];
        let distance = db.mul_add(db, dr.mul_add(dr, dg * dg));
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgba;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn striped(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| match (x / 4 + y) % 3 {
            0 => Rgba([250, 10, 10, 255]),
            1 => Rgba([10, 250, 10, 255]),
            _ => Rgba([10, 10, 250, 255]),
        })
    }

    #[test]
    fn labels_are_always_in_range() {
        let image = striped(32, 24);
        for seed in 0..20 {
            for k in 1..6 {
                let mut rng = StdRng::seed_from_u64(seed);
                let assignment = segment(&image, k, 5, &mut rng);
                assert_eq!(assignment.labels().len(), 32 * 24);
                assert!(
                    assignment.labels().iter().all(|&l| l < k),
                    "label out of range for k={k} seed={seed}",
                );
                assert_eq!(assignment.cluster_sizes().iter().sum::<usize>(), 32 * 24);
            }
        }
    }

    #[test]
    fn uniform_image_ties_to_lowest_index() {
        let image = RgbaImage::from_pixel(8, 8, Rgba([60, 70, 80, 255]));
        let mut rng = StdRng::seed_from_u64(3);
        let assignment = segment(&image, 4, 15, &mut rng);
        assert!(assignment.labels().iter().all(|&l| l == 0));
        assert_eq!(assignment.cluster_sizes(), vec![64, 0, 0, 0]);
    }

    #[test]
    fn identical_colors_share_a_label() {
        let image = striped(24, 12);
        let mut rng = StdRng::seed_from_u64(11);
        let assignment = segment(&image, 3, 10, &mut rng);
        for y in 0..12 {
            for x in 0..24 {
                let same_color = (x / 4 + y) % 3 == 0;
                if same_color {
                    assert_eq!(assignment.label(x, y), assignment.label(0, 0));
                }
            }
        }
    }

    #[test]
    fn same_seed_is_reproducible() {
        let image = striped(16, 16);
        let a = segment(&image, 3, 8, &mut StdRng::seed_from_u64(42));
        let b = segment(&image, 3, 8, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn zero_k_and_iterations_are_raised_to_one() {
        let image = striped(4, 4);
        let assignment = segment(&image, 0, 0, &mut StdRng::seed_from_u64(1));
        assert_eq!(assignment.cluster_count(), 1);
        assert!(assignment.labels().iter().all(|&l| l == 0));
    }

    #[test]
    fn upsample_expands_blocks() {
        let assignment = ClusterAssignment {
            dims: Dimensions::new(2, 1),
            k: 2,
            labels: vec![0, 1],
        };
        let big = assignment.upsample(Dimensions::new(5, 2));
        assert_eq!(big.labels(), &[0, 0, 0, 1, 1, 0, 0, 0, 1, 1]);
        assert_eq!(big.cluster_count(), 2);
    }

    #[test]
    fn mask_for_selects_cluster_members() {
        let assignment = ClusterAssignment {
            dims: Dimensions::new(3, 1),
            k: 2,
            labels: vec![1, 0, 1],
        };
        let mask = assignment.mask_for(1);
        assert_eq!(mask.covered_count(), 2);
        assert!(mask.is_covered(0, 0) && !mask.is_covered(1, 0));
    }

    #[test]
    fn label_out_of_bounds_is_none() {
        let assignment = segment(&striped(4, 4), 2, 1, &mut StdRng::seed_from_u64(0));
        assert_eq!(assignment.label(4, 0), None);
    }
}
