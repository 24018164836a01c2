//! Joint (intensity, guidance) histogram for 2D Otsu thresholding.

use image::GrayImage;

use crate::integral::SummedAreaTable;

/// Number of quantization levels per axis.
pub const LEVELS: usize = 256;

/// Normalized 256x256 joint histogram.
///
/// Row index is the intensity level `i`, column index the guidance
/// level `g`; `prob(i, g)` is the fraction of pixels with that pair.
#[derive(Debug, Clone)]
pub struct JointHistogram {
    probs: Vec<f64>,
}

impl JointHistogram {
    /// Count value pairs from two equally sized images and normalize.
    ///
    /// Returns `None` if the images differ in size or are empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_images(intensity: &GrayImage, guidance: &GrayImage) -> Option<Self> {
        if intensity.dimensions() != guidance.dimensions() {
            return None;
        }
        let mut counts = vec![0u64; LEVELS * LEVELS];
        for (&i, &g) in intensity.as_raw().iter().zip(guidance.as_raw()) {
            counts[usize::from(i) * LEVELS + usize::from(g)] += 1;
        }
        let pixel_count: u64 = counts.iter().sum();
        if pixel_count == 0 {
            return None;
        }
        let n = pixel_count as f64;
        let probs = counts.iter().map(|&c| c as f64 / n).collect();
        Some(Self { probs })
    }

    /// Build directly from a row-major probability grid.
    ///
    /// Returns `None` unless `probs` has exactly `LEVELS * LEVELS` entries.
    #[cfg(test)]
    pub(crate) fn from_probabilities(probs: Vec<f64>) -> Option<Self> {
        (probs.len() == LEVELS * LEVELS).then_some(Self { probs })
    }

    /// Probability of the pair `(i, g)`.
    #[must_use]
    pub fn prob(&self, i: usize, g: usize) -> f64 {
        self.probs[i * LEVELS + g]
    }

    /// Summed-area tables over the probability, intensity-moment and
    /// guidance-moment grids.
    #[must_use]
    pub fn moment_tables(&self) -> MomentTables {
        let mut mass = Vec::with_capacity(LEVELS * LEVELS);
        let mut moment_i = Vec::with_capacity(LEVELS * LEVELS);
        let mut moment_g = Vec::with_capacity(LEVELS * LEVELS);
        for i in 0..LEVELS {
            for g in 0..LEVELS {
                let p = self.prob(i, g);
                mass.push(p);
                moment_i.push(p * level(i));
                moment_g.push(p * level(g));
            }
        }
        // Grids are laid out with `g` as x and `i` as y.
        MomentTables {
            mass: SummedAreaTable::new(&mass, LEVELS, LEVELS),
            moment_i: SummedAreaTable::new(&moment_i, LEVELS, LEVELS),
            moment_g: SummedAreaTable::new(&moment_g, LEVELS, LEVELS),
        }
    }
}

/// Integral images over the histogram's zeroth and first moments.
#[derive(Debug, Clone)]
pub struct MomentTables {
    /// Probability mass.
    pub mass: SummedAreaTable,
    /// Probability weighted by intensity level.
    pub moment_i: SummedAreaTable,
    /// Probability weighted by guidance level.
    pub moment_g: SummedAreaTable,
}

impl MomentTables {
    /// `(mass, sum_i, sum_g)` over intensities `i0..i1` and guidance
    /// levels `g0..g1` (half-open).
    #[must_use]
    pub fn region(&self, i0: usize, i1: usize, g0: usize, g1: usize) -> (f64, f64, f64) {
        (
            self.mass.sum(g0, i0, g1, i1),
            self.moment_i.sum(g0, i0, g1, i1),
            self.moment_g.sum(g0, i0, g1, i1),
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn level(index: usize) -> f64 {
    index as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_sum_to_one() {
        let a = GrayImage::from_fn(8, 8, |x, _| image::Luma([u8::try_from(x * 30).unwrap()]));
        let b = GrayImage::from_fn(8, 8, |_, y| image::Luma([u8::try_from(y * 30).unwrap()]));
        let hist = JointHistogram::from_images(&a, &b).unwrap();
        let total: f64 = (0..LEVELS)
            .flat_map(|i| (0..LEVELS).map(move |g| (i, g)))
            .map(|(i, g)| hist.prob(i, g))
            .sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((hist.prob(30, 60) - 1.0 / 64.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let a = GrayImage::new(4, 4);
        let b = GrayImage::new(4, 5);
        assert!(JointHistogram::from_images(&a, &b).is_none());
    }

    #[test]
    fn empty_images_are_rejected() {
        let a = GrayImage::new(0, 0);
        assert!(JointHistogram::from_images(&a, &a).is_none());
    }

    #[test]
    fn full_region_moments_give_distribution_mean() {
        let mut probs = vec![0.0; LEVELS * LEVELS];
        probs[10 * LEVELS + 20] = 0.5;
        probs[200 * LEVELS + 100] = 0.5;
        let hist = JointHistogram::from_probabilities(probs).unwrap();
        let (mass, mi, mg) = hist.moment_tables().region(0, LEVELS, 0, LEVELS);
        assert!((mass - 1.0).abs() < 1e-12);
        assert!((mi - 105.0).abs() < 1e-9);
        assert!((mg - 60.0).abs() < 1e-9);
    }

    #[test]
    fn moment_tables_region_matches_direct_sum() {
        let mut probs = vec![0.0; LEVELS * LEVELS];
        probs[10 * LEVELS + 20] = 0.25;
        probs[12 * LEVELS + 5] = 0.25;
        probs[200 * LEVELS + 100] = 0.5;
        let hist = JointHistogram::from_probabilities(probs).unwrap();
        let tables = hist.moment_tables();
        let (mass, si, sg) = tables.region(0, 13, 0, 21);
        assert!((mass - 0.5).abs() < 1e-12);
        assert!((si - (0.25 * 10.0 + 0.25 * 12.0)).abs() < 1e-9);
        assert!((sg - (0.25 * 20.0 + 0.25 * 5.0)).abs() < 1e-9);
    }
}
