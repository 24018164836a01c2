//! Summed-area tables (integral images) over `f64` grids.
//!
//! A table has one extra leading row and column of zeros, so the sum
//! of any axis-aligned rectangle is four lookups regardless of its
//! size. Used for the guided filter's box means and for the
//! accelerated threshold search over the joint histogram.

/// Cumulative-sum grid supporting O(1) rectangle sums.
#[derive(Debug, Clone)]
pub struct SummedAreaTable {
    width: usize,
    height: usize,
    /// Row-major `(width + 1) * (height + 1)` prefix sums.
    sums: Vec<f64>,
}

impl SummedAreaTable {
    /// Build a table from a row-major grid of `width * height` values.
    ///
    /// Missing trailing values (if `values` is short) are treated as zero.
    #[must_use]
    pub fn new(values: &[f64], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sums = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0.0;
            for x in 0..width {
                row_sum += values.get(y * width + x).copied().unwrap_or(0.0);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }
        Self {
            width,
            height,
            sums,
        }
    }

    /// Sum of the half-open rectangle `[x0, x1) x [y0, y1)`.
    ///
    /// Bounds are clamped to the grid; an empty or inverted rectangle
    /// sums to zero.
    #[must_use]
    pub fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return 0.0;
        }
        let stride = self.width + 1;
        self.sums[y1 * stride + x1] - self.sums[y0 * stride + x1] - self.sums[y1 * stride + x0]
            + self.sums[y0 * stride + x0]
    }
}

/// Mean of every `(2 * radius + 1)`-wide square window, clipped at the
/// image borders so edge pixels average over fewer samples.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn box_mean(values: &[f64], width: usize, height: usize, radius: usize) -> Vec<f64> {
    let table = SummedAreaTable::new(values, width, height);
    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius + 1).min(height);
        for x in 0..width {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius + 1).min(width);
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            out.push(table.sum(x0, y0, x1, y1) / count);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> Vec<f64> {
        (0..width * height).map(|i| (i % 7) as f64).collect()
    }

    fn brute_sum(values: &[f64], width: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let mut s = 0.0;
        for y in y0..y1 {
            for x in x0..x1 {
                s += values[y * width + x];
            }
        }
        s
    }

    #[test]
    fn rectangle_sums_match_brute_force() {
        let (w, h) = (9, 6);
        let values = ramp(w, h);
        let table = SummedAreaTable::new(&values, w, h);
        for (x0, y0, x1, y1) in [(0, 0, 9, 6), (2, 1, 5, 4), (8, 5, 9, 6), (0, 3, 4, 6)] {
            let expected = brute_sum(&values, w, x0, y0, x1, y1);
            assert!(
                (table.sum(x0, y0, x1, y1) - expected).abs() < 1e-9,
                "rect ({x0},{y0})-({x1},{y1})"
            );
        }
    }

    #[test]
    fn empty_and_inverted_rectangles_sum_to_zero() {
        let table = SummedAreaTable::new(&ramp(4, 4), 4, 4);
        assert!(table.sum(2, 2, 2, 4).abs() < f64::EPSILON);
        assert!(table.sum(3, 0, 1, 4).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_bounds_are_clamped() {
        let values = ramp(5, 5);
        let table = SummedAreaTable::new(&values, 5, 5);
        let expected = brute_sum(&values, 5, 0, 0, 5, 5);
        assert!((table.sum(0, 0, 100, 100) - expected).abs() < 1e-9);
    }

    #[test]
    fn box_mean_of_constant_is_constant() {
        let values = vec![3.5; 30];
        for m in box_mean(&values, 6, 5, 2) {
            assert!((m - 3.5).abs() < 1e-12);
        }
    }

    #[test]
    fn box_mean_clips_at_corner() {
        // 3x3 grid, radius 1: the top-left window covers only 4 samples.
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let means = box_mean(&values, 3, 3, 1);
        assert!((means[0] - (1.0 + 2.0 + 4.0 + 5.0) / 4.0).abs() < 1e-12);
        assert!((means[4] - 5.0).abs() < 1e-12);
    }
}
