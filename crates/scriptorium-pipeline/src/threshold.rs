//! Threshold-pair search over a joint (intensity, guidance) histogram.
//!
//! A pair `(s, t)` splits the histogram into four quadrants:
//!
//! ```text
//!              g <= t          g > t
//!   i <= s   foreground    transition
//!   i >  s   transition    background
//! ```
//!
//! The score of a pair is the trace of the between-class scatter of the
//! foreground and background quadrants, weighted by the fraction of mass
//! those two quadrants explain. The weighting keeps the search away from
//! splits that park most pixels in the transition quadrants, which the
//! plain trace happily rewards near the histogram diagonal.
//!
//! Two strategies produce the same pair: [`SearchStrategy::Exhaustive`]
//! walks the grid with running column accumulators, and
//! [`SearchStrategy::Integral`] answers every quadrant query with four
//! summed-area-table lookups.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::histogram::{JointHistogram, LEVELS};

/// Quadrants with less mass than this are treated as empty.
const MIN_CLASS_MASS: f64 = 1e-9;

/// Relative margin a score must beat the incumbent by to replace it.
///
/// Both strategies accumulate the same sums in different orders; the
/// margin makes them agree on the first-encountered pair when two
/// scores differ only by rounding.
const TIE_MARGIN: f64 = 1e-9;

/// How the threshold search evaluates quadrant sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchStrategy {
    /// Running accumulators, one pass over the grid.
    Exhaustive,
    /// Summed-area tables, O(1) per quadrant query.
    #[default]
    Integral,
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhaustive => f.write_str("Exhaustive"),
            Self::Integral => f.write_str("Integral"),
        }
    }
}

/// The winning threshold pair and the class centres it induces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    /// Intensity threshold `s`.
    pub intensity: u8,
    /// Guidance threshold `t`.
    pub guidance: u8,
    /// Weighted between-class variance at `(s, t)`.
    pub score: f64,
    /// Mean `(intensity, guidance)` of the foreground quadrant.
    pub foreground_center: (f64, f64),
    /// Mean `(intensity, guidance)` of the background quadrant.
    pub background_center: (f64, f64),
}

/// Zeroth and first moments of one quadrant.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    mass: f64,
    sum_i: f64,
    sum_g: f64,
}

impl Moments {
    fn center(self) -> (f64, f64) {
        (self.sum_i / self.mass, self.sum_g / self.mass)
    }
}

/// Search all `(s, t)` in `[0, 255]^2` for the best-scoring pair.
///
/// Returns `None` if no pair leaves mass in both the foreground and the
/// background quadrant (e.g. a uniform image).
#[must_use]
pub fn search(hist: &JointHistogram, strategy: SearchStrategy) -> Option<ThresholdPair> {
    match strategy {
        SearchStrategy::Exhaustive => search_exhaustive(hist),
        SearchStrategy::Integral => search_integral(hist),
    }
}

/// Keeps the best candidate seen so far in `(s, t)` visiting order.
#[derive(Default)]
struct Best(Option<ThresholdPair>);

impl Best {
    #[allow(clippy::cast_possible_truncation)]
    fn offer(&mut self, s: usize, t: usize, fg: Moments, bg: Moments, mean: (f64, f64)) {
        let Some(score) = score(fg, bg, mean) else {
            return;
        };
        let beats = self
            .0
            .is_none_or(|best| score > best.score.abs().mul_add(TIE_MARGIN, best.score));
        if beats {
            self.0 = Some(ThresholdPair {
                intensity: s as u8,
                guidance: t as u8,
                score,
                foreground_center: fg.center(),
                background_center: bg.center(),
            });
        }
    }
}

fn score(fg: Moments, bg: Moments, mean: (f64, f64)) -> Option<f64> {
    if fg.mass < MIN_CLASS_MASS || bg.mass < MIN_CLASS_MASS {
        return None;
    }
    let (fi, fgm) = fg.center();
    let (bi, bgm) = bg.center();
    let spread = |ci: f64, cg: f64| {
        let di = ci - mean.0;
        let dg = cg - mean.1;
        di.mul_add(di, dg * dg)
    };
    let between = fg.mass.mul_add(spread(fi, fgm), bg.mass * spread(bi, bgm));
    let coherence = fg.mass + bg.mass;
    Some(between * coherence)
}

#[allow(clippy::cast_precision_loss)]
fn search_exhaustive(hist: &JointHistogram) -> Option<ThresholdPair> {
    // Column marginals over all intensities, for the `g <= t` strip.
    let mut marginal = [Moments::default(); LEVELS];
    let mut total = Moments::default();
    for i in 0..LEVELS {
        for (g, m) in marginal.iter_mut().enumerate() {
            let p = hist.prob(i, g);
            m.mass += p;
            m.sum_i += p * i as f64;
            m.sum_g += p * g as f64;
        }
    }
    for m in &marginal {
        total.mass += m.mass;
        total.sum_i += m.sum_i;
        total.sum_g += m.sum_g;
    }
    let mean = (total.sum_i / total.mass, total.sum_g / total.mass);

    // Per-column sums restricted to rows `i <= s`, grown one row per `s`.
    let mut columns = [Moments::default(); LEVELS];
    let mut rows = Moments::default();
    let mut best = Best::default();

    for s in 0..LEVELS {
        for (g, c) in columns.iter_mut().enumerate() {
            let p = hist.prob(s, g);
            c.mass += p;
            c.sum_i += p * s as f64;
            c.sum_g += p * g as f64;
            rows.mass += p;
            rows.sum_i += p * s as f64;
            rows.sum_g += p * g as f64;
        }

        let mut fg = Moments::default();
        let mut strip = Moments::default();
        for t in 0..LEVELS {
            fg.mass += columns[t].mass;
            fg.sum_i += columns[t].sum_i;
            fg.sum_g += columns[t].sum_g;
            strip.mass += marginal[t].mass;
            strip.sum_i += marginal[t].sum_i;
            strip.sum_g += marginal[t].sum_g;

            // Inclusion-exclusion: everything, minus rows i <= s, minus
            // columns g <= t, plus their overlap.
            let bg = Moments {
                mass: total.mass - rows.mass - strip.mass + fg.mass,
                sum_i: total.sum_i - rows.sum_i - strip.sum_i + fg.sum_i,
                sum_g: total.sum_g - rows.sum_g - strip.sum_g + fg.sum_g,
            };
            best.offer(s, t, fg, bg, mean);
        }
    }
    best.0
}

fn search_integral(hist: &JointHistogram) -> Option<ThresholdPair> {
    let tables = hist.moment_tables();
    let (mass, sum_i, sum_g) = tables.region(0, LEVELS, 0, LEVELS);
    if mass < MIN_CLASS_MASS {
        return None;
    }
    let mean = (sum_i / mass, sum_g / mass);

    let mut best = Best::default();
    for s in 0..LEVELS {
        for t in 0..LEVELS {
            let (mass, sum_i, sum_g) = tables.region(0, s + 1, 0, t + 1);
            let fg = Moments { mass, sum_i, sum_g };
            let (mass, sum_i, sum_g) = tables.region(s + 1, LEVELS, t + 1, LEVELS);
            let bg = Moments { mass, sum_i, sum_g };
            best.offer(s, t, fg, bg, mean);
        }
    }
    best.0
}
