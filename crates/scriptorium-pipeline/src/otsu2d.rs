//! Two-dimensional Otsu binarization for scanned documents.
//!
//! Separates ink (0) from paper (255) using two correlated channels:
//! the intensity image and a guided-filter guidance image. A joint
//! histogram over both is searched for the threshold pair maximizing
//! between-class variance (see [`crate::threshold`]), pixels are
//! classified by quadrant, and a close/open pass removes speckle.
//!
//! # Steps
//!
//! 1. Convert to single-channel intensity
//! 2. Optional noise reduction (bilateral, then 3x3 median)
//! 3. Guidance image via the self-guided filter
//! 4. Joint 256x256 histogram over (intensity, guidance)
//! 5. Threshold-pair search (exhaustive or integral-image accelerated)
//! 6. Quadrant classification; transition pixels go to the nearer
//!    class centre
//! 7. Morphological close, then open
//!
//! With `region_count > 1`, steps 2-7 run independently on each tile of
//! a `region_count x region_count` grid and the tiles are stitched back.

use image::GrayImage;
use image::imageops::FilterType;
use imageproc::distance_transform::Norm;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::histogram::JointHistogram;
use crate::params::{ParamMap, ParamValue, float_where, int_in_range};
use crate::threshold::{SearchStrategy, ThresholdPair};
use crate::transform::Transform;
use crate::types::{PipelineError, PreviewConfig, Raster};

/// Output value for ink pixels.
pub const INK: u8 = 0;
/// Output value for paper pixels.
pub const PAPER: u8 = 255;

/// Split used when the histogram has no valid threshold pair (a
/// single-level image): pixels at or above it become paper.
const FALLBACK_LEVEL: u8 = 128;

/// Tunable parameters for [`TwoDOtsuBinarizer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinarizerParams {
    /// Guided filter window radius in pixels (1..=64).
    pub window_radius: u32,
    /// Guided filter regularizer in normalized intensity units [1e-6, 1].
    pub epsilon: f64,
    /// Side of the square close/open structuring element (0..=31).
    /// Values of 1 or less skip the morphology step; even sizes are
    /// rounded up to the next odd size.
    pub morph_kernel_size: u32,
    /// Run bilateral + median smoothing before thresholding.
    pub noise_reduction: bool,
    /// Use the summed-area-table threshold search.
    pub use_accelerated_search: bool,
    /// Tiles per side for spatial partitioning (1..=16). 1 disables it.
    pub region_count: u32,
}

impl BinarizerParams {
    /// Default guided filter window radius.
    pub const DEFAULT_WINDOW_RADIUS: u32 = 8;
    /// Default guided filter regularizer.
    pub const DEFAULT_EPSILON: f64 = 0.01;
    /// Default structuring element size.
    pub const DEFAULT_MORPH_KERNEL_SIZE: u32 = 3;
    /// Default for pre-threshold noise reduction.
    pub const DEFAULT_NOISE_REDUCTION: bool = false;
    /// Default threshold search mode.
    pub const DEFAULT_USE_ACCELERATED_SEARCH: bool = true;
    /// Default tile count per side.
    pub const DEFAULT_REGION_COUNT: u32 = 1;

    /// Largest accepted window radius.
    pub const MAX_WINDOW_RADIUS: u32 = 64;
    /// Smallest accepted regularizer.
    pub const MIN_EPSILON: f64 = 1e-6;
    /// Largest accepted regularizer.
    pub const MAX_EPSILON: f64 = 1.0;
    /// Largest accepted structuring element size.
    pub const MAX_MORPH_KERNEL_SIZE: u32 = 31;
    /// Largest accepted tile count per side.
    pub const MAX_REGION_COUNT: u32 = 16;

    /// The same parameters pulled into their accepted ranges.
    ///
    /// Parameters built as struct literals or deserialized bypass
    /// `set_param`, so every entry point that stores or runs them goes
    /// through here. A non-finite epsilon falls back to the default.
    #[must_use]
    pub fn clamped(self) -> Self {
        let epsilon = if self.epsilon.is_finite() {
            self.epsilon.clamp(Self::MIN_EPSILON, Self::MAX_EPSILON)
        } else {
            Self::DEFAULT_EPSILON
        };
        Self {
            window_radius: self.window_radius.clamp(1, Self::MAX_WINDOW_RADIUS),
            epsilon,
            morph_kernel_size: self.morph_kernel_size.min(Self::MAX_MORPH_KERNEL_SIZE),
            region_count: self.region_count.clamp(1, Self::MAX_REGION_COUNT),
            ..self
        }
    }

    /// Search strategy selected by `use_accelerated_search`.
    #[must_use]
    pub const fn strategy(&self) -> SearchStrategy {
        if self.use_accelerated_search {
            SearchStrategy::Integral
        } else {
            SearchStrategy::Exhaustive
        }
    }
}

impl Default for BinarizerParams {
    fn default() -> Self {
        Self {
            window_radius: Self::DEFAULT_WINDOW_RADIUS,
            epsilon: Self::DEFAULT_EPSILON,
            morph_kernel_size: Self::DEFAULT_MORPH_KERNEL_SIZE,
            noise_reduction: Self::DEFAULT_NOISE_REDUCTION,
            use_accelerated_search: Self::DEFAULT_USE_ACCELERATED_SEARCH,
            region_count: Self::DEFAULT_REGION_COUNT,
        }
    }
}

/// Adaptive document binarizer.
///
/// Parameters sit behind a lock so a caller holding a shared handle can
/// edit them while the pipeline owns the transformation; every apply
/// copies them once on entry.
#[derive(Debug, Default)]
pub struct TwoDOtsuBinarizer {
    params: RwLock<BinarizerParams>,
    last_thresholds: Mutex<Vec<ThresholdPair>>,
}

impl TwoDOtsuBinarizer {
    /// Display name used in errors and logs.
    pub const NAME: &'static str = "TwoDOtsuBinarizer";

    /// Create a binarizer with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a binarizer with the given parameters, clamped into range.
    #[must_use]
    pub fn with_params(params: BinarizerParams) -> Self {
        Self {
            params: RwLock::new(params.clamped()),
            last_thresholds: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the current parameters.
    #[must_use]
    pub fn snapshot(&self) -> BinarizerParams {
        *self.params.read()
    }

    /// Replace all parameters at once, clamping them into range.
    pub fn set_params(&self, params: BinarizerParams) {
        *self.params.write() = params.clamped();
    }

    /// Threshold pairs chosen by the most recent full-resolution apply,
    /// one per region in row-major tile order. Regions without a valid
    /// split are omitted.
    #[must_use]
    pub fn last_thresholds(&self) -> Vec<ThresholdPair> {
        self.last_thresholds.lock().clone()
    }
}

impl Transform for TwoDOtsuBinarizer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, input: &Raster) -> Result<Raster, PipelineError> {
        if input.is_empty() {
            return Err(PipelineError::InvalidInput(
                "cannot binarize an empty image".to_string(),
            ));
        }
        let params = self.snapshot();
        let gray = input.to_gray();
        let (binary, pairs) = binarize(&gray, &params)?;
        for pair in &pairs {
            debug!(
                s = pair.intensity,
                t = pair.guidance,
                score = pair.score,
                "2D Otsu threshold pair"
            );
        }
        *self.last_thresholds.lock() = pairs;
        Ok(Raster::Gray(binary))
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn apply_preview(&self, input: &Raster, preview: &PreviewConfig) -> Result<Raster, PipelineError> {
        if input.is_empty() {
            return Err(PipelineError::InvalidInput(
                "cannot binarize an empty image".to_string(),
            ));
        }
        let params = self.snapshot();
        let gray = input.to_gray();
        let (w, h) = gray.dimensions();
        let pw = (f64::from(w) * preview.downscale).round() as u32;
        let ph = (f64::from(h) * preview.downscale).round() as u32;

        if preview.downscale >= 1.0 || pw.min(ph) < preview.min_side.max(1) {
            let (binary, _) = binarize(&gray, &params)?;
            return Ok(Raster::Gray(binary));
        }

        let small = image::imageops::resize(&gray, pw, ph, FilterType::Triangle);
        let (binary, _) = binarize(&small, &params)?;
        // Nearest keeps the upsampled result strictly two-level.
        Ok(Raster::Gray(image::imageops::resize(
            &binary,
            w,
            h,
            FilterType::Nearest,
        )))
    }

    fn params(&self) -> ParamMap {
        let p = self.snapshot();
        ParamMap::from([
            ("window_radius", ParamValue::from(p.window_radius)),
            ("epsilon", ParamValue::from(p.epsilon)),
            ("morph_kernel_size", ParamValue::from(p.morph_kernel_size)),
            ("noise_reduction", ParamValue::from(p.noise_reduction)),
            (
                "use_accelerated_search",
                ParamValue::from(p.use_accelerated_search),
            ),
            ("region_count", ParamValue::from(p.region_count)),
        ])
    }

    fn set_param(&self, key: &str, value: ParamValue) -> bool {
        let mut p = self.params.write();
        let accepted = match key {
            "window_radius" => int_in_range(value, 1, i64::from(BinarizerParams::MAX_WINDOW_RADIUS))
                .map(|v| p.window_radius = v),
            "epsilon" => float_where(value, |e| {
                (BinarizerParams::MIN_EPSILON..=BinarizerParams::MAX_EPSILON).contains(&e)
            })
            .map(|v| p.epsilon = v),
            "morph_kernel_size" => int_in_range(value, 0, i64::from(BinarizerParams::MAX_MORPH_KERNEL_SIZE))
                .map(|v| p.morph_kernel_size = v),
            "noise_reduction" => value.as_bool().map(|v| p.noise_reduction = v),
            "use_accelerated_search" => value.as_bool().map(|v| p.use_accelerated_search = v),
            "region_count" => int_in_range(value, 1, i64::from(BinarizerParams::MAX_REGION_COUNT))
                .map(|v| p.region_count = v),
            _ => {
                debug!(key, "ignoring unknown binarizer parameter");
                return false;
            }
        };
        if accepted.is_none() {
            warn!(key, %value, "rejected out-of-range binarizer parameter");
        }
        accepted.is_some()
    }
}

/// Binarize a grayscale image, tiling it when `region_count > 1`.
///
/// Returns the two-level image and the threshold pair chosen for each
/// tile that had a valid split. Out-of-range parameters are clamped
/// first (see [`BinarizerParams::clamped`]).
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the image is empty.
pub fn binarize(
    gray: &GrayImage,
    params: &BinarizerParams,
) -> Result<(GrayImage, Vec<ThresholdPair>), PipelineError> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(PipelineError::InvalidInput(
            "cannot binarize an empty image".to_string(),
        ));
    }
    let params = &params.clamped();

    let n = params.region_count.max(1).min(w).min(h);
    if n == 1 {
        let (binary, pair) = binarize_region(gray, params)?;
        return Ok((binary, pair.into_iter().collect()));
    }

    let xs = tile_edges(w, n);
    let ys = tile_edges(h, n);
    let mut out = GrayImage::new(w, h);
    let mut pairs = Vec::new();
    for rows in ys.windows(2) {
        for cols in xs.windows(2) {
            let (x0, y0) = (cols[0], rows[0]);
            let (tw, th) = (cols[1] - x0, rows[1] - y0);
            let tile = image::imageops::crop_imm(gray, x0, y0, tw, th).to_image();
            let (binary, pair) = binarize_region(&tile, params)?;
            for (x, y, p) in binary.enumerate_pixels() {
                out.put_pixel(x0 + x, y0 + y, *p);
            }
            pairs.extend(pair);
        }
    }
    debug!(regions = n * n, "stitched regional binarization");
    Ok((out, pairs))
}

/// Tile boundaries splitting `len` into `n` nearly equal parts.
fn tile_edges(len: u32, n: u32) -> Vec<u32> {
    (0..=n)
        .map(|k| {
            // u64 keeps `k * len` from overflowing for large images.
            let edge = u64::from(k) * u64::from(len) / u64::from(n);
            u32::try_from(edge).unwrap_or(len)
        })
        .collect()
}

fn binarize_region(
    gray: &GrayImage,
    params: &BinarizerParams,
) -> Result<(GrayImage, Option<ThresholdPair>), PipelineError> {
    let intensity = if params.noise_reduction {
        denoise(gray)
    } else {
        gray.clone()
    };

    let guidance = crate::guided::guidance_image(&intensity, params.window_radius, params.epsilon);

    let Some(hist) = JointHistogram::from_images(&intensity, &guidance) else {
        error!(
            intensity = ?intensity.dimensions(),
            guidance = ?guidance.dimensions(),
            "joint histogram could not be built"
        );
        return Err(PipelineError::InvalidInput(
            "intensity and guidance images disagree in size".to_string(),
        ));
    };

    let pair = crate::threshold::search(&hist, params.strategy());
    if pair.is_none() {
        debug!("no valid threshold pair, falling back to a fixed split");
    }

    let classified = classify(&intensity, &guidance, pair.as_ref());
    Ok((morph_cleanup(&classified, params.morph_kernel_size), pair))
}

/// Salt-and-pepper reduction for scanned historical documents.
fn denoise(gray: &GrayImage) -> GrayImage {
    let smoothed = crate::filter::bilateral(gray, 2, 25.0, 2.0);
    crate::filter::median(&smoothed, 1)
}

/// Assign every pixel to ink or paper using the winning pair.
fn classify(intensity: &GrayImage, guidance: &GrayImage, pair: Option<&ThresholdPair>) -> GrayImage {
    let Some(pair) = pair else {
        return GrayImage::from_fn(intensity.width(), intensity.height(), |x, y| {
            if intensity.get_pixel(x, y).0[0] >= FALLBACK_LEVEL {
                image::Luma([PAPER])
            } else {
                image::Luma([INK])
            }
        });
    };

    let (s, t) = (pair.intensity, pair.guidance);
    GrayImage::from_fn(intensity.width(), intensity.height(), |x, y| {
        let i = intensity.get_pixel(x, y).0[0];
        let g = guidance.get_pixel(x, y).0[0];
        let value = match (i <= s, g <= t) {
            (true, true) => INK,
            (false, false) => PAPER,
            _ => nearest_class(i, g, pair),
        };
        image::Luma([value])
    })
}

/// Resolve a transition-quadrant pixel by distance to the class centres.
/// Ties go to paper.
fn nearest_class(i: u8, g: u8, pair: &ThresholdPair) -> u8 {
    let dist = |(ci, cg): (f64, f64)| {
        let di = f64::from(i) - ci;
        let dg = f64::from(g) - cg;
        di.mul_add(di, dg * dg)
    };
    if dist(pair.foreground_center) < dist(pair.background_center) {
        INK
    } else {
        PAPER
    }
}

/// Close then open with a square structuring element.
#[allow(clippy::cast_possible_truncation)]
fn morph_cleanup(binary: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 {
        return binary.clone();
    }
    // LInf distance k covers a (2k + 1) square.
    let k = (kernel_size / 2).min(u32::from(u8::MAX)) as u8;
    let closed = imageproc::morphology::close(binary, Norm::LInf, k);
    imageproc::morphology::open(&closed, Norm::LInf, k)
}
