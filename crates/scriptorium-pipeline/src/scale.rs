//! High-quality scaling with a 4-lobe Lanczos kernel.
//!
//! Intended for DPI normalization of scanned pages ahead of
//! binarization, so the output is always single-channel.
//!
//! # Steps
//!
//! 1. Validate the scale factor and the resulting target size
//! 2. Convert to single-channel intensity
//! 3. Size-adaptive Gaussian pre-filter (skipped for small images)
//! 4. Resize: iterative area halving then one Lanczos-4 pass for large
//!    reductions, otherwise a single Lanczos-4 pass
//! 5. Bilateral post-filter to damp residual ringing

use image::GrayImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::params::{ParamMap, ParamValue, float_where};
use crate::resample::{Kernel, resample};
use crate::transform::Transform;
use crate::types::{PipelineError, PreviewConfig, Raster};

/// Smallest accepted scale factor.
pub const MIN_SCALE_FACTOR: f64 = 0.1;
/// Largest accepted scale factor.
pub const MAX_SCALE_FACTOR: f64 = 10.0;
/// Hard ceiling on either output side, in pixels.
pub const MAX_TARGET_SIDE: u32 = 32_768;
/// Largest accepted DPI value.
pub const MAX_DPI: f64 = 9_600.0;

/// Images whose shorter side is below this skip the pre- and post-filters.
const SMALL_IMAGE_SIDE: u32 = 64;

/// Factors below this (downscaling by more than 2x) take the iterative
/// path when it is enabled.
const ITERATIVE_THRESHOLD: f64 = 0.5;

/// Per-step reduction used by iterative downscaling.
const ITERATIVE_STEP: f64 = 0.5;

/// Tunable parameters for [`Lanczos4Scaler`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerParams {
    /// Explicit scale factor, used unless both DPI values are set.
    pub scale_factor: f64,
    /// Desired output resolution in DPI; 0 means unset.
    pub target_dpi: f64,
    /// Resolution the source was scanned at; 0 means unset.
    pub original_dpi: f64,
    /// Halve repeatedly before the final Lanczos pass on large reductions.
    pub use_iterative_downscale: bool,
}

impl ScalerParams {
    /// Default explicit scale factor.
    pub const DEFAULT_SCALE_FACTOR: f64 = 1.0;
    /// Default target DPI (unset).
    pub const DEFAULT_TARGET_DPI: f64 = 0.0;
    /// Default original DPI (unset).
    pub const DEFAULT_ORIGINAL_DPI: f64 = 0.0;
    /// Default for iterative downscaling.
    pub const DEFAULT_USE_ITERATIVE_DOWNSCALE: bool = true;

    /// The scale factor actually applied.
    ///
    /// `target_dpi / original_dpi` when both are set and the ratio lies
    /// in the accepted range, otherwise `scale_factor` unchanged.
    #[must_use]
    pub fn effective_scale(&self) -> f64 {
        if self.target_dpi > 0.0 && self.original_dpi > 0.0 {
            let ratio = self.target_dpi / self.original_dpi;
            if ratio.is_finite() && (MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&ratio) {
                return ratio;
            }
        }
        self.scale_factor
    }
}

impl Default for ScalerParams {
    fn default() -> Self {
        Self {
            scale_factor: Self::DEFAULT_SCALE_FACTOR,
            target_dpi: Self::DEFAULT_TARGET_DPI,
            original_dpi: Self::DEFAULT_ORIGINAL_DPI,
            use_iterative_downscale: Self::DEFAULT_USE_ITERATIVE_DOWNSCALE,
        }
    }
}

/// Lanczos-4 scaler with anti-ringing pre/post filtering.
#[derive(Debug, Default)]
pub struct Lanczos4Scaler {
    params: RwLock<ScalerParams>,
}

impl Lanczos4Scaler {
    /// Display name used in errors and logs.
    pub const NAME: &'static str = "Lanczos4Scaler";

    /// Create a scaler with default parameters (identity scale).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scaler with the given parameters.
    #[must_use]
    pub fn with_params(params: ScalerParams) -> Self {
        Self {
            params: RwLock::new(params),
        }
    }

    /// Create a scaler that converts between two resolutions.
    #[must_use]
    pub fn for_dpi(original_dpi: f64, target_dpi: f64) -> Self {
        Self::with_params(ScalerParams {
            original_dpi,
            target_dpi,
            ..ScalerParams::default()
        })
    }

    /// Copy of the current parameters.
    #[must_use]
    pub fn snapshot(&self) -> ScalerParams {
        *self.params.read()
    }

    /// Replace all parameters at once.
    pub fn set_params(&self, params: ScalerParams) {
        *self.params.write() = params;
    }
}

impl Transform for Lanczos4Scaler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, input: &Raster) -> Result<Raster, PipelineError> {
        let params = self.snapshot();
        scale(input, params.effective_scale(), params.use_iterative_downscale).map(Raster::Gray)
    }

    fn apply_preview(&self, input: &Raster, preview: &PreviewConfig) -> Result<Raster, PipelineError> {
        let params = self.snapshot();
        let factor = params.effective_scale();
        let capped = factor.min(preview.max_scale_factor);
        if capped < factor {
            debug!(factor, capped, "capping preview scale factor");
        }
        scale(input, capped, params.use_iterative_downscale).map(Raster::Gray)
    }

    fn params(&self) -> ParamMap {
        let p = self.snapshot();
        ParamMap::from([
            ("scale_factor", ParamValue::from(p.scale_factor)),
            ("target_dpi", ParamValue::from(p.target_dpi)),
            ("original_dpi", ParamValue::from(p.original_dpi)),
            (
                "use_iterative_downscale",
                ParamValue::from(p.use_iterative_downscale),
            ),
        ])
    }

    fn set_param(&self, key: &str, value: ParamValue) -> bool {
        let valid_dpi = |d: f64| (0.0..=MAX_DPI).contains(&d);
        let mut p = self.params.write();
        let accepted = match key {
            "scale_factor" => float_where(value, |f| {
                (MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&f)
            })
            .map(|v| p.scale_factor = v),
            "target_dpi" => float_where(value, valid_dpi).map(|v| p.target_dpi = v),
            "original_dpi" => float_where(value, valid_dpi).map(|v| p.original_dpi = v),
            "use_iterative_downscale" => value.as_bool().map(|v| p.use_iterative_downscale = v),
            _ => {
                debug!(key, "ignoring unknown scaler parameter");
                return false;
            }
        };
        if accepted.is_none() {
            warn!(key, %value, "rejected out-of-range scaler parameter");
        }
        accepted.is_some()
    }
}

/// Target size for scaling `(w, h)` by `factor`, validated.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the factor is not finite
/// or outside `[0.1, 10]`, or if either target side rounds to zero or
/// exceeds [`MAX_TARGET_SIDE`].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn target_size(w: u32, h: u32, factor: f64) -> Result<(u32, u32), PipelineError> {
    if !factor.is_finite() || !(MIN_SCALE_FACTOR..=MAX_SCALE_FACTOR).contains(&factor) {
        return Err(PipelineError::InvalidInput(format!(
            "scale factor {factor} outside [{MIN_SCALE_FACTOR}, {MAX_SCALE_FACTOR}]"
        )));
    }
    let tw = (f64::from(w) * factor).round();
    let th = (f64::from(h) * factor).round();
    if tw < 1.0 || th < 1.0 {
        return Err(PipelineError::InvalidInput(format!(
            "scaling {w}x{h} by {factor} leaves no pixels"
        )));
    }
    if tw > f64::from(MAX_TARGET_SIDE) || th > f64::from(MAX_TARGET_SIDE) {
        return Err(PipelineError::InvalidInput(format!(
            "scaling {w}x{h} by {factor} exceeds the {MAX_TARGET_SIDE} px limit"
        )));
    }
    Ok((tw as u32, th as u32))
}

/// Scale `input` by `factor` and return a single-channel result.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] for an empty input or an
/// invalid factor / target size (see [`target_size`]).
pub fn scale(input: &Raster, factor: f64, iterative: bool) -> Result<GrayImage, PipelineError> {
    if input.is_empty() {
        return Err(PipelineError::InvalidInput(
            "cannot scale an empty image".to_string(),
        ));
    }
    let (w, h) = (input.width(), input.height());
    let (tw, th) = target_size(w, h, factor)?;

    let gray = input.to_gray();
    let filtered = if w.min(h) >= SMALL_IMAGE_SIDE {
        let sigma = prefilter_sigma(w.max(h));
        crate::filter::gaussian_blur(&gray, sigma)
    } else {
        gray
    };

    let resized = if takes_iterative_path(iterative, factor) {
        downscale_iteratively(&filtered, tw, th)
    } else {
        debug!(from = ?(w, h), to = ?(tw, th), "direct Lanczos-4 resize");
        resample(&filtered, tw, th, Kernel::Lanczos4)
    };

    if tw.min(th) < SMALL_IMAGE_SIDE {
        return Ok(resized);
    }
    let (radius, sigma_color, sigma_space) = postfilter_strength(tw.max(th));
    Ok(crate::filter::bilateral(
        &resized,
        radius,
        sigma_color,
        sigma_space,
    ))
}

const fn takes_iterative_path(iterative: bool, factor: f64) -> bool {
    iterative && factor < ITERATIVE_THRESHOLD
}

/// Halve with area averaging until within 2x of the target, then finish
/// with one Lanczos-4 pass to the exact size.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn downscale_iteratively(image: &GrayImage, tw: u32, th: u32) -> GrayImage {
    let mut current = image.clone();
    let mut steps = 0u32;
    while current.width() > tw.saturating_mul(2) || current.height() > th.saturating_mul(2) {
        let nw = ((f64::from(current.width()) * ITERATIVE_STEP).round() as u32).max(tw);
        let nh = ((f64::from(current.height()) * ITERATIVE_STEP).round() as u32).max(th);
        current = resample(&current, nw, nh, Kernel::Area);
        steps += 1;
    }
    debug!(steps, to = ?(tw, th), "iterative downscale finished with Lanczos-4");
    resample(&current, tw, th, Kernel::Lanczos4)
}

/// Gaussian sigma for the pre-filter, growing with the longer side.
///
/// Kernel sizes of 3, 5 and 7 map to sigma via
/// `0.3 * ((k - 1) / 2 - 1) + 0.8`.
fn prefilter_sigma(long_side: u32) -> f32 {
    let k: u16 = match long_side {
        0..1000 => 3,
        1000..3000 => 5,
        _ => 7,
    };
    0.3f32.mul_add(f32::from(k - 1) / 2.0 - 1.0, 0.8)
}

/// `(radius, sigma_color, sigma_space)` for the bilateral post-filter.
///
/// The spatial sigma is half the window diameter.
fn postfilter_strength(long_side: u32) -> (u32, f32, f32) {
    let radius: u16 = if long_side > 1500 { 2 } else { 1 };
    let diameter = f32::from(2 * radius + 1);
    (u32::from(radius), 20.0, diameter / 2.0)
}
