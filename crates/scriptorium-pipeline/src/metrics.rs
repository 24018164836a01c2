//! Full-reference image fidelity metrics.
//!
//! Both metrics compare two rasters of identical dimensions. When the
//! channel counts differ the grayscale side is promoted to RGB first.
//! Dimension mismatches are not errors: the metric is undefined and
//! reported as `0.0`.

use serde::{Deserialize, Serialize};

use crate::types::Raster;

/// Peak signal value for 8-bit samples.
const MAX_VALUE: f64 = 255.0;

/// PSNR reported for identical (or numerically identical) images.
pub const PSNR_CAP: f64 = 100.0;

/// MSE below which two images are considered identical.
const MSE_EPSILON: f64 = 1e-10;

/// Side of the SSIM Gaussian window.
pub const SSIM_WINDOW: usize = 11;

/// Standard deviation of the SSIM Gaussian window.
pub const SSIM_SIGMA: f64 = 1.5;

const C1: f64 = (0.01 * MAX_VALUE) * (0.01 * MAX_VALUE);
const C2: f64 = (0.03 * MAX_VALUE) * (0.03 * MAX_VALUE);

/// PSNR and SSIM of one image against a reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Peak signal-to-noise ratio in dB, capped at [`PSNR_CAP`].
    pub psnr: f64,
    /// Structural similarity index.
    pub ssim: f64,
}

impl QualityReport {
    /// Compute both metrics for `test` against `reference`.
    #[must_use]
    pub fn compare(reference: &Raster, test: &Raster) -> Self {
        Self {
            psnr: psnr(reference, test),
            ssim: ssim(reference, test),
        }
    }
}

/// Peak signal-to-noise ratio in dB.
///
/// Returns [`PSNR_CAP`] for identical images and `0.0` when the
/// dimensions differ or either image is empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn psnr(a: &Raster, b: &Raster) -> f64 {
    let Some((pa, pb)) = reconcile(a, b) else {
        return 0.0;
    };
    let sum_sq: u64 = pa
        .iter()
        .zip(&pb)
        .map(|(&x, &y)| {
            let d = u64::from(x.abs_diff(y));
            d * d
        })
        .sum();
    let mse = sum_sq as f64 / pa.len() as f64;
    if mse < MSE_EPSILON {
        return PSNR_CAP;
    }
    let db = 20.0f64.mul_add(MAX_VALUE.log10(), -10.0 * mse.log10());
    db.min(PSNR_CAP)
}

/// Mean structural similarity over 11x11 Gaussian windows.
///
/// Each channel is scored separately and the channel scores averaged;
/// the result is clamped to `[0, 1]`. Images smaller than the window
/// fall back to a single global-statistics comparison clamped to
/// `[-1, 1]`. Returns `0.0` when the dimensions differ or either image
/// is empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ssim(a: &Raster, b: &Raster) -> f64 {
    let Some((pa, pb)) = reconcile(a, b) else {
        return 0.0;
    };
    let (w, h) = (a.width() as usize, a.height() as usize);
    let channels = pa.len() / (w * h);

    if w < SSIM_WINDOW || h < SSIM_WINDOW {
        let total: f64 = (0..channels)
            .map(|c| global_ssim(&channel(&pa, channels, c), &channel(&pb, channels, c)))
            .sum();
        return (total / channels as f64).clamp(-1.0, 1.0);
    }

    let window = gaussian_window();
    let total: f64 = (0..channels)
        .map(|c| {
            windowed_ssim(
                &channel(&pa, channels, c),
                &channel(&pb, channels, c),
                w,
                h,
                &window,
            )
        })
        .sum();
    (total / channels as f64).clamp(0.0, 1.0)
}

/// Interleaved samples of both images with matching channel layout, or
/// `None` if the metric is undefined for this pair.
fn reconcile(a: &Raster, b: &Raster) -> Option<(Vec<u8>, Vec<u8>)> {
    if a.is_empty() || b.is_empty() || a.dimensions() != b.dimensions() {
        return None;
    }
    match (a, b) {
        (Raster::Gray(x), Raster::Gray(y)) => Some((x.as_raw().clone(), y.as_raw().clone())),
        _ => Some((a.to_rgb().into_raw(), b.to_rgb().into_raw())),
    }
}

fn channel(samples: &[u8], channels: usize, index: usize) -> Vec<f64> {
    samples
        .iter()
        .skip(index)
        .step_by(channels)
        .map(|&v| f64::from(v))
        .collect()
}

/// Normalized 1D Gaussian taps; the 2D window is their outer product.
#[allow(clippy::cast_precision_loss)]
fn gaussian_window() -> Vec<f64> {
    let half = (SSIM_WINDOW / 2) as f64;
    let taps: Vec<f64> = (0..SSIM_WINDOW)
        .map(|k| {
            let d = k as f64 - half;
            (-(d * d) / (2.0 * SSIM_SIGMA * SSIM_SIGMA)).exp()
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|t| t / sum).collect()
}

/// Separable "valid" convolution: only windows fully inside the image.
fn filter_valid(plane: &[f64], w: usize, h: usize, taps: &[f64]) -> Vec<f64> {
    let n = taps.len();
    let ow = w + 1 - n;
    let oh = h + 1 - n;

    let mut rows = vec![0.0; ow * h];
    for y in 0..h {
        let src = &plane[y * w..(y + 1) * w];
        for x in 0..ow {
            rows[y * ow + x] = taps.iter().zip(&src[x..x + n]).map(|(t, v)| t * v).sum();
        }
    }

    let mut out = vec![0.0; ow * oh];
    for y in 0..oh {
        for x in 0..ow {
            out[y * ow + x] = taps
                .iter()
                .enumerate()
                .map(|(k, t)| t * rows[(y + k) * ow + x])
                .sum();
        }
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn windowed_ssim(x: &[f64], y: &[f64], w: usize, h: usize, taps: &[f64]) -> f64 {
    let xx: Vec<f64> = x.iter().map(|v| v * v).collect();
    let yy: Vec<f64> = y.iter().map(|v| v * v).collect();
    let xy: Vec<f64> = x.iter().zip(y).map(|(a, b)| a * b).collect();

    let mu_x = filter_valid(x, w, h, taps);
    let mu_y = filter_valid(y, w, h, taps);
    let e_xx = filter_valid(&xx, w, h, taps);
    let e_yy = filter_valid(&yy, w, h, taps);
    let e_xy = filter_valid(&xy, w, h, taps);

    let total: f64 = (0..mu_x.len())
        .map(|i| {
            let (mx, my) = (mu_x[i], mu_y[i]);
            let var_x = mx.mul_add(-mx, e_xx[i]);
            let var_y = my.mul_add(-my, e_yy[i]);
            let cov = mx.mul_add(-my, e_xy[i]);
            ssim_term(mx, my, var_x, var_y, cov)
        })
        .sum();
    total / mu_x.len() as f64
}

#[allow(clippy::cast_precision_loss)]
fn global_ssim(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut var_x, mut var_y, mut cov) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        var_x += dx * dx;
        var_y += dy * dy;
        cov += dx * dy;
    }
    ssim_term(mx, my, var_x / n, var_y / n, cov / n)
}

fn ssim_term(mx: f64, my: f64, var_x: f64, var_y: f64, cov: f64) -> f64 {
    let luminance = (2.0 * mx).mul_add(my, C1) / mx.mul_add(mx, my.mul_add(my, C1));
    let structure = 2.0f64.mul_add(cov, C2) / (var_x + var_y + C2);
    luminance * structure
}
