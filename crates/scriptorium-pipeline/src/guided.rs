//! Self-guided filter producing the second decision channel for 2D Otsu.
//!
//! Fits, for every window of radius `r`, the linear model
//! `q = a * I + b` that best reproduces the intensity image `I` under a
//! ridge penalty `epsilon` on `a`:
//!
//! ```text
//! a = var(I) / (var(I) + epsilon)
//! b = mean(I) - a * mean(I)
//! q = mean(a) * I + mean(b)
//! ```
//!
//! In flat regions `var << epsilon`, so `a -> 0` and `q` collapses to
//! the local mean; across strong edges `a -> 1` and `q` follows `I`.
//! The result is an edge-aware local average whose disagreement with
//! `I` marks noise and low-contrast texture.

use image::GrayImage;

use crate::integral::box_mean;

/// Compute the guidance image for `intensity`.
///
/// `epsilon` is expressed in normalized intensity units (`I` in
/// `[0, 1]`), so `0.01` corresponds to a standard deviation of roughly
/// 25 gray levels.
#[must_use = "returns the guidance image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn guidance_image(intensity: &GrayImage, radius: u32, epsilon: f64) -> GrayImage {
    let (w, h) = intensity.dimensions();
    let (width, height) = (w as usize, h as usize);
    let radius = radius as usize;

    let i: Vec<f64> = intensity
        .as_raw()
        .iter()
        .map(|&v| f64::from(v) / 255.0)
        .collect();
    let ii: Vec<f64> = i.iter().map(|v| v * v).collect();

    let mean_i = box_mean(&i, width, height, radius);
    let corr_i = box_mean(&ii, width, height, radius);

    let mut a = Vec::with_capacity(i.len());
    let mut b = Vec::with_capacity(i.len());
    for (&m, &c) in mean_i.iter().zip(&corr_i) {
        // Clamp tiny negative variances from cancellation.
        let var = (m.mul_add(-m, c)).max(0.0);
        let denom = var + epsilon;
        let ak = if denom > 0.0 { var / denom } else { 0.0 };
        a.push(ak);
        b.push(ak.mul_add(-m, m));
    }

    let mean_a = box_mean(&a, width, height, radius);
    let mean_b = box_mean(&b, width, height, radius);

    let q: Vec<u8> = i
        .iter()
        .zip(mean_a.iter().zip(&mean_b))
        .map(|(&iv, (&ma, &mb))| (ma.mul_add(iv, mb) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    // Length always matches width * height.
    GrayImage::from_raw(w, h, q).unwrap_or_else(|| GrayImage::new(w, h))
}
