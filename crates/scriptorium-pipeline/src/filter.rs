//! Smoothing filters used before and after the heavy transformations.
//!
//! All three wrap `imageproc` with guards for the degenerate parameters
//! its functions panic on. [`bilateral`] is the edge-preserving pass used
//! for scan noise reduction and for suppressing Lanczos ringing.

use image::GrayImage;
use imageproc::filter::bilateral::GaussianEuclideanColorDistance;

/// Apply Gaussian blur to a grayscale image.
///
/// Non-positive sigma values return the image unchanged, since
/// `imageproc`'s underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 || !sigma.is_finite() {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Median filter over a `(2 * radius + 1)` square window.
#[must_use = "returns the filtered image"]
pub fn median(image: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return image.clone();
    }
    imageproc::filter::median_filter(image, radius, radius)
}

/// Edge-preserving bilateral smoothing over a `(2 * radius + 1)` square
/// window. `sigma_space` is in pixels and `sigma_color` in intensity
/// levels. Radii above 255 are capped.
#[must_use = "returns the filtered image"]
pub fn bilateral(image: &GrayImage, radius: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    if radius == 0 || sigma_color <= 0.0 || sigma_space <= 0.0 {
        return image.clone();
    }
    // imageproc asserts on empty images.
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let radius = u8::try_from(radius).unwrap_or(u8::MAX);

    imageproc::filter::bilateral_filter(
        image,
        radius,
        sigma_space,
        GaussianEuclideanColorDistance::new(sigma_color),
    )
}
