//! Shared types for the scriptorium restoration pipeline.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can build single-channel
/// inputs without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can build color inputs
/// without depending on `image` directly.
pub use image::RgbImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// An 8-bit raster with either one (gray) or three (RGB) channels.
///
/// This is the only image type that flows through the pipeline. Any
/// other pixel layout is flattened into one of the two variants on
/// the way in (see [`Raster::from_dynamic`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raster {
    /// Single-channel intensity image.
    Gray(GrayImage),
    /// Three-channel color image.
    Rgb(RgbImage),
}

impl Raster {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Gray(img) => img.width(),
            Self::Rgb(img) => img.width(),
        }
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Gray(img) => img.height(),
            Self::Rgb(img) => img.height(),
        }
    }

    /// Width and height together.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Number of channels: 1 for gray, 3 for RGB.
    #[must_use]
    pub const fn channels(&self) -> u8 {
        match self {
            Self::Gray(_) => 1,
            Self::Rgb(_) => 3,
        }
    }

    /// Returns `true` if either side is zero pixels long.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Borrow the gray buffer, if this is a gray raster.
    #[must_use]
    pub const fn as_gray(&self) -> Option<&GrayImage> {
        match self {
            Self::Gray(img) => Some(img),
            Self::Rgb(_) => None,
        }
    }

    /// Luminance view of the raster. Gray rasters are cloned as-is.
    #[must_use = "returns the converted image"]
    pub fn to_gray(&self) -> GrayImage {
        match self {
            Self::Gray(img) => img.clone(),
            Self::Rgb(img) => image::imageops::grayscale(img),
        }
    }

    /// Color view of the raster. Gray values are replicated into all
    /// three channels.
    #[must_use = "returns the converted image"]
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Self::Gray(img) => DynamicImage::ImageLuma8(img.clone()).to_rgb8(),
            Self::Rgb(img) => img.clone(),
        }
    }

    /// Flatten an arbitrary decoded image into a gray or RGB raster.
    ///
    /// Gray-like inputs (`L8`, `La8`, `L16`, `La16`) become [`Raster::Gray`];
    /// everything else is converted to 8-bit RGB with alpha dropped.
    #[must_use]
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(img) => Self::Gray(img),
            DynamicImage::ImageRgb8(img) => Self::Rgb(img),
            other @ (DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)) => Self::Gray(other.to_luma8()),
            other => Self::Rgb(other.to_rgb8()),
        }
    }

    /// Wrap an interleaved 8-bit buffer with the given channel count.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnsupportedConversion`] for channel
    /// counts other than 1 or 3, and [`PipelineError::InvalidInput`] if
    /// `bytes` is not exactly `width * height * channels` long.
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        bytes: Vec<u8>,
    ) -> Result<Self, PipelineError> {
        if channels != 1 && channels != 3 {
            return Err(PipelineError::UnsupportedConversion(format!(
                "{channels}-channel buffers have no gray or RGB layout"
            )));
        }
        let expected = u64::from(width) * u64::from(height) * u64::from(channels);
        let len = bytes.len();
        let raster = if u64::try_from(len).ok() != Some(expected) {
            None
        } else if channels == 1 {
            GrayImage::from_raw(width, height, bytes).map(Self::Gray)
        } else {
            RgbImage::from_raw(width, height, bytes).map(Self::Rgb)
        };
        raster.ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "{len} bytes do not fill a {width}x{height}x{channels} image ({expected} needed)"
            ))
        })
    }

    /// Consume the raster and wrap it in a [`DynamicImage`] for encoding.
    #[must_use]
    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Self::Gray(img) => DynamicImage::ImageLuma8(img),
            Self::Rgb(img) => DynamicImage::ImageRgb8(img),
        }
    }

    /// Decode raw image bytes (PNG, JPEG, TIFF, BMP, WebP).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
    /// Returns [`PipelineError::ImageDecode`] if the format is
    /// unrecognized or the data is corrupt.
    pub fn decode(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_dynamic(img))
    }

    /// Check the raster is non-empty and no side exceeds `max_dimension`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] describing the violation.
    pub fn validate(&self, max_dimension: u32) -> Result<(), PipelineError> {
        let Dimensions { width, height } = self.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "image is empty ({width}x{height})"
            )));
        }
        if width > max_dimension || height > max_dimension {
            return Err(PipelineError::InvalidInput(format!(
                "image {width}x{height} exceeds the {max_dimension} px per-side limit"
            )));
        }
        Ok(())
    }
}

impl From<GrayImage> for Raster {
    fn from(img: GrayImage) -> Self {
        Self::Gray(img)
    }
}

impl From<RgbImage> for Raster {
    fn from(img: RgbImage) -> Self {
        Self::Rgb(img)
    }
}

/// Preview-path settings shared by every transformation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Linear downscale applied before running a preview stage, in (0, 1].
    pub downscale: f64,
    /// Upper bound on the scale factor a scaler may use in preview.
    pub max_scale_factor: f64,
    /// Images whose shorter side would fall below this after
    /// downscaling are previewed at full resolution instead.
    pub min_side: u32,
}

impl PreviewConfig {
    /// Default preview downscale (half resolution).
    pub const DEFAULT_DOWNSCALE: f64 = 0.5;
    /// Default cap on the preview scale factor.
    pub const DEFAULT_MAX_SCALE_FACTOR: f64 = 3.0;
    /// Default minimum preview side length.
    pub const DEFAULT_MIN_SIDE: u32 = 64;
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            downscale: Self::DEFAULT_DOWNSCALE,
            max_scale_factor: Self::DEFAULT_MAX_SCALE_FACTOR,
            min_side: Self::DEFAULT_MIN_SIDE,
        }
    }
}

/// Configuration for a [`Pipeline`](crate::Pipeline).
///
/// Passed by value into [`Pipeline::new`](crate::Pipeline::new) and never
/// mutated afterwards. Transformation parameters are not part of this
/// struct; they live on each transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest accepted width or height for an original image.
    pub max_dimension: u32,
    /// Preview-path settings.
    pub preview: PreviewConfig,
}

impl PipelineConfig {
    /// Default per-side bound for loaded images.
    pub const DEFAULT_MAX_DIMENSION: u32 = 65_536;

    /// Check that every field is within its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_dimension == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_dimension must be positive".to_string(),
            ));
        }
        let downscale = self.preview.downscale;
        if !downscale.is_finite() || downscale <= 0.0 || downscale > 1.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "preview.downscale must be in (0, 1], got {downscale}"
            )));
        }
        let cap = self.preview.max_scale_factor;
        if !cap.is_finite() || cap < 1.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "preview.max_scale_factor must be at least 1, got {cap}"
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dimension: Self::DEFAULT_MAX_DIMENSION,
            preview: PreviewConfig::default(),
        }
    }
}

/// Errors that can occur while loading images or running the chain.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The image is empty, oversized, or otherwise malformed.
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The operation needs an original image and none is loaded.
    #[error("no image loaded")]
    NoImageLoaded,

    /// A transformation index was out of range.
    #[error("no transformation at index {index} (chain has {len})")]
    NoSuchTransformation {
        /// Requested index.
        index: usize,
        /// Current chain length.
        len: usize,
    },

    /// A stage in the replay chain failed or produced an empty image.
    #[error("transformation '{name}' failed: {cause}")]
    TransformationFailed {
        /// Name of the failing transformation.
        name: &'static str,
        /// Description of what went wrong.
        cause: String,
    },

    /// A buffer layout with no gray or RGB equivalent, such as a
    /// two- or four-channel raw buffer.
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn raster_reports_channels_and_dimensions() {
        let gray = Raster::from(GrayImage::new(4, 3));
        let rgb = Raster::from(RgbImage::new(5, 2));
        assert_eq!(gray.channels(), 1);
        assert_eq!(rgb.channels(), 3);
        assert_eq!(
            gray.dimensions(),
            Dimensions {
                width: 4,
                height: 3
            }
        );
        assert_eq!(rgb.width(), 5);
        assert_eq!(rgb.height(), 2);
    }

    #[test]
    fn zero_sized_raster_is_empty() {
        assert!(Raster::from(GrayImage::new(0, 7)).is_empty());
        assert!(!Raster::from(GrayImage::new(1, 1)).is_empty());
    }

    #[test]
    fn to_gray_weights_green_highest() {
        let rgb = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => image::Rgb([255, 0, 0]),
            1 => image::Rgb([0, 255, 0]),
            _ => image::Rgb([0, 0, 255]),
        });
        let gray = Raster::from(rgb).to_gray();
        let (r, g, b) = (
            gray.get_pixel(0, 0).0[0],
            gray.get_pixel(1, 0).0[0],
            gray.get_pixel(2, 0).0[0],
        );
        assert!(g > r && r > b, "expected G > R > B, got R={r} G={g} B={b}");
    }

    #[test]
    fn to_rgb_replicates_gray_value() {
        let gray = Raster::from(GrayImage::from_pixel(2, 2, image::Luma([77])));
        for p in gray.to_rgb().pixels() {
            assert_eq!(p.0, [77, 77, 77]);
        }
    }

    #[test]
    fn from_dynamic_flattens_rgba_to_rgb() {
        let rgba = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 128]));
        let raster = Raster::from_dynamic(DynamicImage::ImageRgba8(rgba));
        assert_eq!(raster.channels(), 3);
        assert_eq!(raster.to_rgb().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn from_dynamic_keeps_gray_alpha_as_gray() {
        let la = image::GrayAlphaImage::from_pixel(2, 2, image::LumaA([90, 255]));
        let raster = Raster::from_dynamic(DynamicImage::ImageLumaA8(la));
        assert_eq!(raster.channels(), 1);
        assert_eq!(raster.to_gray().get_pixel(1, 1).0[0], 90);
    }

    #[test]
    fn from_raw_wraps_gray_and_rgb_buffers() {
        let gray = Raster::from_raw(3, 2, 1, vec![7; 6]).unwrap();
        assert_eq!(gray, Raster::Gray(GrayImage::from_pixel(3, 2, image::Luma([7]))));
        let rgb = Raster::from_raw(2, 2, 3, vec![1, 2, 3].repeat(4)).unwrap();
        assert_eq!(rgb.to_rgb().get_pixel(1, 1).0, [1, 2, 3]);
    }

    #[test]
    fn from_raw_rejects_unbridgeable_channel_counts() {
        for channels in [0, 2, 4] {
            let result = Raster::from_raw(2, 2, channels, vec![0; 4 * usize::from(channels)]);
            assert!(matches!(result, Err(PipelineError::UnsupportedConversion(_))));
        }
    }

    #[test]
    fn from_raw_rejects_mismatched_length() {
        let result = Raster::from_raw(4, 4, 3, vec![0; 10]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        let result = Raster::from_raw(2, 2, 1, vec![0; 5]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn decode_empty_bytes_is_empty_input() {
        assert!(matches!(Raster::decode(&[]), Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn decode_corrupt_bytes_is_decode_error() {
        let result = Raster::decode(&[0xFF, 0x00, 0x12]);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn decode_png_round_trips_pixels() {
        let img = GrayImage::from_fn(3, 2, |x, y| image::Luma([u8::try_from(x * 40 + y).unwrap()]));
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::L8,
        )
        .unwrap();
        let raster = Raster::decode(&buf).unwrap();
        assert_eq!(raster, Raster::Gray(img));
    }

    #[test]
    fn validate_rejects_oversized_side() {
        let raster = Raster::from(GrayImage::new(20, 5));
        assert!(raster.validate(32).is_ok());
        assert!(matches!(
            raster.validate(16),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_bad_preview_downscale() {
        let config = PipelineConfig {
            preview: PreviewConfig {
                downscale: 1.5,
                ..PreviewConfig::default()
            },
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_serde_fills_missing_fields_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"max_dimension": 4096}"#).unwrap();
        assert_eq!(config.max_dimension, 4096);
        assert_eq!(config.preview, PreviewConfig::default());
    }

    #[test]
    fn transformation_failed_display() {
        let err = PipelineError::TransformationFailed {
            name: "Lanczos4Scaler",
            cause: "target too large".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "transformation 'Lanczos4Scaler' failed: target too large"
        );
    }
}
