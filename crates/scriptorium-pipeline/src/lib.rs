//! scriptorium-pipeline: document image restoration (sans-IO).
//!
//! Cleans up scanned pages through a mutable chain of transformations
//! and scores the result against the original:
//!
//! - [`TwoDOtsuBinarizer`]: guided-filter + joint-histogram 2D Otsu
//!   binarization, optionally per region
//! - [`Lanczos4Scaler`]: 4-lobe Lanczos scaling with iterative area
//!   downscaling and anti-ringing filters, for DPI normalization
//! - [`metrics`]: PSNR and SSIM
//!
//! [`Pipeline`] owns the original image and replays the whole chain
//! whenever the chain changes, producing a full-resolution result and a
//! cheaper preview.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! rasters. File handling lives in `scriptorium-bench`.

pub mod filter;
pub mod guided;
pub mod histogram;
pub mod integral;
pub mod metrics;
pub mod otsu2d;
pub mod params;
pub mod pipeline;
pub mod resample;
pub mod scale;
pub mod threshold;
pub mod transform;
pub mod types;

pub use metrics::{QualityReport, psnr, ssim};
pub use otsu2d::{BinarizerParams, TwoDOtsuBinarizer};
pub use params::{ParamMap, ParamValue};
pub use pipeline::Pipeline;
pub use scale::{Lanczos4Scaler, ScalerParams};
pub use threshold::{SearchStrategy, ThresholdPair};
pub use transform::{Transform, Transformation, TransformationKind, TransformationSpec};
pub use types::{Dimensions, PipelineConfig, PipelineError, PreviewConfig, Raster};

/// Decode image bytes and run a single chain over them.
///
/// Convenience for one-shot callers that do not need the preview path
/// or later edits.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] or [`PipelineError::ImageDecode`]
/// if the bytes cannot be decoded, and any error from
/// [`Pipeline::set_original`] or [`Pipeline::add_transformation`].
pub fn process(
    image_bytes: &[u8],
    config: PipelineConfig,
    chain: &[TransformationSpec],
) -> Result<(Raster, QualityReport), PipelineError> {
    let original = Raster::decode(image_bytes)?;
    let pipeline = Pipeline::new(config)?;
    pipeline.set_original(&original)?;
    for spec in chain {
        pipeline.add_transformation(std::sync::Arc::new(spec.build()))?;
    }
    Ok((pipeline.processed()?, pipeline.quality()?))
}
