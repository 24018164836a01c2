//! The pipeline engine: one original image, an ordered chain of stages,
//! and the two images derived from them.
//!
//! Every change (new original, added or removed stage, explicit
//! reprocess) replays the whole chain from a fresh copy of the original,
//! once with [`Transform::apply`] into `processed` and once with
//! [`Transform::apply_preview`] into `preview`. There is no incremental
//! patching, so reordering, removal and parameter edits are always
//! reflected exactly.
//!
//! # Locking
//!
//! All state sits behind one `RwLock`. Mutations hold the write lock for
//! the whole replay; accessors hold the read lock only long enough to
//! clone a buffer, so readers never observe a half-replayed chain.
//!
//! A second lock, the preview gate, serializes everything that produces
//! a preview. [`Pipeline::reprocess_preview`] computes under a read lock
//! and only takes the write lock to swap the result in, discarding it if
//! a mutation landed in the meantime. Lock order is always gate, then
//! state.
//!
//! ```rust
//! # use std::sync::Arc;
//! # use scriptorium_pipeline::{Pipeline, PipelineError, Raster, Transformation, TwoDOtsuBinarizer};
//! # fn run(page: Raster) -> Result<(), PipelineError> {
//! let pipeline = Pipeline::default();
//! pipeline.set_original(&page)?;
//!
//! let binarizer = Arc::new(Transformation::from(TwoDOtsuBinarizer::new()));
//! pipeline.add_transformation(Arc::clone(&binarizer))?;
//!
//! let binary = pipeline.processed()?;
//! let report = pipeline.quality()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::metrics::QualityReport;
use crate::transform::{Transform, Transformation};
use crate::types::{PipelineConfig, PipelineError, PreviewConfig, Raster};

/// Image buffers owned by a loaded pipeline.
#[derive(Debug)]
struct Images {
    original: Raster,
    processed: Raster,
    /// `None` when the last preview replay failed; readers then get the
    /// original instead.
    preview: Option<Raster>,
}

#[derive(Debug, Default)]
struct State {
    images: Option<Images>,
    chain: Vec<Arc<Transformation>>,
    /// Bumped on every mutation, so a preview computed outside the
    /// write lock can tell whether it is still current.
    generation: u64,
}

/// Thread-safe document processing pipeline.
///
/// All methods take `&self`; share it across threads with an `Arc`.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    state: RwLock<State>,
    preview_gate: Mutex<()>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::with_valid_config(PipelineConfig::default())
    }
}

impl Pipeline {
    /// Create an empty pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: PipelineConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::default()),
            preview_gate: Mutex::new(()),
        }
    }

    /// The configuration this pipeline was built with.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load a new original image and replay the current chain on it.
    ///
    /// Any previously loaded images are released first. If the replay
    /// fails the pipeline is left with no image loaded; the chain itself
    /// is kept.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if the image is empty or
    /// larger than `config.max_dimension` on either side, and
    /// [`PipelineError::TransformationFailed`] if the full-resolution
    /// replay fails.
    pub fn set_original(&self, image: &Raster) -> Result<(), PipelineError> {
        image.validate(self.config.max_dimension)?;

        let _gate = self.preview_gate.lock();
        let mut state = self.state.write();
        state.images = None;
        state.generation += 1;

        let original = image.clone();
        let processed = replay_full(&original, &state.chain)?;
        let preview = replay_preview_logged(&original, &state.chain, &self.config.preview);
        info!(
            width = original.width(),
            height = original.height(),
            channels = original.channels(),
            stages = state.chain.len(),
            "loaded original image"
        );
        state.images = Some(Images {
            original,
            processed,
            preview,
        });
        Ok(())
    }

    /// Release all image buffers. The chain is kept.
    pub fn unload(&self) {
        let _gate = self.preview_gate.lock();
        let mut state = self.state.write();
        state.images = None;
        state.generation += 1;
        debug!("released pipeline images");
    }

    /// Whether an original image is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.read().images.is_some()
    }

    /// Append a stage and replay both chains.
    ///
    /// If the full-resolution replay fails the stage is removed again
    /// and the previous images are kept. A failing preview replay is
    /// logged and does not fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImageLoaded`] if no original is set,
    /// and [`PipelineError::TransformationFailed`] if the replay fails.
    pub fn add_transformation(&self, stage: Arc<Transformation>) -> Result<(), PipelineError> {
        let _gate = self.preview_gate.lock();
        let mut state = self.state.write();
        let State { images, chain, .. } = &mut *state;
        let Some(images) = images.as_mut() else {
            return Err(PipelineError::NoImageLoaded);
        };

        let name = stage.name();
        chain.push(stage);
        match replay_full(&images.original, chain) {
            Ok(processed) => images.processed = processed,
            Err(e) => {
                chain.pop();
                warn!(stage = name, error = %e, "rolled back transformation");
                return Err(e);
            }
        }
        images.preview = replay_preview_logged(&images.original, chain, &self.config.preview);
        state.generation += 1;
        info!(stage = name, stages = state.chain.len(), "added transformation");
        Ok(())
    }

    /// Remove and return the stage at `index`, replaying both chains if
    /// an image is loaded.
    ///
    /// If the shortened chain fails to replay, the stage is put back and
    /// the previous images are kept.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSuchTransformation`] for an
    /// out-of-range index and [`PipelineError::TransformationFailed`] if
    /// the replay fails.
    pub fn remove_transformation(&self, index: usize) -> Result<Arc<Transformation>, PipelineError> {
        let _gate = self.preview_gate.lock();
        let mut state = self.state.write();
        let len = state.chain.len();
        if index >= len {
            return Err(PipelineError::NoSuchTransformation { index, len });
        }

        let State { images, chain, .. } = &mut *state;
        let removed = chain.remove(index);
        if let Some(images) = images.as_mut() {
            match replay_full(&images.original, chain) {
                Ok(processed) => images.processed = processed,
                Err(e) => {
                    chain.insert(index, removed);
                    warn!(index, error = %e, "restored transformation after failed replay");
                    return Err(e);
                }
            }
            images.preview = replay_preview_logged(&images.original, chain, &self.config.preview);
        }
        state.generation += 1;
        info!(stage = removed.name(), index, stages = state.chain.len(), "removed transformation");
        Ok(removed)
    }

    /// Remove every stage. Derived images revert to the original.
    pub fn clear_transformations(&self) {
        let _gate = self.preview_gate.lock();
        let mut state = self.state.write();
        let cleared = state.chain.len();
        state.chain.clear();
        if let Some(images) = state.images.as_mut() {
            images.processed = images.original.clone();
            images.preview = Some(images.original.clone());
        }
        state.generation += 1;
        info!(cleared, "cleared transformations");
    }

    /// Replay the full-resolution chain with the stages' current
    /// parameters.
    ///
    /// On failure the previous `processed` image is kept.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImageLoaded`] if no original is set,
    /// and [`PipelineError::TransformationFailed`] if the replay fails.
    pub fn reprocess(&self) -> Result<(), PipelineError> {
        let mut state = self.state.write();
        let State { images, chain, .. } = &mut *state;
        let images = images.as_mut().ok_or(PipelineError::NoImageLoaded)?;
        images.processed = replay_full(&images.original, chain)?;
        info!(stages = chain.len(), "reprocessed full resolution");
        Ok(())
    }

    /// Replay the preview chain with the stages' current parameters.
    ///
    /// On failure the preview is cleared, so [`preview`](Self::preview)
    /// falls back to the original.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImageLoaded`] if no original is set,
    /// and [`PipelineError::TransformationFailed`] if the replay fails.
    pub fn reprocess_preview(&self) -> Result<(), PipelineError> {
        let _gate = self.preview_gate.lock();
        let (original, chain, generation) = {
            let state = self.state.read();
            let images = state.images.as_ref().ok_or(PipelineError::NoImageLoaded)?;
            (images.original.clone(), state.chain.clone(), state.generation)
        };

        let result = replay_preview(&original, &chain, &self.config.preview);

        let mut state = self.state.write();
        if state.generation != generation {
            // A mutation replayed the preview while we were computing.
            debug!("discarding stale preview");
            return result.map(|_| ());
        }
        let Some(images) = state.images.as_mut() else {
            return Err(PipelineError::NoImageLoaded);
        };
        match result {
            Ok(preview) => {
                images.preview = Some(preview);
                debug!(stages = chain.len(), "reprocessed preview");
                Ok(())
            }
            Err(e) => {
                images.preview = None;
                warn!(error = %e, "preview replay failed");
                Err(e)
            }
        }
    }

    /// Copy of the original image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImageLoaded`] if no original is set.
    pub fn original(&self) -> Result<Raster, PipelineError> {
        let state = self.state.read();
        let images = state.images.as_ref().ok_or(PipelineError::NoImageLoaded)?;
        Ok(images.original.clone())
    }

    /// Copy of the full-resolution result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImageLoaded`] if no original is set.
    pub fn processed(&self) -> Result<Raster, PipelineError> {
        let state = self.state.read();
        let images = state.images.as_ref().ok_or(PipelineError::NoImageLoaded)?;
        Ok(images.processed.clone())
    }

    /// Copy of the preview, or of the original if the last preview
    /// replay failed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImageLoaded`] if no original is set.
    pub fn preview(&self) -> Result<Raster, PipelineError> {
        let state = self.state.read();
        let images = state.images.as_ref().ok_or(PipelineError::NoImageLoaded)?;
        Ok(images
            .preview
            .as_ref()
            .unwrap_or(&images.original)
            .clone())
    }

    /// Handles to the current stages, in chain order.
    #[must_use]
    pub fn transformations(&self) -> Vec<Arc<Transformation>> {
        self.state.read().chain.clone()
    }

    /// Number of stages in the chain.
    #[must_use]
    pub fn transformation_count(&self) -> usize {
        self.state.read().chain.len()
    }

    /// PSNR and SSIM of the processed image against the original.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoImageLoaded`] if no original is set.
    pub fn quality(&self) -> Result<QualityReport, PipelineError> {
        let state = self.state.read();
        let images = state.images.as_ref().ok_or(PipelineError::NoImageLoaded)?;
        Ok(QualityReport::compare(&images.original, &images.processed))
    }
}

fn replay_full(original: &Raster, chain: &[Arc<Transformation>]) -> Result<Raster, PipelineError> {
    replay(original, chain, "full", |stage, image| stage.apply(image))
}

fn replay_preview(
    original: &Raster,
    chain: &[Arc<Transformation>],
    preview: &PreviewConfig,
) -> Result<Raster, PipelineError> {
    replay(original, chain, "preview", |stage, image| {
        stage.apply_preview(image, preview)
    })
}

/// Preview replay for mutations, where a preview failure is not fatal.
fn replay_preview_logged(
    original: &Raster,
    chain: &[Arc<Transformation>],
    preview: &PreviewConfig,
) -> Option<Raster> {
    replay_preview(original, chain, preview)
        .inspect_err(|e| warn!(error = %e, "preview replay failed, showing original"))
        .ok()
}

/// Run `step` for every stage, starting from a copy of `original`.
fn replay<F>(
    original: &Raster,
    chain: &[Arc<Transformation>],
    path: &'static str,
    step: F,
) -> Result<Raster, PipelineError>
where
    F: Fn(&Transformation, &Raster) -> Result<Raster, PipelineError>,
{
    let started = Instant::now();
    let mut current = original.clone();
    for stage in chain {
        let stage_started = Instant::now();
        let name = stage.name();
        let next = step(stage, &current).map_err(|e| PipelineError::TransformationFailed {
            name,
            cause: e.to_string(),
        })?;
        if next.is_empty() {
            return Err(PipelineError::TransformationFailed {
                name,
                cause: "produced an empty image".to_string(),
            });
        }
        debug!(
            path,
            stage = name,
            width = next.width(),
            height = next.height(),
            elapsed_ms = stage_started.elapsed().as_secs_f64() * 1000.0,
            "stage finished"
        );
        current = next;
    }
    if !chain.is_empty() {
        info!(
            path,
            stages = chain.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "replayed chain"
        );
    }
    Ok(current)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;
    use crate::otsu2d::{INK, PAPER, TwoDOtsuBinarizer};
    use crate::scale::{Lanczos4Scaler, ScalerParams};

    fn page(w: u32, h: u32) -> Raster {
        Raster::Rgb(RgbImage::from_fn(w, h, |x, y| {
            if x % 10 < 3 && y % 7 != 0 {
                Rgb([30, 25, 20])
            } else {
                Rgb([240, 232, 220])
            }
        }))
    }

    fn scaler(factor: f64) -> Arc<Transformation> {
        Arc::new(Transformation::from(Lanczos4Scaler::with_params(
            ScalerParams {
                scale_factor: factor,
                ..ScalerParams::default()
            },
        )))
    }

    fn binarizer() -> Arc<Transformation> {
        Arc::new(Transformation::from(TwoDOtsuBinarizer::new()))
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PipelineConfig {
            max_dimension: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            Pipeline::new(config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn accessors_require_an_image() {
        let p = Pipeline::default();
        assert!(!p.is_loaded());
        assert!(matches!(p.processed(), Err(PipelineError::NoImageLoaded)));
        assert!(matches!(p.preview(), Err(PipelineError::NoImageLoaded)));
        assert!(matches!(p.original(), Err(PipelineError::NoImageLoaded)));
        assert!(matches!(p.quality(), Err(PipelineError::NoImageLoaded)));
        assert!(matches!(p.reprocess(), Err(PipelineError::NoImageLoaded)));
        assert!(matches!(
            p.reprocess_preview(),
            Err(PipelineError::NoImageLoaded)
        ));
    }

    #[test]
    fn add_requires_an_image() {
        let p = Pipeline::default();
        assert!(matches!(
            p.add_transformation(binarizer()),
            Err(PipelineError::NoImageLoaded)
        ));
        assert_eq!(p.transformation_count(), 0);
    }

    #[test]
    fn empty_chain_is_identity() {
        let p = Pipeline::default();
        let img = page(40, 30);
        p.set_original(&img).unwrap();
        assert_eq!(p.processed().unwrap(), img);
        assert_eq!(p.preview().unwrap(), img);
        assert!(p.quality().unwrap().psnr >= 99.0);
    }

    #[test]
    fn set_original_rejects_empty_and_oversized() {
        let p = Pipeline::new(PipelineConfig {
            max_dimension: 100,
            ..PipelineConfig::default()
        })
        .unwrap();
        assert!(matches!(
            p.set_original(&Raster::Gray(GrayImage::new(0, 0))),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            p.set_original(&page(101, 10)),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(!p.is_loaded());
    }

    #[test]
    fn binarizer_output_is_two_level() {
        let p = Pipeline::default();
        p.set_original(&page(120, 90)).unwrap();
        p.add_transformation(binarizer()).unwrap();
        let out = p.processed().unwrap();
        assert_eq!(out.channels(), 1);
        assert!(
            out.as_gray()
                .unwrap()
                .pixels()
                .all(|px| px.0[0] == INK || px.0[0] == PAPER)
        );
    }

    #[test]
    fn failed_add_rolls_back() {
        let p = Pipeline::default();
        let img = Raster::Gray(GrayImage::from_pixel(4, 4, Luma([200])));
        p.set_original(&img).unwrap();
        let before = p.processed().unwrap();

        let err = p.add_transformation(scaler(0.1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransformationFailed {
                name: "Lanczos4Scaler",
                ..
            }
        ));
        assert_eq!(p.transformation_count(), 0);
        assert_eq!(p.processed().unwrap(), before);
    }

    #[test]
    fn remove_out_of_range_reports_length() {
        let p = Pipeline::default();
        p.set_original(&page(20, 20)).unwrap();
        p.add_transformation(scaler(2.0)).unwrap();
        assert!(matches!(
            p.remove_transformation(3),
            Err(PipelineError::NoSuchTransformation { index: 3, len: 1 })
        ));
    }

    #[test]
    fn remove_replays_remaining_chain() {
        let p = Pipeline::default();
        let img = page(40, 30);
        p.set_original(&img).unwrap();
        p.add_transformation(scaler(2.0)).unwrap();
        assert_eq!(p.processed().unwrap().width(), 80);

        let removed = p.remove_transformation(0).unwrap();
        assert_eq!(removed.name(), "Lanczos4Scaler");
        assert_eq!(p.processed().unwrap(), img);
    }

    #[test]
    fn remove_without_image_only_edits_chain() {
        let p = Pipeline::default();
        p.set_original(&page(20, 20)).unwrap();
        p.add_transformation(binarizer()).unwrap();
        p.unload();
        assert!(p.remove_transformation(0).is_ok());
        assert_eq!(p.transformation_count(), 0);
    }

    #[test]
    fn clear_restores_original() {
        let p = Pipeline::default();
        let img = page(50, 40);
        p.set_original(&img).unwrap();
        p.add_transformation(binarizer()).unwrap();
        p.add_transformation(scaler(0.5)).unwrap();
        p.clear_transformations();
        assert_eq!(p.transformation_count(), 0);
        assert_eq!(p.processed().unwrap(), img);
        assert_eq!(p.preview().unwrap(), img);
    }

    #[test]
    fn new_original_replays_existing_chain() {
        let p = Pipeline::default();
        p.set_original(&page(30, 30)).unwrap();
        p.add_transformation(scaler(2.0)).unwrap();
        p.set_original(&page(10, 20)).unwrap();
        let out = p.processed().unwrap();
        assert_eq!((out.width(), out.height()), (20, 40));
    }

    #[test]
    fn failed_set_original_leaves_pipeline_unloaded() {
        let p = Pipeline::default();
        p.set_original(&page(100, 100)).unwrap();
        p.add_transformation(scaler(0.1)).unwrap();
        assert!(p.set_original(&page(4, 4)).is_err());
        assert!(!p.is_loaded());
        assert_eq!(p.transformation_count(), 1);
    }

    #[test]
    fn reprocess_picks_up_parameter_edits() {
        let p = Pipeline::default();
        p.set_original(&page(40, 40)).unwrap();
        let stage = scaler(1.0);
        p.add_transformation(Arc::clone(&stage)).unwrap();
        assert_eq!(p.processed().unwrap().width(), 40);

        assert!(stage.set_param("scale_factor", 1.5.into()));
        assert_eq!(p.processed().unwrap().width(), 40);
        p.reprocess().unwrap();
        p.reprocess_preview().unwrap();
        assert_eq!(p.processed().unwrap().width(), 60);
        assert_eq!(p.preview().unwrap().width(), 60);
    }

    #[test]
    fn preview_applies_scale_cap() {
        let p = Pipeline::default();
        p.set_original(&page(20, 10)).unwrap();
        p.add_transformation(scaler(5.0)).unwrap();
        assert_eq!(p.processed().unwrap().width(), 100);
        assert_eq!(p.preview().unwrap().width(), 60);
    }

    #[test]
    fn unload_keeps_chain() {
        let p = Pipeline::default();
        p.set_original(&page(20, 20)).unwrap();
        p.add_transformation(binarizer()).unwrap();
        p.unload();
        assert!(!p.is_loaded());
        assert_eq!(p.transformations().len(), 1);
    }
}
