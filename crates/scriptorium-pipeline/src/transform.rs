//! The transformation contract and the closed set of chain stages.
//!
//! Every stage implements [`Transform`]. The pipeline stores stages as
//! [`Transformation`], a closed enum that dispatches to the concrete
//! implementation, so the chain is a plain `Vec` without trait objects.
//!
//! Stages own their parameters behind a lock and never own image data.
//! Callers keep an `Arc` to a stage to edit its parameters while it sits
//! in a pipeline, then ask the pipeline to reprocess.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::otsu2d::TwoDOtsuBinarizer;
use crate::params::{ParamMap, ParamValue};
use crate::scale::Lanczos4Scaler;
use crate::types::{PipelineError, PreviewConfig, Raster};

/// One stage of a processing chain.
///
/// Implementations snapshot their parameters once at the start of
/// `apply`/`apply_preview`, so a concurrent `set_param` never yields a
/// result computed from a mix of old and new values.
pub trait Transform {
    /// Stable display name, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Full-quality application.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the input is unusable for this
    /// stage or the parameters produce an invalid output.
    fn apply(&self, input: &Raster) -> Result<Raster, PipelineError>;

    /// Speed-optimized application for interactive preview.
    ///
    /// # Errors
    ///
    /// Same conditions as [`apply`](Self::apply).
    fn apply_preview(&self, input: &Raster, preview: &PreviewConfig) -> Result<Raster, PipelineError>;

    /// Current parameters as a key-ordered dictionary.
    fn params(&self) -> ParamMap;

    /// Set one parameter. Returns `false`, leaving the prior value in
    /// place, for unknown keys, wrong value types and out-of-range values.
    fn set_param(&self, key: &str, value: ParamValue) -> bool;
}

/// Discriminator for [`Transformation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    /// [`TwoDOtsuBinarizer`].
    TwoDOtsu,
    /// [`Lanczos4Scaler`].
    Lanczos4,
}

impl fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoDOtsu => f.write_str(TwoDOtsuBinarizer::NAME),
            Self::Lanczos4 => f.write_str(Lanczos4Scaler::NAME),
        }
    }
}

/// A chain stage.
#[derive(Debug)]
pub enum Transformation {
    /// Document binarization.
    TwoDOtsu(TwoDOtsuBinarizer),
    /// Lanczos-4 scaling.
    Lanczos4(Lanczos4Scaler),
}

impl Transformation {
    /// A stage of the given kind with default parameters.
    #[must_use]
    pub fn with_defaults(kind: TransformationKind) -> Self {
        match kind {
            TransformationKind::TwoDOtsu => Self::TwoDOtsu(TwoDOtsuBinarizer::new()),
            TransformationKind::Lanczos4 => Self::Lanczos4(Lanczos4Scaler::new()),
        }
    }

    /// Which variant this is.
    #[must_use]
    pub const fn kind(&self) -> TransformationKind {
        match self {
            Self::TwoDOtsu(_) => TransformationKind::TwoDOtsu,
            Self::Lanczos4(_) => TransformationKind::Lanczos4,
        }
    }

    /// The binarizer, if this is one.
    #[must_use]
    pub const fn as_binarizer(&self) -> Option<&TwoDOtsuBinarizer> {
        match self {
            Self::TwoDOtsu(b) => Some(b),
            Self::Lanczos4(_) => None,
        }
    }

    /// The scaler, if this is one.
    #[must_use]
    pub const fn as_scaler(&self) -> Option<&Lanczos4Scaler> {
        match self {
            Self::Lanczos4(s) => Some(s),
            Self::TwoDOtsu(_) => None,
        }
    }
}

impl Transform for Transformation {
    fn name(&self) -> &'static str {
        match self {
            Self::TwoDOtsu(t) => t.name(),
            Self::Lanczos4(t) => t.name(),
        }
    }

    fn apply(&self, input: &Raster) -> Result<Raster, PipelineError> {
        match self {
            Self::TwoDOtsu(t) => t.apply(input),
            Self::Lanczos4(t) => t.apply(input),
        }
    }

    fn apply_preview(&self, input: &Raster, preview: &PreviewConfig) -> Result<Raster, PipelineError> {
        match self {
            Self::TwoDOtsu(t) => t.apply_preview(input, preview),
            Self::Lanczos4(t) => t.apply_preview(input, preview),
        }
    }

    fn params(&self) -> ParamMap {
        match self {
            Self::TwoDOtsu(t) => t.params(),
            Self::Lanczos4(t) => t.params(),
        }
    }

    fn set_param(&self, key: &str, value: ParamValue) -> bool {
        match self {
            Self::TwoDOtsu(t) => t.set_param(key, value),
            Self::Lanczos4(t) => t.set_param(key, value),
        }
    }
}

impl From<TwoDOtsuBinarizer> for Transformation {
    fn from(value: TwoDOtsuBinarizer) -> Self {
        Self::TwoDOtsu(value)
    }
}

impl From<Lanczos4Scaler> for Transformation {
    fn from(value: Lanczos4Scaler) -> Self {
        Self::Lanczos4(value)
    }
}

/// Serializable description of one chain stage.
///
/// ```json
/// { "kind": "lanczos4", "params": { "original_dpi": 600, "target_dpi": 300 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSpec {
    /// Which stage to build.
    pub kind: TransformationKind,
    /// Parameter overrides applied on top of the defaults.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl TransformationSpec {
    /// A stage description with no parameter overrides.
    #[must_use]
    pub const fn new(kind: TransformationKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    /// Build the stage. Rejected keys and values are skipped, leaving
    /// the default in place, the same as a direct `set_param` call.
    #[must_use]
    pub fn build(&self) -> Transformation {
        let stage = Transformation::with_defaults(self.kind);
        for (key, &value) in &self.params {
            stage.set_param(key, value);
        }
        stage
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_constructor() {
        for kind in [TransformationKind::TwoDOtsu, TransformationKind::Lanczos4] {
            assert_eq!(Transformation::with_defaults(kind).kind(), kind);
        }
    }

    #[test]
    fn names_match_concrete_types() {
        let otsu = Transformation::from(TwoDOtsuBinarizer::new());
        let lanczos = Transformation::from(Lanczos4Scaler::new());
        assert_eq!(otsu.name(), "TwoDOtsuBinarizer");
        assert_eq!(lanczos.name(), "Lanczos4Scaler");
        assert_eq!(TransformationKind::Lanczos4.to_string(), lanczos.name());
    }

    #[test]
    fn accessors_select_variant() {
        let otsu = Transformation::with_defaults(TransformationKind::TwoDOtsu);
        assert!(otsu.as_binarizer().is_some());
        assert!(otsu.as_scaler().is_none());
    }

    #[test]
    fn dispatch_reaches_parameters() {
        let stage = Transformation::with_defaults(TransformationKind::TwoDOtsu);
        assert!(stage.set_param("region_count", ParamValue::Int(4)));
        assert_eq!(stage.params()["region_count"], ParamValue::Int(4));
        assert!(!stage.set_param("scale_factor", ParamValue::Float(2.0)));
    }

    #[test]
    fn description_parses_and_builds() {
        let spec: TransformationSpec = serde_json::from_str(
            r#"{ "kind": "lanczos4", "params": { "scale_factor": 0.5, "bogus": true } }"#,
        )
        .unwrap();
        let stage = spec.build();
        assert_eq!(stage.kind(), TransformationKind::Lanczos4);
        assert_eq!(stage.params()["scale_factor"], ParamValue::Float(0.5));
    }

    #[test]
    fn description_ignores_out_of_range_values() {
        let spec: TransformationSpec = serde_json::from_str(
            r#"{ "kind": "two_d_otsu", "params": { "window_radius": 500 } }"#,
        )
        .unwrap();
        let stage = spec.build();
        assert_eq!(stage.params()["window_radius"], ParamValue::Int(8));
    }

    #[test]
    fn description_params_default_to_empty() {
        let spec: TransformationSpec = serde_json::from_str(r#"{ "kind": "two_d_otsu" }"#).unwrap();
        assert_eq!(spec, TransformationSpec::new(TransformationKind::TwoDOtsu));
    }
}
