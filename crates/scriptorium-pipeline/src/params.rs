//! String-keyed parameter dictionary shared by all transformations.
//!
//! Each transformation exposes its tunables as a flat map of primitive
//! values so that generic front ends (forms, CLI flags, JSON configs)
//! can read and edit them without knowing the concrete variant.
//! Setting an unknown key, a value of the wrong type, or an
//! out-of-range value is silently ignored and the prior value kept.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single primitive parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean toggle.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
}

impl ParamValue {
    /// The value as a boolean, if it is one.
    #[must_use]
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// The value as an integer. Floats are not coerced.
    #[must_use]
    pub const fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i),
            _ => None,
        }
    }

    /// The value as a float. Integers are widened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(i as f64),
            Self::Float(f) => Some(f),
            Self::Bool(_) => None,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for ParamValue {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Ordered parameter dictionary returned by
/// [`Transform::params`](crate::Transform::params).
pub type ParamMap = BTreeMap<&'static str, ParamValue>;

/// Read an integer from `value` and accept it only if it lies in
/// `min..=max`.
pub(crate) fn int_in_range(value: ParamValue, min: i64, max: i64) -> Option<u32> {
    value
        .as_int()
        .filter(|i| (min..=max).contains(i))
        .and_then(|i| u32::try_from(i).ok())
}

/// Read a finite float from `value` and accept it only if `accept`
/// returns `true`.
pub(crate) fn float_where(value: ParamValue, accept: impl Fn(f64) -> bool) -> Option<f64> {
    value.as_float().filter(|f| f.is_finite() && accept(*f))
}
