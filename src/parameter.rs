//! Engine setting descriptors and value updates.

use std::{any::Any, fmt::Debug, sync::Arc};

use four_cc::FourCC;

// -------------------------------------------------------------------------------------------------

/// Describes the type of a [`Parameter`] to e.g. select a proper visual representation in a UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterType {
    /// A continuous floating-point value.
    Float {
        range: std::ops::RangeInclusive<f32>,
        default: f32,
    },
    /// A choice from a list of strings (an enum).
    Enum {
        values: &'static [&'static str],
        default_index: usize,
    },
}

// -------------------------------------------------------------------------------------------------

/// Describes a single setting of a grain engine for use in UIs or for automation.
pub trait Parameter: Debug {
    /// The unique id of the parameter.
    fn id(&self) -> FourCC;

    /// The name of the parameter.
    fn name(&self) -> &'static str;

    /// The parameter type.
    fn parameter_type(&self) -> ParameterType;

    /// Convert the given normalized floating point value to a string value.
    fn normalized_value_to_string(&self, normalized: f32, include_unit: bool) -> String;

    /// Convert the given string value to a normalized floating point value.
    /// Returns `None` when conversion failed, else a valid normalized value.
    fn string_to_normalized_value(&self, string: &str) -> Option<f32>;
}

// -------------------------------------------------------------------------------------------------

/// An update for a [`Parameter`]'s value.
#[derive(Debug, Clone)]
pub enum ParameterValueUpdate {
    /// Raw, type-erased internal value (f32, f64, some Enum or its string representation).
    Raw(Arc<dyn Any + Send + Sync>),
    /// A float value in range `0.0..=1.0`.
    Normalized(f32),
}

impl ParameterValueUpdate {
    /// Create a raw update from the given plain value.
    pub fn raw<T: Any + Send + Sync>(value: T) -> Self {
        Self::Raw(Arc::new(value))
    }
}

impl From<f32> for ParameterValueUpdate {
    fn from(value: f32) -> Self {
        Self::raw(value)
    }
}

// -------------------------------------------------------------------------------------------------

mod float;
pub use float::FloatParameter;

mod r#enum;
pub use r#enum::EnumParameter;
