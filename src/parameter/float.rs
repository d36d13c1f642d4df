use std::ops::RangeInclusive;

use four_cc::FourCC;

use super::{Parameter, ParameterType, ParameterValueUpdate};

// -------------------------------------------------------------------------------------------------

/// A continuous (float) parameter descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatParameter {
    id: FourCC,
    name: &'static str,
    range: RangeInclusive<f32>,
    default: f32,
    unit: &'static str,
}

impl FloatParameter {
    /// Create a new float parameter descriptor.
    pub const fn new(
        id: FourCC,
        name: &'static str,
        range: RangeInclusive<f32>,
        default: f32,
    ) -> Self {
        assert!(
            default >= *range.start() && default <= *range.end(),
            "Invalid parameter default value"
        );
        Self {
            id,
            name,
            range,
            default,
            unit: "",
        }
    }

    /// Optional unit for string displays.
    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    /// The parameter's identifier.
    pub const fn id(&self) -> FourCC {
        self.id
    }

    /// The parameter's value range.
    pub fn range(&self) -> &RangeInclusive<f32> {
        &self.range
    }

    /// The parameter's default value.
    pub const fn default_value(&self) -> f32 {
        self.default
    }

    /// Create a raw value update for this parameter.
    #[must_use]
    pub fn value_update(&self, value: f32) -> (FourCC, ParameterValueUpdate) {
        (self.id, ParameterValueUpdate::from(value))
    }

    /// Clamp the given plain value to the parameter's range.
    pub fn clamp_value(&self, value: f32) -> f32 {
        value.clamp(*self.range.start(), *self.range.end())
    }

    /// Normalize the given plain value to a 0.0-1.0 range.
    pub fn normalize_value(&self, value: f32) -> f32 {
        (value - *self.range.start()) / (*self.range.end() - *self.range.start())
    }

    /// Denormalize a 0.0-1.0 ranged value to the corresponding plain value.
    pub fn denormalize_value(&self, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        *self.range.start() + normalized * (*self.range.end() - *self.range.start())
    }

    /// Convert the given plain value to a string.
    pub fn value_to_string(&self, value: f32, include_unit: bool) -> String {
        if include_unit && !self.unit.is_empty() {
            format!("{:.2} {}", value, self.unit)
        } else {
            format!("{:.2}", value)
        }
    }

    /// Convert the given string to a plain, clamped value.
    pub fn string_to_value(&self, string: &str) -> Option<f32> {
        let value = string
            .trim()
            .trim_end_matches(self.unit)
            .trim()
            .parse()
            .ok()?;
        Some(self.clamp_value(value))
    }

    /// Applies a parameter update to the given plain value, clamping it into the parameter's
    /// value bounds.
    pub fn apply_update(&self, value: &mut f32, update: &ParameterValueUpdate) {
        match update {
            ParameterValueUpdate::Raw(raw) => {
                if let Some(raw) = raw.downcast_ref::<f32>() {
                    *value = self.clamp_value(*raw);
                } else if let Some(raw) = raw.downcast_ref::<f64>() {
                    *value = self.clamp_value(*raw as f32);
                } else {
                    log::warn!("Invalid value type for float parameter '{}'", self.id);
                }
            }
            ParameterValueUpdate::Normalized(normalized) => {
                *value = self.denormalize_value(*normalized);
            }
        }
    }
}

impl Parameter for FloatParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Float {
            range: self.range.clone(),
            default: self.default,
        }
    }

    fn normalized_value_to_string(&self, normalized: f32, include_unit: bool) -> String {
        self.value_to_string(self.denormalize_value(normalized), include_unit)
    }

    fn string_to_normalized_value(&self, string: &str) -> Option<f32> {
        let value = self.string_to_value(string)?;
        Some(self.normalize_value(value))
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PARAM: FloatParameter =
        FloatParameter::new(FourCC(*b"test"), "Test", 1.0..=3.0, 2.0).with_unit("s");

    #[test]
    fn conversions() {
        assert_eq!(PARAM.normalize_value(2.0), 0.5);
        assert_eq!(PARAM.denormalize_value(1.0), 3.0);
        assert_eq!(PARAM.clamp_value(10.0), 3.0);
        assert_eq!(PARAM.value_to_string(1.5, true), "1.50 s");
        assert_eq!(PARAM.string_to_value("2.5 s"), Some(2.5));
        assert_eq!(PARAM.string_to_value(" 12"), Some(3.0));
        assert_eq!(PARAM.string_to_value("abc"), None);
        assert_eq!(PARAM.string_to_normalized_value("2"), Some(0.5));
    }

    #[test]
    fn updates() {
        let mut value = PARAM.default_value();
        PARAM.apply_update(&mut value, &ParameterValueUpdate::Normalized(0.0));
        assert_eq!(value, 1.0);
        PARAM.apply_update(&mut value, &ParameterValueUpdate::raw(2.5f64));
        assert_eq!(value, 2.5);
        PARAM.apply_update(&mut value, &ParameterValueUpdate::raw("nope"));
        assert_eq!(value, 2.5);
        let (id, update) = PARAM.value_update(0.0);
        assert_eq!(id, FourCC(*b"test"));
        PARAM.apply_update(&mut value, &update);
        assert_eq!(value, 1.0);
    }
}
