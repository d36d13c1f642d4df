use std::str::FromStr;

use four_cc::FourCC;

use super::{Parameter, ParameterType, ParameterValueUpdate};

// -------------------------------------------------------------------------------------------------

/// An enum parameter descriptor. Values are the string representations of the enum's variants.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumParameter {
    id: FourCC,
    name: &'static str,
    values: &'static [&'static str],
    default_index: usize,
}

impl EnumParameter {
    pub const fn new(
        id: FourCC,
        name: &'static str,
        values: &'static [&'static str],
        default_index: usize,
    ) -> Self {
        assert!(!values.is_empty(), "Need at least one enum value");
        assert!(default_index < values.len(), "Invalid default index");
        Self {
            id,
            name,
            values,
            default_index,
        }
    }

    /// The parameter's identifier.
    pub const fn id(&self) -> FourCC {
        self.id
    }

    pub fn values(&self) -> &'static [&'static str] {
        self.values
    }

    pub fn default_value(&self) -> &'static str {
        self.values[self.default_index]
    }

    /// Create a raw value update for this parameter.
    #[must_use]
    pub fn value_update<T: ToString>(&self, value: T) -> (FourCC, ParameterValueUpdate) {
        (self.id, ParameterValueUpdate::raw(value.to_string()))
    }

    pub fn normalize_value(&self, value: &str) -> f32 {
        if self.values.len() < 2 {
            return 0.0;
        }
        if let Some(index) = self.values.iter().position(|v| *v == value) {
            return index as f32 / (self.values.len() - 1) as f32;
        }
        0.0
    }

    pub fn denormalize_value(&self, normalized: f32) -> &'static str {
        let normalized = normalized.clamp(0.0, 1.0);
        let index = (normalized * (self.values.len() - 1) as f32).round() as usize;
        self.values[index]
    }

    /// Applies a parameter update to the given enum value.
    pub fn apply_update<T: FromStr + Clone + 'static>(
        &self,
        value: &mut T,
        update: &ParameterValueUpdate,
    ) {
        match update {
            ParameterValueUpdate::Raw(raw) => {
                if let Some(raw) = raw.downcast_ref::<T>() {
                    *value = raw.clone();
                } else if let Some(raw) = raw
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| raw.downcast_ref::<&'static str>().copied())
                {
                    match T::from_str(raw) {
                        Ok(parsed) => *value = parsed,
                        Err(_) => log::warn!(
                            "Invalid string value '{raw}' for enum parameter '{}'",
                            self.id
                        ),
                    }
                } else {
                    log::warn!("Invalid value type for enum parameter '{}'", self.id);
                }
            }
            ParameterValueUpdate::Normalized(normalized) => {
                if let Ok(parsed) = T::from_str(self.denormalize_value(*normalized)) {
                    *value = parsed;
                }
            }
        }
    }
}

impl Parameter for EnumParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parameter_type(&self) -> ParameterType {
        ParameterType::Enum {
            values: self.values,
            default_index: self.default_index,
        }
    }

    fn normalized_value_to_string(&self, normalized: f32, _include_unit: bool) -> String {
        self.denormalize_value(normalized).to_string()
    }

    fn string_to_normalized_value(&self, string: &str) -> Option<f32> {
        let string = string.trim();
        self.values
            .iter()
            .any(|v| v.eq_ignore_ascii_case(string))
            .then(|| {
                let index = self
                    .values
                    .iter()
                    .position(|v| v.eq_ignore_ascii_case(string))
                    .unwrap_or(self.default_index);
                self.normalize_value(self.values[index])
            })
    }
}

// -------------------------------------------------------------------------------------------------
