//! Threshold based gain shaping, which gates the audibility of grains.

use four_cc::FourCC;

use crate::parameter::{FloatParameter, ParameterValueUpdate};

// -------------------------------------------------------------------------------------------------

/// Result of [`shape_gain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGain {
    /// Output gain, including the makeup gain.
    pub gain: f32,
    /// Amount of gain reduction applied by the gate: 1 = fully gated, 0 = open.
    pub reduction: f32,
}

impl ShapedGain {
    const GATED: Self = Self {
        gain: 0.0,
        reduction: 1.0,
    };
}

/// Converts a normalized input level into an output gain.
///
/// With `smoothing == 0` this is a hard gate: levels at or below `threshold` are muted, all
/// others pass with `makeup_gain` applied. With `smoothing > 0` the gate opens along a smoothstep
/// curve within a band of width `smoothing`, centered around `threshold`, so the output is
/// continuous in the input level.
///
/// Parameters are not validated: callers are expected to pass values in range `0..=1`.
pub fn shape_gain(input_level: f32, threshold: f32, smoothing: f32, makeup_gain: f32) -> ShapedGain {
    if smoothing == 0.0 {
        if input_level <= threshold {
            ShapedGain::GATED
        } else {
            ShapedGain {
                gain: input_level * makeup_gain,
                reduction: 0.0,
            }
        }
    } else {
        let lower = (threshold - smoothing / 2.0).max(0.0);
        let upper = (threshold + smoothing / 2.0).min(1.0);
        if input_level <= lower {
            ShapedGain::GATED
        } else if input_level >= upper {
            ShapedGain {
                gain: input_level * makeup_gain,
                reduction: 0.0,
            }
        } else {
            let t = (input_level - lower) / (upper - lower);
            let smoothstep = t * t * (3.0 - 2.0 * t);
            ShapedGain {
                gain: input_level * smoothstep * makeup_gain,
                reduction: 1.0 - smoothstep,
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Gain shaper settings of a grain engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainShaperParameters {
    /// Gate threshold in range `0..=1`.
    pub threshold: f32,
    /// Width of the soft transition band in range `0..=1`. 0 = hard gate.
    pub smoothing: f32,
    /// Time constant in seconds for rising parameter targets.
    pub attack: f32,
    /// Time constant in seconds for falling parameter targets.
    pub release: f32,
    /// Gain applied to open signals.
    pub makeup_gain: f32,
}

impl Default for GainShaperParameters {
    fn default() -> Self {
        Self {
            threshold: Self::THRESHOLD.default_value(),
            smoothing: Self::SMOOTHING.default_value(),
            attack: Self::ATTACK.default_value(),
            release: Self::RELEASE.default_value(),
            makeup_gain: Self::MAKEUP_GAIN.default_value(),
        }
    }
}

impl GainShaperParameters {
    pub const THRESHOLD: FloatParameter =
        FloatParameter::new(FourCC(*b"thrs"), "Threshold", 0.0..=1.0, 0.1);
    pub const SMOOTHING: FloatParameter =
        FloatParameter::new(FourCC(*b"smth"), "Smoothing", 0.0..=1.0, 0.1);
    pub const ATTACK: FloatParameter =
        FloatParameter::new(FourCC(*b"attk"), "Attack", 0.001..=2.0, 0.01).with_unit("s");
    pub const RELEASE: FloatParameter =
        FloatParameter::new(FourCC(*b"rels"), "Release", 0.001..=5.0, 0.1).with_unit("s");
    pub const MAKEUP_GAIN: FloatParameter =
        FloatParameter::new(FourCC(*b"mkup"), "Makeup Gain", 0.0..=4.0, 1.0);

    /// All parameter descriptors of the gain shaper.
    pub fn parameters() -> [&'static FloatParameter; 5] {
        [
            &Self::THRESHOLD,
            &Self::SMOOTHING,
            &Self::ATTACK,
            &Self::RELEASE,
            &Self::MAKEUP_GAIN,
        ]
    }

    /// Apply the gain shaper to the given input level.
    pub fn apply(&self, input_level: f32) -> ShapedGain {
        shape_gain(input_level, self.threshold, self.smoothing, self.makeup_gain)
    }

    /// Time constant to use when moving a parameter from `current` to `target`.
    pub fn time_constant(&self, current: f32, target: f32) -> f32 {
        if target > current {
            self.attack
        } else {
            self.release
        }
    }

    /// Apply a parameter update. Returns false when the id is not a shaper parameter.
    pub fn apply_update(&mut self, id: FourCC, update: &ParameterValueUpdate) -> bool {
        let (description, value) = match id {
            id if id == Self::THRESHOLD.id() => (&Self::THRESHOLD, &mut self.threshold),
            id if id == Self::SMOOTHING.id() => (&Self::SMOOTHING, &mut self.smoothing),
            id if id == Self::ATTACK.id() => (&Self::ATTACK, &mut self.attack),
            id if id == Self::RELEASE.id() => (&Self::RELEASE, &mut self.release),
            id if id == Self::MAKEUP_GAIN.id() => (&Self::MAKEUP_GAIN, &mut self.makeup_gain),
            _ => return false,
        };
        description.apply_update(value, update);
        true
    }
}

// -------------------------------------------------------------------------------------------------
