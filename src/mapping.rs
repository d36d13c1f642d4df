//! Deterministic mapping of simulation space quantities to grain audio parameters.

use four_cc::FourCC;

use crate::{
    parameter::{FloatParameter, ParameterValueUpdate},
    particle::{Particle, SpaceBounds},
};

// -------------------------------------------------------------------------------------------------

/// Particle size range which maps to the filter Q range.
const SIZE_RANGE: (f32, f32) = (2.0, 10.0);
/// Filter Q range: smallest particles get the narrowest bands.
const Q_RANGE: (f32, f32) = (1.0, 12.0);

// -------------------------------------------------------------------------------------------------

/// Band-pass frequency bounds in Hz, which particle y positions are mapped to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRange {
    pub low: f32,
    pub high: f32,
}

impl FrequencyRange {
    pub const LOW: FloatParameter =
        FloatParameter::new(FourCC(*b"frlo"), "Low Frequency", 20.0..=2000.0, 80.0)
            .with_unit("Hz");
    pub const HIGH: FloatParameter =
        FloatParameter::new(FourCC(*b"frhi"), "High Frequency", 200.0..=20000.0, 8000.0)
            .with_unit("Hz");

    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    /// Logarithmic interpolation from `high` at `y = 0` (top) to `low` at `y = height` (bottom).
    pub fn frequency(&self, y: f32, bounds: &SpaceBounds) -> f32 {
        let log_low = self.low.max(f32::MIN_POSITIVE).ln();
        let log_high = self.high.max(f32::MIN_POSITIVE).ln();
        let position = 1.0 - bounds.normalized_y(y);
        (log_low + position * (log_high - log_low)).exp()
    }

    /// Apply a parameter update. Returns false when the id is not a frequency range parameter.
    pub fn apply_update(&mut self, id: FourCC, update: &ParameterValueUpdate) -> bool {
        if id == Self::LOW.id() {
            Self::LOW.apply_update(&mut self.low, update);
            true
        } else if id == Self::HIGH.id() {
            Self::HIGH.apply_update(&mut self.high, update);
            true
        } else {
            false
        }
    }
}

impl Default for FrequencyRange {
    fn default() -> Self {
        Self::new(Self::LOW.default_value(), Self::HIGH.default_value())
    }
}

// -------------------------------------------------------------------------------------------------

/// Band-pass filter Q for the given particle size: sizes are clamped to `2..=10` and linearly
/// inverted to Q `12..=1`.
pub fn filter_q(size: f32) -> f32 {
    let (min_size, max_size) = SIZE_RANGE;
    let (min_q, max_q) = Q_RANGE;
    let size = size.clamp(min_size, max_size);
    let t = (size - min_size) / (max_size - min_size);
    max_q - t * (max_q - min_q)
}

/// Stereo panning in range `-1..=1` for the given x position.
pub fn panning(x: f32, bounds: &SpaceBounds) -> f32 {
    if bounds.width > 0.0 {
        (x / bounds.width * 2.0 - 1.0).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

// -------------------------------------------------------------------------------------------------

/// Audio parameter targets of a grain, derived from its particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainTargets {
    /// Band-pass center frequency in Hz.
    pub frequency: f32,
    /// Band-pass Q.
    pub q: f32,
    /// Stereo panning.
    pub pan: f32,
}

impl GrainTargets {
    pub fn from_particle(
        particle: &Particle,
        bounds: &SpaceBounds,
        frequency_range: &FrequencyRange,
    ) -> Self {
        Self {
            frequency: frequency_range.frequency(particle.y, bounds),
            q: filter_q(particle.size),
            pan: panning(particle.x, bounds),
        }
    }
}

// -------------------------------------------------------------------------------------------------
