//! Shared DSP and decoding helpers.

pub mod biquad;
pub mod decoder;
pub mod sample;

// -------------------------------------------------------------------------------------------------

/// Constant power panning factors for the given panning value in range `-1..=1`.
/// Returns `(left, right)` factors, which are `sqrt(0.5)` each for center panning.
pub fn panning_factors(panning: f32) -> (f32, f32) {
    let angle = (panning.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Convert a pitch offset in semitones to a playback rate factor.
pub fn semitones_to_rate(semitones: f32) -> f64 {
    2.0_f64.powf(semitones as f64 / 12.0)
}

/// Per sample step factor for an exponential approach with the given time constant in seconds.
/// A value of 1 means: jump to the target immediately.
pub fn time_constant_to_coefficient(time_constant: f32, sample_rate: u32) -> f32 {
    if time_constant > 0.0 && sample_rate > 0 {
        1.0 - (-1.0 / (time_constant * sample_rate as f32)).exp()
    } else {
        1.0
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panning() {
        let (l, r) = panning_factors(0.0);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-6);
        let (l, r) = panning_factors(-1.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
        let (l, r) = panning_factors(1.0);
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rates() {
        assert_eq!(semitones_to_rate(0.0), 1.0);
        assert!((semitones_to_rate(12.0) - 2.0).abs() < 1e-9);
        assert!((semitones_to_rate(-12.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn coefficients() {
        assert_eq!(time_constant_to_coefficient(0.0, 44100), 1.0);
        let coefficient = time_constant_to_coefficient(0.01, 44100);
        assert!(coefficient > 0.0 && coefficient < 0.01);
        // after one time constant, 1 - 1/e of the distance is covered
        let mut value = 0.0;
        for _ in 0..441 {
            value += (1.0 - value) * coefficient;
        }
        assert!((value - (1.0 - (-1.0f32).exp())).abs() < 0.01);
    }
}
