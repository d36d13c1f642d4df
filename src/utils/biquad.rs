use std::f64;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Band-pass coefficients of a [`BiquadFilter`].
#[derive(Default, Clone, PartialEq, Debug)]
pub struct BandpassCoefficients {
    sample_rate: u32,
    cutoff: f32,
    q: f32,
    a1: f64,
    a2: f64,
    a3: f64,
}

impl BandpassCoefficients {
    pub fn new(sample_rate: u32, cutoff: f32, q: f32) -> Result<Self, Error> {
        let mut coefficients = Self::default();
        coefficients.set(sample_rate, cutoff, q)?;
        Ok(coefficients)
    }

    /// The band's center frequency in Hz.
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// The band's Q factor.
    pub fn q(&self) -> f32 {
        self.q
    }

    /// Set new filter parameters. Cutoff frequencies above nyquist are clamped.
    pub fn set(&mut self, sample_rate: u32, cutoff: f32, q: f32) -> Result<(), Error> {
        if self.sample_rate != sample_rate || self.cutoff != cutoff || self.q != q {
            self.sample_rate = sample_rate;
            self.cutoff = cutoff;
            self.q = q;
            self.apply()
        } else {
            Ok(())
        }
    }

    fn apply(&mut self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter sample-rate: must be > 0, but is {s}",
                s = self.sample_rate
            )));
        }
        if self.q <= 0.0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter Q: must be > 0, but is {q}",
                q = self.q
            )));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        let cutoff = (self.cutoff as f64).clamp(1.0, nyquist * 0.99);
        let g = f64::tan(f64::consts::PI * cutoff / self.sample_rate as f64);
        let k = 1.0 / self.q as f64;
        self.a1 = 1.0 / (1.0 + g * (g + k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

/// State variable biquad filter, designed by Andrew Simper of Cytomic.
/// See <http://cytomic.com/files/dsp/SvfLinearTrapOptimised2.pdf>
///
/// This filter is stable when modulated at high rates, so band parameters of grains can be
/// changed continuously while they are playing.
#[derive(Default, Clone, Debug)]
pub struct BiquadFilter {
    ic1eq: f64,
    ic2eq: f64,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the band-pass filter on a single sample.
    #[inline]
    pub fn process_sample(&mut self, coefficients: &BandpassCoefficients, input: f64) -> f64 {
        let v0 = input;
        let v3 = v0 - self.ic2eq;
        let v1 = coefficients.a1 * self.ic1eq + coefficients.a2 * v3;
        let v2 = self.ic2eq + coefficients.a2 * self.ic1eq + coefficients.a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        // band-pass output, normalized to unity gain at the center frequency
        v1 * (1.0 / coefficients.q as f64)
    }
}

// -------------------------------------------------------------------------------------------------
