use std::time::Duration;

// -------------------------------------------------------------------------------------------------

/// A fully decoded, planar sample buffer. Shared read-only between grain engines and output
/// implementations once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSample {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedSample {
    /// Create a new sample from planar channel data. All channels must have the same length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        debug_assert!(
            channels.windows(2).all(|w| w[0].len() == w[1].len()),
            "All channels must have the same length"
        );
        Self {
            sample_rate,
            channels,
        }
    }

    /// Create a new mono sample.
    pub fn from_mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    /// Sample rate of the sample data.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Sample data of a single channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Total duration of the sample.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    /// Total duration of the sample in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Read a mono downmix of the sample at the given fractional frame position, using linear
    /// interpolation. Positions wrap around at the sample's boundaries.
    pub fn mono_sample_at(&self, frame_position: f64) -> f32 {
        let frame_count = self.frame_count();
        if frame_count == 0 {
            return 0.0;
        }
        let position = frame_position.rem_euclid(frame_count as f64);
        let index = (position as usize).min(frame_count - 1);
        let next_index = if index + 1 < frame_count { index + 1 } else { 0 };
        let fraction = (position - index as f64) as f32;

        let mut sum = 0.0;
        for channel in &self.channels {
            let current = channel[index];
            let next = channel[next_index];
            sum += current + (next - current) * fraction;
        }
        sum / self.channels.len() as f32
    }
}

// -------------------------------------------------------------------------------------------------
