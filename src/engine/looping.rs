use four_cc::FourCC;
use strum::VariantNames;

use super::{EngineCore, GrainRequest, PolicySettings, TickContext, TriggerMode, TriggerPolicy};
use crate::{
    output::AudioOutput,
    parameter::{EnumParameter, FloatParameter, Parameter, ParameterValueUpdate},
    particle::{Particle, ParticleId, ParticleTable},
};

// -------------------------------------------------------------------------------------------------

/// Playback direction of loop grains.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::VariantNames,
)]
pub enum LoopDirection {
    #[default]
    Forward,
    Reverse,
    /// Flips the direction with every new grain.
    Alternate,
}

// -------------------------------------------------------------------------------------------------

/// Settings of the [`LoopPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub direction: LoopDirection,
    /// Fraction of the grain duration used for crossfades with overlapping grains.
    pub crossfade: f32,
    /// Duration of loop grains in seconds.
    pub grain_duration: f32,
    /// Minimum time between grain starts of a single particle in seconds.
    pub grain_spacing: f32,
    /// Normalized velocity above which particles trigger grains. Lower values trigger more often.
    pub velocity_threshold: f32,
    /// Particle speed which maps to a normalized velocity of 1.
    pub max_speed: f32,
}

impl LoopSettings {
    pub const DIRECTION: EnumParameter = EnumParameter::new(
        FourCC(*b"ldir"),
        "Direction",
        LoopDirection::VARIANTS,
        LoopDirection::Forward as usize,
    );
    pub const CROSSFADE: FloatParameter =
        FloatParameter::new(FourCC(*b"xfad"), "Crossfade", 0.0..=1.0, 0.5);
    pub const GRAIN_DURATION: FloatParameter =
        FloatParameter::new(FourCC(*b"gdur"), "Grain Duration", 0.01..=2.0, 0.25).with_unit("s");
    pub const GRAIN_SPACING: FloatParameter =
        FloatParameter::new(FourCC(*b"gspc"), "Grain Spacing", 0.005..=2.0, 0.1).with_unit("s");
    pub const VELOCITY_THRESHOLD: FloatParameter =
        FloatParameter::new(FourCC(*b"vthr"), "Velocity Threshold", 0.0..=1.0, 0.1);
    pub const MAX_SPEED: FloatParameter =
        FloatParameter::new(FourCC(*b"vmax"), "Max Speed", 0.01..=100.0, 5.0);
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            direction: LoopDirection::default(),
            crossfade: Self::CROSSFADE.default_value(),
            grain_duration: Self::GRAIN_DURATION.default_value(),
            grain_spacing: Self::GRAIN_SPACING.default_value(),
            velocity_threshold: Self::VELOCITY_THRESHOLD.default_value(),
            max_speed: Self::MAX_SPEED.default_value(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Continuously scheduling trigger policy: moving particles play overlapping, crossfading grains
/// from the sample position their x coordinate points to.
///
/// Grain starts of a single particle are spaced by at least the grain spacing. Particles which
/// stop moving lose their scheduling record, so they start fresh when moving again.
#[derive(Debug, Default)]
pub struct LoopPolicy {
    settings: LoopSettings,
    last_starts: ParticleTable<f64>,
    reverse_next: bool,
}

impl LoopPolicy {
    pub fn new(settings: LoopSettings) -> Self {
        Self {
            settings,
            last_starts: ParticleTable::new(),
            reverse_next: false,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Start time of the most recent grain of the given particle, if it's scheduling grains.
    pub fn last_start(&self, particle: ParticleId) -> Option<f64> {
        self.last_starts.get(particle).copied()
    }

    /// Particle speed, normalized to `0..=1`.
    pub fn normalized_velocity(&self, particle: &Particle) -> f32 {
        if self.settings.max_speed > 0.0 {
            (particle.speed() / self.settings.max_speed).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn next_direction_reversed(&mut self) -> bool {
        match self.settings.direction {
            LoopDirection::Forward => false,
            LoopDirection::Reverse => true,
            LoopDirection::Alternate => self.reverse_next,
        }
    }
}

impl TriggerPolicy for LoopPolicy {
    const MODE: TriggerMode = TriggerMode::Loop;

    fn should_trigger(&self, particle: &Particle) -> bool {
        self.normalized_velocity(particle) > self.settings.velocity_threshold
    }

    fn input_level(&self, particle: &Particle) -> f32 {
        self.normalized_velocity(particle)
    }

    fn trigger(
        &mut self,
        core: &mut EngineCore,
        particle: &Particle,
        gain: f32,
        context: &TickContext,
        output: &mut dyn AudioOutput,
    ) {
        let spacing = self.settings.grain_spacing as f64;
        if self
            .last_starts
            .get(particle.id)
            .is_some_and(|last_start| context.now - last_start < spacing)
        {
            return;
        }
        if gain <= 0.0 {
            return;
        }
        let Some(buffer_duration) = core.buffer().map(|b| b.duration_secs()) else {
            return;
        };
        let duration = self.settings.grain_duration as f64;
        let fade = duration * self.settings.crossfade as f64 * 0.5;
        let request = GrainRequest {
            gain,
            duration,
            offset: context.bounds.normalized_x(particle.x) as f64 * buffer_duration,
            reverse: self.next_direction_reversed(),
            fade_in: fade,
            fade_out: fade,
        };
        if core
            .create_grain(particle, request, context, output)
            .is_some()
        {
            self.last_starts.insert(particle.id, context.now);
            if self.settings.direction == LoopDirection::Alternate {
                self.reverse_next = !self.reverse_next;
            }
        }
    }

    fn on_idle(&mut self, particle: ParticleId) {
        self.last_starts.remove(particle);
    }

    fn on_tick(&mut self, core: &EngineCore) {
        // vanished particles
        self.last_starts.retain(|id, _| core.is_present(id));
    }

    fn clear(&mut self) {
        self.last_starts.clear();
        self.reverse_next = false;
    }

    fn settings(&self) -> PolicySettings {
        PolicySettings::Loop(self.settings.clone())
    }

    fn parameters(&self) -> Vec<&'static dyn Parameter> {
        vec![
            &LoopSettings::DIRECTION,
            &LoopSettings::CROSSFADE,
            &LoopSettings::GRAIN_DURATION,
            &LoopSettings::GRAIN_SPACING,
            &LoopSettings::VELOCITY_THRESHOLD,
            &LoopSettings::MAX_SPEED,
        ]
    }

    fn apply_update(&mut self, id: FourCC, update: &ParameterValueUpdate) -> bool {
        if id == LoopSettings::DIRECTION.id() {
            LoopSettings::DIRECTION.apply_update(&mut self.settings.direction, update);
            return true;
        }
        let (description, value) = match id {
            id if id == LoopSettings::CROSSFADE.id() => {
                (&LoopSettings::CROSSFADE, &mut self.settings.crossfade)
            }
            id if id == LoopSettings::GRAIN_DURATION.id() => (
                &LoopSettings::GRAIN_DURATION,
                &mut self.settings.grain_duration,
            ),
            id if id == LoopSettings::GRAIN_SPACING.id() => (
                &LoopSettings::GRAIN_SPACING,
                &mut self.settings.grain_spacing,
            ),
            id if id == LoopSettings::VELOCITY_THRESHOLD.id() => (
                &LoopSettings::VELOCITY_THRESHOLD,
                &mut self.settings.velocity_threshold,
            ),
            id if id == LoopSettings::MAX_SPEED.id() => {
                (&LoopSettings::MAX_SPEED, &mut self.settings.max_speed)
            }
            _ => return false,
        };
        description.apply_update(value, update);
        true
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use crossbeam_channel::Sender;
    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;
    use crate::{
        engine::{pool::GrainId, GrainEngine, GrainShaping},
        mapping::FrequencyRange,
        output::{
            testing::{Call, RecordingOutput},
            Completion, NodeParam, ParamRamp,
        },
        particle::SpaceBounds,
        utils::sample::DecodedSample,
    };

    fn engine(settings: LoopSettings) -> GrainEngine<LoopPolicy> {
        let mut engine = GrainEngine::new(
            LoopPolicy::new(settings),
            64,
            FrequencyRange::default(),
            SmallRng::seed_from_u64(3),
        );
        engine.set_buffer(Some(Arc::new(DecodedSample::from_mono(
            1000,
            vec![0.0; 2000],
        ))));
        engine
    }

    fn context<'a>(
        particles: &'a [Particle],
        now: f64,
        completions: &'a Sender<Completion>,
    ) -> TickContext<'a> {
        TickContext {
            particles,
            species: 0,
            bounds: SpaceBounds::new(100.0, 100.0),
            shaping: GrainShaping::default(),
            bus: 0,
            now,
            completions,
        }
    }

    #[test]
    fn velocity_threshold() {
        let mut policy = LoopPolicy::default();
        let particle = Particle::new(0, 0, 0.0, 0.0).with_velocity(0.6, 0.8);
        assert!((policy.normalized_velocity(&particle) - 0.2).abs() < 1e-6);
        assert!(policy.should_trigger(&particle));
        // higher thresholds need faster particles
        policy.apply_update(
            LoopSettings::VELOCITY_THRESHOLD.id(),
            &ParameterValueUpdate::raw(0.3f32),
        );
        assert!(!policy.should_trigger(&particle));
        let fast = Particle::new(0, 0, 0.0, 0.0).with_velocity(100.0, 0.0);
        assert_eq!(policy.normalized_velocity(&fast), 1.0);
        assert!(policy.should_trigger(&fast));
    }

    #[test]
    fn grain_spacing() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(LoopSettings::default());
        let particles = [
            Particle::new(0, 0, 10.0, 50.0).with_velocity(2.0, 0.0),
            Particle::new(1, 0, 90.0, 50.0).with_velocity(0.0, 3.0),
        ];
        let mut starts = HashMap::<GrainId, (ParticleId, f64)>::new();
        for tick in 0..40 {
            engine.update(&context(&particles, tick as f64 * 0.03, &sender), &mut output);
            for grain in engine.core().pool().iter() {
                starts.insert(grain.id, (grain.particle, grain.start));
            }
        }
        for particle in [0, 1] {
            let mut particle_starts = starts
                .values()
                .filter(|(p, _)| *p == particle)
                .map(|(_, start)| *start)
                .collect::<Vec<_>>();
            particle_starts.sort_by(f64::total_cmp);
            assert!(particle_starts.len() > 5);
            for pair in particle_starts.windows(2) {
                assert!(pair[1] - pair[0] >= 0.1);
            }
        }
    }

    #[test]
    fn records_are_dropped() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(LoopSettings::default());
        let moving = [Particle::new(0, 0, 10.0, 50.0).with_velocity(2.0, 0.0)];
        let resting = [Particle::new(0, 0, 10.0, 50.0)];

        engine.update(&context(&moving, 0.0, &sender), &mut output);
        assert_eq!(engine.policy().last_start(0), Some(0.0));
        engine.update(&context(&moving, 0.01, &sender), &mut output);
        assert_eq!(output.sources().len(), 1);

        // stopping forgets the spacing
        engine.update(&context(&resting, 0.02, &sender), &mut output);
        assert_eq!(engine.policy().last_start(0), None);
        engine.update(&context(&moving, 0.03, &sender), &mut output);
        assert_eq!(output.sources().len(), 2);

        // as does vanishing
        engine.update(&context(&[], 0.04, &sender), &mut output);
        assert_eq!(engine.policy().last_start(0), None);
        engine.update(&context(&moving, 0.05, &sender), &mut output);
        assert_eq!(output.sources().len(), 3);
    }

    #[test]
    fn offset_and_crossfade() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(LoopSettings::default());
        let particles = [Particle::new(0, 0, 25.0, 50.0).with_velocity(2.0, 0.0)];
        engine.update(&context(&particles, 0.0, &sender), &mut output);

        match output.sources()[0] {
            Call::CreateSource {
                offset,
                duration,
                playback_rate,
                ..
            } => {
                assert!((offset - 0.5).abs() < 1e-6);
                assert!((duration - 0.25).abs() < 1e-6);
                assert!((playback_rate - 1.0).abs() < 1e-9);
            }
            call => panic!("Unexpected call: {call:?}"),
        }
        let grain = engine.core().pool().iter().next().unwrap().clone();
        // fade time = duration * crossfade * 0.5
        match output.ramps(grain.nodes.gain, NodeParam::Gain)[1] {
            ParamRamp::Linear { end, .. } => assert!((end - 0.0625).abs() < 1e-6),
            ramp => panic!("Unexpected fade in ramp: {ramp:?}"),
        }
    }

    #[test]
    fn alternating_direction() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(LoopSettings {
            direction: LoopDirection::Alternate,
            ..LoopSettings::default()
        });
        let particles = [Particle::new(0, 0, 10.0, 50.0).with_velocity(2.0, 0.0)];
        for tick in 0..4 {
            engine.update(&context(&particles, tick as f64 * 0.2, &sender), &mut output);
        }
        let rates = output
            .sources()
            .iter()
            .map(|call| match call {
                Call::CreateSource { playback_rate, .. } => *playback_rate,
                _ => unreachable!(),
            })
            .collect::<Vec<_>>();
        assert_eq!(rates.len(), 4);
        assert!(rates[0] > 0.0 && rates[1] < 0.0 && rates[2] > 0.0 && rates[3] < 0.0);

        // direction updates by name
        engine.apply_update(
            LoopSettings::DIRECTION.id(),
            &ParameterValueUpdate::raw("Reverse"),
            &mut output,
        );
        assert_eq!(engine.policy().settings().direction, LoopDirection::Reverse);
    }

    #[test]
    fn direction_names() {
        use strum::IntoEnumIterator;

        let names = LoopDirection::iter()
            .map(|direction| direction.to_string())
            .collect::<Vec<_>>();
        assert_eq!(LoopSettings::DIRECTION.values(), names.as_slice());
        assert_eq!(
            LoopSettings::DIRECTION.default_value(),
            LoopDirection::default().to_string()
        );
    }
}
