//! Grain engines: the gain shaper and grain pool shared by all trigger policies, and the
//! policies which decide when grains get created.

use std::sync::Arc;

use crossbeam_channel::Sender;
use four_cc::FourCC;
use rand::{rngs::SmallRng, Rng};

use crate::{
    mapping::{FrequencyRange, GrainTargets},
    output::{
        AudioOutput, Completion, CompletionNotifier, LivenessToken, NodeId, NodeParam, ParamRamp,
        SourceOptions,
    },
    parameter::{FloatParameter, Parameter, ParameterValueUpdate},
    particle::{Particle, ParticleId, ParticleTable, SpaceBounds},
    shaper::{GainShaperParameters, ShapedGain},
    utils::{sample::DecodedSample, semitones_to_rate},
};

// -------------------------------------------------------------------------------------------------

pub mod collision;
pub mod looping;
pub mod pool;

use collision::CollisionSettings;
use looping::LoopSettings;
use pool::{Grain, GrainId, GrainNodes, GrainPool};

// -------------------------------------------------------------------------------------------------

/// Fade out duration of force stopped grains in seconds.
const FORCE_STOP_FADE: f64 = 0.01;
/// Time constant of the force stop gain ramp.
const FORCE_STOP_TIME_CONSTANT: f32 = 0.002;

// -------------------------------------------------------------------------------------------------

/// Selects whether grains get created on discrete collision events or scheduled continuously
/// while particles move.
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
)]
pub enum TriggerMode {
    #[default]
    Collision,
    Loop,
}

// -------------------------------------------------------------------------------------------------

/// Voice wide grain playback shaping, applied by all engines to newly created grains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainShaping {
    /// Pitch offset in semitones.
    pub pitch_offset: f32,
    /// Range of the random pitch detune in semitones: grains get detuned within `±range`.
    pub detune_range: f32,
    /// Fade in/out length of collision grains in seconds.
    pub fade_length: f32,
}

impl GrainShaping {
    pub const PITCH_OFFSET: FloatParameter =
        FloatParameter::new(FourCC(*b"ptch"), "Pitch", -24.0..=24.0, 0.0).with_unit("st");
    pub const DETUNE_RANGE: FloatParameter =
        FloatParameter::new(FourCC(*b"detn"), "Detune", 0.0..=12.0, 0.0).with_unit("st");
    pub const FADE_LENGTH: FloatParameter =
        FloatParameter::new(FourCC(*b"fade"), "Fade Length", 0.0..=1.0, 0.02).with_unit("s");
}

impl Default for GrainShaping {
    fn default() -> Self {
        Self {
            pitch_offset: Self::PITCH_OFFSET.default_value(),
            detune_range: Self::DETUNE_RANGE.default_value(),
            fade_length: Self::FADE_LENGTH.default_value(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Inputs of a single simulation tick, passed from the voice to its active engine.
#[derive(Debug, Clone)]
pub struct TickContext<'a> {
    /// All particles of the tick. Engines only consider particles of their species.
    pub particles: &'a [Particle],
    pub species: usize,
    pub bounds: SpaceBounds,
    pub shaping: GrainShaping,
    /// The voice's mix bus node, which grains get routed to.
    pub bus: NodeId,
    /// Output time of the tick.
    pub now: f64,
    /// Channel on which grain completions get delivered.
    pub completions: &'a Sender<Completion>,
}

// -------------------------------------------------------------------------------------------------

/// Typed snapshot of an engine's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub mode: TriggerMode,
    pub shaper: GainShaperParameters,
    pub max_grains: usize,
    pub frequency_range: FrequencyRange,
    pub policy: PolicySettings,
}

impl EngineSettings {
    pub const MAX_GRAINS: FloatParameter =
        FloatParameter::new(FourCC(*b"maxg"), "Max Grains", 1.0..=256.0, 32.0);
}

/// Trigger policy specific settings.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicySettings {
    Collision(CollisionSettings),
    Loop(LoopSettings),
}

// -------------------------------------------------------------------------------------------------

/// Description of a grain, as requested by a [`TriggerPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainRequest {
    /// Target (sustain) gain.
    pub gain: f32,
    /// Duration in seconds.
    pub duration: f64,
    /// Start offset in the sample in seconds.
    pub offset: f64,
    /// Reverse playback when true.
    pub reverse: bool,
    /// Linear fade in duration in seconds.
    pub fade_in: f64,
    /// Linear fade out duration in seconds.
    pub fade_out: f64,
}

// -------------------------------------------------------------------------------------------------

/// State shared by all trigger policies: gain shaper, grain pool, sample buffer and parameter
/// mapping.
#[derive(Debug)]
pub struct EngineCore {
    mode: TriggerMode,
    shaper: GainShaperParameters,
    frequency_range: FrequencyRange,
    pool: GrainPool,
    buffer: Option<Arc<DecodedSample>>,
    particle_indices: ParticleTable<usize>,
    gain_reduction: f32,
    rng: SmallRng,
}

impl EngineCore {
    pub fn new(
        mode: TriggerMode,
        max_grains: usize,
        frequency_range: FrequencyRange,
        rng: SmallRng,
    ) -> Self {
        Self {
            mode,
            shaper: GainShaperParameters::default(),
            frequency_range,
            pool: GrainPool::new(max_grains),
            buffer: None,
            particle_indices: ParticleTable::new(),
            gain_reduction: 0.0,
            rng,
        }
    }

    /// Mode of the policy which owns this core.
    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    pub fn shaper(&self) -> &GainShaperParameters {
        &self.shaper
    }

    pub fn frequency_range(&self) -> &FrequencyRange {
        &self.frequency_range
    }

    pub fn pool(&self) -> &GrainPool {
        &self.pool
    }

    pub fn buffer(&self) -> Option<&Arc<DecodedSample>> {
        self.buffer.as_ref()
    }

    pub fn set_buffer(&mut self, buffer: Option<Arc<DecodedSample>>) {
        self.buffer = buffer;
    }

    /// Gain reduction of the most recently shaped input level of the current tick. 0 when no
    /// particle triggered in the tick.
    pub fn gain_reduction(&self) -> f32 {
        self.gain_reduction
    }

    /// Is the given particle part of the current tick?
    pub fn is_present(&self, particle: ParticleId) -> bool {
        self.particle_indices.get(particle).is_some()
    }

    /// Apply the gain shaper, memorizing the resulting gain reduction.
    pub fn shape(&mut self, input_level: f32) -> ShapedGain {
        let shaped = self.shaper.apply(input_level);
        self.gain_reduction = shaped.reduction;
        shaped
    }

    /// Random sample offset in seconds, at which a grain of the given duration fits into the
    /// sample buffer.
    pub fn random_offset(&mut self, duration: f64) -> f64 {
        let max_offset = self
            .buffer
            .as_ref()
            .map_or(0.0, |b| b.duration_secs() - duration);
        if max_offset > 0.0 {
            self.rng.random_range(0.0..max_offset)
        } else {
            0.0
        }
    }

    /// Create a new grain for the given particle. Declines (returns None) when no sample is
    /// loaded or the pool is full.
    pub fn create_grain(
        &mut self,
        particle: &Particle,
        request: GrainRequest,
        context: &TickContext,
        output: &mut dyn AudioOutput,
    ) -> Option<GrainId> {
        let buffer = Arc::clone(self.buffer.as_ref()?);
        if self.pool.is_full() {
            log::trace!("Grain pool is full: ignoring trigger of particle {}", particle.id);
            return None;
        }
        let detune_range = context.shaping.detune_range;
        let detune = if detune_range > 0.0 {
            self.rng.random_range(-detune_range..=detune_range)
        } else {
            0.0
        };
        let direction = if request.reverse { -1.0 } else { 1.0 };
        let playback_rate = direction * semitones_to_rate(context.shaping.pitch_offset + detune);
        let targets = GrainTargets::from_particle(particle, &context.bounds, &self.frequency_range);

        let mode = self.mode;
        let now = context.now;
        let duration = request.duration.max(0.0);
        self.pool.insert_with(|id| {
            let pan = output.create_pan_node(targets.pan, context.bus);
            let gain = output.create_gain_node(0.0, Some(pan));
            let source = output.create_source(
                SourceOptions {
                    buffer,
                    start: now,
                    offset: request.offset,
                    duration,
                    playback_rate,
                    frequency: targets.frequency,
                    q: targets.q,
                },
                gain,
            );
            schedule_envelope(output, gain, request, now, duration);

            let token = LivenessToken::new();
            output.on_complete(
                source,
                CompletionNotifier::new(
                    context.completions.clone(),
                    Completion {
                        mode,
                        grain: id,
                        token: token.clone(),
                    },
                ),
            );
            Grain {
                id,
                mode,
                particle: particle.id,
                start: now,
                duration,
                gain: request.gain,
                playback_rate,
                token,
                nodes: GrainNodes { source, gain, pan },
                targets,
            }
        })
    }

    /// Remove a grain which finished playing and free its nodes.
    fn finish_grain(&mut self, id: GrainId, output: &mut dyn AudioOutput) -> Option<Grain> {
        let grain = self.pool.remove(id)?;
        let now = output.current_time();
        output.release(grain.nodes.source, now);
        output.release(grain.nodes.gain, now);
        output.release(grain.nodes.pan, now);
        Some(grain)
    }

    /// Force stop a playing grain: fades out and stops the grain, ignoring its completion.
    pub fn stop_grain(&mut self, id: GrainId, output: &mut dyn AudioOutput) -> Option<Grain> {
        let grain = self.pool.remove(id)?;
        fade_out_and_release(&grain, output);
        Some(grain)
    }

    /// Force stop all playing grains.
    pub fn stop_all(&mut self, output: &mut dyn AudioOutput) {
        for grain in self.pool.drain() {
            fade_out_and_release(&grain, output);
        }
    }

    /// Change the pool's capacity, force stopping the oldest grains when shrinking.
    pub fn set_max_grains(&mut self, max_grains: usize, output: &mut dyn AudioOutput) {
        for grain in self.pool.set_max_grains(max_grains) {
            log::debug!("Evicting grain of particle {}", grain.particle);
            fade_out_and_release(&grain, output);
        }
    }

    fn index_particles(&mut self, context: &TickContext) {
        self.particle_indices.clear();
        for (index, particle) in context.particles.iter().enumerate() {
            if particle.species == context.species {
                self.particle_indices.insert(particle.id, index);
            }
        }
    }

    /// Move audio parameters of all grains whose particle is still present towards the
    /// particle's current targets.
    fn update_grain_targets(&mut self, context: &TickContext, output: &mut dyn AudioOutput) {
        for grain in self.pool.iter_mut() {
            let Some(&index) = self.particle_indices.get(grain.particle) else {
                continue;
            };
            let particle = &context.particles[index];
            let targets =
                GrainTargets::from_particle(particle, &context.bounds, &self.frequency_range);
            let current = grain.targets;
            for (node, param, from, to) in [
                (
                    grain.nodes.source,
                    NodeParam::Frequency,
                    current.frequency,
                    targets.frequency,
                ),
                (grain.nodes.source, NodeParam::Q, current.q, targets.q),
                (grain.nodes.pan, NodeParam::Pan, current.pan, targets.pan),
            ] {
                if has_changed(from, to) {
                    output.schedule(
                        node,
                        param,
                        ParamRamp::Target {
                            value: to,
                            start: context.now,
                            time_constant: self.shaper.time_constant(from, to),
                        },
                    );
                }
            }
            grain.targets = targets;
        }
    }
}

fn has_changed(from: f32, to: f32) -> bool {
    (from - to).abs() > 1e-4 * from.abs().max(1.0)
}

fn schedule_envelope(
    output: &mut dyn AudioOutput,
    gain_node: NodeId,
    request: GrainRequest,
    start: f64,
    duration: f64,
) {
    let fade_in = request.fade_in.clamp(0.0, duration);
    let fade_out = request.fade_out.clamp(0.0, duration - fade_in);
    let end = start + duration;
    let gain = request.gain;
    if fade_in > 0.0 {
        output.schedule(gain_node, NodeParam::Gain, ParamRamp::Set { value: 0.0, at: start });
        output.schedule(
            gain_node,
            NodeParam::Gain,
            ParamRamp::Linear {
                value: gain,
                end: start + fade_in,
            },
        );
    } else {
        output.schedule(gain_node, NodeParam::Gain, ParamRamp::Set { value: gain, at: start });
    }
    if fade_out > 0.0 {
        output.schedule(
            gain_node,
            NodeParam::Gain,
            ParamRamp::Set {
                value: gain,
                at: end - fade_out,
            },
        );
        output.schedule(gain_node, NodeParam::Gain, ParamRamp::Linear { value: 0.0, end });
    }
}

fn fade_out_and_release(grain: &Grain, output: &mut dyn AudioOutput) {
    let now = output.current_time();
    output.schedule(
        grain.nodes.gain,
        NodeParam::Gain,
        ParamRamp::Target {
            value: 0.0,
            start: now,
            time_constant: FORCE_STOP_TIME_CONSTANT,
        },
    );
    let end = now + FORCE_STOP_FADE;
    output.stop(grain.nodes.source, end);
    output.release(grain.nodes.source, end);
    output.release(grain.nodes.gain, end);
    output.release(grain.nodes.pan, end);
}

// -------------------------------------------------------------------------------------------------

/// Decides when and how grains get created for the particles of a species.
pub trait TriggerPolicy: std::fmt::Debug {
    /// The trigger mode this policy implements.
    const MODE: TriggerMode;

    /// Does the particle meet the policy's trigger condition in the current tick?
    fn should_trigger(&self, particle: &Particle) -> bool;

    /// Normalized input level of a triggering particle, passed to the gain shaper.
    fn input_level(&self, particle: &Particle) -> f32;

    /// Handle a triggering particle, whose input level got shaped to the given gain. Creates
    /// grains via the given core, when the policy's conditions permit it.
    fn trigger(
        &mut self,
        core: &mut EngineCore,
        particle: &Particle,
        gain: f32,
        context: &TickContext,
        output: &mut dyn AudioOutput,
    );

    /// Called for particles which do not trigger in the current tick.
    fn on_idle(&mut self, _particle: ParticleId) {}

    /// Called after all particles of a tick got evaluated.
    fn on_tick(&mut self, _core: &EngineCore) {}

    /// Called when a grain of this policy got removed from the pool.
    fn on_grain_finished(&mut self, _grain: &Grain) {}

    /// Drop all per-particle state.
    fn clear(&mut self);

    /// Typed snapshot of the policy's settings.
    fn settings(&self) -> PolicySettings;

    /// Descriptors of the policy's settings.
    fn parameters(&self) -> Vec<&'static dyn Parameter>;

    /// Apply a settings update. Returns false when the id is not a setting of this policy.
    fn apply_update(&mut self, id: FourCC, update: &ParameterValueUpdate) -> bool;
}

// -------------------------------------------------------------------------------------------------

/// A grain engine: a [`TriggerPolicy`] driving an [`EngineCore`].
#[derive(Debug)]
pub struct GrainEngine<P: TriggerPolicy> {
    core: EngineCore,
    policy: P,
}

impl<P: TriggerPolicy> GrainEngine<P> {
    pub fn new(
        policy: P,
        max_grains: usize,
        frequency_range: FrequencyRange,
        rng: SmallRng,
    ) -> Self {
        let core = EngineCore::new(P::MODE, max_grains, frequency_range, rng);
        Self { core, policy }
    }

    pub fn core(&self) -> &EngineCore {
        &self.core
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Number of currently playing grains.
    pub fn live_grains(&self) -> usize {
        self.core.pool.len()
    }

    pub fn set_buffer(&mut self, buffer: Option<Arc<DecodedSample>>) {
        self.core.set_buffer(buffer);
    }

    /// Run a simulation tick: evaluate triggers of all particles of the engine's species and
    /// move playing grains towards their particle's current audio parameters.
    pub fn update(&mut self, context: &TickContext, output: &mut dyn AudioOutput) {
        self.core.gain_reduction = 0.0;
        if self.core.buffer.is_none() {
            return;
        }
        self.core.index_particles(context);
        for particle in context
            .particles
            .iter()
            .filter(|p| p.species == context.species)
        {
            if self.policy.should_trigger(particle) {
                let level = self.policy.input_level(particle);
                let shaped = self.core.shape(level);
                self.policy
                    .trigger(&mut self.core, particle, shaped.gain, context, output);
            } else {
                self.policy.on_idle(particle.id);
            }
        }
        self.policy.on_tick(&self.core);
        self.core.update_grain_targets(context, output);
    }

    /// Handle a completion notification of one of the engine's grains. Stale notifications of
    /// already removed grains are ignored. Returns true when a grain got removed.
    pub fn handle_completion(
        &mut self,
        completion: &Completion,
        output: &mut dyn AudioOutput,
    ) -> bool {
        debug_assert_eq!(completion.mode, P::MODE, "Completion routed to wrong engine");
        if !completion.token.is_live() {
            log::trace!("Ignoring stale completion of grain {:?}", completion.grain);
            return false;
        }
        match self.core.finish_grain(completion.grain, output) {
            Some(grain) => {
                self.policy.on_grain_finished(&grain);
                true
            }
            None => false,
        }
    }

    /// Force stop all grains and drop all per-particle state.
    pub fn stop_all(&mut self, output: &mut dyn AudioOutput) {
        self.core.stop_all(output);
        self.policy.clear();
    }

    /// Typed snapshot of the engine's settings.
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            mode: P::MODE,
            shaper: self.core.shaper,
            max_grains: self.core.pool.max_grains(),
            frequency_range: self.core.frequency_range,
            policy: self.policy.settings(),
        }
    }

    /// Descriptors of all settings of the engine.
    pub fn parameters(&self) -> Vec<&'static dyn Parameter> {
        let mut parameters: Vec<&'static dyn Parameter> = Vec::new();
        for parameter in GainShaperParameters::parameters() {
            parameters.push(parameter);
        }
        parameters.push(&EngineSettings::MAX_GRAINS);
        parameters.push(&FrequencyRange::LOW);
        parameters.push(&FrequencyRange::HIGH);
        parameters.extend(self.policy.parameters());
        parameters
    }

    /// Apply a settings update. Returns false when the id is unknown.
    pub fn apply_update(
        &mut self,
        id: FourCC,
        update: &ParameterValueUpdate,
        output: &mut dyn AudioOutput,
    ) -> bool {
        if id == EngineSettings::MAX_GRAINS.id() {
            let mut max_grains = self.core.pool.max_grains() as f32;
            EngineSettings::MAX_GRAINS.apply_update(&mut max_grains, update);
            self.core.set_max_grains(max_grains.round() as usize, output);
            true
        } else {
            self.core.shaper.apply_update(id, update)
                || self.core.frequency_range.apply_update(id, update)
                || self.policy.apply_update(id, update)
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::output::testing::{Call, RecordingOutput};

    /// Triggers a grain for each particle with a x position > 0, using x as input level.
    #[derive(Debug, Default)]
    struct PositionPolicy {
        finished: Vec<ParticleId>,
        cleared: bool,
    }

    impl TriggerPolicy for PositionPolicy {
        const MODE: TriggerMode = TriggerMode::Collision;

        fn should_trigger(&self, particle: &Particle) -> bool {
            particle.x > 0.0
        }

        fn input_level(&self, particle: &Particle) -> f32 {
            particle.x.clamp(0.0, 1.0)
        }

        fn trigger(
            &mut self,
            core: &mut EngineCore,
            particle: &Particle,
            gain: f32,
            context: &TickContext,
            output: &mut dyn AudioOutput,
        ) {
            if gain > 0.0 {
                let request = GrainRequest {
                    gain,
                    duration: 0.2,
                    offset: 0.0,
                    reverse: false,
                    fade_in: 0.05,
                    fade_out: 0.05,
                };
                core.create_grain(particle, request, context, output);
            }
        }

        fn on_grain_finished(&mut self, grain: &Grain) {
            self.finished.push(grain.particle);
        }

        fn clear(&mut self) {
            self.cleared = true;
        }

        fn settings(&self) -> PolicySettings {
            PolicySettings::Collision(CollisionSettings::default())
        }

        fn parameters(&self) -> Vec<&'static dyn Parameter> {
            Vec::new()
        }

        fn apply_update(&mut self, _id: FourCC, _update: &ParameterValueUpdate) -> bool {
            false
        }
    }

    fn engine(max_grains: usize) -> GrainEngine<PositionPolicy> {
        let mut engine = GrainEngine::new(
            PositionPolicy::default(),
            max_grains,
            FrequencyRange::default(),
            SmallRng::seed_from_u64(1),
        );
        engine.set_buffer(Some(Arc::new(DecodedSample::from_mono(
            1000,
            vec![0.0; 1000],
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
            bounds: SpaceBounds::new(1.0, 1.0),
            shaping: GrainShaping::default(),
            bus: 0,
            now,
            completions,
        }
    }

    #[test]
    fn grain_creation() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(8);

        let particles = [
            Particle::new(0, 0, 0.5, 0.5),
            Particle::new(1, 0, 0.0, 0.5),
            Particle::new(2, 1, 0.5, 0.5),
            // gated by the threshold
            Particle::new(3, 0, 0.01, 0.5),
        ];
        engine.update(&context(&particles, 1.0, &sender), &mut output);
        assert_eq!(engine.live_grains(), 1);
        assert!((engine.core().gain_reduction() - 1.0).abs() < 1e-6);

        let grain = engine.core().pool().iter().next().unwrap().clone();
        assert_eq!(grain.particle, 0);
        assert_eq!(grain.mode, TriggerMode::Collision);
        assert_eq!(output.pending_completions(), 1);
        // chain is source -> gain -> pan -> bus
        assert!(output.calls.contains(&Call::CreatePan {
            node: grain.nodes.pan,
            pan: 0.0,
            destination: 0
        }));
        assert!(output.calls.contains(&Call::CreateGain {
            node: grain.nodes.gain,
            gain: 0.0,
            destination: Some(grain.nodes.pan)
        }));
        // envelope
        let envelope = output.ramps(grain.nodes.gain, NodeParam::Gain);
        let expected = [
            ParamRamp::Set { value: 0.0, at: 1.0 },
            ParamRamp::Linear {
                value: 0.5,
                end: 1.05,
            },
            ParamRamp::Set {
                value: 0.5,
                at: 1.15,
            },
            ParamRamp::Linear {
                value: 0.0,
                end: 1.2,
            },
        ];
        let value = |ramp: &ParamRamp| match *ramp {
            ParamRamp::Set { value, .. }
            | ParamRamp::Linear { value, .. }
            | ParamRamp::Target { value, .. } => value,
        };
        assert_eq!(envelope.len(), expected.len());
        for (ramp, expected) in envelope.iter().zip(expected) {
            assert_eq!(value(ramp), value(&expected));
            assert_eq!(
                std::mem::discriminant(ramp),
                std::mem::discriminant(&expected)
            );
            assert!((ramp.time() - expected.time()).abs() < 1e-9);
        }
    }

    #[test]
    fn gain_reduction_resets_per_tick() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(8);

        let gated = [Particle::new(0, 0, 0.01, 0.5)];
        engine.update(&context(&gated, 0.0, &sender), &mut output);
        assert_eq!(engine.live_grains(), 0);
        assert!((engine.core().gain_reduction() - 1.0).abs() < 1e-6);

        // no triggering particles: nothing is reduced
        let resting = [Particle::new(0, 0, 0.0, 0.5)];
        engine.update(&context(&resting, 0.1, &sender), &mut output);
        assert_eq!(engine.core().gain_reduction(), 0.0);

        engine.update(&context(&gated, 0.2, &sender), &mut output);
        assert!(engine.core().gain_reduction() > 0.99);
        engine.update(&context(&[], 0.3, &sender), &mut output);
        assert_eq!(engine.core().gain_reduction(), 0.0);
    }

    #[test]
    fn no_grains_without_buffer() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(8);
        engine.set_buffer(None);
        let particles = [Particle::new(0, 0, 0.5, 0.5)];
        engine.update(&context(&particles, 0.0, &sender), &mut output);
        assert_eq!(engine.live_grains(), 0);
        assert!(output.calls.is_empty());
    }

    #[test]
    fn pool_bound() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(3);
        let particles = (0..10)
            .map(|id| Particle::new(id, 0, 0.5, 0.5))
            .collect::<Vec<_>>();
        for tick in 0..5 {
            engine.update(&context(&particles, tick as f64, &sender), &mut output);
            assert!(engine.live_grains() <= 3);
        }
        assert_eq!(output.sources().len(), 3);
    }

    #[test]
    fn target_updates() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(1);
        let particles = [Particle::new(0, 0, 0.5, 0.5)];
        engine.update(&context(&particles, 0.0, &sender), &mut output);
        let grain = engine.core().pool().iter().next().unwrap().clone();

        // unchanged targets: nothing scheduled
        engine.update(&context(&particles, 0.1, &sender), &mut output);
        assert!(output.ramps(grain.nodes.pan, NodeParam::Pan).is_empty());

        // moving right and up: pan and frequency rise with attack, q is unchanged
        let particles = [Particle::new(0, 0, 0.75, 0.25)];
        engine.update(&context(&particles, 0.2, &sender), &mut output);
        let shaper = *engine.core().shaper();
        assert_eq!(
            output.ramps(grain.nodes.pan, NodeParam::Pan),
            vec![ParamRamp::Target {
                value: 0.5,
                start: 0.2,
                time_constant: shaper.attack
            }]
        );
        assert_eq!(output.ramps(grain.nodes.source, NodeParam::Frequency).len(), 1);
        assert!(output.ramps(grain.nodes.source, NodeParam::Q).is_empty());

        // moving back left: release
        let particles = [Particle::new(0, 0, 0.25, 0.25)];
        engine.update(&context(&particles, 0.3, &sender), &mut output);
        assert_eq!(
            output.ramps(grain.nodes.pan, NodeParam::Pan).last(),
            Some(&ParamRamp::Target {
                value: -0.5,
                start: 0.3,
                time_constant: shaper.release
            })
        );

        // vanished particles leave their grains alone
        let count = output.calls.len();
        engine.update(&context(&[], 0.4, &sender), &mut output);
        assert_eq!(output.calls.len(), count);
        assert_eq!(engine.live_grains(), 1);
    }

    #[test]
    fn completions() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(8);
        let particles = [Particle::new(0, 0, 0.5, 0.5), Particle::new(1, 0, 0.5, 0.5)];
        engine.update(&context(&particles, 0.0, &sender), &mut output);
        assert_eq!(engine.live_grains(), 2);

        output.complete_all();
        let completions = receiver.try_iter().collect::<Vec<_>>();
        assert_eq!(completions.len(), 2);
        assert!(engine.handle_completion(&completions[0], &mut output));
        assert_eq!(engine.live_grains(), 1);
        assert_eq!(engine.policy().finished.len(), 1);
        // duplicate deliveries are no-ops
        assert!(!engine.handle_completion(&completions[0], &mut output));

        // completions of force stopped grains are stale
        engine.stop_all(&mut output);
        assert_eq!(engine.live_grains(), 0);
        assert!(engine.policy().cleared);
        assert!(!completions[1].token.is_live());
        assert!(!engine.handle_completion(&completions[1], &mut output));
        assert_eq!(engine.policy().finished.len(), 1);
    }

    #[test]
    fn stop_all_fades_out() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(8);
        let particles = [Particle::new(0, 0, 0.5, 0.5)];
        engine.update(&context(&particles, 0.0, &sender), &mut output);
        let grain = engine.core().pool().iter().next().unwrap().clone();

        output.time = 0.1;
        engine.stop_all(&mut output);
        assert!(!grain.token.is_live());
        assert_eq!(
            output.ramps(grain.nodes.gain, NodeParam::Gain).last(),
            Some(&ParamRamp::Target {
                value: 0.0,
                start: 0.1,
                time_constant: FORCE_STOP_TIME_CONSTANT
            })
        );
        assert!(output.is_stopped(grain.nodes.source));
        assert!(output.is_released(grain.nodes.gain));
        assert!(output.is_released(grain.nodes.pan));

        // idempotent
        let count = output.calls.len();
        engine.stop_all(&mut output);
        assert_eq!(output.calls.len(), count);
    }

    #[test]
    fn settings() {
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let mut output = RecordingOutput::new();
        let mut engine = engine(4);
        let particles = (0..4)
            .map(|id| Particle::new(id, 0, 0.5, 0.5))
            .collect::<Vec<_>>();
        engine.update(&context(&particles, 0.0, &sender), &mut output);
        assert_eq!(engine.live_grains(), 4);

        assert!(engine.apply_update(
            GainShaperParameters::THRESHOLD.id(),
            &ParameterValueUpdate::raw(0.7f32),
            &mut output
        ));
        assert!(engine.apply_update(
            EngineSettings::MAX_GRAINS.id(),
            &ParameterValueUpdate::raw(2.0f32),
            &mut output
        ));
        assert!(engine.apply_update(
            FrequencyRange::LOW.id(),
            &ParameterValueUpdate::raw(100.0f32),
            &mut output
        ));
        assert!(!engine.apply_update(
            FourCC(*b"what"),
            &ParameterValueUpdate::raw(1.0f32),
            &mut output
        ));
        assert_eq!(engine.live_grains(), 2);

        let settings = engine.settings();
        assert_eq!(settings.mode, TriggerMode::Collision);
        assert_eq!(settings.shaper.threshold, 0.7);
        assert_eq!(settings.max_grains, 2);
        assert_eq!(settings.frequency_range.low, 100.0);
        assert!(engine
            .parameters()
            .iter()
            .any(|p| p.id() == EngineSettings::MAX_GRAINS.id()));
    }
}
