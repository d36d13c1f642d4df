//! The per species voice, which owns a sample, the grain engines and the species' mix bus.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use four_cc::FourCC;
use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    engine::{
        collision::CollisionPolicy, looping::LoopPolicy, EngineSettings, GrainEngine,
        GrainShaping, TickContext, TriggerMode,
    },
    mapping::FrequencyRange,
    output::{AudioOutput, Completion, NodeId, NodeParam, ParamRamp},
    parameter::{FloatParameter, Parameter, ParameterValueUpdate},
    particle::{Particle, SpaceBounds},
    utils::sample::DecodedSample,
    Error,
};

// -------------------------------------------------------------------------------------------------

pub mod loader;

use loader::DecodeTask;

// -------------------------------------------------------------------------------------------------

/// Time constant of mix bus volume changes in seconds.
const MIX_TIME_CONSTANT: f32 = 0.05;
/// Delay before a released mix bus gets freed, so fading out grains can finish.
const BUS_RELEASE_DELAY: f64 = 0.05;

// -------------------------------------------------------------------------------------------------

/// Configuration of a [`Voice`].
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// The species this voice sonifies.
    pub species: usize,
    /// Bounds of the simulation space.
    pub bounds: SpaceBounds,
    /// Initial pool size of both engines.
    pub max_grains: usize,
    /// Initial frequency range of both engines.
    pub frequency_range: FrequencyRange,
    /// Seed for grain randomization. When None, the voice gets seeded from the OS.
    pub seed: Option<u64>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            species: 0,
            bounds: SpaceBounds::default(),
            max_grains: EngineSettings::MAX_GRAINS.default_value() as usize,
            frequency_range: FrequencyRange::default(),
            seed: None,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Result of [`Voice::load_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The sample is decoding in the background.
    Decoding,
    /// The output is not running yet: decoding starts with the first update of a running output.
    Deferred,
}

// -------------------------------------------------------------------------------------------------

/// Numeric state of a voice for display purposes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct VoiceTelemetry {
    /// Playing grains of the active engine.
    pub live_grains: usize,
    /// Most recent gain reduction of the active engine's gain shaper.
    pub gain_reduction: f32,
    pub mode: TriggerMode,
    pub previous_mode: Option<TriggerMode>,
    pub volume: f32,
    pub muted: bool,
}

// -------------------------------------------------------------------------------------------------

/// Sonifies the particles of a single species.
///
/// A voice owns one collision and one loop engine, which share the voice's sample and mix bus.
/// Only the active engine gets updated: switching the trigger mode leaves the state of the
/// inactive engine untouched, so it can be resumed later on.
///
/// All functions which touch audio take the output as argument. Grain completions are delivered
/// via a channel and processed with the next [`Self::update`] call.
#[derive(Debug)]
pub struct Voice {
    config: VoiceConfig,
    collision: GrainEngine<CollisionPolicy>,
    looping: GrainEngine<LoopPolicy>,
    mode: TriggerMode,
    previous_mode: Option<TriggerMode>,
    volume: f32,
    muted: bool,
    shaping: GrainShaping,
    buffer: Option<Arc<DecodedSample>>,
    bus: Option<NodeId>,
    completion_sender: Sender<Completion>,
    completion_receiver: Receiver<Completion>,
    pending_decode: Option<DecodeTask>,
    deferred_bytes: Option<Vec<u8>>,
    load_error: Option<Error>,
    telemetry: VoiceTelemetry,
}

impl Voice {
    pub const VOLUME: FloatParameter =
        FloatParameter::new(FourCC(*b"volu"), "Volume", 0.0..=2.0, 1.0);

    pub fn new(config: VoiceConfig) -> Self {
        let (collision_rng, loop_rng) = match config.seed {
            Some(seed) => (
                SmallRng::seed_from_u64(seed),
                SmallRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (SmallRng::from_os_rng(), SmallRng::from_os_rng()),
        };
        let collision = GrainEngine::new(
            CollisionPolicy::default(),
            config.max_grains,
            config.frequency_range,
            collision_rng,
        );
        let looping = GrainEngine::new(
            LoopPolicy::default(),
            config.max_grains,
            config.frequency_range,
            loop_rng,
        );
        let (completion_sender, completion_receiver) = crossbeam_channel::unbounded();
        let mut voice = Self {
            config,
            collision,
            looping,
            mode: TriggerMode::default(),
            previous_mode: None,
            volume: Self::VOLUME.default_value(),
            muted: false,
            shaping: GrainShaping::default(),
            buffer: None,
            bus: None,
            completion_sender,
            completion_receiver,
            pending_decode: None,
            deferred_bytes: None,
            load_error: None,
            telemetry: VoiceTelemetry::default(),
        };
        voice.publish_telemetry();
        voice
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn species(&self) -> usize {
        self.config.species
    }

    pub fn collision_engine(&self) -> &GrainEngine<CollisionPolicy> {
        &self.collision
    }

    pub fn loop_engine(&self) -> &GrainEngine<LoopPolicy> {
        &self.looping
    }

    /// The loaded sample, if any.
    pub fn sample(&self) -> Option<&Arc<DecodedSample>> {
        self.buffer.as_ref()
    }

    /// True while a sample is decoding or waiting for the output to start.
    pub fn is_loading(&self) -> bool {
        self.pending_decode.is_some() || self.deferred_bytes.is_some()
    }

    /// The voice's mix bus node, when an output is attached.
    pub fn bus(&self) -> Option<NodeId> {
        self.bus
    }

    // ---------------------------------------------------------------------------------------------

    /// Start loading a new sample from encoded audio file content.
    ///
    /// Decoding happens asynchronously: the previous sample stays active until decoding
    /// succeeded, and stays active when decoding failed. When the output is not running yet,
    /// the content is kept and decoded with the first update of a running output.
    pub fn load_sample(
        &mut self,
        bytes: Vec<u8>,
        output: &dyn AudioOutput,
    ) -> Result<LoadStatus, Error> {
        if output.is_running() {
            self.deferred_bytes = None;
            self.pending_decode = Some(DecodeTask::spawn(bytes)?);
            Ok(LoadStatus::Decoding)
        } else {
            log::info!("Output is not running: deferring sample decoding");
            self.deferred_bytes = Some(bytes);
            Ok(LoadStatus::Deferred)
        }
    }

    /// Check for a finished sample decode task and install its sample. Returns None when
    /// nothing finished, else the result of the finished decode operation.
    pub fn poll_sample_load(&mut self, output: &dyn AudioOutput) -> Option<Result<(), Error>> {
        if output.is_running() {
            if let Some(bytes) = self.deferred_bytes.take() {
                log::debug!("Output is running: starting deferred sample decoding");
                if let Err(err) = self.load_sample(bytes, output) {
                    log::error!("Failed to start sample decoding: {err}");
                    return Some(Err(err));
                }
            }
        }
        let result = self.pending_decode.as_mut()?.poll()?;
        self.pending_decode = None;
        Some(self.finish_sample_load(result))
    }

    /// Block until a pending sample decode task finished and install its sample.
    /// Does nothing when no sample is decoding.
    pub fn wait_for_sample(&mut self) -> Result<(), Error> {
        match self.pending_decode.take() {
            Some(task) => self.finish_sample_load(task.wait()),
            None => Ok(()),
        }
    }

    /// Take the error of the last sample load which failed while running [`Self::update`].
    /// Returns None when no load failed since the last call.
    pub fn take_load_error(&mut self) -> Option<Error> {
        self.load_error.take()
    }

    /// Install an already decoded sample.
    pub fn set_sample(&mut self, sample: DecodedSample) {
        log::info!(
            "Installing sample of species {}: {:.2}s, {} channels, {} Hz",
            self.config.species,
            sample.duration_secs(),
            sample.channel_count(),
            sample.sample_rate()
        );
        let sample = Arc::new(sample);
        self.collision.set_buffer(Some(Arc::clone(&sample)));
        self.looping.set_buffer(Some(Arc::clone(&sample)));
        self.buffer = Some(sample);
    }

    fn finish_sample_load(&mut self, result: Result<DecodedSample, Error>) -> Result<(), Error> {
        match result {
            Ok(sample) => {
                self.set_sample(sample);
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to decode sample: {err}");
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------------------------------

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    pub fn previous_mode(&self) -> Option<TriggerMode> {
        self.previous_mode
    }

    /// Select the active engine. The inactive engine's grains and state stay untouched.
    pub fn set_trigger_mode(&mut self, mode: TriggerMode) {
        if mode != self.mode {
            log::info!(
                "Switching trigger mode of species {} from {} to {mode}",
                self.config.species,
                self.mode
            );
            self.previous_mode = Some(self.mode);
            self.mode = mode;
            self.publish_telemetry();
        }
    }

    /// Typed settings of the active engine.
    pub fn engine_settings(&self) -> EngineSettings {
        match self.mode {
            TriggerMode::Collision => self.collision.settings(),
            TriggerMode::Loop => self.looping.settings(),
        }
    }

    /// Setting descriptors of the active engine.
    pub fn engine_parameters(&self) -> Vec<&'static dyn Parameter> {
        match self.mode {
            TriggerMode::Collision => self.collision.parameters(),
            TriggerMode::Loop => self.looping.parameters(),
        }
    }

    /// Apply settings updates to the active engine. Unknown ids are ignored.
    pub fn update_engine_settings(
        &mut self,
        updates: &[(FourCC, ParameterValueUpdate)],
        output: &mut dyn AudioOutput,
    ) {
        for (id, update) in updates {
            let handled = match self.mode {
                TriggerMode::Collision => self.collision.apply_update(*id, update, output),
                TriggerMode::Loop => self.looping.apply_update(*id, update, output),
            };
            if !handled {
                log::debug!("Ignoring unknown {} engine setting '{id}'", self.mode);
            }
        }
        self.publish_telemetry();
    }

    /// Enable or disable collision triggers with particles of the given species.
    pub fn set_collision_trigger(&mut self, species: usize, enabled: bool) {
        self.collision
            .policy_mut()
            .set_trigger_enabled(species, enabled);
    }

    // ---------------------------------------------------------------------------------------------

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Set the mix volume. Changes get ramped smoothly.
    pub fn set_volume(&mut self, volume: f32, output: &mut dyn AudioOutput) {
        self.volume = Self::VOLUME.clamp_value(volume);
        self.ramp_bus_gain(output);
        self.publish_telemetry();
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Mute or unmute the voice. Muted voices don't create grains. Changes get ramped smoothly.
    pub fn set_mute(&mut self, muted: bool, output: &mut dyn AudioOutput) {
        self.muted = muted;
        self.ramp_bus_gain(output);
        self.publish_telemetry();
    }

    pub fn shaping(&self) -> &GrainShaping {
        &self.shaping
    }

    /// Set the pitch offset of new grains in semitones.
    pub fn set_pitch_offset(&mut self, semitones: f32) {
        self.shaping.pitch_offset = GrainShaping::PITCH_OFFSET.clamp_value(semitones);
    }

    /// Set the random detune range of new grains in semitones.
    pub fn set_detune_range(&mut self, semitones: f32) {
        self.shaping.detune_range = GrainShaping::DETUNE_RANGE.clamp_value(semitones);
    }

    /// Set the fade in/out length of new collision grains in seconds.
    pub fn set_fade_length(&mut self, seconds: f32) {
        self.shaping.fade_length = GrainShaping::FADE_LENGTH.clamp_value(seconds);
    }

    fn bus_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    fn ramp_bus_gain(&mut self, output: &mut dyn AudioOutput) {
        if let Some(bus) = self.bus {
            output.schedule(
                bus,
                NodeParam::Gain,
                ParamRamp::Target {
                    value: self.bus_gain(),
                    start: output.current_time(),
                    time_constant: MIX_TIME_CONSTANT,
                },
            );
        }
    }

    // ---------------------------------------------------------------------------------------------

    /// Run a simulation tick with the given particle snapshot.
    ///
    /// Processes pending grain completions and sample loads, then runs the active engine.
    /// Muted voices, voices without a sample, or stopped outputs don't create grains.
    /// Sample loads which fail here are reported via [`Self::take_load_error`].
    pub fn update(&mut self, particles: &[Particle], output: &mut dyn AudioOutput) {
        self.process_completions(output);
        if let Some(Err(err)) = self.poll_sample_load(output) {
            log::warn!("Sample of species {} failed to load: {err}", self.config.species);
            self.load_error = Some(err);
        }
        if self.muted || !output.is_running() || self.buffer.is_none() {
            self.publish_telemetry();
            return;
        }
        let bus = match self.bus {
            Some(bus) => bus,
            None => {
                let bus = output.create_gain_node(self.bus_gain(), None);
                self.bus = Some(bus);
                bus
            }
        };
        let context = TickContext {
            particles,
            species: self.config.species,
            bounds: self.config.bounds,
            shaping: self.shaping,
            bus,
            now: output.current_time(),
            completions: &self.completion_sender,
        };
        match self.mode {
            TriggerMode::Collision => self.collision.update(&context, output),
            TriggerMode::Loop => self.looping.update(&context, output),
        }
        self.publish_telemetry();
    }

    fn process_completions(&mut self, output: &mut dyn AudioOutput) {
        for completion in self.completion_receiver.try_iter() {
            match completion.mode {
                TriggerMode::Collision => self.collision.handle_completion(&completion, output),
                TriggerMode::Loop => self.looping.handle_completion(&completion, output),
            };
        }
    }

    /// Force stop all grains of both engines and drop all per-particle state. Completions of
    /// the stopped grains, which arrive later on, are ignored.
    pub fn stop_all(&mut self, output: &mut dyn AudioOutput) {
        let live_grains = self.collision.live_grains() + self.looping.live_grains();
        if live_grains > 0 {
            log::info!(
                "Stopping {live_grains} grains of species {}",
                self.config.species
            );
        }
        self.collision.stop_all(output);
        self.looping.stop_all(output);
        self.publish_telemetry();
    }

    /// Stop all grains and free the voice's mix bus, e.g. before the output gets closed.
    /// The bus gets recreated with the next update of a running output.
    pub fn release_output(&mut self, output: &mut dyn AudioOutput) {
        self.stop_all(output);
        if let Some(bus) = self.bus.take() {
            output.release(bus, output.current_time() + BUS_RELEASE_DELAY);
        }
    }

    // ---------------------------------------------------------------------------------------------

    /// Numeric state of the voice, as of the last update.
    pub fn telemetry(&self) -> VoiceTelemetry {
        self.telemetry
    }

    fn publish_telemetry(&mut self) {
        let (live_grains, gain_reduction) = match self.mode {
            TriggerMode::Collision => (
                self.collision.live_grains(),
                self.collision.core().gain_reduction(),
            ),
            TriggerMode::Loop => (
                self.looping.live_grains(),
                self.looping.core().gain_reduction(),
            ),
        };
        self.telemetry = VoiceTelemetry {
            live_grains,
            gain_reduction,
            mode: self.mode,
            previous_mode: self.previous_mode,
            volume: self.volume,
            muted: self.muted,
        };
    }
}

// -------------------------------------------------------------------------------------------------
