use four_cc::FourCC;

use super::{
    pool::{Grain, GrainId},
    EngineCore, GrainRequest, PolicySettings, TickContext, TriggerMode, TriggerPolicy,
};
use crate::{
    output::AudioOutput,
    parameter::{FloatParameter, Parameter, ParameterValueUpdate},
    particle::{Particle, ParticleTable},
};

// -------------------------------------------------------------------------------------------------

/// Grains with a shaped gain at or below this level are not worth playing.
const MIN_GAIN: f32 = 0.01;

// -------------------------------------------------------------------------------------------------

/// Settings of the [`CollisionPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionSettings {
    /// Trigger matrix: collisions with species whose entry is false are ignored.
    /// Species without an entry are enabled.
    pub triggers: Vec<bool>,
    /// Scales collision forces into input levels.
    pub sensitivity: f32,
    /// Collisions with a lower force are ignored.
    pub minimum_force: f32,
    /// Duration of collision grains in seconds.
    pub grain_duration: f32,
}

impl CollisionSettings {
    pub const SENSITIVITY: FloatParameter =
        FloatParameter::new(FourCC(*b"sens"), "Sensitivity", 0.0..=10.0, 1.0);
    pub const MINIMUM_FORCE: FloatParameter =
        FloatParameter::new(FourCC(*b"minf"), "Minimum Force", 0.0..=1.0, 0.05);
    pub const GRAIN_DURATION: FloatParameter =
        FloatParameter::new(FourCC(*b"cdur"), "Grain Duration", 0.01..=2.0, 0.2).with_unit("s");

    pub fn is_trigger_enabled(&self, species: usize) -> bool {
        self.triggers.get(species).copied().unwrap_or(true)
    }

    pub fn set_trigger_enabled(&mut self, species: usize, enabled: bool) {
        if species >= self.triggers.len() {
            self.triggers.resize(species + 1, true);
        }
        self.triggers[species] = enabled;
    }
}

impl Default for CollisionSettings {
    fn default() -> Self {
        Self {
            triggers: Vec::new(),
            sensitivity: Self::SENSITIVITY.default_value(),
            minimum_force: Self::MINIMUM_FORCE.default_value(),
            grain_duration: Self::GRAIN_DURATION.default_value(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Event driven trigger policy: creates a single grain when a particle collides with a particle
/// of an enabled species.
///
/// Each particle is either idle or triggered. A triggered particle holds a live grain and
/// ignores further collisions until the grain finished, so there's at most one grain per
/// particle at any time.
#[derive(Debug, Default)]
pub struct CollisionPolicy {
    settings: CollisionSettings,
    triggered: ParticleTable<GrainId>,
}

impl CollisionPolicy {
    pub fn new(settings: CollisionSettings) -> Self {
        Self {
            settings,
            triggered: ParticleTable::new(),
        }
    }

    pub fn settings(&self) -> &CollisionSettings {
        &self.settings
    }

    pub fn set_trigger_enabled(&mut self, species: usize, enabled: bool) {
        self.settings.set_trigger_enabled(species, enabled);
    }

    /// Number of particles which currently hold a grain.
    pub fn triggered_count(&self) -> usize {
        self.triggered.len()
    }

    fn max_qualifying_force(&self, particle: &Particle) -> Option<f32> {
        particle
            .collisions
            .iter()
            .filter(|c| {
                c.force >= self.settings.minimum_force
                    && self.settings.is_trigger_enabled(c.other_species)
            })
            .map(|c| c.force)
            .reduce(f32::max)
    }
}

impl TriggerPolicy for CollisionPolicy {
    const MODE: TriggerMode = TriggerMode::Collision;

    fn should_trigger(&self, particle: &Particle) -> bool {
        self.max_qualifying_force(particle).is_some()
    }

    fn input_level(&self, particle: &Particle) -> f32 {
        let force = self.max_qualifying_force(particle).unwrap_or(0.0);
        (force * self.settings.sensitivity).clamp(0.0, 1.0)
    }

    fn trigger(
        &mut self,
        core: &mut EngineCore,
        particle: &Particle,
        gain: f32,
        context: &TickContext,
        output: &mut dyn AudioOutput,
    ) {
        if self
            .triggered
            .get(particle.id)
            .is_some_and(|id| core.pool().contains(*id))
        {
            log::trace!("Particle {} still holds a grain", particle.id);
            return;
        }
        if gain <= MIN_GAIN {
            return;
        }
        let duration = self.settings.grain_duration as f64;
        let fade = (context.shaping.fade_length as f64).min(duration / 2.0);
        let request = GrainRequest {
            gain,
            duration,
            offset: core.random_offset(duration),
            reverse: false,
            fade_in: fade,
            fade_out: fade,
        };
        if let Some(id) = core.create_grain(particle, request, context, output) {
            self.triggered.insert(particle.id, id);
        }
    }

    fn on_tick(&mut self, core: &EngineCore) {
        // drop records of grains which got evicted
        self.triggered.retain(|_, id| core.pool().contains(*id));
    }

    fn on_grain_finished(&mut self, grain: &Grain) {
        if self.triggered.get(grain.particle) == Some(&grain.id) {
            self.triggered.remove(grain.particle);
        }
    }

    fn clear(&mut self) {
        self.triggered.clear();
    }

    fn settings(&self) -> PolicySettings {
        PolicySettings::Collision(self.settings.clone())
    }

    fn parameters(&self) -> Vec<&'static dyn Parameter> {
        vec![
            &CollisionSettings::SENSITIVITY,
            &CollisionSettings::MINIMUM_FORCE,
            &CollisionSettings::GRAIN_DURATION,
        ]
    }

    fn apply_update(&mut self, id: FourCC, update: &ParameterValueUpdate) -> bool {
        let (description, value) = match id {
            id if id == CollisionSettings::SENSITIVITY.id() => (
                &CollisionSettings::SENSITIVITY,
                &mut self.settings.sensitivity,
            ),
            id if id == CollisionSettings::MINIMUM_FORCE.id() => (
                &CollisionSettings::MINIMUM_FORCE,
                &mut self.settings.minimum_force,
            ),
            id if id == CollisionSettings::GRAIN_DURATION.id() => (
                &CollisionSettings::GRAIN_DURATION,
                &mut self.settings.grain_duration,
            ),
            _ => return false,
        };
        description.apply_update(value, update);
        true
    }
}

// -------------------------------------------------------------------------------------------------
