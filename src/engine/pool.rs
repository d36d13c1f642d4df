use crate::{
    engine::TriggerMode,
    mapping::GrainTargets,
    output::{LivenessToken, NodeId},
    particle::ParticleId,
};

// -------------------------------------------------------------------------------------------------

/// Identifies a grain within a [`GrainPool`].
///
/// Ids of removed grains never match new grains which reuse the same pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrainId {
    index: u32,
    generation: u32,
}

impl GrainId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

// -------------------------------------------------------------------------------------------------

/// Output nodes of a single grain: `source -> gain -> pan -> voice bus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrainNodes {
    pub source: NodeId,
    pub gain: NodeId,
    pub pan: NodeId,
}

// -------------------------------------------------------------------------------------------------

/// A playing grain.
#[derive(Debug, Clone)]
pub struct Grain {
    pub id: GrainId,
    /// The trigger policy which created the grain.
    pub mode: TriggerMode,
    /// The particle which triggered the grain. Particles may vanish while their grains play.
    pub particle: ParticleId,
    /// Output time at which the grain started playing.
    pub start: f64,
    /// Playback duration in seconds.
    pub duration: f64,
    /// Target (sustain) gain of the grain's envelope.
    pub gain: f32,
    /// Signed playback rate.
    pub playback_rate: f64,
    /// Liveness flag, shared with the grain's pending completion notification.
    pub token: LivenessToken,
    pub nodes: GrainNodes,
    /// Last scheduled audio parameter targets.
    pub targets: GrainTargets,
}

// -------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    grain: Option<Grain>,
}

/// Bounded collection of playing grains.
///
/// Grains are stored in a slot arena: insertion and removal by [`GrainId`] are O(1), and slots
/// of removed grains get reused without allocations.
#[derive(Debug)]
pub struct GrainPool {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    len: usize,
    max_grains: usize,
}

impl GrainPool {
    pub fn new(max_grains: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_grains),
            free_slots: Vec::with_capacity(max_grains),
            len: 0,
            max_grains,
        }
    }

    /// Number of live grains.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.max_grains
    }

    pub fn max_grains(&self) -> usize {
        self.max_grains
    }

    /// Change the pool's capacity. When shrinking below the number of live grains, the oldest
    /// grains get removed from the pool and are returned, so they can be stopped.
    #[must_use]
    pub fn set_max_grains(&mut self, max_grains: usize) -> Vec<Grain> {
        self.max_grains = max_grains;
        if self.len <= max_grains {
            return Vec::new();
        }
        let mut by_age = self.iter().map(|g| (g.start, g.id)).collect::<Vec<_>>();
        by_age.sort_by(|a, b| a.0.total_cmp(&b.0));
        let excess = self.len - max_grains;
        by_age
            .into_iter()
            .take(excess)
            .filter_map(|(_, id)| self.remove(id))
            .collect()
    }

    /// Insert a new grain, created with the id it gets assigned. Declines (returns None without
    /// calling `create`) when the pool is full.
    pub fn insert_with(&mut self, create: impl FnOnce(GrainId) -> Grain) -> Option<GrainId> {
        if self.is_full() {
            log::trace!("Grain pool exhausted ({} grains)", self.max_grains);
            return None;
        }
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = GrainId::new(index, slot.generation);
        let grain = create(id);
        debug_assert_eq!(grain.id, id, "Grain must use the assigned id");
        slot.grain = Some(grain);
        self.len += 1;
        Some(id)
    }

    /// Remove a grain, killing its liveness token. Removing an already removed grain is a no-op.
    pub fn remove(&mut self, id: GrainId) -> Option<Grain> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let grain = slot.grain.take()?;
        grain.token.kill();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index);
        self.len -= 1;
        Some(grain)
    }

    pub fn contains(&self, id: GrainId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: GrainId) -> Option<&Grain> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.grain.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grain> {
        self.slots.iter().filter_map(|slot| slot.grain.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Grain> {
        self.slots.iter_mut().filter_map(|slot| slot.grain.as_mut())
    }

    /// Remove all grains, killing their liveness tokens.
    #[must_use]
    pub fn drain(&mut self) -> Vec<Grain> {
        let ids = self.iter().map(|g| g.id).collect::<Vec<_>>();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

// -------------------------------------------------------------------------------------------------
