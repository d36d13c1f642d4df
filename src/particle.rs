//! Read-only particle snapshots, as delivered by the simulation on every tick.

// -------------------------------------------------------------------------------------------------

/// Stable, small integer id of a particle within the simulation.
///
/// Ids are used as indices into dense per-particle tables, so simulations should hand out slot
/// indices here and not e.g. random or ever growing numbers.
pub type ParticleId = usize;

// -------------------------------------------------------------------------------------------------

/// A collision of a particle with a particle of another (or the same) species in the current tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    /// Species index of the particle we collided with.
    pub other_species: usize,
    /// Collision force, as reported by the simulation.
    pub force: f32,
}

impl CollisionEvent {
    pub const fn new(other_species: usize, force: f32) -> Self {
        Self {
            other_species,
            force,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A single particle record of a simulation tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Particle {
    /// Stable id of the particle, see [`ParticleId`].
    pub id: ParticleId,
    /// Species (category) index. Each species is sonified by its own voice.
    pub species: usize,
    /// Position in simulation space.
    pub x: f32,
    pub y: f32,
    /// Velocity in simulation space units per tick.
    pub vx: f32,
    pub vy: f32,
    /// Particle radius.
    pub size: f32,
    /// Collisions which happened in the current tick.
    pub collisions: Vec<CollisionEvent>,
}

impl Particle {
    /// Create a new particle at the given position without velocity and collisions.
    pub fn new(id: ParticleId, species: usize, x: f32, y: f32) -> Self {
        Self {
            id,
            species,
            x,
            y,
            size: 5.0,
            ..Default::default()
        }
    }

    /// Builder style velocity setter.
    pub fn with_velocity(mut self, vx: f32, vy: f32) -> Self {
        self.vx = vx;
        self.vy = vy;
        self
    }

    /// Builder style size setter.
    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    /// Builder style collision setter.
    pub fn with_collision(mut self, other_species: usize, force: f32) -> Self {
        self.collisions
            .push(CollisionEvent::new(other_species, force));
        self
    }

    /// Magnitude of the particle's velocity.
    pub fn speed(&self) -> f32 {
        self.vx.hypot(self.vy)
    }
}

// -------------------------------------------------------------------------------------------------

/// Dimensions of the simulation space. Positions are expected in `0..width` and `0..height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceBounds {
    pub width: f32,
    pub height: f32,
}

impl SpaceBounds {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Normalized x position, clamped to `0..=1`.
    pub fn normalized_x(&self, x: f32) -> f32 {
        if self.width > 0.0 {
            (x / self.width).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Normalized y position, clamped to `0..=1`.
    pub fn normalized_y(&self, y: f32) -> f32 {
        if self.height > 0.0 {
            (y / self.height).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Default for SpaceBounds {
    fn default() -> Self {
        Self::new(800.0, 600.0)
    }
}

// -------------------------------------------------------------------------------------------------

/// Dense table of optional per-particle entries, indexed by [`ParticleId`].
#[derive(Debug, Clone)]
pub struct ParticleTable<T> {
    entries: Vec<Option<T>>,
    len: usize,
}

impl<T> Default for ParticleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ParticleTable<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            len: 0,
        }
    }

    /// Number of occupied entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, id: ParticleId) -> Option<&T> {
        self.entries.get(id).and_then(|e| e.as_ref())
    }

    /// Set an entry, returning the previous one.
    pub fn insert(&mut self, id: ParticleId, value: T) -> Option<T> {
        if id >= self.entries.len() {
            self.entries.resize_with(id + 1, || None);
        }
        let previous = self.entries[id].replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Remove an entry, returning it.
    pub fn remove(&mut self, id: ParticleId) -> Option<T> {
        let removed = self.entries.get_mut(id).and_then(|e| e.take());
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Keep only entries for which the given predicate returns true.
    pub fn retain(&mut self, mut predicate: impl FnMut(ParticleId, &mut T) -> bool) {
        for (id, entry) in self.entries.iter_mut().enumerate() {
            if let Some(value) = entry {
                if !predicate(id, value) {
                    *entry = None;
                    self.len -= 1;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_table() {
        let mut table = ParticleTable::new();
        assert!(table.is_empty());
        assert!(table.insert(4, "a").is_none());
        assert_eq!(table.insert(4, "b"), Some("a"));
        table.insert(1, "c");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(4), Some(&"b"));
        assert_eq!(table.get(2), None);
        assert_eq!(table.get(100), None);

        table.retain(|id, _| id != 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(1), None);
        assert_eq!(table.remove(4), Some("b"));
        assert!(table.is_empty());
    }

    #[test]
    fn bounds() {
        let bounds = SpaceBounds::new(200.0, 100.0);
        assert_eq!(bounds.normalized_x(50.0), 0.25);
        assert_eq!(bounds.normalized_x(-10.0), 0.0);
        assert_eq!(bounds.normalized_y(150.0), 1.0);
        assert_eq!(SpaceBounds::new(0.0, 0.0).normalized_x(10.0), 0.0);
    }

    #[test]
    fn particle_speed() {
        let particle = Particle::new(0, 0, 0.0, 0.0).with_velocity(3.0, 4.0);
        assert_eq!(particle.speed(), 5.0);
    }
}
