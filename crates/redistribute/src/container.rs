//! Per-level, per-box tile collection.

use std::collections::BTreeMap;

use crate::particle::ParticleTile;

/// Tiles of one refinement level, keyed by box id.
///
/// Only boxes owned by this rank have a tile.
pub type Level = BTreeMap<usize, ParticleTile>;

/// Particle storage for the boxes owned by this rank.
///
/// Redistribution always operates on exactly one refinement level;
/// callers holding a multi-level hierarchy redistribute one level at a
/// time. [`ParticleContainer::single_level`] enforces this as a fatal
/// precondition.
#[derive(Debug, Clone, Default)]
pub struct ParticleContainer {
    levels: Vec<Level>,
}

impl ParticleContainer {
    /// Create a single-level container with one empty tile per owned box.
    pub fn new(owned_boxes: &[usize]) -> Self {
        let mut level = Level::new();
        for &gid in owned_boxes {
            level.insert(gid, ParticleTile::new());
        }
        Self {
            levels: vec![level],
        }
    }

    /// Create a container with `num_levels` empty levels.
    pub fn with_levels(num_levels: usize) -> Self {
        Self {
            levels: vec![Level::new(); num_levels],
        }
    }

    /// Number of refinement levels held.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// The single level this container holds.
    ///
    /// Panics if the container holds more (or fewer) than one level.
    pub fn single_level(&self) -> &Level {
        assert_eq!(
            self.levels.len(),
            1,
            "redistribution requires a single-level container; got {} levels",
            self.levels.len()
        );
        &self.levels[0]
    }

    /// Mutable access to the single level this container holds.
    pub fn single_level_mut(&mut self) -> &mut Level {
        assert_eq!(
            self.levels.len(),
            1,
            "redistribution requires a single-level container; got {} levels",
            self.levels.len()
        );
        &mut self.levels[0]
    }

    /// Tile for an owned box on the single level.
    pub fn tile(&self, gid: usize) -> Option<&ParticleTile> {
        self.single_level().get(&gid)
    }

    /// Mutable tile for an owned box on the single level.
    pub fn tile_mut(&mut self, gid: usize) -> Option<&mut ParticleTile> {
        self.single_level_mut().get_mut(&gid)
    }

    /// Total primary particles across all owned tiles.
    pub fn total_particles(&self) -> usize {
        self.levels
            .iter()
            .flat_map(|l| l.values())
            .map(|t| t.num_particles())
            .sum()
    }
}
