//! Fixed-size superparticle record and tile storage.
//!
//! Tiles use struct-of-arrays layout for SIMD lane utilization and
//! straightforward GPU buffer mapping; the wire format is the packed
//! `SuperParticle` record, gathered from and scattered back into the
//! parallel arrays.

use bytemuck::{Pod, Zeroable};

/// Self-contained serialized particle state.
///
/// `#[repr(C)]` with no padding: the fixed record size is what lets every
/// message byte count be derived exactly from a particle count.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SuperParticle {
    /// Position (meters).
    pub pos: [f32; 3],
    /// Velocity (m/s).
    pub vel: [f32; 3],
    /// Particle mass (kg).
    pub mass: f32,
    /// Stable particle identifier.
    pub id: u32,
}

/// Size in bytes of one serialized particle record.
pub const RECORD_BYTES: usize = std::mem::size_of::<SuperParticle>();

/// Struct-of-arrays particle storage for one box.
///
/// All arrays are parallel: index `i` across every array refers to the
/// same particle. The first `num_particles` entries are owned (primary)
/// particles; `num_neighbors` transient neighbor copies follow them.
#[derive(Debug, Clone, Default)]
pub struct ParticleTile {
    /// X positions (meters)
    pub x: Vec<f32>,
    /// Y positions (meters)
    pub y: Vec<f32>,
    /// Z positions (meters)
    pub z: Vec<f32>,
    /// X velocities (m/s)
    pub vx: Vec<f32>,
    /// Y velocities (m/s)
    pub vy: Vec<f32>,
    /// Z velocities (m/s)
    pub vz: Vec<f32>,
    /// Particle mass (kg)
    pub mass: Vec<f32>,
    /// Stable particle identifiers
    pub id: Vec<u32>,
    num_particles: usize,
    num_neighbors: usize,
}

impl ParticleTile {
    /// Create an empty tile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of owned (primary) particles.
    #[inline]
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }

    /// Number of transient neighbor copies stored after the primaries.
    #[inline]
    pub fn num_neighbors(&self) -> usize {
        self.num_neighbors
    }

    /// Total stored records, primaries plus neighbors.
    #[inline]
    pub fn num_total(&self) -> usize {
        self.num_particles + self.num_neighbors
    }

    /// Append one owned particle.
    pub fn push(&mut self, sp: SuperParticle) {
        assert_eq!(
            self.num_neighbors, 0,
            "cannot append primaries while neighbor copies are present"
        );
        self.x.push(sp.pos[0]);
        self.y.push(sp.pos[1]);
        self.z.push(sp.pos[2]);
        self.vx.push(sp.vel[0]);
        self.vy.push(sp.vel[1]);
        self.vz.push(sp.vel[2]);
        self.mass.push(sp.mass);
        self.id.push(sp.id);
        self.num_particles += 1;
    }

    /// Resize the primary region to `n` particles.
    ///
    /// New slots are zero-filled and expected to be overwritten by
    /// `scatter` before use.
    pub fn resize(&mut self, n: usize) {
        assert_eq!(
            self.num_neighbors, 0,
            "cannot resize primaries while neighbor copies are present"
        );
        self.num_particles = n;
        self.resize_storage(n);
    }

    /// Set the neighbor copy count, growing or shrinking total storage.
    pub fn set_num_neighbors(&mut self, nn: usize) {
        self.num_neighbors = nn;
        self.resize_storage(self.num_particles + nn);
    }

    fn resize_storage(&mut self, total: usize) {
        self.x.resize(total, 0.0);
        self.y.resize(total, 0.0);
        self.z.resize(total, 0.0);
        self.vx.resize(total, 0.0);
        self.vy.resize(total, 0.0);
        self.vz.resize(total, 0.0);
        self.mass.resize(total, 0.0);
        self.id.resize(total, 0);
    }

    /// Gather slot `i` into a self-contained record.
    #[inline]
    pub fn gather(&self, i: usize) -> SuperParticle {
        SuperParticle {
            pos: [self.x[i], self.y[i], self.z[i]],
            vel: [self.vx[i], self.vy[i], self.vz[i]],
            mass: self.mass[i],
            id: self.id[i],
        }
    }

    /// Scatter a record back into slot `i`.
    #[inline]
    pub fn scatter(&mut self, sp: &SuperParticle, i: usize) {
        self.x[i] = sp.pos[0];
        self.y[i] = sp.pos[1];
        self.z[i] = sp.pos[2];
        self.vx[i] = sp.vel[0];
        self.vy[i] = sp.vel[1];
        self.vz[i] = sp.vel[2];
        self.mass[i] = sp.mass;
        self.id[i] = sp.id;
    }
}
