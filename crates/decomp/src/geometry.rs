//! Physical domain extents and per-axis periodicity.

use serde::{Deserialize, Serialize};

/// Physical description of the problem domain.
///
/// Consumed by the redistribution layer only to compute periodic position
/// shifts: a particle that crosses a periodic face is moved by one domain
/// length on that axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DomainGeometry {
    /// Physical lower corner of the domain.
    pub prob_lo: [f32; 3],
    /// Physical upper corner of the domain.
    pub prob_hi: [f32; 3],
    /// Whether each axis wraps periodically.
    #[serde(default)]
    pub periodic: [bool; 3],
}

impl DomainGeometry {
    /// Create a domain geometry from physical bounds and periodicity flags.
    pub fn new(prob_lo: [f32; 3], prob_hi: [f32; 3], periodic: [bool; 3]) -> Self {
        for d in 0..3 {
            assert!(
                prob_lo[d] < prob_hi[d],
                "domain has non-positive extent on axis {}",
                d
            );
        }
        Self {
            prob_lo,
            prob_hi,
            periodic,
        }
    }

    /// Return `true` if any axis is periodic.
    #[inline]
    pub fn is_any_periodic(&self) -> bool {
        self.periodic.iter().any(|&p| p)
    }

    /// Physical length of the domain along `dim`.
    #[inline]
    pub fn domain_length(&self, dim: usize) -> f32 {
        self.prob_hi[dim] - self.prob_lo[dim]
    }
}
