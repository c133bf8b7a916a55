//! Integer index-space boxes and the global box array.

use serde::{Deserialize, Serialize};

/// A point in 3D integer index space.
pub type IntVect = [i32; 3];

/// Axis-aligned rectangular region of index space, inclusive on both ends.
///
/// Boxes are immutable once created and are the unit of domain
/// decomposition: the global index space is covered by a set of
/// non-overlapping boxes, each owned by one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexBox {
    lo: IntVect,
    hi: IntVect,
}

impl IndexBox {
    /// Create a box spanning `[lo, hi]` inclusive.
    pub fn new(lo: IntVect, hi: IntVect) -> Self {
        for d in 0..3 {
            assert!(
                lo[d] <= hi[d],
                "degenerate box: lo {:?} exceeds hi {:?} on axis {}",
                lo,
                hi,
                d
            );
        }
        Self { lo, hi }
    }

    /// Lower (inclusive) corner.
    #[inline]
    pub fn lo(&self) -> IntVect {
        self.lo
    }

    /// Upper (inclusive) corner.
    #[inline]
    pub fn hi(&self) -> IntVect {
        self.hi
    }

    /// Per-axis extent in cells (`hi - lo + 1`).
    #[inline]
    pub fn length(&self) -> IntVect {
        [
            self.hi[0] - self.lo[0] + 1,
            self.hi[1] - self.lo[1] + 1,
            self.hi[2] - self.lo[2] + 1,
        ]
    }

    /// Total number of cells covered by the box.
    pub fn num_cells(&self) -> u64 {
        let len = self.length();
        len[0] as u64 * len[1] as u64 * len[2] as u64
    }

    /// Inclusive containment test for a single cell.
    #[inline]
    pub fn contains(&self, iv: IntVect) -> bool {
        (0..3).all(|d| self.lo[d] <= iv[d] && iv[d] <= self.hi[d])
    }
}

/// Ordered global list of boxes, identical on every rank.
///
/// Box ids are positions in this list. The decomposition is assumed
/// non-overlapping; this is not enforced here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoxArray {
    boxes: Vec<IndexBox>,
}

impl BoxArray {
    /// Build a box array from an ordered list of boxes.
    pub fn new(boxes: Vec<IndexBox>) -> Self {
        Self { boxes }
    }

    /// Number of boxes in the decomposition.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Return `true` if the array holds no boxes.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// The box with the given id.
    #[inline]
    pub fn get(&self, gid: usize) -> IndexBox {
        self.boxes[gid]
    }

    /// Iterate over all boxes in id order.
    pub fn iter(&self) -> std::slice::Iter<'_, IndexBox> {
        self.boxes.iter()
    }

    /// Boxes as a slice.
    pub fn as_slice(&self) -> &[IndexBox] {
        &self.boxes
    }
}
