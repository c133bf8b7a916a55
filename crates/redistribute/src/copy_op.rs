//! Copy descriptor set filled by the caller.
//!
//! After locating each moved particle's new owner, the caller records one
//! descriptor per particle: where it goes, which source slot it came from,
//! and how many domain lengths to shift it on each periodic axis. A
//! destination of `-1` marks a particle that left the domain; it is
//! dropped, not copied.

use std::collections::btree_map;
use std::collections::BTreeMap;

use decomp::IntVect;

/// Destination value marking a dropped particle.
pub const DROPPED: i32 = -1;

/// Parallel descriptor arrays for one source box.
#[derive(Debug, Clone, Default)]
pub struct DescriptorBatch {
    /// Destination box id, or [`DROPPED`].
    pub dst_box: Vec<i32>,
    /// Source slot in the source box's tile.
    pub src_index: Vec<u32>,
    /// Periodic shift, one signed count of domain lengths per axis.
    pub shift: Vec<IntVect>,
}

impl DescriptorBatch {
    /// Number of descriptors in the batch.
    pub fn len(&self) -> usize {
        self.dst_box.len()
    }

    /// Return `true` if the batch holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.dst_box.is_empty()
    }

    /// Check the equal-length invariant across the three parallel arrays.
    pub fn assert_parallel(&self) {
        assert!(
            self.src_index.len() == self.dst_box.len()
                && self.shift.len() == self.dst_box.len(),
            "descriptor arrays have unequal lengths: {} dst, {} src, {} shift",
            self.dst_box.len(),
            self.src_index.len(),
            self.shift.len()
        );
    }
}

/// Per-source-box copy descriptors for one redistribution cycle.
#[derive(Debug, Clone, Default)]
pub struct CopyDescriptors {
    batches: BTreeMap<usize, DescriptorBatch>,
}

impl CopyDescriptors {
    /// Create an empty descriptor set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all descriptors, keeping allocations for reuse.
    pub fn clear(&mut self) {
        for batch in self.batches.values_mut() {
            batch.dst_box.clear();
            batch.src_index.clear();
            batch.shift.clear();
        }
    }

    /// Preallocate `n` descriptor slots for a source box.
    ///
    /// Slots start as dropped with zero shift; the caller fills them with
    /// [`CopyDescriptors::set`].
    pub fn resize(&mut self, gid: usize, n: usize) {
        let batch = self.batches.entry(gid).or_default();
        batch.dst_box.resize(n, DROPPED);
        batch.src_index.resize(n, 0);
        batch.shift.resize(n, [0; 3]);
    }

    /// Fill one descriptor slot for a source box.
    pub fn set(&mut self, gid: usize, i: usize, dst_box: i32, src_index: u32, shift: IntVect) {
        let batch = self
            .batches
            .get_mut(&gid)
            .expect("descriptor batch not resized before set");
        batch.dst_box[i] = dst_box;
        batch.src_index[i] = src_index;
        batch.shift[i] = shift;
    }

    /// Number of descriptors recorded for a source box.
    pub fn num_copies(&self, gid: usize) -> usize {
        self.batches.get(&gid).map_or(0, |b| b.len())
    }

    /// Descriptor batch for a source box, if any.
    pub fn batch(&self, gid: usize) -> Option<&DescriptorBatch> {
        self.batches.get(&gid)
    }

    /// Iterate over (source box id, batch) pairs in box id order.
    pub fn iter(&self) -> btree_map::Iter<'_, usize, DescriptorBatch> {
        self.batches.iter()
    }
}
