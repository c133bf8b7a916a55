//! Packing into and unpacking out of the bucket-ordered copy buffer.
//!
//! Packing gathers each non-dropped descriptor's record, applies the
//! periodic position shift, and scatters it to the slot the plan resolved.
//! The resulting buffer is ordered by destination bucket, so per-rank
//! message payloads are contiguous slices of it.

use std::collections::BTreeMap;

use bytemuck::Zeroable;
use rayon::prelude::*;

use decomp::{BufferMap, DomainGeometry};

use crate::container::{Level, ParticleContainer};
use crate::copy_op::CopyDescriptors;
use crate::particle::SuperParticle;
use crate::plan::CopyPlan;

/// Where inbound records land in a destination tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackPolicy {
    /// Append records after the primaries as transient neighbor copies.
    /// The primary region is untouched.
    AppendAsNeighbor,
    /// Grow the primary region and take ownership of the records. One
    /// resize per tile even when several blocks target it. Fatal if the
    /// tile still holds neighbor copies.
    GrowPrimary,
}

impl UnpackPolicy {
    /// Grow each target tile for its inbound block and return the base
    /// slot each block scatters from.
    ///
    /// `gids` may repeat when several blocks target the same tile.
    pub(crate) fn resize_tiles(
        &self,
        level: &mut Level,
        gids: &[usize],
        sizes: &[usize],
    ) -> Vec<usize> {
        match self {
            UnpackPolicy::AppendAsNeighbor => gids
                .iter()
                .zip(sizes)
                .map(|(&gid, &n)| {
                    let tile = level
                        .get_mut(&gid)
                        .expect("unpack target box not owned by this rank");
                    let base = tile.num_total();
                    tile.set_num_neighbors(tile.num_neighbors() + n);
                    base
                })
                .collect(),
            UnpackPolicy::GrowPrimary => {
                // Plan all block bases first, then resize each tile once.
                let mut planned: BTreeMap<usize, usize> = BTreeMap::new();
                let mut bases = Vec::with_capacity(gids.len());
                for (&gid, &n) in gids.iter().zip(sizes) {
                    let tile = level
                        .get(&gid)
                        .expect("unpack target box not owned by this rank");
                    assert_eq!(
                        tile.num_neighbors(),
                        0,
                        "cannot grow primaries of box {} while neighbor copies are present",
                        gid
                    );
                    let extra = planned.entry(gid).or_insert(0);
                    bases.push(tile.num_particles() + *extra);
                    *extra += n;
                }
                for (&gid, &extra) in &planned {
                    let tile = level.get_mut(&gid).expect("planned box vanished");
                    let n = tile.num_particles();
                    tile.resize(n + extra);
                }
                bases
            }
        }
    }
}

/// Gather every non-dropped descriptor into the bucket-ordered buffer.
///
/// The periodic shift moves each crossing particle by whole domain
/// lengths so its position is valid in the destination box's frame.
/// Shifts on non-periodic axes are ignored.
pub fn pack_buffer(
    pc: &ParticleContainer,
    op: &CopyDescriptors,
    plan: &CopyPlan,
    bmap: &BufferMap,
    geom: &DomainGeometry,
) -> Vec<SuperParticle> {
    if plan.is_trivial() {
        return Vec::new();
    }

    let offsets = plan.box_offsets();
    let total = offsets[offsets.len() - 1] as usize;
    let mut buffer = vec![SuperParticle::zeroed(); total];

    for (&gid, batch) in op.iter() {
        let tile = pc.tile(gid).expect("descriptor batch for unowned box");
        let slots = plan.slots(gid);

        // --- 1. Gather and shift in parallel ---
        let packed: Vec<(u32, SuperParticle)> = (0..batch.len())
            .into_par_iter()
            .filter(|&i| batch.dst_box[i] >= 0)
            .map(|i| {
                let mut sp = tile.gather(batch.src_index[i] as usize);
                let shift = batch.shift[i];
                for d in 0..3 {
                    if geom.periodic[d] && shift[d] != 0 {
                        sp.pos[d] += shift[d] as f32 * geom.domain_length(d);
                    }
                }
                let dst_idx = offsets[bmap.bucket(batch.dst_box[i] as usize)] + slots[i];
                (dst_idx, sp)
            })
            .collect();

        // --- 2. Scatter to the resolved slots ---
        for (dst_idx, sp) in packed {
            buffer[dst_idx as usize] = sp;
        }
    }

    tracing::debug!("Packed {} particles into the copy buffer", total);
    buffer
}

/// Unpack the locally-destined portion of the packed buffer.
///
/// Walks this rank's owned boxes in bucket order and scatters each box's
/// block out of `buffer` according to `policy`. Blocks destined for other
/// ranks are left for the exchange to carry.
pub fn unpack_buffer(
    pc: &mut ParticleContainer,
    plan: &CopyPlan,
    bmap: &BufferMap,
    buffer: &[SuperParticle],
    policy: UnpackPolicy,
) {
    if plan.is_trivial() {
        return;
    }

    let owned: Vec<usize> = pc.single_level().keys().copied().collect();
    let mut gids = Vec::new();
    let mut sizes = Vec::new();
    let mut offsets = Vec::new();
    for gid in owned {
        let bucket = bmap.bucket(gid);
        let count = plan.box_counts()[bucket] as usize;
        if count == 0 {
            continue;
        }
        gids.push(gid);
        sizes.push(count);
        offsets.push(plan.box_offsets()[bucket] as usize);
    }

    let level = pc.single_level_mut();
    let bases = policy.resize_tiles(level, &gids, &sizes);
    let mut unpacked = 0usize;
    for i in 0..gids.len() {
        let tile = level.get_mut(&gids[i]).expect("resized box vanished");
        for k in 0..sizes[i] {
            tile.scatter(&buffer[offsets[i] + k], bases[i] + k);
        }
        unpacked += sizes[i];
    }
    tracing::debug!("Unpacked {} locally-destined particles", unpacked);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::HandshakeMode;
    use crate::transport::LocalTransport;
    use decomp::{BoxArray, DistributionMap, IndexBox};

    fn record(id: u32, x: f32) -> SuperParticle {
        SuperParticle {
            pos: [x, 1.0, 1.0],
            vel: [0.5, 0.0, 0.0],
            mass: 2.0,
            id,
        }
    }

    fn setup() -> (BoxArray, BufferMap, DomainGeometry, LocalTransport) {
        let ba = BoxArray::new(vec![
            IndexBox::new([0, 0, 0], [3, 3, 3]),
            IndexBox::new([4, 0, 0], [7, 3, 3]),
        ]);
        let dmap = DistributionMap::new(vec![0, 0], 1);
        let bmap = BufferMap::new(&dmap);
        let geom = DomainGeometry::new([0.0; 3], [8.0, 4.0, 4.0], [true, false, false]);
        let transport = LocalTransport::cluster(1).pop().unwrap();
        (ba, bmap, geom, transport)
    }

    #[test]
    fn pack_applies_periodic_shift_and_layout() {
        let (ba, bmap, geom, transport) = setup();
        let mut pc = ParticleContainer::new(&[0, 1]);
        pc.tile_mut(0).unwrap().push(record(1, 0.25)); // wraps to high side
        pc.tile_mut(0).unwrap().push(record(2, 3.5)); // stays put

        let mut op = CopyDescriptors::new();
        op.resize(0, 2);
        op.set(0, 0, 1, 0, [1, 0, 2]); // z shift must be ignored (not periodic)
        op.set(0, 1, 0, 1, [0; 3]);

        let plan = CopyPlan::build(
            &pc,
            &op,
            &ba,
            &bmap,
            &geom,
            &transport,
            HandshakeMode::Local,
            &[],
        );
        let buffer = pack_buffer(&pc, &op, &plan, &bmap, &geom);

        assert_eq!(buffer.len(), 2);
        // Bucket 0 block first, bucket 1 block after it.
        assert_eq!(buffer[0].id, 2);
        assert_eq!(buffer[0].pos[0], 3.5);
        assert_eq!(buffer[1].id, 1);
        assert_eq!(buffer[1].pos[0], 0.25 + 8.0);
        assert_eq!(buffer[1].pos[2], 1.0, "non-periodic axis must not shift");
    }

    #[test]
    fn dropped_descriptors_are_not_packed() {
        let (ba, bmap, geom, transport) = setup();
        let mut pc = ParticleContainer::new(&[0, 1]);
        pc.tile_mut(0).unwrap().push(record(1, 1.0));
        pc.tile_mut(0).unwrap().push(record(2, 2.0));

        let mut op = CopyDescriptors::new();
        op.resize(0, 2);
        op.set(0, 0, -1, 0, [0; 3]);
        op.set(0, 1, 1, 1, [0; 3]);

        let plan = CopyPlan::build(
            &pc,
            &op,
            &ba,
            &bmap,
            &geom,
            &transport,
            HandshakeMode::Local,
            &[],
        );
        let buffer = pack_buffer(&pc, &op, &plan, &bmap, &geom);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].id, 2);
    }

    #[test]
    fn grow_primary_takes_ownership() {
        let (ba, bmap, geom, transport) = setup();
        let mut pc = ParticleContainer::new(&[0, 1]);
        pc.tile_mut(0).unwrap().push(record(1, 1.0));
        pc.tile_mut(1).unwrap().push(record(2, 5.0));

        // Move particle 2 from box 1 into box 0.
        let mut op = CopyDescriptors::new();
        op.resize(1, 1);
        op.set(1, 0, 0, 0, [0; 3]);

        let plan = CopyPlan::build(
            &pc,
            &op,
            &ba,
            &bmap,
            &geom,
            &transport,
            HandshakeMode::Local,
            &[],
        );
        let buffer = pack_buffer(&pc, &op, &plan, &bmap, &geom);
        unpack_buffer(&mut pc, &plan, &bmap, &buffer, UnpackPolicy::GrowPrimary);

        let tile = pc.tile(0).unwrap();
        assert_eq!(tile.num_particles(), 2);
        assert_eq!(tile.num_neighbors(), 0);
        assert_eq!(tile.gather(1).id, 2);
    }

    #[test]
    fn append_as_neighbor_keeps_primaries() {
        let (ba, bmap, geom, transport) = setup();
        let mut pc = ParticleContainer::new(&[0, 1]);
        pc.tile_mut(0).unwrap().push(record(1, 1.0));
        pc.tile_mut(1).unwrap().push(record(2, 5.0));

        let mut op = CopyDescriptors::new();
        op.resize(1, 1);
        op.set(1, 0, 0, 0, [0; 3]);

        let plan = CopyPlan::build(
            &pc,
            &op,
            &ba,
            &bmap,
            &geom,
            &transport,
            HandshakeMode::Local,
            &[],
        );
        let buffer = pack_buffer(&pc, &op, &plan, &bmap, &geom);
        unpack_buffer(
            &mut pc,
            &plan,
            &bmap,
            &buffer,
            UnpackPolicy::AppendAsNeighbor,
        );

        let tile = pc.tile(0).unwrap();
        assert_eq!(tile.num_particles(), 1);
        assert_eq!(tile.num_neighbors(), 1);
        assert_eq!(tile.gather(1).id, 2);
    }

    #[test]
    fn grow_primary_resizes_each_tile_once_for_repeated_blocks() {
        let mut level = Level::new();
        let mut tile = crate::particle::ParticleTile::new();
        tile.push(record(1, 1.0));
        level.insert(0, tile);

        // Two blocks for the same tile, as two senders would produce.
        let bases =
            UnpackPolicy::GrowPrimary.resize_tiles(&mut level, &[0, 0], &[2, 3]);
        assert_eq!(bases, vec![1, 3]);
        assert_eq!(level[&0].num_particles(), 6);
    }

    #[test]
    #[should_panic(expected = "neighbor copies are present")]
    fn grow_primary_with_neighbors_is_fatal() {
        let mut level = Level::new();
        let mut tile = crate::particle::ParticleTile::new();
        tile.push(record(1, 1.0));
        tile.set_num_neighbors(1);
        level.insert(0, tile);
        let _ = UnpackPolicy::GrowPrimary.resize_tiles(&mut level, &[0], &[1]);
    }

    #[test]
    fn trivial_plan_packs_nothing() {
        let ba = BoxArray::new(vec![IndexBox::new([0, 0, 0], [7, 7, 7])]);
        let dmap = DistributionMap::new(vec![0], 1);
        let bmap = BufferMap::new(&dmap);
        let geom = DomainGeometry::new([0.0; 3], [8.0; 3], [false; 3]);
        let transport = LocalTransport::cluster(1).pop().unwrap();
        let mut pc = ParticleContainer::new(&[0]);
        pc.tile_mut(0).unwrap().push(record(1, 1.0));

        let op = CopyDescriptors::new();
        let plan = CopyPlan::build(
            &pc,
            &op,
            &ba,
            &bmap,
            &geom,
            &transport,
            HandshakeMode::Local,
            &[],
        );
        assert!(plan.is_trivial());
        let buffer = pack_buffer(&pc, &op, &plan, &bmap, &geom);
        assert!(buffer.is_empty());
        unpack_buffer(&mut pc, &plan, &bmap, &buffer, UnpackPolicy::GrowPrimary);
        assert_eq!(pc.tile(0).unwrap().num_particles(), 1);
    }
}
