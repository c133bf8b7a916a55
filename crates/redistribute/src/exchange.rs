//! Cross-rank particle exchange driven by a built copy plan.
//!
//! Three phases so callers can overlap local work with messaging:
//! [`exchange_start`] posts all receives and sends and returns immediately,
//! [`exchange_finish`] blocks until the receive buffer is complete, and
//! [`unpack_remotes`] scatters the received blocks into destination tiles.

use bytemuck::Zeroable;

use decomp::BufferMap;

use crate::container::ParticleContainer;
use crate::pack::UnpackPolicy;
use crate::particle::{SuperParticle, RECORD_BYTES};
use crate::plan::CopyPlan;
use crate::transport::Transport;

/// Post all receives and sends for this cycle's remote traffic.
///
/// Returns the receive buffer sized for every expected inbound particle.
/// The buffer's contents are undefined until [`exchange_finish`] returns;
/// `snd_buffer` must be the packed buffer the plan was built against.
///
/// A no-op returning an empty buffer when there is one rank, the plan is
/// trivial, or this rank neither sends nor receives.
pub fn exchange_start<T: Transport>(
    transport: &T,
    plan: &mut CopyPlan,
    snd_buffer: &[SuperParticle],
    bmap: &BufferMap,
) -> Vec<SuperParticle> {
    if plan.is_trivial() || transport.num_ranks() == 1 {
        return Vec::new();
    }
    if plan.num_snds == 0 && plan.num_rcvs == 0 {
        return Vec::new();
    }

    let me = transport.rank();
    // The metadata handshake used the even tag; data rides the odd one.
    let data_tag = plan.tag + 1;

    // --- 1. Post one receive per sending rank, ascending ---
    plan.pending_rcvs = plan
        .rcv_from
        .iter()
        .map(|&r| transport.irecv(r, data_tag))
        .collect();

    // --- 2. Send each peer its contiguous bucket-range slice ---
    plan.pending_snds = (0..transport.num_ranks())
        .filter(|&r| r != me && plan.snd_counts[r] > 0)
        .map(|r| {
            let start = plan.box_offsets[bmap.first_bucket_on_rank(r)] as usize;
            let count = plan.snd_counts[r] as usize;
            let payload = bytemuck::cast_slice::<SuperParticle, u8>(
                &snd_buffer[start..start + count],
            )
            .to_vec();
            transport.isend(r, data_tag, payload)
        })
        .collect();

    tracing::debug!(
        "Exchange started: {} sends, {} receives posted",
        plan.pending_snds.len(),
        plan.pending_rcvs.len()
    );

    vec![SuperParticle::zeroed(); plan.num_rcvs as usize]
}

/// Block until every inbound message has landed in `rcv_buffer`.
///
/// Also waits out this cycle's sends so the plan can be rebuilt and the
/// transport's tag pair reused without a stale message surviving.
pub fn exchange_finish(plan: &mut CopyPlan, rcv_buffer: &mut [SuperParticle]) {
    assert_eq!(
        rcv_buffer.len(),
        plan.num_rcvs as usize,
        "receive buffer does not match the plan's inbound count"
    );

    let rcvs = std::mem::take(&mut plan.pending_rcvs);
    for (i, req) in rcvs.into_iter().enumerate() {
        let bytes = req.wait();
        let rank = plan.rcv_from[i];
        let count = plan.rcv_counts[rank] as usize;
        assert_eq!(
            bytes.len(),
            count * RECORD_BYTES,
            "rank {} sent {} bytes; the handshake promised {} particles",
            rank,
            bytes.len(),
            count
        );
        let offset = plan.rcv_offsets[i] as usize;
        let dst = &mut rcv_buffer[offset..offset + count];
        bytemuck::cast_slice_mut::<SuperParticle, u8>(dst).copy_from_slice(&bytes);
    }

    for req in std::mem::take(&mut plan.pending_snds) {
        req.wait();
    }
}

/// Scatter the completed receive buffer into destination tiles.
///
/// Blocks arrive ordered by (sender rank, destination bucket); each block
/// lands in its destination box's tile under `policy`.
pub fn unpack_remotes(
    pc: &mut ParticleContainer,
    plan: &CopyPlan,
    rcv_buffer: &[SuperParticle],
    policy: UnpackPolicy,
) {
    if plan.rcv_box_ids.is_empty() {
        return;
    }

    let sizes: Vec<usize> = plan.rcv_box_counts.iter().map(|&c| c as usize).collect();
    let level = pc.single_level_mut();
    let bases = policy.resize_tiles(level, &plan.rcv_box_ids, &sizes);

    for i in 0..plan.rcv_box_ids.len() {
        let tile = level
            .get_mut(&plan.rcv_box_ids[i])
            .expect("resized box vanished");
        let offset = plan.rcv_box_offsets[i] as usize;
        for k in 0..sizes[i] {
            tile.scatter(&rcv_buffer[offset + k], bases[i] + k);
        }
    }
    tracing::debug!(
        "Unpacked {} remote particles into {} blocks",
        plan.num_rcvs,
        plan.rcv_box_ids.len()
    );
}
