//! Copy plan construction and the two handshake protocols.
//!
//! A plan consolidates one cycle's copy descriptors into a contiguous
//! bucket-ordered buffer layout plus a cross-rank send/receive schedule.
//! Slot resolution is the single intra-process synchronization point:
//! a wait-free atomic fetch-and-add per destination bucket guarantees that
//! no two particles share a slot and none are lost, regardless of the
//! order parallel workers run in.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use decomp::{BoxArray, BufferMap, DomainGeometry};

use crate::container::ParticleContainer;
use crate::copy_op::CopyDescriptors;
use crate::transport::{RecvRequest, SendRequest, Transport};

/// How ranks learn their inbound message sizes before data moves.
///
/// A static configuration decision, resolved once per plan construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeMode {
    /// Point-to-point size exchange restricted to a known neighbor-rank
    /// set. Cost scales with the neighbor count.
    Local,
    /// Collective all-to-all of totals followed by point-to-point size
    /// metadata. Cost scales with the total rank count, but works when
    /// the neighbor set is unknown.
    Global,
}

/// Buffer layout and communication schedule for one redistribution cycle.
///
/// Caller-owned: its lifetime must span `exchange_start` through
/// `exchange_finish`, and concurrent redistributions (e.g. over different
/// refinement levels) need distinct plan instances.
#[derive(Default)]
pub struct CopyPlan {
    /// Resolved destination slot within its bucket, per descriptor.
    pub(crate) dst_slots: BTreeMap<usize, Vec<u32>>,
    /// Outgoing particles per destination bucket (local descriptors only).
    pub(crate) box_counts: Vec<u32>,
    /// Exclusive prefix sum of `box_counts`; length `num_buckets + 1`.
    pub(crate) box_offsets: Vec<u32>,
    /// Outgoing particles per destination rank.
    pub(crate) snd_counts: Vec<u64>,
    /// Inbound particles per source rank (from the handshake).
    pub(crate) rcv_counts: Vec<u64>,
    /// Source ranks with nonzero inbound counts, ascending.
    pub(crate) rcv_from: Vec<usize>,
    /// Receive-buffer particle offset per entry of `rcv_from`.
    pub(crate) rcv_offsets: Vec<u64>,
    /// Destination box id per inbound (sender, bucket) block.
    pub(crate) rcv_box_ids: Vec<usize>,
    /// Inbound particles per entry of `rcv_box_ids`.
    pub(crate) rcv_box_counts: Vec<u32>,
    /// Receive-buffer particle offset per entry of `rcv_box_ids`.
    pub(crate) rcv_box_offsets: Vec<u32>,
    /// Outgoing particles bound for other ranks.
    pub(crate) num_snds: u64,
    /// Inbound particles expected from other ranks.
    pub(crate) num_rcvs: u64,
    /// Tag pair base for this exchange.
    pub(crate) tag: u16,
    /// Pending receive handles posted by `exchange_start`.
    pub(crate) pending_rcvs: Vec<RecvRequest>,
    /// Pending send handles posted by `exchange_start`.
    pub(crate) pending_snds: Vec<SendRequest>,
    trivial: bool,
}

impl CopyPlan {
    /// Build a plan from one cycle's copy descriptors.
    ///
    /// `neighbor_ranks` lists the ranks this rank can possibly exchange
    /// particles with; it is consulted only in [`HandshakeMode::Local`].
    /// Fatal preconditions: the container must hold a single level, every
    /// descriptor batch must belong to an owned box, and in local mode no
    /// particle may target a rank outside the neighbor set.
    #[allow(clippy::too_many_arguments)]
    pub fn build<T: Transport>(
        pc: &ParticleContainer,
        op: &CopyDescriptors,
        ba: &BoxArray,
        bmap: &BufferMap,
        geom: &DomainGeometry,
        transport: &T,
        mode: HandshakeMode,
        neighbor_ranks: &[usize],
    ) -> Self {
        let level = pc.single_level();
        let num_buckets = bmap.num_buckets();
        assert_eq!(
            ba.len(),
            num_buckets,
            "box array and buffer map disagree on decomposition size"
        );

        let mut plan = CopyPlan {
            tag: transport.next_tag(),
            ..CopyPlan::default()
        };

        // No redistribution is possible with one box and no periodic axis.
        if ba.len() == 1 && !geom.is_any_periodic() {
            plan.trivial = true;
            return plan;
        }

        // --- 1. Resolve a unique slot per non-dropped descriptor ---
        let counts: Vec<AtomicU32> = (0..num_buckets).map(|_| AtomicU32::new(0)).collect();
        for (&gid, batch) in op.iter() {
            assert!(
                level.contains_key(&gid),
                "descriptor batch for box {} not owned by this rank",
                gid
            );
            batch.assert_parallel();
            let mut slots = vec![u32::MAX; batch.len()];
            batch
                .dst_box
                .par_iter()
                .zip(slots.par_iter_mut())
                .for_each(|(&dst, slot)| {
                    if dst < 0 {
                        return;
                    }
                    let bucket = bmap.bucket(dst as usize);
                    *slot = counts[bucket].fetch_add(1, Ordering::Relaxed);
                });
            plan.dst_slots.insert(gid, slots);
        }
        plan.box_counts = counts.into_iter().map(AtomicU32::into_inner).collect();

        // --- 2. Exclusive prefix sum into the shared buffer layout ---
        plan.box_offsets = vec![0u32; num_buckets + 1];
        let mut running = 0u64;
        for (bucket, &count) in plan.box_counts.iter().enumerate() {
            plan.box_offsets[bucket] = running as u32;
            running += count as u64;
            assert!(
                running <= i32::MAX as u64,
                "bucket particle counts exceed the representable element range"
            );
        }
        plan.box_offsets[num_buckets] = running as u32;

        // --- 3. Per-rank outgoing counts over contiguous bucket ranges ---
        let num_ranks = transport.num_ranks();
        let me = transport.rank();
        plan.snd_counts = (0..num_ranks)
            .map(|r| {
                bmap.bucket_range(r)
                    .map(|b| plan.box_counts[b] as u64)
                    .sum()
            })
            .collect();
        plan.num_snds = (0..num_ranks)
            .filter(|&r| r != me)
            .map(|r| plan.snd_counts[r])
            .sum();

        // --- 4. Handshake inbound sizes across ranks ---
        if num_ranks > 1 {
            plan.handshake(transport, bmap, mode, neighbor_ranks);
        } else {
            plan.rcv_counts = vec![0];
        }

        tracing::debug!(
            "Copy plan built: {} buckets, {} local copies, {} outbound, {} inbound",
            num_buckets,
            running - plan.num_snds,
            plan.num_snds,
            plan.num_rcvs
        );

        plan
    }

    /// Learn per-sender inbound counts and derive receive bookkeeping.
    fn handshake<T: Transport>(
        &mut self,
        transport: &T,
        bmap: &BufferMap,
        mode: HandshakeMode,
        neighbor_ranks: &[usize],
    ) {
        let me = transport.rank();
        let num_ranks = transport.num_ranks();

        let inbound = match mode {
            HandshakeMode::Local => self.handshake_local(transport, bmap, neighbor_ranks),
            HandshakeMode::Global => self.handshake_global(transport, bmap),
        };

        // Derive totals, receive offsets, and the per-box blocks used by
        // unpack_remotes. Messages arrive ordered by (sender rank, bucket),
        // so a single ascending scan yields prefix offsets directly.
        let my_range = bmap.bucket_range(me);
        self.rcv_counts = vec![0u64; num_ranks];
        let mut total = 0u64;
        for (r, counts) in inbound.iter().enumerate() {
            let counts = match counts {
                Some(c) => c,
                None => continue,
            };
            assert_eq!(
                counts.len(),
                my_range.len(),
                "rank {} sent size metadata for {} buckets; this rank owns {}",
                r,
                counts.len(),
                my_range.len()
            );
            let subtotal: u64 = counts.iter().map(|&c| c as u64).sum();
            if subtotal == 0 {
                continue;
            }
            self.rcv_counts[r] = subtotal;
            self.rcv_from.push(r);
            self.rcv_offsets.push(total);
            for (k, &count) in counts.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                self.rcv_box_ids
                    .push(bmap.box_of_bucket(my_range.start + k));
                self.rcv_box_counts.push(count);
                self.rcv_box_offsets.push(total as u32);
                total += count as u64;
                assert!(
                    total <= i32::MAX as u64,
                    "inbound particle counts exceed the representable element range"
                );
            }
        }
        self.num_rcvs = total;
    }

    /// Point-to-point size exchange over the known neighbor set.
    fn handshake_local<T: Transport>(
        &self,
        transport: &T,
        bmap: &BufferMap,
        neighbor_ranks: &[usize],
    ) -> Vec<Option<Vec<u32>>> {
        let me = transport.rank();
        let num_ranks = transport.num_ranks();

        // Every outbound particle must target a neighbor, or the local
        // handshake would silently lose it on the receive side.
        for r in 0..num_ranks {
            if r == me || neighbor_ranks.contains(&r) {
                continue;
            }
            assert_eq!(
                self.snd_counts[r], 0,
                "local handshake: {} particles target rank {} outside the neighbor set",
                self.snd_counts[r], r
            );
        }

        let rreqs: Vec<(usize, RecvRequest)> = neighbor_ranks
            .iter()
            .map(|&p| (p, transport.irecv(p, self.tag)))
            .collect();
        let sreqs: Vec<SendRequest> = neighbor_ranks
            .iter()
            .map(|&p| transport.isend(p, self.tag, self.bucket_counts_for(bmap, p)))
            .collect();

        let mut inbound = (0..num_ranks).map(|_| None).collect::<Vec<_>>();
        for (p, req) in rreqs {
            let bytes = req.wait();
            inbound[p] = Some(bytemuck::cast_slice::<u8, u32>(&bytes).to_vec());
        }
        for s in sreqs {
            s.wait();
        }
        inbound
    }

    /// Collective exchange of totals, then point-to-point size metadata.
    fn handshake_global<T: Transport>(
        &self,
        transport: &T,
        bmap: &BufferMap,
    ) -> Vec<Option<Vec<u32>>> {
        let me = transport.rank();
        let num_ranks = transport.num_ranks();

        // totals[r] = how many particles rank r is sending to this rank.
        let totals = transport.alltoall_counts(&self.snd_counts);

        let rreqs: Vec<(usize, RecvRequest)> = (0..num_ranks)
            .filter(|&r| r != me && totals[r] > 0)
            .map(|r| (r, transport.irecv(r, self.tag)))
            .collect();
        let sreqs: Vec<SendRequest> = (0..num_ranks)
            .filter(|&r| r != me && self.snd_counts[r] > 0)
            .map(|r| transport.isend(r, self.tag, self.bucket_counts_for(bmap, r)))
            .collect();

        let mut inbound = (0..num_ranks).map(|_| None).collect::<Vec<_>>();
        for (r, req) in rreqs {
            let bytes = req.wait();
            let counts = bytemuck::cast_slice::<u8, u32>(&bytes).to_vec();
            let subtotal: u64 = counts.iter().map(|&c| c as u64).sum();
            assert_eq!(
                subtotal, totals[r],
                "rank {} metadata disagrees with its all-to-all total",
                r
            );
            inbound[r] = Some(counts);
        }
        for s in sreqs {
            s.wait();
        }
        inbound
    }

    /// Serialized per-bucket counts over a peer's bucket range.
    fn bucket_counts_for(&self, bmap: &BufferMap, peer: usize) -> Vec<u8> {
        bytemuck::cast_slice::<u32, u8>(&self.box_counts[bmap.bucket_range(peer)]).to_vec()
    }

    /// Return `true` if this plan performs no redistribution at all.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.trivial
    }

    /// Outgoing particles per destination bucket (local descriptors only).
    pub fn box_counts(&self) -> &[u32] {
        &self.box_counts
    }

    /// Exclusive prefix-sum bucket offsets; the send buffer layout.
    pub fn box_offsets(&self) -> &[u32] {
        &self.box_offsets
    }

    /// Inbound particles per source rank, as learned by the handshake.
    pub fn rcv_counts(&self) -> &[u64] {
        &self.rcv_counts
    }

    /// Total outbound particles bound for other ranks.
    pub fn num_snds(&self) -> u64 {
        self.num_snds
    }

    /// Total inbound particles expected from other ranks.
    pub fn num_rcvs(&self) -> u64 {
        self.num_rcvs
    }

    /// Resolved slots for one source box's descriptors.
    pub(crate) fn slots(&self, gid: usize) -> &[u32] {
        &self.dst_slots[&gid]
    }
}
