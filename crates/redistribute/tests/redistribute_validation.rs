//! Validation - full redistribution cycles across threaded ranks
//!
//! These tests drive the whole pipeline (locate, describe, plan, pack,
//! exchange, unpack) over a 2x2x1 decomposition split across two ranks
//! and verify:
//! - Periodic wrap moves particles to the far-side box with positions
//!   shifted by exactly one domain length
//! - Particles leaving the domain on a non-periodic axis are dropped
//! - Local and Global handshakes produce identical final distributions
//! - A single-rank shuffle preserves every record bit-for-bit

use std::collections::BTreeMap;
use std::thread;

use decomp::{BoxArray, BoxLocator, BufferMap, DistributionMap, DomainGeometry, IndexBox, IntVect};
use redistribute::{
    exchange_finish, exchange_start, pack_buffer, unpack_buffer, unpack_remotes,
    CopyDescriptors, CopyPlan, HandshakeMode, ParticleContainer, SuperParticle, UnpackPolicy,
    DROPPED,
};

/// 2x2x1 arrangement of 4x4x4 boxes over an 8x8x4-cell domain.
fn quad_decomposition() -> (BoxArray, DistributionMap, DomainGeometry) {
    let ba = BoxArray::new(vec![
        IndexBox::new([0, 0, 0], [3, 3, 3]),
        IndexBox::new([4, 0, 0], [7, 3, 3]),
        IndexBox::new([0, 4, 0], [3, 7, 3]),
        IndexBox::new([4, 4, 0], [7, 7, 3]),
    ]);
    // Ranks split the domain into left and right columns.
    let dmap = DistributionMap::new(vec![0, 1, 0, 1], 2);
    let geom = DomainGeometry::new([0.0; 3], [8.0, 8.0, 4.0], [true, false, false]);
    (ba, dmap, geom)
}

const NCELLS: IntVect = [8, 8, 4];

fn particle(id: u32, pos: [f32; 3]) -> SuperParticle {
    SuperParticle {
        pos,
        vel: [0.0; 3],
        mass: 1.0,
        id,
    }
}

/// Map a position to its owning box, wrapping periodic axes.
///
/// Cell size is 1.0, so the containing cell is just the floor of each
/// coordinate. Returns the destination box and the whole-domain-length
/// shift needed to bring the position into that box's frame, or `None`
/// when the position left the domain on a non-periodic axis.
fn route(
    pos: [f32; 3],
    geom: &DomainGeometry,
    locator: &BoxLocator,
) -> Option<(usize, IntVect)> {
    let mut iv = [0i32; 3];
    let mut shift = [0i32; 3];
    for d in 0..3 {
        let mut c = pos[d].floor() as i32;
        if geom.periodic[d] {
            if c < 0 {
                c += NCELLS[d];
                shift[d] = 1;
            } else if c >= NCELLS[d] {
                c -= NCELLS[d];
                shift[d] = -1;
            }
        }
        iv[d] = c;
    }
    locator.locate(iv).map(|gid| (gid, shift))
}

/// Run one full redistribution cycle on one rank and return the final
/// per-box particle records.
fn run_rank(
    transport: redistribute::LocalTransport,
    mode: HandshakeMode,
    seeds: &[(usize, SuperParticle)],
) -> BTreeMap<usize, Vec<SuperParticle>> {
    use redistribute::Transport;

    let (ba, dmap, geom) = quad_decomposition();
    let bmap = BufferMap::new(&dmap);
    let locator = BoxLocator::build(&ba);
    let me = transport.rank();
    let neighbors: Vec<usize> = (0..transport.num_ranks()).filter(|&r| r != me).collect();

    let owned = dmap.boxes_on_rank(me);
    let mut pc = ParticleContainer::new(&owned);
    for &(gid, sp) in seeds {
        if dmap.owner(gid) == me {
            pc.tile_mut(gid).unwrap().push(sp);
        }
    }

    // Every seeded particle has moved; describe where each one goes.
    let mut op = CopyDescriptors::new();
    for &gid in &owned {
        let tile = pc.tile(gid).unwrap();
        op.resize(gid, tile.num_particles());
        for i in 0..tile.num_particles() {
            let sp = tile.gather(i);
            match route(sp.pos, &geom, &locator) {
                Some((dst, shift)) => op.set(gid, i, dst as i32, i as u32, shift),
                None => op.set(gid, i, DROPPED, i as u32, [0; 3]),
            }
        }
    }

    let mut plan = CopyPlan::build(&pc, &op, &ba, &bmap, &geom, &transport, mode, &neighbors);
    let snd = pack_buffer(&pc, &op, &plan, &bmap, &geom);

    // Sources hold stale copies once packed; empty them before merging.
    for &gid in &owned {
        pc.tile_mut(gid).unwrap().resize(0);
    }

    let mut rcv = exchange_start(&transport, &mut plan, &snd, &bmap);
    unpack_buffer(&mut pc, &plan, &bmap, &snd, UnpackPolicy::GrowPrimary);
    exchange_finish(&mut plan, &mut rcv);
    unpack_remotes(&mut pc, &plan, &rcv, UnpackPolicy::GrowPrimary);

    owned
        .iter()
        .map(|&gid| {
            let tile = pc.tile(gid).unwrap();
            let records = (0..tile.num_particles()).map(|i| tile.gather(i)).collect();
            (gid, records)
        })
        .collect()
}

/// Seeds covering a periodic wrap in each direction, two plain cross-rank
/// moves, and one drop through the non-periodic y face.
fn scenario_seeds() -> Vec<(usize, SuperParticle)> {
    vec![
        (0, particle(100, [-0.5, 1.5, 1.5])), // wraps low x, lands in box 1
        (2, particle(200, [4.2, 5.5, 1.5])),  // crosses into box 3
        (1, particle(300, [8.5, 2.5, 1.5])),  // wraps high x, lands in box 0
        (3, particle(400, [3.5, 6.5, 1.5])),  // crosses into box 2
        (0, particle(500, [1.5, -0.5, 1.5])), // leaves through non-periodic y
    ]
}

fn run_cluster(mode: HandshakeMode) -> Vec<BTreeMap<usize, Vec<SuperParticle>>> {
    let seeds = scenario_seeds();
    let handles: Vec<_> = redistribute::LocalTransport::cluster(2)
        .into_iter()
        .map(|t| {
            let seeds = seeds.clone();
            thread::spawn(move || run_rank(t, mode, &seeds))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn periodic_wrap_across_ranks() {
    let results = run_cluster(HandshakeMode::Local);
    let rank0 = &results[0];
    let rank1 = &results[1];

    // Box 0: receives the particle that wrapped around the high x face.
    assert_eq!(rank0[&0].len(), 1);
    assert_eq!(rank0[&0][0].id, 300);
    assert_eq!(rank0[&0][0].pos[0], 8.5 - 8.0);

    // Box 1: receives the particle that wrapped around the low x face.
    assert_eq!(rank1[&1].len(), 1);
    assert_eq!(rank1[&1][0].id, 100);
    assert_eq!(rank1[&1][0].pos[0], -0.5 + 8.0);

    // Plain cross-rank moves keep their positions untouched.
    assert_eq!(rank1[&3].len(), 1);
    assert_eq!(rank1[&3][0].id, 200);
    assert_eq!(rank1[&3][0].pos[0], 4.2);
    assert_eq!(rank0[&2].len(), 1);
    assert_eq!(rank0[&2][0].id, 400);
    assert_eq!(rank0[&2][0].pos[0], 3.5);

    // The particle that left through the non-periodic face is gone.
    let total: usize = results
        .iter()
        .flat_map(|r| r.values())
        .map(|v| v.len())
        .sum();
    assert_eq!(total, 4, "exactly one particle must be dropped");
}

#[test]
fn handshake_modes_produce_identical_distributions() {
    let local = run_cluster(HandshakeMode::Local);
    let global = run_cluster(HandshakeMode::Global);
    assert_eq!(local, global);
}

#[test]
fn single_rank_shuffle_preserves_records() {
    let ba = BoxArray::new(vec![
        IndexBox::new([0, 0, 0], [3, 3, 3]),
        IndexBox::new([4, 0, 0], [7, 3, 3]),
        IndexBox::new([0, 4, 0], [3, 7, 3]),
        IndexBox::new([4, 4, 0], [7, 7, 3]),
    ]);
    let dmap = DistributionMap::new(vec![0; 4], 1);
    let bmap = BufferMap::new(&dmap);
    let geom = DomainGeometry::new([0.0; 3], [8.0, 8.0, 4.0], [false; 3]);
    let locator = BoxLocator::build(&ba);
    let transport = redistribute::LocalTransport::cluster(1).pop().unwrap();

    // Scatter a handful of particles so every box both gains and loses.
    let seeds = vec![
        (0, particle(1, [5.5, 1.5, 1.5])),
        (0, particle(2, [1.5, 5.5, 1.5])),
        (1, particle(3, [1.5, 1.5, 1.5])),
        (2, particle(4, [5.5, 5.5, 1.5])),
        (3, particle(5, [1.5, 1.5, 0.5])),
        (3, particle(6, [5.5, 1.5, 3.5])),
    ];

    let mut pc = ParticleContainer::new(&[0, 1, 2, 3]);
    for &(gid, sp) in &seeds {
        pc.tile_mut(gid).unwrap().push(sp);
    }

    let mut op = CopyDescriptors::new();
    for gid in 0..4 {
        let tile = pc.tile(gid).unwrap();
        op.resize(gid, tile.num_particles());
        for i in 0..tile.num_particles() {
            let sp = tile.gather(i);
            let (dst, shift) = route(sp.pos, &geom, &locator).unwrap();
            op.set(gid, i, dst as i32, i as u32, shift);
        }
    }

    let mut plan = CopyPlan::build(
        &pc,
        &op,
        &ba,
        &bmap,
        &geom,
        &transport,
        HandshakeMode::Local,
        &[],
    );
    let snd = pack_buffer(&pc, &op, &plan, &bmap, &geom);
    for gid in 0..4 {
        pc.tile_mut(gid).unwrap().resize(0);
    }
    let mut rcv = exchange_start(&transport, &mut plan, &snd, &bmap);
    unpack_buffer(&mut pc, &plan, &bmap, &snd, UnpackPolicy::GrowPrimary);
    exchange_finish(&mut plan, &mut rcv);
    unpack_remotes(&mut pc, &plan, &rcv, UnpackPolicy::GrowPrimary);

    // Nothing crossed the domain boundary, so every record survives
    // unchanged in the box that contains its position.
    let mut survivors: Vec<SuperParticle> = (0..4)
        .flat_map(|gid| {
            let tile = pc.tile(gid).unwrap();
            (0..tile.num_particles())
                .map(|i| {
                    let sp = tile.gather(i);
                    let (dst, _) = route(sp.pos, &geom, &locator).unwrap();
                    assert_eq!(dst, gid, "record must sit in the box that contains it");
                    sp
                })
                .collect::<Vec<_>>()
        })
        .collect();
    survivors.sort_by_key(|sp| sp.id);

    let mut expected: Vec<SuperParticle> = seeds.iter().map(|&(_, sp)| sp).collect();
    expected.sort_by_key(|sp| sp.id);
    assert_eq!(survivors, expected);
}
