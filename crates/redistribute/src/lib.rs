//! Particle Redistribution Layer
//!
//! This crate moves particle records between the boxes of a spatially
//! decomposed domain after their positions change, across rank boundaries
//! where necessary. The caller locates each particle's new owner (see
//! `decomp::BoxLocator`), records the moves as copy descriptors, and then
//! drives one redistribution cycle:
//!
//! 1. [`CopyPlan::build`] -- resolve a unique destination slot per particle
//!    and handshake per-rank message sizes.
//! 2. [`pack::pack_buffer`] -- serialize records into the bucket-ordered
//!    send buffer, applying periodic position shifts.
//! 3. [`exchange::exchange_start`] -- post non-blocking sends/receives.
//! 4. [`pack::unpack_buffer`] -- merge locally-routed records.
//! 5. [`exchange::exchange_finish`] -- wait for receipt completion.
//! 6. [`exchange::unpack_remotes`] -- merge records received from peers.
//!
//! # Modules
//! - [`particle`] -- Fixed-size superparticle record and tile storage.
//! - [`container`] -- Per-level, per-box tile collection.
//! - [`copy_op`] -- Copy descriptor set filled by the caller.
//! - [`plan`] -- Copy plan construction and the two handshake protocols.
//! - [`pack`] -- Buffer pack/unpack and the tile growth policies.
//! - [`exchange`] -- Cross-rank send/receive cycle.
//! - [`transport`] -- Message-passing seam with an in-process backend.
//! - [`config`] -- Redistribution configuration loading.

#![warn(missing_docs)]

pub mod config;
pub mod container;
pub mod copy_op;
pub mod exchange;
pub mod pack;
pub mod particle;
pub mod plan;
pub mod transport;

pub use config::RedistributeConfig;
pub use container::ParticleContainer;
pub use copy_op::{CopyDescriptors, DROPPED};
pub use exchange::{exchange_finish, exchange_start, unpack_remotes};
pub use pack::{pack_buffer, unpack_buffer, UnpackPolicy};
pub use particle::{ParticleTile, SuperParticle};
pub use plan::{CopyPlan, HandshakeMode};
pub use transport::{LocalTransport, Transport};
