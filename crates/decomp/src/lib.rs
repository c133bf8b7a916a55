//! Box Decomposition Primitives
//!
//! This crate provides the spatial building blocks for a domain decomposed
//! into axis-aligned integer index-space boxes, each owned by one parallel
//! rank. It is designed to be separable and data-structure focused.
//!
//! # Modules
//! - [`boxes`] -- Integer index-space boxes and the global box array.
//! - [`geometry`] -- Physical domain extents and per-axis periodicity.
//! - [`distribution`] -- Box ownership and the rank-grouped bucket permutation.
//! - [`locator`] -- Binned spatial index answering "which box owns this cell?".

#![warn(missing_docs)]

pub mod boxes;
pub mod distribution;
pub mod geometry;
pub mod locator;

pub use boxes::{BoxArray, IndexBox, IntVect};
pub use distribution::{BufferMap, DistributionMap};
pub use geometry::DomainGeometry;
pub use locator::BoxLocator;
