//! Spatial domain decomposition for haloweave.
//!
//! A [`Partition`] maps every point of the simulated volume to exactly one
//! owning rank, either as one box per rank ([`SlabDecomposition`]) or as a
//! Morton-ordered cell grid ([`MeshDecomposition`]). The [`Decomposer`]
//! builds and rebalances partitions collectively; the [`ExportPlanner`]
//! decides which ranks a search sphere reaches; [`assign_particles`] moves
//! freshly read particles to their owners.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod assign;
pub mod mesh;
pub mod morton;
pub mod overlap;
pub mod partition;
pub mod slab;

pub use assign::assign_particles;
pub use mesh::MeshDecomposition;
pub use morton::{morton_key, z_order};
pub use overlap::{ExportPlan, ExportPlanner, SearchRadius};
pub use partition::{Decomposer, DomainCount, Partition, PartitionKind};
pub use slab::{factor_ranks, slab_counts, AxisMoments, SlabDecomposition, SlabEdges};
