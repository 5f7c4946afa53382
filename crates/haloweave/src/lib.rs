//! Haloweave: distributed friends-of-friends halo finding.
//!
//! This is the top-level facade crate that re-exports the public API of the
//! haloweave sub-crates and drives them in order through [`FofPipeline`].
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `haloweave-core` | ids, particles, geometry, configuration, errors |
//! | [`comm`] | `haloweave-comm` | communicator, send-count matrix, chunked transport |
//! | [`domain`] | `haloweave-domain` | slab and mesh partitions, export planning |
//! | [`fof`] | `haloweave-fof` | linking, group compaction, baryon association |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod pipeline;

/// Ids, particles, geometry, configuration and errors (`haloweave-core`).
pub use haloweave_core as types;

/// Rank communication and chunked transport (`haloweave-comm`).
///
/// [`comm::LocalCluster`] runs a job on threads; real deployments provide
/// their own [`comm::Communicator`].
pub use haloweave_comm as comm;

/// Spatial decomposition (`haloweave-domain`).
pub use haloweave_domain as domain;

/// Distributed friends-of-friends (`haloweave-fof`).
pub use haloweave_fof as fof;

pub use pipeline::{FofPipeline, HaloCatalog, PipelineConfig};

/// Common imports for typical haloweave usage.
pub mod prelude {
    // Core types
    pub use haloweave_core::{
        BaryonConfig, DecompositionConfig, DecompositionStrategy, GroupId, LinkingConfig,
        Particle, ParticleKind, Rank, SimulationVolume, TransportConfig, UnitConversion,
    };

    // Errors
    pub use haloweave_core::{CommError, ConfigError, DomainError, FofError};

    // Communication
    pub use haloweave_comm::{Communicator, LocalCluster};

    // FOF
    pub use haloweave_fof::{GroupCatalog, LinkCriterion, PhaseSpaceCriterion, SerialFof};

    // Pipeline
    pub use crate::pipeline::{FofPipeline, HaloCatalog, PipelineConfig};
}
