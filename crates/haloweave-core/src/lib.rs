//! Core types for the haloweave distributed friends-of-friends engine.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! vocabulary shared by every other crate in the workspace: rank and group
//! identifiers, the particle record and its optional extra properties,
//! axis-aligned geometry, configuration structs, and the error taxonomy.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod id;
pub mod particle;
pub mod properties;

pub use config::{
    BaryonConfig, ConfigError, DecompositionConfig, DecompositionStrategy, LinkingConfig,
    SlabBoundaries, TransportConfig, UnitConversion,
};
pub use error::{CommError, DomainError, FofError};
pub use geometry::{Aabb, SearchBox, SimulationVolume};
pub use id::{GroupId, Rank};
pub use particle::{Particle, ParticleKind, ParticleSnapshot};
pub use properties::{CarriesProperties, ExtraProperties, PropertyKind, PropertySchema};
