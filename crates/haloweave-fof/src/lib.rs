//! Distributed friends-of-friends for haloweave.
//!
//! Every rank starts from serial labels of its own particles ([`SerialFof`],
//! [`seed_link_state`]). The [`CrossDomainLinker`] then merges labels
//! across domain boundaries until no rank links, under a pluggable
//! [`LinkCriterion`], [`migrate_to_owners`]
//! moves each group to its owning rank and [`compile_groups`] drops small
//! groups and numbers the rest globally. [`BaryonAssociation`] optionally
//! attaches the other species to the compiled groups.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod ball;
pub mod baryon;
pub mod chains;
pub mod collect;
pub mod compact;
pub mod criterion;
pub mod export;
pub mod labels;
pub mod linker;
pub mod neighbours;
pub mod numbering;
pub mod seed;

pub use ball::{BallSearch, CellGrid};
pub use baryon::{split_species, BaryonAssociation, BaryonOutcome};
pub use chains::{ChainIter, GroupChains};
pub use collect::collect_labels;
pub use compact::{compile_groups, migrate_to_owners, GroupCatalog, GroupTransfer, Migration, ReceiveBuffer};
pub use criterion::{LinkCriterion, PhaseSpaceCriterion, SpeciesFilter};
pub use export::{BoundaryExchange, ExchangeTags, ExportRecord, GroupState};
pub use labels::GroupLabels;
pub use linker::{CrossDomainLinker, LinkState, LinkSummary};
pub use neighbours::{import_neighbours, Sphere};
pub use numbering::{adjust_local_group_ids, offsets, rank_order, IdBlock};
pub use seed::{seed_link_state, SerialFof};
