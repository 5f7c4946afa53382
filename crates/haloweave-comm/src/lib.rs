//! Rank messaging and chunked transport for haloweave.
//!
//! The job is pure SPMD: every rank runs the same sequence of calls.
//! [`Communicator`] provides tagged point-to-point messages and the
//! collectives built on them; [`LocalCluster`] runs a job as one thread per
//! rank. [`SendCountMatrix`] is only obtainable from the all-gather
//! collective, and [`Transport::exchange`] demands one, so a pairwise
//! transfer can never start against a matrix that is not closed.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod comm;
pub mod local;
pub mod matrix;
pub mod transport;

pub use codec::{ChunkCodec, PlainCodec, PropertyBlock, PropertyChunk, PropertyCodec};
pub use comm::{tags, Communicator, Tag};
pub use local::{LocalCluster, ThreadComm};
pub use matrix::SendCountMatrix;
pub use transport::{sort_by_destination, ChunkPlan, Transport};
