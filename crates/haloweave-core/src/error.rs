//! Error taxonomy, organised by subsystem: communication, domain
//! decomposition, and group linking.
//!
//! Every variant except a rebalance request is fatal for the whole job:
//! collective decisions are taken from gathered data, so all ranks return
//! the same error and the driver aborts. Nothing is salvaged.

use crate::id::Rank;
use crate::properties::PropertyKind;
use thiserror::Error;

/// Failures of the message layer and the chunked transport.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommError {
    /// A peer dropped its endpoint while this rank was waiting on it.
    #[error("rank {rank}: peer {peer} disconnected while awaiting tag {tag}")]
    PeerDisconnected {
        /// The waiting rank.
        rank: Rank,
        /// The rank that went away.
        peer: Rank,
        /// Tag being awaited or sent.
        tag: u64,
    },
    /// No message arrived within the configured receive timeout.
    #[error("rank {rank}: timed out after {waited_ms} ms awaiting tag {tag} from {peer}")]
    Timeout {
        /// The waiting rank.
        rank: Rank,
        /// Expected sender.
        peer: Rank,
        /// Tag being awaited.
        tag: u64,
        /// How long the rank waited.
        waited_ms: u64,
    },
    /// A message carried a payload of an unexpected type.
    #[error("payload for tag {tag} from {peer} is not a {expected}")]
    PayloadType {
        /// Sender.
        peer: Rank,
        /// Message tag.
        tag: u64,
        /// Expected Rust type name.
        expected: &'static str,
    },
    /// A rank outside the job was addressed.
    #[error("rank {rank} is out of range for a job of {size}")]
    InvalidRank {
        /// The offending rank.
        rank: Rank,
        /// Number of ranks in the job.
        size: usize,
    },
    /// A per-rank table had the wrong number of entries.
    #[error("per-rank table has {got} entries, job has {expected} ranks")]
    ShapeMismatch {
        /// Number of ranks.
        expected: usize,
        /// Entries supplied.
        got: usize,
    },
    /// Outgoing items disagree with this rank's row of the send-count matrix.
    #[error("send-count row promises {expected} items but {provided} were supplied")]
    OutgoingMismatch {
        /// Row sum of the matrix.
        expected: usize,
        /// Items handed to the transport.
        provided: usize,
    },
    /// A chunk did not contain the number of items the matrix announced.
    #[error("expected {expected} items from {peer}, received {received}")]
    CountMismatch {
        /// Sender.
        peer: Rank,
        /// Items announced.
        expected: usize,
        /// Items decoded.
        received: usize,
    },
    /// Extra-property field lists differ between sender and receiver.
    #[error("extra-property schema mismatch for {kind:?}: {reason}")]
    SchemaMismatch {
        /// Property group being decoded.
        kind: PropertyKind,
        /// What disagreed.
        reason: String,
    },
    /// A rank's worker thread could not be started.
    #[error("failed to start rank thread: {reason}")]
    Spawn {
        /// OS error text.
        reason: String,
    },
}

/// Failures of the spatial decomposition.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum DomainError {
    /// A position maps to no owning rank.
    #[error("no rank owns position {position:?}")]
    DomainGap {
        /// The offending coordinates.
        position: [f64; 3],
    },
    /// A rank would hold no particles.
    #[error(
        "rank {rank} holds no particles ({total} total over {num_ranks} ranks); \
         suggested ranks = {suggested_ranks}, increase mesh resolution or reduce ranks"
    )]
    ZeroPopulationDomain {
        /// First empty rank.
        rank: Rank,
        /// Particles in the whole job.
        total: u64,
        /// Ranks in the job.
        num_ranks: usize,
        /// Mesh resolution in use, if any.
        cells_per_dim: Option<u32>,
        /// `ceil(total / 1e7)`.
        suggested_ranks: u64,
    },
    /// The requested decomposition cannot be built.
    #[error("invalid decomposition: {reason}")]
    InvalidDecomposition {
        /// What was wrong.
        reason: String,
    },
    /// Unit rescaling was requested a second time.
    #[error("domain lengths were already converted to output units")]
    UnitsAlreadyAdjusted,
    /// A collective or transfer failed.
    #[error(transparent)]
    Comm(#[from] CommError),
}

/// Failures of the cross-domain linker and the group compactor.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum FofError {
    /// This rank ran out of reserved ids for linker-created groups.
    #[error("rank {rank} exhausted its block of {block_size} reserved group ids")]
    IdBlockExhausted {
        /// The rank.
        rank: Rank,
        /// Size of its block.
        block_size: u64,
    },
    /// The local chain representation is malformed.
    #[error("invalid group chains: {reason}")]
    InvalidChains {
        /// What was wrong.
        reason: String,
    },
    /// Two per-particle tables disagree in length.
    #[error("{what} has {got} entries, expected {expected}")]
    LengthMismatch {
        /// Table name.
        what: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },
    /// Linking did not reach a fixed point within the configured passes.
    #[error("linking still changing after {passes} passes")]
    NotConverged {
        /// Passes executed.
        passes: usize,
    },
    /// Decomposition failure.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Communication failure.
    #[error(transparent)]
    Comm(#[from] CommError),
}
