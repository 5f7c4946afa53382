//! Strongly-typed identifiers for ranks and groups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one cooperating process (rank) of the distributed job.
///
/// Ranks are dense: a job of `P` processes uses `Rank(0)..Rank(P - 1)`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Rank(pub u32);

impl Rank {
    /// The rank that logs job-wide summaries and roots broadcasts by default.
    pub const ROOT: Rank = Rank(0);

    /// Position of this rank in per-rank tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Rank for a per-rank table position.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// All ranks of a job of `size` processes, in ascending order.
    pub fn all(size: usize) -> impl Iterator<Item = Rank> {
        (0..size).map(Rank::from_index)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Rank {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Global friends-of-friends group label.
///
/// `GroupId(0)` is reserved for "ungrouped". Labels are only globally
/// unique after a numbering pass; during linking larger ids win.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GroupId(pub u64);

impl GroupId {
    /// Label of a particle that belongs to no group.
    pub const UNGROUPED: GroupId = GroupId(0);

    /// Whether this label names a real group.
    pub fn is_grouped(self) -> bool {
        self.0 != 0
    }

    /// Shift a grouped label by `offset`; ungrouped stays ungrouped.
    pub fn offset_by(self, offset: u64) -> Self {
        if self.is_grouped() {
            Self(self.0 + offset)
        } else {
            self
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GroupId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}
