//! Per-particle group labels (`pfof`) and group owners (`foftask`).

use haloweave_core::{FofError, GroupId, Rank};

/// Group label and owning rank of every local particle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupLabels {
    pfof: Vec<GroupId>,
    owner: Vec<Rank>,
}

impl GroupLabels {
    /// Labels owned by `me`, as they come out of the serial pass.
    pub fn new(pfof: Vec<GroupId>, me: Rank) -> Self {
        let owner = vec![me; pfof.len()];
        Self { pfof, owner }
    }

    /// Labels with explicit owners.
    pub fn from_parts(pfof: Vec<GroupId>, owner: Vec<Rank>) -> Result<Self, FofError> {
        if owner.len() != pfof.len() {
            return Err(FofError::LengthMismatch {
                what: "owner",
                expected: pfof.len(),
                got: owner.len(),
            });
        }
        Ok(Self { pfof, owner })
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.pfof.len()
    }

    /// True when there are no particles.
    pub fn is_empty(&self) -> bool {
        self.pfof.is_empty()
    }

    /// Label of particle `i`.
    pub fn group(&self, i: usize) -> GroupId {
        self.pfof[i]
    }

    /// Rank that will hold particle `i` once its group is final.
    pub fn owner(&self, i: usize) -> Rank {
        self.owner[i]
    }

    /// Relabel particle `i`.
    pub fn set(&mut self, i: usize, group: GroupId, owner: Rank) {
        self.pfof[i] = group;
        self.owner[i] = owner;
    }

    /// All labels.
    pub fn groups(&self) -> &[GroupId] {
        &self.pfof
    }

    /// All owners.
    pub fn owners(&self) -> &[Rank] {
        &self.owner
    }

    /// Split into labels and owners.
    pub fn into_parts(self) -> (Vec<GroupId>, Vec<Rank>) {
        (self.pfof, self.owner)
    }
}
