//! The serial friends-of-friends seed.
//!
//! Labelling the particles of one rank is left to the caller through
//! [`SerialFof`]; [`seed_link_state`] turns its labels into the state the
//! cross-domain linker starts from.

use crate::chains::GroupChains;
use crate::labels::GroupLabels;
use crate::linker::LinkState;
use crate::numbering::adjust_local_group_ids;
use haloweave_comm::Communicator;
use haloweave_core::{FofError, GroupId, SimulationVolume};
use tracing::debug;

/// Single-rank friends-of-friends.
///
/// Labels must lie in `1..=positions.len()` for grouped particles and be
/// [`GroupId::UNGROUPED`] otherwise.
pub trait SerialFof {
    /// Label `positions` with linking length `linking_length`.
    fn label(&self, positions: &[[f64; 3]], volume: &SimulationVolume, linking_length: f64) -> Vec<GroupId>;
}

impl<F> SerialFof for F
where
    F: Fn(&[[f64; 3]], &SimulationVolume, f64) -> Vec<GroupId>,
{
    fn label(&self, positions: &[[f64; 3]], volume: &SimulationVolume, linking_length: f64) -> Vec<GroupId> {
        self(positions, volume, linking_length)
    }
}

/// Collective: offset serial `labels` to global ids, build their chains and
/// reserve this rank's block of fresh ids.
pub fn seed_link_state<C: Communicator>(comm: &C, mut labels: Vec<GroupId>) -> Result<LinkState, FofError> {
    let ids = adjust_local_group_ids(comm, &mut labels)?;
    let chains = GroupChains::from_labels(&labels);
    debug!(
        rank = %comm.rank(),
        grouped = labels.iter().filter(|g| g.is_grouped()).count(),
        "link state seeded"
    );
    Ok(LinkState {
        labels: GroupLabels::new(labels, comm.rank()),
        chains,
        ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use haloweave_comm::LocalCluster;
    use haloweave_core::Rank;

    #[test]
    fn closures_label() {
        let fof = |p: &[[f64; 3]], _: &SimulationVolume, _: f64| vec![GroupId(1); p.len()];
        let labels = fof.label(&[[0.0; 3]; 3], &SimulationVolume::periodic_cube(1.0), 0.1);
        assert_eq!(labels, vec![GroupId(1); 3]);
    }

    #[test]
    fn seeded_chains_follow_labels() {
        let out = LocalCluster::new(1)
            .run(|comm| seed_link_state(&comm, vec![GroupId(1), GroupId(0), GroupId(1), GroupId(2)]))
            .unwrap();
        let state = out[0].as_ref().unwrap();
        assert_eq!(state.chains.group_len(0), 2);
        assert_eq!(state.chains.members(2).collect::<Vec<_>>().len(), 2);
        assert_eq!(state.chains.group_len(3), 1);
        assert_eq!(state.ids.remaining(), 4);
        assert!(state.labels.owners().iter().all(|&r| r == Rank::ROOT));
    }
}
