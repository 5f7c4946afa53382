//! Gathering final labels on one rank.

use haloweave_comm::{tags, Communicator};
use haloweave_core::{FofError, GroupId, Particle, Rank};
use tracing::debug;

/// Collective: gather every rank's `(pid, group)` pairs on `root`, sorted
/// by PID. Other ranks get `None`.
pub fn collect_labels<C: Communicator>(
    comm: &C,
    particles: &[Particle],
    groups: &[GroupId],
    root: Rank,
) -> Result<Option<Vec<(u64, GroupId)>>, FofError> {
    if groups.len() != particles.len() {
        return Err(FofError::LengthMismatch {
            what: "groups",
            expected: particles.len(),
            got: groups.len(),
        });
    }
    let mine: Vec<(u64, GroupId)> = particles.iter().map(|p| p.pid).zip(groups.iter().copied()).collect();
    if comm.rank() != root {
        comm.send(root, tags::COLLECT_LABELS, mine)?;
        return Ok(None);
    }
    let mut all = mine;
    for source in Rank::all(comm.size()).filter(|&r| r != root) {
        let theirs: Vec<(u64, GroupId)> = comm.recv(source, tags::COLLECT_LABELS)?;
        all.extend(theirs);
    }
    all.sort_unstable_by_key(|&(pid, _)| pid);
    debug!(rank = %root, labels = all.len(), "labels collected");
    Ok(Some(all))
}

#[cfg(test)]
mod tests {
    use super::*;
    use haloweave_comm::LocalCluster;
    use haloweave_core::ParticleKind;
    use std::time::Duration;

    #[test]
    fn root_gets_everything_sorted() {
        let out = LocalCluster::new(3)
            .with_recv_timeout(Duration::from_secs(10))
            .run(|comm| {
                let r = u64::from(comm.rank().0);
                let particles: Vec<Particle> = (0..2)
                    .map(|i| Particle::new(10 - 3 * i - r, ParticleKind::DarkMatter, [0.0; 3], [0.0; 3]))
                    .collect();
                let groups = vec![GroupId(r); 2];
                collect_labels(&comm, &particles, &groups, Rank(1))
            })
            .unwrap();
        assert_eq!(out[0], Ok(None));
        assert_eq!(out[2], Ok(None));
        let all = out[1].clone().unwrap().unwrap();
        let pids: Vec<u64> = all.iter().map(|&(p, _)| p).collect();
        assert_eq!(pids, vec![5, 6, 7, 8, 9, 10]);
        assert_eq!(all[0], (5, GroupId(2)));
        assert_eq!(all[5], (10, GroupId(0)));
    }
}
