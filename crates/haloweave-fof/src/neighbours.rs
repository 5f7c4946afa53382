//! Import of remote particles near local search spheres.
//!
//! Each local particle with a positive radius sends its sphere to every
//! rank the sphere reaches. Those ranks ball-search their own particles and
//! return each match once per requesting rank.

use crate::ball::BallSearch;
use haloweave_comm::{sort_by_destination, tags, Communicator, PlainCodec, SendCountMatrix, Transport};
use haloweave_core::{FofError, Particle, ParticleSnapshot, Rank};
use haloweave_domain::{ExportPlanner, Partition, SearchRadius};
use tracing::debug;

/// A search sphere sent to another rank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    /// Center.
    pub center: [f64; 3],
    /// Radius.
    pub radius: f64,
    /// Requesting rank.
    pub source: Rank,
}

/// Collective: snapshots of the remote particles within `radii[i]` of
/// `particles[i]`, grouped by the rank that held them.
///
/// `search` indexes this rank's `particles` and answers the spheres of
/// other ranks. Non-positive radii request nothing.
pub fn import_neighbours<C, S>(
    comm: &C,
    transport: &Transport,
    partition: &Partition,
    particles: &[Particle],
    radii: &[f64],
    search: &S,
) -> Result<Vec<ParticleSnapshot>, FofError>
where
    C: Communicator,
    S: BallSearch + ?Sized,
{
    let me = comm.rank();
    if radii.len() != particles.len() {
        return Err(FofError::LengthMismatch {
            what: "radii",
            expected: particles.len(),
            got: radii.len(),
        });
    }
    let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.position).collect();
    let plan = ExportPlanner::new(partition, me).plan(&positions, SearchRadius::PerItem(radii));
    let spheres = plan.pairs().map(|(dest, i)| {
        (
            dest,
            Sphere {
                center: positions[i],
                radius: radii[i],
                source: me,
            },
        )
    });
    let (outgoing, counts) = sort_by_destination(spheres, me, comm.size());
    let matrix = SendCountMatrix::gather(comm, &counts)?;
    let requests = transport.exchange(
        comm,
        &matrix,
        &PlainCodec::<Sphere>::new(),
        &outgoing,
        tags::NEIGHBOUR_SPHERES,
    )?;

    // Requests arrive grouped by source, so a stamp per particle dedupes
    // matches within one requesting rank.
    let mut stamp: Vec<Option<Rank>> = vec![None; particles.len()];
    let mut replies = Vec::new();
    for sphere in &requests {
        search.for_each_within(sphere.center, sphere.radius, &mut |j| {
            if stamp[j] != Some(sphere.source) {
                stamp[j] = Some(sphere.source);
                replies.push((sphere.source, particles[j].snapshot()));
            }
        });
    }
    let (outgoing, counts) = sort_by_destination(replies, me, comm.size());
    let matrix = SendCountMatrix::gather(comm, &counts)?;
    let imported = transport.exchange(
        comm,
        &matrix,
        &PlainCodec::<ParticleSnapshot>::new(),
        &outgoing,
        tags::NEIGHBOUR_PARTICLES,
    )?;
    debug!(
        rank = %me,
        spheres_out = plan.n_export(),
        requests = requests.len(),
        replies = outgoing.len(),
        imported = imported.len(),
        "neighbours imported"
    );
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball::CellGrid;
    use haloweave_comm::LocalCluster;
    use haloweave_core::{ParticleKind, SimulationVolume};
    use haloweave_domain::SlabDecomposition;
    use std::time::Duration;

    #[test]
    fn overlapping_spheres_import_each_particle_once() {
        let volume = SimulationVolume::periodic_cube(1.0);
        let partition: Partition = SlabDecomposition::uniform(volume, 2, [0, 1, 2]).unwrap().into();
        let out = LocalCluster::new(2)
            .with_recv_timeout(Duration::from_secs(10))
            .run(|comm| {
                let (xs, radii, base) = if comm.rank() == Rank(0) {
                    (vec![0.49, 0.3, 0.45], vec![0.05, 0.05, 0.1], 0)
                } else {
                    (vec![0.51, 0.52, 0.8], vec![0.0, 0.0, 0.0], 10)
                };
                let particles: Vec<Particle> = xs
                    .iter()
                    .enumerate()
                    .map(|(i, &x)| Particle::new(base + i as u64, ParticleKind::DarkMatter, [x, 0.5, 0.5], [0.0; 3]))
                    .collect();
                let grid = CellGrid::new(particles.iter().map(|p| p.position).collect(), volume, 0.05);
                import_neighbours(&comm, &Transport::default(), &partition, &particles, &radii, &grid)
            })
            .unwrap();
        let mut pids: Vec<u64> = out[0].as_ref().unwrap().iter().map(|s| s.pid).collect();
        pids.sort_unstable();
        assert_eq!(pids, vec![10, 11]);
        assert!(out[1].as_ref().unwrap().is_empty());
    }

    #[test]
    fn radii_must_match() {
        let volume = SimulationVolume::periodic_cube(1.0);
        let partition: Partition = SlabDecomposition::uniform(volume, 1, [0, 1, 2]).unwrap().into();
        let out = LocalCluster::new(1)
            .run(|comm| {
                let particles = vec![Particle::new(0, ParticleKind::DarkMatter, [0.5; 3], [0.0; 3])];
                let grid = CellGrid::new(vec![[0.5; 3]], volume, 0.1);
                import_neighbours(&comm, &Transport::default(), &partition, &particles, &[], &grid)
            })
            .unwrap();
        assert!(matches!(out[0], Err(FofError::LengthMismatch { what: "radii", .. })));
    }
}
