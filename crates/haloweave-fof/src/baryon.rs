//! Phase-space association of non-dark-matter particles to groups.
//!
//! After dark-matter groups are compiled, each baryon looks for the
//! `num_neighbours` nearest grouped dark-matter particles, local or
//! imported across a domain boundary, under the composite distance
//!
//! ```text
//! D2 = |dx|² / position_scale2 + |dv|² / velocity_scale2
//! ```
//!
//! and joins the nearest eligible group. Baryons then migrate to the rank
//! owning their group.

use crate::ball::{BallSearch, CellGrid};
use crate::compact::{migrate_to_owners, GroupCatalog, ReceiveBuffer};
use crate::export::{BoundaryExchange, ExchangeTags, GroupState};
use crate::labels::GroupLabels;
use haloweave_comm::{tags, Communicator, Transport};
use haloweave_core::{
    BaryonConfig, FofError, GroupId, Particle, PropertySchema, Rank, SimulationVolume,
};
use haloweave_domain::Partition;
use rayon::prelude::*;
use std::cmp::{Ordering, Reverse};
use tracing::{debug, info, info_span};

const PARALLEL_TASKS_PER_THREAD: usize = 64;

/// Split `particles` into dark matter and everything else, keeping order.
pub fn split_species(particles: Vec<Particle>) -> (Vec<Particle>, Vec<Particle>) {
    particles.into_iter().partition(|p| p.kind.is_dark_matter())
}

/// A grouped dark-matter particle a baryon may join.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    d2: f64,
    group: GroupId,
    owner: Rank,
    len: u64,
}

/// The nearest eligible candidate among the `k` nearest.
///
/// Baryons enter ungrouped, so every candidate group is eligible unless
/// `cap` is set and the group is longer. Equal distances go to the smaller
/// group id.
fn pick(mut candidates: Vec<Candidate>, k: usize, cap: Option<u64>) -> Option<Candidate> {
    candidates.sort_by(|a, b| {
        a.d2.partial_cmp(&b.d2)
            .unwrap_or(Ordering::Equal)
            .then(a.group.cmp(&b.group))
    });
    candidates.truncate(k);
    candidates
        .into_iter()
        .find(|c| cap.map_or(true, |cap| c.len <= cap))
}

/// Outcome of [`BaryonAssociation::associate`].
#[derive(Clone, Debug)]
pub struct BaryonOutcome {
    /// Dark matter then baryons, sorted by group id with ungrouped last.
    pub particles: Vec<Particle>,
    /// Group label of each particle.
    pub groups: Vec<GroupId>,
    /// Catalog with baryon members counted.
    pub catalog: GroupCatalog,
    /// Baryons that joined a group, across all ranks.
    pub associated: u64,
    /// Boundary dark-matter records this rank exported.
    pub n_export: usize,
    /// Boundary dark-matter records this rank imported.
    pub n_import: usize,
    /// Which buffer received migrating baryons.
    pub buffer: ReceiveBuffer,
}

/// Attaches baryons to compiled dark-matter groups.
#[derive(Clone, Debug)]
pub struct BaryonAssociation {
    config: BaryonConfig,
    volume: SimulationVolume,
}

impl BaryonAssociation {
    /// Association for `config` in `volume`.
    pub fn new(config: BaryonConfig, volume: SimulationVolume) -> Self {
        Self { config, volume }
    }

    /// The association configuration.
    pub fn config(&self) -> &BaryonConfig {
        &self.config
    }

    /// Composite phase-space distance between two particles.
    pub fn phase_distance2(&self, a: &Particle, b_position: [f64; 3], b_velocity: [f64; 3]) -> f64 {
        let dx2 = self.volume.distance2(a.position, b_position);
        let dv2: f64 = (0..3).map(|k| (a.velocity[k] - b_velocity[k]).powi(2)).sum();
        dx2 / self.config.position_scale2 + dv2 / self.config.velocity_scale2
    }

    /// Collective: associate `baryons` with the compiled dark-matter groups
    /// and migrate them to the group owners.
    ///
    /// `dm` and `dm_groups` are this rank's dark matter after
    /// [`compile_groups`](crate::compile_groups), `catalog` its result.
    #[allow(clippy::too_many_arguments)]
    pub fn associate<C: Communicator>(
        &self,
        comm: &C,
        transport: &Transport,
        partition: &mut Partition,
        schema: &PropertySchema,
        dm: Vec<Particle>,
        dm_groups: Vec<GroupId>,
        catalog: &GroupCatalog,
        baryons: Vec<Particle>,
        capacity: usize,
    ) -> Result<BaryonOutcome, FofError> {
        let me = comm.rank();
        let _span = info_span!("associate_baryons", rank = %me).entered();
        if dm_groups.len() != dm.len() {
            return Err(FofError::LengthMismatch {
                what: "dark matter groups",
                expected: dm.len(),
                got: dm_groups.len(),
            });
        }
        let local_len = |g: GroupId| catalog.size_of(g).unwrap_or(0);

        let exchange = BoundaryExchange::build(
            comm,
            transport,
            partition,
            &dm,
            self.config.search_radius,
            ExchangeTags::BARYON,
            |i| {
                let group = dm_groups[i];
                group.is_grouped().then(|| GroupState {
                    group,
                    owner: me,
                    len: local_len(group),
                })
            },
        )?;

        // Candidate pool: local dark matter, then imported boundary records.
        let mut positions: Vec<[f64; 3]> = dm.iter().map(|p| p.position).collect();
        let mut velocities: Vec<[f64; 3]> = dm.iter().map(|p| p.velocity).collect();
        let mut meta: Vec<(GroupId, Rank, u64)> = dm_groups.iter().map(|&g| (g, me, local_len(g))).collect();
        for (rec, shot) in exchange.imported().iter().zip(exchange.snapshots()) {
            positions.push(shot.position);
            velocities.push(shot.velocity);
            meta.push((rec.group, rec.group_owner, rec.group_len));
        }
        let grid = CellGrid::new(positions, self.volume, self.config.search_radius);

        let threads = rayon::current_num_threads();
        let min_len = (baryons.len() / (threads * PARALLEL_TASKS_PER_THREAD)).max(1);
        let chosen: Vec<Option<Candidate>> = baryons
            .par_iter()
            .with_min_len(min_len)
            .map(|b| {
                let mut found = Vec::new();
                grid.for_each_within(b.position, self.config.search_radius, &mut |j| {
                    let (group, owner, len) = meta[j];
                    if group.is_grouped() {
                        found.push(Candidate {
                            d2: self.phase_distance2(b, grid.positions()[j], velocities[j]),
                            group,
                            owner,
                            len,
                        });
                    }
                });
                pick(found, self.config.num_neighbours, self.config.max_group_len)
            })
            .collect();

        let local_associated = chosen.iter().filter(|c| c.is_some()).count() as u64;
        let (groups, owners): (Vec<GroupId>, Vec<Rank>) = chosen
            .iter()
            .map(|c| c.map_or((GroupId::UNGROUPED, me), |c| (c.group, c.owner)))
            .unzip();
        let labels = GroupLabels::from_parts(groups, owners)?;
        let migration = migrate_to_owners(
            comm,
            transport,
            schema,
            baryons,
            &labels,
            capacity.saturating_sub(dm.len()),
            tags::BARYON_EXCHANGE,
        )?;
        partition.record_migration(comm, &migration.departed, &migration.arrived)?;
        let associated = comm.all_reduce_sum(local_associated)?;

        let mut catalog = catalog.clone();
        for g in migration.groups.iter().filter(|g| g.is_grouped()) {
            if let Some(k) = g.0.checked_sub(catalog.offset + 1) {
                if let Some(size) = catalog.sizes.get_mut(k as usize) {
                    *size += 1;
                }
            }
        }
        let mut particles = dm;
        particles.extend(migration.particles);
        let mut groups = dm_groups;
        groups.extend(migration.groups);
        if self.config.reorder_groups {
            reorder_by_size(&mut catalog, &mut groups);
        }
        let mut zipped: Vec<(Particle, GroupId)> = particles.into_iter().zip(groups).collect();
        zipped.sort_by_key(|(_, g)| (!g.is_grouped(), *g));
        let (particles, groups) = zipped.into_iter().unzip();

        debug!(
            rank = %me,
            local_associated,
            nexport = exchange.n_export(),
            nimport = exchange.n_import(),
            "baryons associated"
        );
        if me == Rank::ROOT {
            info!(associated, "baryon association finished");
        }
        Ok(BaryonOutcome {
            particles,
            groups,
            catalog,
            associated,
            n_export: exchange.n_export(),
            n_import: exchange.n_import(),
            buffer: migration.buffer,
        })
    }
}

/// Renumber this rank's groups by descending size within its id range.
fn reorder_by_size(catalog: &mut GroupCatalog, groups: &mut [GroupId]) {
    let mut order: Vec<usize> = (0..catalog.sizes.len()).collect();
    order.sort_by_key(|&k| (Reverse(catalog.sizes[k]), k));
    let mut new_index = vec![0usize; order.len()];
    for (new, &old) in order.iter().enumerate() {
        new_index[old] = new;
    }
    for g in groups.iter_mut() {
        if let Some(k) = g.0.checked_sub(catalog.offset + 1) {
            if let Some(&new) = new_index.get(k as usize) {
                *g = GroupId(catalog.offset + 1 + new as u64);
            }
        }
    }
    catalog.sizes = order.iter().map(|&k| catalog.sizes[k]).collect();
}
