//! Group migration and compaction.
//!
//! Once linking has converged, [`migrate_to_owners`] moves every grouped
//! particle to the rank that owns its group and [`compile_groups`] drops
//! groups below the minimum size and renumbers the survivors globally.

use crate::labels::GroupLabels;
use crate::numbering::offsets;
use haloweave_comm::{sort_by_destination, Communicator, PropertyCodec, SendCountMatrix, Tag, Transport};
use haloweave_core::{
    CarriesProperties, DomainError, ExtraProperties, FofError, GroupId, Particle, PropertySchema,
    Rank,
};
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::{debug, error, info, info_span};

/// Particles per rank above which more ranks are suggested.
const PARTICLES_PER_RANK_HINT: f64 = 1.0e7;

/// A particle on its way to its group's owner.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupTransfer {
    /// The particle itself.
    pub particle: Particle,
    /// Its index on the sending rank.
    pub source_index: u32,
    /// Its final group label.
    pub group: GroupId,
}

impl CarriesProperties for GroupTransfer {
    fn properties(&self) -> Option<&ExtraProperties> {
        self.particle.properties()
    }

    fn take_properties(&mut self) -> Option<ExtraProperties> {
        self.particle.take_properties()
    }

    fn set_properties(&mut self, properties: Option<ExtraProperties>) {
        self.particle.set_properties(properties);
    }
}

/// How the array holding kept and imported particles was allocated.
///
/// Either way the result is one array; the variant only records whether the
/// working array was reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveBuffer {
    /// The working array, grown by exactly the imports, stayed within the
    /// rank's capacity.
    InPlace,
    /// The result exceeded the capacity: kept particles were moved into one
    /// exactly-sized allocation and the working array was released rather
    /// than grown.
    Dedicated,
}

/// Result of [`migrate_to_owners`].
#[derive(Clone, Debug)]
pub struct Migration {
    /// Particles now on this rank: kept ones in their old order, then
    /// imports in source-rank order.
    pub particles: Vec<Particle>,
    /// Group label of each particle.
    pub groups: Vec<GroupId>,
    /// Positions and destinations of particles that left.
    pub departed: Vec<([f64; 3], Rank)>,
    /// Positions of particles that arrived.
    pub arrived: Vec<[f64; 3]>,
    /// Which buffer received the imports.
    pub buffer: ReceiveBuffer,
}

/// Collective: send every grouped particle whose group is owned elsewhere
/// to that owner.
///
/// `capacity` is the working-array size this rank was given. When kept and
/// imported particles together exceed it, they are gathered into a single
/// exactly-sized allocation instead of growing the working array
/// ([`ReceiveBuffer::Dedicated`]).
pub fn migrate_to_owners<C: Communicator>(
    comm: &C,
    transport: &Transport,
    schema: &PropertySchema,
    mut particles: Vec<Particle>,
    labels: &GroupLabels,
    capacity: usize,
    tag: Tag,
) -> Result<Migration, FofError> {
    let me = comm.rank();
    if labels.len() != particles.len() {
        return Err(FofError::LengthMismatch {
            what: "labels",
            expected: particles.len(),
            got: labels.len(),
        });
    }
    let dest: Vec<Rank> = (0..particles.len())
        .map(|i| if labels.group(i).is_grouped() { labels.owner(i) } else { me })
        .collect();

    let mut leaving = Vec::new();
    let mut departed = Vec::new();
    let mut groups = Vec::with_capacity(particles.len());
    for (i, p) in particles.iter().enumerate() {
        if dest[i] == me {
            groups.push(labels.group(i));
        } else {
            departed.push((p.position, dest[i]));
            leaving.push((
                dest[i],
                GroupTransfer {
                    particle: p.clone(),
                    source_index: i as u32,
                    group: labels.group(i),
                },
            ));
        }
    }
    let mut i = 0;
    particles.retain(|_| {
        let keep = dest[i] == me;
        i += 1;
        keep
    });

    let (outgoing, counts) = sort_by_destination(leaving, me, comm.size());
    let matrix = SendCountMatrix::gather(comm, &counts)?;
    let imported = transport.exchange(comm, &matrix, &PropertyCodec::new(schema), &outgoing, tag)?;

    let total = particles.len() + imported.len();
    let buffer = if total > capacity {
        ReceiveBuffer::Dedicated
    } else {
        ReceiveBuffer::InPlace
    };
    let mut particles = match buffer {
        ReceiveBuffer::InPlace => {
            particles.reserve_exact(imported.len());
            particles
        }
        ReceiveBuffer::Dedicated => {
            let mut dedicated = Vec::with_capacity(total);
            dedicated.extend(particles);
            dedicated
        }
    };
    let mut arrived = Vec::with_capacity(imported.len());
    for t in imported {
        arrived.push(t.particle.position);
        groups.push(t.group);
        particles.push(t.particle);
    }
    debug!(
        rank = %me,
        nexport = outgoing.len(),
        nimport = arrived.len(),
        nlocal = particles.len(),
        buffer = ?buffer,
        "groups migrated"
    );
    Ok(Migration {
        particles,
        groups,
        departed,
        arrived,
        buffer,
    })
}

/// Groups that survived compaction on this rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupCatalog {
    /// Global id of this rank's first group, minus one.
    pub offset: u64,
    /// Member count of each local group, by ascending id.
    pub sizes: Vec<u64>,
    /// Groups on every rank.
    pub groups_per_rank: Vec<u64>,
}

impl GroupCatalog {
    /// Groups held here.
    pub fn local_groups(&self) -> u64 {
        self.sizes.len() as u64
    }

    /// Groups in the job.
    pub fn total_groups(&self) -> u64 {
        self.groups_per_rank.iter().sum()
    }

    /// Global ids of the groups held here.
    pub fn ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        (1..=self.local_groups()).map(move |k| GroupId(self.offset + k))
    }

    /// Size of a group held here.
    pub fn size_of(&self, group: GroupId) -> Option<u64> {
        let k = group.0.checked_sub(self.offset + 1)?;
        self.sizes.get(k as usize).copied()
    }
}

/// Collective: drop groups smaller than `min_size`, renumber the rest to
/// globally unique ids and sort particles by id with ungrouped ones last.
///
/// Local groups are numbered by descending size. Each rank's ids start
/// after those of the ranks ahead of it in descending-particle-count order.
/// Fails on every rank with [`DomainError::ZeroPopulationDomain`] if any
/// rank holds no particles.
pub fn compile_groups<C: Communicator>(
    comm: &C,
    particles: &mut Vec<Particle>,
    groups: &mut Vec<GroupId>,
    min_size: usize,
) -> Result<GroupCatalog, FofError> {
    let me = comm.rank();
    let _span = info_span!("compile_groups", rank = %me).entered();
    if groups.len() != particles.len() {
        return Err(FofError::LengthMismatch {
            what: "groups",
            expected: particles.len(),
            got: groups.len(),
        });
    }
    let counts = comm.all_gather(particles.len() as u64)?;
    if let Some(empty) = counts.iter().position(|&c| c == 0) {
        let total: u64 = counts.iter().sum();
        let suggested_ranks = ((total as f64 / PARTICLES_PER_RANK_HINT).ceil() as u64).max(1);
        error!(total, suggested_ranks, "rank {empty} holds no particles after group exchange");
        return Err(DomainError::ZeroPopulationDomain {
            rank: Rank::from_index(empty),
            total,
            num_ranks: comm.size(),
            cells_per_dim: None,
            suggested_ranks,
        }
        .into());
    }

    let mut zipped: Vec<(Particle, GroupId)> = particles.drain(..).zip(groups.drain(..)).collect();
    zipped.sort_by_key(|(_, g)| Reverse(*g));

    let mut kept: Vec<(GroupId, u64)> = Vec::new();
    let mut start = 0;
    while start < zipped.len() && zipped[start].1.is_grouped() {
        let g = zipped[start].1;
        let end = start + zipped[start..].iter().take_while(|(_, x)| *x == g).count();
        let len = end - start;
        if len < min_size {
            zipped[start..end].iter_mut().for_each(|(_, x)| *x = GroupId::UNGROUPED);
        } else {
            kept.push((g, len as u64));
        }
        start = end;
    }
    kept.sort_by_key(|&(g, len)| (Reverse(len), g));

    let groups_per_rank = comm.all_gather(kept.len() as u64)?;
    let offset = offsets(&counts, &groups_per_rank)[me.index()];
    let renumber: HashMap<GroupId, GroupId> = kept
        .iter()
        .enumerate()
        .map(|(k, &(g, _))| (g, GroupId(offset + k as u64 + 1)))
        .collect();
    for (_, g) in zipped.iter_mut() {
        if let Some(&new) = renumber.get(&*g) {
            *g = new;
        }
    }
    zipped.sort_by_key(|(_, g)| (!g.is_grouped(), *g));
    for (p, g) in zipped {
        particles.push(p);
        groups.push(g);
    }

    let catalog = GroupCatalog {
        offset,
        sizes: kept.iter().map(|&(_, len)| len).collect(),
        groups_per_rank,
    };
    debug!(rank = %me, offset, local_groups = catalog.local_groups(), "groups compiled");
    if me == Rank::ROOT {
        info!(total_groups = catalog.total_groups(), min_size, "groups compiled");
    }
    Ok(catalog)
}
