//! The active partition and the collective operations that maintain it.

use crate::mesh::MeshDecomposition;
use crate::slab::SlabDecomposition;
use haloweave_comm::Communicator;
use haloweave_core::{
    DecompositionConfig, DecompositionStrategy, DomainError, Rank, SearchBox, SimulationVolume,
    UnitConversion,
};
use smallvec::SmallVec;
use tracing::{debug, info, info_span};

/// Either partition representation.
#[derive(Clone, Debug, PartialEq)]
pub enum PartitionKind {
    /// One box per rank.
    Slab(SlabDecomposition),
    /// Morton-ordered cell grid.
    Mesh(MeshDecomposition),
}

/// Maps every point of the volume to exactly one owning rank.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    kind: PartitionKind,
    units_adjusted: bool,
}

impl From<SlabDecomposition> for Partition {
    fn from(slab: SlabDecomposition) -> Self {
        Self {
            kind: PartitionKind::Slab(slab),
            units_adjusted: false,
        }
    }
}

impl From<MeshDecomposition> for Partition {
    fn from(mesh: MeshDecomposition) -> Self {
        Self {
            kind: PartitionKind::Mesh(mesh),
            units_adjusted: false,
        }
    }
}

impl Partition {
    /// The underlying representation.
    pub fn kind(&self) -> &PartitionKind {
        &self.kind
    }

    /// The mesh, if this is a mesh partition.
    pub fn as_mesh(&self) -> Option<&MeshDecomposition> {
        match &self.kind {
            PartitionKind::Mesh(mesh) => Some(mesh),
            PartitionKind::Slab(_) => None,
        }
    }

    /// The slabs, if this is a slab partition.
    pub fn as_slab(&self) -> Option<&SlabDecomposition> {
        match &self.kind {
            PartitionKind::Slab(slab) => Some(slab),
            PartitionKind::Mesh(_) => None,
        }
    }

    /// Number of ranks partitioned over.
    pub fn num_ranks(&self) -> usize {
        match &self.kind {
            PartitionKind::Slab(s) => s.num_ranks(),
            PartitionKind::Mesh(m) => m.num_ranks(),
        }
    }

    /// The partitioned volume.
    pub fn volume(&self) -> &SimulationVolume {
        match &self.kind {
            PartitionKind::Slab(s) => s.volume(),
            PartitionKind::Mesh(m) => m.volume(),
        }
    }

    /// Owning rank of `position`.
    pub fn locate(&self, position: [f64; 3]) -> Result<Rank, DomainError> {
        match &self.kind {
            PartitionKind::Slab(s) => s.locate(position),
            PartitionKind::Mesh(m) => m.locate(position),
        }
    }

    /// Append ranks other than `me` whose region meets `search`, including
    /// periodic images. Mesh partitions may repeat ranks.
    pub fn overlapping_ranks(&self, search: &SearchBox, me: Rank, out: &mut SmallVec<[Rank; 8]>) {
        match &self.kind {
            PartitionKind::Slab(s) => s.overlapping_ranks(search, me, out),
            PartitionKind::Mesh(m) => m.overlapping_ranks(search, me, out),
        }
    }

    /// Whether [`adjust_units`](Self::adjust_units) has run.
    pub fn units_adjusted(&self) -> bool {
        self.units_adjusted
    }

    /// Rescale every box or cell into physical units. Returns the factor.
    ///
    /// Allowed once, after decomposition and before any overlap query.
    pub fn adjust_units(&mut self, units: &UnitConversion) -> Result<f64, DomainError> {
        if self.units_adjusted {
            return Err(DomainError::UnitsAlreadyAdjusted);
        }
        let factor = units.length_scale();
        match &mut self.kind {
            PartitionKind::Slab(s) => s.scale(factor),
            PartitionKind::Mesh(m) => m.scale(factor),
        }
        self.units_adjusted = true;
        debug!(factor, "partition rescaled");
        Ok(factor)
    }

    /// Collective: keep ownership queries consistent after a migration.
    ///
    /// `departed` lists the positions and new owners of particles that left
    /// this rank, `arrived` the positions of particles that came in. Mesh
    /// partitions record the new owners of the cells involved; slab
    /// partitions grow this rank's box over the arrivals.
    pub fn record_migration<C: Communicator>(
        &mut self,
        comm: &C,
        departed: &[([f64; 3], Rank)],
        arrived: &[[f64; 3]],
    ) -> Result<(), DomainError> {
        match &mut self.kind {
            PartitionKind::Slab(s) => s.extend_to_cover(comm, arrived),
            PartitionKind::Mesh(m) => {
                let mut moves = Vec::with_capacity(departed.len());
                for &(position, dest) in departed {
                    let cell = m.cell_of(position)?;
                    if m.owner_of_cell(cell) != dest {
                        moves.push((cell as u32, dest));
                    }
                }
                moves.sort_unstable();
                moves.dedup();
                m.record_migrations(comm, &moves)
            }
        }
    }
}

/// Result of [`Decomposer::count_in_domain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainCount {
    /// Particles this rank will own.
    pub local: u64,
    /// Particles in the job.
    pub total: u64,
    /// Working buffer size for this rank, `local` plus slack.
    pub capacity: usize,
    /// Whether the mesh was repartitioned.
    pub rebalanced: bool,
}

/// Builds and rebalances partitions by a [`DecompositionConfig`].
#[derive(Clone, Debug, Default)]
pub struct Decomposer {
    config: DecompositionConfig,
}

impl Decomposer {
    /// Decomposer for `config`.
    pub fn new(config: DecompositionConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    /// Collective: partition `volume` given each rank's local positions.
    pub fn decompose<C: Communicator>(
        &self,
        comm: &C,
        volume: SimulationVolume,
        positions: &[[f64; 3]],
    ) -> Result<Partition, DomainError> {
        let _span = info_span!("decompose", rank = %comm.rank()).entered();
        match self.config.strategy {
            DecompositionStrategy::Slab => {
                SlabDecomposition::decompose(comm, volume, positions, &self.config).map(Into::into)
            }
            DecompositionStrategy::Mesh => {
                MeshDecomposition::decompose(comm, volume, &self.config).map(Into::into)
            }
        }
    }

    /// Collective: count how many of every rank's read particles each rank
    /// owns, repartitioning the mesh once if the load is uneven.
    ///
    /// `positions` are the particles this rank read, wherever they belong.
    pub fn count_in_domain<C: Communicator>(
        &self,
        comm: &C,
        partition: &mut Partition,
        positions: &[[f64; 3]],
        buffer_slack: f64,
    ) -> Result<DomainCount, DomainError> {
        let _span = info_span!("count_in_domain", rank = %comm.rank()).entered();
        let mut rebalanced = false;
        let mut per_rank = vec![0u64; comm.size()];
        match &mut partition.kind {
            PartitionKind::Slab(slab) => {
                for &p in positions {
                    per_rank[slab.locate(p)?.index()] += 1;
                }
            }
            PartitionKind::Mesh(mesh) => {
                mesh.reset_counts();
                for &p in positions {
                    mesh.count(p)?;
                }
                if mesh.rebalance(comm, self.config.imbalance_limit)? {
                    rebalanced = true;
                }
                for &p in positions {
                    per_rank[mesh.locate(p)?.index()] += 1;
                }
            }
        }
        let per_rank = comm.all_reduce_sum_vec(per_rank)?;
        let local = per_rank[comm.rank().index()];
        let total = per_rank.iter().sum();
        let capacity = local as usize + (local as f64 * buffer_slack).ceil() as usize;
        if comm.rank() == Rank::ROOT {
            info!(total, per_rank = ?per_rank, rebalanced, "particles counted in domains");
        }
        Ok(DomainCount {
            local,
            total,
            capacity,
            rebalanced,
        })
    }
}
