//! Mesh decomposition: a uniform `n^3` cell grid whose cells are dealt to
//! ranks in contiguous runs along the Morton curve.
//!
//! Owner lookup is a direct cell-index computation. Each rank also counts
//! the particles it sees per cell; the global counts drive [`rebalance`],
//! which re-cuts the runs when the per-rank load is too uneven.
//!
//! [`rebalance`]: MeshDecomposition::rebalance

use crate::morton::{flat_index, z_order};
use haloweave_comm::Communicator;
use haloweave_core::{DecompositionConfig, DomainError, Rank, SearchBox, SimulationVolume};
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

/// Particles per rank above which more ranks are suggested.
const PARTICLES_PER_RANK_HINT: f64 = 1.0e7;

/// Uniform grid with a cell-to-rank table.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshDecomposition {
    volume: SimulationVolume,
    cells_per_dim: u32,
    cell_width: [f64; 3],
    inv_cell_width: [f64; 3],
    num_ranks: usize,
    /// Owner per flat cell index.
    owners: Vec<Rank>,
    /// Flat cell indices along the Morton curve.
    z_order: Vec<u32>,
    /// Ranks that received particles of a cell through migration. Additive.
    extra_owners: Vec<SmallVec<[Rank; 2]>>,
    /// Particles this rank has counted per cell.
    cell_counts: Vec<u64>,
}

impl MeshDecomposition {
    /// Grid of `cells_per_dim^3` cells over `volume`, dealt to `num_ranks`.
    ///
    /// Each rank gets `max(floor(cells / P), 1)` consecutive cells along the
    /// curve and the last rank absorbs the remainder.
    pub fn new(
        volume: SimulationVolume,
        cells_per_dim: u32,
        num_ranks: usize,
    ) -> Result<Self, DomainError> {
        if cells_per_dim == 0 || cells_per_dim > DecompositionConfig::MAX_CELLS_PER_DIM {
            return Err(DomainError::InvalidDecomposition {
                reason: format!("{cells_per_dim} cells per dimension is outside 1..=65536"),
            });
        }
        let num_cells = cells_per_dim as usize * cells_per_dim as usize * cells_per_dim as usize;
        if num_cells < num_ranks {
            return Err(DomainError::InvalidDecomposition {
                reason: format!(
                    "{num_cells} mesh cells cannot give each of {num_ranks} ranks a cell"
                ),
            });
        }
        let extent = volume.bounds.extent();
        let cell_width = extent.map(|e| e / f64::from(cells_per_dim));
        let inv_cell_width = cell_width.map(|w| if w > 0.0 { 1.0 / w } else { 0.0 });
        let order = z_order(cells_per_dim);

        let per_rank = (num_cells / num_ranks.max(1)).max(1);
        let last = num_ranks.saturating_sub(1);
        let mut owners = vec![Rank::ROOT; num_cells];
        for (i, &cell) in order.iter().enumerate() {
            owners[cell as usize] = Rank::from_index((i / per_rank).min(last));
        }

        Ok(Self {
            volume,
            cells_per_dim,
            cell_width,
            inv_cell_width,
            num_ranks,
            owners,
            z_order: order,
            extra_owners: vec![SmallVec::new(); num_cells],
            cell_counts: vec![0; num_cells],
        })
    }

    /// Grid sized by `config` for the job's rank count; rank 0 logs it.
    pub fn decompose<C: Communicator>(
        comm: &C,
        volume: SimulationVolume,
        config: &DecompositionConfig,
    ) -> Result<Self, DomainError> {
        let n = config.resolved_cells_per_dim(comm.size());
        let mesh = Self::new(volume, n, comm.size())?;
        if comm.rank() == Rank::ROOT {
            info!(
                ranks = comm.size(),
                cells_per_dim = n,
                cell_width = ?mesh.cell_width,
                "mesh decomposition"
            );
        }
        Ok(mesh)
    }

    /// Cells along each axis.
    pub fn cells_per_dim(&self) -> u32 {
        self.cells_per_dim
    }

    /// Total cells.
    pub fn num_cells(&self) -> usize {
        self.owners.len()
    }

    /// Number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// Edge lengths of one cell.
    pub fn cell_width(&self) -> [f64; 3] {
        self.cell_width
    }

    /// The volume being partitioned.
    pub fn volume(&self) -> &SimulationVolume {
        &self.volume
    }

    /// Flat cell indices in curve order.
    pub fn z_order(&self) -> &[u32] {
        &self.z_order
    }

    /// Owner of a flat cell index.
    pub fn owner_of_cell(&self, cell: usize) -> Rank {
        self.owners[cell]
    }

    /// Ranks that gained particles of `cell` through migration.
    pub fn extra_owners(&self, cell: usize) -> &[Rank] {
        &self.extra_owners[cell]
    }

    /// Curve positions of the cells owned by `rank`, ascending.
    pub fn curve_positions_of(&self, rank: Rank) -> Vec<usize> {
        self.z_order
            .iter()
            .enumerate()
            .filter(|&(_, &cell)| self.owners[cell as usize] == rank)
            .map(|(i, _)| i)
            .collect()
    }

    /// Flat index of the cell containing `position`.
    pub fn cell_of(&self, position: [f64; 3]) -> Result<usize, DomainError> {
        let p = self.volume.wrap(position);
        if !self.volume.periodic && !self.volume.bounds.contains(p) {
            error!(position = ?position, "position outside the mesh");
            return Err(DomainError::DomainGap { position });
        }
        let n = self.cells_per_dim;
        let idx = [0, 1, 2].map(|k| {
            let rel = (p[k] - self.volume.bounds.min[k]) * self.inv_cell_width[k];
            (rel.floor().max(0.0) as u32).min(n - 1)
        });
        Ok(flat_index(n, idx[0], idx[1], idx[2]))
    }

    /// Owner of `position`.
    pub fn locate(&self, position: [f64; 3]) -> Result<Rank, DomainError> {
        Ok(self.owners[self.cell_of(position)?])
    }

    /// Owner of `position`, counting it against its cell.
    pub fn count(&mut self, position: [f64; 3]) -> Result<Rank, DomainError> {
        let cell = self.cell_of(position)?;
        self.cell_counts[cell] += 1;
        Ok(self.owners[cell])
    }

    /// Particles counted per flat cell index on this rank.
    pub fn cell_counts(&self) -> &[u64] {
        &self.cell_counts
    }

    /// Forget all counts.
    pub fn reset_counts(&mut self) {
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
    }

    /// Particles per rank implied by per-cell counts.
    pub fn rank_loads(&self, counts: &[u64]) -> Vec<u64> {
        let mut loads = vec![0u64; self.num_ranks];
        for (cell, &c) in counts.iter().enumerate() {
            loads[self.owners[cell].index()] += c;
        }
        loads
    }

    /// `(max - min) / mean` of per-rank loads; zero when empty.
    pub fn imbalance(loads: &[u64]) -> f64 {
        let total: u64 = loads.iter().sum();
        if loads.is_empty() || total == 0 {
            return 0.0;
        }
        let mean = total as f64 / loads.len() as f64;
        let max = loads.iter().copied().max().unwrap_or(0);
        let min = loads.iter().copied().min().unwrap_or(0);
        (max - min) as f64 / mean
    }

    /// Re-cut the curve so each rank gets roughly the mean load.
    ///
    /// Walks cells in curve order, moving to the next rank once the running
    /// count exceeds the mean. Returns the new per-rank loads, or
    /// [`DomainError::ZeroPopulationDomain`] if any rank would be empty.
    pub fn repartition(&mut self, counts: &[u64]) -> Result<Vec<u64>, DomainError> {
        let total: u64 = counts.iter().sum();
        let mean = total as f64 / self.num_ranks as f64;
        let last = self.num_ranks.saturating_sub(1);
        let mut rank = 0usize;
        let mut running = 0u64;
        for &cell in &self.z_order {
            let cell = cell as usize;
            self.owners[cell] = Rank::from_index(rank);
            running += counts[cell];
            if running as f64 > mean && rank < last {
                rank += 1;
                running = 0;
            }
        }
        let loads = self.rank_loads(counts);
        if let Some(empty) = loads.iter().position(|&l| l == 0) {
            let suggested_ranks = ((total as f64 / PARTICLES_PER_RANK_HINT).ceil() as u64).max(1);
            error!(
                total,
                cells_per_dim = self.cells_per_dim,
                suggested_ranks,
                "rank {empty} would hold no particles; increase mesh resolution or reduce ranks"
            );
            return Err(DomainError::ZeroPopulationDomain {
                rank: Rank::from_index(empty),
                total,
                num_ranks: self.num_ranks,
                cells_per_dim: Some(self.cells_per_dim),
                suggested_ranks,
            });
        }
        Ok(loads)
    }

    /// Collective: combine every rank's cell counts and repartition once if
    /// the load imbalance exceeds `limit`. Returns whether owners changed.
    pub fn rebalance<C: Communicator>(&mut self, comm: &C, limit: f64) -> Result<bool, DomainError> {
        let counts = comm.all_reduce_sum_vec(self.cell_counts.clone())?;
        let loads = self.rank_loads(&counts);
        let before = Self::imbalance(&loads);
        if before <= limit {
            debug!(rank = %comm.rank(), imbalance = before, limit, "mesh balanced");
            return Ok(false);
        }
        if comm.rank() == Rank::ROOT {
            warn!(imbalance = before, limit, "load imbalance, repartitioning mesh");
        }
        let loads = self.repartition(&counts)?;
        if comm.rank() == Rank::ROOT {
            info!(imbalance = Self::imbalance(&loads), loads = ?loads, "mesh repartitioned");
        }
        Ok(true)
    }

    fn axis_cells(&self, lo: f64, hi: f64, axis: usize) -> Vec<u32> {
        let n = i64::from(self.cells_per_dim);
        let min = self.volume.bounds.min[axis];
        let first = ((lo - min) * self.inv_cell_width[axis]).floor() as i64;
        let last = ((hi - min) * self.inv_cell_width[axis]).floor() as i64;
        if self.volume.periodic {
            if last - first + 1 >= n {
                return (0..n as u32).collect();
            }
            (first..=last).map(|i| i.rem_euclid(n) as u32).collect()
        } else {
            let first = first.max(0);
            let last = last.min(n - 1);
            (first..=last).map(|i| i as u32).collect()
        }
    }

    /// Append the owners and extra owners of every cell the search box
    /// covers, excluding `me`. Ranks may repeat.
    pub fn overlapping_ranks(&self, search: &SearchBox, me: Rank, out: &mut SmallVec<[Rank; 8]>) {
        let n = self.cells_per_dim;
        let xs = self.axis_cells(search.lo[0], search.hi[0], 0);
        let ys = self.axis_cells(search.lo[1], search.hi[1], 1);
        let zs = self.axis_cells(search.lo[2], search.hi[2], 2);
        for &ix in &xs {
            for &iy in &ys {
                for &iz in &zs {
                    let cell = flat_index(n, ix, iy, iz);
                    let owner = self.owners[cell];
                    if owner != me {
                        out.push(owner);
                    }
                    out.extend(self.extra_owners[cell].iter().copied().filter(|&r| r != me));
                }
            }
        }
    }

    /// Record that `rank` now holds particles of `cell`.
    pub fn add_owner(&mut self, cell: usize, rank: Rank) {
        if self.owners[cell] != rank && !self.extra_owners[cell].contains(&rank) {
            self.extra_owners[cell].push(rank);
        }
    }

    /// Collective: share every rank's `(cell, new owner)` migrations and add
    /// them to the extra-owner table.
    pub fn record_migrations<C: Communicator>(
        &mut self,
        comm: &C,
        moves: &[(u32, Rank)],
    ) -> Result<(), DomainError> {
        let all = comm.all_gather(moves.to_vec())?;
        let mut added = 0usize;
        for (cell, rank) in all.into_iter().flatten() {
            let before = self.extra_owners[cell as usize].len();
            self.add_owner(cell as usize, rank);
            added += self.extra_owners[cell as usize].len() - before;
        }
        debug!(rank = %comm.rank(), added, "mesh extra owners updated");
        Ok(())
    }

    pub(crate) fn scale(&mut self, factor: f64) {
        self.volume.scale(factor);
        self.cell_width = self.cell_width.map(|w| w * factor);
        self.inv_cell_width = self.inv_cell_width.map(|w| w / factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haloweave_core::Aabb;

    fn unit_mesh(n: u32, ranks: usize) -> MeshDecomposition {
        MeshDecomposition::new(SimulationVolume::periodic_cube(1.0), n, ranks).unwrap()
    }

    #[test]
    fn runs_are_contiguous_and_non_empty() {
        let mesh = unit_mesh(4, 8);
        for r in Rank::all(8) {
            let pos = mesh.curve_positions_of(r);
            assert_eq!(pos.len(), 8);
            assert!(pos.windows(2).all(|w| w[1] == w[0] + 1));
        }
    }

    #[test]
    fn last_rank_absorbs_remainder() {
        let mesh = unit_mesh(2, 3);
        let sizes: Vec<usize> = Rank::all(3).map(|r| mesh.curve_positions_of(r).len()).collect();
        assert_eq!(sizes, vec![2, 2, 4]);
    }

    #[test]
    fn too_few_cells_is_rejected() {
        let err = MeshDecomposition::new(SimulationVolume::periodic_cube(1.0), 2, 9).unwrap_err();
        assert!(matches!(err, DomainError::InvalidDecomposition { .. }));
    }

    #[test]
    fn locate_uses_cell_index() {
        let mesh = unit_mesh(2, 8);
        // 2^3 cells, one per rank, dealt in Morton order: x fastest.
        assert_eq!(mesh.locate([0.1, 0.1, 0.1]).unwrap(), Rank(0));
        assert_eq!(mesh.locate([0.9, 0.1, 0.1]).unwrap(), Rank(1));
        assert_eq!(mesh.locate([0.1, 0.9, 0.1]).unwrap(), Rank(2));
        assert_eq!(mesh.locate([0.1, 0.1, 0.9]).unwrap(), Rank(4));
        // Upper face of a periodic box wraps to the lower face.
        assert_eq!(mesh.locate([1.0, 0.1, 0.1]).unwrap(), Rank(0));
    }

    #[test]
    fn open_mesh_reports_gap() {
        let mesh = MeshDecomposition::new(SimulationVolume::new(Aabb::unit(), false), 2, 2).unwrap();
        assert!(matches!(
            mesh.locate([0.5, 1.2, 0.5]),
            Err(DomainError::DomainGap { .. })
        ));
        assert_eq!(mesh.locate([1.0, 1.0, 1.0]).unwrap(), mesh.locate([0.9, 0.9, 0.9]).unwrap());
    }

    #[test]
    fn counting_accumulates_per_cell() {
        let mut mesh = unit_mesh(2, 2);
        mesh.count([0.1, 0.1, 0.1]).unwrap();
        mesh.count([0.2, 0.2, 0.2]).unwrap();
        mesh.count([0.9, 0.9, 0.9]).unwrap();
        assert_eq!(mesh.cell_counts()[0], 2);
        assert_eq!(mesh.cell_counts()[7], 1);
        assert_eq!(mesh.rank_loads(mesh.cell_counts()), vec![2, 1]);
        mesh.reset_counts();
        assert!(mesh.cell_counts().iter().all(|&c| c == 0));
    }

    #[test]
    fn imbalance_metric() {
        assert_eq!(MeshDecomposition::imbalance(&[0, 0]), 0.0);
        assert!((MeshDecomposition::imbalance(&[30, 10]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn repartition_evens_out_load() {
        let mut mesh = unit_mesh(2, 2);
        // All weight in the first curve half would leave rank 1 empty before.
        let mut counts = vec![0u64; 8];
        for (i, &cell) in mesh.z_order().to_vec().iter().enumerate() {
            counts[cell as usize] = if i < 4 { 10 } else { 0 };
        }
        counts[mesh.z_order()[7] as usize] = 1;
        let loads = mesh.repartition(&counts).unwrap();
        assert_eq!(loads.iter().sum::<u64>(), 41);
        assert!(loads.iter().all(|&l| l > 0));
        assert_eq!(loads, vec![30, 11]);
    }

    #[test]
    fn repartition_rejects_empty_rank() {
        let mut mesh = unit_mesh(2, 4);
        let mut counts = vec![0u64; 8];
        counts[mesh.z_order()[0] as usize] = 100;
        let err = mesh.repartition(&counts).unwrap_err();
        match err {
            DomainError::ZeroPopulationDomain {
                total,
                suggested_ranks,
                cells_per_dim,
                ..
            } => {
                assert_eq!(total, 100);
                assert_eq!(suggested_ranks, 1);
                assert_eq!(cells_per_dim, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn search_wraps_cell_ranges() {
        let mesh = unit_mesh(4, 64);
        let mut out = SmallVec::new();
        let me = mesh.locate([0.01, 0.5, 0.5]).unwrap();
        mesh.overlapping_ranks(&SearchBox::around([0.01, 0.55, 0.55], 0.02), me, &mut out);
        let far = mesh.locate([0.99, 0.55, 0.55]).unwrap();
        assert!(out.contains(&far));
        assert!(!out.contains(&me));
    }

    #[test]
    fn extra_owners_are_additive() {
        let mut mesh = unit_mesh(2, 2);
        let owner = mesh.owner_of_cell(3);
        mesh.add_owner(3, owner);
        assert!(mesh.extra_owners(3).is_empty());
        let other = Rank(1 - owner.0);
        mesh.add_owner(3, other);
        mesh.add_owner(3, other);
        assert_eq!(mesh.extra_owners(3), &[other]);
        let mut out = SmallVec::new();
        let cell_centre = {
            let (ix, iy, iz) = crate::morton::unflatten(2, 3);
            [ix, iy, iz].map(|c| (f64::from(c) + 0.5) * 0.5)
        };
        mesh.overlapping_ranks(&SearchBox::around(cell_centre, 0.01), owner, &mut out);
        assert_eq!(out.as_slice(), &[other]);
    }
}
