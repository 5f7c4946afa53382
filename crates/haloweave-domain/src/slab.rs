//! Slab decomposition: one axis-aligned box per rank.
//!
//! The rank count is factored as `a * 2^b`; `b + 1` halvings are dealt to
//! the axes round-robin, largest-variance axis first, and the first axis
//! absorbs the odd factor `a`. Boundaries along each axis are placed so
//! that every slab holds the same number of particles according to a
//! global histogram (or at equal widths). Boxes are closed and scanned in
//! rank order, so a point on a shared face belongs to the lower rank.

use haloweave_comm::Communicator;
use haloweave_core::{
    Aabb, DecompositionConfig, DomainError, Rank, SearchBox, SimulationVolume, SlabBoundaries,
};
use smallvec::SmallVec;
use tracing::{error, info};

/// Factor `num_ranks` as `a * 2^b` with the largest `b <= floor(log2 P) - 1`.
pub fn factor_ranks(num_ranks: usize) -> (usize, u32) {
    if num_ranks <= 1 {
        return (1, 0);
    }
    let max_b = num_ranks.ilog2().saturating_sub(1);
    let b = num_ranks.trailing_zeros().min(max_b);
    (num_ranks >> b, b)
}

/// Slabs per axis (indexed by axis) for `num_ranks` ranks.
///
/// The product of the result is always `num_ranks`.
pub fn slab_counts(num_ranks: usize, axis_order: [usize; 3]) -> [usize; 3] {
    let mut counts = [1usize; 3];
    if num_ranks <= 1 {
        return counts;
    }
    let (a, b) = factor_ranks(num_ranks);
    let mut doublings = [0u32; 3];
    for split in 0..=b {
        doublings[axis_order[split as usize % 3]] += 1;
    }
    for axis in 0..3 {
        counts[axis] = 1 << doublings[axis];
    }
    let first = axis_order[0];
    counts[first] = counts[first] / 2 * a;
    counts
}

/// Global first and second moments of particle positions per axis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisMoments {
    count: u64,
    sum: [f64; 3],
    sum_sq: [f64; 3],
}

impl AxisMoments {
    /// Moments of `positions`.
    pub fn of(positions: &[[f64; 3]]) -> Self {
        let mut m = Self {
            count: positions.len() as u64,
            ..Self::default()
        };
        for p in positions {
            for k in 0..3 {
                m.sum[k] += p[k];
                m.sum_sq[k] += p[k] * p[k];
            }
        }
        m
    }

    /// Combine two partial moments.
    pub fn merge(mut self, other: &Self) -> Self {
        self.count += other.count;
        for k in 0..3 {
            self.sum[k] += other.sum[k];
            self.sum_sq[k] += other.sum_sq[k];
        }
        self
    }

    /// Population variance per axis; zero without particles.
    pub fn variance(&self) -> [f64; 3] {
        if self.count == 0 {
            return [0.0; 3];
        }
        let n = self.count as f64;
        [0, 1, 2].map(|k| {
            let mean = self.sum[k] / n;
            (self.sum_sq[k] / n - mean * mean).max(0.0)
        })
    }

    /// Axes by descending variance, ties in axis order.
    pub fn axis_order(&self) -> [usize; 3] {
        let var = self.variance();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| var[b].total_cmp(&var[a]));
        order
    }
}

/// Per-axis slab edges: `edges[axis]` has `counts[axis] + 1` ascending values.
pub type SlabEdges = [Vec<f64>; 3];

fn equal_width_edges(bounds: &Aabb, counts: [usize; 3]) -> SlabEdges {
    [0, 1, 2].map(|axis| {
        let n = counts[axis];
        let lo = bounds.min[axis];
        let width = bounds.max[axis] - lo;
        (0..=n)
            .map(|c| {
                if c == n {
                    bounds.max[axis]
                } else {
                    lo + width * c as f64 / n as f64
                }
            })
            .collect()
    })
}

fn histogram(bounds: &Aabb, positions: &[[f64; 3]], bins: usize) -> Vec<u64> {
    let mut hist = vec![0u64; 3 * bins];
    let extent = bounds.extent();
    for p in positions {
        for axis in 0..3 {
            let rel = if extent[axis] > 0.0 {
                (p[axis] - bounds.min[axis]) / extent[axis]
            } else {
                0.0
            };
            let bin = ((rel * bins as f64).floor().max(0.0) as usize).min(bins - 1);
            hist[axis * bins + bin] += 1;
        }
    }
    hist
}

fn equal_count_edges(bounds: &Aabb, counts: [usize; 3], hist: &[u64], bins: usize) -> SlabEdges {
    [0, 1, 2].map(|axis| {
        let n = counts[axis];
        let axis_hist = &hist[axis * bins..(axis + 1) * bins];
        let total: u64 = axis_hist.iter().sum();
        let lo = bounds.min[axis];
        let bin_width = (bounds.max[axis] - lo) / bins as f64;
        let mut edges = Vec::with_capacity(n + 1);
        edges.push(lo);
        let mut bin = 0usize;
        let mut before = 0u64;
        for c in 1..n {
            let target = total as f64 * c as f64 / n as f64;
            while bin < bins - 1 && ((before + axis_hist[bin]) as f64) < target {
                before += axis_hist[bin];
                bin += 1;
            }
            let inside = axis_hist[bin].max(1) as f64;
            let frac = ((target - before as f64) / inside).clamp(0.0, 1.0);
            let edge = lo + (bin as f64 + frac) * bin_width;
            let prev = edges.last().copied().unwrap_or(lo);
            edges.push(edge.max(prev));
        }
        edges.push(bounds.max[axis]);
        edges
    })
}

/// One closed box per rank, gap-free over the volume.
#[derive(Clone, Debug, PartialEq)]
pub struct SlabDecomposition {
    volume: SimulationVolume,
    axis_order: [usize; 3],
    counts: [usize; 3],
    boxes: Vec<Aabb>,
}

impl SlabDecomposition {
    /// Build boxes from per-axis edges.
    ///
    /// Rank of slab `(i, j, k)` along `(axis_order[0], axis_order[1],
    /// axis_order[2])` is `i + j * n0 + k * n0 * n1`.
    pub fn from_edges(
        volume: SimulationVolume,
        axis_order: [usize; 3],
        edges: SlabEdges,
    ) -> Result<Self, DomainError> {
        let counts = [0, 1, 2].map(|axis| edges[axis].len().saturating_sub(1));
        if counts.contains(&0) {
            return Err(DomainError::InvalidDecomposition {
                reason: "every axis needs at least one slab".into(),
            });
        }
        for (axis, e) in edges.iter().enumerate() {
            if e.windows(2).any(|w| w[1] < w[0]) {
                return Err(DomainError::InvalidDecomposition {
                    reason: format!("slab edges along axis {axis} are not ascending"),
                });
            }
        }
        let [o0, o1, o2] = axis_order;
        let mut boxes = Vec::with_capacity(counts.iter().product());
        for k in 0..counts[o2] {
            for j in 0..counts[o1] {
                for i in 0..counts[o0] {
                    let mut b = Aabb::new([0.0; 3], [0.0; 3]);
                    for (axis, slot) in [(o0, i), (o1, j), (o2, k)] {
                        b.min[axis] = edges[axis][slot];
                        b.max[axis] = edges[axis][slot + 1];
                    }
                    boxes.push(b);
                }
            }
        }
        Ok(Self {
            volume,
            axis_order,
            counts,
            boxes,
        })
    }

    /// Equal-width slabs for `num_ranks` ranks.
    pub fn uniform(
        volume: SimulationVolume,
        num_ranks: usize,
        axis_order: [usize; 3],
    ) -> Result<Self, DomainError> {
        let counts = slab_counts(num_ranks, axis_order);
        Self::from_edges(volume, axis_order, equal_width_edges(&volume.bounds, counts))
    }

    /// Collective: build slabs from every rank's local particle positions.
    ///
    /// Axis order comes from the global position variance; boundaries are
    /// computed on the root from globally reduced histograms and broadcast.
    pub fn decompose<C: Communicator>(
        comm: &C,
        volume: SimulationVolume,
        positions: &[[f64; 3]],
        config: &DecompositionConfig,
    ) -> Result<Self, DomainError> {
        let moments = comm
            .all_gather(AxisMoments::of(positions))?
            .iter()
            .fold(AxisMoments::default(), |acc, m| acc.merge(m));
        let axis_order = moments.axis_order();
        let counts = slab_counts(comm.size(), axis_order);

        let edges = match config.slab_boundaries {
            SlabBoundaries::EqualWidth => equal_width_edges(&volume.bounds, counts),
            SlabBoundaries::EqualCount => {
                let bins = config.histogram_bins.max(1);
                let hist = comm.all_reduce_sum_vec(histogram(&volume.bounds, positions, bins))?;
                let root_edges = if comm.rank() == Rank::ROOT {
                    if moments.count == 0 {
                        equal_width_edges(&volume.bounds, counts)
                    } else {
                        equal_count_edges(&volume.bounds, counts, &hist, bins)
                    }
                } else {
                    SlabEdges::default()
                };
                comm.broadcast(Rank::ROOT, root_edges)?
            }
        };

        let slabs = Self::from_edges(volume, axis_order, edges)?;
        if comm.rank() == Rank::ROOT {
            info!(
                ranks = comm.size(),
                axis_order = ?axis_order,
                slabs = ?slabs.counts,
                "slab decomposition"
            );
            for (rank, b) in slabs.boxes.iter().enumerate() {
                info!(rank, min = ?b.min, max = ?b.max, "slab domain");
            }
        }
        Ok(slabs)
    }

    /// Number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.boxes.len()
    }

    /// Box of every rank, in rank order.
    pub fn boxes(&self) -> &[Aabb] {
        &self.boxes
    }

    /// Box of `rank`.
    pub fn bounds(&self, rank: Rank) -> &Aabb {
        &self.boxes[rank.index()]
    }

    /// Split order of the axes.
    pub fn axis_order(&self) -> [usize; 3] {
        self.axis_order
    }

    /// Slabs per axis.
    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// The volume being partitioned.
    pub fn volume(&self) -> &SimulationVolume {
        &self.volume
    }

    /// Owner of `position`: the first box containing it, scanning ranks
    /// in order.
    pub fn locate(&self, position: [f64; 3]) -> Result<Rank, DomainError> {
        let p = self.volume.wrap(position);
        match self.boxes.iter().position(|b| b.contains(p)) {
            Some(i) => Ok(Rank::from_index(i)),
            None => {
                error!(position = ?position, "position outside every slab");
                Err(DomainError::DomainGap { position })
            }
        }
    }

    /// Append every rank other than `me` whose box meets `search` or one of
    /// its periodic images. Each rank is appended at most once.
    pub fn overlapping_ranks(&self, search: &SearchBox, me: Rank, out: &mut SmallVec<[Rank; 8]>) {
        let images = self.volume.periodic_images(search);
        for (i, b) in self.boxes.iter().enumerate() {
            let rank = Rank::from_index(i);
            if rank == me {
                continue;
            }
            if b.overlaps(search) || images.iter().any(|image| b.overlaps(image)) {
                out.push(rank);
            }
        }
    }

    /// Collective: grow this rank's box to cover `positions` (particles that
    /// migrated in) and share the updated boxes.
    pub fn extend_to_cover<C: Communicator>(
        &mut self,
        comm: &C,
        positions: &[[f64; 3]],
    ) -> Result<(), DomainError> {
        let mut mine = self.boxes[comm.rank().index()];
        for p in positions {
            mine.include(self.volume.wrap(*p));
        }
        self.boxes = comm.all_gather(mine)?;
        Ok(())
    }

    pub(crate) fn scale(&mut self, factor: f64) {
        self.volume.scale(factor);
        for b in &mut self.boxes {
            *b = b.scaled(factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn factorisation_matches_known_counts() {
        assert_eq!(factor_ranks(1), (1, 0));
        assert_eq!(factor_ranks(2), (2, 0));
        assert_eq!(factor_ranks(6), (3, 1));
        assert_eq!(factor_ranks(8), (2, 2));
        assert_eq!(factor_ranks(12), (3, 2));
        assert_eq!(factor_ranks(16), (2, 3));
    }

    #[test]
    fn first_axis_takes_odd_factor() {
        assert_eq!(slab_counts(6, [0, 1, 2]), [3, 2, 1]);
        assert_eq!(slab_counts(12, [2, 0, 1]), [2, 2, 3]);
        assert_eq!(slab_counts(8, [1, 2, 0]), [2, 2, 2]);
        assert_eq!(slab_counts(16, [0, 1, 2]), [4, 2, 2]);
        assert_eq!(slab_counts(7, [0, 1, 2]), [7, 1, 1]);
    }

    #[test]
    fn rank_numbering_runs_first_axis_fastest() {
        let vol = SimulationVolume::periodic_cube(1.0);
        let slabs = SlabDecomposition::uniform(vol, 4, [0, 1, 2]).unwrap();
        assert_eq!(slabs.counts(), [2, 2, 1]);
        assert_eq!(slabs.locate([0.1, 0.1, 0.5]).unwrap(), Rank(0));
        assert_eq!(slabs.locate([0.9, 0.1, 0.5]).unwrap(), Rank(1));
        assert_eq!(slabs.locate([0.1, 0.9, 0.5]).unwrap(), Rank(2));
        assert_eq!(slabs.locate([0.9, 0.9, 0.5]).unwrap(), Rank(3));
    }

    #[test]
    fn shared_face_goes_to_lower_rank() {
        let vol = SimulationVolume::periodic_cube(1.0);
        let slabs = SlabDecomposition::uniform(vol, 2, [0, 1, 2]).unwrap();
        assert_eq!(slabs.locate([0.5, 0.3, 0.3]).unwrap(), Rank(0));
    }

    #[test]
    fn open_volume_reports_gap() {
        let vol = SimulationVolume::new(Aabb::unit(), false);
        let slabs = SlabDecomposition::uniform(vol, 2, [0, 1, 2]).unwrap();
        assert_eq!(
            slabs.locate([1.5, 0.5, 0.5]),
            Err(DomainError::DomainGap {
                position: [1.5, 0.5, 0.5]
            })
        );
    }

    #[test]
    fn equal_count_edges_split_at_median() {
        let bounds = Aabb::unit();
        // 100 particles uniformly in x < 0.25, 100 in x > 0.75.
        let mut positions = Vec::new();
        for i in 0..100 {
            positions.push([0.25 * i as f64 / 100.0, 0.5, 0.5]);
            positions.push([0.75 + 0.25 * i as f64 / 100.0, 0.5, 0.5]);
        }
        let bins = 64;
        let hist = histogram(&bounds, &positions, bins);
        let edges = equal_count_edges(&bounds, [2, 1, 1], &hist, bins);
        assert_eq!(edges[0].len(), 3);
        assert!(edges[0][1] >= 0.24 && edges[0][1] <= 0.76, "edge {}", edges[0][1]);
        assert_eq!(edges[1], vec![0.0, 1.0]);
    }

    #[test]
    fn periodic_straddle_finds_far_rank_once() {
        let vol = SimulationVolume::periodic_cube(1.0);
        let slabs = SlabDecomposition::uniform(vol, 4, [0, 1, 2]).unwrap();
        let mut out = SmallVec::new();
        // Near x = 0 on rank 0: the wrapped image reaches rank 1 at x ~ 1.
        slabs.overlapping_ranks(&SearchBox::around([0.01, 0.25, 0.5], 0.05), Rank(0), &mut out);
        assert_eq!(out.as_slice(), &[Rank(1)]);
    }

    #[test]
    fn variance_orders_axes() {
        let positions = [[0.0, 0.5, 0.5], [1.0, 0.4, 0.5], [0.5, 0.6, 0.5]];
        assert_eq!(AxisMoments::of(&positions).axis_order(), [0, 1, 2]);
        let positions = [[0.5, 0.0, 0.4], [0.5, 1.0, 0.6]];
        assert_eq!(AxisMoments::of(&positions).axis_order(), [1, 2, 0]);
    }

    fn arb_order() -> impl Strategy<Value = [usize; 3]> {
        prop_oneof![
            Just([0, 1, 2]),
            Just([0, 2, 1]),
            Just([1, 0, 2]),
            Just([1, 2, 0]),
            Just([2, 0, 1]),
            Just([2, 1, 0]),
        ]
    }

    proptest! {
        #[test]
        fn counts_multiply_to_ranks(n in 1usize..200, order in arb_order()) {
            let c = slab_counts(n, order);
            prop_assert_eq!(c[0] * c[1] * c[2], n);
        }

        #[test]
        fn every_point_has_exactly_one_owner(
            n in 1usize..33,
            order in arb_order(),
            x in 0.0f64..=1.0, y in 0.0f64..=1.0, z in 0.0f64..=1.0,
        ) {
            let vol = SimulationVolume::new(Aabb::unit(), false);
            let slabs = SlabDecomposition::uniform(vol, n, order).unwrap();
            prop_assert_eq!(slabs.num_ranks(), n);
            let owner = slabs.locate([x, y, z]);
            prop_assert!(owner.is_ok());
            let first = owner.unwrap();
            // Any other box containing the point must be a later rank.
            for (i, b) in slabs.boxes().iter().enumerate() {
                if b.contains([x, y, z]) {
                    prop_assert!(i >= first.index());
                }
            }
        }
    }
}
