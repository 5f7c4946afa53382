//! Export planning: which ranks a particle's search region reaches.

use crate::partition::Partition;
use haloweave_core::{Rank, SearchBox};
use smallvec::SmallVec;
use tracing::debug;

/// Search radius of the planned items.
#[derive(Clone, Copy, Debug)]
pub enum SearchRadius<'a> {
    /// One radius for every item.
    Fixed(f64),
    /// One radius per item. Items without a positive radius are skipped.
    PerItem(&'a [f64]),
}

impl SearchRadius<'_> {
    fn of(&self, index: usize) -> f64 {
        match self {
            SearchRadius::Fixed(r) => *r,
            SearchRadius::PerItem(radii) => radii.get(index).copied().unwrap_or(0.0),
        }
    }
}

/// Per-item destination lists and per-destination counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportPlan {
    destinations: Vec<SmallVec<[Rank; 4]>>,
    counts: Vec<u64>,
}

impl ExportPlan {
    /// Distinct destinations of item `index`, in discovery order.
    pub fn destinations(&self, index: usize) -> &[Rank] {
        &self.destinations[index]
    }

    /// Items exported to each rank; this rank's row of the send matrix.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total exports (NExport).
    pub fn n_export(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Number of planned items.
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// True if no items were planned.
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Every `(destination, item index)` pair, ready for
    /// [`sort_by_destination`](haloweave_comm::sort_by_destination).
    pub fn pairs(&self) -> impl Iterator<Item = (Rank, usize)> + '_ {
        self.destinations
            .iter()
            .enumerate()
            .flat_map(|(i, dests)| dests.iter().map(move |&d| (d, i)))
    }
}

/// Plans exports against a partition for this rank.
#[derive(Debug)]
pub struct ExportPlanner<'p> {
    partition: &'p Partition,
    me: Rank,
    /// Last item (plus one) exported to each rank.
    stamp: Vec<usize>,
    scratch: SmallVec<[Rank; 8]>,
}

impl<'p> ExportPlanner<'p> {
    /// Planner for rank `me`.
    pub fn new(partition: &'p Partition, me: Rank) -> Self {
        Self {
            partition,
            me,
            stamp: vec![0; partition.num_ranks()],
            scratch: SmallVec::new(),
        }
    }

    /// Plan exports for search spheres around `centers`.
    ///
    /// Each item is sent to a given rank at most once, however many of that
    /// rank's boxes, cells or periodic images the sphere's bounding box
    /// covers.
    pub fn plan(&mut self, centers: &[[f64; 3]], radius: SearchRadius<'_>) -> ExportPlan {
        self.stamp.iter_mut().for_each(|s| *s = 0);
        let mut counts = vec![0u64; self.partition.num_ranks()];
        let mut destinations = Vec::with_capacity(centers.len());
        for (i, &center) in centers.iter().enumerate() {
            let mut dests = SmallVec::new();
            let r = radius.of(i);
            if r > 0.0 {
                self.scratch.clear();
                self.partition
                    .overlapping_ranks(&SearchBox::around(center, r), self.me, &mut self.scratch);
                for &rank in &self.scratch {
                    let seen = &mut self.stamp[rank.index()];
                    if *seen != i + 1 {
                        *seen = i + 1;
                        counts[rank.index()] += 1;
                        dests.push(rank);
                    }
                }
            }
            destinations.push(dests);
        }
        let plan = ExportPlan {
            destinations,
            counts,
        };
        debug!(rank = %self.me, items = centers.len(), nexport = plan.n_export(), "exports planned");
        plan
    }
}
