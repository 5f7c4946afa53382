//! The global send-count matrix and the shuffled rank-pair schedule.

use crate::comm::Communicator;
use haloweave_core::{CommError, Rank};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// `P x P` table whose entry `(i, j)` is the number of items rank `i`
/// sends to rank `j`. The diagonal is always zero.
///
/// The only public constructor is the all-gather [`gather`](Self::gather),
/// so holding a matrix proves every rank contributed its row and sees the
/// same table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendCountMatrix {
    size: usize,
    /// Row-major, `counts[src * size + dst]`.
    counts: Vec<u64>,
}

impl SendCountMatrix {
    /// All-gather each rank's per-destination counts.
    ///
    /// `local[j]` is what this rank will send to rank `j`; the entry for
    /// this rank itself is ignored.
    pub fn gather<C: Communicator>(comm: &C, local: &[u64]) -> Result<Self, CommError> {
        let size = comm.size();
        if local.len() != size {
            return Err(CommError::ShapeMismatch {
                expected: size,
                got: local.len(),
            });
        }
        let mut row = local.to_vec();
        row[comm.rank().index()] = 0;
        let rows = comm.all_gather(row)?;
        Ok(Self::from_rows(&rows))
    }

    pub(crate) fn from_rows(rows: &[Vec<u64>]) -> Self {
        let size = rows.len();
        let mut counts = Vec::with_capacity(size * size);
        for (src, row) in rows.iter().enumerate() {
            counts.extend((0..size).map(|dst| {
                if dst == src {
                    0
                } else {
                    row.get(dst).copied().unwrap_or(0)
                }
            }));
        }
        Self { size, counts }
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Items `src` sends to `dst`.
    pub fn get(&self, src: Rank, dst: Rank) -> u64 {
        self.counts[src.index() * self.size + dst.index()]
    }

    /// Row of `src`: what it sends to every rank.
    pub fn row(&self, src: Rank) -> &[u64] {
        let start = src.index() * self.size;
        &self.counts[start..start + self.size]
    }

    /// Total `src` sends (its NExport).
    pub fn send_total(&self, src: Rank) -> u64 {
        self.row(src).iter().sum()
    }

    /// Total `dst` receives (its NImport): the column sum.
    pub fn recv_total(&self, dst: Rank) -> u64 {
        Rank::all(self.size).map(|src| self.get(src, dst)).sum()
    }

    /// Start of each destination's run in `src`'s outgoing buffer.
    pub fn send_offsets(&self, src: Rank) -> Vec<usize> {
        exclusive_prefix(self.row(src).iter().copied())
    }

    /// Start of each source's run in `dst`'s incoming buffer.
    pub fn recv_offsets(&self, dst: Rank) -> Vec<usize> {
        exclusive_prefix(Rank::all(self.size).map(|src| self.get(src, dst)))
    }

    /// Unordered pairs `(i, j)`, `i < j`, with traffic in either direction,
    /// shuffled deterministically by `seed`.
    ///
    /// Every rank computes the same schedule and executes the pairs it is
    /// part of in this order. Because the order is global, the lowest
    /// unfinished pair can always make progress.
    pub fn comm_pairs(&self, seed: u64) -> Vec<(Rank, Rank)> {
        let mut pairs = Vec::new();
        for i in 0..self.size {
            for j in (i + 1)..self.size {
                let (a, b) = (Rank::from_index(i), Rank::from_index(j));
                if self.get(a, b) > 0 || self.get(b, a) > 0 {
                    pairs.push((a, b));
                }
            }
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        pairs.shuffle(&mut rng);
        pairs
    }
}

fn exclusive_prefix(counts: impl Iterator<Item = u64>) -> Vec<usize> {
    let mut acc = 0usize;
    counts
        .map(|c| {
            let start = acc;
            acc += c as usize;
            start
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCluster;
    use proptest::prelude::*;
    use std::time::Duration;

    fn matrix(rows: &[&[u64]]) -> SendCountMatrix {
        let rows: Vec<Vec<u64>> = rows.iter().map(|r| r.to_vec()).collect();
        SendCountMatrix::from_rows(&rows)
    }

    #[test]
    fn diagonal_is_forced_to_zero() {
        let m = matrix(&[&[5, 1], &[2, 7]]);
        assert_eq!(m.get(Rank(0), Rank(0)), 0);
        assert_eq!(m.get(Rank(1), Rank(1)), 0);
        assert_eq!(m.send_total(Rank(0)), 1);
        assert_eq!(m.recv_total(Rank(0)), 2);
    }

    #[test]
    fn offsets_are_exclusive_prefix_sums() {
        let m = matrix(&[&[0, 2, 3], &[1, 0, 4], &[5, 6, 0]]);
        assert_eq!(m.send_offsets(Rank(2)), vec![0, 5, 11]);
        assert_eq!(m.recv_offsets(Rank(2)), vec![0, 3, 7]);
    }

    #[test]
    fn pairs_skip_silent_ranks_and_are_reproducible() {
        let m = matrix(&[&[0, 1, 0, 0], &[0, 0, 0, 0], &[0, 0, 0, 3], &[1, 0, 0, 0]]);
        let pairs = m.comm_pairs(4322);
        let mut sorted = pairs.clone();
        sorted.sort();
        assert_eq!(sorted, vec![(Rank(0), Rank(1)), (Rank(0), Rank(3)), (Rank(2), Rank(3))]);
        assert_eq!(pairs, m.comm_pairs(4322));
    }

    #[test]
    fn gather_agrees_on_every_rank() {
        let out = LocalCluster::new(3)
            .with_recv_timeout(Duration::from_secs(10))
            .run(|comm| {
                let me = comm.rank().0 as u64;
                let local: Vec<u64> = (0..3).map(|j| me * 10 + j).collect();
                SendCountMatrix::gather(&comm, &local)
            })
            .unwrap();
        let first = out[0].clone().unwrap();
        for m in &out {
            assert_eq!(m.as_ref().unwrap(), &first);
        }
        assert_eq!(first.get(Rank(1), Rank(2)), 12);
        assert_eq!(first.get(Rank(1), Rank(1)), 0);
    }

    proptest! {
        #[test]
        fn row_and_column_totals_balance(
            rows in (1usize..6).prop_flat_map(|n| {
                proptest::collection::vec(proptest::collection::vec(0u64..50, n), n)
            })
        ) {
            let m = SendCountMatrix::from_rows(&rows);
            let sent: u64 = Rank::all(m.size()).map(|r| m.send_total(r)).sum();
            let received: u64 = Rank::all(m.size()).map(|r| m.recv_total(r)).sum();
            prop_assert_eq!(sent, received);
        }
    }
}
