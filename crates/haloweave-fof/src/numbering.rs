//! Global group numbering.
//!
//! Ranks are ordered by descending particle count (ties to the lower rank)
//! and each gets a contiguous id range after the ranks ahead of it, so the
//! biggest ranks, which tend to hold the biggest groups, get the lowest
//! offsets.

use haloweave_comm::Communicator;
use haloweave_core::{FofError, GroupId, Rank};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

/// Ranks in descending order of `counts`, ties broken by ascending rank.
pub fn rank_order(counts: &[u64]) -> Vec<Rank> {
    let mut heap: BinaryHeap<(u64, Reverse<u32>)> = counts
        .iter()
        .enumerate()
        .map(|(r, &c)| (c, Reverse(r as u32)))
        .collect();
    let mut order = Vec::with_capacity(counts.len());
    while let Some((_, Reverse(r))) = heap.pop() {
        order.push(Rank(r));
    }
    order
}

/// Per-rank offsets: the sum of `sizes` over the ranks ahead in
/// [`rank_order`] of `counts`.
pub fn offsets(counts: &[u64], sizes: &[u64]) -> Vec<u64> {
    let mut out = vec![0u64; counts.len()];
    let mut running = 0u64;
    for rank in rank_order(counts) {
        out[rank.index()] = running;
        running += sizes[rank.index()];
    }
    out
}

/// Reserved range of fresh group ids for the linker on one rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdBlock {
    rank: Rank,
    size: u64,
    next: u64,
    end: u64,
}

impl IdBlock {
    /// Ids `start..start + size` for `rank`.
    pub fn new(rank: Rank, start: u64, size: u64) -> Self {
        Self {
            rank,
            size,
            next: start,
            end: start + size,
        }
    }

    /// Take the next id.
    pub fn allocate(&mut self) -> Result<GroupId, FofError> {
        if self.next >= self.end {
            return Err(FofError::IdBlockExhausted {
                rank: self.rank,
                block_size: self.size,
            });
        }
        let id = GroupId(self.next);
        self.next += 1;
        Ok(id)
    }

    /// Ids left.
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.next)
    }
}

/// Collective: make serial labels globally unique and reserve this rank's
/// block of fresh ids.
///
/// Serial labels must lie in `1..=nlocal`. Each is offset by the particle
/// counts of the ranks ahead in descending-count order. The fresh block is
/// `[total + 1 + offset, total + 1 + offset + nlocal)`, above every offset
/// label and disjoint from the other ranks' blocks.
pub fn adjust_local_group_ids<C: Communicator>(
    comm: &C,
    labels: &mut [GroupId],
) -> Result<IdBlock, FofError> {
    let nlocal = labels.len() as u64;
    if let Some(bad) = labels.iter().find(|g| g.0 > nlocal) {
        return Err(FofError::InvalidChains {
            reason: format!("serial label {bad} exceeds the {nlocal} local particles"),
        });
    }
    let counts = comm.all_gather(nlocal)?;
    let total: u64 = counts.iter().sum();
    let offset = offsets(&counts, &counts)[comm.rank().index()];
    for g in labels.iter_mut().filter(|g| g.is_grouped()) {
        *g = g.offset_by(offset);
    }
    debug!(rank = %comm.rank(), offset, nlocal, total, "local group ids offset");
    Ok(IdBlock::new(comm.rank(), total + 1 + offset, nlocal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use haloweave_comm::LocalCluster;
    use std::time::Duration;

    #[test]
    fn order_is_descending_with_rank_ties() {
        assert_eq!(rank_order(&[5, 9, 5, 1]), vec![Rank(1), Rank(0), Rank(2), Rank(3)]);
    }

    #[test]
    fn offsets_follow_order() {
        assert_eq!(offsets(&[5, 9, 5, 1], &[5, 9, 5, 1]), vec![9, 0, 14, 19]);
        assert_eq!(offsets(&[5, 9], &[2, 3]), vec![3, 0]);
    }

    #[test]
    fn block_runs_out() {
        let mut block = IdBlock::new(Rank(2), 10, 2);
        assert_eq!(block.allocate().unwrap(), GroupId(10));
        assert_eq!(block.allocate().unwrap(), GroupId(11));
        assert_eq!(block.remaining(), 0);
        assert!(matches!(block.allocate(), Err(FofError::IdBlockExhausted { rank: Rank(2), .. })));
    }

    #[test]
    fn adjusted_ids_and_blocks_are_disjoint() {
        let out = LocalCluster::new(3)
            .with_recv_timeout(Duration::from_secs(10))
            .run(|comm| {
                let n = [2usize, 4, 3][comm.rank().index()];
                let mut labels: Vec<GroupId> = (0..n as u64).map(|i| GroupId(i % 2)).collect();
                let block = adjust_local_group_ids(&comm, &mut labels)?;
                Ok::<_, FofError>((labels, block))
            })
            .unwrap();
        let mut used = Vec::new();
        for r in out {
            let (labels, mut block) = r.unwrap();
            used.extend(labels.into_iter().filter(|g| g.is_grouped()).map(|g| g.0));
            while let Ok(id) = block.allocate() {
                used.push(id.0);
            }
        }
        // Grouped labels repeat within a rank; fresh ids never collide with them.
        let fresh: Vec<u64> = used.iter().copied().filter(|&g| g > 9).collect();
        let mut dedup = fresh.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), fresh.len());
        assert_eq!(fresh.len(), 9);
        // Rank 1 holds the most particles, so its label 1 stays 1.
        assert!(used.contains(&1));
        // Rank 2 (3 particles) comes next: offset 4.
        assert!(used.contains(&5));
        // Rank 0 last: offset 7.
        assert!(used.contains(&8));
    }
}
