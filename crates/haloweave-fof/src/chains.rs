//! Local group chains: `head`/`next`/`len` as an arena of plain indices.
//!
//! Every particle belongs to exactly one chain. A chain lists the members
//! of one serial group in index order; ungrouped particles are singleton
//! chains. Lengths are stored on the chain head.

use haloweave_core::{FofError, GroupId};
use std::collections::HashMap;

const NIL: u32 = u32::MAX;

/// Chains of particles sharing a local group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupChains {
    head: Vec<u32>,
    next: Vec<u32>,
    len: Vec<u64>,
}

impl GroupChains {
    /// Chains from raw arrays, as produced by a serial friends-of-friends
    /// pass. `next[i] == None` ends a chain; `len` is read at heads.
    pub fn new(head: Vec<u32>, next: Vec<Option<u32>>, len: Vec<u64>) -> Result<Self, FofError> {
        let n = head.len();
        for (what, got) in [("next", next.len()), ("len", len.len())] {
            if got != n {
                return Err(FofError::LengthMismatch {
                    what,
                    expected: n,
                    got,
                });
            }
        }
        let next: Vec<u32> = next.into_iter().map(|x| x.unwrap_or(NIL)).collect();
        for i in 0..n {
            let h = head[i] as usize;
            if h >= n || head[h] as usize != h {
                return Err(FofError::InvalidChains {
                    reason: format!("particle {i} has head {h}, which is not a chain head"),
                });
            }
            let nx = next[i];
            if nx != NIL && (nx as usize >= n || head[nx as usize] != head[i]) {
                return Err(FofError::InvalidChains {
                    reason: format!("particle {i} links to {nx} outside its chain"),
                });
            }
        }
        let chains = Self { head, next, len };
        let mut visited = 0usize;
        for h in (0..n).filter(|&i| chains.head(i) == i) {
            visited += chains.members(h).take(n + 1).count();
            if visited > n {
                return Err(FofError::InvalidChains {
                    reason: format!("chain starting at {h} loops"),
                });
            }
        }
        Ok(chains)
    }

    /// Chains from per-particle serial labels: equal grouped labels form
    /// one chain in index order, ungrouped particles stand alone.
    pub fn from_labels(labels: &[GroupId]) -> Self {
        let n = labels.len();
        let mut head: Vec<u32> = (0..n as u32).collect();
        let mut next = vec![NIL; n];
        let mut len = vec![1u64; n];
        let mut tail: HashMap<GroupId, u32> = HashMap::new();
        for (i, &label) in labels.iter().enumerate() {
            if !label.is_grouped() {
                continue;
            }
            let i = i as u32;
            if let Some(prev) = tail.insert(label, i) {
                let h = head[prev as usize];
                head[i as usize] = h;
                next[prev as usize] = i;
                len[h as usize] += 1;
            }
        }
        Self { head, next, len }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.head.len()
    }

    /// True when there are no particles.
    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    /// Head of the chain containing `i`.
    pub fn head(&self, i: usize) -> usize {
        self.head[i] as usize
    }

    /// Successor of `i` in its chain.
    pub fn next(&self, i: usize) -> Option<usize> {
        match self.next[i] {
            NIL => None,
            nx => Some(nx as usize),
        }
    }

    /// Members of the chain containing `i`, from the head.
    pub fn members(&self, i: usize) -> ChainIter<'_> {
        ChainIter {
            chains: self,
            at: Some(self.head(i)),
        }
    }

    /// Recorded group length of the chain containing `i`.
    pub fn group_len(&self, i: usize) -> u64 {
        self.len[self.head(i)]
    }

    /// Set the group length of the chain containing `i`.
    pub fn set_group_len(&mut self, i: usize, len: u64) {
        let h = self.head(i);
        self.len[h] = len;
    }
}

/// Iterator over one chain.
#[derive(Clone, Debug)]
pub struct ChainIter<'a> {
    chains: &'a GroupChains,
    at: Option<usize>,
}

impl Iterator for ChainIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let cur = self.at?;
        self.at = self.chains.next(cur);
        Some(cur)
    }
}
