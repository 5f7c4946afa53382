//! Brute-force serial friends-of-friends, the oracle for distributed runs.

use haloweave_core::SimulationVolume;
use std::collections::HashMap;

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// O(n^2) union-find over all pairs within `linking_length`.
///
/// Returns one label per position: components of two or more members are
/// numbered `1..` in order of their first member, singletons get 0.
pub fn naive_fof(positions: &[[f64; 3]], volume: &SimulationVolume, linking_length: f64) -> Vec<u64> {
    let n = positions.len();
    let ll2 = linking_length * linking_length;
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in i + 1..n {
            if volume.distance2(positions[i], positions[j]) <= ll2 {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }
    let roots: Vec<usize> = (0..n).map(|i| find(&mut parent, i)).collect();
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for &r in &roots {
        *sizes.entry(r).or_default() += 1;
    }
    let mut ids: HashMap<usize, u64> = HashMap::new();
    roots
        .iter()
        .map(|r| {
            if sizes[r] < 2 {
                return 0;
            }
            let next = ids.len() as u64 + 1;
            *ids.entry(*r).or_insert(next)
        })
        .collect()
}

/// Whether two labellings describe the same grouping up to renaming, with
/// 0 meaning ungrouped in both.
pub fn same_grouping(a: &[u64], b: &[u64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut forward: HashMap<u64, u64> = HashMap::new();
    let mut backward: HashMap<u64, u64> = HashMap::new();
    for (&x, &y) in a.iter().zip(b) {
        if (x == 0) != (y == 0) {
            return false;
        }
        if x == 0 {
            continue;
        }
        if *forward.entry(x).or_insert(y) != y || *backward.entry(y).or_insert(x) != x {
            return false;
        }
    }
    true
}
