//! 48-bit Morton (Z-order) keys over 16-bit cell coordinates.
//!
//! Bit `3 * j + axis` of a key is bit `j` of the coordinate along `axis`
//! (axis 0 is x).

/// Spread the bits of `v` so that bit `j` lands on bit `3 * j`.
fn interleave_3(v: u16) -> u64 {
    let mut x = u64::from(v);
    x = (x | x << 32) & 0x1f00000000ffff;
    x = (x | x << 16) & 0x1f0000ff0000ff;
    x = (x | x << 8) & 0x100f00f00f00f00f;
    x = (x | x << 4) & 0x10c30c30c30c30c3;
    x = (x | x << 2) & 0x1249249249249249;
    x
}

/// Inverse of [`interleave_3`].
fn compact_3(key: u64) -> u16 {
    let mut x = key & 0x1249249249249249;
    x = (x | x >> 2) & 0x10c30c30c30c30c3;
    x = (x | x >> 4) & 0x100f00f00f00f00f;
    x = (x | x >> 8) & 0x1f0000ff0000ff;
    x = (x | x >> 16) & 0x1f00000000ffff;
    x = (x | x >> 32) & 0x1fffff;
    x as u16
}

/// Morton key of cell `(ix, iy, iz)`.
pub fn morton_key(ix: u16, iy: u16, iz: u16) -> u64 {
    interleave_3(ix) | (interleave_3(iy) << 1) | (interleave_3(iz) << 2)
}

/// Cell coordinates of a Morton key.
pub fn morton_decode(key: u64) -> (u16, u16, u16) {
    (compact_3(key), compact_3(key >> 1), compact_3(key >> 2))
}

/// Flat index `ix * n^2 + iy * n + iz` of a cell in an `n^3` grid.
pub fn flat_index(n: u32, ix: u32, iy: u32, iz: u32) -> usize {
    let n = n as usize;
    ix as usize * n * n + iy as usize * n + iz as usize
}

/// Inverse of [`flat_index`].
pub fn unflatten(n: u32, index: usize) -> (u32, u32, u32) {
    let n = n as usize;
    ((index / (n * n)) as u32, ((index / n) % n) as u32, (index % n) as u32)
}

/// Flat indices of all `n^3` cells sorted by Morton key.
///
/// `n` must not exceed 2^16.
pub fn z_order(n: u32) -> Vec<u32> {
    let total = n as usize * n as usize * n as usize;
    let mut keyed: Vec<(u64, u32)> = (0..total)
        .map(|index| {
            let (ix, iy, iz) = unflatten(n, index);
            (morton_key(ix as u16, iy as u16, iz as u16), index as u32)
        })
        .collect();
    keyed.sort_unstable_by_key(|&(key, _)| key);
    keyed.into_iter().map(|(_, index)| index).collect()
}
