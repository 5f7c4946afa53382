//! Ball search over local particles.
//!
//! [`BallSearch`] is the seam to whatever spatial index the caller prefers.
//! [`CellGrid`] is a uniform-grid implementation: particle indices are
//! counting-sorted by cell, and a query visits the cells its bounding box
//! covers, plus those of its periodic images.

use haloweave_core::{Aabb, SearchBox, SimulationVolume};

/// Finds stored points within a radius of a query point.
pub trait BallSearch {
    /// Number of stored points.
    fn len(&self) -> usize;

    /// True when nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `visit` once with the index of every stored point within
    /// `radius` of `center` (inclusive, minimum image when periodic).
    fn for_each_within(&self, center: [f64; 3], radius: f64, visit: &mut dyn FnMut(usize));

    /// Indices within `radius` of `center`, ascending.
    fn within(&self, center: [f64; 3], radius: f64, out: &mut Vec<usize>) {
        out.clear();
        self.for_each_within(center, radius, &mut |i| out.push(i));
        out.sort_unstable();
    }
}

/// Most cells along one axis.
const MAX_DIMS: f64 = 256.0;

/// Uniform grid over the bounding box of the stored points.
#[derive(Clone, Debug)]
pub struct CellGrid {
    volume: SimulationVolume,
    bounds: Aabb,
    dims: [u32; 3],
    inv_cell: [f64; 3],
    positions: Vec<[f64; 3]>,
    /// Point indices sorted by cell.
    sorted: Vec<u32>,
    /// Start of each cell in `sorted`, plus a final end marker.
    offsets: Vec<u32>,
}

impl CellGrid {
    /// Index `positions` with cells of about `cell_size` per side.
    pub fn new(positions: Vec<[f64; 3]>, volume: SimulationVolume, cell_size: f64) -> Self {
        let mut bounds = Aabb::empty();
        for &p in &positions {
            bounds.include(p);
        }
        if positions.is_empty() {
            bounds = Aabb::new([0.0; 3], [0.0; 3]);
        }
        let extent = bounds.extent();
        let dims = extent.map(|e| {
            if cell_size > 0.0 {
                (e / cell_size).ceil().clamp(1.0, MAX_DIMS) as u32
            } else {
                1
            }
        });
        let inv_cell = [0, 1, 2].map(|k| {
            if extent[k] > 0.0 {
                f64::from(dims[k]) / extent[k]
            } else {
                0.0
            }
        });
        let mut grid = Self {
            volume,
            bounds,
            dims,
            inv_cell,
            positions,
            sorted: Vec::new(),
            offsets: Vec::new(),
        };
        grid.rebuild();
        grid
    }

    fn num_cells(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    fn axis_cell(&self, x: f64, axis: usize) -> i64 {
        ((x - self.bounds.min[axis]) * self.inv_cell[axis]).floor() as i64
    }

    fn flat(&self, c: [usize; 3]) -> usize {
        c[0] + c[1] * self.dims[0] as usize + c[2] * self.dims[0] as usize * self.dims[1] as usize
    }

    fn cell_of(&self, p: [f64; 3]) -> usize {
        let c = [0, 1, 2].map(|k| self.axis_cell(p[k], k).clamp(0, i64::from(self.dims[k]) - 1) as usize);
        self.flat(c)
    }

    fn rebuild(&mut self) {
        let cells: Vec<usize> = self.positions.iter().map(|&p| self.cell_of(p)).collect();
        let mut counts = vec![0u32; self.num_cells() + 1];
        for &c in &cells {
            counts[c + 1] += 1;
        }
        for c in 1..counts.len() {
            counts[c] += counts[c - 1];
        }
        self.offsets = counts;
        let mut heads = self.offsets.clone();
        self.sorted = vec![0; cells.len()];
        for (i, &c) in cells.iter().enumerate() {
            self.sorted[heads[c] as usize] = i as u32;
            heads[c] += 1;
        }
    }

    /// Stored positions.
    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    fn visit_box(&self, search: &SearchBox, center: [f64; 3], r2: f64, visit: &mut dyn FnMut(usize)) {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for k in 0..3 {
            let last = i64::from(self.dims[k]) - 1;
            let a = self.axis_cell(search.lo[k], k);
            let b = self.axis_cell(search.hi[k], k);
            if b < 0 || a > last {
                return;
            }
            lo[k] = a.max(0) as usize;
            hi[k] = b.min(last) as usize;
        }
        for cz in lo[2]..=hi[2] {
            for cy in lo[1]..=hi[1] {
                for cx in lo[0]..=hi[0] {
                    let cell = self.flat([cx, cy, cz]);
                    let span = self.offsets[cell] as usize..self.offsets[cell + 1] as usize;
                    for &i in &self.sorted[span] {
                        let i = i as usize;
                        if self.volume.distance2(center, self.positions[i]) <= r2 {
                            visit(i);
                        }
                    }
                }
            }
        }
    }
}

impl BallSearch for CellGrid {
    fn len(&self) -> usize {
        self.positions.len()
    }

    fn for_each_within(&self, center: [f64; 3], radius: f64, visit: &mut dyn FnMut(usize)) {
        if self.positions.is_empty() || radius < 0.0 {
            return;
        }
        let search = SearchBox::around(center, radius);
        let r2 = radius * radius;
        let images = self.volume.periodic_images(&search);
        if images.is_empty() {
            self.visit_box(&search, center, r2, visit);
            return;
        }
        // Images may cover the same cells when the box spans most of a period.
        let mut found = Vec::new();
        self.visit_box(&search, center, r2, &mut |i| found.push(i));
        for image in &images {
            self.visit_box(image, center, r2, &mut |i| found.push(i));
        }
        found.sort_unstable();
        found.dedup();
        found.into_iter().for_each(visit);
    }
}
