//! Axis-aligned geometry: boxes, search intervals and the simulation volume.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Closed axis-aligned box `[min, max]` per axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Lower corner.
    pub min: [f64; 3],
    /// Upper corner.
    pub max: [f64; 3],
}

impl Aabb {
    /// Box spanning `min..=max`.
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// The unit cube `[0, 1]^3`.
    pub fn unit() -> Self {
        Self::new([0.0; 3], [1.0; 3])
    }

    /// Degenerate box that any [`include`](Self::include) call replaces.
    pub fn empty() -> Self {
        Self::new([f64::INFINITY; 3], [f64::NEG_INFINITY; 3])
    }

    /// Whether `p` lies inside the closed box.
    pub fn contains(&self, p: [f64; 3]) -> bool {
        (0..3).all(|k| p[k] >= self.min[k] && p[k] <= self.max[k])
    }

    /// Whether the closed box and the closed search interval intersect.
    pub fn overlaps(&self, search: &SearchBox) -> bool {
        (0..3).all(|k| search.hi[k] >= self.min[k] && search.lo[k] <= self.max[k])
    }

    /// Edge lengths.
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Grow to cover `p`.
    pub fn include(&mut self, p: [f64; 3]) {
        for k in 0..3 {
            self.min[k] = self.min[k].min(p[k]);
            self.max[k] = self.max[k].max(p[k]);
        }
    }

    /// Grow to cover `other`.
    pub fn union(&mut self, other: &Aabb) {
        self.include(other.min);
        self.include(other.max);
    }

    /// Multiply both corners by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.min.map(|v| v * factor), self.max.map(|v| v * factor))
    }
}

/// Closed search interval around a point, one `[lo, hi]` per axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchBox {
    /// Lower bounds.
    pub lo: [f64; 3],
    /// Upper bounds.
    pub hi: [f64; 3],
}

impl SearchBox {
    /// The cube of half-width `radius` centred on `center`.
    pub fn around(center: [f64; 3], radius: f64) -> Self {
        Self {
            lo: center.map(|c| c - radius),
            hi: center.map(|c| c + radius),
        }
    }

    /// Copy translated by `delta` along `axis`.
    pub fn shifted(&self, axis: usize, delta: f64) -> Self {
        let mut out = *self;
        out.lo[axis] += delta;
        out.hi[axis] += delta;
        out
    }
}

/// The full simulated volume and its boundary condition.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationVolume {
    /// Extent of the volume.
    pub bounds: Aabb,
    /// Whether every axis wraps with period equal to its extent.
    pub periodic: bool,
}

impl SimulationVolume {
    /// Volume with explicit bounds.
    pub fn new(bounds: Aabb, periodic: bool) -> Self {
        Self { bounds, periodic }
    }

    /// Periodic cube `[0, side]^3`.
    pub fn periodic_cube(side: f64) -> Self {
        Self::new(Aabb::new([0.0; 3], [side; 3]), true)
    }

    /// Per-axis period, when periodic.
    pub fn period(&self) -> Option<[f64; 3]> {
        self.periodic.then(|| self.bounds.extent())
    }

    /// Map `p` into the primary image. Non-periodic volumes return `p`.
    pub fn wrap(&self, p: [f64; 3]) -> [f64; 3] {
        let Some(period) = self.period() else {
            return p;
        };
        let mut out = p;
        for k in 0..3 {
            if period[k] > 0.0 {
                let rel = (p[k] - self.bounds.min[k]).rem_euclid(period[k]);
                out[k] = self.bounds.min[k] + rel;
            }
        }
        out
    }

    /// Squared separation, using the minimum image when periodic.
    pub fn distance2(&self, a: [f64; 3], b: [f64; 3]) -> f64 {
        let period = self.period();
        (0..3)
            .map(|k| {
                let mut d = a[k] - b[k];
                if let Some(period) = period {
                    if period[k] > 0.0 {
                        d -= period[k] * (d / period[k]).round();
                    }
                }
                d * d
            })
            .sum()
    }

    /// Periodic images of a search box that pokes out of the volume.
    ///
    /// Each axis contributes the shifts for the sides the box pokes out of,
    /// and every combination other than the unshifted box is one image. Boxes
    /// poking out of one side on one, two or three axes give 1, 3 or 7
    /// images; a box wider than the period on every axis gives 26.
    /// Non-periodic volumes and boxes fully inside the volume give none.
    pub fn periodic_images(&self, search: &SearchBox) -> SmallVec<[SearchBox; 26]> {
        let mut images = SmallVec::new();
        let Some(period) = self.period() else {
            return images;
        };
        let mut shifts: [SmallVec<[f64; 3]>; 3] = Default::default();
        for k in 0..3 {
            shifts[k].push(0.0);
            if period[k] <= 0.0 {
                continue;
            }
            if search.lo[k] < self.bounds.min[k] {
                shifts[k].push(period[k]);
            }
            if search.hi[k] > self.bounds.max[k] {
                shifts[k].push(-period[k]);
            }
        }
        for &dx in &shifts[0] {
            for &dy in &shifts[1] {
                for &dz in &shifts[2] {
                    if dx == 0.0 && dy == 0.0 && dz == 0.0 {
                        continue;
                    }
                    let mut image = *search;
                    for (axis, delta) in [dx, dy, dz].into_iter().enumerate() {
                        if delta != 0.0 {
                            image = image.shifted(axis, delta);
                        }
                    }
                    images.push(image);
                }
            }
        }
        images
    }

    /// Rescale lengths by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.bounds = self.bounds.scaled(factor);
    }
}
