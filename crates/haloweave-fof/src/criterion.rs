//! Which pairs of particles link.
//!
//! The linker only offers pairs whose separation is within the linking
//! length, so a criterion can tighten that test but never widen it.

use haloweave_core::{LinkingConfig, ParticleKind, ParticleSnapshot, SimulationVolume};

/// Pairwise linking test used across domain boundaries.
pub trait LinkCriterion {
    /// Whether `p` takes part in linking at all. Ineligible particles are
    /// neither exported nor relabelled.
    fn eligible(&self, p: &ParticleSnapshot) -> bool {
        let _ = p;
        true
    }

    /// Whether two eligible particles within the linking length link.
    fn links(&self, volume: &SimulationVolume, a: &ParticleSnapshot, b: &ParticleSnapshot) -> bool;
}

impl<K: LinkCriterion + ?Sized> LinkCriterion for &K {
    fn eligible(&self, p: &ParticleSnapshot) -> bool {
        (**self).eligible(p)
    }

    fn links(&self, volume: &SimulationVolume, a: &ParticleSnapshot, b: &ParticleSnapshot) -> bool {
        (**self).links(volume, a, b)
    }
}

/// Plain spatial friends-of-friends within the linking length.
impl LinkCriterion for LinkingConfig {
    fn links(&self, volume: &SimulationVolume, a: &ParticleSnapshot, b: &ParticleSnapshot) -> bool {
        volume.distance2(a.position, b.position) <= self.linking_length * self.linking_length
    }
}

/// Phase-space friends-of-friends.
///
/// Links when `|dx|²/ll² + |dv|²/vl² <= 1`, with `dx` taken as the minimum
/// image in periodic volumes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseSpaceCriterion {
    /// Spatial linking length, matching the linking configuration.
    pub linking_length: f64,
    /// Velocity linking length.
    pub velocity_length: f64,
}

impl PhaseSpaceCriterion {
    /// Criterion with spatial scale `linking_length` and velocity scale
    /// `velocity_length`.
    pub fn new(linking_length: f64, velocity_length: f64) -> Self {
        Self {
            linking_length,
            velocity_length,
        }
    }

    /// Composite squared distance of two particles.
    pub fn distance2(&self, volume: &SimulationVolume, a: &ParticleSnapshot, b: &ParticleSnapshot) -> f64 {
        let dx2 = volume.distance2(a.position, b.position);
        let dv2: f64 = (0..3).map(|k| (a.velocity[k] - b.velocity[k]).powi(2)).sum();
        dx2 / (self.linking_length * self.linking_length) + dv2 / (self.velocity_length * self.velocity_length)
    }
}

impl LinkCriterion for PhaseSpaceCriterion {
    fn links(&self, volume: &SimulationVolume, a: &ParticleSnapshot, b: &ParticleSnapshot) -> bool {
        self.distance2(volume, a, b) <= 1.0
    }
}

/// Restricts an inner criterion to the listed species.
#[derive(Clone, Debug, PartialEq)]
pub struct SpeciesFilter<K> {
    inner: K,
    kinds: Vec<ParticleKind>,
}

impl<K> SpeciesFilter<K> {
    /// Link only particles whose kind is in `kinds`, using `inner`.
    pub fn new(inner: K, kinds: impl IntoIterator<Item = ParticleKind>) -> Self {
        Self {
            inner,
            kinds: kinds.into_iter().collect(),
        }
    }
}

impl<K: LinkCriterion> LinkCriterion for SpeciesFilter<K> {
    fn eligible(&self, p: &ParticleSnapshot) -> bool {
        self.kinds.contains(&p.kind) && self.inner.eligible(p)
    }

    fn links(&self, volume: &SimulationVolume, a: &ParticleSnapshot, b: &ParticleSnapshot) -> bool {
        self.inner.links(volume, a, b)
    }
}
