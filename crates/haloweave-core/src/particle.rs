//! The particle record moved between ranks.

use crate::properties::{CarriesProperties, ExtraProperties, PropertyKind};
use serde::{Deserialize, Serialize};

/// Species tag of a particle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticleKind {
    /// Gas.
    Gas,
    /// Dark matter; the only species linked by the dark-matter pass.
    DarkMatter,
    /// Stars.
    Star,
    /// Black holes.
    BlackHole,
    /// Additional dark-matter species (e.g. low-resolution boundary particles).
    ExtraDarkMatter,
}

impl ParticleKind {
    /// Whether this species takes part in dark-matter-only linking.
    pub fn is_dark_matter(self) -> bool {
        matches!(self, ParticleKind::DarkMatter)
    }

    /// The property group this species carries, if any.
    pub fn property_kind(self) -> Option<PropertyKind> {
        match self {
            ParticleKind::Gas => Some(PropertyKind::Hydro),
            ParticleKind::Star => Some(PropertyKind::Star),
            ParticleKind::BlackHole => Some(PropertyKind::BlackHole),
            ParticleKind::ExtraDarkMatter => Some(PropertyKind::ExtraDarkMatter),
            ParticleKind::DarkMatter => None,
        }
    }
}

/// One simulation particle.
///
/// The array index of a particle is only stable between migration passes;
/// `pid` is the stable, globally unique identity.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    /// Position.
    pub position: [f64; 3],
    /// Velocity.
    pub velocity: [f64; 3],
    /// Globally unique particle identifier.
    pub pid: u64,
    /// Species.
    pub kind: ParticleKind,
    /// Optional species-specific extra properties.
    pub properties: Option<ExtraProperties>,
}

impl Particle {
    /// A particle without extra properties.
    pub fn new(pid: u64, kind: ParticleKind, position: [f64; 3], velocity: [f64; 3]) -> Self {
        Self {
            position,
            velocity,
            pid,
            kind,
            properties: None,
        }
    }

    /// Attach extra properties.
    pub fn with_properties(mut self, properties: ExtraProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Property-free copy of the phase-space coordinates and identity.
    pub fn snapshot(&self) -> ParticleSnapshot {
        ParticleSnapshot {
            position: self.position,
            velocity: self.velocity,
            pid: self.pid,
            kind: self.kind,
        }
    }
}

impl CarriesProperties for Particle {
    fn properties(&self) -> Option<&ExtraProperties> {
        self.properties.as_ref()
    }

    fn take_properties(&mut self) -> Option<ExtraProperties> {
        self.properties.take()
    }

    fn set_properties(&mut self, properties: Option<ExtraProperties>) {
        self.properties = properties;
    }
}

/// Plain copy of a particle's position, velocity and identity.
///
/// Sent alongside export records; never carries extra properties.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleSnapshot {
    /// Position.
    pub position: [f64; 3],
    /// Velocity.
    pub velocity: [f64; 3],
    /// Globally unique particle identifier.
    pub pid: u64,
    /// Species.
    pub kind: ParticleKind,
}

impl ParticleSnapshot {
    /// Rehydrate into a property-free particle.
    pub fn into_particle(self) -> Particle {
        Particle::new(self.pid, self.kind, self.position, self.velocity)
    }
}
