//! Optional per-species extra properties and their shared field schema.
//!
//! Storage of the physical quantities themselves belongs to the caller; the
//! engine only needs a stable, ordered list of field names per property kind
//! so that properties can ride alongside particles in a transfer. Every rank
//! must build its [`PropertySchema`] from the same configuration.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// The species-specific property groups a particle may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Gas (hydrodynamic) fields.
    Hydro,
    /// Stellar fields.
    Star,
    /// Black-hole fields.
    BlackHole,
    /// Fields of additional dark-matter species.
    ExtraDarkMatter,
}

impl PropertyKind {
    /// Every property kind, in schema slot order.
    pub const ALL: [PropertyKind; 4] = [
        PropertyKind::Hydro,
        PropertyKind::Star,
        PropertyKind::BlackHole,
        PropertyKind::ExtraDarkMatter,
    ];

    fn slot(self) -> usize {
        match self {
            PropertyKind::Hydro => 0,
            PropertyKind::Star => 1,
            PropertyKind::BlackHole => 2,
            PropertyKind::ExtraDarkMatter => 3,
        }
    }
}

/// Ordered field names for each property kind.
///
/// Field order is the wire order of packed values. A kind with no fields
/// is never transferred.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    fields: [IndexSet<String>; 4],
}

impl PropertySchema {
    /// Create an empty schema (no extra properties travel).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append field names for `kind`. Duplicate names are ignored.
    pub fn with_fields<I, S>(mut self, kind: PropertyKind, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slot = &mut self.fields[kind.slot()];
        for name in names {
            slot.insert(name.into());
        }
        self
    }

    /// Field names for `kind`, in wire order.
    pub fn fields(&self, kind: PropertyKind) -> &IndexSet<String> {
        &self.fields[kind.slot()]
    }

    /// Number of fields for `kind`.
    pub fn field_count(&self, kind: PropertyKind) -> usize {
        self.fields[kind.slot()].len()
    }

    /// Whether no kind carries any field.
    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(IndexSet::is_empty)
    }

    /// Order-sensitive digest of every kind's field list.
    ///
    /// Two schemas with the same fingerprint pack values identically.
    pub fn fingerprint(&self) -> u64 {
        // FNV-1a; stable across processes and builds.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut feed = |bytes: &[u8]| {
            for b in bytes {
                hash ^= u64::from(*b);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        };
        for (slot, names) in self.fields.iter().enumerate() {
            feed(&[slot as u8, 0xff]);
            for name in names {
                feed(name.as_bytes());
                feed(&[0]);
            }
        }
        hash
    }
}

/// Extra property values attached to one particle.
///
/// Values are keyed by field name; packing follows the schema order and
/// substitutes `0.0` for fields this particle never set.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtraProperties {
    kind: PropertyKind,
    values: IndexMap<String, f32>,
}

impl ExtraProperties {
    /// Empty property set of the given kind.
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            values: IndexMap::new(),
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: f32) -> Self {
        self.set(name, value);
        self
    }

    /// Which property group these values belong to.
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Value of `name`, if set.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    /// Set `name` to `value`.
    pub fn set(&mut self, name: impl Into<String>, value: f32) {
        self.values.insert(name.into(), value);
    }

    /// Number of set fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append this particle's values in schema order.
    pub fn pack_into(&self, schema: &PropertySchema, out: &mut Vec<f32>) {
        out.extend(
            schema
                .fields(self.kind)
                .iter()
                .map(|name| self.get(name).unwrap_or_default()),
        );
    }

    /// Rebuild a clean property set from values packed in schema order.
    pub fn unpack(kind: PropertyKind, schema: &PropertySchema, values: &[f32]) -> Self {
        let values = schema
            .fields(kind)
            .iter()
            .zip(values)
            .map(|(name, v)| (name.clone(), *v))
            .collect();
        Self { kind, values }
    }
}

/// Anything that owns an optional [`ExtraProperties`] handle.
///
/// Transfer codecs strip the handle from the bulk copy, ship the values
/// on a side channel, and reattach them on the receiving rank.
pub trait CarriesProperties {
    /// Borrow the attached properties.
    fn properties(&self) -> Option<&ExtraProperties>;

    /// Detach and return the attached properties.
    fn take_properties(&mut self) -> Option<ExtraProperties>;

    /// Replace the attached properties.
    fn set_properties(&mut self, properties: Option<ExtraProperties>);

    /// Whether properties are attached.
    fn has_properties(&self) -> bool {
        self.properties().is_some()
    }
}
