//! Configuration structs for decomposition, transport, linking and
//! baryon association.
//!
//! Every rank must hold identical values: the transport chunk size and the
//! pair shuffle seed in particular are used to derive matching message
//! sequences on both ends of a pair.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration value.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// A numeric parameter is out of its accepted range.
    #[error("{name} = {value} is out of range: {expected}")]
    OutOfRange {
        /// Parameter name.
        name: &'static str,
        /// Offending value, rendered.
        value: String,
        /// Accepted range, in words.
        expected: &'static str,
    },
}

fn out_of_range(name: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        name,
        value: value.to_string(),
        expected,
    }
}

// ── Decomposition ────────────────────────────────────────────────

/// Partition representation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompositionStrategy {
    /// One axis-aligned box per rank.
    Slab,
    /// Uniform cell grid ordered along a Morton curve.
    #[default]
    Mesh,
}

/// How slab boundaries are placed along each axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlabBoundaries {
    /// Equal particle counts per slab, from a global histogram.
    #[default]
    EqualCount,
    /// Equal widths.
    EqualWidth,
}

/// Spatial decomposition parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Slab boxes or Morton-ordered mesh.
    ///
    /// Default: [`DecompositionStrategy::Mesh`].
    pub strategy: DecompositionStrategy,

    /// Boundary placement for the slab strategy.
    ///
    /// Default: [`SlabBoundaries::EqualCount`].
    pub slab_boundaries: SlabBoundaries,

    /// Bins per axis of the histogram used for equal-count slabs.
    ///
    /// Default: 1024.
    pub histogram_bins: usize,

    /// Explicit mesh resolution. `None` derives it from the rank count as
    /// `min_cells_per_dim * max(ceil(log2 P), 1)`.
    pub cells_per_dim: Option<u32>,

    /// Base mesh resolution used when `cells_per_dim` is unset.
    ///
    /// Default: 8.
    pub min_cells_per_dim: u32,

    /// Relative load imbalance `(max - min) / mean` above which the mesh
    /// is repartitioned.
    ///
    /// Default: 0.1.
    pub imbalance_limit: f64,
}

impl DecompositionConfig {
    /// Default histogram resolution.
    pub const DEFAULT_HISTOGRAM_BINS: usize = 1024;

    /// Default base mesh resolution.
    pub const DEFAULT_MIN_CELLS_PER_DIM: u32 = 8;

    /// Default imbalance threshold.
    pub const DEFAULT_IMBALANCE_LIMIT: f64 = 0.1;

    /// Largest mesh resolution a 16-bit-per-axis Morton key can address.
    pub const MAX_CELLS_PER_DIM: u32 = 1 << 16;

    /// Defaults for the given strategy.
    pub fn new(strategy: DecompositionStrategy) -> Self {
        Self {
            strategy,
            slab_boundaries: SlabBoundaries::default(),
            histogram_bins: Self::DEFAULT_HISTOGRAM_BINS,
            cells_per_dim: None,
            min_cells_per_dim: Self::DEFAULT_MIN_CELLS_PER_DIM,
            imbalance_limit: Self::DEFAULT_IMBALANCE_LIMIT,
        }
    }

    /// Mesh resolution for a job of `num_ranks` processes.
    pub fn resolved_cells_per_dim(&self, num_ranks: usize) -> u32 {
        match self.cells_per_dim {
            Some(n) => n,
            None => {
                let levels = (num_ranks.max(1) as f64).log2().ceil().max(1.0) as u32;
                self.min_cells_per_dim.saturating_mul(levels)
            }
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.histogram_bins == 0 {
            return Err(out_of_range("histogram_bins", self.histogram_bins, ">= 1"));
        }
        if self.min_cells_per_dim == 0 || self.min_cells_per_dim > Self::MAX_CELLS_PER_DIM {
            return Err(out_of_range(
                "min_cells_per_dim",
                self.min_cells_per_dim,
                "1..=65536",
            ));
        }
        if let Some(n) = self.cells_per_dim {
            if n == 0 || n > Self::MAX_CELLS_PER_DIM {
                return Err(out_of_range("cells_per_dim", n, "1..=65536"));
            }
        }
        if !(self.imbalance_limit.is_finite() && self.imbalance_limit >= 0.0) {
            return Err(out_of_range(
                "imbalance_limit",
                self.imbalance_limit,
                "finite and >= 0",
            ));
        }
        Ok(())
    }
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self::new(DecompositionStrategy::default())
    }
}

// ── Transport ────────────────────────────────────────────────────

/// Chunked point-to-point transfer parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Largest payload of a single message, in bytes.
    ///
    /// Default: `i32::MAX` (the count limit of common message layers).
    pub max_message_bytes: usize,

    /// Seed of the deterministic rank-pair shuffle.
    ///
    /// Default: 4322.
    pub pair_seed: u64,
}

impl TransportConfig {
    /// Default message size cap.
    pub const DEFAULT_MAX_MESSAGE_BYTES: usize = i32::MAX as usize;

    /// Default shuffle seed.
    pub const DEFAULT_PAIR_SEED: u64 = 4322;

    /// Default configuration.
    pub fn new() -> Self {
        Self {
            max_message_bytes: Self::DEFAULT_MAX_MESSAGE_BYTES,
            pair_seed: Self::DEFAULT_PAIR_SEED,
        }
    }

    /// Same seed, smaller messages.
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// Items of `unit_bytes` each that fit into one message (at least one).
    pub fn items_per_message(&self, unit_bytes: usize) -> usize {
        (self.max_message_bytes / unit_bytes.max(1)).max(1)
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_bytes == 0 {
            return Err(out_of_range("max_message_bytes", 0, ">= 1"));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Linking ──────────────────────────────────────────────────────

/// Friends-of-friends linking and compaction parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Physical linking length; also the export search radius.
    pub linking_length: f64,

    /// Smallest group kept after compaction.
    ///
    /// Default: 20.
    pub min_group_size: usize,

    /// Extra working-buffer room per rank, as a fraction of the counted
    /// local particles.
    ///
    /// Default: 0.1.
    pub buffer_slack: f64,

    /// Abort linking after this many passes. `None` runs to the fixed point.
    pub max_passes: Option<usize>,
}

impl LinkingConfig {
    /// Default minimum group size.
    pub const DEFAULT_MIN_GROUP_SIZE: usize = 20;

    /// Default buffer slack.
    pub const DEFAULT_BUFFER_SLACK: f64 = 0.1;

    /// Defaults with the given linking length.
    pub fn new(linking_length: f64) -> Self {
        Self {
            linking_length,
            min_group_size: Self::DEFAULT_MIN_GROUP_SIZE,
            buffer_slack: Self::DEFAULT_BUFFER_SLACK,
            max_passes: None,
        }
    }

    /// Working-buffer capacity for `local` counted particles.
    pub fn capacity_for(&self, local: u64) -> usize {
        local as usize + (local as f64 * self.buffer_slack).ceil() as usize
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.linking_length.is_finite() && self.linking_length > 0.0) {
            return Err(out_of_range(
                "linking_length",
                self.linking_length,
                "finite and > 0",
            ));
        }
        if self.min_group_size == 0 {
            return Err(out_of_range("min_group_size", 0, ">= 1"));
        }
        if !(self.buffer_slack.is_finite() && self.buffer_slack >= 0.0) {
            return Err(out_of_range(
                "buffer_slack",
                self.buffer_slack,
                "finite and >= 0",
            ));
        }
        Ok(())
    }
}

// ── Baryons ──────────────────────────────────────────────────────

/// Phase-space association of non-dark-matter particles to groups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaryonConfig {
    /// Squared position scale; also the nearest-candidate acceptance radius².
    pub position_scale2: f64,

    /// Squared velocity scale.
    pub velocity_scale2: f64,

    /// Nearest dark-matter candidates examined per baryon.
    ///
    /// Default: 16.
    pub num_neighbours: usize,

    /// Radius used to export boundary dark-matter particles.
    pub search_radius: f64,

    /// Candidate groups longer than this are never joined. `None` disables
    /// the cap.
    pub max_group_len: Option<u64>,

    /// Renumber baryon-compiled groups by descending size.
    ///
    /// Default: true.
    pub reorder_groups: bool,
}

impl BaryonConfig {
    /// Default nearest-neighbour count.
    pub const DEFAULT_NUM_NEIGHBOURS: usize = 16;

    /// Defaults for the given scales. The export radius is the position scale.
    pub fn new(position_scale2: f64, velocity_scale2: f64) -> Self {
        Self {
            position_scale2,
            velocity_scale2,
            num_neighbours: Self::DEFAULT_NUM_NEIGHBOURS,
            search_radius: position_scale2.max(0.0).sqrt(),
            max_group_len: None,
            reorder_groups: true,
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.position_scale2.is_finite() && self.position_scale2 > 0.0) {
            return Err(out_of_range(
                "position_scale2",
                self.position_scale2,
                "finite and > 0",
            ));
        }
        if !(self.velocity_scale2.is_finite() && self.velocity_scale2 > 0.0) {
            return Err(out_of_range(
                "velocity_scale2",
                self.velocity_scale2,
                "finite and > 0",
            ));
        }
        if self.num_neighbours == 0 {
            return Err(out_of_range("num_neighbours", 0, ">= 1"));
        }
        if !(self.search_radius.is_finite() && self.search_radius >= 0.0) {
            return Err(out_of_range(
                "search_radius",
                self.search_radius,
                "finite and >= 0",
            ));
        }
        Ok(())
    }
}

// ── Units ────────────────────────────────────────────────────────

/// Conversion of input lengths to the units the engine links in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    /// Multiplicative input length conversion.
    pub length_conversion: f64,
    /// Cosmological scale factor of the snapshot.
    pub scale_factor: f64,
    /// Whether lengths stay comoving (no scale-factor multiplication).
    pub comoving: bool,
    /// Dimensionless Hubble parameter when input lengths carry `h^-1`.
    pub hubble: Option<f64>,
}

impl UnitConversion {
    /// Factor applied to every input length.
    pub fn length_scale(&self) -> f64 {
        let mut scale = self.length_conversion;
        if !self.comoving {
            scale *= self.scale_factor;
        }
        if let Some(h) = self.hubble {
            scale /= h;
        }
        scale
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scale = self.length_scale();
        if !(scale.is_finite() && scale > 0.0) {
            return Err(out_of_range("length_scale", scale, "finite and > 0"));
        }
        Ok(())
    }
}

impl Default for UnitConversion {
    fn default() -> Self {
        Self {
            length_conversion: 1.0,
            scale_factor: 1.0,
            comoving: true,
            hubble: None,
        }
    }
}
