//! The documented call order, end to end.
//!
//! Decompose, count, assign, seed, link to a fixed point, migrate groups to
//! their owners, compile, and optionally associate baryons. Every step is a
//! collective, so every rank must call [`FofPipeline::run`].

use haloweave_comm::{tags, Communicator, Transport};
use haloweave_core::{
    BaryonConfig, ConfigError, DecompositionConfig, FofError, GroupId, LinkingConfig, Particle,
    PropertySchema, Rank, SimulationVolume, TransportConfig, UnitConversion,
};
use haloweave_domain::{assign_particles, Decomposer, DomainCount, Partition};
use haloweave_fof::{
    collect_labels, compile_groups, migrate_to_owners, seed_link_state, split_species,
    BaryonAssociation, CellGrid, CrossDomainLinker, GroupCatalog, LinkCriterion, LinkSummary, SerialFof,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

/// Everything a pipeline run needs to know, identical on every rank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Partition strategy and resolution.
    pub decomposition: DecompositionConfig,
    /// Message size and pair shuffle.
    pub transport: TransportConfig,
    /// Linking length, minimum group size and buffer slack.
    pub linking: LinkingConfig,
    /// Baryon association. `None` links every species together.
    pub baryons: Option<BaryonConfig>,
    /// Input length conversion, applied once after decomposition.
    pub units: Option<UnitConversion>,
}

impl PipelineConfig {
    /// Defaults around `linking_length`.
    pub fn new(linking_length: f64) -> Self {
        Self {
            decomposition: DecompositionConfig::default(),
            transport: TransportConfig::default(),
            linking: LinkingConfig::new(linking_length),
            baryons: None,
            units: None,
        }
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decomposition.validate()?;
        self.transport.validate()?;
        self.linking.validate()?;
        if let Some(b) = &self.baryons {
            b.validate()?;
        }
        if let Some(u) = &self.units {
            u.validate()?;
        }
        Ok(())
    }
}

/// What one rank holds after a run.
#[derive(Clone, Debug)]
pub struct HaloCatalog {
    /// Particles on this rank, sorted by group id with ungrouped last.
    pub particles: Vec<Particle>,
    /// Final group id of each particle.
    pub groups: Vec<GroupId>,
    /// Groups held here.
    pub catalog: GroupCatalog,
    /// The partition, with migrations recorded.
    pub partition: Partition,
    /// Counting result before assignment.
    pub count: DomainCount,
    /// Linking passes and links.
    pub links: LinkSummary,
    /// Baryons attached to groups across all ranks, if association ran.
    pub associated: Option<u64>,
}

impl HaloCatalog {
    /// Collective: gather every rank's `(pid, group)` pairs on `root`.
    pub fn collect<C: Communicator>(
        &self,
        comm: &C,
        root: Rank,
    ) -> Result<Option<Vec<(u64, GroupId)>>, FofError> {
        collect_labels(comm, &self.particles, &self.groups, root)
    }
}

/// Drives the distributed friends-of-friends steps in order.
///
/// Cross-domain links use `K`, by default the plain distance rule of the
/// linking configuration. The serial labeller should apply the same rule.
#[derive(Clone, Debug)]
pub struct FofPipeline<F, K = LinkingConfig> {
    config: PipelineConfig,
    serial: F,
    criterion: K,
    schema: PropertySchema,
}

impl<F: SerialFof> FofPipeline<F> {
    /// Pipeline with `serial` labelling each rank's own particles.
    pub fn new(config: PipelineConfig, serial: F) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            criterion: config.linking.clone(),
            config,
            serial,
            schema: PropertySchema::new(),
        })
    }
}

impl<F: SerialFof, K: LinkCriterion> FofPipeline<F, K> {
    /// Same pipeline linking across domains with `criterion`.
    pub fn with_criterion<K2: LinkCriterion>(self, criterion: K2) -> FofPipeline<F, K2> {
        FofPipeline {
            config: self.config,
            serial: self.serial,
            criterion,
            schema: self.schema,
        }
    }

    /// Extra properties to carry through every particle move.
    pub fn with_schema(mut self, schema: PropertySchema) -> Self {
        self.schema = schema;
        self
    }

    /// The validated configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Collective: find groups in the particles every rank read from
    /// `volume`, wherever in the volume they lie.
    pub fn run<C: Communicator>(
        &self,
        comm: &C,
        volume: SimulationVolume,
        mut particles: Vec<Particle>,
    ) -> Result<HaloCatalog, FofError> {
        let me = comm.rank();
        let _span = info_span!("fof_pipeline", rank = %me).entered();
        let transport = Transport::new(self.config.transport.clone());
        let decomposer = Decomposer::new(self.config.decomposition.clone());

        let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.position).collect();
        let mut partition = decomposer.decompose(comm, volume, &positions)?;
        if let Some(units) = &self.config.units {
            let scale = partition.adjust_units(units)?;
            for p in &mut particles {
                p.position = p.position.map(|x| x * scale);
            }
        }
        let volume = *partition.volume();
        let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.position).collect();
        let count = decomposer.count_in_domain(comm, &mut partition, &positions, self.config.linking.buffer_slack)?;
        let particles = assign_particles(comm, &transport, &partition, &self.schema, particles)?;

        let (linked, baryons) = match self.config.baryons {
            Some(_) => split_species(particles),
            None => (particles, Vec::new()),
        };
        let ll = self.config.linking.linking_length;
        let positions: Vec<[f64; 3]> = linked.iter().map(|p| p.position).collect();
        let labels = self.serial.label(&positions, &volume, ll);
        if labels.len() != linked.len() {
            return Err(FofError::LengthMismatch {
                what: "serial labels",
                expected: linked.len(),
                got: labels.len(),
            });
        }
        let mut state = seed_link_state(comm, labels)?;
        let grid = CellGrid::new(positions, volume, ll);
        let links = CrossDomainLinker::new(self.config.linking.clone(), volume)
            .with_criterion(&self.criterion)
            .run_to_fixed_point(comm, &transport, &partition, &linked, &grid, &mut state)?;

        let migration = migrate_to_owners(
            comm,
            &transport,
            &self.schema,
            linked,
            &state.labels,
            count.capacity,
            tags::GROUP_EXCHANGE,
        )?;
        partition.record_migration(comm, &migration.departed, &migration.arrived)?;
        let mut particles = migration.particles;
        let mut groups = migration.groups;
        let catalog = compile_groups(comm, &mut particles, &mut groups, self.config.linking.min_group_size)?;
        debug!(rank = %me, local = particles.len(), groups = catalog.local_groups(), "dark matter compiled");

        let out = match &self.config.baryons {
            Some(cfg) => {
                let outcome = BaryonAssociation::new(cfg.clone(), volume).associate(
                    comm,
                    &transport,
                    &mut partition,
                    &self.schema,
                    particles,
                    groups,
                    &catalog,
                    baryons,
                    count.capacity,
                )?;
                HaloCatalog {
                    particles: outcome.particles,
                    groups: outcome.groups,
                    catalog: outcome.catalog,
                    partition,
                    count,
                    links,
                    associated: Some(outcome.associated),
                }
            }
            None => HaloCatalog {
                particles,
                groups,
                catalog,
                partition,
                count,
                links,
                associated: None,
            },
        };
        if me == Rank::ROOT {
            info!(
                total = count.total,
                groups = out.catalog.total_groups(),
                passes = links.passes,
                "friends-of-friends finished"
            );
        }
        Ok(out)
    }
}
