//! Distributed union-find across domain boundaries.
//!
//! Each pass imports the boundary particles of neighbouring ranks with
//! their current group state and merges labels with every local particle
//! within the linking length:
//!
//! - both ungrouped: the side whose `(pid, rank)` is lower creates a group
//!   from its reserved id block, owned by the other side;
//! - both grouped: the larger id wins and the local chain is relabelled;
//! - foreign grouped, local ungrouped: the local particle joins.
//!
//! Every link either labels an ungrouped particle or strictly raises a
//! label, so repeated passes reach a fixed point where no rank links.
//!
//! A [`LinkCriterion`] decides which pairs within the linking length link
//! and which particles take part at all.

use crate::ball::BallSearch;
use crate::chains::GroupChains;
use crate::criterion::LinkCriterion;
use crate::export::{BoundaryExchange, ExchangeTags, ExportRecord, GroupState};
use crate::labels::GroupLabels;
use crate::numbering::IdBlock;
use haloweave_comm::{Communicator, Transport};
use haloweave_core::{FofError, LinkingConfig, Particle, Rank, SimulationVolume};
use haloweave_domain::Partition;
use tracing::{debug, info, info_span, warn};

/// Local friends-of-friends state mutated by linking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkState {
    /// Labels and owners.
    pub labels: GroupLabels,
    /// Serial group chains.
    pub chains: GroupChains,
    /// Fresh ids for groups created here.
    pub ids: IdBlock,
}

impl LinkState {
    /// Current group state of particle `i`.
    pub fn group_state(&self, i: usize) -> GroupState {
        GroupState {
            group: self.labels.group(i),
            owner: self.labels.owner(i),
            len: self.chains.group_len(i),
        }
    }
}

/// Outcome of [`CrossDomainLinker::run_to_fixed_point`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSummary {
    /// Passes run, including the final one that linked nothing.
    pub passes: usize,
    /// Links made across all ranks and passes.
    pub links: u64,
    /// Records this rank exported per pass.
    pub n_export: usize,
    /// Records this rank imported per pass.
    pub n_import: usize,
}

/// Merges group labels across domain boundaries.
///
/// Pairs within the linking length link when `criterion` says so; the
/// default criterion is the linking configuration's plain distance rule.
#[derive(Clone, Debug)]
pub struct CrossDomainLinker<K = LinkingConfig> {
    config: LinkingConfig,
    volume: SimulationVolume,
    criterion: K,
}

impl CrossDomainLinker {
    /// Linker for `config` in `volume`.
    pub fn new(config: LinkingConfig, volume: SimulationVolume) -> Self {
        Self {
            criterion: config.clone(),
            config,
            volume,
        }
    }
}

impl<K: LinkCriterion> CrossDomainLinker<K> {
    /// Same linker deciding pairs with `criterion`.
    pub fn with_criterion<K2: LinkCriterion>(self, criterion: K2) -> CrossDomainLinker<K2> {
        CrossDomainLinker {
            config: self.config,
            volume: self.volume,
            criterion,
        }
    }

    /// The linking configuration.
    pub fn config(&self) -> &LinkingConfig {
        &self.config
    }

    /// The volume linked in.
    pub fn volume(&self) -> &SimulationVolume {
        &self.volume
    }

    /// The pair criterion.
    pub fn criterion(&self) -> &K {
        &self.criterion
    }

    /// One link pass against the records in `exchange`. Returns the number
    /// of local modifications.
    pub fn link_across<S: BallSearch + ?Sized>(
        &self,
        me: Rank,
        exchange: &mut BoundaryExchange,
        search: &S,
        particles: &[Particle],
        state: &mut LinkState,
    ) -> Result<u64, FofError> {
        let ll = self.config.linking_length;
        let (records, snapshots) = exchange.imports_mut();
        let mut links = 0u64;
        let mut candidates = Vec::new();
        for (rec, shot) in records.iter_mut().zip(snapshots) {
            if !self.criterion.eligible(shot) {
                continue;
            }
            search.within(shot.position, ll, &mut candidates);
            for &j in &candidates {
                let local = particles[j].snapshot();
                if !self.criterion.eligible(&local) || !self.criterion.links(&self.volume, shot, &local) {
                    continue;
                }
                links += self.link_one(me, rec, shot.pid, j, local.pid, state)?;
            }
        }
        Ok(links)
    }

    fn link_one(
        &self,
        me: Rank,
        rec: &mut ExportRecord,
        foreign_pid: u64,
        j: usize,
        local_pid: u64,
        state: &mut LinkState,
    ) -> Result<u64, FofError> {
        let local = state.labels.group(state.chains.head(j));
        match (rec.group.is_grouped(), local.is_grouped()) {
            (false, false) => {
                if (local_pid, me) < (foreign_pid, rec.source) {
                    let id = state.ids.allocate()?;
                    state.labels.set(j, id, rec.source);
                    state.chains.set_group_len(j, 1);
                    return Ok(1);
                }
                Ok(0)
            }
            (true, true) => {
                if rec.group <= local {
                    return Ok(0);
                }
                let old_len = state.chains.group_len(j);
                let members: Vec<usize> = state.chains.members(j).collect();
                for m in members {
                    state.labels.set(m, rec.group, rec.group_owner);
                }
                state.chains.set_group_len(j, rec.group_len + old_len);
                rec.group_len += old_len;
                Ok(1)
            }
            (true, false) => {
                rec.group_len += 1;
                state.labels.set(j, rec.group, rec.group_owner);
                state.chains.set_group_len(j, rec.group_len);
                Ok(1)
            }
            (false, true) => Ok(0),
        }
    }

    /// Collective: build the export list, then link and refresh until no
    /// rank links. Fails with [`FofError::NotConverged`] on every rank if
    /// the configured pass limit is reached first.
    pub fn run_to_fixed_point<C, S>(
        &self,
        comm: &C,
        transport: &Transport,
        partition: &Partition,
        particles: &[Particle],
        search: &S,
        state: &mut LinkState,
    ) -> Result<LinkSummary, FofError>
    where
        C: Communicator,
        S: BallSearch + ?Sized,
    {
        let me = comm.rank();
        let _span = info_span!("link_across", rank = %me).entered();
        let mut exchange = BoundaryExchange::build(
            comm,
            transport,
            partition,
            particles,
            self.config.linking_length,
            ExchangeTags::LINK,
            |i| {
                self.criterion
                    .eligible(&particles[i].snapshot())
                    .then(|| state.group_state(i))
            },
        )?;
        let mut passes = 0usize;
        let mut total = 0u64;
        loop {
            passes += 1;
            let local = self.link_across(me, &mut exchange, search, particles, state)?;
            let global = comm.all_reduce_sum(local)?;
            total += global;
            debug!(rank = %me, pass = passes, local, global, "link pass");
            if global == 0 {
                break;
            }
            if self.config.max_passes.is_some_and(|max| passes >= max) {
                warn!(rank = %me, passes, "linking stopped before reaching a fixed point");
                return Err(FofError::NotConverged { passes });
            }
            exchange.refresh(comm, transport, |i| Some(state.group_state(i)))?;
        }
        if me == Rank::ROOT {
            info!(passes, links = total, "cross-domain linking converged");
        }
        Ok(LinkSummary {
            passes,
            links: total,
            n_export: exchange.n_export(),
            n_import: exchange.n_import(),
        })
    }
}
