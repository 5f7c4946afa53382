//! Boundary export lists: which local particles other ranks must see, and
//! what they are told about each particle's group.

use haloweave_comm::{
    sort_by_destination, tags, Communicator, PlainCodec, SendCountMatrix, Tag, Transport,
};
use haloweave_core::{FofError, GroupId, Particle, ParticleSnapshot, Rank};
use haloweave_domain::{ExportPlanner, Partition, SearchRadius};
use tracing::debug;

/// Group state of one particle as seen by other ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupState {
    /// Current label.
    pub group: GroupId,
    /// Rank that will hold the group.
    pub owner: Rank,
    /// Current group length.
    pub len: u64,
}

/// One particle exported to one rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportRecord {
    /// Index of the particle on the source rank.
    pub index: u32,
    /// Rank that exported the particle.
    pub source: Rank,
    /// Rank the record is addressed to.
    pub destination: Rank,
    /// Current group label.
    pub group: GroupId,
    /// Rank that will hold the group.
    pub group_owner: Rank,
    /// Current group length.
    pub group_len: u64,
}

impl ExportRecord {
    fn apply(&mut self, state: GroupState) {
        self.group = state.group;
        self.group_owner = state.owner;
        self.group_len = state.len;
    }
}

/// Tag pair used by one kind of boundary exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    /// Tag base for records.
    pub records: Tag,
    /// Tag base for particle snapshots.
    pub snapshots: Tag,
}

impl ExchangeTags {
    /// Tags of the cross-domain linker.
    pub const LINK: Self = Self {
        records: tags::LINK_RECORDS,
        snapshots: tags::LINK_SNAPSHOTS,
    };

    /// Tags of baryon association.
    pub const BARYON: Self = Self {
        records: tags::BARYON_RECORDS,
        snapshots: tags::BARYON_SNAPSHOTS,
    };
}

/// Records and snapshots exchanged across domain boundaries.
///
/// Building plans the exports, closes the send-count matrix and moves both
/// the records and a snapshot of every exported particle. Refreshing
/// re-sends only the records, against the same matrix.
#[derive(Clone, Debug)]
pub struct BoundaryExchange {
    tags: ExchangeTags,
    matrix: SendCountMatrix,
    outgoing: Vec<ExportRecord>,
    imported: Vec<ExportRecord>,
    snapshots: Vec<ParticleSnapshot>,
}

impl BoundaryExchange {
    /// Collective: export every particle whose `radius` sphere reaches
    /// another rank and for which `state` is `Some`.
    pub fn build<C, F>(
        comm: &C,
        transport: &Transport,
        partition: &Partition,
        particles: &[Particle],
        radius: f64,
        tags: ExchangeTags,
        state: F,
    ) -> Result<Self, FofError>
    where
        C: Communicator,
        F: Fn(usize) -> Option<GroupState>,
    {
        let me = comm.rank();
        let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.position).collect();
        let plan = ExportPlanner::new(partition, me).plan(&positions, SearchRadius::Fixed(radius));
        let mut keyed = Vec::with_capacity(plan.n_export() as usize);
        for (destination, i) in plan.pairs() {
            if let Some(s) = state(i) {
                keyed.push((
                    destination,
                    ExportRecord {
                        index: i as u32,
                        source: me,
                        destination,
                        group: s.group,
                        group_owner: s.owner,
                        group_len: s.len,
                    },
                ));
            }
        }
        let (outgoing, counts) = sort_by_destination(keyed, me, comm.size());
        let matrix = SendCountMatrix::gather(comm, &counts)?;
        let imported = transport.exchange(
            comm,
            &matrix,
            &PlainCodec::<ExportRecord>::new(),
            &outgoing,
            tags.records,
        )?;
        let shots: Vec<ParticleSnapshot> = outgoing
            .iter()
            .map(|r| particles[r.index as usize].snapshot())
            .collect();
        let snapshots = transport.exchange(
            comm,
            &matrix,
            &PlainCodec::<ParticleSnapshot>::new(),
            &shots,
            tags.snapshots,
        )?;
        debug!(
            rank = %me,
            nexport = outgoing.len(),
            nimport = imported.len(),
            "boundary export list built"
        );
        Ok(Self {
            tags,
            matrix,
            outgoing,
            imported,
            snapshots,
        })
    }

    /// Collective: refresh the group state of every outgoing record and
    /// re-send the records. `None` leaves a record unchanged.
    pub fn refresh<C, F>(&mut self, comm: &C, transport: &Transport, state: F) -> Result<(), FofError>
    where
        C: Communicator,
        F: Fn(usize) -> Option<GroupState>,
    {
        for r in &mut self.outgoing {
            if let Some(s) = state(r.index as usize) {
                r.apply(s);
            }
        }
        self.imported = transport.exchange(
            comm,
            &self.matrix,
            &PlainCodec::<ExportRecord>::new(),
            &self.outgoing,
            self.tags.records,
        )?;
        Ok(())
    }

    /// The closed send-count matrix.
    pub fn matrix(&self) -> &SendCountMatrix {
        &self.matrix
    }

    /// Records sent, grouped by destination.
    pub fn outgoing(&self) -> &[ExportRecord] {
        &self.outgoing
    }

    /// Records received, grouped by source.
    pub fn imported(&self) -> &[ExportRecord] {
        &self.imported
    }

    /// Snapshots of the imported particles, parallel to [`imported`](Self::imported).
    pub fn snapshots(&self) -> &[ParticleSnapshot] {
        &self.snapshots
    }

    /// Mutable imported records with their snapshots.
    pub fn imports_mut(&mut self) -> (&mut [ExportRecord], &[ParticleSnapshot]) {
        (&mut self.imported, &self.snapshots)
    }

    /// NExport.
    pub fn n_export(&self) -> usize {
        self.outgoing.len()
    }

    /// NImport.
    pub fn n_import(&self) -> usize {
        self.imported.len()
    }
}
