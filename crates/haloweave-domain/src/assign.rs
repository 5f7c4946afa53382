//! Decompose-and-assign: move freshly read particles to their owners.

use crate::partition::Partition;
use haloweave_comm::{sort_by_destination, tags, Communicator, PropertyCodec, SendCountMatrix, Transport};
use haloweave_core::{DomainError, Particle, PropertySchema};
use tracing::debug;

/// Collective: send every particle this rank read to the rank that owns its
/// position, extra properties included. Returns the particles this rank
/// owns: its own kept particles first, then imports in source-rank order.
pub fn assign_particles<C: Communicator>(
    comm: &C,
    transport: &Transport,
    partition: &Partition,
    schema: &PropertySchema,
    particles: Vec<Particle>,
) -> Result<Vec<Particle>, DomainError> {
    let me = comm.rank();
    let mut kept = Vec::with_capacity(particles.len());
    let mut leaving = Vec::new();
    for p in particles {
        let owner = partition.locate(p.position)?;
        if owner == me {
            kept.push(p);
        } else {
            leaving.push((owner, p));
        }
    }
    let (outgoing, counts) = sort_by_destination(leaving, me, comm.size());
    let matrix = SendCountMatrix::gather(comm, &counts)?;
    let codec = PropertyCodec::new(schema);
    let imported = transport.exchange(comm, &matrix, &codec, &outgoing, tags::ASSIGN)?;
    debug!(
        rank = %me,
        kept = kept.len(),
        nexport = outgoing.len(),
        nimport = imported.len(),
        "particles assigned"
    );
    kept.extend(imported);
    Ok(kept)
}
