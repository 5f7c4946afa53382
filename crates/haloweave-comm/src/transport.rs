//! Chunked, pairwise, blocking exchange against a closed send-count matrix.

use crate::codec::ChunkCodec;
use crate::comm::{Communicator, Tag};
use crate::matrix::SendCountMatrix;
use haloweave_core::{CommError, Rank, TransportConfig};
use std::ops::Range;
use tracing::{debug, trace};

/// Round schedule of one pair transfer.
///
/// Both ends derive the same plan from the matrix, so they agree on the
/// number of rounds without negotiating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    send: usize,
    recv: usize,
    chunk: usize,
}

impl ChunkPlan {
    /// Plan for `send` outgoing and `recv` incoming items, at most
    /// `max_items` per message.
    pub fn new(send: usize, recv: usize, max_items: usize) -> Self {
        Self {
            send,
            recv,
            chunk: max_items.max(1),
        }
    }

    /// Number of send-receive rounds.
    pub fn rounds(&self) -> usize {
        self.send
            .div_ceil(self.chunk)
            .max(self.recv.div_ceil(self.chunk))
    }

    /// Outgoing and incoming item ranges of `round`, each clamped to what
    /// remains (possibly empty).
    pub fn round(&self, round: usize) -> (Range<usize>, Range<usize>) {
        let clamp = |total: usize| {
            let start = (round * self.chunk).min(total);
            let end = (start + self.chunk).min(total);
            start..end
        };
        (clamp(self.send), clamp(self.recv))
    }
}

/// Moves items between ranks as prescribed by a [`SendCountMatrix`].
#[derive(Clone, Debug, Default)]
pub struct Transport {
    config: TransportConfig,
}

impl Transport {
    /// Transport with the given limits.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Exchange items with every rank this rank has traffic with.
    ///
    /// `outgoing` must hold exactly this rank's matrix row total, grouped by
    /// destination in ascending rank order. The result holds every incoming
    /// item grouped by source in ascending rank order, whatever order the
    /// pairs ran in. Within a pair, rounds are strictly sequential and each
    /// round's tag is `tag + round`.
    pub fn exchange<C, K>(
        &self,
        comm: &C,
        matrix: &SendCountMatrix,
        codec: &K,
        outgoing: &[K::Item],
        tag: Tag,
    ) -> Result<Vec<K::Item>, CommError>
    where
        C: Communicator,
        K: ChunkCodec,
    {
        let me = comm.rank();
        if matrix.size() != comm.size() {
            return Err(CommError::ShapeMismatch {
                expected: comm.size(),
                got: matrix.size(),
            });
        }
        let expected = matrix.send_total(me) as usize;
        if outgoing.len() != expected {
            return Err(CommError::OutgoingMismatch {
                expected,
                provided: outgoing.len(),
            });
        }
        let send_offsets = matrix.send_offsets(me);
        let max_items = self.config.items_per_message(codec.unit_bytes());
        let mut inbound: Vec<Vec<K::Item>> = (0..comm.size()).map(|_| Vec::new()).collect();

        for (a, b) in matrix.comm_pairs(self.config.pair_seed) {
            if me != a && me != b {
                continue;
            }
            let peer = if me == a { b } else { a };
            let nsend = matrix.get(me, peer) as usize;
            let nrecv = matrix.get(peer, me) as usize;
            let plan = ChunkPlan::new(nsend, nrecv, max_items);
            let base = send_offsets[peer.index()];
            let bucket = &mut inbound[peer.index()];
            bucket.reserve_exact(nrecv);
            for round in 0..plan.rounds() {
                let (out_range, in_range) = plan.round(round);
                let round_tag = tag.round(round as u64);
                let wire = codec.encode(&outgoing[base + out_range.start..base + out_range.end]);
                comm.send(peer, round_tag, wire)?;
                let received: K::Wire = comm.recv(peer, round_tag)?;
                let got = codec.decode(received, bucket)?;
                if got != in_range.len() {
                    return Err(CommError::CountMismatch {
                        peer,
                        expected: in_range.len(),
                        received: got,
                    });
                }
            }
            trace!(rank = %me, peer = %peer, nsend, nrecv, rounds = plan.rounds(), "pair exchanged");
        }

        let total: usize = inbound.iter().map(Vec::len).sum();
        debug!(rank = %me, tag = %tag, nexport = expected, nimport = total, "exchange complete");
        Ok(inbound.into_iter().flatten().collect())
    }
}

/// Group items by destination for [`Transport::exchange`].
///
/// Returns the items reordered by ascending destination (stable within a
/// destination) and the per-destination counts. Items addressed to `me`
/// are dropped, since the matrix diagonal is zero.
pub fn sort_by_destination<T>(
    items: impl IntoIterator<Item = (Rank, T)>,
    me: Rank,
    size: usize,
) -> (Vec<T>, Vec<u64>) {
    let mut keyed: Vec<(Rank, T)> = items.into_iter().filter(|(d, _)| *d != me).collect();
    keyed.sort_by_key(|(d, _)| *d);
    let mut counts = vec![0u64; size];
    for (d, _) in &keyed {
        counts[d.index()] += 1;
    }
    (keyed.into_iter().map(|(_, t)| t).collect(), counts)
}
