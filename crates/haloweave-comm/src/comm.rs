//! The [`Communicator`] trait: tagged messages plus SPMD collectives.
//!
//! Implementors supply four primitives (identity, raw send, raw receive and
//! a collective sequence counter). Typed sends, receives and every
//! collective are provided on top. Collectives are full barriers in the
//! sense that every rank must call them in the same order; messages are
//! matched by `(source, tag)` and each collective call draws a fresh tag.

use haloweave_core::{CommError, Rank};
use std::any::{self, Any};
use std::fmt;

/// Message tag. Matching is exact; messages of one `(source, tag)` pair are
/// delivered in send order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u64);

impl Tag {
    /// First tag of the range reserved for collectives.
    pub const COLLECTIVE_BASE: u64 = 1 << 48;

    /// Tag of the `seq`-th collective call.
    pub fn collective(seq: u64) -> Self {
        Self(Self::COLLECTIVE_BASE + seq)
    }

    /// Tag of round `round` of a multi-round transfer based at `self`.
    pub fn round(self, round: u64) -> Self {
        Self(self.0 + round)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base tags of the engine's transfers.
///
/// Bases are spaced so that per-round offsets of one transfer never reach
/// the next base in practice; matching stays correct even if they did,
/// because rounds within a pair are strictly sequential.
pub mod tags {
    use super::Tag;

    /// Redistribution of freshly read particles to their owners.
    pub const ASSIGN: Tag = Tag(0x0001_0000_0000);
    /// Export records of the linker.
    pub const LINK_RECORDS: Tag = Tag(0x0002_0000_0000);
    /// Particle snapshots accompanying linker export records.
    pub const LINK_SNAPSHOTS: Tag = Tag(0x0003_0000_0000);
    /// Group migration.
    pub const GROUP_EXCHANGE: Tag = Tag(0x0004_0000_0000);
    /// Baryon export records.
    pub const BARYON_RECORDS: Tag = Tag(0x0005_0000_0000);
    /// Dark-matter snapshots accompanying baryon export records.
    pub const BARYON_SNAPSHOTS: Tag = Tag(0x0006_0000_0000);
    /// Baryon migration.
    pub const BARYON_EXCHANGE: Tag = Tag(0x0007_0000_0000);
    /// Neighbour search spheres.
    pub const NEIGHBOUR_SPHERES: Tag = Tag(0x0008_0000_0000);
    /// Particles returned for neighbour search spheres.
    pub const NEIGHBOUR_PARTICLES: Tag = Tag(0x0009_0000_0000);
    /// Point-to-point label collection on the root.
    pub const COLLECT_LABELS: Tag = Tag(0x000a_0000_0000);
}

/// One rank's endpoint into the job.
pub trait Communicator {
    /// This rank.
    fn rank(&self) -> Rank;

    /// Number of ranks in the job.
    fn size(&self) -> usize;

    /// Queue `payload` for `dest`. Never blocks on the receiver.
    fn send_any(&self, dest: Rank, tag: Tag, payload: Box<dyn Any + Send>)
        -> Result<(), CommError>;

    /// Block until a message with `tag` from `source` arrives.
    fn recv_any(&self, source: Rank, tag: Tag) -> Result<Box<dyn Any + Send>, CommError>;

    /// Advance and return this rank's collective sequence tag.
    fn next_collective_tag(&self) -> Tag;

    /// Send a typed value.
    fn send<T: Send + 'static>(&self, dest: Rank, tag: Tag, value: T) -> Result<(), CommError>
    where
        Self: Sized,
    {
        self.send_any(dest, tag, Box::new(value))
    }

    /// Receive a typed value.
    fn recv<T: Send + 'static>(&self, source: Rank, tag: Tag) -> Result<T, CommError>
    where
        Self: Sized,
    {
        self.recv_any(source, tag)?
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| CommError::PayloadType {
                peer: source,
                tag: tag.0,
                expected: any::type_name::<T>(),
            })
    }

    /// Blocking exchange with one peer: send `value`, then receive the
    /// peer's message of the same tag.
    fn send_recv<S, R>(&self, peer: Rank, tag: Tag, value: S) -> Result<R, CommError>
    where
        Self: Sized,
        S: Send + 'static,
        R: Send + 'static,
    {
        self.send(peer, tag, value)?;
        self.recv(peer, tag)
    }

    /// Every rank contributes `value`; every rank receives all values in
    /// rank order.
    fn all_gather<T: Clone + Send + 'static>(&self, value: T) -> Result<Vec<T>, CommError>
    where
        Self: Sized,
    {
        let tag = self.next_collective_tag();
        let me = self.rank();
        for peer in Rank::all(self.size()).filter(|&p| p != me) {
            self.send(peer, tag, value.clone())?;
        }
        let mut out = Vec::with_capacity(self.size());
        for peer in Rank::all(self.size()) {
            if peer == me {
                out.push(value.clone());
            } else {
                out.push(self.recv(peer, tag)?);
            }
        }
        Ok(out)
    }

    /// Distribute the root's value to every rank.
    ///
    /// Only the root's `value` is read; non-root ranks may pass anything.
    fn broadcast<T: Clone + Send + 'static>(&self, root: Rank, value: T) -> Result<T, CommError>
    where
        Self: Sized,
    {
        let tag = self.next_collective_tag();
        if root.index() >= self.size() {
            return Err(CommError::InvalidRank {
                rank: root,
                size: self.size(),
            });
        }
        if self.rank() == root {
            for peer in Rank::all(self.size()).filter(|&p| p != root) {
                self.send(peer, tag, value.clone())?;
            }
            Ok(value)
        } else {
            self.recv(root, tag)
        }
    }

    /// Global sum of one counter.
    fn all_reduce_sum(&self, value: u64) -> Result<u64, CommError>
    where
        Self: Sized,
    {
        Ok(self.all_gather(value)?.into_iter().sum())
    }

    /// Element-wise global sum of equally sized vectors.
    fn all_reduce_sum_vec(&self, values: Vec<u64>) -> Result<Vec<u64>, CommError>
    where
        Self: Sized,
    {
        let len = values.len();
        let gathered = self.all_gather(values)?;
        let mut total = vec![0u64; len];
        for row in gathered {
            if row.len() != len {
                return Err(CommError::ShapeMismatch {
                    expected: len,
                    got: row.len(),
                });
            }
            for (t, v) in total.iter_mut().zip(row) {
                *t += v;
            }
        }
        Ok(total)
    }

    /// Wait until every rank has reached this call.
    fn barrier(&self) -> Result<(), CommError>
    where
        Self: Sized,
    {
        self.all_gather(()).map(|_| ())
    }
}
