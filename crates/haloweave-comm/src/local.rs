//! In-process job: one OS thread per rank, wired by channels.
//!
//! Each ordered rank pair owns a dedicated unbounded channel, so messages
//! from one source arrive in send order. A receive for a tag that is not at
//! the head of the channel stashes the earlier messages until they are
//! asked for. When a rank's closure returns, its endpoint is dropped and
//! every peer still waiting on it sees [`CommError::PeerDisconnected`]
//! rather than hanging; a failing rank therefore takes the whole job down.

use crate::comm::{Communicator, Tag};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use haloweave_core::{CommError, Rank};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

struct Envelope {
    tag: Tag,
    payload: Box<dyn Any + Send>,
}

/// One rank's endpoint inside a [`LocalCluster`].
pub struct ThreadComm {
    rank: Rank,
    size: usize,
    /// Indexed by destination rank.
    outboxes: Vec<Sender<Envelope>>,
    /// Indexed by source rank.
    inboxes: Vec<Receiver<Envelope>>,
    /// Arrived but not yet requested, per source rank.
    stash: RefCell<Vec<VecDeque<Envelope>>>,
    collective_seq: Cell<u64>,
    recv_timeout: Option<Duration>,
}

impl ThreadComm {
    fn check_rank(&self, rank: Rank) -> Result<usize, CommError> {
        if rank.index() < self.size {
            Ok(rank.index())
        } else {
            Err(CommError::InvalidRank {
                rank,
                size: self.size,
            })
        }
    }

    fn take_stashed(&self, source: usize, tag: Tag) -> Option<Envelope> {
        let mut stash = self.stash.borrow_mut();
        let queue = &mut stash[source];
        let pos = queue.iter().position(|e| e.tag == tag)?;
        queue.remove(pos)
    }

    fn wait(&self, source: usize, tag: Tag) -> Result<Envelope, CommError> {
        let peer = Rank::from_index(source);
        let inbox = &self.inboxes[source];
        match self.recv_timeout {
            None => inbox.recv().map_err(|_| CommError::PeerDisconnected {
                rank: self.rank,
                peer,
                tag: tag.0,
            }),
            Some(limit) => inbox.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => CommError::Timeout {
                    rank: self.rank,
                    peer,
                    tag: tag.0,
                    waited_ms: limit.as_millis() as u64,
                },
                RecvTimeoutError::Disconnected => CommError::PeerDisconnected {
                    rank: self.rank,
                    peer,
                    tag: tag.0,
                },
            }),
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_any(
        &self,
        dest: Rank,
        tag: Tag,
        payload: Box<dyn Any + Send>,
    ) -> Result<(), CommError> {
        let d = self.check_rank(dest)?;
        self.outboxes[d]
            .send(Envelope { tag, payload })
            .map_err(|_| CommError::PeerDisconnected {
                rank: self.rank,
                peer: dest,
                tag: tag.0,
            })
    }

    fn recv_any(&self, source: Rank, tag: Tag) -> Result<Box<dyn Any + Send>, CommError> {
        let s = self.check_rank(source)?;
        if let Some(envelope) = self.take_stashed(s, tag) {
            return Ok(envelope.payload);
        }
        loop {
            let envelope = self.wait(s, tag)?;
            if envelope.tag == tag {
                return Ok(envelope.payload);
            }
            trace!(rank = %self.rank, source = %source, want = %tag, got = %envelope.tag, "stashing out-of-order message");
            self.stash.borrow_mut()[s].push_back(envelope);
        }
    }

    fn next_collective_tag(&self) -> Tag {
        let seq = self.collective_seq.get();
        self.collective_seq.set(seq + 1);
        Tag::collective(seq)
    }
}

/// Runs an SPMD closure on `size` ranks, one thread each.
///
/// # Examples
///
/// ```
/// use haloweave_comm::{Communicator, LocalCluster};
///
/// let sums = LocalCluster::new(3)
///     .run(|comm| comm.all_reduce_sum(comm.rank().0 as u64 + 1))
///     .unwrap();
/// assert!(sums.into_iter().all(|s| s == Ok(6)));
/// ```
#[derive(Clone, Debug)]
pub struct LocalCluster {
    size: usize,
    recv_timeout: Option<Duration>,
}

impl LocalCluster {
    /// A cluster of `size` ranks (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            recv_timeout: None,
        }
    }

    /// Fail receives that wait longer than `timeout` instead of blocking.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Build the endpoints without starting threads.
    pub fn endpoints(&self) -> Vec<ThreadComm> {
        let n = self.size;
        let mut senders: Vec<Vec<Sender<Envelope>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut receivers: Vec<Vec<Receiver<Envelope>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();
        // senders[src][dst] feeds receivers[dst][src].
        for src in 0..n {
            for dst in 0..n {
                let (tx, rx) = crossbeam_channel::unbounded();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(i, (outboxes, inboxes))| ThreadComm {
                rank: Rank::from_index(i),
                size: n,
                outboxes,
                inboxes,
                stash: RefCell::new((0..n).map(|_| VecDeque::new()).collect()),
                collective_seq: Cell::new(0),
                recv_timeout: self.recv_timeout,
            })
            .collect()
    }

    /// Run `f` on every rank and return the per-rank results in rank order.
    ///
    /// A panicking rank re-raises its panic here after all threads finish.
    pub fn run<F, R>(&self, f: F) -> Result<Vec<R>, CommError>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        debug!(ranks = self.size, "starting local cluster");
        let endpoints = self.endpoints();
        std::thread::scope(|scope| -> Result<Vec<R>, CommError> {
            let mut handles = Vec::with_capacity(endpoints.len());
            for comm in endpoints {
                let f = &f;
                let handle = std::thread::Builder::new()
                    .name(format!("rank-{}", comm.rank()))
                    .spawn_scoped(scope, move || f(comm))
                    .map_err(|e| CommError::Spawn {
                        reason: e.to_string(),
                    })?;
                handles.push(handle);
            }
            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.join() {
                    Ok(r) => results.push(r),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Ok(results)
        })
    }
}

// Endpoints move into their rank's thread.
const _: fn() = || {
    fn assert_send<T: Send>() {}
    assert_send::<ThreadComm>();
};
