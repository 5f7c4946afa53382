//! Test utilities for haloweave development.
//!
//! Provides seeded particle fixtures ([`fixtures`]), a brute-force serial
//! friends-of-friends reference ([`reference`]), and helpers for running
//! multi-rank jobs on threads.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
pub mod reference;

use haloweave_comm::LocalCluster;
use std::time::Duration;

pub use fixtures::{clump, deal, scatter_pids, uniform};
pub use reference::{naive_fof, same_grouping};

/// Receive timeout for test clusters; a mismatched collective fails the
/// test instead of hanging it.
pub const TEST_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// A cluster of `size` rank threads with [`TEST_RECV_TIMEOUT`].
pub fn cluster(size: usize) -> LocalCluster {
    LocalCluster::new(size).with_recv_timeout(TEST_RECV_TIMEOUT)
}

/// Install a test-writer fmt subscriber honouring `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
