// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Shared fixtures for recovery integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use quire_core::{EnsembleMap, EntryId, NodeAddress, RecoveryConfig};
use quire_recovery::InMemoryCluster;

static TRACING: Once = Once::new();

/// Installs a test log subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Bookie `name` on the default port.
pub fn bookie(name: &str) -> NodeAddress {
    NodeAddress::new(name, 3181)
}

/// An ensemble map from `(start, [bookie names])` pairs.
pub fn ensembles<const N: usize>(layout: &[(EntryId, [&str; N])]) -> EnsembleMap {
    layout
        .iter()
        .map(|(start, names)| (*start, names.iter().map(|name| bookie(name)).collect()))
        .collect()
}

/// A cluster with a seeded selector and the given registered bookies.
pub fn cluster_with_bookies(names: &[&str]) -> Arc<InMemoryCluster> {
    init_tracing();
    let cluster = InMemoryCluster::new(RecoveryConfig::new().selection_seed(42)).unwrap();
    for name in names {
        cluster.add_bookie(&bookie(name));
    }
    cluster
}

/// Creates ledger `ledger_id` with a closed fragment at 0 and an open one at 50.
///
/// Ensemble size 3, write quorum 2, entries `0..=60` written.
pub fn two_fragment_ledger(
    cluster: &InMemoryCluster,
    ledger_id: u64,
    first: [&str; 3],
    second: [&str; 3],
) {
    cluster.create_ledger(ledger_id, 3, 2, ensembles(&[(0, first), (50, second)]), Some(60));
}

/// Entries in `start..=end` held at `index` under round-robin placement.
pub fn held_entries(
    ensemble_size: u64,
    write_quorum: u64,
    start: EntryId,
    end: EntryId,
    index: u64,
) -> Vec<EntryId> {
    (start..=end)
        .filter(|entry| {
            (index + ensemble_size - entry % ensemble_size) % ensemble_size < write_quorum
        })
        .collect()
}
