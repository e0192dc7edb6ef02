// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Copies one entry to a replacement bookie.

use std::sync::Arc;

use metrics::counter;
use quire_core::{DigestManager, EntryId, LedgerHandle, NodeAddress, Outcome, WriteFlag};
use tracing::{debug, error};

use crate::context::RecoveryContext;

/// Re-replicates entries of one ledger.
///
/// Cheap to clone; each spawned entry task takes its own copy.
#[derive(Clone)]
pub struct EntryReplicator {
    ctx: Arc<RecoveryContext>,
    handle: Arc<LedgerHandle>,
    digest: Arc<DigestManager>,
}

impl EntryReplicator {
    /// Creates a replicator for the ledger behind `handle`.
    pub fn new(ctx: Arc<RecoveryContext>, handle: Arc<LedgerHandle>) -> Self {
        let digest = Arc::new(ctx.digest_manager(handle.id()));
        Self { ctx, handle, digest }
    }

    /// Reads `entry_id` from surviving replicas and writes it to `target`.
    pub async fn replicate(self, entry_id: EntryId, target: NodeAddress) -> Outcome {
        let ledger_id = self.handle.id();

        let data = match self.ctx.ledgers.read_entry(ledger_id, entry_id).await {
            Ok(data) => data,
            Err(e) => {
                error!(ledger_id, entry_id, error = %e, "Error reading ledger entry");
                counter!("quire_recovery_entry_failures_total", "stage" => "read").increment(1);
                return Outcome::ReplicationFailed;
            }
        };

        let packaged = self.digest.package(
            entry_id,
            self.handle.last_add_confirmed,
            data.len() as u64,
            &data,
        );

        match self
            .ctx
            .bookies
            .add_entry(&target, ledger_id, entry_id, packaged, WriteFlag::Recovery)
            .await
        {
            Ok(()) => {
                debug!(ledger_id, entry_id, target = %target, "Recovered entry");
                counter!("quire_recovery_entries_replicated_total").increment(1);
                Outcome::Ok
            }
            Err(e) => {
                error!(
                    ledger_id,
                    entry_id,
                    target = %target,
                    error = %e,
                    "Error writing entry to new bookie"
                );
                counter!("quire_recovery_entry_failures_total", "stage" => "write").increment(1);
                Outcome::ReplicationFailed
            }
        }
    }
}
