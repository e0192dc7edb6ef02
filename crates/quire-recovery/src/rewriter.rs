// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Ensemble metadata rewrite after a fragment has been re-replicated.
//!
//! The write is conditional on the record version the update was derived
//! from. Fragments of the same ledger recover concurrently, so a conflict is
//! expected: the replacement is re-applied to the record the store returned
//! and written again, until it lands or the position turns out to hold a
//! bookie other than the one being replaced.

use std::sync::Arc;

use metrics::counter;
use quire_core::{
    EnsembleError, Fragment, LedgerMetadataRecord, MetadataError, NodeAddress, Outcome,
};
use tracing::{error, info, warn};

use crate::context::RecoveryContext;

/// Swaps one bookie for another in a fragment's ensemble.
pub struct EnsembleRewriter {
    ctx: Arc<RecoveryContext>,
}

impl EnsembleRewriter {
    /// Creates a rewriter.
    pub fn new(ctx: Arc<RecoveryContext>) -> Self {
        Self { ctx }
    }

    /// Replaces `old` with `new` at position `index` of `fragment`'s ensemble.
    ///
    /// `snapshot` is the record the fragment was derived from; its version
    /// guards the first write attempt.
    pub async fn rewrite(
        &self,
        snapshot: LedgerMetadataRecord,
        fragment: &Fragment,
        index: usize,
        old: &NodeAddress,
        new: &NodeAddress,
    ) -> Outcome {
        let ledger_id = fragment.ledger_id;
        let start = fragment.start_entry_id;
        let mut current = snapshot;
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let updated = match current.with_replacement(start, index, old, new) {
                Ok(updated) => updated,
                Err(EnsembleError::PositionMismatch { found, .. }) if found == *new => {
                    info!(ledger_id, start, new = %new, "Ensemble already points to new bookie");
                    return Outcome::Ok;
                }
                Err(e) => {
                    error!(ledger_id, start, error = %e, "Cannot apply ensemble replacement");
                    counter!("quire_recovery_metadata_failures_total").increment(1);
                    return Outcome::MetadataError;
                }
            };

            match self.ctx.metadata.write_ledger_metadata(&updated).await {
                Ok(version) => {
                    info!(
                        ledger_id,
                        start,
                        old = %old,
                        new = %new,
                        version = %version,
                        attempts,
                        "Updated ledger ensemble"
                    );
                    counter!("quire_recovery_fragments_rewritten_total").increment(1);
                    return Outcome::Ok;
                }
                Err(MetadataError::BadVersion { current: latest }) => {
                    warn!(
                        ledger_id,
                        start,
                        stale = %updated.version,
                        current = %latest.version,
                        "Concurrent ensemble update, retrying"
                    );
                    counter!("quire_recovery_metadata_conflicts_total").increment(1);
                    current = *latest;
                }
                Err(e) => {
                    error!(ledger_id, start, error = %e, "Error writing ledger metadata");
                    counter!("quire_recovery_metadata_failures_total").increment(1);
                    return Outcome::MetadataError;
                }
            }
        }
    }
}
