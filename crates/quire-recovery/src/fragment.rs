// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Recovery of a single ledger fragment.

use std::sync::Arc;

use metrics::counter;
use quire_core::{
    DistributionSchedule, EntryId, Fragment, LedgerHandle, NodeAddress, Outcome,
    RoundRobinSchedule,
};
use tracing::{debug, error, warn};

use crate::context::RecoveryContext;
use crate::joiner::FanIn;
use crate::replicator::EntryReplicator;
use crate::rewriter::EnsembleRewriter;
use crate::selector::CandidateSet;

/// Moves the dead bookie's share of one fragment onto a replacement.
///
/// Steps, in order:
/// 1. Skip fragments still open for writes.
/// 2. Locate the dead bookie in the ensemble.
/// 3. Choose a replacement outside the ensemble.
/// 4. Copy every entry the dead bookie held to the replacement.
/// 5. Rewrite the ensemble, only if every copy succeeded.
pub struct FragmentRecoveryTask {
    ctx: Arc<RecoveryContext>,
    handle: Arc<LedgerHandle>,
    fragment: Fragment,
    source: NodeAddress,
    candidates: Arc<CandidateSet>,
}

impl FragmentRecoveryTask {
    /// Creates a task for `fragment` of the ledger behind `handle`.
    pub fn new(
        ctx: Arc<RecoveryContext>,
        handle: Arc<LedgerHandle>,
        fragment: Fragment,
        source: NodeAddress,
        candidates: Arc<CandidateSet>,
    ) -> Self {
        Self { ctx, handle, fragment, source, candidates }
    }

    /// Runs the task to completion.
    pub async fn run(self) -> Outcome {
        let ledger_id = self.fragment.ledger_id;
        let start = self.fragment.start_entry_id;

        let Some(end) = self.fragment.end_entry_id else {
            warn!(
                ledger_id,
                start,
                source = %self.source,
                "Dead bookie is still part of the current active ensemble, skipping"
            );
            counter!("quire_recovery_fragments_skipped_total", "reason" => "open").increment(1);
            return Outcome::Ok;
        };

        let Some(index) = self.fragment.position_of(&self.source) else {
            debug!(ledger_id, start, "Fragment does not contain the dead bookie");
            return Outcome::Ok;
        };
        if self.fragment.occurrences_of(&self.source) > 1 {
            error!(
                ledger_id,
                start,
                source = %self.source,
                "Dead bookie appears more than once in ensemble"
            );
            return Outcome::MetadataError;
        }

        let target = match self.ctx.selector.select(&self.fragment.ensemble, &self.candidates) {
            Ok(target) => target,
            Err(e) => {
                error!(ledger_id, start, error = %e, "Not enough bookies to recover fragment");
                counter!("quire_recovery_fragments_failed_total", "reason" => "no_replacement")
                    .increment(1);
                return Outcome::NotEnoughReplicas;
            }
        };

        let schedule = match RoundRobinSchedule::for_ledger(&self.handle.metadata) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(ledger_id, error = %e, "Ledger metadata has invalid quorum settings");
                return Outcome::MetadataError;
            }
        };
        let entries = entries_held(&schedule, start, end, index);

        debug!(
            ledger_id,
            start,
            end,
            index,
            target = %target,
            entries = entries.len(),
            "Recovering fragment"
        );

        let replicator = EntryReplicator::new(Arc::clone(&self.ctx), Arc::clone(&self.handle));
        let label = format!("ledger {ledger_id} fragment {start}");
        let copied = FanIn::spawn_all(label, entries, |entry_id| {
            replicator.clone().replicate(entry_id, target.clone())
        })
        .await;

        if !copied.is_ok() {
            error!(ledger_id, start, "Error replicating fragment entries, ensemble unchanged");
            counter!("quire_recovery_fragments_failed_total", "reason" => "replication")
                .increment(1);
            return copied;
        }

        EnsembleRewriter::new(Arc::clone(&self.ctx))
            .rewrite(self.handle.metadata.clone(), &self.fragment, index, &self.source, &target)
            .await
    }
}

/// Returns the entries in `start..=end` stored at ensemble position `index`.
fn entries_held(
    schedule: &dyn DistributionSchedule,
    start: EntryId,
    end: EntryId,
    index: usize,
) -> Vec<EntryId> {
    (start..=end).filter(|entry_id| schedule.has_entry(*entry_id, index)).collect()
}

#[cfg(test)]
mod tests {
    use quire_core::{EnsembleMap, RecoveryConfig, Version, WriteFlag};

    use super::*;
    use crate::memory::InMemoryCluster;
    use crate::traits::LedgerClient;

    fn node(name: &str) -> NodeAddress {
        NodeAddress::new(name, 3181)
    }

    fn setup(ensembles: EnsembleMap, last_entry: u64) -> Arc<InMemoryCluster> {
        let cluster = InMemoryCluster::new(RecoveryConfig::new().selection_seed(3)).unwrap();
        cluster.create_ledger(1, 3, 2, ensembles, Some(last_entry));
        cluster
    }

    async fn run_fragment(
        cluster: &Arc<InMemoryCluster>,
        start: EntryId,
        candidates: CandidateSet,
    ) -> Outcome {
        let ctx = Arc::new(cluster.context());
        let handle = Arc::new(cluster.open_ledger_no_recovery(1).await.unwrap());
        let fragment = handle
            .metadata
            .fragments()
            .into_iter()
            .find(|f| f.start_entry_id == start)
            .unwrap();
        FragmentRecoveryTask::new(ctx, handle, fragment, node("a"), Arc::new(candidates))
            .run()
            .await
    }

    #[test]
    fn test_entries_held() {
        let schedule = RoundRobinSchedule::new(3, 2).unwrap();
        assert_eq!(entries_held(&schedule, 0, 8, 0), vec![0, 2, 3, 5, 6, 8]);
        assert_eq!(entries_held(&schedule, 10, 12, 1), vec![10, 12]);
    }

    #[tokio::test]
    async fn test_recovers_closed_fragment() {
        let ensembles: EnsembleMap = [
            (0, vec![node("a"), node("b"), node("c")]),
            (50, vec![node("b"), node("c"), node("d")]),
        ]
        .into_iter()
        .collect();
        let cluster = setup(ensembles, 60);

        let outcome = run_fragment(&cluster, 0, CandidateSet::single(node("f"))).await;
        assert_eq!(outcome, Outcome::Ok);

        let expected: Vec<_> = (0..=49u64).filter(|e| e % 3 != 1).map(|e| (1, e)).collect();
        assert_eq!(cluster.written_entries(&node("f")), expected);
        assert_eq!(cluster.written_entry(&node("f"), 1, 0).unwrap().flag, WriteFlag::Recovery);

        let record = cluster.metadata(1).unwrap();
        assert_eq!(record.version, Version(1));
        assert_eq!(record.ensembles.get(0).unwrap(), &[node("f"), node("b"), node("c")]);
        assert_eq!(record.ensembles.get(50).unwrap(), &[node("b"), node("c"), node("d")]);
    }

    #[tokio::test]
    async fn test_open_fragment_is_skipped() {
        let ensembles: EnsembleMap =
            [(0, vec![node("a"), node("b"), node("c")])].into_iter().collect();
        let cluster = setup(ensembles, 10);

        let outcome = run_fragment(&cluster, 0, CandidateSet::single(node("f"))).await;
        assert_eq!(outcome, Outcome::Ok);
        assert_eq!(cluster.write_count(), 0);
        assert_eq!(cluster.metadata_write_count(), 0);
    }

    #[tokio::test]
    async fn test_no_replacement_leaves_metadata_untouched() {
        let ensembles: EnsembleMap = [
            (0, vec![node("a"), node("b"), node("c")]),
            (50, vec![node("b"), node("c"), node("d")]),
        ]
        .into_iter()
        .collect();
        let cluster = setup(ensembles, 60);

        let outcome = run_fragment(&cluster, 0, CandidateSet::single(node("b"))).await;
        assert_eq!(outcome, Outcome::NotEnoughReplicas);
        assert_eq!(cluster.write_count(), 0);
        assert_eq!(cluster.metadata_write_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_source_is_metadata_error() {
        let ensembles: EnsembleMap = [
            (0, vec![node("a"), node("b"), node("a")]),
            (50, vec![node("b"), node("c"), node("d")]),
        ]
        .into_iter()
        .collect();
        let cluster = setup(ensembles, 60);

        let outcome = run_fragment(&cluster, 0, CandidateSet::single(node("f"))).await;
        assert_eq!(outcome, Outcome::MetadataError);
        assert_eq!(cluster.write_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_copy_skips_rewrite() {
        let ensembles: EnsembleMap = [
            (0, vec![node("a"), node("b"), node("c")]),
            (50, vec![node("b"), node("c"), node("d")]),
        ]
        .into_iter()
        .collect();
        let cluster = setup(ensembles, 60);
        cluster.fail_read(1, 3);

        let outcome = run_fragment(&cluster, 0, CandidateSet::single(node("f"))).await;
        assert_eq!(outcome, Outcome::ReplicationFailed);
        assert_eq!(cluster.metadata_write_count(), 0);
        assert_eq!(cluster.metadata(1).unwrap().ensembles.get(0).unwrap()[0], node("a"));
    }
}
