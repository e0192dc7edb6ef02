// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Recovery of every affected fragment of one ledger.

use std::sync::Arc;

use metrics::counter;
use quire_core::{LedgerId, NodeAddress, Outcome};
use tracing::{debug, error};

use crate::context::RecoveryContext;
use crate::fragment::FragmentRecoveryTask;
use crate::joiner::FanIn;
use crate::selector::CandidateSet;

/// Opens one ledger and recovers its fragments that include the dead bookie.
pub struct LedgerRecoveryTask {
    ctx: Arc<RecoveryContext>,
    ledger_id: LedgerId,
    source: NodeAddress,
    candidates: Arc<CandidateSet>,
}

impl LedgerRecoveryTask {
    /// Creates a task for `ledger_id`.
    pub fn new(
        ctx: Arc<RecoveryContext>,
        ledger_id: LedgerId,
        source: NodeAddress,
        candidates: Arc<CandidateSet>,
    ) -> Self {
        Self { ctx, ledger_id, source, candidates }
    }

    /// Runs the task to completion.
    pub async fn run(self) -> Outcome {
        let ledger_id = self.ledger_id;

        // Non-fencing open: a live writer keeps appending.
        let handle = match self.ctx.ledgers.open_ledger_no_recovery(ledger_id).await {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                error!(ledger_id, error = %e, "Error opening ledger for recovery");
                return Outcome::MetadataError;
            }
        };
        counter!("quire_recovery_ledgers_scanned_total").increment(1);

        let fragments: Vec<_> = handle
            .metadata
            .fragments()
            .into_iter()
            .filter(|fragment| fragment.contains(&self.source))
            .collect();

        if fragments.is_empty() {
            debug!(ledger_id, "Ledger has no fragments on the dead bookie");
            return Outcome::Ok;
        }
        debug!(ledger_id, fragments = fragments.len(), "Recovering ledger fragments");

        let ctx = self.ctx;
        let source = self.source;
        let candidates = self.candidates;
        FanIn::spawn_all(format!("ledger {ledger_id}"), fragments, |fragment| {
            FragmentRecoveryTask::new(
                Arc::clone(&ctx),
                Arc::clone(&handle),
                fragment,
                source.clone(),
                Arc::clone(&candidates),
            )
            .run()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use quire_core::{EnsembleMap, RecoveryConfig};

    use super::*;
    use crate::memory::InMemoryCluster;
    use crate::selector::{BookieSelector, NoEligibleBookie, RandomBookieSelector};

    /// Counts selections while delegating to a seeded random selector.
    struct CountingSelector {
        calls: AtomicUsize,
        inner: RandomBookieSelector,
    }

    impl BookieSelector for CountingSelector {
        fn select(
            &self,
            ensemble: &[NodeAddress],
            candidates: &CandidateSet,
        ) -> Result<NodeAddress, NoEligibleBookie> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.select(ensemble, candidates)
        }
    }

    fn node(name: &str) -> NodeAddress {
        NodeAddress::new(name, 3181)
    }

    fn task(cluster: &Arc<InMemoryCluster>, ledger_id: LedgerId) -> LedgerRecoveryTask {
        let candidates: CandidateSet = ["f", "g"].into_iter().map(node).collect();
        LedgerRecoveryTask::new(
            Arc::new(cluster.context()),
            ledger_id,
            node("a"),
            Arc::new(candidates),
        )
    }

    #[tokio::test]
    async fn test_untouched_ledger_never_selects() {
        let cluster = InMemoryCluster::new(RecoveryConfig::default()).unwrap();
        let ensembles: EnsembleMap = [
            (0, vec![node("b"), node("c"), node("d")]),
            (5, vec![node("c"), node("d"), node("e")]),
        ]
        .into_iter()
        .collect();
        cluster.create_ledger(4, 3, 2, ensembles, Some(9));

        let selector = Arc::new(CountingSelector {
            calls: AtomicUsize::new(0),
            inner: RandomBookieSelector::with_seed(1),
        });
        let ctx = Arc::new(cluster.context().with_selector(selector.clone()));
        let candidates = Arc::new(CandidateSet::single(node("f")));

        let outcome = LedgerRecoveryTask::new(ctx, 4, node("a"), candidates).run().await;
        assert_eq!(outcome, Outcome::Ok);
        assert_eq!(selector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cluster.metadata_write_count(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_metadata_error() {
        let cluster = InMemoryCluster::new(RecoveryConfig::default()).unwrap();
        assert_eq!(task(&cluster, 99).run().await, Outcome::MetadataError);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fragments_both_land() {
        let cluster = InMemoryCluster::new(RecoveryConfig::new().selection_seed(11)).unwrap();
        let ensembles: EnsembleMap = [
            (0, vec![node("a"), node("b"), node("c")]),
            (10, vec![node("c"), node("a"), node("b")]),
            (20, vec![node("b"), node("c"), node("d")]),
        ]
        .into_iter()
        .collect();
        cluster.create_ledger(2, 3, 2, ensembles, Some(25));

        assert_eq!(task(&cluster, 2).run().await, Outcome::Ok);

        let record = cluster.metadata(2).unwrap();
        assert_eq!(cluster.metadata_write_count(), 2);
        for start in [0, 10] {
            let ensemble = record.ensembles.get(start).unwrap();
            assert!(!ensemble.contains(&node("a")), "fragment {start} still on dead bookie");
        }
        assert_eq!(record.ensembles.get(20).unwrap(), &[node("b"), node("c"), node("d")]);
    }

    #[tokio::test]
    async fn test_no_replacement_aggregates_to_replication_failed() {
        let cluster = InMemoryCluster::new(RecoveryConfig::default()).unwrap();
        let ensembles: EnsembleMap = [
            (0, vec![node("a"), node("b"), node("c")]),
            (10, vec![node("a"), node("d"), node("e")]),
        ]
        .into_iter()
        .collect();
        cluster.create_ledger(5, 3, 2, ensembles, Some(15));

        let ctx = Arc::new(cluster.context());
        let candidates = Arc::new(CandidateSet::single(node("b")));
        let outcome = LedgerRecoveryTask::new(ctx, 5, node("a"), candidates).run().await;

        assert_eq!(outcome, Outcome::ReplicationFailed);
        assert_eq!(cluster.write_count(), 0);
        assert_eq!(cluster.metadata_write_count(), 0);
    }

    #[tokio::test]
    async fn test_fragment_failure_fails_ledger() {
        let cluster = InMemoryCluster::new(RecoveryConfig::default()).unwrap();
        let ensembles: EnsembleMap = [
            (0, vec![node("a"), node("b"), node("c")]),
            (10, vec![node("b"), node("c"), node("d")]),
        ]
        .into_iter()
        .collect();
        cluster.create_ledger(3, 3, 2, ensembles, Some(15));
        cluster.fail_writes_to(&node("f"));
        cluster.fail_writes_to(&node("g"));

        assert_eq!(task(&cluster, 3).run().await, Outcome::ReplicationFailed);
        assert_eq!(cluster.metadata_write_count(), 0);
    }
}
