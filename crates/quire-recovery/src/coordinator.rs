// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Entry point for recovering a dead bookie.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use quire_core::{LedgerId, MetadataError, Outcome, RecoveryConfig, RecoveryRequest};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::context::RecoveryContext;
use crate::error::{RecoveryError, Result};
use crate::joiner::FanIn;
use crate::ledger::LedgerRecoveryTask;
use crate::selector::CandidateSet;

/// Recovers all ledger data held by a dead bookie.
///
/// The pipeline syncs the ledger namespace, resolves the candidate
/// replacement bookies, enumerates every ledger, and recovers them all in
/// parallel. Nothing is checkpointed: a failed invocation may be re-run, and
/// fragments rewritten by the earlier run no longer reference the dead
/// bookie.
#[derive(Clone)]
pub struct BookieRecovery {
    ctx: Arc<RecoveryContext>,
    runtime: Option<Handle>,
}

impl BookieRecovery {
    /// Creates a recovery coordinator.
    ///
    /// Captures the current tokio runtime, if any, for
    /// [`recover_bookie_data`](Self::recover_bookie_data).
    pub fn new(ctx: RecoveryContext) -> Self {
        Self { ctx: Arc::new(ctx), runtime: Handle::try_current().ok() }
    }

    /// Sets the runtime that drives blocking invocations.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Returns the recovery configuration.
    pub fn config(&self) -> &RecoveryConfig {
        self.ctx.config()
    }

    /// Recovers the source bookie's data, reporting exactly one outcome.
    pub async fn recover(&self, request: RecoveryRequest) -> Outcome {
        let span = info_span!(
            "bookie_recovery",
            recovery_id = %Uuid::new_v4(),
            source = %request.source
        );

        async move {
            let started = Instant::now();
            info!(destination = ?request.destination, "Starting bookie recovery");

            let outcome = self.run(request).await;

            histogram!("quire_recovery_duration_seconds").record(started.elapsed().as_secs_f64());
            counter!("quire_recovery_invocations_total", "outcome" => outcome.to_string())
                .increment(1);
            info!(
                outcome = %outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Bookie recovery finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    /// Blocking form of [`recover`](Self::recover).
    ///
    /// Drives the pipeline on the captured runtime and waits for its outcome.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn recover_bookie_data(&self, request: RecoveryRequest) -> Result<()> {
        let runtime = self.runtime.as_ref().ok_or(RecoveryError::RuntimeUnavailable)?;

        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        runtime.spawn(async move {
            let _ = tx.send(this.recover(request).await);
        });

        let outcome = rx.blocking_recv().map_err(|_| RecoveryError::Abandoned)?;
        info!(outcome = %outcome, "Recover bookie operation completed");
        RecoveryError::check(outcome)
    }

    async fn run(&self, request: RecoveryRequest) -> Outcome {
        let config = &self.ctx.config;

        if let Err(e) = self.ctx.metadata.sync(&config.ledgers_path).await {
            error!(error = %e, "Error syncing ledger namespace");
            return Outcome::MetadataError;
        }

        let candidates = match self.resolve_candidates(&request).await {
            Ok(candidates) => Arc::new(candidates),
            Err(e) => {
                error!(error = %e, "Error resolving replacement bookies");
                return Outcome::MetadataError;
            }
        };

        let ledgers = match self.list_ledgers().await {
            Ok(ledgers) => ledgers,
            Err(e) => {
                error!(error = %e, "Error listing ledgers");
                return Outcome::MetadataError;
            }
        };

        info!(ledgers = ledgers.len(), candidates = candidates.len(), "Recovering ledgers");

        let ctx = &self.ctx;
        let source = request.source;
        FanIn::spawn_all("ledgers", ledgers, |ledger_id| {
            LedgerRecoveryTask::new(
                Arc::clone(ctx),
                ledger_id,
                source.clone(),
                Arc::clone(&candidates),
            )
            .run()
        })
        .await
    }

    /// Returns the destination alone, or every registered bookie.
    async fn resolve_candidates(
        &self,
        request: &RecoveryRequest,
    ) -> std::result::Result<CandidateSet, MetadataError> {
        if let Some(destination) = &request.destination {
            return Ok(CandidateSet::single(destination.clone()));
        }

        let names = self.ctx.metadata.get_children(&self.ctx.config.bookies_path()).await?;
        CandidateSet::from_registry(names)
    }

    /// Lists every ledger id in the namespace.
    async fn list_ledgers(&self) -> std::result::Result<Vec<LedgerId>, MetadataError> {
        let config = &self.ctx.config;
        let children = self.ctx.metadata.get_children(&config.ledgers_path).await?;

        let mut ledgers = Vec::with_capacity(children.len());
        for name in children {
            if let Some(ledger_id) = parse_ledger_node(config, &name)? {
                ledgers.push(ledger_id);
            }
        }
        Ok(ledgers)
    }
}

/// Parses a ledger namespace child name.
///
/// The registry node yields `None`. Anything else must be the ledger node
/// prefix followed by a decimal ledger id.
fn parse_ledger_node(
    config: &RecoveryConfig,
    name: &str,
) -> std::result::Result<Option<LedgerId>, MetadataError> {
    if name == config.available_node {
        return Ok(None);
    }

    name.strip_prefix(config.ledger_node_prefix.as_str())
        .and_then(|digits| digits.parse::<LedgerId>().ok())
        .map(Some)
        .ok_or_else(|| MetadataError::MalformedLedger { name: name.to_string() })
}
