// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Fan-in of many asynchronous outcomes into one.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quire_core::Outcome;
use tokio::sync::oneshot;
use tracing::{error, warn, Instrument};

type Sink = Box<dyn FnOnce(Outcome) + Send>;

/// Aggregates the outcomes of `expected` participants.
///
/// Each participant calls [`FanIn::complete`] exactly once, from any thread.
/// The sink fires exactly once, on the completion that brings the count to
/// `expected`: with [`Outcome::Ok`] if every participant succeeded, otherwise
/// with [`Outcome::ReplicationFailed`]. With `expected == 0` it fires during
/// construction.
pub struct FanIn {
    expected: usize,
    label: String,
    done: AtomicUsize,
    failures: Mutex<Vec<Outcome>>,
    sink: Mutex<Option<Sink>>,
}

impl FanIn {
    /// Creates a joiner that hands the aggregate outcome to `sink`.
    pub fn new<F>(expected: usize, label: impl Into<String>, sink: F) -> Arc<Self>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let joiner = Arc::new(Self {
            expected,
            label: label.into(),
            done: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            sink: Mutex::new(Some(Box::new(sink))),
        });

        if expected == 0 {
            joiner.fire(Outcome::Ok);
        }

        joiner
    }

    /// Creates a joiner whose aggregate outcome is delivered on a oneshot channel.
    pub fn channel(
        expected: usize,
        label: impl Into<String>,
    ) -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let joiner = Self::new(expected, label, move |outcome| {
            let _ = tx.send(outcome);
        });
        (joiner, rx)
    }

    /// Spawns one task per item and waits for the aggregate outcome.
    ///
    /// Tasks run on the current tokio runtime and inherit the caller's span.
    /// If every task is dropped without completing, the aggregate is
    /// [`Outcome::ReplicationFailed`].
    pub async fn spawn_all<I, F, Fut>(label: impl Into<String>, items: Vec<I>, mut task: F) -> Outcome
    where
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (joiner, done) = Self::channel(items.len(), label);

        for item in items {
            let joiner = Arc::clone(&joiner);
            let fut = task(item);
            tokio::spawn(
                async move {
                    joiner.complete(fut.await);
                }
                .in_current_span(),
            );
        }
        drop(joiner);

        done.await.unwrap_or(Outcome::ReplicationFailed)
    }

    /// Records one participant's outcome.
    pub fn complete(&self, outcome: Outcome) {
        if !outcome.is_ok() {
            self.failures.lock().push(outcome);
        }

        let done = self.done.fetch_add(1, Ordering::AcqRel) + 1;

        if done == self.expected {
            let first_failure = self.failures.lock().first().copied();
            let aggregate = match first_failure {
                None => Outcome::Ok,
                Some(first) => {
                    error!(
                        label = %self.label,
                        first_failure = %first,
                        failures = self.failures.lock().len(),
                        expected = self.expected,
                        "Error recovering ledger data"
                    );
                    Outcome::ReplicationFailed
                }
            };
            self.fire(aggregate);
        } else if done > self.expected {
            warn!(label = %self.label, done, expected = self.expected, "Unexpected extra completion");
        }
    }

    /// Returns the number of participants that have completed.
    pub fn completed(&self) -> usize {
        self.done.load(Ordering::Acquire)
    }

    fn fire(&self, outcome: Outcome) {
        if let Some(sink) = self.sink.lock().take() {
            sink(outcome);
        }
    }
}
