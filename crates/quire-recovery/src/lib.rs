// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Bookie recovery for Quire ledger storage.
//!
//! When a bookie dies, every closed ledger fragment it stored has one replica
//! fewer than its write quorum demands. This crate restores them:
//! - Enumerates every ledger in the metadata store
//! - Finds the fragments whose ensemble includes the dead bookie
//! - Copies each such fragment's entries to a replacement bookie
//! - Rewrites the ensemble to point at the replacement
//!
//! # Architecture
//!
//! Recovery is a three-level fan-out, joined at each level by a [`FanIn`]:
//! 1. [`BookieRecovery`] syncs metadata, resolves replacement candidates and
//!    spawns one [`LedgerRecoveryTask`] per ledger
//! 2. Each ledger task opens its ledger without fencing and spawns one
//!    [`FragmentRecoveryTask`] per affected fragment
//! 3. Each fragment task picks a replacement, copies entries through an
//!    [`EntryReplicator`] and, only when all copies land, commits the new
//!    ensemble with an [`EnsembleRewriter`]
//!
//! Ensemble rewrites are conditional on the metadata version. Fragments of
//! one ledger recover concurrently, so the rewriter re-applies its change on
//! top of whatever version the store reports and retries.
//!
//! # Example
//!
//! ```ignore
//! use quire_core::{NodeAddress, RecoveryConfig, RecoveryRequest};
//! use quire_recovery::{BookieRecovery, InMemoryCluster};
//!
//! let cluster = InMemoryCluster::new(RecoveryConfig::default())?;
//! let recovery = BookieRecovery::new(cluster.context());
//!
//! let request = RecoveryRequest::new(NodeAddress::new("bookie-3", 3181));
//! let outcome = recovery.recover(request).await;
//! assert!(outcome.is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod coordinator;
pub mod error;
pub mod fragment;
pub mod joiner;
pub mod ledger;
pub mod memory;
pub mod replicator;
pub mod rewriter;
pub mod selector;
pub mod traits;

pub use context::RecoveryContext;
pub use coordinator::BookieRecovery;
pub use error::{RecoveryError, Result};
pub use fragment::FragmentRecoveryTask;
pub use joiner::FanIn;
pub use ledger::LedgerRecoveryTask;
pub use memory::{InMemoryCluster, StoredEntry};
pub use replicator::EntryReplicator;
pub use rewriter::EnsembleRewriter;
pub use selector::{BookieSelector, CandidateSet, NoEligibleBookie, RandomBookieSelector};
pub use traits::{BookieClient, LedgerClient, MetadataStore};
