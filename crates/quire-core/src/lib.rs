// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Core types for Quire ledger storage.
//!
//! This crate provides the building blocks shared by the recovery pipeline:
//! - Ledger, ensemble and fragment types
//! - Deterministic entry placement within an ensemble
//! - Entry digests and the packaged entry format
//! - Collaborator error types
//! - Recovery configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod digest;
pub mod error;
pub mod schedule;
pub mod types;

pub use config::{ConfigValidationError, RecoveryConfig};
pub use digest::{DigestManager, DigestType, PackagedEntry};
pub use error::{ClientError, DigestError, EnsembleError, MetadataError, ScheduleError};
pub use schedule::{DistributionSchedule, RoundRobinSchedule};
pub use types::{
    EnsembleMap, EntryId, Fragment, LedgerHandle, LedgerId, LedgerMetadataRecord, NodeAddress,
    Outcome, RecoveryRequest, Version, WriteFlag,
};
