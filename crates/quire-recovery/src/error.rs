// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Error types for bookie recovery.

use quire_core::Outcome;
use thiserror::Error;

/// Result type for blocking recovery operations.
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Failure of a whole recovery invocation.
///
/// There is no partial success: either every fragment of the dead bookie was
/// recovered or the invocation reports one of these kinds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryError {
    /// The metadata store failed or held malformed entries.
    #[error("metadata store error while recovering bookie data")]
    Metadata,

    /// A fragment had no eligible replacement bookie.
    #[error("not enough bookies available to host recovered fragments")]
    NotEnoughReplicas,

    /// One or more ledgers, fragments or entries failed to recover.
    #[error("failed to recover one or more ledger fragments")]
    ReplicationFailed,

    /// No tokio runtime was available to drive the blocking call.
    #[error("no tokio runtime available to drive recovery")]
    RuntimeUnavailable,

    /// The pipeline was dropped without posting an outcome.
    #[error("recovery pipeline ended without reporting an outcome")]
    Abandoned,
}

impl RecoveryError {
    /// Translates a terminal outcome into a result.
    pub fn check(outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Ok => Ok(()),
            Outcome::MetadataError => Err(Self::Metadata),
            Outcome::NotEnoughReplicas => Err(Self::NotEnoughReplicas),
            Outcome::ReplicationFailed => Err(Self::ReplicationFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_outcome() {
        assert_eq!(RecoveryError::check(Outcome::Ok), Ok(()));
        assert_eq!(RecoveryError::check(Outcome::MetadataError), Err(RecoveryError::Metadata));
        assert_eq!(
            RecoveryError::check(Outcome::NotEnoughReplicas),
            Err(RecoveryError::NotEnoughReplicas)
        );
        assert_eq!(
            RecoveryError::check(Outcome::ReplicationFailed),
            Err(RecoveryError::ReplicationFailed)
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            RecoveryError::Abandoned.to_string(),
            "recovery pipeline ended without reporting an outcome"
        );
    }
}
