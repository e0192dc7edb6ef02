// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Error types reported by recovery collaborators.

use thiserror::Error;

use crate::types::{EntryId, LedgerId, LedgerMetadataRecord, NodeAddress};

/// Errors from the metadata store or from malformed metadata.
#[derive(Error, Debug, Clone)]
pub enum MetadataError {
    /// Syncing the local view of a namespace failed.
    #[error("failed to sync {path}: {reason}")]
    Sync {
        /// Namespace being synced.
        path: String,
        /// The reason for failure.
        reason: String,
    },

    /// The requested node does not exist.
    #[error("no such node: {path}")]
    NoNode {
        /// Path that was looked up.
        path: String,
    },

    /// A conditional write carried a stale version.
    #[error(
        "version conflict on ledger {}: store is at {}",
        current.ledger_id,
        current.version
    )]
    BadVersion {
        /// The record as currently stored, including its version.
        current: Box<LedgerMetadataRecord>,
    },

    /// A bookie registry entry is not a `host:port` name.
    #[error("bookie node has invalid name format: {name}")]
    MalformedBookie {
        /// The offending child name.
        name: String,
    },

    /// A ledger namespace entry does not encode a ledger id.
    #[error("ledger node has invalid name format: {name}")]
    MalformedLedger {
        /// The offending child name.
        name: String,
    },

    /// Any other metadata store failure.
    #[error("metadata store error: {0}")]
    Store(String),
}

/// Errors from the ledger read path or from direct bookie writes.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The ledger does not exist.
    #[error("no such ledger: {0}")]
    NoSuchLedger(LedgerId),

    /// The entry could not be found on any replica.
    #[error("no such entry: ledger {ledger_id}, entry {entry_id}")]
    NoSuchEntry {
        /// Ledger being read.
        ledger_id: LedgerId,
        /// Entry being read.
        entry_id: EntryId,
    },

    /// Reading an entry failed.
    #[error("failed to read ledger {ledger_id} entry {entry_id}: {reason}")]
    ReadFailed {
        /// Ledger being read.
        ledger_id: LedgerId,
        /// Entry being read.
        entry_id: EntryId,
        /// The reason for failure.
        reason: String,
    },

    /// Writing an entry to a bookie failed.
    #[error("failed to write ledger {ledger_id} entry {entry_id} to {node}: {reason}")]
    WriteFailed {
        /// Target bookie.
        node: NodeAddress,
        /// Ledger being written.
        ledger_id: LedgerId,
        /// Entry being written.
        entry_id: EntryId,
        /// The reason for failure.
        reason: String,
    },

    /// A packaged entry failed digest verification.
    #[error("digest mismatch: {0}")]
    DigestMismatch(#[from] DigestError),

    /// The target bookie is not reachable.
    #[error("bookie {0} is unavailable")]
    BookieUnavailable(NodeAddress),
}

/// Errors from ensemble map updates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnsembleError {
    /// No fragment starts at the given entry.
    #[error("no fragment starts at entry {start_entry_id}")]
    NoSuchFragment {
        /// Requested fragment start.
        start_entry_id: EntryId,
    },

    /// The ensemble position is past the ensemble width.
    #[error("position {index} out of range for fragment {start_entry_id} of width {width}")]
    IndexOutOfRange {
        /// Fragment start.
        start_entry_id: EntryId,
        /// Requested position.
        index: usize,
        /// Ensemble width.
        width: usize,
    },

    /// The ensemble position no longer holds the expected bookie.
    #[error("fragment {start_entry_id} position {index} holds {found}, expected {expected}")]
    PositionMismatch {
        /// Fragment start.
        start_entry_id: EntryId,
        /// Position inspected.
        index: usize,
        /// The bookie expected at that position.
        expected: NodeAddress,
        /// The bookie actually found.
        found: NodeAddress,
    },
}

/// Errors from distribution schedule construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Ensemble size must be at least 1.
    #[error("ensemble size must be at least 1")]
    EmptyEnsemble,

    /// Write quorum must be at least 1.
    #[error("write quorum must be at least 1")]
    EmptyWriteQuorum,

    /// Write quorum cannot exceed the ensemble size.
    #[error("write quorum {write_quorum} exceeds ensemble size {ensemble_size}")]
    QuorumExceedsEnsemble {
        /// Configured write quorum.
        write_quorum: usize,
        /// Configured ensemble size.
        ensemble_size: usize,
    },
}

/// Errors from unpacking a packaged entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The buffer is shorter than header plus digest.
    #[error("packaged entry too short: {len} bytes")]
    Truncated {
        /// Buffer length.
        len: usize,
    },

    /// The entry belongs to a different ledger.
    #[error("entry belongs to ledger {found}, expected {expected}")]
    LedgerMismatch {
        /// Ledger the digest manager was built for.
        expected: LedgerId,
        /// Ledger in the header.
        found: LedgerId,
    },

    /// The payload length does not match the header.
    #[error("payload length {found} does not match header length {expected}")]
    LengthMismatch {
        /// Length in the header.
        expected: u64,
        /// Actual payload length.
        found: u64,
    },

    /// The digest does not match the content.
    #[error("digest does not match content of entry {entry_id}")]
    BadDigest {
        /// Entry in the header.
        entry_id: EntryId,
    },
}
