// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Collaborators consumed by the recovery pipeline.

use async_trait::async_trait;
use bytes::Bytes;
use quire_core::{
    ClientError, EntryId, LedgerHandle, LedgerId, LedgerMetadataRecord, MetadataError,
    NodeAddress, Version, WriteFlag,
};

/// Linearizable key-value store holding ledger and bookie metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Brings the local view of `path` up to date with all prior writes.
    async fn sync(&self, path: &str) -> Result<(), MetadataError>;

    /// Lists the child names of `path`, in no particular order.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, MetadataError>;

    /// Writes a ledger's metadata if the stored version equals `record.version`.
    ///
    /// Returns the new version on success. A stale version is rejected with
    /// [`MetadataError::BadVersion`] carrying the currently stored record.
    async fn write_ledger_metadata(
        &self,
        record: &LedgerMetadataRecord,
    ) -> Result<Version, MetadataError>;
}

/// Client-side access to ledgers.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Opens a ledger without fencing it, so concurrent writers are unaffected.
    async fn open_ledger_no_recovery(&self, ledger_id: LedgerId)
        -> Result<LedgerHandle, ClientError>;

    /// Reads one entry from any surviving replica.
    async fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId)
        -> Result<Bytes, ClientError>;
}

/// Direct access to individual bookies.
#[async_trait]
pub trait BookieClient: Send + Sync {
    /// Writes a packaged entry to exactly one bookie.
    async fn add_entry(
        &self,
        node: &NodeAddress,
        ledger_id: LedgerId,
        entry_id: EntryId,
        packaged: Bytes,
        flag: WriteFlag,
    ) -> Result<(), ClientError>;
}
