// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! In-memory cluster implementing every recovery collaborator.
//!
//! Holds ledger metadata with versioned conditional writes, a bookie
//! registry, entry payloads, and the entries written to each bookie. Faults
//! can be injected per operation for testing failure paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use quire_core::{
    ClientError, ConfigValidationError, DigestManager, EnsembleMap, EntryId, LedgerHandle,
    LedgerId, LedgerMetadataRecord, MetadataError, NodeAddress, RecoveryConfig, Version,
    WriteFlag,
};

use crate::context::RecoveryContext;
use crate::traits::{BookieClient, LedgerClient, MetadataStore};

/// An entry as received by a bookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Packaged bytes, header and digest included.
    pub packaged: Bytes,
    /// Flag the write was issued with.
    pub flag: WriteFlag,
}

#[derive(Debug, Clone)]
struct LedgerState {
    record: LedgerMetadataRecord,
    last_add_confirmed: Option<EntryId>,
}

#[derive(Default)]
struct Faults {
    sync: AtomicBool,
    listing: AtomicBool,
    metadata_writes: AtomicBool,
    version_conflicts: AtomicUsize,
    open: DashSet<LedgerId>,
    reads: DashSet<(LedgerId, EntryId)>,
    writes_to: DashSet<NodeAddress>,
}

/// An in-memory metadata store, ledger client and bookie client.
pub struct InMemoryCluster {
    config: RecoveryConfig,
    ledgers: Mutex<BTreeMap<LedgerId, LedgerState>>,
    extra_ledger_nodes: Mutex<Vec<String>>,
    registry: Mutex<Vec<String>>,
    entries: DashMap<(LedgerId, EntryId), Bytes>,
    written: DashMap<(NodeAddress, LedgerId, EntryId), StoredEntry>,
    metadata_writes: AtomicUsize,
    faults: Faults,
}

impl InMemoryCluster {
    /// Creates an empty cluster laid out per `config`.
    pub fn new(config: RecoveryConfig) -> Result<Arc<Self>, ConfigValidationError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            ledgers: Mutex::new(BTreeMap::new()),
            extra_ledger_nodes: Mutex::new(Vec::new()),
            registry: Mutex::new(Vec::new()),
            entries: DashMap::new(),
            written: DashMap::new(),
            metadata_writes: AtomicUsize::new(0),
            faults: Faults::default(),
        }))
    }

    /// Builds a recovery context backed by this cluster.
    pub fn context(self: &Arc<Self>) -> RecoveryContext {
        RecoveryContext::from_validated(
            self.config.clone(),
            Arc::clone(self) as Arc<dyn MetadataStore>,
            Arc::clone(self) as Arc<dyn LedgerClient>,
            Arc::clone(self) as Arc<dyn BookieClient>,
        )
    }

    /// Registers a bookie as available.
    pub fn add_bookie(&self, node: &NodeAddress) {
        self.registry.lock().push(node.to_string());
    }

    /// Registers a raw child name under the bookie registry.
    pub fn add_registry_node(&self, name: impl Into<String>) {
        self.registry.lock().push(name.into());
    }

    /// Adds a raw child name under the ledger namespace.
    pub fn add_ledger_node(&self, name: impl Into<String>) {
        self.extra_ledger_nodes.lock().push(name.into());
    }

    /// Creates a ledger whose entries `0..=last_entry` are readable.
    pub fn create_ledger(
        &self,
        ledger_id: LedgerId,
        ensemble_size: usize,
        write_quorum_size: usize,
        ensembles: EnsembleMap,
        last_entry: Option<EntryId>,
    ) {
        if let Some(last) = last_entry {
            for entry_id in 0..=last {
                self.entries.insert((ledger_id, entry_id), Self::payload(ledger_id, entry_id));
            }
        }
        let record =
            LedgerMetadataRecord::new(ledger_id, ensemble_size, write_quorum_size, ensembles);
        self.ledgers
            .lock()
            .insert(ledger_id, LedgerState { record, last_add_confirmed: last_entry });
    }

    /// Returns the payload stored for an entry of a created ledger.
    pub fn payload(ledger_id: LedgerId, entry_id: EntryId) -> Bytes {
        Bytes::from(format!("ledger-{ledger_id}-entry-{entry_id}"))
    }

    /// Returns the current metadata record of a ledger.
    pub fn metadata(&self, ledger_id: LedgerId) -> Option<LedgerMetadataRecord> {
        self.ledgers.lock().get(&ledger_id).map(|state| state.record.clone())
    }

    /// Returns the number of successful metadata writes.
    pub fn metadata_write_count(&self) -> usize {
        self.metadata_writes.load(Ordering::Acquire)
    }

    /// Returns the `(ledger, entry)` pairs written to `node`, sorted.
    pub fn written_entries(&self, node: &NodeAddress) -> Vec<(LedgerId, EntryId)> {
        let mut written: Vec<_> = self
            .written
            .iter()
            .filter(|item| &item.key().0 == node)
            .map(|item| (item.key().1, item.key().2))
            .collect();
        written.sort_unstable();
        written
    }

    /// Returns one entry as received by `node`.
    pub fn written_entry(
        &self,
        node: &NodeAddress,
        ledger_id: LedgerId,
        entry_id: EntryId,
    ) -> Option<StoredEntry> {
        self.written.get(&(node.clone(), ledger_id, entry_id)).map(|item| item.value().clone())
    }

    /// Returns the total number of entries written to bookies.
    pub fn write_count(&self) -> usize {
        self.written.len()
    }

    /// Makes every sync fail.
    pub fn fail_sync(&self, fail: bool) {
        self.faults.sync.store(fail, Ordering::Release);
    }

    /// Makes every child listing fail.
    pub fn fail_listing(&self, fail: bool) {
        self.faults.listing.store(fail, Ordering::Release);
    }

    /// Makes every metadata write fail with a store error.
    pub fn fail_metadata_writes(&self, fail: bool) {
        self.faults.metadata_writes.store(fail, Ordering::Release);
    }

    /// Rejects the next `count` metadata writes as stale.
    ///
    /// Each rejection bumps the stored version, as if another writer had
    /// touched the record.
    pub fn inject_version_conflicts(&self, count: usize) {
        self.faults.version_conflicts.store(count, Ordering::Release);
    }

    /// Makes opening `ledger_id` fail.
    pub fn fail_open(&self, ledger_id: LedgerId) {
        self.faults.open.insert(ledger_id);
    }

    /// Makes reading one entry fail.
    pub fn fail_read(&self, ledger_id: LedgerId, entry_id: EntryId) {
        self.faults.reads.insert((ledger_id, entry_id));
    }

    /// Makes every write to `node` fail.
    pub fn fail_writes_to(&self, node: &NodeAddress) {
        self.faults.writes_to.insert(node.clone());
    }

    fn ledger_node_name(&self, ledger_id: LedgerId) -> String {
        format!("{}{:010}", self.config.ledger_node_prefix, ledger_id)
    }

    fn take_version_conflict(&self) -> bool {
        self.faults
            .version_conflicts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MetadataStore for InMemoryCluster {
    async fn sync(&self, path: &str) -> Result<(), MetadataError> {
        if self.faults.sync.load(Ordering::Acquire) {
            return Err(MetadataError::Sync {
                path: path.to_string(),
                reason: "connection loss".to_string(),
            });
        }
        Ok(())
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, MetadataError> {
        if self.faults.listing.load(Ordering::Acquire) {
            return Err(MetadataError::Store(format!("connection loss listing {path}")));
        }

        if path == self.config.bookies_path() {
            return Ok(self.registry.lock().clone());
        }
        if path.trim_end_matches('/') == self.config.ledgers_path.trim_end_matches('/') {
            let mut children: Vec<String> =
                self.ledgers.lock().keys().map(|id| self.ledger_node_name(*id)).collect();
            children.push(self.config.available_node.clone());
            children.extend(self.extra_ledger_nodes.lock().iter().cloned());
            return Ok(children);
        }

        Err(MetadataError::NoNode { path: path.to_string() })
    }

    async fn write_ledger_metadata(
        &self,
        record: &LedgerMetadataRecord,
    ) -> Result<Version, MetadataError> {
        if self.faults.metadata_writes.load(Ordering::Acquire) {
            return Err(MetadataError::Store("session expired".to_string()));
        }

        let mut ledgers = self.ledgers.lock();
        let state = ledgers.get_mut(&record.ledger_id).ok_or_else(|| MetadataError::NoNode {
            path: format!(
                "{}/{}",
                self.config.ledgers_path.trim_end_matches('/'),
                self.ledger_node_name(record.ledger_id)
            ),
        })?;

        if self.take_version_conflict() {
            state.record.version = state.record.version.next();
            return Err(MetadataError::BadVersion { current: Box::new(state.record.clone()) });
        }

        if record.version != state.record.version {
            return Err(MetadataError::BadVersion { current: Box::new(state.record.clone()) });
        }

        let version = state.record.version.next();
        state.record = record.at_version(version);
        self.metadata_writes.fetch_add(1, Ordering::AcqRel);
        Ok(version)
    }
}

#[async_trait]
impl LedgerClient for InMemoryCluster {
    async fn open_ledger_no_recovery(
        &self,
        ledger_id: LedgerId,
    ) -> Result<LedgerHandle, ClientError> {
        if self.faults.open.contains(&ledger_id) {
            return Err(ClientError::NoSuchLedger(ledger_id));
        }

        self.ledgers
            .lock()
            .get(&ledger_id)
            .map(|state| LedgerHandle {
                metadata: state.record.clone(),
                last_add_confirmed: state.last_add_confirmed,
            })
            .ok_or(ClientError::NoSuchLedger(ledger_id))
    }

    async fn read_entry(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
    ) -> Result<Bytes, ClientError> {
        if self.faults.reads.contains(&(ledger_id, entry_id)) {
            return Err(ClientError::ReadFailed {
                ledger_id,
                entry_id,
                reason: "no surviving replica responded".to_string(),
            });
        }

        self.entries
            .get(&(ledger_id, entry_id))
            .map(|item| item.value().clone())
            .ok_or(ClientError::NoSuchEntry { ledger_id, entry_id })
    }
}

#[async_trait]
impl BookieClient for InMemoryCluster {
    async fn add_entry(
        &self,
        node: &NodeAddress,
        ledger_id: LedgerId,
        entry_id: EntryId,
        packaged: Bytes,
        flag: WriteFlag,
    ) -> Result<(), ClientError> {
        if self.faults.writes_to.contains(node) {
            return Err(ClientError::BookieUnavailable(node.clone()));
        }

        let digest = DigestManager::new(
            ledger_id,
            self.config.digest_type,
            self.config.password.as_bytes(),
        );
        let entry = digest.verify(&packaged)?;
        if entry.entry_id != entry_id {
            return Err(ClientError::WriteFailed {
                node: node.clone(),
                ledger_id,
                entry_id,
                reason: format!("packaged entry id {} does not match", entry.entry_id),
            });
        }

        self.written.insert((node.clone(), ledger_id, entry_id), StoredEntry { packaged, flag });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeAddress {
        NodeAddress::new(name, 3181)
    }

    fn cluster() -> Arc<InMemoryCluster> {
        let cluster = InMemoryCluster::new(RecoveryConfig::default()).unwrap();
        let ensembles: EnsembleMap = [(0, vec![node("a"), node("b")])].into_iter().collect();
        cluster.create_ledger(7, 2, 2, ensembles, Some(3));
        cluster
    }

    #[tokio::test]
    async fn test_children_listing() {
        let cluster = cluster();
        cluster.add_bookie(&node("f"));
        cluster.add_ledger_node("L0000000009");

        let ledgers = cluster.get_children("/ledgers").await.unwrap();
        assert_eq!(ledgers, vec!["L0000000007", "available", "L0000000009"]);

        let bookies = cluster.get_children("/ledgers/available").await.unwrap();
        assert_eq!(bookies, vec!["f:3181"]);

        assert!(matches!(
            cluster.get_children("/elsewhere").await,
            Err(MetadataError::NoNode { .. })
        ));
    }

    #[tokio::test]
    async fn test_conditional_write() {
        let cluster = cluster();
        let record = cluster.metadata(7).unwrap();
        let updated = record.with_replacement(0, 1, &node("b"), &node("c")).unwrap();

        assert_eq!(cluster.write_ledger_metadata(&updated).await.unwrap(), Version(1));

        // Same base version again is stale.
        let err = cluster.write_ledger_metadata(&updated).await.unwrap_err();
        let MetadataError::BadVersion { current } = err else {
            panic!("expected BadVersion, got {err:?}");
        };
        assert_eq!(current.version, Version(1));
        assert_eq!(current.ensembles.get(0).unwrap()[1], node("c"));
        assert_eq!(cluster.metadata_write_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_version_conflict() {
        let cluster = cluster();
        cluster.inject_version_conflicts(1);
        let record = cluster.metadata(7).unwrap();

        let err = cluster.write_ledger_metadata(&record).await.unwrap_err();
        assert!(matches!(err, MetadataError::BadVersion { ref current } if current.version == Version(1)));

        let record = cluster.metadata(7).unwrap();
        assert_eq!(cluster.write_ledger_metadata(&record).await.unwrap(), Version(2));
    }

    #[tokio::test]
    async fn test_add_entry_verifies_digest() {
        let cluster = cluster();
        let digest = DigestManager::new(7, Default::default(), b"");
        let packaged = digest.package(2, Some(3), 4, b"data");

        cluster
            .add_entry(&node("f"), 7, 2, packaged.clone(), WriteFlag::Recovery)
            .await
            .unwrap();
        assert_eq!(cluster.written_entries(&node("f")), vec![(7, 2)]);
        assert_eq!(cluster.written_entry(&node("f"), 7, 2).unwrap().flag, WriteFlag::Recovery);

        let mut corrupt = packaged.to_vec();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        let err = cluster
            .add_entry(&node("g"), 7, 2, Bytes::from(corrupt), WriteFlag::Recovery)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DigestMismatch(_)));

        let err = cluster.add_entry(&node("g"), 7, 1, packaged, WriteFlag::Recovery).await;
        assert!(matches!(err, Err(ClientError::WriteFailed { .. })));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let cluster = cluster();

        cluster.fail_sync(true);
        assert!(cluster.sync("/ledgers").await.is_err());

        cluster.fail_open(7);
        assert!(cluster.open_ledger_no_recovery(7).await.is_err());

        cluster.fail_read(7, 1);
        assert!(cluster.read_entry(7, 0).await.is_ok());
        assert!(cluster.read_entry(7, 1).await.is_err());
        assert!(matches!(
            cluster.read_entry(7, 9).await,
            Err(ClientError::NoSuchEntry { ledger_id: 7, entry_id: 9 })
        ));

        cluster.fail_writes_to(&node("f"));
        let result =
            cluster.add_entry(&node("f"), 7, 0, Bytes::new(), WriteFlag::Recovery).await;
        assert!(matches!(result, Err(ClientError::BookieUnavailable(_))));
    }
}
