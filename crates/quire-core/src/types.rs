// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Ledger, ensemble and fragment types shared by the recovery pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, MetadataError};

/// Identifier of a ledger (an append-only log).
pub type LedgerId = u64;

/// Identifier of an entry within a ledger.
pub type EntryId = u64;

/// Network address of a storage node ("bookie").
///
/// Rendered and parsed as `host:port`, which is also the child name a bookie
/// registers under in the available-bookies namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or IP address.
    pub host: String,
    /// Service port.
    pub port: u16,
}

impl NodeAddress {
    /// Creates a new node address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || MetadataError::MalformedBookie { name: s.to_string() };

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts[0].is_empty() {
            return Err(malformed());
        }
        let port = parts[1].parse::<u16>().map_err(|_| malformed())?;

        Ok(Self::new(parts[0], port))
    }
}

/// Version stamp of a metadata record, issued by the metadata store.
///
/// Every conditional write must carry the version the writer last observed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Version(pub u64);

impl Version {
    /// Returns the version that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Ordered mapping from the first entry id of each fragment to the bookies
/// holding replicas for that fragment.
///
/// The last key is the active fragment: its range is open-ended because the
/// ledger is still being appended to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnsembleMap(BTreeMap<EntryId, Vec<NodeAddress>>);

impl EnsembleMap {
    /// Creates an empty ensemble map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the ensemble starting at `start_entry_id`.
    pub fn insert(&mut self, start_entry_id: EntryId, ensemble: Vec<NodeAddress>) {
        self.0.insert(start_entry_id, ensemble);
    }

    /// Returns the ensemble starting at `start_entry_id`.
    pub fn get(&self, start_entry_id: EntryId) -> Option<&[NodeAddress]> {
        self.0.get(&start_entry_id).map(Vec::as_slice)
    }

    /// Returns the number of ensembles (fragments).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the map holds no ensembles.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(start_entry_id, ensemble)` in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &[NodeAddress])> {
        self.0.iter().map(|(start, ensemble)| (*start, ensemble.as_slice()))
    }

    /// Derives the fragment list of a ledger.
    ///
    /// Each key is paired with the next key minus one as its last entry; the
    /// final key stays open (`end_entry_id = None`).
    pub fn fragments(&self, ledger_id: LedgerId) -> Vec<Fragment> {
        let mut fragments = Vec::with_capacity(self.0.len());
        let mut iter = self.0.iter().peekable();

        while let Some((start, ensemble)) = iter.next() {
            let end = iter.peek().map(|(next, _)| next.saturating_sub(1));
            fragments.push(Fragment {
                ledger_id,
                start_entry_id: *start,
                end_entry_id: end,
                ensemble: ensemble.clone(),
            });
        }

        fragments
    }

    /// Returns a copy of this map with `old` replaced by `new` at position
    /// `index` of the ensemble starting at `start_entry_id`.
    pub fn with_replacement(
        &self,
        start_entry_id: EntryId,
        index: usize,
        old: &NodeAddress,
        new: &NodeAddress,
    ) -> Result<Self, EnsembleError> {
        let ensemble =
            self.0.get(&start_entry_id).ok_or(EnsembleError::NoSuchFragment { start_entry_id })?;

        match ensemble.get(index) {
            Some(current) if current == old => {}
            Some(current) => {
                return Err(EnsembleError::PositionMismatch {
                    start_entry_id,
                    index,
                    expected: old.clone(),
                    found: current.clone(),
                })
            }
            None => {
                return Err(EnsembleError::IndexOutOfRange {
                    start_entry_id,
                    index,
                    width: ensemble.len(),
                })
            }
        }

        let mut updated = self.0.clone();
        if let Some(slot) = updated.get_mut(&start_entry_id).and_then(|e| e.get_mut(index)) {
            *slot = new.clone();
        }
        Ok(Self(updated))
    }
}

impl FromIterator<(EntryId, Vec<NodeAddress>)> for EnsembleMap {
    fn from_iter<T: IntoIterator<Item = (EntryId, Vec<NodeAddress>)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A contiguous range of a ledger's entries stored on one ensemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Ledger the fragment belongs to.
    pub ledger_id: LedgerId,
    /// First entry of the fragment.
    pub start_entry_id: EntryId,
    /// Last entry of the fragment, or `None` for the active fragment.
    pub end_entry_id: Option<EntryId>,
    /// Bookies holding the fragment, in ensemble order.
    pub ensemble: Vec<NodeAddress>,
}

impl Fragment {
    /// Returns true if this is the active fragment still being written.
    pub fn is_open(&self) -> bool {
        self.end_entry_id.is_none()
    }

    /// Returns true if `node` is a member of this fragment's ensemble.
    pub fn contains(&self, node: &NodeAddress) -> bool {
        self.ensemble.contains(node)
    }

    /// Returns the ensemble position of `node`.
    pub fn position_of(&self, node: &NodeAddress) -> Option<usize> {
        self.ensemble.iter().position(|n| n == node)
    }

    /// Returns how many positions of the ensemble hold `node`.
    pub fn occurrences_of(&self, node: &NodeAddress) -> usize {
        self.ensemble.iter().filter(|n| *n == node).count()
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end_entry_id {
            Some(end) => write!(f, "ledger {} [{}, {}]", self.ledger_id, self.start_entry_id, end),
            None => write!(f, "ledger {} [{}, open)", self.ledger_id, self.start_entry_id),
        }
    }
}

/// Snapshot of a ledger's metadata record together with its store version.
///
/// Snapshots are immutable: updates produce a new snapshot carrying the
/// version they were derived from, which the store checks on write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMetadataRecord {
    /// Ledger this record describes.
    pub ledger_id: LedgerId,
    /// Number of bookies in each ensemble.
    pub ensemble_size: usize,
    /// Number of bookies each entry is written to.
    pub write_quorum_size: usize,
    /// Fragment placement.
    pub ensembles: EnsembleMap,
    /// Store version this snapshot was read at.
    pub version: Version,
}

impl LedgerMetadataRecord {
    /// Creates a record at the initial version.
    pub fn new(
        ledger_id: LedgerId,
        ensemble_size: usize,
        write_quorum_size: usize,
        ensembles: EnsembleMap,
    ) -> Self {
        Self { ledger_id, ensemble_size, write_quorum_size, ensembles, version: Version::default() }
    }

    /// Returns the ledger's fragments in ascending order.
    pub fn fragments(&self) -> Vec<Fragment> {
        self.ensembles.fragments(self.ledger_id)
    }

    /// Returns a new snapshot with one ensemble position replaced.
    ///
    /// The returned snapshot keeps this snapshot's version so that the store
    /// can reject it if another writer got there first.
    pub fn with_replacement(
        &self,
        start_entry_id: EntryId,
        index: usize,
        old: &NodeAddress,
        new: &NodeAddress,
    ) -> Result<Self, EnsembleError> {
        let ensembles = self.ensembles.with_replacement(start_entry_id, index, old, new)?;
        Ok(Self { ensembles, ..self.clone() })
    }

    /// Returns a copy of this record stamped with `version`.
    #[must_use]
    pub fn at_version(&self, version: Version) -> Self {
        Self { version, ..self.clone() }
    }
}

/// Handle returned by a read-only (non-fencing) ledger open.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    /// Metadata snapshot observed at open time.
    pub metadata: LedgerMetadataRecord,
    /// Last entry confirmed by the writer, if any.
    pub last_add_confirmed: Option<EntryId>,
}

impl LedgerHandle {
    /// Returns the ledger id.
    pub fn id(&self) -> LedgerId {
        self.metadata.ledger_id
    }
}

/// How a single-bookie write should be treated by the receiving bookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteFlag {
    /// A normal client write.
    Normal,
    /// A write issued by recovery; excluded from client latency accounting.
    Recovery,
}

/// Input of one recovery invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    /// The dead bookie whose data is being re-replicated.
    pub source: NodeAddress,
    /// Optional fixed destination; when absent every available bookie is eligible.
    pub destination: Option<NodeAddress>,
}

impl RecoveryRequest {
    /// Creates a request that replicates onto any available bookie.
    pub fn new(source: NodeAddress) -> Self {
        Self { source, destination: None }
    }

    /// Pins the destination bookie.
    #[must_use]
    pub fn with_destination(mut self, destination: NodeAddress) -> Self {
        self.destination = Some(destination);
        self
    }
}

/// Terminal result of every asynchronous recovery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The task completed successfully.
    Ok,
    /// A metadata read or write failed, or metadata was malformed.
    MetadataError,
    /// No eligible replacement bookie exists for a fragment.
    NotEnoughReplicas,
    /// One or more descendant tasks failed.
    ReplicationFailed,
}

impl Outcome {
    /// Returns true for [`Outcome::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::MetadataError => "metadata error",
            Self::NotEnoughReplicas => "not enough replicas",
            Self::ReplicationFailed => "replication failed",
        };
        f.write_str(s)
    }
}
