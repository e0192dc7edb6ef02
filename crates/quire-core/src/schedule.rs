// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Entry-to-bookie placement within an ensemble.

use crate::error::ScheduleError;
use crate::types::{EntryId, LedgerMetadataRecord};

/// Decides which ensemble positions store a given entry.
///
/// Must be deterministic: recovery relies on recomputing the same placement
/// the writer used.
pub trait DistributionSchedule: Send + Sync {
    /// Returns the ensemble positions that store `entry_id`.
    fn write_set(&self, entry_id: EntryId) -> Vec<usize>;

    /// Returns true if position `index` stores a replica of `entry_id`.
    fn has_entry(&self, entry_id: EntryId, index: usize) -> bool {
        self.write_set(entry_id).contains(&index)
    }
}

/// Round-robin striping: entry `e` lands on positions
/// `e mod E, (e + 1) mod E, ..., (e + Q - 1) mod E`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobinSchedule {
    ensemble_size: usize,
    write_quorum: usize,
}

impl RoundRobinSchedule {
    /// Creates a schedule for the given ensemble size and write quorum.
    pub fn new(ensemble_size: usize, write_quorum: usize) -> Result<Self, ScheduleError> {
        if ensemble_size == 0 {
            return Err(ScheduleError::EmptyEnsemble);
        }
        if write_quorum == 0 {
            return Err(ScheduleError::EmptyWriteQuorum);
        }
        if write_quorum > ensemble_size {
            return Err(ScheduleError::QuorumExceedsEnsemble { write_quorum, ensemble_size });
        }
        Ok(Self { ensemble_size, write_quorum })
    }

    /// Creates the schedule a ledger was written with.
    pub fn for_ledger(metadata: &LedgerMetadataRecord) -> Result<Self, ScheduleError> {
        Self::new(metadata.ensemble_size, metadata.write_quorum_size)
    }

    fn first_position(&self, entry_id: EntryId) -> usize {
        (entry_id % self.ensemble_size as u64) as usize
    }
}

impl DistributionSchedule for RoundRobinSchedule {
    fn write_set(&self, entry_id: EntryId) -> Vec<usize> {
        let first = self.first_position(entry_id);
        (0..self.write_quorum).map(|i| (first + i) % self.ensemble_size).collect()
    }

    fn has_entry(&self, entry_id: EntryId, index: usize) -> bool {
        if index >= self.ensemble_size {
            return false;
        }
        // Distance from the entry's first position, walking forward around the ring.
        let first = self.first_position(entry_id);
        let distance = (index + self.ensemble_size - first) % self.ensemble_size;
        distance < self.write_quorum
    }
}
