// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Configuration for bookie recovery.

use serde::{Deserialize, Serialize};

use crate::digest::DigestType;

/// Default root of the ledger namespace in the metadata store.
pub const DEFAULT_LEDGERS_PATH: &str = "/ledgers";

/// Default prefix of ledger node names (`L0000000042`).
pub const DEFAULT_LEDGER_NODE_PREFIX: &str = "L";

/// Default name of the available-bookies registry under the ledger root.
pub const DEFAULT_AVAILABLE_NODE: &str = "available";

/// Configuration for bookie recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Root of the ledger namespace. Recovery syncs and lists this path.
    pub ledgers_path: String,

    /// Prefix preceding the decimal ledger id in ledger node names.
    pub ledger_node_prefix: String,

    /// Name of the bookie registry node, a sibling of the ledger nodes.
    pub available_node: String,

    /// Digest used when packaging recovered entries.
    pub digest_type: DigestType,

    /// Ledger password keying the MAC digest.
    pub password: String,

    /// Seed for replacement bookie selection.
    ///
    /// When unset, selection draws from an entropy-seeded generator.
    pub selection_seed: Option<u64>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            ledgers_path: DEFAULT_LEDGERS_PATH.to_string(),
            ledger_node_prefix: DEFAULT_LEDGER_NODE_PREFIX.to_string(),
            available_node: DEFAULT_AVAILABLE_NODE.to_string(),
            digest_type: DigestType::default(),
            password: String::new(),
            selection_seed: None,
        }
    }
}

impl RecoveryConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ledger namespace root.
    pub fn ledgers_path(mut self, path: impl Into<String>) -> Self {
        self.ledgers_path = path.into();
        self
    }

    /// Sets the ledger node name prefix.
    pub fn ledger_node_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ledger_node_prefix = prefix.into();
        self
    }

    /// Sets the bookie registry node name.
    pub fn available_node(mut self, name: impl Into<String>) -> Self {
        self.available_node = name.into();
        self
    }

    /// Sets the digest type.
    pub fn digest_type(mut self, digest_type: DigestType) -> Self {
        self.digest_type = digest_type;
        self
    }

    /// Sets the ledger password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Seeds replacement bookie selection.
    pub fn selection_seed(mut self, seed: u64) -> Self {
        self.selection_seed = Some(seed);
        self
    }

    /// Returns the path of the available-bookies registry.
    pub fn bookies_path(&self) -> String {
        format!("{}/{}", self.ledgers_path.trim_end_matches('/'), self.available_node)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.ledgers_path.starts_with('/') || self.ledgers_path.trim_end_matches('/').is_empty()
        {
            return Err(ConfigValidationError::InvalidLedgersPath(self.ledgers_path.clone()));
        }
        if self.ledger_node_prefix.is_empty() {
            return Err(ConfigValidationError::EmptyLedgerNodePrefix);
        }
        if self.available_node.is_empty() || self.available_node.contains('/') {
            return Err(ConfigValidationError::InvalidAvailableNode(self.available_node.clone()));
        }
        if self.available_node == self.ledger_node_prefix {
            return Err(ConfigValidationError::AmbiguousNodeNames);
        }
        Ok(())
    }
}

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    /// The ledger root must be a non-root absolute path.
    #[error("ledgers path must be an absolute, non-root path: {0:?}")]
    InvalidLedgersPath(String),

    /// The ledger node prefix must not be empty.
    #[error("ledger node prefix must not be empty")]
    EmptyLedgerNodePrefix,

    /// The registry node must be a single non-empty path segment.
    #[error("available node must be a single path segment: {0:?}")]
    InvalidAvailableNode(String),

    /// The registry node name must differ from the ledger node prefix.
    #[error("available node name must differ from the ledger node prefix")]
    AmbiguousNodeNames,
}
