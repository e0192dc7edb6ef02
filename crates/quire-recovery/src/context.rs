// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Shared state of one recovery pipeline.

use std::sync::Arc;

use quire_core::{ConfigValidationError, DigestManager, LedgerId, RecoveryConfig};

use crate::selector::{BookieSelector, RandomBookieSelector};
use crate::traits::{BookieClient, LedgerClient, MetadataStore};

/// Configuration and collaborators shared by every recovery task.
pub struct RecoveryContext {
    pub(crate) config: RecoveryConfig,
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) ledgers: Arc<dyn LedgerClient>,
    pub(crate) bookies: Arc<dyn BookieClient>,
    pub(crate) selector: Arc<dyn BookieSelector>,
}

impl RecoveryContext {
    /// Creates a context with a random selector seeded from the configuration.
    ///
    /// Rejects configurations that fail [`RecoveryConfig::validate`].
    pub fn new(
        config: RecoveryConfig,
        metadata: Arc<dyn MetadataStore>,
        ledgers: Arc<dyn LedgerClient>,
        bookies: Arc<dyn BookieClient>,
    ) -> Result<Self, ConfigValidationError> {
        config.validate()?;
        Ok(Self::from_validated(config, metadata, ledgers, bookies))
    }

    /// Creates a context from a configuration that already passed validation.
    pub(crate) fn from_validated(
        config: RecoveryConfig,
        metadata: Arc<dyn MetadataStore>,
        ledgers: Arc<dyn LedgerClient>,
        bookies: Arc<dyn BookieClient>,
    ) -> Self {
        let selector = Arc::new(RandomBookieSelector::from_seed(config.selection_seed));
        Self { config, metadata, ledgers, bookies, selector }
    }

    /// Replaces the bookie selector.
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn BookieSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Returns the recovery configuration.
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub(crate) fn digest_manager(&self, ledger_id: LedgerId) -> DigestManager {
        DigestManager::new(ledger_id, self.config.digest_type, self.config.password.as_bytes())
    }
}
