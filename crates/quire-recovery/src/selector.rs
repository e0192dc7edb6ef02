// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Replacement bookie selection.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use quire_core::{MetadataError, NodeAddress};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use thiserror::Error;

/// Bookies eligible to host recovered fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet(BTreeSet<NodeAddress>);

impl CandidateSet {
    /// Creates a set holding exactly one bookie.
    pub fn single(node: NodeAddress) -> Self {
        Self(BTreeSet::from([node]))
    }

    /// Parses registry child names of the form `host:port`.
    ///
    /// A single malformed name rejects the whole registry.
    pub fn from_registry<I, S>(names: I) -> Result<Self, MetadataError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| name.as_ref().parse::<NodeAddress>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// Returns the number of candidates.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates candidates in address order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeAddress> {
        self.0.iter()
    }

}

impl FromIterator<NodeAddress> for CandidateSet {
    fn from_iter<T: IntoIterator<Item = NodeAddress>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Every candidate already belongs to the ensemble.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no replacement outside the ensemble among {candidates} candidate bookies")]
pub struct NoEligibleBookie {
    /// Number of candidates considered.
    pub candidates: usize,
}

/// Picks the bookie that takes over a dead bookie's position.
pub trait BookieSelector: Send + Sync {
    /// Chooses a replacement from `candidates` that is not in `ensemble`.
    fn select(
        &self,
        ensemble: &[NodeAddress],
        candidates: &CandidateSet,
    ) -> Result<NodeAddress, NoEligibleBookie>;
}

/// Uniformly random choice among eligible candidates.
pub struct RandomBookieSelector {
    rng: Mutex<StdRng>,
}

impl RandomBookieSelector {
    /// Creates a selector seeded from system entropy.
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }

    /// Creates a deterministic selector.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    /// Creates a selector from an optional configured seed.
    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::new, Self::with_seed)
    }
}

impl Default for RandomBookieSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl BookieSelector for RandomBookieSelector {
    fn select(
        &self,
        ensemble: &[NodeAddress],
        candidates: &CandidateSet,
    ) -> Result<NodeAddress, NoEligibleBookie> {
        let mut rng = self.rng.lock();
        candidates
            .iter()
            .filter(|node| !ensemble.contains(*node))
            .choose(&mut *rng)
            .cloned()
            .ok_or(NoEligibleBookie { candidates: candidates.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeAddress {
        NodeAddress::new(name, 3181)
    }

    #[test]
    fn test_from_registry() {
        let set = CandidateSet::from_registry(["b:3181", "a:3181", "b:3181"]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next(), Some(&node("a")));

        let err = CandidateSet::from_registry(["a:3181", "badname"]).unwrap_err();
        assert!(matches!(err, MetadataError::MalformedBookie { name } if name == "badname"));

        assert!(CandidateSet::from_registry(Vec::<String>::new()).unwrap().is_empty());
    }

    #[test]
    fn test_never_selects_ensemble_member() {
        let selector = RandomBookieSelector::with_seed(7);
        let ensemble = vec![node("a"), node("b"), node("c")];
        let candidates: CandidateSet =
            ["a", "b", "c", "f", "g"].into_iter().map(node).collect();

        for _ in 0..200 {
            let pick = selector.select(&ensemble, &candidates).unwrap();
            assert!(pick == node("f") || pick == node("g"));
        }
    }

    #[test]
    fn test_no_eligible_candidates() {
        let selector = RandomBookieSelector::new();
        let ensemble = vec![node("a"), node("b"), node("c")];

        let err = selector.select(&ensemble, &CandidateSet::single(node("b"))).unwrap_err();
        assert_eq!(err, NoEligibleBookie { candidates: 1 });

        assert!(selector.select(&ensemble, &CandidateSet::default()).is_err());
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let ensemble = vec![node("a")];
        let candidates: CandidateSet = (0..20).map(|i| node(&format!("n{i}"))).collect();

        let first = RandomBookieSelector::with_seed(42);
        let second = RandomBookieSelector::from_seed(Some(42));
        for _ in 0..50 {
            assert_eq!(
                first.select(&ensemble, &candidates).unwrap(),
                second.select(&ensemble, &candidates).unwrap()
            );
        }
    }

    #[test]
    fn test_selection_covers_all_eligible() {
        let selector = RandomBookieSelector::with_seed(1);
        let ensemble = vec![node("a")];
        let candidates: CandidateSet = ["a", "x", "y", "z"].into_iter().map(node).collect();

        let picked: BTreeSet<_> =
            (0..300).map(|_| selector.select(&ensemble, &candidates).unwrap()).collect();
        assert_eq!(picked.len(), 3);
    }
}
