//! Elimination orderings with continuous keys first and discrete keys last.
//!
//! Eliminating every continuous key before any discrete key turns the hybrid
//! factors into Gaussian mixtures whose continuous part is marginalized
//! analytically. Pinning the continuous keys touched by the latest factors right
//! before the discrete block keeps fill-in bounded across incremental updates.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{HybridError, HybridResult};
use crate::factor::HybridFactorGraph;
use crate::key::Key;

/// Total order in which keys are eliminated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering(Vec<Key>);

impl Ordering {
    /// Create an ordering from keys.
    pub fn new(keys: Vec<Key>) -> Self {
        Self(keys)
    }

    /// The keys in elimination order.
    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// Iterate over the keys in elimination order.
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.0.iter()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the ordering is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of a key.
    pub fn position(&self, key: Key) -> Option<usize> {
        self.0.iter().position(|k| *k == key)
    }
}

impl FromIterator<Key> for Ordering {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Undirected variable adjacency used by the minimum-degree heuristic.
#[derive(Debug, Clone, Default)]
pub struct VariableAdjacency {
    neighbors: BTreeMap<Key, BTreeSet<Key>>,
}

impl VariableAdjacency {
    /// Build the adjacency of a factor graph; each factor is a clique over all its keys.
    pub fn from_graph(graph: &HybridFactorGraph) -> Self {
        let mut adjacency = Self::default();
        for factor in graph.iter() {
            adjacency.add_clique(factor.keys());
        }
        adjacency
    }

    /// Connect every pair of keys in `keys`.
    pub fn add_clique(&mut self, keys: impl IntoIterator<Item = Key>) {
        let keys: Vec<Key> = keys.into_iter().collect();
        for a in &keys {
            let entry = self.neighbors.entry(*a).or_default();
            for b in &keys {
                if a != b {
                    entry.insert(*b);
                }
            }
        }
    }

    /// Current number of neighbours of a key.
    pub fn degree(&self, key: Key) -> usize {
        self.neighbors.get(&key).map_or(0, |n| n.len())
    }

    fn eliminate(&mut self, key: Key) {
        let neighbors = self.neighbors.remove(&key).unwrap_or_default();
        for n in &neighbors {
            if let Some(set) = self.neighbors.get_mut(n) {
                set.remove(&key);
            }
        }
        self.add_clique(neighbors);
    }

    /// Greedily eliminate every key of `block`, lowest degree first.
    ///
    /// Ties go to the smallest key so the result is deterministic.
    pub fn min_degree(&mut self, block: &BTreeSet<Key>) -> Vec<Key> {
        let mut remaining = block.clone();
        let mut order = Vec::with_capacity(block.len());
        loop {
            let Some(next) = remaining
                .iter()
                .copied()
                .min_by_key(|k| (self.degree(*k), *k))
            else {
                break;
            };
            self.eliminate(next);
            remaining.remove(&next);
            order.push(next);
        }
        order
    }
}

/// Build an elimination ordering for `graph`.
///
/// Continuous keys outside `keep_last` come first, then the continuous keys of
/// `keep_last`, then every discrete key. Each block is ordered by a constrained
/// minimum-degree heuristic. Keys of `keep_last` absent from the graph are ignored.
pub fn build_ordering(graph: &HybridFactorGraph, keep_last: &BTreeSet<Key>) -> Ordering {
    let discrete: BTreeSet<Key> = graph.discrete_keys().into_keys().collect();
    let continuous: BTreeSet<Key> = graph.continuous_keys();

    let pinned: BTreeSet<Key> = keep_last.intersection(&continuous).copied().collect();
    if pinned.len() < keep_last.len() {
        log::warn!(
            "ignoring {} keep-last keys not in the graph",
            keep_last.len() - pinned.len()
        );
    }
    let free: BTreeSet<Key> = continuous.difference(&pinned).copied().collect();

    let mut adjacency = VariableAdjacency::from_graph(graph);
    let mut order = adjacency.min_degree(&free);
    order.extend(adjacency.min_degree(&pinned));
    order.extend(adjacency.min_degree(&discrete));
    Ordering(order)
}

/// Check that a caller supplied ordering can eliminate `graph`.
///
/// Every graph key must appear exactly once, no other key may appear and no
/// discrete key may precede a continuous one.
pub fn validate_ordering(ordering: &Ordering, graph: &HybridFactorGraph) -> HybridResult<()> {
    let discrete: BTreeSet<Key> = graph.discrete_keys().into_keys().collect();
    let all = graph.keys();

    let mut seen = BTreeSet::new();
    let mut in_discrete_block = false;
    for key in ordering.iter() {
        if !all.contains(key) {
            return Err(HybridError::InvalidOrdering(format!(
                "{key} does not appear in the graph"
            )));
        }
        if !seen.insert(*key) {
            return Err(HybridError::InvalidOrdering(format!("{key} appears twice")));
        }
        if discrete.contains(key) {
            in_discrete_block = true;
        } else if in_discrete_block {
            return Err(HybridError::InvalidOrdering(format!(
                "continuous key {key} after a discrete key"
            )));
        }
    }
    if let Some(missing) = all.difference(&seen).next() {
        return Err(HybridError::InvalidOrdering(format!("{missing} is missing")));
    }
    Ok(())
}
