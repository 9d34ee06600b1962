//! Arena storage of the accumulated posterior.
//!
//! Conditionals live in one map keyed by [`ConditionalId`]; the sequence order is a
//! separate list of ids. Views such as the carry-forward split hold ids only, and
//! every mutation goes through [`Posterior::commit`], which checks all ids before
//! touching anything.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::conditional::{Conditional, HybridBayesNet};
use crate::error::{ConsistencyError, HybridResult};
use crate::key::Key;

/// Opaque handle of a conditional stored in a [`Posterior`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConditionalId(u64);

impl ConditionalId {
    /// The raw id.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConditionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The ordered set of conditionals accumulated by a smoother.
#[derive(Debug, Clone, Default)]
pub struct Posterior {
    arena: HashMap<ConditionalId, Conditional>,
    order: Vec<ConditionalId>,
    next_id: u64,
}

impl Posterior {
    /// Create an empty posterior.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conditionals.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the posterior is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The ids in sequence order.
    pub fn ids(&self) -> &[ConditionalId] {
        &self.order
    }

    /// The conditional of an id.
    pub fn get(&self, id: ConditionalId) -> Option<&Conditional> {
        self.arena.get(&id)
    }

    /// The conditional at a position of the sequence.
    pub fn at(&self, index: usize) -> Option<&Conditional> {
        self.order.get(index).and_then(|id| self.arena.get(id))
    }

    /// Iterate over `(id, conditional)` pairs in sequence order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (ConditionalId, &Conditional)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.arena.get(id).map(|c| (*id, c)))
    }

    /// The conditional whose frontals contain `key`.
    pub fn owner_of(&self, key: Key) -> Option<ConditionalId> {
        self.iter()
            .find(|(_, c)| c.frontals().contains(&key))
            .map(|(id, _)| id)
    }

    /// Every frontal key of the posterior.
    pub fn frontal_keys(&self) -> BTreeSet<Key> {
        self.iter().flat_map(|(_, c)| c.frontals()).collect()
    }

    /// Owned snapshot of the posterior as a Bayes net.
    pub fn to_bayes_net(&self) -> HybridBayesNet {
        self.iter().map(|(_, c)| c.clone()).collect()
    }

    /// Apply one update atomically.
    ///
    /// Removes the `removed` ids, replaces the conditionals of `replaced` in place
    /// (dropping those replaced by `None`) and appends `fragment` with fresh ids.
    /// Every id is checked before anything changes. Returns the ids of the
    /// appended conditionals.
    pub fn commit(
        &mut self,
        removed: &[ConditionalId],
        replaced: Vec<(ConditionalId, Option<Conditional>)>,
        fragment: HybridBayesNet,
    ) -> HybridResult<Vec<ConditionalId>> {
        let mut touched = BTreeSet::new();
        for id in removed.iter().chain(replaced.iter().map(|(id, _)| id)) {
            if !self.arena.contains_key(id) || !touched.insert(*id) {
                return Err(ConsistencyError::MissingConditional(id.raw()).into());
            }
        }

        let removed: BTreeSet<ConditionalId> = removed.iter().copied().collect();
        let mut dropped = BTreeSet::new();
        for (id, conditional) in replaced {
            match conditional {
                Some(c) => {
                    self.arena.insert(id, c);
                }
                None => {
                    dropped.insert(id);
                }
            }
        }
        self.order
            .retain(|id| !removed.contains(id) && !dropped.contains(id));
        for id in removed.iter().chain(dropped.iter()) {
            self.arena.remove(id);
        }

        let mut appended = Vec::with_capacity(fragment.len());
        for conditional in fragment {
            let id = ConditionalId(self.next_id);
            self.next_id += 1;
            self.arena.insert(id, conditional);
            self.order.push(id);
            appended.push(id);
        }
        Ok(appended)
    }
}
