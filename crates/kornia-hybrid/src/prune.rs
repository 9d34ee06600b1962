//! Bounding the number of live discrete hypotheses.
//!
//! The discrete conditionals of a fragment are multiplied into one joint table,
//! of which only the largest entries survive. Every mixture branch with no
//! surviving assignment is marked [`Leaf::Pruned`](crate::table::Leaf::Pruned),
//! and keys left with a dominant value are fixed and sliced out of every
//! conditional.

use crate::conditional::{Conditional, HybridBayesNet};
use crate::discrete::{DiscreteConditional, DiscreteFactor};
use crate::error::{ConsistencyError, HybridError, HybridResult};
use crate::key::Key;
use crate::table::DiscreteValues;

/// Result of pruning a fragment.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    /// The pruned fragment.
    pub fragment: HybridBayesNet,
    /// Discrete keys collapsed to a single value.
    pub newly_fixed: DiscreteValues,
    /// The pruned and normalized joint, `None` when the fragment had no discrete part.
    pub surviving: Option<DiscreteFactor>,
}

/// Check the pruning parameters.
pub fn validate_prune_params(max_leaves: usize, threshold: f64) -> HybridResult<()> {
    if max_leaves == 0 {
        return Err(HybridError::InvalidMaxLeaves(max_leaves));
    }
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(HybridError::InvalidThreshold(threshold));
    }
    Ok(())
}

/// Keep the `max_leaves` most probable assignments of the fragment's discrete joint
/// and fix the keys whose best marginal reaches `threshold`.
pub fn prune(
    fragment: &HybridBayesNet,
    max_leaves: usize,
    threshold: f64,
) -> HybridResult<PruneOutcome> {
    validate_prune_params(max_leaves, threshold)?;

    let discrete = fragment.discrete_factors();
    if discrete.is_empty() {
        return Ok(PruneOutcome {
            fragment: fragment.clone(),
            newly_fixed: DiscreteValues::new(),
            surviving: None,
        });
    }

    let joint = DiscreteFactor::product(&discrete);
    let before = joint.table().leaves().iter().filter(|p| **p > 0.0).count();
    let mut joint = joint.keep_largest(max_leaves).normalize();
    if joint.sum() <= 0.0 {
        let key = joint.keys().first().map_or(Key::new(0), |k| k.key);
        return Err(ConsistencyError::AllBranchesPruned(key).into());
    }

    let mut newly_fixed = DiscreteValues::new();
    let keys: Vec<Key> = joint.keys().iter().map(|k| k.key).collect();
    for key in keys {
        let marginal = joint.marginal(key);
        let leaves = marginal.table().leaves();
        let alive = leaves.iter().filter(|p| **p > 0.0).count();
        let mut best = (0, f64::NEG_INFINITY);
        for (i, p) in leaves.iter().copied().enumerate() {
            if p > best.1 {
                best = (i, p);
            }
        }
        let (best, mass) = best;
        if alive == 1 || mass >= threshold {
            newly_fixed.insert(key, best);
            joint = joint
                .condition_on(&DiscreteValues::from([(key, best)]))
                .normalize();
        }
    }

    let mut pruned = HybridBayesNet::new();
    for conditional in fragment.iter() {
        if let Conditional::Discrete(_) = conditional {
            continue;
        }
        if let Some(c) = prune_conditional(conditional, Some(&joint), &newly_fixed)? {
            pruned.push(c);
        }
    }
    let remaining = joint.restrict(&newly_fixed);
    if !remaining.keys().is_empty() {
        let frontals: Vec<Key> = remaining.keys().iter().map(|k| k.key).collect();
        let (conditional, _) = DiscreteConditional::from_factor(&remaining, &frontals);
        pruned.push(conditional);
    }

    log::debug!(
        "pruned {} discrete keys from {} to {} assignments, fixed {:?}",
        joint.keys().len(),
        before,
        joint.table().leaves().iter().filter(|p| **p > 0.0).count(),
        newly_fixed
    );

    Ok(PruneOutcome {
        fragment: pruned,
        newly_fixed,
        surviving: Some(joint),
    })
}

/// Make one conditional agree with a pruning result.
///
/// Mixture branches without mass in `surviving` are marked pruned, then every key
/// of `fixed` is sliced out. Returns `None` for a discrete conditional whose
/// frontals are all fixed.
pub fn prune_conditional(
    conditional: &Conditional,
    surviving: Option<&DiscreteFactor>,
    fixed: &DiscreteValues,
) -> HybridResult<Option<Conditional>> {
    match (conditional, surviving) {
        (Conditional::Hybrid(h), Some(joint)) => h.prune(joint)?.restrict(fixed).map(Some),
        _ => conditional.restrict(fixed),
    }
}

/// Whether a conditional shares discrete keys with a pruning result.
pub fn overlaps(
    conditional: &Conditional,
    surviving: Option<&DiscreteFactor>,
    fixed: &DiscreteValues,
) -> bool {
    conditional.discrete_keys().iter().any(|k| {
        fixed.contains_key(&k.key) || surviving.is_some_and(|j| j.table().contains_key(k.key))
    })
}
