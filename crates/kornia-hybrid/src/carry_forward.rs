//! Selection of the posterior conditionals that must be re-eliminated.
//!
//! New factors touch some keys; the conditionals owning those keys are pulled back
//! into the graph, their parents become involved too, and so on until nothing
//! changes. The posterior itself is never modified here: the split is expressed as
//! two lists of ids that [`Posterior::commit`](crate::posterior::Posterior::commit)
//! applies once elimination succeeded.

use std::collections::BTreeSet;

use crate::factor::HybridFactorGraph;
use crate::key::Key;
use crate::posterior::{ConditionalId, Posterior};

/// Result of splitting the posterior against a batch of new factors.
#[derive(Debug, Clone)]
pub struct CarryForward {
    /// New factors followed by the pulled conditionals seen as factors.
    pub graph: HybridFactorGraph,
    /// Ids of the pulled conditionals, in posterior order.
    pub pulled: Vec<ConditionalId>,
    /// Ids of the conditionals left untouched, in posterior order.
    pub remainder: Vec<ConditionalId>,
    /// Every key of the augmented graph.
    pub involved: BTreeSet<Key>,
}

/// Split `posterior` into the conditionals to re-eliminate with `new_factors` and
/// the ones to keep.
///
/// A conditional is pulled when one of its frontals is involved; all of its keys
/// then become involved. The scan repeats over the same snapshot of ids until no
/// new conditional is pulled, so each conditional is pulled at most once.
pub fn split_posterior(new_factors: &HybridFactorGraph, posterior: &Posterior) -> CarryForward {
    let mut involved = new_factors.keys();
    let snapshot: Vec<ConditionalId> = posterior.ids().to_vec();
    let mut pulled: BTreeSet<ConditionalId> = BTreeSet::new();

    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;
        for id in &snapshot {
            if pulled.contains(id) {
                continue;
            }
            let Some(conditional) = posterior.get(*id) else {
                continue;
            };
            if conditional.frontals().iter().any(|k| involved.contains(k)) {
                pulled.insert(*id);
                involved.extend(conditional.frontals());
                involved.extend(conditional.parents());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let (pulled, remainder): (Vec<ConditionalId>, Vec<ConditionalId>) =
        snapshot.into_iter().partition(|id| pulled.contains(id));

    let mut graph = new_factors.clone();
    graph.extend(
        pulled
            .iter()
            .filter_map(|id| posterior.get(*id))
            .map(|c| c.to_factor()),
    );

    log::debug!(
        "carry forward: {} of {} conditionals pulled in {} passes, {} keys involved",
        pulled.len(),
        posterior.len(),
        passes,
        involved.len()
    );

    CarryForward {
        graph,
        pulled,
        remainder,
        involved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::HybridBayesNet;
    use crate::elimination::eliminate_sequential;
    use crate::factor::HybridFactor;
    use crate::gaussian::JacobianFactor;
    use crate::noise::NoiseModel;
    use crate::ordering::Ordering;
    use nalgebra::DVector;

    fn x(i: u64) -> Key {
        Key::symbol('x', i)
    }

    fn between(i: u64, j: u64) -> HybridFactor {
        let noise = NoiseModel::isotropic(1, 1.0).unwrap();
        HybridFactor::Gaussian(
            JacobianFactor::between(x(i), x(j), DVector::from_vec(vec![1.0]), &noise).unwrap(),
        )
    }

    fn chain_posterior() -> Posterior {
        // x0 -> x1 -> x2 -> x3 eliminated in order: x0|x1, x1|x2, x2|x3, x3
        let noise = NoiseModel::isotropic(1, 1.0).unwrap();
        let mut graph: HybridFactorGraph = (0..3).map(|i| between(i, i + 1)).collect();
        graph.push(JacobianFactor::prior(x(0), DVector::zeros(1), &noise).unwrap());
        let net: HybridBayesNet =
            eliminate_sequential(&graph, &Ordering::new((0..4).map(x).collect())).unwrap();
        let mut posterior = Posterior::new();
        posterior.commit(&[], vec![], net).unwrap();
        posterior
    }

    #[test]
    fn test_pulls_transitive_parents() {
        let posterior = chain_posterior();
        let new_factors: HybridFactorGraph = vec![between(1, 4)].into_iter().collect();
        let split = split_posterior(&new_factors, &posterior);

        // x1|x2 is pulled, so x2|x3 and x3 follow through their parents
        let ids = posterior.ids();
        assert_eq!(split.pulled, vec![ids[1], ids[2], ids[3]]);
        assert_eq!(split.remainder, vec![ids[0]]);
        assert_eq!(split.graph.len(), 4);
        assert!(split.involved.contains(&x(3)));
    }

    #[test]
    fn test_unrelated_factors_pull_nothing() {
        let posterior = chain_posterior();
        let new_factors: HybridFactorGraph = vec![between(7, 8)].into_iter().collect();
        let split = split_posterior(&new_factors, &posterior);
        assert!(split.pulled.is_empty());
        assert_eq!(split.remainder, posterior.ids().to_vec());
        assert_eq!(split.graph.len(), 1);
    }

    #[test]
    fn test_pulled_and_remainder_partition_the_posterior() {
        let posterior = chain_posterior();
        for i in 0..4 {
            let new_factors: HybridFactorGraph = vec![between(i, 9)].into_iter().collect();
            let split = split_posterior(&new_factors, &posterior);
            let mut all: Vec<ConditionalId> =
                split.pulled.iter().chain(&split.remainder).copied().collect();
            all.sort();
            assert_eq!(all, posterior.ids().to_vec());
            // the owner of a touched key is always pulled
            let owner = posterior.owner_of(x(i)).unwrap();
            assert!(split.pulled.contains(&owner));
            assert!(!split.remainder.contains(&owner));
        }
    }
}
