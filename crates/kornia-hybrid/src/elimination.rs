//! Sequential variable elimination of hybrid factor graphs.
//!
//! Continuous keys are eliminated by dense QR, branch by branch when mixtures are
//! involved. Once a mixture has no continuous key left it turns into a discrete
//! factor, so that the discrete keys are eliminated last from plain tables.

use crate::conditional::{Conditional, HybridBayesNet};
use crate::discrete::{DiscreteConditional, DiscreteFactor};
use crate::error::{HybridError, HybridResult};
use crate::factor::{HybridFactor, HybridFactorGraph};
use crate::gaussian::{eliminate_gaussian, JacobianFactor};
use crate::hybrid::{GaussianBranch, HybridGaussianConditional, HybridGaussianFactor};
use crate::key::{DiscreteKey, Key};
use crate::ordering::Ordering;
use crate::table::{assignments, merge_keys, DecisionTable, Leaf};

/// Eliminate every key of `ordering` from `graph`, in order.
///
/// Returns the conditionals in elimination order. Factors left without keys are
/// dropped, since they only scale the joint.
pub fn eliminate_sequential(
    graph: &HybridFactorGraph,
    ordering: &Ordering,
) -> HybridResult<HybridBayesNet> {
    let mut pool: Vec<HybridFactor> = Vec::with_capacity(graph.len());
    for factor in graph.iter() {
        add_to_pool(&mut pool, factor.clone());
    }

    let mut bayes_net = HybridBayesNet::new();
    for key in ordering.iter().copied() {
        let (involved, rest): (Vec<HybridFactor>, Vec<HybridFactor>) =
            pool.into_iter().partition(|f| f.involves(key));
        pool = rest;
        if involved.is_empty() {
            return Err(HybridError::MissingFactor(key));
        }

        let is_discrete = involved
            .iter()
            .any(|f| f.discrete_keys().iter().any(|k| k.key == key));
        if is_discrete {
            let (conditional, marginal) = eliminate_discrete(&involved, key)?;
            bayes_net.push(conditional);
            add_to_pool(&mut pool, HybridFactor::Discrete(marginal));
        } else if involved.iter().all(|f| matches!(f, HybridFactor::Gaussian(_))) {
            let factors: Vec<&JacobianFactor> = involved
                .iter()
                .filter_map(|f| match f {
                    HybridFactor::Gaussian(g) => Some(g),
                    _ => None,
                })
                .collect();
            let (conditional, remainder) = eliminate_gaussian(&factors, key)?;
            bayes_net.push(conditional);
            add_to_pool(&mut pool, HybridFactor::Gaussian(remainder));
        } else {
            let (conditional, remainder) = eliminate_mixture(&involved, key)?;
            bayes_net.push(conditional);
            add_to_pool(&mut pool, remainder);
        }
    }

    log::debug!(
        "eliminated {} keys into {} conditionals, {} factors left",
        ordering.len(),
        bayes_net.len(),
        pool.len()
    );
    Ok(bayes_net)
}

fn add_to_pool(pool: &mut Vec<HybridFactor>, factor: HybridFactor) {
    match factor {
        HybridFactor::Gaussian(f) if f.is_constant() => {}
        HybridFactor::Discrete(f) if f.keys().is_empty() => {}
        HybridFactor::Hybrid(f) if f.continuous_keys().is_empty() => {
            let discrete = mixture_to_discrete(&f);
            if !discrete.keys().is_empty() {
                pool.push(HybridFactor::Discrete(discrete));
            }
        }
        other => pool.push(other),
    }
}

/// Turn a mixture of constant branches into the potential `exp(-(e - e_min))`.
///
/// Pruned and absent branches get zero potential.
fn mixture_to_discrete(factor: &HybridGaussianFactor) -> DiscreteFactor {
    let errors = factor
        .branches()
        .map(|leaf| leaf.as_live().map(GaussianBranch::constant_error));
    let min = errors
        .leaves()
        .iter()
        .flatten()
        .copied()
        .fold(f64::INFINITY, f64::min);
    DiscreteFactor::from_table(errors.map(|e| match e {
        Some(e) => (min - e).exp(),
        None => 0.0,
    }))
}

fn eliminate_discrete(
    involved: &[HybridFactor],
    key: Key,
) -> HybridResult<(DiscreteConditional, DiscreteFactor)> {
    let mut factors = Vec::with_capacity(involved.len());
    for factor in involved {
        match factor {
            HybridFactor::Discrete(f) => factors.push(f),
            _ => {
                return Err(HybridError::InvalidOrdering(format!(
                    "discrete key {key} eliminated while continuous factors still depend on it"
                )))
            }
        }
    }
    let product = DiscreteFactor::product(factors);
    Ok(DiscreteConditional::from_factor(&product, &[key]))
}

enum DeadBranch {
    Pruned,
    Absent,
}

/// Eliminate a continuous key from factors of which at least one is a mixture.
///
/// The remainder branch scalars keep the input scalars minus the normalizer of the
/// branch conditional, so that the remainder carries the evidence of each branch.
fn eliminate_mixture(
    involved: &[HybridFactor],
    key: Key,
) -> HybridResult<(Conditional, HybridFactor)> {
    let discrete_keys: Vec<DiscreteKey> = merge_keys(involved.iter().filter_map(|f| match f {
        HybridFactor::Hybrid(h) => Some(h.discrete_keys()),
        _ => None,
    }));

    let mut conditionals = Vec::new();
    let mut remainders = Vec::new();
    for assignment in assignments(&discrete_keys) {
        let mut selected: Vec<&JacobianFactor> = Vec::with_capacity(involved.len());
        let mut scalar = 0.0;
        let mut dead = None;
        for factor in involved {
            match factor {
                HybridFactor::Gaussian(g) => selected.push(g),
                HybridFactor::Hybrid(h) => match h.branch(&assignment) {
                    Some(Leaf::Live(branch)) => {
                        selected.push(&branch.factor);
                        scalar += branch.scalar;
                    }
                    Some(Leaf::Pruned) => {
                        dead = Some(DeadBranch::Pruned);
                        break;
                    }
                    Some(Leaf::Absent) | None => {
                        dead = Some(DeadBranch::Absent);
                        break;
                    }
                },
                HybridFactor::Discrete(_) => {
                    return Err(HybridError::InvalidOrdering(format!(
                        "continuous key {key} found in a discrete factor"
                    )))
                }
            }
        }

        match dead {
            Some(DeadBranch::Pruned) => {
                conditionals.push(Leaf::Pruned);
                remainders.push(Leaf::Pruned);
            }
            Some(DeadBranch::Absent) => {
                conditionals.push(Leaf::Absent);
                remainders.push(Leaf::Absent);
            }
            None => {
                let (conditional, remainder) = eliminate_gaussian(&selected, key)?;
                let scalar = scalar - conditional.neg_log_constant();
                conditionals.push(Leaf::Live(conditional));
                remainders.push(Leaf::Live(GaussianBranch {
                    factor: remainder,
                    scalar,
                }));
            }
        }
    }

    if discrete_keys.is_empty() {
        // mixtures without discrete keys collapse to their only branch
        let conditional = conditionals[0].live_or_err(key)?.clone();
        let remainder = remainders[0].live_or_err(key)?.factor.clone();
        return Ok((
            Conditional::Gaussian(conditional),
            HybridFactor::Gaussian(remainder),
        ));
    }
    let conditional = HybridGaussianConditional::new(
        key,
        DecisionTable::new(discrete_keys.clone(), conditionals)?,
    )?;
    let remainder =
        HybridGaussianFactor::from_table(DecisionTable::new(discrete_keys, remainders)?);
    Ok((Conditional::Hybrid(conditional), HybridFactor::Hybrid(remainder)))
}
