//! Properties checked after every update of randomized hybrid trajectories.

use std::collections::{BTreeMap, BTreeSet};

use kornia_hybrid::carry_forward::split_posterior;
use kornia_hybrid::{
    Conditional, DiscreteKey, DiscreteValues, HybridError, HybridFactorGraph,
    HybridGaussianFactor, HybridSmoother, JacobianFactor, Key, Leaf, NoiseModel, Ordering,
    SmootherConfig, VariableKind,
};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SIGMA: f64 = 0.1;

fn x(i: u64) -> Key {
    Key::symbol('x', i)
}

fn noise() -> NoiseModel {
    NoiseModel::isotropic(2, SIGMA).unwrap()
}

/// Random planar walk with ambiguous odometry and occasional loop closures.
///
/// Every new pose also gets an absolute position fix with standard deviation
/// `gps_sigma`, which is what eventually tells the odometry candidates apart.
struct Simulation {
    rng: StdRng,
    truth: Vec<DVector<f64>>,
    gps_sigma: f64,
}

impl Simulation {
    fn new(seed: u64, gps_sigma: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            truth: vec![DVector::zeros(2)],
            gps_sigma,
        }
    }

    fn step(&mut self) -> HybridFactorGraph {
        let i = self.truth.len() as u64 - 1;
        let mut graph = HybridFactorGraph::new();
        if i == 0 {
            let anchor = NoiseModel::isotropic(2, 1e-3).unwrap();
            graph.push(JacobianFactor::prior(x(0), DVector::zeros(2), &anchor).unwrap());
        }

        let d = DVector::from_vec(vec![
            self.rng.random_range(-1.0..1.0),
            self.rng.random_range(-1.0..1.0),
        ]);
        let next = &self.truth[i as usize] + &d;
        let gps = NoiseModel::isotropic(2, self.gps_sigma).unwrap();
        graph.push(JacobianFactor::prior(x(i + 1), next.clone(), &gps).unwrap());
        self.truth.push(next);

        if self.rng.random_bool(0.4) {
            // the true reading is at a random slot, the others are off by at least a metre
            let cardinality = self.rng.random_range(2..=3);
            let correct = self.rng.random_range(0..cardinality);
            let components = (0..cardinality)
                .map(|c| {
                    let mut measured = d.clone();
                    if c != correct {
                        measured[0] += 1.0 + c as f64;
                    }
                    let f = JacobianFactor::between(x(i), x(i + 1), measured, &noise()).unwrap();
                    (f, noise().neg_log_constant())
                })
                .collect();
            let mode = DiscreteKey::new(Key::symbol('m', i), cardinality);
            graph.push(HybridGaussianFactor::new(vec![mode], components).unwrap());
        } else {
            graph.push(JacobianFactor::between(x(i), x(i + 1), d, &noise()).unwrap());
        }

        if i > 2 && self.rng.random_bool(0.25) {
            let j = self.rng.random_range(0..i);
            let measured = &self.truth[i as usize + 1] - &self.truth[j as usize];
            let loose = NoiseModel::isotropic(2, 10.0).unwrap();
            let components = [loose, noise()]
                .iter()
                .map(|n| {
                    let f = JacobianFactor::between(x(j), x(i + 1), measured.clone(), n).unwrap();
                    (f, n.neg_log_constant())
                })
                .collect();
            let indicator = DiscreteKey::new(Key::symbol('l', i), 2);
            graph.push(HybridGaussianFactor::new(vec![indicator], components).unwrap());
        }
        graph
    }
}

/// Every registered key that is not fixed has exactly one owning conditional.
fn assert_posterior_complete(smoother: &HybridSmoother) {
    let mut owners: BTreeMap<Key, usize> = BTreeMap::new();
    for (_, conditional) in smoother.posterior().iter() {
        for key in conditional.frontals() {
            *owners.entry(key).or_default() += 1;
        }
    }
    let fixed = smoother.fixed_values();
    for key in smoother.registry().continuous_keys() {
        assert_eq!(owners.get(&key), Some(&1), "continuous {key}");
    }
    for dkey in smoother.registry().discrete_keys() {
        if fixed.contains_key(&dkey.key) {
            assert_eq!(owners.get(&dkey.key), None, "fixed {}", dkey.key);
        } else {
            assert_eq!(owners.get(&dkey.key), Some(&1), "discrete {}", dkey.key);
        }
    }
}

/// Mixtures over the same discrete keys agree on which assignments are dead.
fn assert_pruning_consistent(smoother: &HybridSmoother) {
    let mut patterns: BTreeMap<Vec<DiscreteKey>, Vec<bool>> = BTreeMap::new();
    for (_, conditional) in smoother.posterior().iter() {
        let Conditional::Hybrid(h) = conditional else {
            continue;
        };
        let live: Vec<bool> = h.branches().leaves().iter().map(Leaf::is_live).collect();
        let scope = h.discrete_parents().to_vec();
        match patterns.get(&scope) {
            Some(existing) => assert_eq!(existing, &live, "scope {scope:?}"),
            None => {
                patterns.insert(scope, live);
            }
        }
    }
}

/// Fixed keys never change and nothing branches on them.
fn assert_fixed_monotone(smoother: &HybridSmoother, before: &DiscreteValues) {
    let fixed = smoother.fixed_values();
    for (key, value) in before {
        assert_eq!(fixed.get(key), Some(value));
    }
    for (_, conditional) in smoother.posterior().iter() {
        for dkey in conditional.discrete_keys() {
            assert!(!fixed.contains_key(&dkey.key));
        }
    }
}

#[test]
fn test_random_trajectories_keep_invariants() -> Result<(), HybridError> {
    for seed in 0..8 {
        let mut sim = Simulation::new(seed, 0.5);
        let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
        for _ in 0..12 {
            let graph = sim.step();
            let max_leaves = sim.rng.random_range(1..=3);

            // owners of every touched key must be re-eliminated
            let restricted = graph.restrict(smoother.fixed_values())?;
            let split = split_posterior(&restricted, smoother.posterior());
            for key in restricted.keys() {
                if let Some(owner) = smoother.posterior().owner_of(key) {
                    assert!(split.pulled.contains(&owner));
                    assert!(!split.remainder.contains(&owner));
                }
            }

            let before = smoother.fixed_values().clone();
            smoother.update(&graph, Some(max_leaves), None)?;

            assert_posterior_complete(&smoother);
            assert_pruning_consistent(&smoother);
            assert_fixed_monotone(&smoother, &before);

            let values = smoother.optimize()?;
            assert_eq!(values.continuous.len(), sim.truth.len());
            assert!(smoother.error(&values)?.is_finite());
        }
    }
    Ok(())
}

#[test]
fn test_optimize_is_deterministic() -> Result<(), HybridError> {
    let mut sim = Simulation::new(42, 0.5);
    let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
    for _ in 0..10 {
        let graph = sim.step();
        smoother.update(&graph, Some(3), None)?;
    }
    let first = smoother.optimize()?;
    let second = smoother.optimize()?;
    assert_eq!(first, second);
    assert_eq!(smoother.mpe(), smoother.mpe());
    Ok(())
}

#[test]
fn test_estimates_follow_truth() -> Result<(), HybridError> {
    let mut sim = Simulation::new(7, 0.2);
    let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
    for _ in 0..10 {
        let graph = sim.step();
        smoother.update(&graph, Some(2), None)?;
    }
    // measurements are exact, so the right modes reproduce the truth
    let values = smoother.optimize()?;
    for (i, truth) in sim.truth.iter().enumerate() {
        let estimate = values.continuous.get(x(i as u64)).unwrap();
        assert!((estimate - truth).norm() < 1e-3, "x{i}");
    }
    Ok(())
}

fn seeded_smoother() -> Result<HybridSmoother, HybridError> {
    let mut sim = Simulation::new(3, 0.5);
    let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
    for _ in 0..4 {
        let graph = sim.step();
        smoother.update(&graph, Some(2), None)?;
    }
    Ok(smoother)
}

fn snapshot(smoother: &HybridSmoother) -> (Vec<Conditional>, DiscreteValues, usize) {
    let conditionals = smoother.hybrid_bayes_net().into_iter().collect();
    (
        conditionals,
        smoother.fixed_values().clone(),
        smoother.registry().len(),
    )
}

#[test]
fn test_bad_ordering_leaves_state_untouched() -> Result<(), HybridError> {
    let mut smoother = seeded_smoother()?;
    let before = snapshot(&smoother);

    let mut graph = HybridFactorGraph::new();
    graph.push(JacobianFactor::between(x(4), x(5), DVector::from_vec(vec![1.0, 0.0]), &noise())?);
    // x5 is missing
    let ordering = Ordering::new(vec![x(4)]);
    assert!(matches!(
        smoother.update(&graph, None, Some(ordering)),
        Err(HybridError::InvalidOrdering(_))
    ));
    assert_eq!(snapshot(&smoother), before);
    assert_eq!(smoother.registry().kind(x(5)), None);
    Ok(())
}

#[test]
fn test_failed_elimination_leaves_state_untouched() -> Result<(), HybridError> {
    let mut smoother = seeded_smoother()?;
    let before = snapshot(&smoother);

    // one row cannot determine a 2D variable
    let x9 = x(9);
    let mut graph = HybridFactorGraph::new();
    graph.push(JacobianFactor::new(
        vec![(x9, DMatrix::from_row_slice(1, 2, &[1.0, 1.0]))],
        DVector::from_vec(vec![1.0]),
    )?);
    assert!(matches!(
        smoother.update(&graph, Some(2), None),
        Err(HybridError::Underdetermined { .. })
    ));
    assert_eq!(snapshot(&smoother), before);
    assert_eq!(smoother.registry().kind(x9), None);

    // the smoother keeps working afterwards
    let mut graph = HybridFactorGraph::new();
    graph.push(JacobianFactor::between(x(4), x(5), DVector::from_vec(vec![1.0, 0.0]), &noise())?);
    smoother.update(&graph, Some(2), None)?;
    assert_eq!(smoother.registry().kind(x(5)), Some(VariableKind::Continuous(2)));
    Ok(())
}

#[test]
fn test_fixed_keys_are_sliced_from_new_factors() -> Result<(), HybridError> {
    let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
    let m0 = DiscreteKey::new(Key::symbol('m', 0), 2);
    let candidates = |i: u64| -> Result<HybridGaussianFactor, HybridError> {
        let components = [0.0, 5.0]
            .iter()
            .map(|offset| -> Result<_, HybridError> {
                let d = DVector::from_vec(vec![1.0 + offset, 0.0]);
                let f = JacobianFactor::between(x(i), x(i + 1), d, &noise())?;
                Ok((f, noise().neg_log_constant()))
            })
            .collect::<Result<Vec<_>, HybridError>>()?;
        HybridGaussianFactor::new(vec![m0], components)
    };

    let mut graph = HybridFactorGraph::new();
    graph.push(JacobianFactor::prior(x(0), DVector::zeros(2), &noise())?);
    graph.push(candidates(0)?);
    graph.push(JacobianFactor::prior(x(1), DVector::from_vec(vec![1.0, 0.0]), &noise())?);
    smoother.update(&graph, Some(1), None)?;
    assert_eq!(smoother.fixed_values().get(&m0.key), Some(&0));

    // a later factor on the same mode key sees it already resolved
    let mut graph = HybridFactorGraph::new();
    graph.push(candidates(1)?);
    let summary = smoother.update(&graph, Some(1), None)?;
    assert!(summary.newly_fixed.is_empty());
    assert!(smoother
        .hybrid_bayes_net()
        .iter()
        .all(|c| c.discrete_keys().is_empty()));

    let values = smoother.optimize()?;
    let x2 = values.continuous.get(x(2)).unwrap();
    assert!((x2 - DVector::from_vec(vec![2.0, 0.0])).norm() < 1e-6);

    let keys: BTreeSet<Key> = values.discrete.keys().copied().collect();
    assert_eq!(keys, BTreeSet::from([m0.key]));
    Ok(())
}
