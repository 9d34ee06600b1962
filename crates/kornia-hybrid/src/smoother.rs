//! The incremental hybrid smoother.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::carry_forward::split_posterior;
use crate::conditional::{Conditional, HybridBayesNet};
use crate::discrete::max_product;
use crate::elimination::eliminate_sequential;
use crate::error::{HybridError, HybridResult};
use crate::factor::HybridFactorGraph;
use crate::key::{Key, KeyRegistry};
use crate::ordering::{build_ordering, validate_ordering, Ordering};
use crate::posterior::{ConditionalId, Posterior};
use crate::prune::{overlaps, prune, prune_conditional, validate_prune_params};
use crate::table::DiscreteValues;
use crate::values::{HybridValues, VectorValues};

/// Which continuous keys are eliminated right before the discrete block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepLastPolicy {
    /// The continuous keys of the incoming factors.
    #[default]
    NewFactorKeys,
    /// No key is pinned; plain minimum degree over the continuous keys.
    Empty,
}

/// Configuration of a [`HybridSmoother`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// A discrete key is fixed once the marginal of its best value reaches this
    /// threshold, in `(0, 1]`.
    pub marginal_threshold: f64,
    /// Keep-last policy of the automatic ordering.
    pub keep_last: KeepLastPolicy,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            marginal_threshold: 0.99,
            keep_last: KeepLastPolicy::default(),
        }
    }
}

impl SmootherConfig {
    /// Check the configuration values.
    pub fn validate(&self) -> HybridResult<()> {
        if !(self.marginal_threshold > 0.0 && self.marginal_threshold <= 1.0) {
            return Err(HybridError::InvalidThreshold(self.marginal_threshold));
        }
        Ok(())
    }
}

/// Lifecycle of a smoother.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmootherState {
    /// No factor has been added yet.
    Empty,
    /// The posterior holds at least one conditional or fixed value.
    Active,
}

/// What one call to [`HybridSmoother::update`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSummary {
    /// The elimination ordering used.
    pub ordering: Ordering,
    /// Number of conditionals pulled back from the posterior.
    pub num_pulled: usize,
    /// Number of conditionals appended to the posterior.
    pub fragment_len: usize,
    /// Discrete keys fixed by this update.
    pub newly_fixed: DiscreteValues,
}

/// Incremental smoother over continuous and discrete variables.
///
/// Every [`update`](Self::update) eliminates a batch of linearized factors together
/// with the part of the posterior they touch, optionally prunes the discrete
/// hypotheses, and appends the result to the posterior. A failed update leaves the
/// smoother unchanged.
///
/// # Example
///
/// ```
/// use kornia_hybrid::{HybridFactorGraph, HybridSmoother, JacobianFactor, Key, NoiseModel};
/// use nalgebra::DVector;
///
/// let noise = NoiseModel::isotropic(1, 0.1)?;
/// let (x0, x1) = (Key::symbol('x', 0), Key::symbol('x', 1));
///
/// let mut graph = HybridFactorGraph::new();
/// graph.push(JacobianFactor::prior(x0, DVector::from_vec(vec![0.0]), &noise)?);
/// graph.push(JacobianFactor::between(x0, x1, DVector::from_vec(vec![1.5]), &noise)?);
///
/// let mut smoother = HybridSmoother::new(Default::default())?;
/// smoother.update(&graph, None, None)?;
/// let values = smoother.optimize()?;
/// assert!((values.continuous.get(x1).unwrap()[0] - 1.5).abs() < 1e-9);
/// # Ok::<(), kornia_hybrid::HybridError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HybridSmoother {
    config: SmootherConfig,
    registry: KeyRegistry,
    posterior: Posterior,
    fixed: DiscreteValues,
}

impl HybridSmoother {
    /// Create an empty smoother.
    pub fn new(config: SmootherConfig) -> HybridResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: KeyRegistry::new(),
            posterior: Posterior::new(),
            fixed: DiscreteValues::new(),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    /// Lifecycle state.
    pub fn state(&self) -> SmootherState {
        if self.posterior.is_empty() && self.fixed.is_empty() {
            SmootherState::Empty
        } else {
            SmootherState::Active
        }
    }

    /// Every variable seen so far.
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// The posterior arena.
    pub fn posterior(&self) -> &Posterior {
        &self.posterior
    }

    /// Owned snapshot of the posterior.
    pub fn hybrid_bayes_net(&self) -> HybridBayesNet {
        self.posterior.to_bayes_net()
    }

    /// The conditional at a position of the posterior sequence.
    pub fn conditional(&self, index: usize) -> Option<&Conditional> {
        self.posterior.at(index)
    }

    /// Discrete keys fixed by pruning.
    pub fn fixed_values(&self) -> &DiscreteValues {
        &self.fixed
    }

    /// Add a batch of linearized factors.
    ///
    /// `max_nr_leaves` enables pruning of the discrete hypotheses; `ordering`
    /// replaces the automatic ordering and must cover exactly the keys of the new
    /// factors plus the pulled conditionals.
    pub fn update(
        &mut self,
        new_factors: &HybridFactorGraph,
        max_nr_leaves: Option<usize>,
        ordering: Option<Ordering>,
    ) -> HybridResult<UpdateSummary> {
        let start = Instant::now();
        if let Some(max_leaves) = max_nr_leaves {
            validate_prune_params(max_leaves, self.config.marginal_threshold)?;
        }

        let mut registry = self.registry.clone();
        for factor in new_factors.iter() {
            for (key, dim) in factor.continuous_dims() {
                registry.register_continuous(key, dim)?;
            }
            for dkey in factor.discrete_keys() {
                registry.register_discrete(dkey)?;
            }
        }
        let new_factors = new_factors.restrict(&self.fixed)?;

        let split = split_posterior(&new_factors, &self.posterior);
        let ordering = match ordering {
            Some(ordering) => {
                validate_ordering(&ordering, &split.graph)?;
                ordering
            }
            None => build_ordering(&split.graph, &self.keep_last_keys(&new_factors)),
        };
        let fragment = eliminate_sequential(&split.graph, &ordering)?;

        let mut replaced: Vec<(ConditionalId, Option<Conditional>)> = Vec::new();
        let (fragment, newly_fixed) = match max_nr_leaves {
            Some(max_leaves) => {
                let outcome = prune(&fragment, max_leaves, self.config.marginal_threshold)?;
                let surviving = outcome.surviving.as_ref();
                for id in &split.remainder {
                    let Some(conditional) = self.posterior.get(*id) else {
                        continue;
                    };
                    if overlaps(conditional, surviving, &outcome.newly_fixed) {
                        let pruned =
                            prune_conditional(conditional, surviving, &outcome.newly_fixed)?;
                        replaced.push((*id, pruned));
                    }
                }
                (outcome.fragment, outcome.newly_fixed)
            }
            None => (fragment, DiscreteValues::new()),
        };

        let summary = UpdateSummary {
            ordering,
            num_pulled: split.pulled.len(),
            fragment_len: fragment.len(),
            newly_fixed,
        };
        let num_replaced = replaced.len();
        self.posterior.commit(&split.pulled, replaced, fragment)?;
        self.fixed
            .extend(summary.newly_fixed.iter().map(|(k, v)| (*k, *v)));
        self.registry = registry;

        log::debug!(
            "update: {} new factors, {} pulled, {} remainder conditionals re-pruned, \
             fragment of {}, posterior of {}, {} fixed keys, took {:?}",
            new_factors.len(),
            summary.num_pulled,
            num_replaced,
            summary.fragment_len,
            self.posterior.len(),
            self.fixed.len(),
            start.elapsed()
        );
        Ok(summary)
    }

    fn keep_last_keys(&self, new_factors: &HybridFactorGraph) -> BTreeSet<Key> {
        match self.config.keep_last {
            KeepLastPolicy::NewFactorKeys => new_factors.continuous_keys(),
            KeepLastPolicy::Empty => BTreeSet::new(),
        }
    }

    /// Most probable discrete assignment, including the fixed values.
    pub fn mpe(&self) -> DiscreteValues {
        let factors: Vec<_> = self
            .posterior
            .iter()
            .filter_map(|(_, c)| c.as_discrete())
            .map(|c| c.to_factor())
            .collect();
        let mut assignment = max_product(&factors);
        assignment.extend(self.fixed.iter().map(|(k, v)| (*k, *v)));
        assignment
    }

    /// MPE discrete assignment and the continuous values that go with it.
    ///
    /// Selecting a pruned or missing branch means the posterior is inconsistent and
    /// is reported as [`HybridError::Consistency`].
    pub fn optimize(&self) -> HybridResult<HybridValues> {
        let assignment = self.mpe();
        let mut continuous = VectorValues::new();
        for (_, conditional) in self.posterior.iter().rev() {
            let gaussian = match conditional {
                Conditional::Gaussian(c) => c,
                Conditional::Hybrid(c) => c.choose(&assignment)?,
                Conditional::Discrete(_) => continue,
            };
            let x = gaussian.solve(&continuous)?;
            continuous.insert(gaussian.frontal(), x);
        }
        Ok(HybridValues::new(continuous, assignment))
    }

    /// Sum of the conditional errors of the posterior at `values`.
    pub fn error(&self, values: &HybridValues) -> HybridResult<f64> {
        self.posterior.iter().map(|(_, c)| c.error(values)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussian::JacobianFactor;
    use crate::noise::NoiseModel;
    use nalgebra::DVector;

    #[test]
    fn test_config_validation() {
        assert!(SmootherConfig::default().validate().is_ok());
        for threshold in [0.0, -0.5, 1.01, f64::NAN] {
            let config = SmootherConfig {
                marginal_threshold: threshold,
                ..Default::default()
            };
            assert!(matches!(
                HybridSmoother::new(config),
                Err(HybridError::InvalidThreshold(_))
            ));
        }
        let config = SmootherConfig {
            marginal_threshold: 1.0,
            keep_last: KeepLastPolicy::Empty,
        };
        assert!(HybridSmoother::new(config).is_ok());
    }

    #[test]
    fn test_state_transitions() -> Result<(), HybridError> {
        let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
        assert_eq!(smoother.state(), SmootherState::Empty);

        let summary = smoother.update(&HybridFactorGraph::new(), Some(3), None)?;
        assert!(summary.ordering.is_empty());
        assert_eq!(smoother.state(), SmootherState::Empty);

        let noise = NoiseModel::isotropic(2, 1.0)?;
        let mut graph = HybridFactorGraph::new();
        graph.push(JacobianFactor::prior(
            Key::symbol('x', 0),
            DVector::from_vec(vec![1.0, 2.0]),
            &noise,
        )?);
        let summary = smoother.update(&graph, None, None)?;
        assert_eq!(summary.fragment_len, 1);
        assert_eq!(smoother.state(), SmootherState::Active);
        assert_eq!(smoother.registry().continuous_keys(), vec![Key::symbol('x', 0)]);
        Ok(())
    }

    #[test]
    fn test_invalid_max_leaves() -> Result<(), HybridError> {
        let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
        assert!(matches!(
            smoother.update(&HybridFactorGraph::new(), Some(0), None),
            Err(HybridError::InvalidMaxLeaves(0))
        ));
        Ok(())
    }

    #[test]
    fn test_dimension_change_is_rejected() -> Result<(), HybridError> {
        let mut smoother = HybridSmoother::new(SmootherConfig::default())?;
        let x0 = Key::symbol('x', 0);
        let mut first = HybridFactorGraph::new();
        first.push(JacobianFactor::prior(
            x0,
            DVector::zeros(2),
            &NoiseModel::isotropic(2, 1.0)?,
        )?);
        smoother.update(&first, None, None)?;

        let mut second = HybridFactorGraph::new();
        second.push(JacobianFactor::prior(
            x0,
            DVector::zeros(3),
            &NoiseModel::isotropic(3, 1.0)?,
        )?);
        assert!(matches!(
            smoother.update(&second, None, None),
            Err(HybridError::DimensionMismatch { .. })
        ));
        assert_eq!(smoother.posterior().len(), 1);
        Ok(())
    }
}
