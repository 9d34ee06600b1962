//! Gaussian mixtures indexed by discrete assignments.

use std::collections::BTreeSet;

use crate::conditional::Conditional;
use crate::discrete::DiscreteFactor;
use crate::error::{ConsistencyError, HybridError, HybridResult};
use crate::factor::HybridFactor;
use crate::gaussian::{GaussianConditional, JacobianFactor};
use crate::key::{DiscreteKey, Key};
use crate::table::{DecisionTable, DiscreteValues, Leaf};

/// One component of a [`HybridGaussianFactor`].
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianBranch {
    /// Linear factor of the component.
    pub factor: JacobianFactor,
    /// Constant added to the component error, usually a negative log normalizer.
    pub scalar: f64,
}

impl GaussianBranch {
    /// Error `½‖A x - b‖² + scalar` of a branch without continuous keys.
    pub fn constant_error(&self) -> f64 {
        self.factor.constant_error() + self.scalar
    }
}

/// Discrete-indexed mixture of linear Gaussian factors.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridGaussianFactor {
    continuous_keys: Vec<Key>,
    branches: DecisionTable<Leaf<GaussianBranch>>,
}

impl HybridGaussianFactor {
    /// Create a mixture with one `(factor, scalar)` component per assignment of
    /// `discrete_keys`, in row-major order.
    pub fn new(
        discrete_keys: Vec<DiscreteKey>,
        components: Vec<(JacobianFactor, f64)>,
    ) -> HybridResult<Self> {
        let leaves = components
            .into_iter()
            .map(|(factor, scalar)| Leaf::Live(GaussianBranch { factor, scalar }))
            .collect();
        Ok(Self::from_table(DecisionTable::new(discrete_keys, leaves)?))
    }

    /// Create a mixture from a table of branches.
    pub fn from_table(branches: DecisionTable<Leaf<GaussianBranch>>) -> Self {
        let continuous_keys: BTreeSet<Key> = branches
            .leaves()
            .iter()
            .filter_map(|l| l.as_live())
            .flat_map(|b| b.factor.keys().iter().copied())
            .collect();
        Self {
            continuous_keys: continuous_keys.into_iter().collect(),
            branches,
        }
    }

    /// The discrete keys indexing the mixture.
    pub fn discrete_keys(&self) -> &[DiscreteKey] {
        self.branches.keys()
    }

    /// Union of the continuous keys of every live branch, sorted.
    pub fn continuous_keys(&self) -> &[Key] {
        &self.continuous_keys
    }

    /// The branch table.
    pub fn branches(&self) -> &DecisionTable<Leaf<GaussianBranch>> {
        &self.branches
    }

    /// The branch selected by an assignment.
    pub fn branch(&self, values: &DiscreteValues) -> Option<&Leaf<GaussianBranch>> {
        self.branches.get(values)
    }

    /// Condition on fixed discrete values.
    pub fn restrict(&self, fixed: &DiscreteValues) -> HybridResult<HybridFactor> {
        let Some(first_fixed) = self
            .discrete_keys()
            .iter()
            .find(|k| fixed.contains_key(&k.key))
            .map(|k| k.key)
        else {
            return Ok(HybridFactor::Hybrid(self.clone()));
        };
        let table = self.branches.restrict(fixed);
        if !table.keys().is_empty() {
            return Ok(HybridFactor::Hybrid(Self::from_table(table)));
        }
        match &table.leaves()[0] {
            Leaf::Live(branch) => Ok(HybridFactor::Gaussian(branch.factor.clone())),
            _ => Err(ConsistencyError::AllBranchesPruned(first_fixed).into()),
        }
    }
}

/// Mixture of Gaussian conditionals on one frontal key, indexed by discrete parents.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridGaussianConditional {
    frontal: Key,
    continuous_parents: Vec<Key>,
    branches: DecisionTable<Leaf<GaussianConditional>>,
}

impl HybridGaussianConditional {
    /// Create a mixture conditional; every live branch must have `frontal` as frontal key
    /// and at least one branch must be live.
    pub fn new(
        frontal: Key,
        branches: DecisionTable<Leaf<GaussianConditional>>,
    ) -> HybridResult<Self> {
        let mut parents = BTreeSet::new();
        let mut live = 0;
        for c in branches.leaves().iter().filter_map(|l| l.as_live()) {
            if c.frontal() != frontal {
                return Err(HybridError::InvalidTable(format!(
                    "branch on {} in a mixture on {}",
                    c.frontal(),
                    frontal
                )));
            }
            parents.extend(c.parents().iter().copied());
            live += 1;
        }
        if live == 0 {
            return Err(ConsistencyError::AllBranchesPruned(frontal).into());
        }
        Ok(Self {
            frontal,
            continuous_parents: parents.into_iter().collect(),
            branches,
        })
    }

    /// The frontal key.
    pub fn frontal(&self) -> Key {
        self.frontal
    }

    /// Union of the continuous parents of every live branch, sorted.
    pub fn continuous_parents(&self) -> &[Key] {
        &self.continuous_parents
    }

    /// The discrete parents.
    pub fn discrete_parents(&self) -> &[DiscreteKey] {
        self.branches.keys()
    }

    /// The branch table.
    pub fn branches(&self) -> &DecisionTable<Leaf<GaussianConditional>> {
        &self.branches
    }

    /// Number of live branches.
    pub fn num_live(&self) -> usize {
        self.branches.leaves().iter().filter(|l| l.is_live()).count()
    }

    /// The Gaussian conditional selected by an assignment.
    ///
    /// Selecting a pruned or absent branch is a consistency error.
    pub fn choose(&self, values: &DiscreteValues) -> HybridResult<&GaussianConditional> {
        if let Some(missing) = self
            .discrete_parents()
            .iter()
            .find(|k| !values.contains_key(&k.key))
        {
            return Err(HybridError::MissingValue(missing.key));
        }
        let leaf = self
            .branches
            .get(values)
            .ok_or_else(|| {
                HybridError::InvalidTable(format!(
                    "assignment out of range for the mixture on {}",
                    self.frontal
                ))
            })?;
        Ok(leaf.live_or_err(self.frontal)?)
    }

    /// The mixture seen as a hybrid factor.
    ///
    /// Each branch keeps its normalization constant as scalar so that branches with
    /// different covariances keep their relative weight.
    pub fn to_factor(&self) -> HybridGaussianFactor {
        HybridGaussianFactor::from_table(self.branches.map(|leaf| {
            leaf.map(|c| GaussianBranch {
                factor: c.to_factor(),
                scalar: c.neg_log_constant(),
            })
        }))
    }

    /// Mark pruned every branch with no surviving mass in `surviving`.
    ///
    /// Only the discrete parents shared with `surviving` are constrained.
    pub fn prune(&self, surviving: &DiscreteFactor) -> HybridResult<Self> {
        let shared: Vec<Key> = self
            .discrete_parents()
            .iter()
            .filter(|k| surviving.table().contains_key(k.key))
            .map(|k| k.key)
            .collect();
        if shared.is_empty() {
            return Ok(self.clone());
        }
        let projected = surviving.max_project(&shared);
        let mut branches = self.branches.clone();
        for (i, leaf) in branches.leaves_mut().iter_mut().enumerate() {
            let assignment = self.branches.assignment(i);
            if leaf.is_live() && projected.value(&assignment).unwrap_or(0.0) <= 0.0 {
                *leaf = Leaf::Pruned;
            }
        }
        Self::new(self.frontal, branches)
    }

    /// Condition on fixed discrete values; the result is Gaussian when no discrete
    /// parent remains.
    pub fn restrict(&self, fixed: &DiscreteValues) -> HybridResult<Conditional> {
        if !self.discrete_parents().iter().any(|k| fixed.contains_key(&k.key)) {
            return Ok(Conditional::Hybrid(self.clone()));
        }
        let table = self.branches.restrict(fixed);
        if table.keys().is_empty() {
            let conditional = table.leaves()[0].live_or_err(self.frontal)?;
            return Ok(Conditional::Gaussian(conditional.clone()));
        }
        Ok(Conditional::Hybrid(Self::new(self.frontal, table)?))
    }
}
