use std::collections::{BTreeMap, BTreeSet};

use crate::discrete::DiscreteFactor;
use crate::error::HybridResult;
use crate::gaussian::JacobianFactor;
use crate::hybrid::HybridGaussianFactor;
use crate::key::{DiscreteKey, Key};
use crate::table::DiscreteValues;

/// A factor of a hybrid graph.
#[derive(Debug, Clone, PartialEq)]
pub enum HybridFactor {
    /// Purely continuous linear factor.
    Gaussian(JacobianFactor),
    /// Purely discrete potential.
    Discrete(DiscreteFactor),
    /// Gaussian mixture indexed by discrete keys.
    Hybrid(HybridGaussianFactor),
}

impl HybridFactor {
    /// Continuous keys of the factor.
    pub fn continuous_keys(&self) -> Vec<Key> {
        match self {
            HybridFactor::Gaussian(f) => f.keys().to_vec(),
            HybridFactor::Discrete(_) => Vec::new(),
            HybridFactor::Hybrid(f) => f.continuous_keys().to_vec(),
        }
    }

    /// Discrete keys of the factor.
    pub fn discrete_keys(&self) -> Vec<DiscreteKey> {
        match self {
            HybridFactor::Gaussian(_) => Vec::new(),
            HybridFactor::Discrete(f) => f.keys().to_vec(),
            HybridFactor::Hybrid(f) => f.discrete_keys().to_vec(),
        }
    }

    /// Every key of the factor, continuous first.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = self.continuous_keys();
        keys.extend(self.discrete_keys().into_iter().map(|k| k.key));
        keys
    }

    /// Whether the factor involves `key`.
    pub fn involves(&self, key: Key) -> bool {
        self.keys().contains(&key)
    }

    /// Dimension of every continuous key as seen by this factor.
    ///
    /// A key may appear more than once when a mixture branch disagrees with another.
    pub fn continuous_dims(&self) -> Vec<(Key, usize)> {
        let dims_of = |f: &JacobianFactor| -> Vec<(Key, usize)> {
            f.terms().map(|(k, a)| (k, a.ncols())).collect()
        };
        match self {
            HybridFactor::Gaussian(f) => dims_of(f),
            HybridFactor::Discrete(_) => Vec::new(),
            HybridFactor::Hybrid(f) => f
                .branches()
                .leaves()
                .iter()
                .filter_map(|l| l.as_live())
                .flat_map(|b| dims_of(&b.factor))
                .collect(),
        }
    }

    /// Condition on fixed discrete values.
    pub fn restrict(&self, fixed: &DiscreteValues) -> HybridResult<HybridFactor> {
        match self {
            HybridFactor::Gaussian(_) => Ok(self.clone()),
            HybridFactor::Discrete(f) => Ok(HybridFactor::Discrete(f.restrict(fixed))),
            HybridFactor::Hybrid(f) => f.restrict(fixed),
        }
    }
}

impl From<JacobianFactor> for HybridFactor {
    fn from(factor: JacobianFactor) -> Self {
        HybridFactor::Gaussian(factor)
    }
}

impl From<DiscreteFactor> for HybridFactor {
    fn from(factor: DiscreteFactor) -> Self {
        HybridFactor::Discrete(factor)
    }
}

impl From<HybridGaussianFactor> for HybridFactor {
    fn from(factor: HybridGaussianFactor) -> Self {
        HybridFactor::Hybrid(factor)
    }
}

/// An ordered collection of hybrid factors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridFactorGraph {
    factors: Vec<HybridFactor>,
}

impl HybridFactorGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factor.
    pub fn push(&mut self, factor: impl Into<HybridFactor>) {
        self.factors.push(factor.into());
    }

    /// Iterate over the factors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HybridFactor> {
        self.factors.iter()
    }

    /// Number of factors.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// Whether the graph has no factors.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Every key of the graph.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.factors.iter().flat_map(|f| f.keys()).collect()
    }

    /// Continuous keys of the graph.
    pub fn continuous_keys(&self) -> BTreeSet<Key> {
        self.factors.iter().flat_map(|f| f.continuous_keys()).collect()
    }

    /// Discrete keys of the graph with their cardinalities.
    pub fn discrete_keys(&self) -> BTreeMap<Key, usize> {
        self.factors
            .iter()
            .flat_map(|f| f.discrete_keys())
            .map(|k| (k.key, k.cardinality))
            .collect()
    }

    /// Condition every factor on fixed discrete values.
    pub fn restrict(&self, fixed: &DiscreteValues) -> HybridResult<HybridFactorGraph> {
        self.factors.iter().map(|f| f.restrict(fixed)).collect()
    }

    pub(crate) fn into_factors(self) -> Vec<HybridFactor> {
        self.factors
    }
}

impl FromIterator<HybridFactor> for HybridFactorGraph {
    fn from_iter<I: IntoIterator<Item = HybridFactor>>(iter: I) -> Self {
        Self {
            factors: iter.into_iter().collect(),
        }
    }
}

impl Extend<HybridFactor> for HybridFactorGraph {
    fn extend<I: IntoIterator<Item = HybridFactor>>(&mut self, iter: I) {
        self.factors.extend(iter);
    }
}

impl IntoIterator for HybridFactorGraph {
    type Item = HybridFactor;
    type IntoIter = std::vec::IntoIter<HybridFactor>;

    fn into_iter(self) -> Self::IntoIter {
        self.factors.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::NoiseModel;
    use nalgebra::DVector;

    #[test]
    fn test_graph_key_sets() -> Result<(), crate::error::HybridError> {
        let x0 = Key::symbol('x', 0);
        let x1 = Key::symbol('x', 1);
        let m0 = DiscreteKey::new(Key::symbol('m', 0), 2);
        let noise = NoiseModel::isotropic(2, 1.0)?;

        let mut graph = HybridFactorGraph::new();
        graph.push(JacobianFactor::prior(x0, DVector::zeros(2), &noise)?);
        let components = (0..2)
            .map(|_| JacobianFactor::between(x0, x1, DVector::zeros(2), &noise))
            .map(|f| f.map(|f| (f, 0.0)))
            .collect::<HybridResult<Vec<_>>>()?;
        graph.push(HybridGaussianFactor::new(vec![m0], components)?);
        graph.push(DiscreteFactor::new(vec![m0], vec![0.3, 0.7])?);

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.keys(), BTreeSet::from([x0, x1, m0.key]));
        assert_eq!(graph.continuous_keys(), BTreeSet::from([x0, x1]));
        assert_eq!(graph.discrete_keys(), BTreeMap::from([(m0.key, 2)]));

        let restricted = graph.restrict(&DiscreteValues::from([(m0.key, 0)]))?;
        assert!(restricted.discrete_keys().is_empty());
        assert!(matches!(
            restricted.iter().nth(1),
            Some(HybridFactor::Gaussian(_))
        ));
        Ok(())
    }
}
