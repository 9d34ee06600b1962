use crate::discrete::{max_product, DiscreteConditional, DiscreteFactor};
use crate::error::{HybridError, HybridResult};
use crate::factor::HybridFactor;
use crate::gaussian::{GaussianBayesNet, GaussianConditional};
use crate::hybrid::HybridGaussianConditional;
use crate::key::{DiscreteKey, Key};
use crate::table::DiscreteValues;
use crate::values::HybridValues;

/// A conditional of a hybrid Bayes net.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional {
    /// Distribution of discrete frontals given discrete parents.
    Discrete(DiscreteConditional),
    /// Linear Gaussian density of one continuous frontal.
    Gaussian(GaussianConditional),
    /// Gaussian mixture of one continuous frontal indexed by discrete parents.
    Hybrid(HybridGaussianConditional),
}

impl Conditional {
    /// The frontal keys.
    pub fn frontals(&self) -> Vec<Key> {
        match self {
            Conditional::Discrete(c) => c.frontals().iter().map(|k| k.key).collect(),
            Conditional::Gaussian(c) => vec![c.frontal()],
            Conditional::Hybrid(c) => vec![c.frontal()],
        }
    }

    /// The parent keys, continuous first.
    pub fn parents(&self) -> Vec<Key> {
        match self {
            Conditional::Discrete(c) => c.parents().iter().map(|k| k.key).collect(),
            Conditional::Gaussian(c) => c.parents().to_vec(),
            Conditional::Hybrid(c) => c
                .continuous_parents()
                .iter()
                .copied()
                .chain(c.discrete_parents().iter().map(|k| k.key))
                .collect(),
        }
    }

    /// Every discrete key the conditional depends on, frontal or parent.
    pub fn discrete_keys(&self) -> Vec<DiscreteKey> {
        match self {
            Conditional::Discrete(c) => c.keys().to_vec(),
            Conditional::Gaussian(_) => Vec::new(),
            Conditional::Hybrid(c) => c.discrete_parents().to_vec(),
        }
    }

    /// The discrete conditional, if this is one.
    pub fn as_discrete(&self) -> Option<&DiscreteConditional> {
        match self {
            Conditional::Discrete(c) => Some(c),
            _ => None,
        }
    }

    /// The Gaussian conditional, if this is one.
    pub fn as_gaussian(&self) -> Option<&GaussianConditional> {
        match self {
            Conditional::Gaussian(c) => Some(c),
            _ => None,
        }
    }

    /// The mixture conditional, if this is one.
    pub fn as_hybrid(&self) -> Option<&HybridGaussianConditional> {
        match self {
            Conditional::Hybrid(c) => Some(c),
            _ => None,
        }
    }

    /// The conditional seen as a factor, for re-elimination.
    pub fn to_factor(&self) -> HybridFactor {
        match self {
            Conditional::Discrete(c) => HybridFactor::Discrete(c.to_factor()),
            Conditional::Gaussian(c) => HybridFactor::Gaussian(c.to_factor()),
            Conditional::Hybrid(c) => HybridFactor::Hybrid(c.to_factor()),
        }
    }

    /// Condition on fixed discrete values.
    ///
    /// Returns `None` for a discrete conditional whose frontals are all fixed.
    pub fn restrict(&self, fixed: &DiscreteValues) -> HybridResult<Option<Conditional>> {
        match self {
            Conditional::Discrete(c) => Ok(c.restrict(fixed).map(Conditional::Discrete)),
            Conditional::Gaussian(_) => Ok(Some(self.clone())),
            Conditional::Hybrid(c) => c.restrict(fixed).map(Some),
        }
    }

    /// Negative log density at `values`, up to the normalization of Gaussian parts.
    pub fn error(&self, values: &HybridValues) -> HybridResult<f64> {
        match self {
            Conditional::Gaussian(c) => c.error(&values.continuous),
            Conditional::Hybrid(c) => c.choose(&values.discrete)?.error(&values.continuous),
            Conditional::Discrete(c) => {
                let missing = c
                    .keys()
                    .iter()
                    .find(|k| !values.discrete.contains_key(&k.key));
                if let Some(missing) = missing {
                    return Err(HybridError::MissingValue(missing.key));
                }
                c.error(&values.discrete).ok_or(HybridError::InvalidTable(
                    "discrete value out of range".to_string(),
                ))
            }
        }
    }
}

impl From<DiscreteConditional> for Conditional {
    fn from(c: DiscreteConditional) -> Self {
        Conditional::Discrete(c)
    }
}

impl From<GaussianConditional> for Conditional {
    fn from(c: GaussianConditional) -> Self {
        Conditional::Gaussian(c)
    }
}

impl From<HybridGaussianConditional> for Conditional {
    fn from(c: HybridGaussianConditional) -> Self {
        Conditional::Hybrid(c)
    }
}

/// Ordered sequence of conditionals, in elimination order.
///
/// Every parent of a conditional is a frontal of a later conditional, so the net
/// is solved back to front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridBayesNet {
    conditionals: Vec<Conditional>,
}

impl HybridBayesNet {
    /// Create an empty Bayes net.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a conditional.
    pub fn push(&mut self, conditional: impl Into<Conditional>) {
        self.conditionals.push(conditional.into());
    }

    /// Iterate over the conditionals in elimination order.
    pub fn iter(&self) -> impl Iterator<Item = &Conditional> {
        self.conditionals.iter()
    }

    /// The conditional at `index`.
    pub fn get(&self, index: usize) -> Option<&Conditional> {
        self.conditionals.get(index)
    }

    /// Number of conditionals.
    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    /// Whether the Bayes net is empty.
    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    /// The discrete conditionals seen as potentials.
    pub fn discrete_factors(&self) -> Vec<DiscreteFactor> {
        self.conditionals
            .iter()
            .filter_map(|c| c.as_discrete())
            .map(|c| c.to_factor())
            .collect()
    }

    /// Most probable assignment of the discrete keys.
    pub fn mpe(&self) -> DiscreteValues {
        max_product(&self.discrete_factors())
    }

    /// Collapse to a Gaussian Bayes net by picking the branch of every mixture
    /// that matches `assignment`.
    pub fn choose(&self, assignment: &DiscreteValues) -> HybridResult<GaussianBayesNet> {
        let mut gbn = GaussianBayesNet::new();
        for conditional in &self.conditionals {
            match conditional {
                Conditional::Gaussian(c) => gbn.push(c.clone()),
                Conditional::Hybrid(c) => gbn.push(c.choose(assignment)?.clone()),
                Conditional::Discrete(_) => {}
            }
        }
        Ok(gbn)
    }

    /// Continuous solution under a given discrete assignment.
    pub fn solve(&self, assignment: &DiscreteValues) -> HybridResult<HybridValues> {
        let continuous = self.choose(assignment)?.optimize()?;
        Ok(HybridValues::new(continuous, assignment.clone()))
    }

    /// MPE assignment followed by back-substitution.
    pub fn optimize(&self) -> HybridResult<HybridValues> {
        self.solve(&self.mpe())
    }

    /// Sum of the conditional errors at `values`.
    pub fn error(&self, values: &HybridValues) -> HybridResult<f64> {
        self.conditionals.iter().map(|c| c.error(values)).sum()
    }
}

impl FromIterator<Conditional> for HybridBayesNet {
    fn from_iter<I: IntoIterator<Item = Conditional>>(iter: I) -> Self {
        Self {
            conditionals: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for HybridBayesNet {
    type Item = Conditional;
    type IntoIter = std::vec::IntoIter<Conditional>;

    fn into_iter(self) -> Self::IntoIter {
        self.conditionals.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaussian::{eliminate_gaussian, JacobianFactor};
    use crate::noise::NoiseModel;
    use crate::table::{DecisionTable, Leaf};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn x(i: u64) -> Key {
        Key::symbol('x', i)
    }

    fn m0() -> DiscreteKey {
        DiscreteKey::new(Key::symbol('m', 0), 2)
    }

    /// `x0 | m0` with means 0 and 10, and `P(m0) = (0.2, 0.8)`.
    fn small_net() -> Result<HybridBayesNet, HybridError> {
        let noise = NoiseModel::isotropic(1, 1.0)?;
        let branches = [0.0, 10.0]
            .iter()
            .map(|mean| -> HybridResult<_> {
                let prior = JacobianFactor::prior(x(0), DVector::from_vec(vec![*mean]), &noise)?;
                Ok(Leaf::Live(eliminate_gaussian(&[&prior], x(0))?.0))
            })
            .collect::<HybridResult<Vec<_>>>()?;
        let mixture =
            HybridGaussianConditional::new(x(0), DecisionTable::new(vec![m0()], branches)?)?;
        let prior = DiscreteFactor::new(vec![m0()], vec![0.2, 0.8])?;
        let (discrete, _) = DiscreteConditional::from_factor(&prior, &[m0().key]);

        let mut net = HybridBayesNet::new();
        net.push(mixture);
        net.push(discrete);
        Ok(net)
    }

    #[test]
    fn test_optimize_picks_mpe_branch() -> Result<(), HybridError> {
        let net = small_net()?;
        assert_eq!(net.mpe(), DiscreteValues::from([(m0().key, 1)]));
        let values = net.optimize()?;
        assert_relative_eq!(values.continuous.get(x(0)).unwrap()[0], 10.0, epsilon = 1e-9);
        assert_relative_eq!(net.error(&values)?, -(0.8f64.ln()), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_accessors_and_keys() -> Result<(), HybridError> {
        let net = small_net()?;
        let mixture = net.get(0).unwrap();
        assert!(mixture.as_hybrid().is_some());
        assert!(mixture.as_gaussian().is_none());
        assert_eq!(mixture.frontals(), vec![x(0)]);
        assert_eq!(mixture.parents(), vec![m0().key]);
        assert_eq!(net.get(1).unwrap().frontals(), vec![m0().key]);
        assert!(matches!(mixture.to_factor(), HybridFactor::Hybrid(_)));
        Ok(())
    }

    #[test]
    fn test_restrict_drops_fixed_discrete() -> Result<(), HybridError> {
        let net = small_net()?;
        let fixed = DiscreteValues::from([(m0().key, 0)]);
        let restricted: Vec<Option<Conditional>> = net
            .iter()
            .map(|c| c.restrict(&fixed))
            .collect::<HybridResult<_>>()?;
        assert!(matches!(restricted[0], Some(Conditional::Gaussian(_))));
        assert!(restricted[1].is_none());
        Ok(())
    }

    #[test]
    fn test_choose_missing_assignment() -> Result<(), HybridError> {
        let net = small_net()?;
        assert!(matches!(
            net.choose(&DiscreteValues::new()),
            Err(HybridError::MissingValue(_))
        ));
        Ok(())
    }
}
