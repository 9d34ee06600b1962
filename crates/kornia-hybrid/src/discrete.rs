use std::collections::BTreeSet;

use crate::error::{HybridError, HybridResult};
use crate::key::{DiscreteKey, Key};
use crate::ordering::VariableAdjacency;
use crate::table::{assignments, merge_keys, DecisionTable, DiscreteValues};

/// Non-negative potential over discrete keys.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteFactor {
    table: DecisionTable<f64>,
}

impl DiscreteFactor {
    /// Create a factor from keys and row-major potentials.
    pub fn new(keys: Vec<DiscreteKey>, values: Vec<f64>) -> HybridResult<Self> {
        if let Some(v) = values.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
            return Err(HybridError::InvalidTable(format!(
                "potentials must be finite and non-negative, got {v}"
            )));
        }
        Ok(Self {
            table: DecisionTable::new(keys, values)?,
        })
    }

    /// A factor without keys.
    pub fn constant(value: f64) -> Self {
        Self {
            table: DecisionTable::constant(value),
        }
    }

    pub(crate) fn from_table(table: DecisionTable<f64>) -> Self {
        Self { table }
    }

    /// The underlying table.
    pub fn table(&self) -> &DecisionTable<f64> {
        &self.table
    }

    /// The discrete keys of the factor.
    pub fn keys(&self) -> &[DiscreteKey] {
        self.table.keys()
    }

    /// Potential of an assignment.
    pub fn value(&self, values: &DiscreteValues) -> Option<f64> {
        self.table.get(values).copied()
    }

    /// Sum of all potentials.
    pub fn sum(&self) -> f64 {
        self.table.leaves().iter().sum()
    }

    /// Pointwise product over the union of the keys.
    pub fn multiply(&self, other: &DiscreteFactor) -> DiscreteFactor {
        let keys = merge_keys([self.keys(), other.keys()]);
        Self::from_table(DecisionTable::from_fn(keys, |a| {
            self.value(a).unwrap_or(0.0) * other.value(a).unwrap_or(0.0)
        }))
    }

    /// Product of a collection of factors.
    pub fn product<'a>(factors: impl IntoIterator<Item = &'a DiscreteFactor>) -> DiscreteFactor {
        factors
            .into_iter()
            .fold(DiscreteFactor::constant(1.0), |acc, f| acc.multiply(f))
    }

    fn reduce(&self, key: Key, op: impl Fn(f64, f64) -> f64) -> DiscreteFactor {
        let Some(eliminated) = self.keys().iter().find(|k| k.key == key).copied() else {
            return self.clone();
        };
        let kept: Vec<DiscreteKey> = self
            .keys()
            .iter()
            .filter(|k| k.key != key)
            .copied()
            .collect();
        Self::from_table(DecisionTable::from_fn(kept, |a| {
            let mut a = a.clone();
            (0..eliminated.cardinality)
                .map(|v| {
                    a.insert(key, v);
                    self.value(&a).unwrap_or(0.0)
                })
                .reduce(&op)
                .unwrap_or(0.0)
        }))
    }

    /// Marginalize a key out by summation.
    pub fn sum_out(&self, key: Key) -> DiscreteFactor {
        self.reduce(key, |a, b| a + b)
    }

    /// Marginalize a key out by maximization.
    pub fn max_out(&self, key: Key) -> DiscreteFactor {
        self.reduce(key, f64::max)
    }

    /// Max-projection onto a subset of the keys; keys not in the factor are ignored.
    pub fn max_project(&self, keep: &[Key]) -> DiscreteFactor {
        self.keys()
            .iter()
            .filter(|k| !keep.contains(&k.key))
            .map(|k| k.key)
            .collect::<Vec<_>>()
            .into_iter()
            .fold(self.clone(), |acc, key| acc.max_out(key))
    }

    /// Sum-projection onto one key.
    pub fn marginal(&self, key: Key) -> DiscreteFactor {
        self.keys()
            .iter()
            .filter(|k| k.key != key)
            .map(|k| k.key)
            .collect::<Vec<_>>()
            .into_iter()
            .fold(self.clone(), |acc, key| acc.sum_out(key))
    }

    /// Scale the potentials so that they sum to one; an all-zero factor is returned as is.
    pub fn normalize(&self) -> DiscreteFactor {
        let total = self.sum();
        if total <= 0.0 {
            return self.clone();
        }
        Self::from_table(self.table.map(|v| v / total))
    }

    /// Keep the `max_leaves` largest potentials and zero the rest.
    ///
    /// Ties are resolved in favour of the lower table index.
    pub fn keep_largest(&self, max_leaves: usize) -> DiscreteFactor {
        let leaves = self.table.leaves();
        let mut order: Vec<usize> = (0..leaves.len()).filter(|i| leaves[*i] > 0.0).collect();
        if order.len() <= max_leaves {
            return self.clone();
        }
        order.sort_by(|a, b| leaves[*b].total_cmp(&leaves[*a]).then(a.cmp(b)));
        let mut pruned = self.table.map(|_| 0.0);
        for i in order.into_iter().take(max_leaves) {
            pruned.leaves_mut()[i] = leaves[i];
        }
        Self::from_table(pruned)
    }

    /// Drop the fixed keys, keeping the potentials that agree with them.
    pub fn restrict(&self, fixed: &DiscreteValues) -> DiscreteFactor {
        Self::from_table(self.table.restrict(fixed))
    }

    /// Zero every potential that disagrees with `fixed`, keeping all keys.
    pub fn condition_on(&self, fixed: &DiscreteValues) -> DiscreteFactor {
        let mut out = self.table.clone();
        for (i, leaf) in out.leaves_mut().iter_mut().enumerate() {
            let a = self.table.assignment(i);
            if fixed.iter().any(|(k, v)| a.get(k).is_some_and(|x| x != v)) {
                *leaf = 0.0;
            }
        }
        Self::from_table(out)
    }
}

/// Distribution of frontal discrete keys given discrete parents.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteConditional {
    frontals: Vec<DiscreteKey>,
    parents: Vec<DiscreteKey>,
    table: DecisionTable<f64>,
}

impl DiscreteConditional {
    /// Split a joint factor into `P(frontals | rest)` and the marginal on the rest.
    pub fn from_factor(joint: &DiscreteFactor, frontals: &[Key]) -> (Self, DiscreteFactor) {
        let marginal = frontals
            .iter()
            .fold(joint.clone(), |acc, key| acc.sum_out(*key));
        let table = DecisionTable::from_fn(joint.keys().to_vec(), |a| {
            let denom = marginal.value(a).unwrap_or(0.0);
            if denom > 0.0 {
                joint.value(a).unwrap_or(0.0) / denom
            } else {
                0.0
            }
        });
        let (f, p): (Vec<DiscreteKey>, Vec<DiscreteKey>) = joint
            .keys()
            .iter()
            .copied()
            .partition(|k| frontals.contains(&k.key));
        (
            Self {
                frontals: f,
                parents: p,
                table,
            },
            marginal,
        )
    }

    /// The frontal keys.
    pub fn frontals(&self) -> &[DiscreteKey] {
        &self.frontals
    }

    /// The parent keys.
    pub fn parents(&self) -> &[DiscreteKey] {
        &self.parents
    }

    /// All keys in table layout order.
    pub fn keys(&self) -> &[DiscreteKey] {
        self.table.keys()
    }

    /// Probability of the frontals given the parents in `values`.
    pub fn probability(&self, values: &DiscreteValues) -> Option<f64> {
        self.table.get(values).copied()
    }

    /// Negative log probability.
    pub fn error(&self, values: &DiscreteValues) -> Option<f64> {
        self.probability(values).map(|p| -p.ln())
    }

    /// The conditional seen as a potential table.
    pub fn to_factor(&self) -> DiscreteFactor {
        DiscreteFactor::from_table(self.table.clone())
    }

    /// Condition on fixed values; `None` when no key remains.
    ///
    /// Fixed frontals are sliced out and the remaining frontals renormalized.
    pub fn restrict(&self, fixed: &DiscreteValues) -> Option<Self> {
        let frontals: Vec<DiscreteKey> = self
            .frontals
            .iter()
            .filter(|k| !fixed.contains_key(&k.key))
            .copied()
            .collect();
        if frontals.is_empty() {
            return None;
        }
        let sliced = self.to_factor().restrict(fixed);
        let frontal_keys: Vec<Key> = frontals.iter().map(|k| k.key).collect();
        let (conditional, _) = Self::from_factor(&sliced, &frontal_keys);
        Some(conditional)
    }
}

/// Most probable assignment of a product of discrete factors.
///
/// Max-product variable elimination in minimum-degree order followed by
/// back-substitution; ties go to the lowest value.
pub fn max_product(factors: &[DiscreteFactor]) -> DiscreteValues {
    let mut pool: Vec<DiscreteFactor> = factors
        .iter()
        .filter(|f| !f.keys().is_empty())
        .cloned()
        .collect();

    let all_keys: Vec<DiscreteKey> = merge_keys(pool.iter().map(|f| f.keys()));
    let mut adjacency = VariableAdjacency::default();
    for f in &pool {
        adjacency.add_clique(f.keys().iter().map(|k| k.key));
    }
    let order = adjacency.min_degree(&all_keys.iter().map(|k| k.key).collect::<BTreeSet<_>>());

    let mut traces: Vec<(DiscreteKey, DiscreteFactor)> = Vec::with_capacity(order.len());
    for key in order {
        let (involved, rest): (Vec<DiscreteFactor>, Vec<DiscreteFactor>) = pool
            .into_iter()
            .partition(|f| f.keys().iter().any(|k| k.key == key));
        pool = rest;
        let Some(dkey) = all_keys.iter().find(|k| k.key == key).copied() else {
            continue;
        };
        let product = DiscreteFactor::product(&involved);
        let reduced = product.max_out(key);
        if !reduced.keys().is_empty() {
            pool.push(reduced);
        }
        traces.push((dkey, product));
    }

    let mut values = DiscreteValues::new();
    for (dkey, product) in traces.iter().rev() {
        let mut best = (0, f64::NEG_INFINITY);
        for v in 0..dkey.cardinality {
            values.insert(dkey.key, v);
            let p = product.value(&values).unwrap_or(0.0);
            if p > best.1 {
                best = (v, p);
            }
        }
        values.insert(dkey.key, best.0);
    }
    values
}

/// Most probable assignment by exhaustive enumeration; meant for small problems and tests.
pub fn brute_force_mpe(factors: &[DiscreteFactor]) -> DiscreteValues {
    let keys = merge_keys(factors.iter().map(|f| f.keys()));
    let mut best = (DiscreteValues::new(), f64::NEG_INFINITY);
    for a in assignments(&keys) {
        let p: f64 = factors.iter().map(|f| f.value(&a).unwrap_or(0.0)).product();
        if p > best.1 {
            best = (a, p);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn m(i: u64, card: usize) -> DiscreteKey {
        DiscreteKey::new(Key::symbol('m', i), card)
    }

    #[test]
    fn test_rejects_negative_potentials() {
        assert!(DiscreteFactor::new(vec![m(0, 2)], vec![0.5, -0.1]).is_err());
        assert!(DiscreteFactor::new(vec![m(0, 2)], vec![0.5, f64::NAN]).is_err());
    }

    #[test]
    fn test_multiply_and_marginals() -> Result<(), HybridError> {
        let a = DiscreteFactor::new(vec![m(0, 2)], vec![0.25, 0.75])?;
        let b = DiscreteFactor::new(vec![m(1, 2)], vec![0.5, 0.5])?;
        let ab = a.multiply(&b);
        assert_eq!(ab.keys(), &[m(0, 2), m(1, 2)]);
        assert_relative_eq!(ab.sum(), 1.0, epsilon = 1e-12);
        let marg = ab.marginal(m(0, 2).key);
        assert_eq!(marg.table().leaves(), a.table().leaves());
        let maxed = ab.max_out(m(0, 2).key);
        assert_eq!(maxed.table().leaves(), &[0.375, 0.375]);
        Ok(())
    }

    #[test]
    fn test_conditional_from_factor_is_normalized() -> Result<(), HybridError> {
        let joint = DiscreteFactor::new(vec![m(0, 2), m(1, 2)], vec![1.0, 3.0, 2.0, 2.0])?;
        let (cond, marginal) = DiscreteConditional::from_factor(&joint, &[m(1, 2).key]);
        assert_eq!(cond.frontals(), &[m(1, 2)]);
        assert_eq!(cond.parents(), &[m(0, 2)]);
        assert_eq!(marginal.table().leaves(), &[4.0, 4.0]);
        let p = |a: usize, b: usize| {
            cond.probability(&DiscreteValues::from([(m(0, 2).key, a), (m(1, 2).key, b)]))
                .unwrap()
        };
        assert_relative_eq!(p(0, 0), 0.25);
        assert_relative_eq!(p(0, 1), 0.75);
        assert_relative_eq!(p(1, 0) + p(1, 1), 1.0);
        Ok(())
    }

    #[test]
    fn test_keep_largest() -> Result<(), HybridError> {
        let f = DiscreteFactor::new(vec![m(0, 4)], vec![0.1, 0.4, 0.4, 0.1])?;
        assert_eq!(f.keep_largest(2).table().leaves(), &[0.0, 0.4, 0.4, 0.0]);
        assert_eq!(f.keep_largest(1).table().leaves(), &[0.0, 0.4, 0.0, 0.0]);
        assert_eq!(f.keep_largest(10), f);
        Ok(())
    }

    #[test]
    fn test_restrict_conditional_on_parent() -> Result<(), HybridError> {
        let joint = DiscreteFactor::new(vec![m(0, 2), m(1, 2)], vec![1.0, 3.0, 2.0, 2.0])?;
        let (cond, _) = DiscreteConditional::from_factor(&joint, &[m(1, 2).key]);
        let restricted = cond
            .restrict(&DiscreteValues::from([(m(0, 2).key, 0)]))
            .unwrap();
        assert!(restricted.parents().is_empty());
        assert_eq!(restricted.frontals(), &[m(1, 2)]);
        assert_relative_eq!(restricted.to_factor().sum(), 1.0, epsilon = 1e-12);
        assert!(cond
            .restrict(&DiscreteValues::from([(m(1, 2).key, 1)]))
            .is_none());
        Ok(())
    }

    #[test]
    fn test_max_product_matches_enumeration() -> Result<(), HybridError> {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let keys: Vec<DiscreteKey> = (0..5).map(|i| m(i, rng.random_range(2..4))).collect();
            let mut factors = Vec::new();
            for _ in 0..6 {
                let a = keys[rng.random_range(0..keys.len())];
                let b = keys[rng.random_range(0..keys.len())];
                let scope = merge_keys([&[a][..], &[b][..]]);
                let n = crate::table::num_assignments(&scope);
                let values = (0..n).map(|_| rng.random::<f64>()).collect();
                factors.push(DiscreteFactor::new(scope, values)?);
            }
            let fast = max_product(&factors);
            let slow = brute_force_mpe(&factors);
            let score = |a: &DiscreteValues| -> f64 {
                factors.iter().map(|f| f.value(a).unwrap_or(0.0)).product()
            };
            assert_relative_eq!(score(&fast), score(&slow), epsilon = 1e-12);
        }
        Ok(())
    }
}
