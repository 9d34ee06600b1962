//! Dense tables indexed by discrete assignments.
//!
//! A [`DecisionTable`] stores one leaf per joint assignment of its discrete keys in
//! row-major order: the first key is the most significant digit. Leaves of mixtures
//! are [`Leaf`] values so that a pruned hypothesis is never confused with one that
//! was never created.

use std::collections::BTreeMap;

use crate::error::{ConsistencyError, HybridError, HybridResult};
use crate::key::{DiscreteKey, Key};

/// Assignment of values to discrete keys.
pub type DiscreteValues = BTreeMap<Key, usize>;

/// A leaf of a mixture table.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf<T> {
    /// The hypothesis is alive and carries a value.
    Live(T),
    /// The hypothesis was deliberately removed by pruning.
    Pruned,
    /// The hypothesis never existed.
    Absent,
}

impl<T> Leaf<T> {
    /// Whether the leaf carries a value.
    pub fn is_live(&self) -> bool {
        matches!(self, Leaf::Live(_))
    }

    /// The value of a live leaf.
    pub fn as_live(&self) -> Option<&T> {
        match self {
            Leaf::Live(v) => Some(v),
            _ => None,
        }
    }

    /// Map the value of a live leaf, keeping the pruned and absent markers.
    pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> Leaf<U> {
        match self {
            Leaf::Live(v) => Leaf::Live(f(v)),
            Leaf::Pruned => Leaf::Pruned,
            Leaf::Absent => Leaf::Absent,
        }
    }

    /// The value of a live leaf, or the consistency error matching the marker.
    pub fn live_or_err(&self, frontal: Key) -> Result<&T, ConsistencyError> {
        match self {
            Leaf::Live(v) => Ok(v),
            Leaf::Pruned => Err(ConsistencyError::PrunedBranchSelected { frontal }),
            Leaf::Absent => Err(ConsistencyError::AbsentBranchSelected { frontal }),
        }
    }
}

/// Number of joint assignments of a set of discrete keys.
pub fn num_assignments(keys: &[DiscreteKey]) -> usize {
    keys.iter().map(|k| k.cardinality).product()
}

/// Decode a row-major table index into an assignment.
pub fn assignment_at(keys: &[DiscreteKey], mut index: usize) -> DiscreteValues {
    let mut values = DiscreteValues::new();
    for dkey in keys.iter().rev() {
        values.insert(dkey.key, index % dkey.cardinality);
        index /= dkey.cardinality;
    }
    values
}

/// Iterate every joint assignment of `keys` in table order.
pub fn assignments(keys: &[DiscreteKey]) -> impl Iterator<Item = DiscreteValues> + '_ {
    (0..num_assignments(keys)).map(move |i| assignment_at(keys, i))
}

/// Sorted union of discrete keys.
pub fn merge_keys<'a>(sets: impl IntoIterator<Item = &'a [DiscreteKey]>) -> Vec<DiscreteKey> {
    let mut merged: BTreeMap<Key, usize> = BTreeMap::new();
    for set in sets {
        for dkey in set {
            merged.insert(dkey.key, dkey.cardinality);
        }
    }
    merged
        .into_iter()
        .map(|(k, c)| DiscreteKey::new(k, c))
        .collect()
}

/// A table with one leaf per joint assignment of its discrete keys.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTable<T> {
    keys: Vec<DiscreteKey>,
    leaves: Vec<T>,
}

impl<T> DecisionTable<T> {
    /// Create a table from its keys and row-major leaves.
    pub fn new(keys: Vec<DiscreteKey>, leaves: Vec<T>) -> HybridResult<Self> {
        for (i, dkey) in keys.iter().enumerate() {
            if dkey.cardinality == 0 {
                return Err(HybridError::InvalidTable(format!(
                    "{} has cardinality zero",
                    dkey.key
                )));
            }
            if keys[..i].iter().any(|k| k.key == dkey.key) {
                return Err(HybridError::InvalidTable(format!(
                    "{} appears twice",
                    dkey.key
                )));
            }
        }
        let expected = num_assignments(&keys);
        if leaves.len() != expected {
            return Err(HybridError::InvalidTable(format!(
                "expected {} leaves, got {}",
                expected,
                leaves.len()
            )));
        }
        Ok(Self { keys, leaves })
    }

    /// Create a table by evaluating `f` on every assignment.
    ///
    /// Keys must be unique with non-zero cardinalities.
    pub fn from_fn(keys: Vec<DiscreteKey>, mut f: impl FnMut(&DiscreteValues) -> T) -> Self {
        let leaves = assignments(&keys).map(|a| f(&a)).collect();
        Self { keys, leaves }
    }

    /// A table without keys holding a single leaf.
    pub fn constant(value: T) -> Self {
        Self {
            keys: Vec::new(),
            leaves: vec![value],
        }
    }

    /// The discrete keys of the table, in layout order.
    pub fn keys(&self) -> &[DiscreteKey] {
        &self.keys
    }

    /// The leaves in row-major order.
    pub fn leaves(&self) -> &[T] {
        &self.leaves
    }

    /// Mutable access to the leaves in row-major order.
    pub fn leaves_mut(&mut self) -> &mut [T] {
        &mut self.leaves
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the table has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Whether the table has a given key.
    pub fn contains_key(&self, key: Key) -> bool {
        self.keys.iter().any(|k| k.key == key)
    }

    /// Row-major index of an assignment; extra keys are ignored.
    pub fn index_of(&self, values: &DiscreteValues) -> Option<usize> {
        let mut index = 0;
        for dkey in &self.keys {
            let v = *values.get(&dkey.key)?;
            if v >= dkey.cardinality {
                return None;
            }
            index = index * dkey.cardinality + v;
        }
        Some(index)
    }

    /// The assignment of the leaf at `index`.
    pub fn assignment(&self, index: usize) -> DiscreteValues {
        assignment_at(&self.keys, index)
    }

    /// The leaf matching an assignment.
    pub fn get(&self, values: &DiscreteValues) -> Option<&T> {
        self.index_of(values).map(|i| &self.leaves[i])
    }

    /// Iterate over `(assignment, leaf)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (DiscreteValues, &T)> + '_ {
        self.leaves
            .iter()
            .enumerate()
            .map(move |(i, leaf)| (self.assignment(i), leaf))
    }

    /// Map every leaf into a new table with the same keys.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> DecisionTable<U> {
        DecisionTable {
            keys: self.keys.clone(),
            leaves: self.leaves.iter().map(f).collect(),
        }
    }
}

impl<T: Clone> DecisionTable<T> {
    /// Drop the keys present in `fixed`, keeping the leaves that agree with it.
    pub fn restrict(&self, fixed: &DiscreteValues) -> Self {
        let kept: Vec<DiscreteKey> = self
            .keys
            .iter()
            .filter(|k| !fixed.contains_key(&k.key))
            .copied()
            .collect();
        if kept.len() == self.keys.len() {
            return self.clone();
        }
        let leaves = assignments(&kept)
            .map(|mut a| {
                for dkey in &self.keys {
                    if let Some(v) = fixed.get(&dkey.key) {
                        a.insert(dkey.key, *v);
                    }
                }
                // values of fixed keys were validated against the registry
                let index = self.index_of(&a).unwrap_or(0);
                self.leaves[index].clone()
            })
            .collect();
        Self { keys: kept, leaves }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(c: char, i: u64, card: usize) -> DiscreteKey {
        DiscreteKey::new(Key::symbol(c, i), card)
    }

    #[test]
    fn test_row_major_layout() {
        let a = k('m', 0, 2);
        let b = k('m', 1, 3);
        let table = DecisionTable::new(vec![a, b], (0..6).collect::<Vec<_>>()).unwrap();
        let values = DiscreteValues::from([(a.key, 1), (b.key, 2)]);
        assert_eq!(table.index_of(&values), Some(5));
        assert_eq!(table.get(&values), Some(&5));
        assert_eq!(table.assignment(3), DiscreteValues::from([(a.key, 1), (b.key, 0)]));
    }

    #[test]
    fn test_new_rejects_bad_layout() {
        let a = k('m', 0, 2);
        assert!(DecisionTable::new(vec![a], vec![1.0]).is_err());
        assert!(DecisionTable::new(vec![a, a], vec![1.0; 4]).is_err());
        assert!(DecisionTable::new(vec![k('m', 1, 0)], Vec::<f64>::new()).is_err());
    }

    #[test]
    fn test_restrict_drops_fixed_keys() {
        let a = k('m', 0, 2);
        let b = k('m', 1, 3);
        let table = DecisionTable::from_fn(vec![a, b], |v| v[&a.key] * 10 + v[&b.key]);
        let restricted = table.restrict(&DiscreteValues::from([(a.key, 1)]));
        assert_eq!(restricted.keys(), &[b]);
        assert_eq!(restricted.leaves(), &[10, 11, 12]);
    }

    #[test]
    fn test_merge_keys_sorted_union() {
        let a = k('m', 0, 2);
        let b = k('m', 1, 3);
        let c = k('l', 0, 2);
        let merged = merge_keys([&[b, a][..], &[c, a][..]]);
        assert_eq!(merged, vec![c, a, b]);
    }

    #[test]
    fn test_leaf_markers() {
        let leaf: Leaf<u8> = Leaf::Pruned;
        assert!(!leaf.is_live());
        assert_eq!(
            leaf.live_or_err(Key::symbol('x', 1)),
            Err(ConsistencyError::PrunedBranchSelected {
                frontal: Key::symbol('x', 1)
            })
        );
        assert_eq!(Leaf::Live(2u8).map(|v| v * 2), Leaf::Live(4u8));
    }
}
