use std::collections::BTreeMap;

use nalgebra::DVector;

use crate::key::Key;
use crate::table::DiscreteValues;

/// Values of continuous variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    values: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    /// Create an empty set of values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value of a key.
    pub fn insert(&mut self, key: Key, value: DVector<f64>) {
        self.values.insert(key, value);
    }

    /// The value of a key.
    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    /// Whether a key has a value.
    pub fn contains(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    /// Iterate over `(key, value)` pairs sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &DVector<f64>)> {
        self.values.iter()
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(Key, DVector<f64>)> for VectorValues {
    fn from_iter<I: IntoIterator<Item = (Key, DVector<f64>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Joint solution of a hybrid problem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridValues {
    /// Continuous values.
    pub continuous: VectorValues,
    /// Discrete assignment.
    pub discrete: DiscreteValues,
}

impl HybridValues {
    /// Bundle continuous and discrete values.
    pub fn new(continuous: VectorValues, discrete: DiscreteValues) -> Self {
        Self {
            continuous,
            discrete,
        }
    }
}
