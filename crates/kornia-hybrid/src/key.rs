use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HybridError, HybridResult};

const CHR_BITS: u32 = 8;
const INDEX_BITS: u32 = u64::BITS - CHR_BITS;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Opaque identifier of a continuous or discrete variable.
///
/// Keys built with [`Key::symbol`] pack a character tag in the upper byte and an
/// index in the remaining bits, and are printed as `x3`, `m0`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(u64);

impl Key {
    /// Create a key from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Create a key from a character tag and an index.
    pub const fn symbol(chr: char, index: u64) -> Self {
        Self(((chr as u64 & 0xff) << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// The raw value of the key.
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// The character tag of the key, `None` for untagged keys.
    pub fn chr(&self) -> Option<char> {
        let c = (self.0 >> INDEX_BITS) as u8;
        c.is_ascii_alphabetic().then_some(c as char)
    }

    /// The index part of the key.
    pub const fn index(&self) -> u64 {
        self.0 & INDEX_MASK
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chr() {
            Some(c) => write!(f, "{}{}", c, self.index()),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A discrete variable: its key and the number of values it can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiscreteKey {
    /// Key of the variable.
    pub key: Key,
    /// Number of values, at least one.
    pub cardinality: usize,
}

impl DiscreteKey {
    /// Create a discrete key.
    pub const fn new(key: Key, cardinality: usize) -> Self {
        Self { key, cardinality }
    }
}

impl fmt::Display for DiscreteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.key, self.cardinality)
    }
}

/// The kind of a registered variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Vector valued variable of the given dimension.
    Continuous(usize),
    /// Discrete variable of the given cardinality.
    Discrete(usize),
}

/// Bookkeeping of every variable a smoother has seen.
///
/// Once registered, a key keeps its kind and its dimension or cardinality.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    kinds: BTreeMap<Key, VariableKind>,
}

impl KeyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a continuous key, or check it against a previous registration.
    pub fn register_continuous(&mut self, key: Key, dim: usize) -> HybridResult<()> {
        match self.kinds.get(&key) {
            None => {
                self.kinds.insert(key, VariableKind::Continuous(dim));
                Ok(())
            }
            Some(VariableKind::Continuous(d)) if *d == dim => Ok(()),
            Some(VariableKind::Continuous(d)) => Err(HybridError::DimensionMismatch {
                key,
                expected: *d,
                actual: dim,
            }),
            Some(VariableKind::Discrete(_)) => Err(HybridError::KeyKindMismatch(key)),
        }
    }

    /// Register a discrete key, or check it against a previous registration.
    pub fn register_discrete(&mut self, dkey: DiscreteKey) -> HybridResult<()> {
        if dkey.cardinality == 0 {
            return Err(HybridError::CardinalityMismatch {
                key: dkey.key,
                expected: 1,
                actual: 0,
            });
        }
        match self.kinds.get(&dkey.key) {
            None => {
                self.kinds
                    .insert(dkey.key, VariableKind::Discrete(dkey.cardinality));
                Ok(())
            }
            Some(VariableKind::Discrete(c)) if *c == dkey.cardinality => Ok(()),
            Some(VariableKind::Discrete(c)) => Err(HybridError::CardinalityMismatch {
                key: dkey.key,
                expected: *c,
                actual: dkey.cardinality,
            }),
            Some(VariableKind::Continuous(_)) => Err(HybridError::KeyKindMismatch(dkey.key)),
        }
    }

    /// Kind of a registered key.
    pub fn kind(&self, key: Key) -> Option<VariableKind> {
        self.kinds.get(&key).copied()
    }

    /// Cardinality of a registered discrete key.
    pub fn cardinality(&self, key: Key) -> Option<usize> {
        match self.kinds.get(&key) {
            Some(VariableKind::Discrete(c)) => Some(*c),
            _ => None,
        }
    }

    /// All registered discrete keys, sorted by key.
    pub fn discrete_keys(&self) -> Vec<DiscreteKey> {
        self.kinds
            .iter()
            .filter_map(|(k, kind)| match kind {
                VariableKind::Discrete(c) => Some(DiscreteKey::new(*k, *c)),
                VariableKind::Continuous(_) => None,
            })
            .collect()
    }

    /// All registered continuous keys, sorted by key.
    pub fn continuous_keys(&self) -> Vec<Key> {
        self.kinds
            .iter()
            .filter_map(|(k, kind)| matches!(kind, VariableKind::Continuous(_)).then_some(*k))
            .collect()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether no key has been registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_roundtrip() {
        let key = Key::symbol('x', 42);
        assert_eq!(key.chr(), Some('x'));
        assert_eq!(key.index(), 42);
        assert_eq!(key.to_string(), "x42");
        assert_eq!(Key::new(7).to_string(), "7");
    }

    #[test]
    fn test_symbol_ordering_groups_by_tag() {
        assert!(Key::symbol('m', 100) < Key::symbol('x', 0));
        assert!(Key::symbol('x', 1) < Key::symbol('x', 2));
    }

    #[test]
    fn test_registry_rejects_kind_switch() {
        let mut registry = KeyRegistry::new();
        let x0 = Key::symbol('x', 0);
        registry.register_continuous(x0, 3).unwrap();
        assert!(registry.register_continuous(x0, 3).is_ok());
        assert!(matches!(
            registry.register_continuous(x0, 2),
            Err(HybridError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            registry.register_discrete(DiscreteKey::new(x0, 2)),
            Err(HybridError::KeyKindMismatch(_))
        ));
    }

    #[test]
    fn test_registry_discrete_bookkeeping() {
        let mut registry = KeyRegistry::new();
        let m0 = DiscreteKey::new(Key::symbol('m', 0), 2);
        let m1 = DiscreteKey::new(Key::symbol('m', 1), 3);
        registry.register_discrete(m1).unwrap();
        registry.register_discrete(m0).unwrap();
        registry.register_continuous(Key::symbol('x', 0), 3).unwrap();
        assert_eq!(registry.discrete_keys(), vec![m0, m1]);
        assert_eq!(registry.cardinality(m1.key), Some(3));
        assert_eq!(registry.continuous_keys(), vec![Key::symbol('x', 0)]);
        assert!(matches!(
            registry.register_discrete(DiscreteKey::new(m0.key, 4)),
            Err(HybridError::CardinalityMismatch { .. })
        ));
    }
}
