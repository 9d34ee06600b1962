use thiserror::Error;

use crate::key::Key;

/// Internal-consistency failures of the posterior.
///
/// These are never recoverable: once raised, the posterior can no longer be trusted
/// to produce meaningful estimates and the caller should discard the smoother.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyError {
    /// The selected discrete assignment points at a pruned branch.
    #[error("Assignment selects a pruned branch of the conditional on {frontal}")]
    PrunedBranchSelected {
        /// Frontal key of the offending conditional.
        frontal: Key,
    },

    /// The selected discrete assignment points at a branch that was never created.
    #[error("Assignment selects a missing branch of the conditional on {frontal}")]
    AbsentBranchSelected {
        /// Frontal key of the offending conditional.
        frontal: Key,
    },

    /// Every hypothesis of a mixture has been pruned away.
    #[error("All branches pruned in the mixture involving {0}")]
    AllBranchesPruned(Key),

    /// A conditional id is not present in the posterior.
    #[error("Conditional #{0} is not present in the posterior")]
    MissingConditional(u64),

    /// Back-substitution reached a conditional whose parent is not solved yet.
    #[error("Parent {parent} of {frontal} is not solved during back-substitution")]
    UnsolvedParent {
        /// Frontal key being solved.
        frontal: Key,
        /// Parent key without a value.
        parent: Key,
    },
}

/// Error type for the hybrid smoother.
#[derive(Debug, Error)]
pub enum HybridError {
    /// The marginal pruning threshold is outside of `(0, 1]`.
    #[error("Marginal threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    /// The maximum number of leaves must be at least one.
    #[error("Maximum number of leaves must be at least 1, got {0}")]
    InvalidMaxLeaves(usize),

    /// A caller supplied ordering is not valid for the graph.
    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    /// A key is used both as continuous and as discrete variable.
    #[error("Key {0} is used both as a continuous and as a discrete variable")]
    KeyKindMismatch(Key),

    /// A continuous key appears with different dimensions.
    #[error("Dimension mismatch for {key}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Key with the mismatch.
        key: Key,
        /// Dimension already known.
        expected: usize,
        /// Dimension found.
        actual: usize,
    },

    /// A discrete key appears with different cardinalities.
    #[error("Cardinality mismatch for {key}: expected {expected}, got {actual}")]
    CardinalityMismatch {
        /// Key with the mismatch.
        key: Key,
        /// Cardinality already known.
        expected: usize,
        /// Cardinality found.
        actual: usize,
    },

    /// A table could not be built from the given data.
    #[error("Invalid table: {0}")]
    InvalidTable(String),

    /// A noise model could not be built from the given data.
    #[error("Invalid noise model: {0}")]
    InvalidNoiseModel(String),

    /// A value required for evaluation is missing.
    #[error("Missing value for {0}")]
    MissingValue(Key),

    /// Elimination of a key found fewer equations than unknowns.
    #[error("Under-determined system when eliminating {key}: {rows} rows for dimension {dim}")]
    Underdetermined {
        /// Key being eliminated.
        key: Key,
        /// Rows available.
        rows: usize,
        /// Frontal dimension.
        dim: usize,
    },

    /// Elimination produced a numerically singular pivot.
    #[error("Indeterminant system when eliminating {0}")]
    Indeterminant(Key),

    /// A key in the ordering has no factor left to eliminate it from.
    #[error("No factor involves {0}")]
    MissingFactor(Key),

    /// Internal-consistency failure.
    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
}

/// Result type for the hybrid smoother.
pub type HybridResult<T> = Result<T, HybridError>;
