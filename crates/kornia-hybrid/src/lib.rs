#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Hybrid
//!
//! Incremental smoothing of estimation problems that mix continuous variables
//! (poses) with discrete hypotheses (which odometry reading is right, whether a
//! loop closure is real).
//!
//! ## Key Features
//!
//! - **Incremental updates**: each batch only re-eliminates the part of the
//!   posterior it touches
//! - **Hypothesis pruning**: the number of live discrete assignments stays bounded
//!   and dominant hypotheses are fixed for good
//! - **MPE extraction**: most probable discrete assignment and the matching
//!   continuous estimate
//!
//! ## Example: ambiguous odometry
//!
//! ```rust
//! use kornia_hybrid::{
//!     DiscreteKey, HybridFactorGraph, HybridGaussianFactor, HybridSmoother, JacobianFactor, Key,
//!     NoiseModel,
//! };
//! use nalgebra::DVector;
//!
//! let noise = NoiseModel::isotropic(1, 0.1)?;
//! let (x0, x1) = (Key::symbol('x', 0), Key::symbol('x', 1));
//! let m0 = DiscreteKey::new(Key::symbol('m', 0), 2);
//!
//! // two candidate readings of the same motion, plus an absolute fix on x1
//! let mut graph = HybridFactorGraph::new();
//! graph.push(JacobianFactor::prior(x0, DVector::from_vec(vec![0.0]), &noise)?);
//! let candidates = [1.0, 3.0]
//!     .iter()
//!     .map(|d| -> Result<_, kornia_hybrid::HybridError> {
//!         let f = JacobianFactor::between(x0, x1, DVector::from_vec(vec![*d]), &noise)?;
//!         Ok((f, noise.neg_log_constant()))
//!     })
//!     .collect::<Result<Vec<_>, kornia_hybrid::HybridError>>()?;
//! graph.push(HybridGaussianFactor::new(vec![m0], candidates)?);
//! graph.push(JacobianFactor::prior(x1, DVector::from_vec(vec![3.0]), &noise)?);
//!
//! let mut smoother = HybridSmoother::new(Default::default())?;
//! smoother.update(&graph, Some(1), None)?;
//! assert_eq!(smoother.fixed_values().get(&m0.key), Some(&1));
//! # Ok::<(), kornia_hybrid::HybridError>(())
//! ```

/// Conditional carry-forward between updates.
pub mod carry_forward;

/// Tagged conditionals and hybrid Bayes nets.
pub mod conditional;

/// Discrete factors, conditionals and max-product inference.
pub mod discrete;

/// Sequential elimination of hybrid factor graphs.
pub mod elimination;

/// Error types.
pub mod error;

/// Tagged factors and hybrid factor graphs.
pub mod factor;

/// Linear Gaussian factors and conditionals.
pub mod gaussian;

/// Gaussian mixtures indexed by discrete keys.
pub mod hybrid;

/// Variable keys and their registry.
pub mod key;

/// Diagonal Gaussian noise models.
pub mod noise;

/// Elimination ordering.
pub mod ordering;

/// Posterior arena.
pub mod posterior;

/// Pruning of discrete hypotheses.
pub mod prune;

/// The incremental smoother.
pub mod smoother;

/// Dense decision tables.
pub mod table;

/// Continuous and hybrid solution values.
pub mod values;

pub use conditional::{Conditional, HybridBayesNet};
pub use discrete::{DiscreteConditional, DiscreteFactor};
pub use error::{ConsistencyError, HybridError, HybridResult};
pub use factor::{HybridFactor, HybridFactorGraph};
pub use gaussian::{GaussianBayesNet, GaussianConditional, JacobianFactor};
pub use hybrid::{GaussianBranch, HybridGaussianConditional, HybridGaussianFactor};
pub use key::{DiscreteKey, Key, KeyRegistry, VariableKind};
pub use noise::NoiseModel;
pub use ordering::Ordering;
pub use posterior::{ConditionalId, Posterior};
pub use smoother::{HybridSmoother, KeepLastPolicy, SmootherConfig, SmootherState, UpdateSummary};
pub use table::{DecisionTable, DiscreteValues, Leaf};
pub use values::{HybridValues, VectorValues};
