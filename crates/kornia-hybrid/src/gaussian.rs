//! Linear Gaussian factors and conditionals in square-root information form.
//!
//! A [`JacobianFactor`] holds whitened rows `Σ A_k x_k - b`; eliminating one key from
//! a set of them by dense QR produces a [`GaussianConditional`] `R x + Σ S_k s_k = d`
//! and a remainder factor on the separator.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::error::{ConsistencyError, HybridError, HybridResult};
use crate::key::Key;
use crate::noise::NoiseModel;
use crate::values::VectorValues;

/// Pivots below this magnitude are treated as singular.
pub const PIVOT_TOLERANCE: f64 = 1e-9;

/// Whitened linear factor with error `½‖Σ A_k x_k - b‖²`.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
}

impl JacobianFactor {
    /// Create a factor from `(key, A_k)` terms and the right hand side `b`.
    pub fn new(terms: Vec<(Key, DMatrix<f64>)>, rhs: DVector<f64>) -> HybridResult<Self> {
        let mut keys = Vec::with_capacity(terms.len());
        let mut blocks = Vec::with_capacity(terms.len());
        for (key, block) in terms {
            if keys.contains(&key) {
                return Err(HybridError::InvalidTable(format!(
                    "{key} appears twice in a Gaussian factor"
                )));
            }
            if block.nrows() != rhs.len() {
                return Err(HybridError::DimensionMismatch {
                    key,
                    expected: rhs.len(),
                    actual: block.nrows(),
                });
            }
            keys.push(key);
            blocks.push(block);
        }
        Ok(Self { keys, blocks, rhs })
    }

    /// Create a factor and whiten it with a noise model.
    pub fn with_noise(
        terms: Vec<(Key, DMatrix<f64>)>,
        rhs: DVector<f64>,
        noise: &NoiseModel,
    ) -> HybridResult<Self> {
        let mut factor = Self::new(terms, rhs)?;
        for block in factor.blocks.iter_mut() {
            noise.whiten_matrix(block)?;
        }
        noise.whiten_vector(&mut factor.rhs)?;
        Ok(factor)
    }

    /// Prior `x = mean`.
    pub fn prior(key: Key, mean: DVector<f64>, noise: &NoiseModel) -> HybridResult<Self> {
        let dim = mean.len();
        Self::with_noise(vec![(key, DMatrix::identity(dim, dim))], mean, noise)
    }

    /// Relative measurement `x_to - x_from = measured`.
    pub fn between(
        from: Key,
        to: Key,
        measured: DVector<f64>,
        noise: &NoiseModel,
    ) -> HybridResult<Self> {
        let dim = measured.len();
        Self::with_noise(
            vec![
                (from, -DMatrix::identity(dim, dim)),
                (to, DMatrix::identity(dim, dim)),
            ],
            measured,
            noise,
        )
    }

    /// Keys of the factor.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Block `A_k` of a key.
    pub fn block(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.keys
            .iter()
            .position(|k| *k == key)
            .map(|i| &self.blocks[i])
    }

    /// Iterate over `(key, A_k)` terms.
    pub fn terms(&self) -> impl Iterator<Item = (Key, &DMatrix<f64>)> {
        self.keys.iter().copied().zip(self.blocks.iter())
    }

    /// Right hand side `b`.
    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    /// Whether the factor has no keys, so that its error is a constant.
    pub fn is_constant(&self) -> bool {
        self.keys.is_empty()
    }

    /// Residual `Σ A_k x_k - b`.
    pub fn residual(&self, values: &VectorValues) -> HybridResult<DVector<f64>> {
        let mut r = -self.rhs.clone();
        for (key, block) in self.terms() {
            let x = values.get(key).ok_or(HybridError::MissingValue(key))?;
            r += block * x;
        }
        Ok(r)
    }

    /// Error `½‖Σ A_k x_k - b‖²`.
    pub fn error(&self, values: &VectorValues) -> HybridResult<f64> {
        Ok(0.5 * self.residual(values)?.norm_squared())
    }

    /// Error of a factor without keys.
    pub fn constant_error(&self) -> f64 {
        0.5 * self.rhs.norm_squared()
    }
}

/// Gaussian density on one frontal key, `R x + Σ S_k s_k = d`, with `R` upper triangular.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianConditional {
    frontal: Key,
    r: DMatrix<f64>,
    parents: Vec<Key>,
    s: Vec<DMatrix<f64>>,
    d: DVector<f64>,
}

impl GaussianConditional {
    /// Create a conditional from its square-root information blocks.
    pub fn new(
        frontal: Key,
        r: DMatrix<f64>,
        parents: Vec<(Key, DMatrix<f64>)>,
        d: DVector<f64>,
    ) -> HybridResult<Self> {
        let n = d.len();
        if r.nrows() != n || r.ncols() != n {
            return Err(HybridError::DimensionMismatch {
                key: frontal,
                expected: n,
                actual: r.ncols(),
            });
        }
        if let Some((key, s)) = parents.iter().find(|(_, s)| s.nrows() != n) {
            return Err(HybridError::DimensionMismatch {
                key: *key,
                expected: n,
                actual: s.nrows(),
            });
        }
        let (parents, s) = parents.into_iter().unzip();
        Ok(Self {
            frontal,
            r,
            parents,
            s,
            d,
        })
    }

    /// The frontal key.
    pub fn frontal(&self) -> Key {
        self.frontal
    }

    /// The parent keys.
    pub fn parents(&self) -> &[Key] {
        &self.parents
    }

    /// Dimension of the frontal variable.
    pub fn dim(&self) -> usize {
        self.d.len()
    }

    /// Upper triangular block `R`.
    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    /// Right hand side `d`.
    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    /// Block `S_k` of a parent.
    pub fn parent_block(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.parents
            .iter()
            .position(|k| *k == key)
            .map(|i| &self.s[i])
    }

    /// Solve for the frontal given the parents, `x = R⁻¹ (d - Σ S_k s_k)`.
    pub fn solve(&self, parents: &VectorValues) -> HybridResult<DVector<f64>> {
        let mut rhs = self.d.clone();
        for (key, s) in self.parents.iter().zip(self.s.iter()) {
            let value = parents.get(*key).ok_or(ConsistencyError::UnsolvedParent {
                frontal: self.frontal,
                parent: *key,
            })?;
            rhs -= s * value;
        }
        self.r
            .solve_upper_triangular(&rhs)
            .ok_or(HybridError::Indeterminant(self.frontal))
    }

    /// Error `½‖R x + Σ S_k s_k - d‖²`.
    pub fn error(&self, values: &VectorValues) -> HybridResult<f64> {
        self.to_factor().error(values)
    }

    /// Negative log normalization constant, `n/2 log(2π) - Σ log|R_ii|`.
    pub fn neg_log_constant(&self) -> f64 {
        let n = self.dim();
        let log_det: f64 = (0..n).map(|i| self.r[(i, i)].abs().ln()).sum();
        0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln() - log_det
    }

    /// The conditional seen as a Jacobian factor `[R S | d]`.
    pub fn to_factor(&self) -> JacobianFactor {
        let keys = std::iter::once(self.frontal)
            .chain(self.parents.iter().copied())
            .collect();
        let blocks = std::iter::once(self.r.clone())
            .chain(self.s.iter().cloned())
            .collect();
        JacobianFactor {
            keys,
            blocks,
            rhs: self.d.clone(),
        }
    }
}

/// Purely continuous Bayes net, solved by back-substitution.
#[derive(Debug, Clone, Default)]
pub struct GaussianBayesNet {
    conditionals: Vec<GaussianConditional>,
}

impl GaussianBayesNet {
    /// Create an empty Bayes net.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a conditional.
    pub fn push(&mut self, conditional: GaussianConditional) {
        self.conditionals.push(conditional);
    }

    /// Iterate over the conditionals in order.
    pub fn iter(&self) -> impl Iterator<Item = &GaussianConditional> {
        self.conditionals.iter()
    }

    /// Number of conditionals.
    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    /// Whether the Bayes net is empty.
    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    /// Solve every frontal by back-substitution, last conditional first.
    pub fn optimize(&self) -> HybridResult<VectorValues> {
        let mut values = VectorValues::new();
        for conditional in self.conditionals.iter().rev() {
            let x = conditional.solve(&values)?;
            values.insert(conditional.frontal(), x);
        }
        Ok(values)
    }

    /// Sum of the conditional errors.
    pub fn error(&self, values: &VectorValues) -> HybridResult<f64> {
        self.conditionals.iter().map(|c| c.error(values)).sum()
    }
}

/// Eliminate `frontal` from a set of Gaussian factors.
///
/// Stacks the factors into `[A | b]` with the frontal columns first, runs a dense QR
/// and splits the triangular factor into the conditional on `frontal` and a remainder
/// factor on the separator keys. A remainder without rows comes back without keys.
pub fn eliminate_gaussian(
    factors: &[&JacobianFactor],
    frontal: Key,
) -> HybridResult<(GaussianConditional, JacobianFactor)> {
    let mut dims: BTreeMap<Key, usize> = BTreeMap::new();
    for factor in factors {
        for (key, block) in factor.terms() {
            let dim = *dims.entry(key).or_insert(block.ncols());
            if dim != block.ncols() {
                return Err(HybridError::DimensionMismatch {
                    key,
                    expected: dim,
                    actual: block.ncols(),
                });
            }
        }
    }
    let n = *dims.get(&frontal).ok_or(HybridError::MissingFactor(frontal))?;

    let separator: Vec<(Key, usize)> = dims
        .iter()
        .filter(|(k, _)| **k != frontal)
        .map(|(k, d)| (*k, *d))
        .collect();
    let mut offsets: BTreeMap<Key, usize> = BTreeMap::new();
    offsets.insert(frontal, 0);
    let mut cols = n;
    for (key, dim) in &separator {
        offsets.insert(*key, cols);
        cols += dim;
    }

    let rows: usize = factors.iter().map(|f| f.rows()).sum();
    if rows < n {
        return Err(HybridError::Underdetermined {
            key: frontal,
            rows,
            dim: n,
        });
    }

    let mut ab = DMatrix::<f64>::zeros(rows, cols + 1);
    let mut row = 0;
    for factor in factors {
        let m = factor.rows();
        for (key, block) in factor.terms() {
            let col = offsets[&key];
            ab.view_mut((row, col), (m, block.ncols())).copy_from(block);
        }
        for i in 0..m {
            ab[(row + i, cols)] = factor.rhs[i];
        }
        row += m;
    }

    let r = ab.qr().r();
    for i in 0..n {
        if r[(i, i)].abs() < PIVOT_TOLERANCE {
            return Err(HybridError::Indeterminant(frontal));
        }
    }

    let conditional = GaussianConditional {
        frontal,
        r: r.view((0, 0), (n, n)).into_owned(),
        parents: separator.iter().map(|(k, _)| *k).collect(),
        s: separator
            .iter()
            .map(|(k, d)| r.view((0, offsets[k]), (n, *d)).into_owned())
            .collect(),
        d: DVector::from_iterator(n, (0..n).map(|i| r[(i, cols)])),
    };

    let remaining = r.nrows() - n;
    let remainder = if remaining == 0 {
        JacobianFactor {
            keys: Vec::new(),
            blocks: Vec::new(),
            rhs: DVector::zeros(0),
        }
    } else {
        JacobianFactor {
            keys: separator.iter().map(|(k, _)| *k).collect(),
            blocks: separator
                .iter()
                .map(|(k, d)| r.view((n, offsets[k]), (remaining, *d)).into_owned())
                .collect(),
            rhs: DVector::from_iterator(remaining, (n..r.nrows()).map(|i| r[(i, cols)])),
        }
    };

    Ok((conditional, remainder))
}
