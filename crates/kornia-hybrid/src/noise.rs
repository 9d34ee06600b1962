use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{HybridError, HybridResult};

/// Gaussian measurement noise with independent components.
///
/// Noise models are passed explicitly to every factor constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NoiseModel {
    /// Same standard deviation for every component.
    Isotropic {
        /// Dimension of the measurement.
        dim: usize,
        /// Standard deviation.
        sigma: f64,
    },
    /// One standard deviation per component.
    Diagonal {
        /// Standard deviations.
        sigmas: Vec<f64>,
    },
}

impl NoiseModel {
    /// Isotropic noise of dimension `dim`.
    pub fn isotropic(dim: usize, sigma: f64) -> HybridResult<Self> {
        if dim == 0 || !(sigma.is_finite() && sigma > 0.0) {
            return Err(HybridError::InvalidNoiseModel(format!(
                "isotropic model needs dim > 0 and sigma > 0, got dim {dim} sigma {sigma}"
            )));
        }
        Ok(Self::Isotropic { dim, sigma })
    }

    /// Diagonal noise from per component standard deviations.
    pub fn diagonal(sigmas: &[f64]) -> HybridResult<Self> {
        if sigmas.is_empty() || sigmas.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(HybridError::InvalidNoiseModel(format!(
                "diagonal model needs positive sigmas, got {sigmas:?}"
            )));
        }
        Ok(Self::Diagonal {
            sigmas: sigmas.to_vec(),
        })
    }

    /// Dimension of the measurement.
    pub fn dim(&self) -> usize {
        match self {
            NoiseModel::Isotropic { dim, .. } => *dim,
            NoiseModel::Diagonal { sigmas } => sigmas.len(),
        }
    }

    /// Standard deviation of component `i`.
    pub fn sigma(&self, i: usize) -> f64 {
        match self {
            NoiseModel::Isotropic { sigma, .. } => *sigma,
            NoiseModel::Diagonal { sigmas } => sigmas[i],
        }
    }

    /// Scale the rows of a matrix by the inverse standard deviations.
    pub fn whiten_matrix(&self, m: &mut DMatrix<f64>) -> HybridResult<()> {
        self.check_rows(m.nrows())?;
        for i in 0..m.nrows() {
            let w = 1.0 / self.sigma(i);
            m.row_mut(i).scale_mut(w);
        }
        Ok(())
    }

    /// Scale a vector by the inverse standard deviations.
    pub fn whiten_vector(&self, v: &mut DVector<f64>) -> HybridResult<()> {
        self.check_rows(v.len())?;
        for i in 0..v.len() {
            v[i] /= self.sigma(i);
        }
        Ok(())
    }

    /// Negative log of the normalization constant of the density,
    /// `n/2 log(2π) + Σ log σ_i`.
    pub fn neg_log_constant(&self) -> f64 {
        let n = self.dim();
        let log_det_sqrt: f64 = (0..n).map(|i| self.sigma(i).ln()).sum();
        0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln() + log_det_sqrt
    }

    fn check_rows(&self, rows: usize) -> HybridResult<()> {
        if rows != self.dim() {
            return Err(HybridError::InvalidNoiseModel(format!(
                "model of dimension {} applied to {} rows",
                self.dim(),
                rows
            )));
        }
        Ok(())
    }
}
