//! Pose graph factors and their linearization around the current estimate.

use std::collections::BTreeMap;

use kornia_hybrid::{
    DiscreteKey, HybridError, HybridFactor, HybridGaussianFactor, HybridResult, JacobianFactor,
    Key, NoiseModel,
};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::pose2::Pose2;

/// Linearization point of every pose.
pub type Values = BTreeMap<Key, Pose2>;

pub fn pose_key(i: u64) -> Key {
    Key::symbol('x', i)
}

pub fn mode_key(i: u64, cardinality: usize) -> DiscreteKey {
    DiscreteKey::new(Key::symbol('m', i), cardinality)
}

pub fn loop_key(i: u64) -> DiscreteKey {
    DiscreteKey::new(Key::symbol('l', i), 2)
}

pub fn prior_noise() -> HybridResult<NoiseModel> {
    NoiseModel::isotropic(3, 1e-4)
}

pub fn pose_noise() -> HybridResult<NoiseModel> {
    NoiseModel::diagonal(&[1.0 / 30.0, 1.0 / 30.0, 1.0 / 100.0])
}

/// Noise of a rejected loop closure.
pub fn open_loop_noise() -> HybridResult<NoiseModel> {
    NoiseModel::isotropic(3, 10.0)
}

fn to_dmatrix(m: &Matrix3<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(3, 3, |r, c| m[(r, c)])
}

fn to_dvector(v: &Vector3<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}

fn pose_at(values: &Values, key: Key) -> HybridResult<Pose2> {
    values.get(&key).copied().ok_or(HybridError::MissingValue(key))
}

/// A factor on poses, kept until it is linearized at the next smoother update.
#[derive(Debug, Clone)]
pub enum PoseFactor {
    Prior {
        key: Key,
        pose: Pose2,
    },
    Between {
        from: Key,
        to: Key,
        measured: Pose2,
    },
    /// One [`PoseFactor::Between`] per value of `mode`, all with the same noise.
    Odometry {
        mode: DiscreteKey,
        from: Key,
        to: Key,
        candidates: Vec<Pose2>,
    },
    /// Binary choice between an open loop and a tight loop closure.
    LoopClosure {
        indicator: DiscreteKey,
        from: Key,
        to: Key,
        measured: Pose2,
    },
}

impl PoseFactor {
    pub fn is_hybrid(&self) -> bool {
        matches!(self, Self::Odometry { .. } | Self::LoopClosure { .. })
    }

    /// Linearize in the tangent space of `values`.
    pub fn linearize(&self, values: &Values) -> HybridResult<HybridFactor> {
        match self {
            Self::Prior { key, pose } => {
                let error = pose.between(&pose_at(values, *key)?).log();
                let factor = JacobianFactor::with_noise(
                    vec![(*key, DMatrix::identity(3, 3))],
                    -to_dvector(&error),
                    &prior_noise()?,
                )?;
                Ok(factor.into())
            }
            Self::Between { from, to, measured } => {
                Ok(linearize_between(*from, *to, measured, &pose_noise()?, values)?.into())
            }
            Self::Odometry {
                mode,
                from,
                to,
                candidates,
            } => {
                let noise = pose_noise()?;
                let components = candidates
                    .iter()
                    .map(|m| -> HybridResult<_> {
                        let f = linearize_between(*from, *to, m, &noise, values)?;
                        Ok((f, noise.neg_log_constant()))
                    })
                    .collect::<HybridResult<Vec<_>>>()?;
                Ok(HybridGaussianFactor::new(vec![*mode], components)?.into())
            }
            Self::LoopClosure {
                indicator,
                from,
                to,
                measured,
            } => {
                let components = [open_loop_noise()?, pose_noise()?]
                    .iter()
                    .map(|noise| -> HybridResult<_> {
                        let f = linearize_between(*from, *to, measured, noise, values)?;
                        Ok((f, noise.neg_log_constant()))
                    })
                    .collect::<HybridResult<Vec<_>>>()?;
                Ok(HybridGaussianFactor::new(vec![*indicator], components)?.into())
            }
        }
    }
}

/// Linearize `Log(measured⁻¹ · T_from⁻¹ · T_to)` with right perturbations.
fn linearize_between(
    from: Key,
    to: Key,
    measured: &Pose2,
    noise: &NoiseModel,
    values: &Values,
) -> HybridResult<JacobianFactor> {
    let relative = pose_at(values, from)?.between(&pose_at(values, to)?);
    let error = measured.between(&relative).log();
    let h_from = -relative.inverse().adjoint();
    JacobianFactor::with_noise(
        vec![
            (from, to_dmatrix(&h_from)),
            (to, DMatrix::identity(3, 3)),
        ],
        -to_dvector(&error),
        noise,
    )
}
