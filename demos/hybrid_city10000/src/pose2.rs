use std::ops::Mul;

use nalgebra::{Matrix3, Vector2, Vector3};

/// Below this angle the exponential and logarithm use their first order forms.
const SMALL_ANGLE: f64 = 1e-10;

/// Rigid motion in the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose2 {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

fn wrap_angle(theta: f64) -> f64 {
    theta.sin().atan2(theta.cos())
}

impl Pose2 {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: wrap_angle(theta),
        }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    fn rotate(&self, v: &Vector2<f64>) -> Vector2<f64> {
        let (s, c) = self.theta.sin_cos();
        Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y)
    }

    fn unrotate(&self, v: &Vector2<f64>) -> Vector2<f64> {
        let (s, c) = self.theta.sin_cos();
        Vector2::new(c * v.x + s * v.y, -s * v.x + c * v.y)
    }

    pub fn inverse(&self) -> Self {
        let t = -self.unrotate(&self.translation());
        Self::new(t.x, t.y, -self.theta)
    }

    /// Relative motion `self⁻¹ · other`.
    pub fn between(&self, other: &Pose2) -> Pose2 {
        self.inverse() * *other
    }

    /// Exponential map of a tangent vector `(vx, vy, ω)`.
    pub fn exp(xi: &Vector3<f64>) -> Self {
        let (v, w) = (Vector2::new(xi.x, xi.y), xi.z);
        if w.abs() < SMALL_ANGLE {
            return Self::new(v.x, v.y, w);
        }
        let rotation = Self::new(0.0, 0.0, w);
        let v_ortho = Vector2::new(-v.y, v.x);
        let t = (v_ortho - rotation.rotate(&v_ortho)) / w;
        Self::new(t.x, t.y, w)
    }

    /// Logarithm map, the inverse of [`Pose2::exp`].
    pub fn log(&self) -> Vector3<f64> {
        let w = self.theta;
        if w.abs() < SMALL_ANGLE {
            return Vector3::new(self.x, self.y, w);
        }
        let (s, c) = w.sin_cos();
        let c_1 = c - 1.0;
        let det = c_1 * c_1 + s * s;
        let t = self.translation();
        let d = self.unrotate(&t) - t;
        let v = Vector2::new(-d.y, d.x) * (w / det);
        Vector3::new(v.x, v.y, w)
    }

    /// Adjoint map in `(x, y, θ)` tangent coordinates.
    pub fn adjoint(&self) -> Matrix3<f64> {
        let (s, c) = self.theta.sin_cos();
        Matrix3::new(c, -s, self.y, s, c, -self.x, 0.0, 0.0, 1.0)
    }

    /// Apply a tangent space update on the right.
    pub fn retract(&self, delta: &Vector3<f64>) -> Pose2 {
        *self * Self::exp(delta)
    }
}

impl Mul for Pose2 {
    type Output = Pose2;

    fn mul(self, rhs: Pose2) -> Pose2 {
        let t = self.translation() + self.rotate(&rhs.translation());
        Pose2::new(t.x, t.y, self.theta + rhs.theta)
    }
}
