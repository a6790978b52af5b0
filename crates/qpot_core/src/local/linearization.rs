//! Linearization of the drift around a stable equilibrium.
//!
//! For the linear flow `b(x) = J (x - x*)` the quasi-potential is the
//! quadratic form `U(d) = ¼ dᵀ Σ⁻¹ d`, where `Σ` solves the Lyapunov equation
//! `J Σ + Σ Jᵀ = -I`. The local solver uses it to seed the cells next to the
//! equilibrium, where straight-segment updates from a single node are poor for
//! rotational drifts.

use crate::error::{QpotError, Result};
use crate::traits::DriftField;
use nalgebra::{Matrix2, Matrix3, Vector3};
use num_complex::Complex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedLinearization {
    pub jacobian: [[f64; 2]; 2],
    pub eigenvalues: [Complex<f64>; 2],
    /// Stationary covariance `Σ` of the linearized process (unit noise).
    pub covariance: [[f64; 2]; 2],
    /// `¼ Σ⁻¹`, so that `U(d) = dᵀ P d`.
    pub precision: [[f64; 2]; 2],
}

impl SeedLinearization {
    /// Linearizes `drift` at `(x, y)`.
    ///
    /// Fails with a numerical error when the Jacobian is not finite, the
    /// point is not linearly stable, or the Lyapunov equation has no
    /// positive-definite solution.
    pub fn at(drift: &(impl DriftField + ?Sized), x: f64, y: f64) -> Result<Self> {
        let jacobian = drift.jacobian(x, y);
        if jacobian.iter().flatten().any(|v| !v.is_finite()) {
            return Err(QpotError::numerical(format!(
                "Jacobian at ({x}, {y}) is not finite."
            )));
        }

        let eigenvalues = compute_eigenvalues(&jacobian);
        if eigenvalues.iter().any(|lambda| lambda.re >= 0.0) {
            return Err(QpotError::numerical(format!(
                "({x}, {y}) is not linearly stable: eigenvalues {} and {}.",
                eigenvalues[0], eigenvalues[1]
            )));
        }

        let covariance = solve_lyapunov(&jacobian)?;
        let [[a, b], [_, c]] = covariance;
        let det = a * c - b * b;
        if a <= 0.0 || det <= 0.0 {
            return Err(QpotError::numerical(
                "Lyapunov solution is not positive definite.",
            ));
        }
        let scale = 0.25 / det;
        let precision = [[scale * c, -scale * b], [-scale * b, scale * a]];

        Ok(Self {
            jacobian,
            eigenvalues,
            covariance,
            precision,
        })
    }

    /// Quadratic quasi-potential at displacement `(dx, dy)` from the
    /// equilibrium.
    pub fn quadratic_potential(&self, dx: f64, dy: f64) -> f64 {
        let [[p00, p01], [p10, p11]] = self.precision;
        dx * (p00 * dx + p01 * dy) + dy * (p10 * dx + p11 * dy)
    }
}

fn compute_eigenvalues(jacobian: &[[f64; 2]; 2]) -> [Complex<f64>; 2] {
    let matrix = Matrix2::new(
        jacobian[0][0],
        jacobian[0][1],
        jacobian[1][0],
        jacobian[1][1],
    );
    let eigenvalues = matrix.complex_eigenvalues();
    [eigenvalues[0], eigenvalues[1]]
}

/// Solves `J Σ + Σ Jᵀ = -I` for symmetric `Σ = [[a, b], [b, c]]`.
fn solve_lyapunov(jacobian: &[[f64; 2]; 2]) -> Result<[[f64; 2]; 2]> {
    let [[j11, j12], [j21, j22]] = *jacobian;
    #[rustfmt::skip]
    let system = Matrix3::new(
        2.0 * j11, 2.0 * j12, 0.0,
        j21,       j11 + j22, j12,
        0.0,       2.0 * j21, 2.0 * j22,
    );
    let rhs = Vector3::new(-1.0, 0.0, -1.0);
    let solution = system
        .lu()
        .solve(&rhs)
        .ok_or_else(|| QpotError::numerical("Lyapunov system is singular."))?;
    if solution.iter().any(|v| !v.is_finite()) {
        return Err(QpotError::numerical("Lyapunov solution is not finite."));
    }
    Ok([[solution[0], solution[1]], [solution[1], solution[2]]])
}
