//! Corrector for applying robust loss functions to whitened linear systems.
//!
//! Given a whitened residual `r`, `s = ||r||²` and a loss `ρ`, the corrector rescales
//! the residual and every Jacobian block so that a plain least-squares step on the
//! corrected system matches the robustified objective to second order:
//!
//! ```text
//! r̃ = √ρ'(s) / (1 - α) · r
//! J̃ = √ρ'(s) · (J - (α / s) · r rᵀ J)
//! α = 1 - √(1 + 2 s ρ''(s) / ρ'(s))
//! ```
//!
//! Based on the Ceres Solver implementation:
//! <https://github.com/ceres-solver/ceres-solver/blob/master/internal/ceres/corrector.cc>

use crate::core::loss_functions::LossFunction;
use nalgebra::{DMatrix, DVector};

/// Precomputed scaling factors for one residual.
#[derive(Debug, Clone)]
pub struct Corrector {
    sqrt_rho1: f64,
    residual_scaling: f64,
    alpha_sq_norm: f64,
}

impl Corrector {
    /// Evaluate the loss at the squared norm `sq_norm = ||r||²`.
    pub fn new(loss_function: &dyn LossFunction, sq_norm: f64) -> Self {
        let [_, rho_1, rho_2] = loss_function.evaluate(sq_norm);
        let sqrt_rho1 = rho_1.sqrt();

        // No curvature term: plain reweighting.
        if sq_norm == 0.0 || rho_2 <= 0.0 {
            return Self {
                sqrt_rho1,
                residual_scaling: sqrt_rho1,
                alpha_sq_norm: 0.0,
            };
        }

        // Root of 0.5·α² - α - (ρ''/ρ')·s = 0.
        let d = 1.0 + 2.0 * sq_norm * rho_2 / rho_1;
        let alpha = 1.0 - d.sqrt();

        Self {
            sqrt_rho1,
            residual_scaling: sqrt_rho1 / (1.0 - alpha),
            alpha_sq_norm: alpha / sq_norm,
        }
    }

    /// Correct one Jacobian block. `residual` is the uncorrected residual.
    pub fn correct_jacobian(&self, residual: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
        if self.alpha_sq_norm == 0.0 {
            *jacobian *= self.sqrt_rho1;
            return;
        }

        let r_rtj = residual * (residual.transpose() * &*jacobian);
        *jacobian = (&*jacobian - r_rtj * self.alpha_sq_norm) * self.sqrt_rho1;
    }

    pub fn correct_residuals(&self, residual: &mut DVector<f64>) {
        *residual *= self.residual_scaling;
    }
}
