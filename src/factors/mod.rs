//! Nonlinear factors and their linearization.
//!
//! A factor connects a fixed, ordered set of variables and computes a residual
//! vector of fixed dimension from their current values:
//!
//! ```text
//! minimize Σ_i ||Σ_i^{-1/2} e_i(x)||²
//! ```
//!
//! Linearizing a factor around `x` yields a [`LinearSystem`]: one whitened Jacobian
//! block per key plus the right-hand side `b = -e(x)`, so that `A δ ≈ b` around `x`.
//!
//! # Factor Types
//!
//! - [`ExpressionFactor`]: measurement plus an [`Expression`](crate::expression::Expression)
//!   predicting it, with exact derivatives
//! - [`ExpressionFactor2`]: two-variable specialization with a typed `evaluate_error`
//! - [`PriorFactor`]: unary prior on a single variable
//! - [`BetweenFactor`]: relative measurement between two Lie group variables
//!
//! Any factor can be cross-checked against finite differences with
//! [`check_factor_jacobians`](crate::numerical::check::check_factor_jacobians).

use crate::core::noise_model::NoiseModel;
use crate::core::{CoreError, Key, Values};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

pub mod between_factor;
pub mod expression_factor;
pub mod linear_system;
pub mod prior_factor;

pub use between_factor::{BetweenFactor, BetweenRecipe};
pub use expression_factor::{
    ExpressionFactor, ExpressionFactor2, FactorSnapshot, NoRecipe, RebuildExpression,
};
pub use linear_system::LinearSystem;
pub use prior_factor::{PriorFactor, PriorRecipe};

/// Factor-specific error types
#[derive(Debug, Clone, Error)]
pub enum FactorError {
    /// Error raised by the variable container or a noise model
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Invalid dimension in factor construction or evaluation
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Factor constructed without a noise model
    #[error("Missing noise model: {0}")]
    MissingNoiseModel(String),

    /// Expression must be rebuilt but no recipe was provided
    #[error("Expression not provided: {0}")]
    ExpressionNotProvided(String),

    /// Analytic and numerical linearization disagree
    #[error("Jacobian mismatch: {0}")]
    JacobianMismatch(String),

    /// Invalid parameter values
    #[error("Invalid parameter values: {0}")]
    InvalidParameters(String),
}

impl FactorError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for factor operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Capability shared by every nonlinear factor.
///
/// Implementations must keep `keys()` and `dim()` fixed for the lifetime of the
/// factor, and never mutate the `Values` they are given.
pub trait NonlinearFactor: Send + Sync {
    /// Connected variables, in the order of the Jacobian blocks.
    fn keys(&self) -> &[Key];

    /// Residual dimension.
    fn dim(&self) -> usize;

    /// Whether the factor takes part in the problem at `values`.
    fn active(&self, _values: &Values) -> bool {
        true
    }

    /// Noise model whitening the residual, if any.
    fn noise_model(&self) -> Option<&Arc<dyn NoiseModel>> {
        None
    }

    /// Residual before whitening. When `jacobians` is given it is overwritten with
    /// one block per key, in `keys()` order.
    fn unwhitened_error(
        &self,
        values: &Values,
        jacobians: Option<&mut Vec<DMatrix<f64>>>,
    ) -> FactorResult<DVector<f64>>;

    /// Whitened residual.
    fn whitened_error(&self, values: &Values) -> FactorResult<DVector<f64>> {
        let residual = self.unwhitened_error(values, None)?;
        Ok(match self.noise_model() {
            Some(model) => model.whiten(&residual),
            None => residual,
        })
    }

    /// Cost of the factor, zero when inactive. `0.5 ||whitened error||²`, or
    /// `0.5 ρ(s)` when the noise model carries a robust loss.
    fn error(&self, values: &Values) -> FactorResult<f64> {
        if !self.active(values) {
            return Ok(0.0);
        }
        let residual = self.unwhitened_error(values, None)?;
        Ok(match self.noise_model() {
            Some(model) => model.cost(&residual),
            None => 0.5 * residual.norm_squared(),
        })
    }

    /// Whitened linear system at `values`, `None` when inactive.
    fn linearize(&self, values: &Values) -> FactorResult<Option<LinearSystem>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_error_display() {
        let error = FactorError::InvalidDimension {
            expected: 3,
            actual: 2,
        };
        assert_eq!(error.to_string(), "Invalid dimension: expected 3, got 2");
    }

    #[test]
    fn test_core_error_is_transparent() {
        let error = FactorError::from(CoreError::Variable("Key 'x1' not found".to_string()));
        assert_eq!(error.to_string(), "Variable error: Key 'x1' not found");
    }

    #[test]
    fn test_factor_error_log() {
        let error =
            FactorError::ExpressionNotProvided("cannot rebuild".to_string()).log_with_source(42);
        assert!(matches!(error, FactorError::ExpressionNotProvided(_)));
    }
}
