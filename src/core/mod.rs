//! Core building blocks shared by factors and the differentiation engine:
//! - Variable keys and the `Values` assignment container
//! - Tangent-space delta maps (`VectorValues`)
//! - Noise models that whiten residuals and Jacobian blocks
//! - Robust loss functions and the corrector that applies them

pub mod corrector;
pub mod key;
pub mod loss_functions;
pub mod noise_model;
pub mod values;

pub use key::Key;
pub use values::{Value, Values, VectorValues};

use crate::manifold::ManifoldError;
use thiserror::Error;
use tracing::error;

/// Core module error types for variable assignments and noise models
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Variable lookup, insertion or update failed
    #[error("Variable error: {0}")]
    Variable(String),

    /// Stored value has a different type than requested
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Dimension mismatch between tangent vectors, residuals or blocks
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Noise model construction or application failed
    #[error("Noise model error: {0}")]
    NoiseModel(String),

    /// Loss function error
    #[error("Loss function error: {0}")]
    LossFunction(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tangent vector rejected by a variable's manifold
    #[error(transparent)]
    Manifold(#[from] ManifoldError),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// values.at::<SE2>(&key)
    ///     .map_err(|e| e.log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the underlying source error
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
