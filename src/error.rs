//! Error types for the apex-numdiff library
//!
//! Module errors (`CoreError`, `FactorError`) are wrapped by the top-level
//! [`ApexError`], which keeps their sources so the full chain can be inspected.
//! `ManifoldError`s reach it through `CoreError::Manifold` when a tangent step is
//! rejected.
//!
//! Example error chain:
//! ```text
//! ApexError::Factor(
//!     FactorError::Core(
//!         CoreError::Variable("Key 'x42' not found")
//!     )
//! )
//! ```

use crate::{core::CoreError, factors::FactorError};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the apex-numdiff library
pub type ApexResult<T> = Result<T, ApexError>;

/// Main error type for the apex-numdiff library
///
/// ```rust,ignore
/// if let Err(e) = check_factor_jacobians(&factor, &values, 1e-5, 1e-5).map_err(ApexError::from) {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum ApexError {
    /// Variable container, key and noise model errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Factor construction, evaluation and Jacobian check errors
    #[error(transparent)]
    Factor(#[from] FactorError),
}

impl ApexError {
    /// Full error chain, one error per line.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Single-line error chain with arrow separators.
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apex_error_display() {
        let error = ApexError::from(FactorError::MissingNoiseModel("prior on x0".to_string()));
        assert!(error.to_string().contains("Missing noise model"));
    }

    #[test]
    fn test_chain_contains_nested_message() {
        let factor_error = FactorError::from(CoreError::Variable("Key 'l7' not found".to_string()));
        let error = ApexError::from(factor_error);
        assert!(error.chain().contains("l7"));
        assert!(error.chain_compact().contains("Variable error"));
    }

    #[test]
    fn test_result_alias() {
        let result: ApexResult<i32> = Err(CoreError::InvalidInput("bad step".to_string()).into());
        assert!(matches!(result, Err(ApexError::Core(_))));
    }

    #[test]
    fn test_rejected_tangent_step_converts() -> Result<(), Box<dyn std::error::Error>> {
        use crate::core::{Values, VectorValues};
        use crate::manifold::{ManifoldError, se2::SE2};
        use nalgebra::DVector;

        let mut values = Values::new();
        values.insert("x0", SE2::from_xy_angle(0.0, 0.0, 0.0))?;
        let delta = VectorValues::single("x0", DVector::from_vec(vec![0.1, 0.2]));

        let apex_error: ApexError = match values.retract(&delta) {
            Ok(_) => return Err("retraction with a 2-vector on SE2 should fail".into()),
            Err(e) => e.into(),
        };
        assert!(matches!(
            apex_error,
            ApexError::Core(CoreError::Manifold(
                ManifoldError::InvalidTangentDimension { .. }
            ))
        ));
        assert_eq!(
            apex_error.to_string(),
            "Invalid tangent dimension: expected 3, got 2"
        );
        Ok(())
    }
}
