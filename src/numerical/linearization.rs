//! Numerical linearization of arbitrary factors.

use crate::core::{Values, VectorValues};
use crate::factors::{FactorError, FactorResult, LinearSystem, NonlinearFactor};
use nalgebra::{DMatrix, DVector};
use tracing::trace;

/// Linearize `factor` at `values` by central differences through
/// [`Values::retract`].
///
/// Only [`NonlinearFactor::unwhitened_error`] and the variable dimensions are used,
/// so the result is independent of how the factor computes its own Jacobians. The
/// returned system is unwhitened, has one block per key in `factor.keys()` order and
/// right-hand side `-e(values)`.
pub fn numerical_linearization(
    factor: &dyn NonlinearFactor,
    values: &Values,
    fd_step: f64,
) -> FactorResult<LinearSystem> {
    let residual = factor.unwhitened_error(values, None)?;
    let rows = residual.len();

    let mut blocks = Vec::with_capacity(factor.keys().len());
    for key in factor.keys() {
        let dim = values.dim(key)?;
        let mut block = DMatrix::zeros(rows, dim);
        let mut delta = DVector::zeros(dim);
        for j in 0..dim {
            delta[j] = fd_step;
            let plus = perturbed_error(factor, values, &VectorValues::single(key, delta.clone()))?;
            delta[j] = -fd_step;
            let minus = perturbed_error(factor, values, &VectorValues::single(key, delta.clone()))?;
            delta[j] = 0.0;

            if plus.len() != rows || minus.len() != rows {
                return Err(FactorError::InvalidDimension {
                    expected: rows,
                    actual: plus.len().max(minus.len()),
                }
                .log());
            }
            block.set_column(j, &((plus - minus) / (2.0 * fd_step)));
        }
        trace!("Numerical block for '{key}': {}x{}", rows, dim);
        blocks.push(block);
    }

    LinearSystem::new(factor.keys().to_vec(), blocks, -residual)
}

fn perturbed_error(
    factor: &dyn NonlinearFactor,
    values: &Values,
    delta: &VectorValues,
) -> FactorResult<DVector<f64>> {
    factor.unwhitened_error(&values.retract(delta)?, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Key;
    use crate::core::noise_model::{Diagonal, NoiseModel};
    use crate::factors::{BetweenFactor, PriorFactor};
    use crate::manifold::se2::SE2;
    use nalgebra::Vector2;
    use std::sync::Arc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_vector_prior_linearization() -> TestResult {
        let noise: Arc<dyn NoiseModel> = Arc::new(Diagonal::isotropic(2, 0.5)?);
        let prior = PriorFactor::new("p", Vector2::new(1.0, 2.0), Some(noise))?;

        let mut values = Values::new();
        values.insert("p", Vector2::new(3.0, 1.0))?;
        let system = numerical_linearization(&prior, &values, 1e-5)?;

        assert_eq!(system.keys(), &[Key::from("p")]);
        assert!((system.blocks()[0].clone() - DMatrix::identity(2, 2)).norm() < 1e-8);
        // Unwhitened: the sigma of 0.5 is not applied.
        assert!((system.rhs() - DVector::from_vec(vec![-2.0, 1.0])).norm() < 1e-12);
        assert!(system.model().is_none());
        Ok(())
    }

    #[test]
    fn test_block_layout_follows_keys() -> TestResult {
        let noise: Arc<dyn NoiseModel> = Arc::new(Diagonal::unit(3)?);
        let factor = BetweenFactor::new("b", "a", SE2::from_xy_angle(1.0, 0.0, 0.2), Some(noise))?;

        let mut values = Values::new();
        values.insert("a", SE2::from_xy_angle(1.0, 0.1, 0.3))?;
        values.insert("b", SE2::from_xy_angle(0.0, 0.0, 0.1))?;
        let system = numerical_linearization(&factor, &values, 1e-5)?;

        assert_eq!(system.keys(), &[Key::from("b"), Key::from("a")]);
        assert_eq!(system.rows(), 3);
        assert_eq!(system.cols(), 6);
        Ok(())
    }

    #[test]
    fn test_missing_variable_fails() -> TestResult {
        let noise: Arc<dyn NoiseModel> = Arc::new(Diagonal::unit(2)?);
        let prior = PriorFactor::new("p", Vector2::new(1.0, 2.0), Some(noise))?;
        assert!(numerical_linearization(&prior, &Values::new(), 1e-5).is_err());
        Ok(())
    }
}
