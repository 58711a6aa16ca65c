//! Prior factor for unary constraints on variables.

use crate::core::noise_model::NoiseModel;
use crate::core::{Key, Values};
use crate::expression::{SharedExpression, leaf_with_dim};
use crate::factors::{
    ExpressionFactor, FactorError, FactorResult, FactorSnapshot, LinearSystem, NonlinearFactor,
    RebuildExpression,
};
use crate::manifold::Manifold;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// Prior factor (unary constraint) on a single variable.
///
/// Represents a direct measurement or prior belief about a variable's value, used to
/// anchor variables to known values or to incorporate prior knowledge.
///
/// # Mathematical Formulation
///
/// The residual is the local coordinate of the current value seen from the prior:
///
/// ```text
/// r = local(x_prior, x)
/// ```
///
/// which is `x - x_prior` for vectors and `Log(x_prior⁻¹ ∘ x)` for Lie groups. The
/// Jacobian is `Jr⁻¹(r)` for Lie groups and the identity for vectors.
///
/// # Use Cases
///
/// - **Anchoring**: Fix the first pose in SLAM to prevent drift
/// - **GPS measurements**: Constrain a pose to a known global position
/// - **Regularization**: Keep variables close to their initial values
///
/// # Example
///
/// ```
/// use apex_numdiff::core::Values;
/// use apex_numdiff::core::noise_model::{Diagonal, NoiseModel};
/// use apex_numdiff::factors::{NonlinearFactor, PriorFactor};
/// use apex_numdiff::manifold::se2::SE2;
/// use std::sync::Arc;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
///
/// let noise: Arc<dyn NoiseModel> = Arc::new(Diagonal::isotropic(3, 0.01)?);
/// let prior = PriorFactor::new("x0", SE2::identity(), Some(noise))?;
///
/// let mut values = Values::new();
/// values.insert("x0", SE2::from_xy_angle(0.1, 0.05, 0.02))?;
/// let whitened = prior.whitened_error(&values)?;
/// assert_eq!(whitened.len(), 3);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct PriorFactor<T: Manifold> {
    inner: ExpressionFactor<T>,
}

impl<T: Manifold> PriorFactor<T> {
    pub fn new(
        key: impl Into<Key>,
        prior: T,
        noise_model: Option<Arc<dyn NoiseModel>>,
    ) -> FactorResult<Self> {
        let key = key.into();
        let expression = PriorRecipe.rebuild_expression(std::slice::from_ref(&key), &prior)?;
        Ok(PriorFactor {
            inner: ExpressionFactor::new(noise_model, prior, expression)?,
        })
    }

    pub fn key(&self) -> &Key {
        &self.inner.keys()[0]
    }

    pub fn prior(&self) -> &T {
        self.inner.measured()
    }

    pub fn factor(&self) -> &ExpressionFactor<T> {
        &self.inner
    }

    pub fn equals(&self, other: &Self, tolerance: f64) -> bool {
        self.inner.equals(&other.inner, tolerance)
    }

    pub fn snapshot(&self) -> FactorSnapshot<T> {
        self.inner.snapshot()
    }

    /// Rebuild a prior from a snapshot.
    pub fn restore(snapshot: FactorSnapshot<T>) -> FactorResult<Self> {
        Ok(PriorFactor {
            inner: ExpressionFactor::restore(snapshot, &PriorRecipe)?,
        })
    }
}

impl<T: Manifold> NonlinearFactor for PriorFactor<T> {
    fn keys(&self) -> &[Key] {
        self.inner.keys()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn active(&self, values: &Values) -> bool {
        self.inner.active(values)
    }

    fn noise_model(&self) -> Option<&Arc<dyn NoiseModel>> {
        self.inner.noise_model()
    }

    fn unwhitened_error(
        &self,
        values: &Values,
        jacobians: Option<&mut Vec<DMatrix<f64>>>,
    ) -> FactorResult<DVector<f64>> {
        self.inner.unwhitened_error(values, jacobians)
    }

    fn linearize(&self, values: &Values) -> FactorResult<Option<LinearSystem>> {
        self.inner.linearize(values)
    }
}

/// Expression recipe of [`PriorFactor`]: the variable itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorRecipe;

impl<T: Manifold> RebuildExpression<T> for PriorRecipe {
    fn rebuild_expression(&self, keys: &[Key], measured: &T) -> FactorResult<SharedExpression<T>> {
        match keys {
            [key] => Ok(leaf_with_dim::<T>(key, measured.dim())),
            _ => Err(FactorError::InvalidParameters(format!(
                "Prior factor takes one key, got {keys:?}"
            ))
            .log()),
        }
    }
}
