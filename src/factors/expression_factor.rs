//! Factors whose prediction is an [`Expression`] with exact derivatives.
//!
//! An [`ExpressionFactor`] holds a measurement `z`, a noise model and an expression
//! `h(x)` predicting the measurement. Its residual is the local coordinate of the
//! prediction seen from the measurement:
//!
//! ```text
//! e(x) = local(z, h(x))
//! ```
//!
//! which is `h(x) - z` for vector measurements and `Log(z⁻¹ ∘ h(x))` for Lie group
//! measurements. Jacobian blocks chain the expression Jacobians with the derivative
//! of the local map, so they are exact at any residual, not just at `e = 0`.
//!
//! # Example
//!
//! ```
//! use apex_numdiff::core::Values;
//! use apex_numdiff::core::noise_model::{Diagonal, NoiseModel};
//! use apex_numdiff::expression::{leaf, lie};
//! use apex_numdiff::factors::{ExpressionFactor, NonlinearFactor};
//! use apex_numdiff::manifold::se2::SE2;
//! use nalgebra::Vector2;
//! use std::sync::Arc;
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//!
//! // Range-bearing style landmark observation in the robot frame.
//! let noise: Arc<dyn NoiseModel> = Arc::new(Diagonal::isotropic(2, 0.1)?);
//! let prediction = lie::transform_to(leaf::<SE2>("x0"), leaf::<Vector2<f64>>("l0"));
//! let factor = ExpressionFactor::new(Some(noise), Vector2::new(1.0, 0.0), prediction)?;
//!
//! let mut values = Values::new();
//! values.insert("x0", SE2::from_xy_angle(0.0, 0.0, 0.0))?;
//! values.insert("l0", Vector2::new(1.0, 0.0))?;
//!
//! let system = factor.linearize(&values)?.ok_or("factor is active")?;
//! assert_eq!(system.keys().len(), 2);
//! assert!(system.rhs().norm() < 1e-12);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::core::noise_model::NoiseModel;
use crate::core::{Key, Values};
use crate::expression::SharedExpression;
use crate::factors::{FactorError, FactorResult, LinearSystem, NonlinearFactor};
use crate::manifold::Manifold;
use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

type ActivationFn = dyn Fn(&Values) -> bool + Send + Sync;

/// Measurement factor driven by an expression.
///
/// Cloning is cheap: the expression, noise model and activation predicate are
/// shared.
#[derive(Clone)]
pub struct ExpressionFactor<T: Manifold> {
    measured: T,
    expression: SharedExpression<T>,
    noise_model: Arc<dyn NoiseModel>,
    keys: Vec<Key>,
    dims: Vec<usize>,
    activation: Option<Arc<ActivationFn>>,
}

impl<T: Manifold> ExpressionFactor<T> {
    /// Create a factor whose keys are the expression's keys in ascending order.
    ///
    /// # Errors
    ///
    /// - [`FactorError::MissingNoiseModel`] when `noise_model` is `None`
    /// - [`FactorError::InvalidDimension`] when the noise model dimension differs
    ///   from the measurement's tangent dimension
    /// - [`FactorError::InvalidParameters`] for a zero-dimensional measurement
    pub fn new(
        noise_model: Option<Arc<dyn NoiseModel>>,
        measured: T,
        expression: SharedExpression<T>,
    ) -> FactorResult<Self> {
        let keys = expression.keys_and_dims().into_keys().collect();
        Self::with_keys(noise_model, measured, expression, keys)
    }

    /// Create a factor with an explicit key order. `keys` must list every key of the
    /// expression exactly once.
    pub fn with_keys(
        noise_model: Option<Arc<dyn NoiseModel>>,
        measured: T,
        expression: SharedExpression<T>,
        keys: Vec<Key>,
    ) -> FactorResult<Self> {
        let noise_model = noise_model.ok_or_else(|| {
            FactorError::MissingNoiseModel(
                "ExpressionFactor requires a noise model".to_string(),
            )
            .log()
        })?;

        let dim = measured.dim();
        if dim == 0 {
            return Err(FactorError::InvalidParameters(
                "Measurement has zero tangent dimension".to_string(),
            )
            .log());
        }
        if noise_model.dim() != dim {
            return Err(FactorError::InvalidDimension {
                expected: dim,
                actual: noise_model.dim(),
            }
            .log_with_source(&noise_model));
        }

        let keys_and_dims = expression.keys_and_dims();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != keys.len() || !sorted.iter().eq(keys_and_dims.keys()) {
            return Err(FactorError::InvalidParameters(format!(
                "Keys {keys:?} do not match expression keys {:?}",
                keys_and_dims.keys().collect::<Vec<_>>()
            ))
            .log());
        }
        let dims = keys.iter().map(|key| keys_and_dims[key]).collect();

        Ok(ExpressionFactor {
            measured,
            expression,
            noise_model,
            keys,
            dims,
            activation: None,
        })
    }

    /// Only take part in the problem when `predicate` holds for the current values.
    pub fn with_activation<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Values) -> bool + Send + Sync + 'static,
    {
        self.activation = Some(Arc::new(predicate));
        self
    }

    pub fn measured(&self) -> &T {
        &self.measured
    }

    pub fn expression(&self) -> &SharedExpression<T> {
        &self.expression
    }

    /// Tangent dimension of every key, in key order.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Same keys, key dimensions and noise model, and measurements within `tolerance`
    /// in local coordinates.
    pub fn equals(&self, other: &Self, tolerance: f64) -> bool {
        self.keys == other.keys
            && self.dims == other.dims
            && self.measured.dim() == other.measured.dim()
            && self
                .noise_model
                .equals(other.noise_model.as_ref(), tolerance)
            && self.measured.local(&other.measured).amax() <= tolerance
    }

    /// Everything needed to rebuild the factor except the expression itself.
    pub fn snapshot(&self) -> FactorSnapshot<T> {
        FactorSnapshot {
            keys: self.keys.clone(),
            measured: self.measured.clone(),
            noise_model: Arc::clone(&self.noise_model),
        }
    }

    /// Rebuild a factor from a snapshot, asking `recipe` for the expression.
    pub fn restore(
        snapshot: FactorSnapshot<T>,
        recipe: &impl RebuildExpression<T>,
    ) -> FactorResult<Self> {
        let expression = recipe.rebuild_expression(&snapshot.keys, &snapshot.measured)?;
        Self::with_keys(
            Some(snapshot.noise_model),
            snapshot.measured,
            expression,
            snapshot.keys,
        )
    }

    fn residual(&self, predicted: &T) -> FactorResult<DVector<f64>> {
        if predicted.dim() != self.measured.dim() {
            return Err(FactorError::InvalidDimension {
                expected: self.measured.dim(),
                actual: predicted.dim(),
            }
            .log());
        }
        Ok(self.measured.local(predicted))
    }
}

impl<T: Manifold> NonlinearFactor for ExpressionFactor<T> {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.noise_model.dim()
    }

    fn active(&self, values: &Values) -> bool {
        self.activation
            .as_ref()
            .is_none_or(|predicate| predicate(values))
    }

    fn noise_model(&self) -> Option<&Arc<dyn NoiseModel>> {
        Some(&self.noise_model)
    }

    fn unwhitened_error(
        &self,
        values: &Values,
        jacobians: Option<&mut Vec<DMatrix<f64>>>,
    ) -> FactorResult<DVector<f64>> {
        let Some(jacobians) = jacobians else {
            let predicted = self.expression.value(values)?;
            return self.residual(&predicted);
        };

        let (predicted, blocks) = self.expression.value_and_jacobians(values)?;
        let residual = self.residual(&predicted)?;

        // Chain through local(measured, ·) so blocks stay exact at nonzero residual.
        let d_local = self.measured.local_jacobian(&predicted);
        jacobians.clear();
        for (key, dim) in self.keys.iter().zip(&self.dims) {
            let block = match blocks.get(key) {
                Some(block) => &d_local * block,
                None => DMatrix::zeros(residual.len(), *dim),
            };
            if block.shape() != (residual.len(), *dim) {
                return Err(FactorError::InvalidDimension {
                    expected: *dim,
                    actual: block.ncols(),
                }
                .log());
            }
            jacobians.push(block);
        }
        Ok(residual)
    }

    fn linearize(&self, values: &Values) -> FactorResult<Option<LinearSystem>> {
        if !self.active(values) {
            trace!("Skipping inactive factor on {:?}", self.keys);
            return Ok(None);
        }

        let mut blocks = Vec::with_capacity(self.keys.len());
        let residual = self.unwhitened_error(values, Some(&mut blocks))?;
        let mut rhs = -residual;
        self.noise_model.whiten_system(&mut blocks, &mut rhs)?;

        let mut system = LinearSystem::new(self.keys.clone(), blocks, rhs)?;
        if self.noise_model.is_constrained() {
            if let Some(unit) = self.noise_model.unit() {
                system = system.with_model(unit);
            }
        }

        debug!(
            "Linearized factor on {:?}: {} rows, |b| = {:.3e}",
            self.keys,
            system.rows(),
            system.rhs().norm()
        );
        Ok(Some(system))
    }
}

impl<T: Manifold> fmt::Debug for ExpressionFactor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionFactor")
            .field("keys", &self.keys)
            .field("dims", &self.dims)
            .field("noise_model", &self.noise_model)
            .field("conditional", &self.activation.is_some())
            .finish()
    }
}

/// Keys, measurement and noise model of a factor, without its expression.
#[derive(Debug, Clone)]
pub struct FactorSnapshot<T> {
    pub keys: Vec<Key>,
    pub measured: T,
    pub noise_model: Arc<dyn NoiseModel>,
}

/// Knows how to rebuild the expression of a factor from its keys and measurement.
///
/// The default implementation fails with [`FactorError::ExpressionNotProvided`];
/// factor types override it with their own construction.
pub trait RebuildExpression<T> {
    fn rebuild_expression(&self, keys: &[Key], _measured: &T) -> FactorResult<SharedExpression<T>> {
        Err(FactorError::ExpressionNotProvided(format!(
            "No expression recipe for factor on {keys:?}"
        ))
        .log())
    }
}

/// Recipe that cannot rebuild anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecipe;

impl<T> RebuildExpression<T> for NoRecipe {}

/// Expression factor on exactly two variables of known types.
///
/// Keys are ordered `[key1, key2]`, and [`ExpressionFactor2::evaluate_error`] gives a
/// typed entry point that does not need a [`Values`] container.
#[derive(Clone)]
pub struct ExpressionFactor2<T: Manifold, A1: Manifold, A2: Manifold> {
    inner: ExpressionFactor<T>,
    _marker: PhantomData<fn(&A1, &A2)>,
}

impl<T: Manifold, A1: Manifold, A2: Manifold> ExpressionFactor2<T, A1, A2> {
    /// `expression` must depend on exactly `key1` and `key2`, which must differ.
    pub fn new(
        noise_model: Option<Arc<dyn NoiseModel>>,
        measured: T,
        key1: impl Into<Key>,
        key2: impl Into<Key>,
        expression: SharedExpression<T>,
    ) -> FactorResult<Self> {
        let key1 = key1.into();
        let key2 = key2.into();
        if key1 == key2 {
            return Err(FactorError::InvalidParameters(format!(
                "Two-variable factor needs distinct keys, got '{key1}' twice"
            ))
            .log());
        }

        let keys_and_dims = expression.keys_and_dims();
        for (key, type_dim) in [(&key1, A1::DIM), (&key2, A2::DIM)] {
            match keys_and_dims.get(key) {
                Some(dim) if type_dim != 0 && *dim != type_dim => {
                    return Err(FactorError::InvalidDimension {
                        expected: type_dim,
                        actual: *dim,
                    }
                    .log());
                }
                Some(_) => {}
                None => {
                    return Err(FactorError::InvalidParameters(format!(
                        "Expression does not depend on '{key}'"
                    ))
                    .log());
                }
            }
        }

        let inner =
            ExpressionFactor::with_keys(noise_model, measured, expression, vec![key1, key2])?;
        Ok(ExpressionFactor2 {
            inner,
            _marker: PhantomData,
        })
    }

    pub fn key1(&self) -> &Key {
        &self.inner.keys[0]
    }

    pub fn key2(&self) -> &Key {
        &self.inner.keys[1]
    }

    pub fn factor(&self) -> &ExpressionFactor<T> {
        &self.inner
    }

    pub fn measured(&self) -> &T {
        self.inner.measured()
    }

    /// Unwhitened residual at `(a1, a2)`, with the Jacobian block of each argument
    /// written into `h1` / `h2` when requested.
    pub fn evaluate_error(
        &self,
        a1: &A1,
        a2: &A2,
        h1: Option<&mut DMatrix<f64>>,
        h2: Option<&mut DMatrix<f64>>,
    ) -> FactorResult<DVector<f64>> {
        let mut values = Values::new();
        values.insert(self.key1(), a1.clone())?;
        values.insert(self.key2(), a2.clone())?;

        if h1.is_none() && h2.is_none() {
            return self.inner.unwhitened_error(&values, None);
        }

        let mut blocks = Vec::with_capacity(2);
        let residual = self.inner.unwhitened_error(&values, Some(&mut blocks))?;
        let mut blocks = blocks.into_iter();
        if let (Some(h1), Some(block)) = (h1, blocks.next()) {
            *h1 = block;
        }
        if let (Some(h2), Some(block)) = (h2, blocks.next()) {
            *h2 = block;
        }
        Ok(residual)
    }

    pub fn snapshot(&self) -> FactorSnapshot<T> {
        self.inner.snapshot()
    }

    pub fn restore(
        snapshot: FactorSnapshot<T>,
        recipe: &impl RebuildExpression<T>,
    ) -> FactorResult<Self> {
        let [key1, key2]: [Key; 2] = snapshot.keys.clone().try_into().map_err(|keys| {
            FactorError::InvalidParameters(format!(
                "Two-variable factor cannot restore keys {keys:?}"
            ))
            .log()
        })?;
        let expression = recipe.rebuild_expression(&snapshot.keys, &snapshot.measured)?;
        Self::new(
            Some(snapshot.noise_model),
            snapshot.measured,
            key1,
            key2,
            expression,
        )
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold> NonlinearFactor for ExpressionFactor2<T, A1, A2> {
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

impl<T: Manifold, A1: Manifold, A2: Manifold> fmt::Debug for ExpressionFactor2<T, A1, A2> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExpressionFactor2").field(&self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loss_functions::HuberLoss;
    use crate::core::noise_model::{Constrained, Diagonal, RobustNoise};
    use crate::expression::{leaf, lie};
    use crate::manifold::se2::SE2;
    use nalgebra::Vector2;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn unit_noise(dim: usize) -> Result<Option<Arc<dyn NoiseModel>>, Box<dyn std::error::Error>> {
        Ok(Some(Arc::new(Diagonal::unit(dim)?)))
    }

    fn landmark_factor(
        measured: Vector2<f64>,
    ) -> Result<ExpressionFactor2<Vector2<f64>, SE2, Vector2<f64>>, Box<dyn std::error::Error>> {
        let expression = lie::transform_to(leaf::<SE2>("x1"), leaf::<Vector2<f64>>("l1"));
        Ok(ExpressionFactor2::new(
            unit_noise(2)?,
            measured,
            "x1",
            "l1",
            expression,
        )?)
    }

    #[test]
    fn test_identity_measurement_linearization() -> TestResult {
        let z = Vector2::new(1.0, 2.0);
        let factor = ExpressionFactor::new(unit_noise(2)?, z, leaf::<Vector2<f64>>("x"))?;

        let mut values = Values::new();
        values.insert("x", Vector2::new(1.5, 1.0))?;

        let error = factor.unwhitened_error(&values, None)?;
        assert!((error - DVector::from_vec(vec![0.5, -1.0])).norm() < 1e-12);

        let system = factor.linearize(&values)?.ok_or("factor should be active")?;
        assert!((system.blocks()[0].clone() - DMatrix::identity(2, 2)).norm() < 1e-12);
        assert!((system.rhs() - DVector::from_vec(vec![-0.5, 1.0])).norm() < 1e-12);
        assert!(system.model().is_none());
        assert!((factor.error(&values)? - 0.625).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_robust_error_is_loss_of_squared_distance() -> TestResult {
        let base: Arc<dyn NoiseModel> = Arc::new(Diagonal::unit(2)?);
        let huber: Arc<dyn NoiseModel> =
            Arc::new(RobustNoise::new(base, Arc::new(HuberLoss::new(1.0)?)));
        let factor =
            ExpressionFactor::new(Some(huber), Vector2::new(0.0, 0.0), leaf::<Vector2<f64>>("x"))?;

        let mut values = Values::new();
        values.insert("x", Vector2::new(3.0, 4.0))?;

        // s = 25 is past the Huber threshold: ρ(s) = 2 * 5 - 1.
        assert!((factor.error(&values)? - 4.5).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_construction_errors() -> TestResult {
        let missing = ExpressionFactor::new(None, Vector2::new(0.0, 0.0), leaf("x"));
        assert!(matches!(missing, Err(FactorError::MissingNoiseModel(_))));

        let mismatched =
            ExpressionFactor::new(unit_noise(3)?, Vector2::new(0.0, 0.0), leaf("x"));
        assert!(matches!(
            mismatched,
            Err(FactorError::InvalidDimension { expected: 2, actual: 3 })
        ));

        let same_keys = ExpressionFactor2::<SE2, SE2, SE2>::new(
            unit_noise(3)?,
            SE2::identity(),
            "x1",
            "x1",
            lie::between(leaf("x1"), leaf("x1")),
        );
        assert!(matches!(same_keys, Err(FactorError::InvalidParameters(_))));
        Ok(())
    }

    #[test]
    fn test_inactive_factor() -> TestResult {
        let factor = ExpressionFactor::new(unit_noise(1)?, 3.0, leaf::<f64>("s"))?
            .with_activation(|values: &Values| values.exists("enable"));

        let mut values = Values::new();
        values.insert("s", 1.0)?;
        assert!(factor.linearize(&values)?.is_none());
        assert_eq!(factor.error(&values)?, 0.0);

        values.insert("enable", 0.0)?;
        assert!(factor.linearize(&values)?.is_some());
        assert!((factor.error(&values)? - 2.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_constrained_noise_attaches_unit_model() -> TestResult {
        let noise: Arc<dyn NoiseModel> =
            Arc::new(Constrained::from_sigmas(DVector::from_vec(vec![0.0, 0.5]))?);
        let factor =
            ExpressionFactor::new(Some(noise), Vector2::new(0.0, 0.0), leaf::<Vector2<f64>>("x"))?;

        let mut values = Values::new();
        values.insert("x", Vector2::new(1.0, 1.0))?;
        let system = factor.linearize(&values)?.ok_or("factor should be active")?;

        let model = system.model().ok_or("constrained system carries a model")?;
        assert!(model.is_constrained());
        assert!((system.rhs() - DVector::from_vec(vec![-1.0, -2.0])).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_evaluate_error_matches_factor() -> TestResult {
        let factor = landmark_factor(Vector2::new(2.0, 0.5))?;
        assert_eq!(factor.keys(), &[Key::from("x1"), Key::from("l1")]);

        let pose = SE2::from_xy_angle(0.5, -0.3, 0.7);
        let landmark = Vector2::new(3.0, 1.0);
        let mut h1 = DMatrix::zeros(0, 0);
        let mut h2 = DMatrix::zeros(0, 0);
        let error = factor.evaluate_error(&pose, &landmark, Some(&mut h1), Some(&mut h2))?;
        assert_eq!(h1.shape(), (2, 3));
        assert_eq!(h2.shape(), (2, 2));

        let mut values = Values::new();
        values.insert("x1", pose)?;
        values.insert("l1", landmark)?;
        let mut blocks = Vec::new();
        let expected = factor.unwhitened_error(&values, Some(&mut blocks))?;
        assert!((error - expected).norm() < 1e-12);
        assert!((h1 - &blocks[0]).norm() < 1e-12);
        assert!((h2 - &blocks[1]).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_equals_and_clone() -> TestResult {
        let a = landmark_factor(Vector2::new(1.0, 1.0))?;
        let b = landmark_factor(Vector2::new(1.0, 1.0 + 1e-12))?;
        let c = landmark_factor(Vector2::new(1.0, 1.1))?;
        assert!(a.factor().equals(b.factor(), 1e-9));
        assert!(!a.factor().equals(c.factor(), 1e-9));
        assert!(a.clone().factor().equals(a.factor(), 0.0));
        Ok(())
    }

    struct LandmarkRecipe;

    impl RebuildExpression<Vector2<f64>> for LandmarkRecipe {
        fn rebuild_expression(
            &self,
            keys: &[Key],
            _measured: &Vector2<f64>,
        ) -> FactorResult<SharedExpression<Vector2<f64>>> {
            Ok(lie::transform_to(
                leaf::<SE2>(&keys[0]),
                leaf::<Vector2<f64>>(&keys[1]),
            ))
        }
    }

    #[test]
    fn test_snapshot_restore() -> TestResult {
        let factor = landmark_factor(Vector2::new(1.0, -1.0))?;

        let missing = ExpressionFactor2::<Vector2<f64>, SE2, Vector2<f64>>::restore(
            factor.snapshot(),
            &NoRecipe,
        );
        assert!(matches!(missing, Err(FactorError::ExpressionNotProvided(_))));

        let restored = ExpressionFactor2::<Vector2<f64>, SE2, Vector2<f64>>::restore(
            factor.snapshot(),
            &LandmarkRecipe,
        )?;
        assert!(restored.factor().equals(factor.factor(), 1e-12));
        Ok(())
    }
}
