use crate::core::noise_model::NoiseModel;
use crate::core::{Key, Values};
use crate::expression::{SharedExpression, leaf_with_dim, lie};
use crate::factors::{
    ExpressionFactor2, FactorError, FactorResult, FactorSnapshot, LinearSystem, NonlinearFactor,
    RebuildExpression,
};
use crate::manifold::{LieGroup, Manifold};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// Generic between factor for Lie group pose constraints.
///
/// Represents a relative pose measurement between two poses of any Lie group manifold
/// type: SE(2), SO(2) or Rⁿ.
///
/// # Mathematical Formulation
///
/// Given two poses `T_i` and `T_j` and a measurement `T_ij`, the residual is:
///
/// ```text
/// r = local(T_ij, T_i⁻¹ ∘ T_j) = Log(T_ij⁻¹ ∘ T_i⁻¹ ∘ T_j)
/// ```
///
/// # Residual Dimensions by Manifold Type
///
/// - **SE(2)**: 3D residual `[dx, dy, dθ]` - 2D translation + rotation
/// - **SO(2)**: 1D residual `[dθ]` - 2D rotation only
/// - **Rⁿ**: nD residual - Euclidean space
///
/// # Jacobian Computation
///
/// With `E = T_i⁻¹ ∘ T_j` and `r` as above, the blocks are
///
/// ```text
/// ∂r/∂T_i = -Jr⁻¹(r) · Ad(E⁻¹)
/// ∂r/∂T_j =  Jr⁻¹(r)
/// ```
///
/// so each block is `dim × dim` and both are exact away from `r = 0`.
///
/// # Example
///
/// ```
/// use apex_numdiff::core::Values;
/// use apex_numdiff::core::noise_model::{Diagonal, NoiseModel};
/// use apex_numdiff::factors::{BetweenFactor, NonlinearFactor};
/// use apex_numdiff::manifold::se2::SE2;
/// use std::sync::Arc;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
///
/// // Robot moved 1m forward and rotated 0.1 rad
/// let noise: Arc<dyn NoiseModel> = Arc::new(Diagonal::isotropic(3, 0.1)?);
/// let odometry = BetweenFactor::new("x0", "x1", SE2::from_xy_angle(1.0, 0.0, 0.1), Some(noise))?;
///
/// let mut values = Values::new();
/// values.insert("x0", SE2::identity())?;
/// values.insert("x1", SE2::from_xy_angle(0.95, 0.05, 0.12))?;
///
/// let system = odometry.linearize(&values)?.ok_or("factor is active")?;
/// assert_eq!(system.blocks()[0].shape(), (3, 3));
/// assert_eq!(system.blocks()[1].shape(), (3, 3));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct BetweenFactor<G>
where
    G: LieGroup + Manifold,
{
    inner: ExpressionFactor2<G, G, G>,
}

impl<G> BetweenFactor<G>
where
    G: LieGroup + Manifold,
{
    /// Create a between factor from a relative measurement of `key2` seen from `key1`.
    ///
    /// # Errors
    ///
    /// Fails when the keys coincide, the noise model is missing, or its dimension
    /// differs from the measurement's tangent dimension.
    pub fn new(
        key1: impl Into<Key>,
        key2: impl Into<Key>,
        measured: G,
        noise_model: Option<Arc<dyn NoiseModel>>,
    ) -> FactorResult<Self> {
        let keys = [key1.into(), key2.into()];
        let expression = BetweenRecipe.rebuild_expression(&keys, &measured)?;
        let [key1, key2] = keys;
        Ok(BetweenFactor {
            inner: ExpressionFactor2::new(noise_model, measured, key1, key2, expression)?,
        })
    }

    pub fn measured(&self) -> &G {
        self.inner.measured()
    }

    pub fn factor(&self) -> &ExpressionFactor2<G, G, G> {
        &self.inner
    }

    /// Residual and Jacobians for explicit poses, without a [`Values`] container.
    pub fn evaluate_error(
        &self,
        pose_i: &G,
        pose_j: &G,
        jacobian_i: Option<&mut DMatrix<f64>>,
        jacobian_j: Option<&mut DMatrix<f64>>,
    ) -> FactorResult<DVector<f64>> {
        self.inner
            .evaluate_error(pose_i, pose_j, jacobian_i, jacobian_j)
    }

    pub fn equals(&self, other: &Self, tolerance: f64) -> bool {
        self.inner.factor().equals(other.inner.factor(), tolerance)
    }

    pub fn snapshot(&self) -> FactorSnapshot<G> {
        self.inner.snapshot()
    }

    pub fn restore(snapshot: FactorSnapshot<G>) -> FactorResult<Self> {
        Ok(BetweenFactor {
            inner: ExpressionFactor2::restore(snapshot, &BetweenRecipe)?,
        })
    }
}

impl<G> NonlinearFactor for BetweenFactor<G>
where
    G: LieGroup + Manifold,
{
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

/// Expression recipe of [`BetweenFactor`]: `between(key1, key2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BetweenRecipe;

impl<G> RebuildExpression<G> for BetweenRecipe
where
    G: LieGroup + Manifold,
{
    fn rebuild_expression(&self, keys: &[Key], measured: &G) -> FactorResult<SharedExpression<G>> {
        match keys {
            [key1, key2] => {
                // Runtime-sized groups take their dimension from the measurement.
                let dim = measured.dim();
                Ok(lie::between(
                    leaf_with_dim::<G>(key1, dim),
                    leaf_with_dim::<G>(key2, dim),
                ))
            }
            _ => Err(FactorError::InvalidParameters(format!(
                "Between factor takes two keys, got {keys:?}"
            ))
            .log()),
        }
    }
}
