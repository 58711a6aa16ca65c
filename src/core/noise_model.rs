//! Noise models that whiten residuals and Jacobian blocks.
//!
//! Whitening maps a residual `e` with covariance `Σ` to `Σ^{-1/2} e`, so that the
//! least-squares cost becomes the plain squared norm. Linearization whitens the
//! Jacobian blocks and the right-hand side together through
//! [`NoiseModel::whiten_system`].
//!
//! Three families are provided:
//! - [`Diagonal`]: independent per-row standard deviations (isotropic and unit
//!   models are special cases)
//! - [`Constrained`]: like `Diagonal`, but rows with a zero sigma are hard
//!   constraints and are left unscaled
//! - [`RobustNoise`]: a base model followed by a robust loss applied through the
//!   [`Corrector`]

use crate::core::corrector::Corrector;
use crate::core::loss_functions::LossFunction;
use crate::core::{CoreError, CoreResult};
use nalgebra::{DMatrix, DVector};
use std::fmt::Debug;
use std::sync::Arc;

/// Capability shared by all noise models.
pub trait NoiseModel: Send + Sync + Debug {
    /// Residual dimension the model applies to.
    fn dim(&self) -> usize;

    /// Whether some rows are hard constraints.
    fn is_constrained(&self) -> bool {
        false
    }

    /// Per-row standard deviations.
    fn sigmas(&self) -> DVector<f64>;

    /// Whitened copy of `residual`.
    fn whiten(&self, residual: &DVector<f64>) -> DVector<f64>;

    /// Whiten Jacobian blocks and right-hand side in place.
    fn whiten_system(
        &self,
        blocks: &mut [DMatrix<f64>],
        rhs: &mut DVector<f64>,
    ) -> CoreResult<()>;

    /// Model attached to linear systems linearized under this model. Only
    /// constrained models have one.
    fn unit(&self) -> Option<Arc<dyn NoiseModel>> {
        None
    }

    fn squared_mahalanobis_distance(&self, residual: &DVector<f64>) -> f64 {
        self.whiten(residual).norm_squared()
    }

    /// Least-squares cost of an unwhitened residual, `0.5 ‖whiten(r)‖²` unless a
    /// robust loss replaces it.
    fn cost(&self, residual: &DVector<f64>) -> f64 {
        0.5 * self.squared_mahalanobis_distance(residual)
    }

    fn equals(&self, other: &dyn NoiseModel, tolerance: f64) -> bool {
        self.dim() == other.dim()
            && self.is_constrained() == other.is_constrained()
            && (self.sigmas() - other.sigmas()).amax() <= tolerance
    }
}

fn check_system(dim: usize, blocks: &[DMatrix<f64>], rhs: &DVector<f64>) -> CoreResult<()> {
    if rhs.len() != dim {
        return Err(CoreError::DimensionMismatch(format!(
            "Right-hand side has {} rows, noise model has dimension {dim}",
            rhs.len()
        ))
        .log());
    }
    if let Some(block) = blocks.iter().find(|block| block.nrows() != dim) {
        return Err(CoreError::DimensionMismatch(format!(
            "Jacobian block has {} rows, noise model has dimension {dim}",
            block.nrows()
        ))
        .log());
    }
    Ok(())
}

/// Scale row `i` of the system by `weights[i]`.
fn scale_rows(weights: &DVector<f64>, blocks: &mut [DMatrix<f64>], rhs: &mut DVector<f64>) {
    for block in blocks.iter_mut() {
        for (mut row, weight) in block.row_iter_mut().zip(weights.iter()) {
            row *= *weight;
        }
    }
    rhs.component_mul_assign(weights);
}

/// Diagonal Gaussian noise model.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagonal {
    sigmas: DVector<f64>,
    inv_sigmas: DVector<f64>,
}

impl Diagonal {
    /// Model from standard deviations. All sigmas must be positive and finite.
    pub fn from_sigmas(sigmas: DVector<f64>) -> CoreResult<Self> {
        if sigmas.is_empty() {
            return Err(
                CoreError::NoiseModel("Noise model needs at least one sigma".into()).log(),
            );
        }
        if let Some(sigma) = sigmas.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(CoreError::NoiseModel(format!(
                "Sigmas must be positive and finite, got {sigma}"
            ))
            .log());
        }
        let inv_sigmas = sigmas.map(|s| 1.0 / s);
        Ok(Diagonal { sigmas, inv_sigmas })
    }

    pub fn from_variances(variances: DVector<f64>) -> CoreResult<Self> {
        Self::from_sigmas(variances.map(f64::sqrt))
    }

    pub fn from_precisions(precisions: DVector<f64>) -> CoreResult<Self> {
        Self::from_sigmas(precisions.map(|p| 1.0 / p.sqrt()))
    }

    /// Same sigma on every row.
    pub fn isotropic(dim: usize, sigma: f64) -> CoreResult<Self> {
        Self::from_sigmas(DVector::from_element(dim, sigma))
    }

    /// Identity covariance.
    pub fn unit(dim: usize) -> CoreResult<Self> {
        Self::isotropic(dim, 1.0)
    }

    pub fn inv_sigmas(&self) -> &DVector<f64> {
        &self.inv_sigmas
    }
}

impl NoiseModel for Diagonal {
    fn dim(&self) -> usize {
        self.sigmas.len()
    }

    fn sigmas(&self) -> DVector<f64> {
        self.sigmas.clone()
    }

    fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        residual.component_mul(&self.inv_sigmas)
    }

    fn whiten_system(
        &self,
        blocks: &mut [DMatrix<f64>],
        rhs: &mut DVector<f64>,
    ) -> CoreResult<()> {
        check_system(self.dim(), blocks, rhs)?;
        scale_rows(&self.inv_sigmas, blocks, rhs);
        Ok(())
    }
}

/// Default penalty weight of constrained rows.
pub const DEFAULT_CONSTRAINT_MU: f64 = 1000.0;

/// Diagonal model where rows with a zero sigma are hard constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Constrained {
    sigmas: DVector<f64>,
    mu: DVector<f64>,
}

impl Constrained {
    /// Sigmas must be non-negative and finite. Zero marks a constrained row.
    pub fn from_sigmas(sigmas: DVector<f64>) -> CoreResult<Self> {
        let mu = DVector::from_element(sigmas.len(), DEFAULT_CONSTRAINT_MU);
        Self::with_mu(sigmas, mu)
    }

    /// All rows constrained.
    pub fn all(dim: usize) -> CoreResult<Self> {
        Self::from_sigmas(DVector::zeros(dim))
    }

    pub fn with_mu(sigmas: DVector<f64>, mu: DVector<f64>) -> CoreResult<Self> {
        if sigmas.is_empty() {
            return Err(
                CoreError::NoiseModel("Noise model needs at least one sigma".into()).log(),
            );
        }
        if mu.len() != sigmas.len() {
            return Err(CoreError::NoiseModel(format!(
                "Got {} penalty weights for {} sigmas",
                mu.len(),
                sigmas.len()
            ))
            .log());
        }
        if let Some(sigma) = sigmas.iter().find(|s| !(s.is_finite() && **s >= 0.0)) {
            return Err(CoreError::NoiseModel(format!(
                "Constrained sigmas must be non-negative and finite, got {sigma}"
            ))
            .log());
        }
        Ok(Constrained { sigmas, mu })
    }

    pub fn is_row_constrained(&self, row: usize) -> bool {
        self.sigmas[row] == 0.0
    }

    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    fn weights(&self) -> DVector<f64> {
        self.sigmas.map(|s| if s == 0.0 { 1.0 } else { 1.0 / s })
    }
}

impl NoiseModel for Constrained {
    fn dim(&self) -> usize {
        self.sigmas.len()
    }

    fn is_constrained(&self) -> bool {
        true
    }

    fn sigmas(&self) -> DVector<f64> {
        self.sigmas.clone()
    }

    fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        residual.component_mul(&self.weights())
    }

    fn whiten_system(
        &self,
        blocks: &mut [DMatrix<f64>],
        rhs: &mut DVector<f64>,
    ) -> CoreResult<()> {
        check_system(self.dim(), blocks, rhs)?;
        scale_rows(&self.weights(), blocks, rhs);
        Ok(())
    }

    /// Unit sigmas on free rows, zero sigmas kept on constrained rows.
    fn unit(&self) -> Option<Arc<dyn NoiseModel>> {
        let sigmas = self.sigmas.map(|s| if s == 0.0 { 0.0 } else { 1.0 });
        Some(Arc::new(Constrained {
            sigmas,
            mu: self.mu.clone(),
        }))
    }
}

/// Base noise model followed by a robust loss.
#[derive(Debug, Clone)]
pub struct RobustNoise {
    base: Arc<dyn NoiseModel>,
    loss: Arc<dyn LossFunction>,
}

impl RobustNoise {
    pub fn new(base: Arc<dyn NoiseModel>, loss: Arc<dyn LossFunction>) -> Self {
        RobustNoise { base, loss }
    }

    pub fn base(&self) -> &Arc<dyn NoiseModel> {
        &self.base
    }

    pub fn loss(&self) -> &Arc<dyn LossFunction> {
        &self.loss
    }
}

impl NoiseModel for RobustNoise {
    fn dim(&self) -> usize {
        self.base.dim()
    }

    fn is_constrained(&self) -> bool {
        self.base.is_constrained()
    }

    fn sigmas(&self) -> DVector<f64> {
        self.base.sigmas()
    }

    fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        let mut whitened = self.base.whiten(residual);
        let corrector = Corrector::new(self.loss.as_ref(), whitened.norm_squared());
        corrector.correct_residuals(&mut whitened);
        whitened
    }

    /// The correction depends on the residual, so `rhs` must be filled before calling.
    fn whiten_system(
        &self,
        blocks: &mut [DMatrix<f64>],
        rhs: &mut DVector<f64>,
    ) -> CoreResult<()> {
        self.base.whiten_system(blocks, rhs)?;
        let residual = rhs.clone();
        let corrector = Corrector::new(self.loss.as_ref(), residual.norm_squared());
        for block in blocks.iter_mut() {
            corrector.correct_jacobian(&residual, block);
        }
        corrector.correct_residuals(rhs);
        Ok(())
    }

    fn unit(&self) -> Option<Arc<dyn NoiseModel>> {
        self.base.unit()
    }

    /// `0.5 ρ(s)` with `s` the squared distance under the base model.
    fn cost(&self, residual: &DVector<f64>) -> f64 {
        let [rho, _, _] = self
            .loss
            .evaluate(self.base.squared_mahalanobis_distance(residual));
        0.5 * rho
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loss_functions::HuberLoss;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_diagonal_whitening() -> TestResult {
        let model = Diagonal::from_sigmas(DVector::from_vec(vec![0.5, 2.0]))?;
        let mut blocks = vec![DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 4.0, 4.0])];
        let mut rhs = DVector::from_vec(vec![1.0, 2.0]);
        model.whiten_system(&mut blocks, &mut rhs)?;

        assert_eq!(rhs, DVector::from_vec(vec![2.0, 1.0]));
        assert_eq!(
            blocks[0],
            DMatrix::from_row_slice(2, 2, &[2.0, 2.0, 2.0, 2.0])
        );
        Ok(())
    }

    #[test]
    fn test_diagonal_constructors_agree() -> TestResult {
        let sigmas = Diagonal::from_sigmas(DVector::from_vec(vec![0.5, 2.0]))?;
        let variances = Diagonal::from_variances(DVector::from_vec(vec![0.25, 4.0]))?;
        let precisions = Diagonal::from_precisions(DVector::from_vec(vec![4.0, 0.25]))?;
        assert!(sigmas.equals(&variances, 1e-12));
        assert!(sigmas.equals(&precisions, 1e-12));
        assert!(!sigmas.equals(&Diagonal::unit(2)?, 1e-12));
        Ok(())
    }

    #[test]
    fn test_invalid_sigmas_rejected() {
        assert!(Diagonal::from_sigmas(DVector::from_vec(vec![1.0, 0.0])).is_err());
        assert!(Diagonal::from_sigmas(DVector::from_vec(vec![-1.0])).is_err());
        assert!(Diagonal::isotropic(0, 1.0).is_err());
        assert!(Constrained::from_sigmas(DVector::from_vec(vec![-0.1])).is_err());
    }

    #[test]
    fn test_system_dimension_checked() -> TestResult {
        let model = Diagonal::unit(3)?;
        let mut blocks = vec![DMatrix::zeros(2, 1)];
        let mut rhs = DVector::zeros(3);
        assert!(matches!(
            model.whiten_system(&mut blocks, &mut rhs),
            Err(CoreError::DimensionMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_constrained_rows_unscaled() -> TestResult {
        let model = Constrained::from_sigmas(DVector::from_vec(vec![0.0, 0.5]))?;
        assert!(model.is_constrained());
        assert!(model.is_row_constrained(0));

        let mut blocks = vec![DMatrix::from_row_slice(2, 1, &[3.0, 3.0])];
        let mut rhs = DVector::from_vec(vec![1.0, 1.0]);
        model.whiten_system(&mut blocks, &mut rhs)?;
        assert_eq!(rhs, DVector::from_vec(vec![1.0, 2.0]));
        assert_eq!(blocks[0], DMatrix::from_row_slice(2, 1, &[3.0, 6.0]));
        Ok(())
    }

    #[test]
    fn test_constrained_unit_model() -> TestResult {
        let model = Constrained::from_sigmas(DVector::from_vec(vec![0.0, 0.5, 3.0]))?;
        let unit = model.unit().ok_or("constrained model must provide a unit model")?;
        assert!(unit.is_constrained());
        assert_eq!(unit.sigmas(), DVector::from_vec(vec![0.0, 1.0, 1.0]));
        assert!(NoiseModel::unit(&Diagonal::unit(3)?).is_none());
        Ok(())
    }

    #[test]
    fn test_robust_noise_downweights_outlier() -> TestResult {
        let base: Arc<dyn NoiseModel> = Arc::new(Diagonal::unit(2)?);
        let robust = RobustNoise::new(base, Arc::new(HuberLoss::new(1.0)?));

        let inlier = DVector::from_vec(vec![0.1, 0.2]);
        assert!((robust.whiten(&inlier) - &inlier).norm() < 1e-12);

        let outlier = DVector::from_vec(vec![30.0, 40.0]);
        let mut blocks = vec![DMatrix::identity(2, 2)];
        let mut rhs = outlier.clone();
        robust.whiten_system(&mut blocks, &mut rhs)?;
        // Huber with δ = 1 at |r| = 50 scales by sqrt(1/50).
        let scale = (1.0_f64 / 50.0).sqrt();
        assert!((rhs - outlier * scale).norm() < 1e-10);
        assert!((blocks[0].clone() - DMatrix::identity(2, 2) * scale).norm() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_robust_cost_uses_loss() -> TestResult {
        let base: Arc<dyn NoiseModel> = Arc::new(Diagonal::isotropic(2, 2.0)?);
        let robust = RobustNoise::new(base.clone(), Arc::new(HuberLoss::new(1.0)?));

        // Whitened norm 0.25: inside the quadratic region.
        let inlier = DVector::from_vec(vec![0.3, 0.4]);
        assert!((robust.cost(&inlier) - base.cost(&inlier)).abs() < 1e-12);
        assert!((base.cost(&inlier) - 0.5 * 0.0625).abs() < 1e-12);

        // Whitened norm 25: ρ(625) = 2 * 25 - 1.
        let outlier = DVector::from_vec(vec![30.0, 40.0]);
        assert!((robust.cost(&outlier) - 0.5 * 49.0).abs() < 1e-9);
        assert!((base.cost(&outlier) - 312.5).abs() < 1e-9);
        Ok(())
    }
}
