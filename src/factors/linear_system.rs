//! Linear systems produced by factor linearization.

use crate::core::noise_model::NoiseModel;
use crate::core::{Key, VectorValues};
use crate::factors::{FactorError, FactorResult};
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

/// Ordered Jacobian blocks and right-hand side, `Σ_k A_k δ_k ≈ b`.
///
/// Systems linearized under a constrained noise model carry that model's unit model;
/// otherwise they are already whitened and carry no model.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
    model: Option<Arc<dyn NoiseModel>>,
}

impl LinearSystem {
    /// Build a system, checking that there is one block per key and that every block
    /// has as many rows as the right-hand side.
    pub fn new(keys: Vec<Key>, blocks: Vec<DMatrix<f64>>, rhs: DVector<f64>) -> FactorResult<Self> {
        if keys.len() != blocks.len() {
            return Err(FactorError::InvalidParameters(format!(
                "Got {} blocks for {} keys",
                blocks.len(),
                keys.len()
            ))
            .log());
        }
        if let Some(block) = blocks.iter().find(|block| block.nrows() != rhs.len()) {
            return Err(FactorError::InvalidDimension {
                expected: rhs.len(),
                actual: block.nrows(),
            }
            .log());
        }
        Ok(LinearSystem {
            keys,
            blocks,
            rhs,
            model: None,
        })
    }

    /// Attach a noise model to the system.
    pub fn with_model(mut self, model: Arc<dyn NoiseModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    pub fn block(&self, key: impl AsRef<str>) -> Option<&DMatrix<f64>> {
        let key = key.as_ref();
        self.keys
            .iter()
            .position(|k| k.as_str() == key)
            .map(|index| &self.blocks[index])
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub fn model(&self) -> Option<&Arc<dyn NoiseModel>> {
        self.model.as_ref()
    }

    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    /// Total number of columns over all blocks.
    pub fn cols(&self) -> usize {
        self.blocks.iter().map(|block| block.ncols()).sum()
    }

    /// Horizontally stacked `A` and the right-hand side `b`.
    pub fn jacobian(&self) -> (DMatrix<f64>, DVector<f64>) {
        let mut a = DMatrix::zeros(self.rows(), self.cols());
        let mut offset = 0;
        for block in &self.blocks {
            a.view_mut((0, offset), block.shape()).copy_from(block);
            offset += block.ncols();
        }
        (a, self.rhs.clone())
    }

    /// Augmented matrix `[A | b]`.
    pub fn augmented(&self) -> DMatrix<f64> {
        let (a, b) = self.jacobian();
        let mut ab = a.insert_column(self.cols(), 0.0);
        ab.set_column(self.cols(), &b);
        ab
    }

    /// Whiten blocks and right-hand side in place.
    pub fn whiten_with(&mut self, model: &dyn NoiseModel) -> FactorResult<()> {
        model.whiten_system(&mut self.blocks, &mut self.rhs)?;
        Ok(())
    }

    /// Cost `0.5 ||A δ - b||²`, whitened by the attached model if there is one.
    /// Keys missing from `delta` contribute nothing.
    pub fn error(&self, delta: &VectorValues) -> FactorResult<f64> {
        let mut residual = -self.rhs.clone();
        for (key, block) in self.keys.iter().zip(&self.blocks) {
            if let Some(d) = delta.get(key.as_str()) {
                if d.len() != block.ncols() {
                    return Err(FactorError::InvalidDimension {
                        expected: block.ncols(),
                        actual: d.len(),
                    }
                    .log());
                }
                residual += block * d;
            }
        }
        if let Some(model) = &self.model {
            residual = model.whiten(&residual);
        }
        Ok(0.5 * residual.norm_squared())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::noise_model::Diagonal;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample() -> FactorResult<LinearSystem> {
        LinearSystem::new(
            vec![Key::from("a"), Key::from("b")],
            vec![
                DMatrix::from_row_slice(2, 1, &[1.0, 2.0]),
                DMatrix::from_row_slice(2, 2, &[3.0, 4.0, 5.0, 6.0]),
            ],
            DVector::from_vec(vec![7.0, 8.0]),
        )
    }

    #[test]
    fn test_dense_views() -> TestResult {
        let system = sample()?;
        let (a, b) = system.jacobian();
        assert_eq!(
            a,
            DMatrix::from_row_slice(2, 3, &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0])
        );
        assert_eq!(b, DVector::from_vec(vec![7.0, 8.0]));
        assert_eq!(
            system.augmented(),
            DMatrix::from_row_slice(2, 4, &[1.0, 3.0, 4.0, 7.0, 2.0, 5.0, 6.0, 8.0])
        );
        Ok(())
    }

    #[test]
    fn test_block_lookup() -> TestResult {
        let system = sample()?;
        assert_eq!(system.block("b").map(|b| b.ncols()), Some(2));
        assert!(system.block("c").is_none());
        Ok(())
    }

    #[test]
    fn test_shape_validation() {
        let mismatched_rows = LinearSystem::new(
            vec![Key::from("a")],
            vec![DMatrix::zeros(3, 1)],
            DVector::zeros(2),
        );
        assert!(matches!(
            mismatched_rows,
            Err(FactorError::InvalidDimension { expected: 2, actual: 3 })
        ));

        let missing_block = LinearSystem::new(vec![Key::from("a")], vec![], DVector::zeros(2));
        assert!(missing_block.is_err());
    }

    #[test]
    fn test_error_at_zero_and_solution() -> TestResult {
        let system = LinearSystem::new(
            vec![Key::from("a")],
            vec![DMatrix::identity(2, 2)],
            DVector::from_vec(vec![1.0, -2.0]),
        )?;
        assert!((system.error(&VectorValues::new())? - 2.5).abs() < 1e-12);

        let solution = VectorValues::single("a", DVector::from_vec(vec![1.0, -2.0]));
        assert!(system.error(&solution)?.abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_whiten_with() -> TestResult {
        let mut system = sample()?;
        system.whiten_with(&Diagonal::isotropic(2, 0.5)?)?;
        assert_eq!(system.rhs(), &DVector::from_vec(vec![14.0, 16.0]));
        assert_eq!(
            system.blocks()[0],
            DMatrix::from_row_slice(2, 1, &[2.0, 4.0])
        );
        Ok(())
    }
}
