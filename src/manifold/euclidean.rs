//! Chart implementations for plain vector spaces, where retraction is addition and
//! the local map is subtraction.

use crate::manifold::Manifold;
use nalgebra::{DMatrix, DVector, SVector};

impl Manifold for f64 {
    const DIM: usize = 1;

    fn dim(&self) -> usize {
        1
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        self + delta[0]
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        DVector::from_element(1, other - self)
    }

    fn local_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        DMatrix::identity(1, 1)
    }
}

impl Manifold for DVector<f64> {
    const DIM: usize = 0;

    fn dim(&self) -> usize {
        self.len()
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        self + delta
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        other - self
    }

    fn local_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        DMatrix::identity(self.len(), self.len())
    }
}

impl<const N: usize> Manifold for SVector<f64, N> {
    const DIM: usize = N;

    fn dim(&self) -> usize {
        N
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        self + SVector::<f64, N>::from_column_slice(delta.as_slice())
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        DVector::from_column_slice((other - self).as_slice())
    }

    fn local_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        DMatrix::identity(N, N)
    }
}
