//! Rn - n-dimensional Euclidean space with vector addition as the group operation.
//!
//! Both elements and tangent elements wrap a `DVector<f64>`, so the dimension is only
//! known at runtime and `Tangent::DIM` is `0`.

use crate::manifold::{LieGroup, Manifold, Tangent};
use nalgebra::{DMatrix, DVector};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Rn group element.
#[derive(Clone, Debug, PartialEq)]
pub struct Rn {
    data: DVector<f64>,
}

impl Display for Rn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Rn(dim: {}, data: [", self.data.len())?;
        for (i, val) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", val)?;
        }
        write!(f, "])")
    }
}

impl From<DVector<f64>> for Rn {
    fn from(data: DVector<f64>) -> Self {
        Rn::new(data)
    }
}

impl From<Rn> for DVector<f64> {
    fn from(rn: Rn) -> Self {
        rn.data
    }
}

impl Rn {
    pub fn new(data: DVector<f64>) -> Self {
        Rn { data }
    }

    pub fn from_slice(slice: &[f64]) -> Self {
        Rn::new(DVector::from_row_slice(slice))
    }

    pub fn zeros(dim: usize) -> Self {
        Rn::new(DVector::zeros(dim))
    }

    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl LieGroup for Rn {
    type TangentVector = RnTangent;
    type JacobianMatrix = DMatrix<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.jacobian_identity();
        }
        Rn::new(-&self.data)
    }

    /// Panics when the operands have different lengths, as nalgebra addition does.
    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac_self) = jacobian_self {
            *jac_self = self.jacobian_identity();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = self.jacobian_identity();
        }
        Rn::new(&self.data + &other.data)
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        if let Some(jac) = jacobian {
            *jac = self.jacobian_identity();
        }
        RnTangent::new(self.data.clone())
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        self.jacobian_identity()
    }

    fn random() -> Self {
        Rn::new(DVector::from_fn(3, |_, _| rand::random::<f64>() * 10.0 - 5.0))
    }

    fn jacobian_identity(&self) -> Self::JacobianMatrix {
        DMatrix::identity(self.data.len(), self.data.len())
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.data.len() == other.data.len() && (&self.data - &other.data).norm() < tolerance
    }

    fn tangent_dim(&self) -> usize {
        self.data.len()
    }
}

impl Manifold for Rn {
    const DIM: usize = 0;

    fn dim(&self) -> usize {
        self.data.len()
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        Rn::new(&self.data + delta)
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        &other.data - &self.data
    }

    fn local_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        self.jacobian_identity()
    }
}

/// Rn tangent space element.
#[derive(Clone, Debug, PartialEq)]
pub struct RnTangent {
    data: DVector<f64>,
}

impl From<DVector<f64>> for RnTangent {
    fn from(data: DVector<f64>) -> Self {
        RnTangent::new(data)
    }
}

impl From<RnTangent> for DVector<f64> {
    fn from(tangent: RnTangent) -> Self {
        tangent.data
    }
}

impl RnTangent {
    pub fn new(data: DVector<f64>) -> Self {
        RnTangent { data }
    }

    pub fn zeros(dim: usize) -> Self {
        RnTangent::new(DVector::zeros(dim))
    }

    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    fn identity(&self) -> DMatrix<f64> {
        DMatrix::identity(self.data.len(), self.data.len())
    }
}

impl Tangent<Rn> for RnTangent {
    const DIM: usize = 0;

    fn exp(&self, jacobian: Option<&mut DMatrix<f64>>) -> Rn {
        if let Some(jac) = jacobian {
            *jac = self.identity();
        }
        Rn::new(self.data.clone())
    }

    fn right_jacobian(&self) -> DMatrix<f64> {
        self.identity()
    }

    fn left_jacobian(&self) -> DMatrix<f64> {
        self.identity()
    }

    fn right_jacobian_inv(&self) -> DMatrix<f64> {
        self.identity()
    }

    fn left_jacobian_inv(&self) -> DMatrix<f64> {
        self.identity()
    }

    // Default to 3D for compatibility with the fixed-size groups.
    fn zero() -> RnTangent {
        RnTangent::zeros(3)
    }

    fn random() -> RnTangent {
        RnTangent::new(DVector::from_fn(3, |_, _| rand::random::<f64>() * 2.0 - 1.0))
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rn_compose_is_addition() {
        let a = Rn::from_slice(&[1.0, 2.0, 3.0]);
        let b = Rn::from_slice(&[0.5, -1.0, 2.0]);
        let sum = a.compose(&b, None, None);
        assert_eq!(sum.data(), &DVector::from_vec(vec![1.5, 1.0, 5.0]));
    }

    #[test]
    fn test_rn_inverse_jacobian() {
        let a = Rn::from_slice(&[1.0, -2.0]);
        let mut jacobian = DMatrix::zeros(0, 0);
        let inverse = a.inverse(Some(&mut jacobian));
        assert_eq!(inverse.data(), &DVector::from_vec(vec![-1.0, 2.0]));
        assert_eq!(jacobian, -DMatrix::<f64>::identity(2, 2));
    }

    #[test]
    fn test_rn_chart_is_vector_difference() {
        let x = Rn::from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let y = Rn::from_slice(&[2.0, 0.0, 1.0, 3.0]);
        assert_eq!(x.local(&y), DVector::from_vec(vec![1.0, -1.0, 0.0, 2.0]));
        assert_eq!(x.retract(&x.local(&y)), y);
        assert_eq!(x.dim(), 4);
    }

    #[test]
    fn test_rn_random_chart_round_trip() {
        for _ in 0..20 {
            let x = Rn::random();
            let d: DVector<f64> = RnTangent::random().into();
            assert!((x.local(&x.retract(&d)) - &d).norm() < 1e-12);
            assert_eq!(x.dim(), d.len());
        }
    }

    #[test]
    fn test_rn_minus_through_lie_group() {
        let x = Rn::from_slice(&[1.0, 2.0]);
        let y = Rn::from_slice(&[4.0, 6.0]);
        let tangent: DVector<f64> = y.minus(&x, None, None).into();
        assert_eq!(tangent, DVector::from_vec(vec![3.0, 4.0]));
    }
}
