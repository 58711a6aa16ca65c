//! SO(2) - Special Orthogonal Group in 2D
//!
//! SO(2) elements are represented using nalgebra's UnitComplex internally, tangent
//! elements as a single angle in radians. Being abelian and one-dimensional, every
//! Jacobian of the group is the 1x1 identity up to sign.

use crate::manifold::{LieGroup, Tangent};
use nalgebra::{DVector, Matrix1, Matrix2, UnitComplex};
use std::{
    fmt,
    fmt::{Display, Formatter},
    ops::Neg,
};

/// SO(2) group element.
#[derive(Clone, Debug, PartialEq)]
pub struct SO2 {
    complex: UnitComplex<f64>,
}

impl Display for SO2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SO2(angle: {:.4})", self.complex.angle())
    }
}

impl From<DVector<f64>> for SO2 {
    fn from(data: DVector<f64>) -> Self {
        SO2::from_angle(data[0])
    }
}

impl From<SO2> for DVector<f64> {
    fn from(so2: SO2) -> Self {
        DVector::from_vec(vec![so2.complex.angle()])
    }
}

impl SO2 {
    pub fn identity() -> Self {
        SO2 {
            complex: UnitComplex::identity(),
        }
    }

    pub fn new(complex: UnitComplex<f64>) -> Self {
        SO2 { complex }
    }

    pub fn from_angle(angle: f64) -> Self {
        SO2::new(UnitComplex::from_angle(angle))
    }

    pub fn complex(&self) -> UnitComplex<f64> {
        self.complex
    }

    pub fn angle(&self) -> f64 {
        self.complex.angle()
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.complex.to_rotation_matrix().into_inner()
    }
}

impl LieGroup for SO2 {
    type TangentVector = SO2Tangent;
    type JacobianMatrix = Matrix1<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }
        SO2 {
            complex: self.complex.inverse(),
        }
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        if let Some(jac_self) = jacobian_self {
            *jac_self = other.inverse(None).adjoint();
        }
        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix1::identity();
        }
        SO2 {
            complex: self.complex * other.complex,
        }
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        if let Some(jac) = jacobian {
            *jac = Matrix1::identity();
        }
        SO2Tangent {
            data: self.complex.angle(),
        }
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        Matrix1::identity()
    }

    fn random() -> Self {
        SO2::from_angle(rand::random::<f64>() * 2.0 * std::f64::consts::PI)
    }

    fn jacobian_identity(&self) -> Self::JacobianMatrix {
        Matrix1::identity()
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other, None, None).is_zero(tolerance)
    }
}

crate::manifold::impl_lie_group_chart!(SO2);

/// SO(2) tangent space element, the rotation angle.
#[derive(Clone, Debug, PartialEq)]
pub struct SO2Tangent {
    data: f64,
}

impl Display for SO2Tangent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "so2(angle: {:.4})", self.data)
    }
}

impl From<DVector<f64>> for SO2Tangent {
    fn from(data: DVector<f64>) -> Self {
        SO2Tangent { data: data[0] }
    }
}

impl From<SO2Tangent> for DVector<f64> {
    fn from(tangent: SO2Tangent) -> Self {
        DVector::from_vec(vec![tangent.data])
    }
}

impl Neg for SO2Tangent {
    type Output = SO2Tangent;

    fn neg(self) -> Self::Output {
        SO2Tangent { data: -self.data }
    }
}

impl SO2Tangent {
    pub fn new(angle: f64) -> Self {
        SO2Tangent { data: angle }
    }

    pub fn angle(&self) -> f64 {
        self.data
    }
}

impl Tangent<SO2> for SO2Tangent {
    const DIM: usize = 1;

    fn exp(&self, jacobian: Option<&mut Matrix1<f64>>) -> SO2 {
        if let Some(jac) = jacobian {
            *jac = Matrix1::identity();
        }
        SO2::from_angle(self.data)
    }

    fn right_jacobian(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn left_jacobian(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn right_jacobian_inv(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn left_jacobian_inv(&self) -> Matrix1<f64> {
        Matrix1::identity()
    }

    fn zero() -> SO2Tangent {
        SO2Tangent { data: 0.0 }
    }

    fn random() -> SO2Tangent {
        SO2Tangent {
            data: rand::random::<f64>() * 0.2 - 0.1,
        }
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.abs() < tolerance
    }
}
