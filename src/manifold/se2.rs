//! SE(2) - Special Euclidean Group in 2D
//!
//! SE(2) elements are stored as a translation `Vector2` and a rotation `UnitComplex`.
//! Tangent elements are `[x, y, θ]`, translation first.
//!
//! The closed forms follow the [manif](https://github.com/artivis/manif) conventions.

use crate::manifold::{LieGroup, Tangent, so2::SO2};
use nalgebra::{DVector, Matrix2, Matrix3, Point2, UnitComplex, Vector2, Vector3};
use std::{
    fmt,
    fmt::{Display, Formatter},
    ops::Neg,
};

/// SE(2) group element representing rigid body transformations in 2D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2 {
    translation: Vector2<f64>,
    rotation: UnitComplex<f64>,
}

impl Display for SE2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            self.translation.x,
            self.translation.y,
            self.angle()
        )
    }
}

impl From<DVector<f64>> for SE2 {
    fn from(data: DVector<f64>) -> Self {
        SE2::from_xy_angle(data[0], data[1], data[2])
    }
}

impl From<SE2> for DVector<f64> {
    fn from(se2: SE2) -> Self {
        DVector::from_vec(vec![se2.translation.x, se2.translation.y, se2.angle()])
    }
}

impl SE2 {
    pub fn identity() -> Self {
        SE2 {
            translation: Vector2::zeros(),
            rotation: UnitComplex::identity(),
        }
    }

    pub fn new(translation: Vector2<f64>, rotation: UnitComplex<f64>) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        Self::new(Vector2::new(x, y), UnitComplex::from_angle(theta))
    }

    pub fn from_translation_so2(translation: Vector2<f64>, rotation: SO2) -> Self {
        Self::new(translation, rotation.complex())
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation_so2(&self) -> SO2 {
        SO2::new(self.rotation)
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Transform a point from the local frame into the world frame.
    pub fn transform_point(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.rotation.transform_point(&Point2::from(*point)).coords + self.translation
    }
}

/// `(sin θ / θ, (1 - cos θ) / θ)` with a Taylor expansion near zero.
fn sinc_terms(theta: f64) -> (f64, f64) {
    let theta_sq = theta * theta;
    if theta_sq < f64::EPSILON {
        (1.0 - theta_sq / 6.0, 0.5 * theta - theta * theta_sq / 24.0)
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / theta)
    }
}

impl LieGroup for SE2 {
    type TangentVector = SE2Tangent;
    type JacobianMatrix = Matrix3<f64>;

    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self {
        let rot_inv = self.rotation.inverse();
        let trans_inv = -(rot_inv * self.translation);

        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }

        SE2::new(trans_inv, rot_inv)
    }

    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let result = SE2::new(
            self.transform_point(&other.translation),
            self.rotation * other.rotation,
        );

        if let Some(jac_self) = jacobian_self {
            *jac_self = other.inverse(None).adjoint();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = Matrix3::identity();
        }

        result
    }

    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector {
        let theta = self.angle();
        let (a, b) = sinc_terms(theta);
        let den = 1.0 / (a * a + b * b);
        let (a, b) = (a * den, b * den);

        let result = SE2Tangent::new(
            a * self.x() + b * self.y(),
            -b * self.x() + a * self.y(),
            theta,
        );

        if let Some(jac) = jacobian {
            *jac = result.right_jacobian_inv();
        }

        result
    }

    fn adjoint(&self) -> Self::JacobianMatrix {
        let mut adjoint_matrix = Matrix3::identity();
        adjoint_matrix
            .fixed_view_mut::<2, 2>(0, 0)
            .copy_from(&self.rotation_matrix());
        adjoint_matrix[(0, 2)] = self.y();
        adjoint_matrix[(1, 2)] = -self.x();
        adjoint_matrix
    }

    fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let translation = Vector2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0));
        let angle = rng.random_range(-std::f64::consts::PI..std::f64::consts::PI);
        SE2::new(translation, UnitComplex::from_angle(angle))
    }

    fn jacobian_identity(&self) -> Self::JacobianMatrix {
        Matrix3::identity()
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other, None, None).is_zero(tolerance)
    }
}

crate::manifold::impl_lie_group_chart!(SE2);

/// SE(2) tangent space element `[x, y, θ]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SE2Tangent {
    data: Vector3<f64>,
}

impl Display for SE2Tangent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "se2(x: {:.4}, y: {:.4}, theta: {:.4})",
            self.x(),
            self.y(),
            self.angle()
        )
    }
}

impl From<DVector<f64>> for SE2Tangent {
    fn from(data: DVector<f64>) -> Self {
        SE2Tangent::new(data[0], data[1], data[2])
    }
}

impl From<SE2Tangent> for DVector<f64> {
    fn from(tangent: SE2Tangent) -> Self {
        DVector::from_column_slice(tangent.data.as_slice())
    }
}

impl Neg for SE2Tangent {
    type Output = SE2Tangent;

    fn neg(self) -> Self::Output {
        SE2Tangent { data: -self.data }
    }
}

impl SE2Tangent {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        SE2Tangent {
            data: Vector3::new(x, y, theta),
        }
    }

    pub fn x(&self) -> f64 {
        self.data[0]
    }

    pub fn y(&self) -> f64 {
        self.data[1]
    }

    pub fn angle(&self) -> f64 {
        self.data[2]
    }
}

impl Tangent<SE2> for SE2Tangent {
    const DIM: usize = 3;

    fn exp(&self, jacobian: Option<&mut Matrix3<f64>>) -> SE2 {
        let theta = self.angle();
        let (a, b) = sinc_terms(theta);
        let translation = Vector2::new(a * self.x() - b * self.y(), b * self.x() + a * self.y());
        let rotation = UnitComplex::from_cos_sin_unchecked(theta.cos(), theta.sin());

        if let Some(jac) = jacobian {
            *jac = self.right_jacobian();
        }

        SE2::new(translation, rotation)
    }

    fn right_jacobian(&self) -> Matrix3<f64> {
        let theta = self.angle();
        let theta_sq = theta * theta;
        let (a, b) = sinc_terms(theta);
        let (x, y) = (self.x(), self.y());

        let mut jac = Matrix3::identity();
        jac[(0, 0)] = a;
        jac[(0, 1)] = b;
        jac[(1, 0)] = -b;
        jac[(1, 1)] = a;

        if theta_sq < f64::EPSILON {
            jac[(0, 2)] = -y / 2.0 + theta * x / 6.0;
            jac[(1, 2)] = x / 2.0 + theta * y / 6.0;
        } else {
            let (cos_theta, sin_theta) = (theta.cos(), theta.sin());
            jac[(0, 2)] = (-y + theta * x + y * cos_theta - x * sin_theta) / theta_sq;
            jac[(1, 2)] = (x + theta * y - x * cos_theta - y * sin_theta) / theta_sq;
        }

        jac
    }

    fn left_jacobian(&self) -> Matrix3<f64> {
        (-self.clone()).right_jacobian()
    }

    fn right_jacobian_inv(&self) -> Matrix3<f64> {
        let theta = self.angle();
        let theta_sq = theta * theta;
        let (x, y) = (self.x(), self.y());

        let mut jac_inv = Matrix3::zeros();
        jac_inv[(0, 1)] = -theta * 0.5;
        jac_inv[(1, 0)] = theta * 0.5;
        jac_inv[(2, 2)] = 1.0;

        if theta_sq > f64::EPSILON {
            let (cos_theta, sin_theta) = (theta.cos(), theta.sin());
            let a = theta * sin_theta;
            let b = theta * cos_theta;
            jac_inv[(0, 0)] = -a / (2.0 * cos_theta - 2.0);
            jac_inv[(1, 1)] = jac_inv[(0, 0)];

            let den = 2.0 * theta * (cos_theta - 1.0);
            jac_inv[(0, 2)] =
                (a * x + b * y - theta * y + 2.0 * x * cos_theta - 2.0 * x) / den;
            jac_inv[(1, 2)] =
                (-b * x + a * y + theta * x + 2.0 * y * cos_theta - 2.0 * y) / den;
        } else {
            jac_inv[(0, 0)] = 1.0 - theta_sq / 12.0;
            jac_inv[(1, 1)] = jac_inv[(0, 0)];
            jac_inv[(0, 2)] = y / 2.0 + theta * x / 12.0;
            jac_inv[(1, 2)] = -x / 2.0 + theta * y / 12.0;
        }

        jac_inv
    }

    /// Uses `Jl(τ) = Jr(-τ)`.
    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        (-self.clone()).right_jacobian_inv()
    }

    fn zero() -> SE2Tangent {
        SE2Tangent::new(0.0, 0.0, 0.0)
    }

    fn random() -> SE2Tangent {
        use rand::Rng;
        let mut rng = rand::rng();
        SE2Tangent::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-0.5..0.5),
        )
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
