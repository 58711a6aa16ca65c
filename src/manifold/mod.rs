//! Manifold representations and the chart abstraction used for differentiation.
//!
//! Every variable handled by the crate lives on a manifold with a tangent dimension
//! `N`, a retraction `retract(x, d)` mapping a tangent vector `d` onto the manifold,
//! and a local map `local(x, y)` that is its inverse:
//!
//! ```text
//! local(x, retract(x, d)) == d      for small d
//! ```
//!
//! Lie groups implement the chart with the right-perturbation convention used by the
//! [manif](https://github.com/artivis/manif) library:
//!
//! ```text
//! retract(x, d) = x ∘ Exp(d)
//! local(x, y)   = Log(x⁻¹ ∘ y)
//! ```
//!
//! Lie group M,° | size   | dim | X ∈ M             | Exp(T)        | Comp.
//! ------------- | ------ | --- | ----------------- | ------------- | -----
//! n-D vector    | Rⁿ,+   | n   | v ∈ Rⁿ            | v = exp(v)    | v₁+v₂
//! Rotation      | SO(2),.| 1   | R                 | R = exp([θ]x) | R₁R₂
//! Rigid motion  | SE(2),.| 3   | M = [R t; 0 1]    | Exp([v̂])      | M₁M₂
//!
//! Plain Euclidean values (`f64`, `DVector<f64>`, `SVector<f64, N>`) implement the
//! chart directly in [`euclidean`].

use nalgebra::{DMatrix, DVector};
use std::ops::{Index, Mul, Neg};
use std::{
    error, fmt,
    fmt::{Display, Formatter},
};

pub mod euclidean;
pub mod rn;
pub mod se2;
pub mod so2;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifoldError {
    /// Invalid tangent vector dimension
    InvalidTangentDimension { expected: usize, actual: usize },
    /// NaN or Inf detected in manifold element
    InvalidNumber,
}

impl Display for ManifoldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldError::InvalidTangentDimension { expected, actual } => {
                write!(
                    f,
                    "Invalid tangent dimension: expected {expected}, got {actual}"
                )
            }
            ManifoldError::InvalidNumber => {
                write!(f, "Invalid number: NaN or Inf detected")
            }
        }
    }
}

impl error::Error for ManifoldError {}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Chart on a manifold: tangent dimension, retraction and local coordinates.
///
/// This is the only capability the finite-difference engine and the factor layer
/// require from a value type.
pub trait Manifold: Clone + Send + Sync + 'static {
    /// Compile-time tangent dimension, `0` when only known at runtime.
    const DIM: usize;

    /// Tangent dimension of this particular value.
    fn dim(&self) -> usize;

    /// Move along the tangent vector `delta`, expressed at `self`.
    fn retract(&self, delta: &DVector<f64>) -> Self;

    /// Tangent vector at `self` pointing to `other`.
    fn local(&self, other: &Self) -> DVector<f64>;

    /// Derivative of `y ↦ local(self, y)` at `y = other`, with `y` perturbed
    /// through its own retraction.
    fn local_jacobian(&self, other: &Self) -> DMatrix<f64>;

    /// Checks that `delta` has the tangent dimension of `self`.
    fn check_tangent(&self, delta: &DVector<f64>) -> ManifoldResult<()> {
        if delta.len() != self.dim() {
            return Err(ManifoldError::InvalidTangentDimension {
                expected: self.dim(),
                actual: delta.len(),
            });
        }
        if delta.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        Ok(())
    }
}

/// Core trait for Lie group operations.
///
/// Jacobians follow the right-perturbation convention: for `y = f(x)` the block
/// `J` satisfies `f(x ∘ Exp(τ)) ≈ f(x) ∘ Exp(J τ)`.
pub trait LieGroup: Clone + PartialEq + Send + Sync + 'static {
    /// The tangent space vector type
    type TangentVector: Tangent<Self>;

    /// The Jacobian matrix type
    type JacobianMatrix: Clone
        + Neg<Output = Self::JacobianMatrix>
        + Mul<Output = Self::JacobianMatrix>
        + Index<(usize, usize), Output = f64>;

    /// Group inverse `g⁻¹`.
    fn inverse(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self;

    /// Group composition `self ∘ other`.
    fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self;

    /// Logarithmic map to the tangent space.
    fn log(&self, jacobian: Option<&mut Self::JacobianMatrix>) -> Self::TangentVector;

    /// Adjoint matrix `Ad(g)`.
    fn adjoint(&self) -> Self::JacobianMatrix;

    fn random() -> Self;

    fn jacobian_identity(&self) -> Self::JacobianMatrix;

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool;

    /// Right plus `g ⊕ τ = g ∘ Exp(τ)`.
    fn right_plus(
        &self,
        tangent: &Self::TangentVector,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_tangent: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let exp_tangent = tangent.exp(None);

        if let Some(jac_tangent) = jacobian_tangent {
            *jac_tangent = tangent.right_jacobian();
        }

        self.compose(&exp_tangent, jacobian_self, None)
    }

    /// Right minus `g₁ ⊖ g₂ = Log(g₂⁻¹ ∘ g₁)`.
    fn right_minus(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector {
        let result = other.inverse(None).compose(self, None, None).log(None);

        if let Some(jac_self) = jacobian_self {
            *jac_self = result.right_jacobian_inv();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = -result.left_jacobian_inv();
        }

        result
    }

    fn plus(
        &self,
        tangent: &Self::TangentVector,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_tangent: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        self.right_plus(tangent, jacobian_self, jacobian_tangent)
    }

    fn minus(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self::TangentVector {
        self.right_minus(other, jacobian_self, jacobian_other)
    }

    /// Relative transform `self⁻¹ ∘ other`.
    fn between(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Self::JacobianMatrix>,
        jacobian_other: Option<&mut Self::JacobianMatrix>,
    ) -> Self {
        let result = self.inverse(None).compose(other, None, None);

        if let Some(jac_self) = jacobian_self {
            *jac_self = -result.inverse(None).adjoint();
        }

        if let Some(jac_other) = jacobian_other {
            *jac_other = other.jacobian_identity();
        }

        result
    }

    fn tangent_dim(&self) -> usize {
        Self::TangentVector::DIM
    }

    /// Copies a Jacobian of this group into a dense square matrix.
    fn dense_jacobian(&self, jacobian: &Self::JacobianMatrix) -> DMatrix<f64> {
        let dim = self.tangent_dim();
        DMatrix::from_fn(dim, dim, |r, c| jacobian[(r, c)])
    }
}

/// Tangent space (Lie algebra coordinates) of a Lie group.
pub trait Tangent<Group: LieGroup>:
    Clone + PartialEq + From<DVector<f64>> + Into<DVector<f64>>
{
    /// Tangent dimension, `0` for dynamically sized groups.
    const DIM: usize;

    /// Exponential map to the group.
    fn exp(&self, jacobian: Option<&mut Group::JacobianMatrix>) -> Group;

    fn right_jacobian(&self) -> Group::JacobianMatrix;

    fn left_jacobian(&self) -> Group::JacobianMatrix;

    fn right_jacobian_inv(&self) -> Group::JacobianMatrix;

    fn left_jacobian_inv(&self) -> Group::JacobianMatrix;

    fn zero() -> Group::TangentVector;

    fn random() -> Group::TangentVector;

    fn is_zero(&self, tolerance: f64) -> bool;
}

/// Implements [`Manifold`] for fixed-size Lie groups through right plus and minus.
macro_rules! impl_lie_group_chart {
    ($($group:ty),* $(,)?) => {$(
        impl $crate::manifold::Manifold for $group {
            const DIM: usize =
                <<$group as $crate::manifold::LieGroup>::TangentVector as $crate::manifold::Tangent<$group>>::DIM;

            fn dim(&self) -> usize {
                $crate::manifold::LieGroup::tangent_dim(self)
            }

            fn retract(&self, delta: &nalgebra::DVector<f64>) -> Self {
                let tangent = <$group as $crate::manifold::LieGroup>::TangentVector::from(delta.clone());
                $crate::manifold::LieGroup::plus(self, &tangent, None, None)
            }

            fn local(&self, other: &Self) -> nalgebra::DVector<f64> {
                $crate::manifold::LieGroup::minus(other, self, None, None).into()
            }

            fn local_jacobian(&self, other: &Self) -> nalgebra::DMatrix<f64> {
                let mut jacobian = $crate::manifold::LieGroup::jacobian_identity(self);
                $crate::manifold::LieGroup::minus(other, self, Some(&mut jacobian), None);
                $crate::manifold::LieGroup::dense_jacobian(self, &jacobian)
            }
        }
    )*};
}

pub(crate) use impl_lie_group_chart;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::se2::SE2;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_manifold_error_display() {
        let error = ManifoldError::InvalidTangentDimension {
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            error.to_string(),
            "Invalid tangent dimension: expected 3, got 2"
        );
        assert!(ManifoldError::InvalidNumber.to_string().contains("NaN"));
    }

    #[test]
    fn test_check_tangent_rejects_wrong_dimension() {
        let pose = SE2::from_xy_angle(1.0, 2.0, 0.3);
        let result = pose.check_tangent(&DVector::from_vec(vec![0.1, 0.2]));
        assert_eq!(
            result,
            Err(ManifoldError::InvalidTangentDimension {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_check_tangent_rejects_nan() {
        let pose = SE2::from_xy_angle(1.0, 2.0, 0.3);
        let result = pose.check_tangent(&DVector::from_vec(vec![0.1, f64::NAN, 0.0]));
        assert_eq!(result, Err(ManifoldError::InvalidNumber));
    }

    #[test]
    fn test_between_jacobians_match_composition() -> TestResult {
        let a = SE2::from_xy_angle(1.0, -0.5, 0.4);
        let b = SE2::from_xy_angle(2.0, 0.5, -0.9);
        let mut j_a = a.jacobian_identity();
        let mut j_b = a.jacobian_identity();
        let relative = a.between(&b, Some(&mut j_a), Some(&mut j_b));

        let expected = a.inverse(None).compose(&b, None, None);
        assert!(relative.is_approx(&expected, 1e-12));

        // Perturbing `other` moves the result by the same tangent amount.
        let delta = DVector::from_vec(vec![1e-3, -2e-3, 5e-4]);
        let moved = a.between(&b.retract(&delta), None, None);
        let predicted = relative.retract(&(a.dense_jacobian(&j_b) * &delta));
        assert!(moved.local(&predicted).norm() < 1e-10);
        Ok(())
    }
}
