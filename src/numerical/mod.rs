//! Finite-difference differentiation on manifolds.
//!
//! All derivatives are central differences taken in tangent coordinates. Argument
//! `x` is perturbed through its chart, `x ⊕ (±δ e_j)`, and outputs are compared in
//! the local coordinates of the unperturbed output `y0 = h(x)`:
//!
//! ```text
//! J[:, j] = (local(y0, h(x ⊕ δ e_j)) - local(y0, h(x ⊕ -δ e_j))) / 2δ
//! ```
//!
//! The truncation error is O(δ²). The step is always chosen by the caller, with
//! [`DEFAULT_STEP`] as the usual choice; there is no adaptive step selection.
//!
//! Multi-argument variants are named after the argument count and the argument
//! being differentiated: `numerical_derivative32` differentiates a three-argument
//! function with respect to its second argument. Each of them fixes the other
//! arguments and delegates to [`numerical_derivative11`].
//!
//! # Example
//!
//! ```
//! use apex_numdiff::numerical::{DEFAULT_STEP, numerical_derivative11};
//! use nalgebra::{Matrix2, Vector2};
//!
//! let a = Matrix2::new(1.0, 2.0, 3.0, 4.0);
//! let jacobian = numerical_derivative11(|x: &Vector2<f64>| a * x, &Vector2::new(0.5, -1.0), DEFAULT_STEP);
//! assert!((jacobian[(1, 0)] - 3.0).abs() < 1e-8);
//! ```

pub mod check;
pub mod linearization;

pub use check::{
    JacobianCheckConfig, JacobianCheckReport, check_factor_jacobians,
    check_factor_jacobians_with_config,
};
pub use linearization::numerical_linearization;

use crate::core::{CoreError, CoreResult};
use crate::manifold::Manifold;
use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Default finite-difference step.
pub const DEFAULT_STEP: f64 = 1e-5;

fn check_step(delta: f64) {
    if !(delta.is_finite() && delta > 0.0) {
        warn!("Finite-difference step {delta} is not a positive number");
    }
}

/// Gradient of a scalar function.
pub fn numerical_gradient<X, F>(h: F, x: &X, delta: f64) -> DVector<f64>
where
    X: Manifold,
    F: Fn(&X) -> f64,
{
    check_step(delta);
    let n = x.dim();
    let mut gradient = DVector::zeros(n);
    let mut d = DVector::zeros(n);
    for j in 0..n {
        d[j] = delta;
        let plus = h(&x.retract(&d));
        d[j] = -delta;
        let minus = h(&x.retract(&d));
        d[j] = 0.0;
        gradient[j] = (plus - minus) / (2.0 * delta);
    }
    gradient
}

/// Jacobian of `h` at `x`, of size `dim(h(x)) × dim(x)`.
pub fn numerical_derivative11<Y, X, F>(h: F, x: &X, delta: f64) -> DMatrix<f64>
where
    Y: Manifold,
    X: Manifold,
    F: Fn(&X) -> Y,
{
    check_step(delta);
    let y0 = h(x);
    let n = x.dim();
    let mut jacobian = DMatrix::zeros(y0.dim(), n);
    let mut d = DVector::zeros(n);
    for j in 0..n {
        d[j] = delta;
        let plus = y0.local(&h(&x.retract(&d)));
        d[j] = -delta;
        let minus = y0.local(&h(&x.retract(&d)));
        d[j] = 0.0;
        jacobian.set_column(j, &((plus - minus) / (2.0 * delta)));
    }
    jacobian
}

pub fn numerical_derivative21<Y, X1, X2, F>(h: F, x1: &X1, x2: &X2, delta: f64) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> Y,
{
    numerical_derivative11(|a: &X1| h(a, x2), x1, delta)
}

pub fn numerical_derivative22<Y, X1, X2, F>(h: F, x1: &X1, x2: &X2, delta: f64) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> Y,
{
    numerical_derivative11(|b: &X2| h(x1, b), x2, delta)
}

pub fn numerical_derivative31<Y, X1, X2, X3, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> Y,
{
    numerical_derivative11(|a: &X1| h(a, x2, x3), x1, delta)
}

pub fn numerical_derivative32<Y, X1, X2, X3, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> Y,
{
    numerical_derivative11(|b: &X2| h(x1, b, x3), x2, delta)
}

pub fn numerical_derivative33<Y, X1, X2, X3, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> Y,
{
    numerical_derivative11(|c: &X3| h(x1, x2, c), x3, delta)
}

/// Jacobian with respect to `args[index]` of a function of an ordered argument list
/// sharing one type.
///
/// # Errors
///
/// [`CoreError::InvalidInput`] when `index` is out of range.
pub fn numerical_derivative_nth<Y, X, F>(
    h: F,
    args: &[X],
    index: usize,
    delta: f64,
) -> CoreResult<DMatrix<f64>>
where
    Y: Manifold,
    X: Manifold,
    F: Fn(&[X]) -> Y,
{
    let x = args.get(index).ok_or_else(|| {
        CoreError::InvalidInput(format!(
            "Argument index {index} out of range for {} arguments",
            args.len()
        ))
        .log()
    })?;

    Ok(numerical_derivative11(
        |xi: &X| {
            let mut perturbed = args.to_vec();
            perturbed[index] = xi.clone();
            h(&perturbed)
        },
        x,
        delta,
    ))
}

/// Hessian of a scalar function: the Jacobian of its numerical gradient.
pub fn numerical_hessian<X, F>(f: F, x: &X, delta: f64) -> DMatrix<f64>
where
    X: Manifold,
    F: Fn(&X) -> f64,
{
    numerical_derivative11(|y: &X| numerical_gradient(&f, y, delta), x, delta)
}

/// `∂²f / ∂x1²`.
pub fn numerical_hessian211<X1, X2, F>(f: F, x1: &X1, x2: &X2, delta: f64) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> f64,
{
    numerical_hessian(|a: &X1| f(a, x2), x1, delta)
}

/// `∂²f / ∂x1 ∂x2`, of size `dim(x1) × dim(x2)`.
pub fn numerical_hessian212<X1, X2, F>(f: F, x1: &X1, x2: &X2, delta: f64) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> f64,
{
    numerical_derivative11(
        |b: &X2| numerical_gradient(|a: &X1| f(a, b), x1, delta),
        x2,
        delta,
    )
}

/// `∂²f / ∂x2²`.
pub fn numerical_hessian222<X1, X2, F>(f: F, x1: &X1, x2: &X2, delta: f64) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> f64,
{
    numerical_hessian(|b: &X2| f(x1, b), x2, delta)
}

pub fn numerical_hessian311<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian(|a: &X1| f(a, x2, x3), x1, delta)
}

pub fn numerical_hessian322<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian(|b: &X2| f(x1, b, x3), x2, delta)
}

pub fn numerical_hessian333<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian(|c: &X3| f(x1, x2, c), x3, delta)
}

/// `∂²f / ∂x1 ∂x2` with `x3` fixed.
pub fn numerical_hessian312<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian212(|a: &X1, b: &X2| f(a, b, x3), x1, x2, delta)
}

/// `∂²f / ∂x1 ∂x3` with `x2` fixed.
pub fn numerical_hessian313<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian212(|a: &X1, c: &X3| f(a, x2, c), x1, x3, delta)
}

/// `∂²f / ∂x2 ∂x3` with `x1` fixed.
pub fn numerical_hessian323<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: f64,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian212(|b: &X2, c: &X3| f(x1, b, c), x2, x3, delta)
}
