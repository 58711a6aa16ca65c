//! Expressions built from closures with local Jacobians.
//!
//! A closure receives its argument values and, when derivatives are requested, one
//! `Option<&mut DMatrix<f64>>` per argument that it must overwrite with the local
//! Jacobian `∂output/∂argument`. The chain rule through the argument expressions is
//! applied here.

use crate::core::{CoreError, CoreResult, Key, Values};
use crate::expression::{Expression, JacobianMap, SharedExpression, accumulate};
use crate::manifold::Manifold;
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use std::sync::Arc;

type UnaryFunction<T, A> = dyn Fn(&A, Option<&mut DMatrix<f64>>) -> T + Send + Sync;

type BinaryFunction<T, A1, A2> =
    dyn Fn(&A1, &A2, Option<&mut DMatrix<f64>>, Option<&mut DMatrix<f64>>) -> T + Send + Sync;

fn check_local_jacobian(
    jacobian: &DMatrix<f64>,
    rows: usize,
    cols: usize,
    argument: &str,
) -> CoreResult<()> {
    if jacobian.shape() != (rows, cols) {
        return Err(CoreError::DimensionMismatch(format!(
            "Local Jacobian for {argument} is {}x{}, expected {rows}x{cols}",
            jacobian.nrows(),
            jacobian.ncols()
        ))
        .log());
    }
    Ok(())
}

/// `f(a)` with a closure-supplied Jacobian.
pub struct UnaryExpression<T, A> {
    function: Arc<UnaryFunction<T, A>>,
    argument: SharedExpression<A>,
}

impl<T: Manifold, A: Manifold> UnaryExpression<T, A> {
    pub fn new<F>(argument: SharedExpression<A>, function: F) -> Self
    where
        F: Fn(&A, Option<&mut DMatrix<f64>>) -> T + Send + Sync + 'static,
    {
        UnaryExpression {
            function: Arc::new(function),
            argument,
        }
    }
}

impl<T: Manifold, A: Manifold> Expression<T> for UnaryExpression<T, A> {
    fn keys_and_dims(&self) -> BTreeMap<Key, usize> {
        self.argument.keys_and_dims()
    }

    fn value(&self, values: &Values) -> CoreResult<T> {
        let a = self.argument.value(values)?;
        Ok((self.function)(&a, None))
    }

    fn value_and_jacobians(&self, values: &Values) -> CoreResult<(T, JacobianMap)> {
        let (a, child) = self.argument.value_and_jacobians(values)?;

        let mut local = DMatrix::zeros(0, 0);
        let value = (self.function)(&a, Some(&mut local));
        check_local_jacobian(&local, value.dim(), a.dim(), "argument")?;

        let mut jacobians = JacobianMap::new();
        accumulate(&mut jacobians, &local, child);
        Ok((value, jacobians))
    }
}

/// `f(a1, a2)` with closure-supplied Jacobians.
pub struct BinaryExpression<T, A1, A2> {
    function: Arc<BinaryFunction<T, A1, A2>>,
    first: SharedExpression<A1>,
    second: SharedExpression<A2>,
}

impl<T: Manifold, A1: Manifold, A2: Manifold> BinaryExpression<T, A1, A2> {
    pub fn new<F>(first: SharedExpression<A1>, second: SharedExpression<A2>, function: F) -> Self
    where
        F: Fn(&A1, &A2, Option<&mut DMatrix<f64>>, Option<&mut DMatrix<f64>>) -> T
            + Send
            + Sync
            + 'static,
    {
        BinaryExpression {
            function: Arc::new(function),
            first,
            second,
        }
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold> Expression<T> for BinaryExpression<T, A1, A2> {
    fn keys_and_dims(&self) -> BTreeMap<Key, usize> {
        let mut keys = self.first.keys_and_dims();
        keys.extend(self.second.keys_and_dims());
        keys
    }

    fn value(&self, values: &Values) -> CoreResult<T> {
        let a1 = self.first.value(values)?;
        let a2 = self.second.value(values)?;
        Ok((self.function)(&a1, &a2, None, None))
    }

    fn value_and_jacobians(&self, values: &Values) -> CoreResult<(T, JacobianMap)> {
        let (a1, child1) = self.first.value_and_jacobians(values)?;
        let (a2, child2) = self.second.value_and_jacobians(values)?;

        let mut local1 = DMatrix::zeros(0, 0);
        let mut local2 = DMatrix::zeros(0, 0);
        let value = (self.function)(&a1, &a2, Some(&mut local1), Some(&mut local2));
        check_local_jacobian(&local1, value.dim(), a1.dim(), "first argument")?;
        check_local_jacobian(&local2, value.dim(), a2.dim(), "second argument")?;

        let mut jacobians = JacobianMap::new();
        accumulate(&mut jacobians, &local1, child1);
        accumulate(&mut jacobians, &local2, child2);
        Ok((value, jacobians))
    }
}

/// Shared [`UnaryExpression`].
pub fn unary<T, A, F>(argument: SharedExpression<A>, function: F) -> SharedExpression<T>
where
    T: Manifold,
    A: Manifold,
    F: Fn(&A, Option<&mut DMatrix<f64>>) -> T + Send + Sync + 'static,
{
    Arc::new(UnaryExpression::new(argument, function))
}

/// Shared [`BinaryExpression`].
pub fn binary<T, A1, A2, F>(
    first: SharedExpression<A1>,
    second: SharedExpression<A2>,
    function: F,
) -> SharedExpression<T>
where
    T: Manifold,
    A1: Manifold,
    A2: Manifold,
    F: Fn(&A1, &A2, Option<&mut DMatrix<f64>>, Option<&mut DMatrix<f64>>) -> T
        + Send
        + Sync
        + 'static,
{
    Arc::new(BinaryExpression::new(first, second, function))
}
