//! Expressions: measurement-prediction functions that produce exact derivatives.
//!
//! An [`Expression<T>`] is a small computation graph over the variables of a
//! [`Values`] container. Evaluating it with [`Expression::value_and_jacobians`]
//! returns the predicted value together with one Jacobian block per variable it
//! depends on, each of size `(T tangent dim) × (variable tangent dim)`. Blocks follow
//! the right-perturbation convention of the [`Manifold`] chart.
//!
//! Graphs are assembled from:
//! - [`Leaf`]: a variable looked up by key (Jacobian is the identity)
//! - [`Constant`]: a fixed value (no Jacobians)
//! - [`functional::UnaryExpression`] / [`functional::BinaryExpression`]: closures with
//!   local Jacobians, combined by the chain rule
//! - [`lie`]: group operations (`between`, `compose`, `inverse`) and 2D point helpers
//!
//! # Example
//!
//! ```
//! use apex_numdiff::core::Values;
//! use apex_numdiff::expression::{self, Expression};
//! use apex_numdiff::manifold::se2::SE2;
//! # use apex_numdiff::core::CoreResult;
//! # fn example() -> CoreResult<()> {
//!
//! let relative = expression::lie::between(
//!     expression::leaf::<SE2>("x0"),
//!     expression::leaf::<SE2>("x1"),
//! );
//!
//! let mut values = Values::new();
//! values.insert("x0", SE2::from_xy_angle(0.0, 0.0, 0.0))?;
//! values.insert("x1", SE2::from_xy_angle(1.0, 0.0, 0.0))?;
//!
//! let (value, jacobians) = relative.value_and_jacobians(&values)?;
//! assert!((value.x() - 1.0).abs() < 1e-12);
//! assert_eq!(jacobians.len(), 2);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod functional;
pub mod lie;

use crate::core::{CoreError, CoreResult, Key, Values};
use crate::manifold::Manifold;
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Jacobian blocks keyed by variable.
pub type JacobianMap = BTreeMap<Key, DMatrix<f64>>;

/// A function of the variables in a [`Values`] container with exact derivatives.
pub trait Expression<T>: Send + Sync {
    /// Variables the expression depends on, with their tangent dimensions.
    fn keys_and_dims(&self) -> BTreeMap<Key, usize>;

    /// Evaluate the expression.
    fn value(&self, values: &Values) -> CoreResult<T>;

    /// Evaluate the expression and its Jacobian with respect to every variable in
    /// [`Expression::keys_and_dims`].
    fn value_and_jacobians(&self, values: &Values) -> CoreResult<(T, JacobianMap)>;
}

/// Shared handle to an expression, the form in which graphs are composed.
pub type SharedExpression<T> = Arc<dyn Expression<T>>;

/// Add `local * child` into `target` for every block of `child`.
pub(crate) fn accumulate(target: &mut JacobianMap, local: &DMatrix<f64>, child: JacobianMap) {
    for (key, block) in child {
        let contribution = local * block;
        match target.get_mut(&key) {
            Some(existing) => *existing += contribution,
            None => {
                target.insert(key, contribution);
            }
        }
    }
}

/// Variable lookup.
pub struct Leaf<T> {
    key: Key,
    dim: Option<usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Manifold> Leaf<T> {
    /// Leaf for a fixed-dimension type.
    pub fn new(key: impl Into<Key>) -> Self {
        Leaf {
            key: key.into(),
            dim: None,
            _marker: PhantomData,
        }
    }

    /// Leaf for a runtime-sized type such as `DVector<f64>` or `Rn`.
    pub fn with_dim(key: impl Into<Key>, dim: usize) -> Self {
        Leaf {
            key: key.into(),
            dim: Some(dim),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    fn dim(&self) -> usize {
        self.dim.unwrap_or(T::DIM)
    }
}

impl<T: Manifold> Expression<T> for Leaf<T> {
    fn keys_and_dims(&self) -> BTreeMap<Key, usize> {
        BTreeMap::from([(self.key.clone(), self.dim())])
    }

    fn value(&self, values: &Values) -> CoreResult<T> {
        values.at::<T>(&self.key).cloned()
    }

    fn value_and_jacobians(&self, values: &Values) -> CoreResult<(T, JacobianMap)> {
        let value = self.value(values)?;
        let dim = value.dim();
        if dim != self.dim() {
            return Err(CoreError::DimensionMismatch(format!(
                "Variable '{}' has dimension {dim}, expression declares {}",
                self.key,
                self.dim()
            ))
            .log());
        }
        let jacobians = JacobianMap::from([(self.key.clone(), DMatrix::identity(dim, dim))]);
        Ok((value, jacobians))
    }
}

/// Fixed value, independent of every variable.
pub struct Constant<T> {
    value: T,
}

impl<T: Manifold> Constant<T> {
    pub fn new(value: T) -> Self {
        Constant { value }
    }
}

impl<T: Manifold> Expression<T> for Constant<T> {
    fn keys_and_dims(&self) -> BTreeMap<Key, usize> {
        BTreeMap::new()
    }

    fn value(&self, _values: &Values) -> CoreResult<T> {
        Ok(self.value.clone())
    }

    fn value_and_jacobians(&self, _values: &Values) -> CoreResult<(T, JacobianMap)> {
        Ok((self.value.clone(), JacobianMap::new()))
    }
}

/// Shared [`Leaf`] for a fixed-dimension type.
pub fn leaf<T: Manifold>(key: impl Into<Key>) -> SharedExpression<T> {
    Arc::new(Leaf::<T>::new(key))
}

/// Shared [`Leaf`] for a runtime-sized type.
pub fn leaf_with_dim<T: Manifold>(key: impl Into<Key>, dim: usize) -> SharedExpression<T> {
    Arc::new(Leaf::<T>::with_dim(key, dim))
}

/// Shared [`Constant`].
pub fn constant<T: Manifold>(value: T) -> SharedExpression<T> {
    Arc::new(Constant::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::so2::SO2;
    use nalgebra::{DVector, Vector2};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_leaf_identity_jacobian() -> TestResult {
        let mut values = Values::new();
        values.insert("p", Vector2::new(1.0, 2.0))?;

        let expr = Leaf::<Vector2<f64>>::new("p");
        let (value, jacobians) = expr.value_and_jacobians(&values)?;
        assert_eq!(value, Vector2::new(1.0, 2.0));
        assert_eq!(jacobians[&Key::from("p")], DMatrix::identity(2, 2));
        assert_eq!(expr.keys_and_dims()[&Key::from("p")], 2);
        Ok(())
    }

    #[test]
    fn test_dynamic_leaf_checks_dimension() -> TestResult {
        let mut values = Values::new();
        values.insert("v", DVector::from_vec(vec![1.0, 2.0, 3.0]))?;

        let good = Leaf::<DVector<f64>>::with_dim("v", 3);
        assert!(good.value_and_jacobians(&values).is_ok());

        let bad = Leaf::<DVector<f64>>::with_dim("v", 2);
        assert!(matches!(
            bad.value_and_jacobians(&values),
            Err(CoreError::DimensionMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_constant_has_no_keys() -> TestResult {
        let expr = Constant::new(SO2::from_angle(0.5));
        let (value, jacobians) = expr.value_and_jacobians(&Values::new())?;
        assert!((value.angle() - 0.5).abs() < 1e-12);
        assert!(jacobians.is_empty());
        assert!(expr.keys_and_dims().is_empty());
        Ok(())
    }

    #[test]
    fn test_accumulate_sums_shared_keys() {
        let mut target = JacobianMap::from([(Key::from("a"), DMatrix::identity(2, 2))]);
        let child = JacobianMap::from([
            (Key::from("a"), DMatrix::identity(2, 2)),
            (Key::from("b"), DMatrix::from_element(2, 1, 1.0)),
        ]);
        accumulate(&mut target, &(DMatrix::identity(2, 2) * 3.0), child);
        assert_eq!(target[&Key::from("a")], DMatrix::identity(2, 2) * 4.0);
        assert_eq!(target[&Key::from("b")], DMatrix::from_element(2, 1, 3.0));
    }
}
