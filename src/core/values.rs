//! Assignment container mapping keys to manifold values, and tangent-space deltas.
//!
//! `Values` is heterogeneous: a single container can hold `SE2` poses, `SO2`
//! rotations and plain vectors side by side. Values are stored type-erased behind the
//! [`Value`] trait, which every [`Manifold`] implements automatically, and are
//! recovered with [`Values::at`].
//!
//! # Example
//!
//! ```
//! use apex_numdiff::core::{Values, VectorValues};
//! use apex_numdiff::manifold::se2::SE2;
//! use nalgebra::{DVector, Vector2};
//! # use apex_numdiff::core::CoreResult;
//! # fn example() -> CoreResult<()> {
//!
//! let mut values = Values::new();
//! values.insert("x0", SE2::from_xy_angle(0.0, 0.0, 0.0))?;
//! values.insert("l0", Vector2::new(1.0, 2.0))?;
//!
//! let mut delta = values.zero_vectors();
//! delta.insert("l0", DVector::from_vec(vec![0.5, 0.0]));
//!
//! let moved = values.retract(&delta)?;
//! assert_eq!(moved.at::<Vector2<f64>>("l0")?.x, 1.5);
//! // The original assignment is untouched.
//! assert_eq!(values.at::<Vector2<f64>>("l0")?.x, 1.0);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::core::{CoreError, CoreResult, Key};
use crate::manifold::{Manifold, ManifoldResult};
use nalgebra::DVector;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// Type-erased manifold value stored in [`Values`].
pub trait Value: Any + Send + Sync {
    /// Tangent dimension of the value.
    fn value_dim(&self) -> usize;

    /// Validates `delta` as a tangent vector at this value.
    fn check_value_tangent(&self, delta: &DVector<f64>) -> ManifoldResult<()>;

    /// Retraction returning a new boxed value. `delta` must have `value_dim()` entries.
    fn retract_value(&self, delta: &DVector<f64>) -> Box<dyn Value>;

    /// Local coordinates of `other`, `None` if it holds a different type.
    fn local_value(&self, other: &dyn Value) -> Option<DVector<f64>>;

    fn clone_value(&self) -> Box<dyn Value>;

    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<T: Manifold> Value for T {
    fn value_dim(&self) -> usize {
        self.dim()
    }

    fn check_value_tangent(&self, delta: &DVector<f64>) -> ManifoldResult<()> {
        self.check_tangent(delta)
    }

    fn retract_value(&self, delta: &DVector<f64>) -> Box<dyn Value> {
        Box::new(self.retract(delta))
    }

    fn local_value(&self, other: &dyn Value) -> Option<DVector<f64>> {
        other
            .as_any()
            .downcast_ref::<T>()
            .map(|other| self.local(other))
    }

    fn clone_value(&self) -> Box<dyn Value> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Ordered mapping from [`Key`] to manifold values.
#[derive(Default)]
pub struct Values {
    values: BTreeMap<Key, Box<dyn Value>>,
}

impl Clone for Values {
    fn clone(&self) -> Self {
        Values {
            values: self
                .values
                .iter()
                .map(|(key, value)| (key.clone(), value.clone_value()))
                .collect(),
        }
    }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.values
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.type_name())),
            )
            .finish()
    }
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new variable. Fails if the key is already present.
    pub fn insert<T: Manifold>(&mut self, key: impl Into<Key>, value: T) -> CoreResult<()> {
        let key = key.into();
        if self.values.contains_key(&key) {
            return Err(CoreError::Variable(format!("Key '{key}' already exists")).log());
        }
        self.values.insert(key, Box::new(value));
        Ok(())
    }

    /// Replace the value of an existing variable with one of the same type.
    pub fn update<T: Manifold>(&mut self, key: impl Into<Key>, value: T) -> CoreResult<()> {
        let key = key.into();
        self.at::<T>(key.as_str())?;
        self.values.insert(key, Box::new(value));
        Ok(())
    }

    /// Insert the value, replacing whatever was stored under the key.
    pub fn insert_or_assign<T: Manifold>(&mut self, key: impl Into<Key>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Typed lookup.
    pub fn at<T: Manifold>(&self, key: impl AsRef<str>) -> CoreResult<&T> {
        let key = key.as_ref();
        let value = self.value(key)?;
        value.as_any().downcast_ref::<T>().ok_or_else(|| {
            CoreError::TypeMismatch(format!(
                "Key '{key}' holds {}, requested {}",
                value.type_name(),
                std::any::type_name::<T>()
            ))
            .log()
        })
    }

    /// Type-erased lookup.
    pub fn value(&self, key: impl AsRef<str>) -> CoreResult<&dyn Value> {
        let key = key.as_ref();
        self.values
            .get(key)
            .map(|value| value.as_ref())
            .ok_or_else(|| CoreError::Variable(format!("Key '{key}' not found")).log())
    }

    pub fn exists(&self, key: impl AsRef<str>) -> bool {
        self.values.contains_key(key.as_ref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.values.keys()
    }

    /// Tangent dimension of one variable.
    pub fn dim(&self, key: impl AsRef<str>) -> CoreResult<usize> {
        Ok(self.value(key)?.value_dim())
    }

    /// Sum of all tangent dimensions.
    pub fn total_dim(&self) -> usize {
        self.values.values().map(|value| value.value_dim()).sum()
    }

    /// Zero tangent vector for every variable.
    pub fn zero_vectors(&self) -> VectorValues {
        VectorValues {
            vectors: self
                .values
                .iter()
                .map(|(key, value)| (key.clone(), DVector::zeros(value.value_dim())))
                .collect(),
        }
    }

    /// Retract every variable by its entry in `delta` and return the new assignment.
    ///
    /// Variables without an entry are copied unchanged. Entries for unknown keys,
    /// with the wrong dimension or with non-finite components are rejected.
    pub fn retract(&self, delta: &VectorValues) -> CoreResult<Values> {
        if let Some(key) = delta.keys().find(|key| !self.values.contains_key(*key)) {
            return Err(
                CoreError::Variable(format!("Delta refers to unknown key '{key}'")).log(),
            );
        }

        let mut values = BTreeMap::new();
        for (key, value) in &self.values {
            let retracted = match delta.get(key.as_str()) {
                Some(d) => {
                    value
                        .check_value_tangent(d)
                        .map_err(|e| CoreError::from(e).log_with_source(key))?;
                    value.retract_value(d)
                }
                None => value.clone_value(),
            };
            values.insert(key.clone(), retracted);
        }
        Ok(Values { values })
    }

    /// Local coordinates of `other` relative to `self`, key by key.
    pub fn local_coordinates(&self, other: &Values) -> CoreResult<VectorValues> {
        let mut delta = VectorValues::new();
        for (key, value) in &self.values {
            let other_value = other.value(key.as_str())?;
            let local = value.local_value(other_value).ok_or_else(|| {
                CoreError::TypeMismatch(format!(
                    "Key '{key}' holds {} and {}",
                    value.type_name(),
                    other_value.type_name()
                ))
                .log()
            })?;
            delta.insert(key.clone(), local);
        }
        Ok(delta)
    }
}

/// Tangent vectors keyed by variable. Absent entries stand for zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    vectors: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta map with a single entry.
    pub fn single(key: impl Into<Key>, vector: DVector<f64>) -> Self {
        let mut delta = Self::new();
        delta.insert(key, vector);
        delta
    }

    /// Set the vector for `key`, returning the previous one.
    pub fn insert(&mut self, key: impl Into<Key>, vector: DVector<f64>) -> Option<DVector<f64>> {
        self.vectors.insert(key.into(), vector)
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&DVector<f64>> {
        self.vectors.get(key.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.vectors.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &DVector<f64>)> {
        self.vectors.iter()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Concatenation of all vectors in key order.
    pub fn to_vector(&self) -> DVector<f64> {
        let total: usize = self.vectors.values().map(|v| v.len()).sum();
        let mut stacked = DVector::zeros(total);
        let mut offset = 0;
        for vector in self.vectors.values() {
            stacked.rows_mut(offset, vector.len()).copy_from(vector);
            offset += vector.len();
        }
        stacked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::se2::SE2;
    use crate::manifold::so2::SO2;
    use crate::manifold::{LieGroup, ManifoldError};
    use nalgebra::Vector2;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample_values() -> CoreResult<Values> {
        let mut values = Values::new();
        values.insert("x1", SE2::from_xy_angle(1.0, 2.0, 0.5))?;
        values.insert("r1", SO2::from_angle(0.3))?;
        values.insert("p1", Vector2::new(4.0, 5.0))?;
        Ok(values)
    }

    #[test]
    fn test_insert_and_lookup() -> TestResult {
        let values = sample_values()?;
        assert_eq!(values.len(), 3);
        assert!((values.at::<SO2>("r1")?.angle() - 0.3).abs() < 1e-12);
        assert_eq!(values.dim("x1")?, 3);
        assert_eq!(values.total_dim(), 6);
        Ok(())
    }

    #[test]
    fn test_duplicate_insert_fails() -> TestResult {
        let mut values = sample_values()?;
        let result = values.insert("r1", SO2::from_angle(1.0));
        assert!(matches!(result, Err(CoreError::Variable(_))));
        Ok(())
    }

    #[test]
    fn test_lookup_errors() -> TestResult {
        let values = sample_values()?;
        assert!(matches!(values.at::<SO2>("x9"), Err(CoreError::Variable(_))));
        assert!(matches!(
            values.at::<SO2>("x1"),
            Err(CoreError::TypeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_update_requires_existing_key() -> TestResult {
        let mut values = sample_values()?;
        values.update("r1", SO2::from_angle(0.7))?;
        assert!((values.at::<SO2>("r1")?.angle() - 0.7).abs() < 1e-12);
        assert!(values.update("r2", SO2::from_angle(0.7)).is_err());
        Ok(())
    }

    #[test]
    fn test_keys_are_sorted() -> TestResult {
        let values = sample_values()?;
        let keys: Vec<&str> = values.keys().map(Key::as_str).collect();
        assert_eq!(keys, vec!["p1", "r1", "x1"]);
        Ok(())
    }

    #[test]
    fn test_retract_leaves_missing_entries_unchanged() -> TestResult {
        let values = sample_values()?;
        let delta = VectorValues::single("r1", DVector::from_vec(vec![0.2]));
        let moved = values.retract(&delta)?;

        assert!((moved.at::<SO2>("r1")?.angle() - 0.5).abs() < 1e-12);
        assert!(moved.at::<SE2>("x1")?.is_approx(values.at::<SE2>("x1")?, 1e-12));
        assert!((values.at::<SO2>("r1")?.angle() - 0.3).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_retract_rejects_bad_delta() -> TestResult {
        let values = sample_values()?;

        let wrong_dim = VectorValues::single("x1", DVector::from_vec(vec![0.1, 0.2]));
        assert!(matches!(
            values.retract(&wrong_dim),
            Err(CoreError::Manifold(ManifoldError::InvalidTangentDimension {
                expected: 3,
                actual: 2
            }))
        ));

        let not_finite = VectorValues::single("p1", DVector::from_vec(vec![0.1, f64::INFINITY]));
        assert!(matches!(
            values.retract(&not_finite),
            Err(CoreError::Manifold(ManifoldError::InvalidNumber))
        ));

        let unknown = VectorValues::single("y7", DVector::from_vec(vec![0.1]));
        assert!(matches!(
            values.retract(&unknown),
            Err(CoreError::Variable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_local_coordinates_inverts_retract() -> TestResult {
        let values = sample_values()?;
        let mut delta = values.zero_vectors();
        delta.insert("x1", DVector::from_vec(vec![0.01, -0.02, 0.03]));
        delta.insert("p1", DVector::from_vec(vec![1.0, -1.0]));

        let recovered = values.local_coordinates(&values.retract(&delta)?)?;
        assert!((recovered.to_vector() - delta.to_vector()).norm() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_zero_vectors_dimensions() -> TestResult {
        let zeros = sample_values()?.zero_vectors();
        assert_eq!(zeros.len(), 3);
        assert_eq!(zeros.get("x1").map(|v| v.len()), Some(3));
        assert_eq!(zeros.to_vector().len(), 6);
        assert_eq!(zeros.to_vector().norm(), 0.0);
        Ok(())
    }
}
