//! Lie group expressions.
//!
//! Jacobians come straight from the analytic group Jacobians of
//! [`LieGroup`](crate::manifold::LieGroup), converted to dense blocks.

use crate::expression::SharedExpression;
use crate::expression::functional::{binary, unary};
use crate::manifold::se2::SE2;
use crate::manifold::{LieGroup, Manifold};
use nalgebra::{DMatrix, Matrix2x3, Vector2};

/// `a⁻¹ ∘ b`.
pub fn between<G>(a: SharedExpression<G>, b: SharedExpression<G>) -> SharedExpression<G>
where
    G: LieGroup + Manifold,
{
    binary(a, b, |a: &G, b: &G, ja, jb| {
        let mut jac_a = a.jacobian_identity();
        let mut jac_b = a.jacobian_identity();
        let result = a.between(b, Some(&mut jac_a), Some(&mut jac_b));
        if let Some(ja) = ja {
            *ja = a.dense_jacobian(&jac_a);
        }
        if let Some(jb) = jb {
            *jb = a.dense_jacobian(&jac_b);
        }
        result
    })
}

/// `a ∘ b`.
pub fn compose<G>(a: SharedExpression<G>, b: SharedExpression<G>) -> SharedExpression<G>
where
    G: LieGroup + Manifold,
{
    binary(a, b, |a: &G, b: &G, ja, jb| {
        let mut jac_a = a.jacobian_identity();
        let mut jac_b = a.jacobian_identity();
        let result = a.compose(b, Some(&mut jac_a), Some(&mut jac_b));
        if let Some(ja) = ja {
            *ja = a.dense_jacobian(&jac_a);
        }
        if let Some(jb) = jb {
            *jb = a.dense_jacobian(&jac_b);
        }
        result
    })
}

/// `a⁻¹`.
pub fn inverse<G>(a: SharedExpression<G>) -> SharedExpression<G>
where
    G: LieGroup + Manifold,
{
    unary(a, |a: &G, ja| {
        let mut jac = a.jacobian_identity();
        let result = a.inverse(Some(&mut jac));
        if let Some(ja) = ja {
            *ja = a.dense_jacobian(&jac);
        }
        result
    })
}

/// World point expressed in the frame of `pose`: `Rᵀ (p - t)`.
pub fn transform_to(
    pose: SharedExpression<SE2>,
    point: SharedExpression<Vector2<f64>>,
) -> SharedExpression<Vector2<f64>> {
    binary(pose, point, |pose: &SE2, point: &Vector2<f64>, jpose, jpoint| {
        let rotation_t = pose.rotation_matrix().transpose();
        let local = rotation_t * (point - pose.translation());
        if let Some(jpose) = jpose {
            let block = Matrix2x3::new(-1.0, 0.0, local.y, 0.0, -1.0, -local.x);
            *jpose = DMatrix::from_column_slice(2, 3, block.as_slice());
        }
        if let Some(jpoint) = jpoint {
            *jpoint = DMatrix::from_column_slice(2, 2, rotation_t.as_slice());
        }
        local
    })
}

/// Local point mapped into the world frame: `R p + t`.
pub fn transform_from(
    pose: SharedExpression<SE2>,
    point: SharedExpression<Vector2<f64>>,
) -> SharedExpression<Vector2<f64>> {
    binary(pose, point, |pose: &SE2, point: &Vector2<f64>, jpose, jpoint| {
        let rotation = pose.rotation_matrix();
        if let Some(jpose) = jpose {
            // d/dθ of R Exp(θ) p is R [-p.y, p.x]ᵀ.
            let column = rotation * Vector2::new(-point.y, point.x);
            let mut block = DMatrix::zeros(2, 3);
            block
                .view_mut((0, 0), (2, 2))
                .copy_from_slice(rotation.as_slice());
            block[(0, 2)] = column.x;
            block[(1, 2)] = column.y;
            *jpose = block;
        }
        if let Some(jpoint) = jpoint {
            *jpoint = DMatrix::from_column_slice(2, 2, rotation.as_slice());
        }
        pose.transform_point(point)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Key, Values};
    use crate::expression::{constant, leaf};
    use crate::manifold::so2::SO2;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn poses() -> Result<Values, Box<dyn std::error::Error>> {
        let mut values = Values::new();
        values.insert("x0", SE2::from_xy_angle(1.0, 2.0, 0.3))?;
        values.insert("x1", SE2::from_xy_angle(-0.5, 4.0, 1.2))?;
        values.insert("p", Vector2::new(3.0, -1.0))?;
        Ok(values)
    }

    #[test]
    fn test_between_value() -> TestResult {
        let values = poses()?;
        let expr = between(leaf::<SE2>("x0"), leaf::<SE2>("x1"));
        let value = expr.value(&values)?;

        let x0 = values.at::<SE2>("x0")?;
        let x1 = values.at::<SE2>("x1")?;
        assert!(value.is_approx(&x0.inverse(None).compose(x1, None, None), 1e-12));
        Ok(())
    }

    #[test]
    fn test_compose_then_inverse_is_identity() -> TestResult {
        let values = poses()?;
        let x0 = leaf::<SE2>("x0");
        let expr = compose(x0.clone(), inverse(x0));
        let (value, jacobians) = expr.value_and_jacobians(&values)?;

        assert!(value.is_approx(&SE2::identity(), 1e-12));
        // The result does not depend on x0, so the accumulated block vanishes.
        assert!(jacobians[&Key::from("x0")].norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_transform_round_trip() -> TestResult {
        let values = poses()?;
        let pose = leaf::<SE2>("x0");
        let expr = transform_from(pose.clone(), transform_to(pose, leaf("p")));
        let value = expr.value(&values)?;
        assert!((value - Vector2::new(3.0, -1.0)).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_so2_between_with_constant() -> TestResult {
        let mut values = Values::new();
        values.insert("r", SO2::from_angle(0.9))?;
        let expr = between(constant(SO2::from_angle(0.4)), leaf::<SO2>("r"));
        let (value, jacobians) = expr.value_and_jacobians(&values)?;
        assert!((value.angle() - 0.5).abs() < 1e-12);
        assert!((jacobians[&Key::from("r")][(0, 0)] - 1.0).abs() < 1e-12);
        Ok(())
    }
}
