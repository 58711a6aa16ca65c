//! # Apex NumDiff
//!
//! Derivatives for nonlinear least squares over manifold-valued variables, in two
//! complementary forms:
//!
//! - **Finite differences on manifolds** ([`numerical`]): gradients, Jacobians and
//!   Hessians by central differences in tangent coordinates, for functions of one,
//!   two or three arguments, plus a harness that numerically linearizes any factor.
//! - **Analytic expression factors** ([`factors`]): a measurement and an
//!   [`expression`] predicting it, evaluated with exact Jacobians and assembled into a
//!   whitened [`LinearSystem`] for a least-squares solver.
//!
//! The two meet in [`check_factor_jacobians`], which verifies a factor's analytic
//! linearization against finite differences.
//!
//! ## Manifolds
//!
//! - **SE(2)**, **SO(2)** and **Rⁿ** Lie groups with right-perturbation Jacobians
//! - `f64`, `DVector<f64>` and `SVector<f64, N>` as plain vector spaces
//!
//! ## Noise Models
//!
//! - **Diagonal**: per-row sigmas, with isotropic and unit special cases
//! - **Constrained**: zero-sigma rows as hard constraints
//! - **Robust**: Huber or Cauchy loss on top of a base model

pub mod core;
pub mod error;
pub mod expression;
pub mod factors;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod numerical;

// Re-export core types
pub use crate::core::{Key, Values, VectorValues};
pub use error::{ApexError, ApexResult};

// Re-export factor types
pub use factors::{
    BetweenFactor, ExpressionFactor, ExpressionFactor2, LinearSystem, NonlinearFactor,
    PriorFactor,
};

#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use numerical::{
    DEFAULT_STEP, JacobianCheckConfig, check_factor_jacobians, numerical_linearization,
};
