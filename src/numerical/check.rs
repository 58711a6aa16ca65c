//! Cross-check of analytic factor linearization against finite differences.
//!
//! The factor's own [`NonlinearFactor::linearize`] output is compared with
//! [`numerical_linearization`] whitened by the factor's noise model. Keys must match
//! in order, and every Jacobian block and the right-hand side must agree entry-wise
//! within the tolerance. With the default step of `1e-5`, central differences are
//! accurate to roughly `1e-10` on smooth factors, so tolerances around `1e-5` are a
//! comfortable choice.

use crate::core::Values;
use crate::factors::{FactorError, FactorResult, LinearSystem, NonlinearFactor};
use crate::numerical::{DEFAULT_STEP, numerical_linearization};
use std::fmt;
use tracing::debug;

/// Configuration of a Jacobian cross-check.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianCheckConfig {
    /// Finite-difference step in tangent coordinates
    pub fd_step: f64,
    /// Maximum absolute entry-wise difference
    pub tolerance: f64,
    /// Also require the right-hand side to vanish, i.e. the factor to be satisfied
    /// at the check point
    ///
    /// Default: false
    pub require_zero_residual: bool,
}

impl Default for JacobianCheckConfig {
    fn default() -> Self {
        Self {
            fd_step: DEFAULT_STEP,
            tolerance: 1e-5,
            require_zero_residual: false,
        }
    }
}

impl JacobianCheckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the finite-difference step
    pub fn with_fd_step(mut self, fd_step: f64) -> Self {
        self.fd_step = fd_step;
        self
    }

    /// Set the comparison tolerance
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Require the factor to be satisfied at the check point
    pub fn with_require_zero_residual(mut self, require_zero_residual: bool) -> Self {
        self.require_zero_residual = require_zero_residual;
        self
    }
}

/// Outcome of comparing analytic and numerical linearizations.
#[derive(Debug, Clone, Default)]
pub struct JacobianCheckReport {
    /// Largest entry-wise block difference over all keys
    pub max_block_error: f64,
    /// Largest entry-wise right-hand side difference
    pub max_rhs_error: f64,
    /// Human-readable description of every failed comparison
    pub mismatches: Vec<String>,
}

impl JacobianCheckReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for JacobianCheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max block error {:.3e}, max rhs error {:.3e}",
            self.max_block_error, self.max_rhs_error
        )?;
        for mismatch in &self.mismatches {
            write!(f, "\n  - {mismatch}")?;
        }
        Ok(())
    }
}

/// Check `factor`'s Jacobians at `values` with the given step and tolerance.
///
/// # Errors
///
/// [`FactorError::JacobianMismatch`] listing every disagreement, or the error of a
/// failed evaluation. An inactive factor cannot be checked and yields
/// [`FactorError::InvalidParameters`].
pub fn check_factor_jacobians(
    factor: &dyn NonlinearFactor,
    values: &Values,
    fd_step: f64,
    tolerance: f64,
) -> FactorResult<JacobianCheckReport> {
    let config = JacobianCheckConfig::new()
        .with_fd_step(fd_step)
        .with_tolerance(tolerance);
    check_factor_jacobians_with_config(factor, values, &config)
}

/// Like [`check_factor_jacobians`], driven by a [`JacobianCheckConfig`].
pub fn check_factor_jacobians_with_config(
    factor: &dyn NonlinearFactor,
    values: &Values,
    config: &JacobianCheckConfig,
) -> FactorResult<JacobianCheckReport> {
    let report = compare_factor_jacobians(factor, values, config)?;
    if !report.passed() {
        return Err(FactorError::JacobianMismatch(format!(
            "factor on {:?}: {report}",
            factor.keys()
        ))
        .log());
    }
    debug!("Jacobian check passed on {:?}: {report}", factor.keys());
    Ok(report)
}

/// Compare both linearizations and report every difference without failing on
/// mismatches.
pub fn compare_factor_jacobians(
    factor: &dyn NonlinearFactor,
    values: &Values,
    config: &JacobianCheckConfig,
) -> FactorResult<JacobianCheckReport> {
    let actual = factor.linearize(values)?.ok_or_else(|| {
        FactorError::InvalidParameters(format!(
            "Factor on {:?} is inactive and cannot be checked",
            factor.keys()
        ))
        .log()
    })?;

    let mut expected = numerical_linearization(factor, values, config.fd_step)?;
    if let Some(model) = factor.noise_model() {
        expected.whiten_with(model.as_ref())?;
    }

    Ok(compare_systems(&actual, &expected, config))
}

fn compare_systems(
    actual: &LinearSystem,
    expected: &LinearSystem,
    config: &JacobianCheckConfig,
) -> JacobianCheckReport {
    let mut report = JacobianCheckReport::default();

    if actual.keys() != expected.keys() {
        report.mismatches.push(format!(
            "keys differ: analytic {:?}, numerical {:?}",
            actual.keys(),
            expected.keys()
        ));
        return report;
    }

    for ((key, a), e) in actual
        .keys()
        .iter()
        .zip(actual.blocks())
        .zip(expected.blocks())
    {
        if a.shape() != e.shape() {
            report.mismatches.push(format!(
                "block '{key}' is {:?}, expected {:?}",
                a.shape(),
                e.shape()
            ));
            continue;
        }
        let error = (a - e).amax();
        report.max_block_error = report.max_block_error.max(error);
        if error > config.tolerance {
            report.mismatches.push(format!(
                "block '{key}' differs by {error:.3e}\n    analytic:{a}    numerical:{e}"
            ));
        }
    }

    if actual.rows() == expected.rows() {
        report.max_rhs_error = (actual.rhs() - expected.rhs()).amax();
        if report.max_rhs_error > config.tolerance {
            report.mismatches.push(format!(
                "right-hand side differs by {:.3e}",
                report.max_rhs_error
            ));
        }
    } else {
        report.mismatches.push(format!(
            "right-hand side has {} rows, expected {}",
            actual.rows(),
            expected.rows()
        ));
    }

    if config.require_zero_residual && actual.rhs().amax() > config.tolerance {
        report.mismatches.push(format!(
            "residual {:.3e} is not zero at the check point",
            actual.rhs().amax()
        ));
    }

    report
}

/// Panics unless the factor's Jacobians agree with finite differences.
///
/// ```
/// use apex_numdiff::assert_factor_jacobians;
/// use apex_numdiff::core::Values;
/// use apex_numdiff::core::noise_model::{Diagonal, NoiseModel};
/// use apex_numdiff::factors::PriorFactor;
/// use apex_numdiff::manifold::so2::SO2;
/// use std::sync::Arc;
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
///
/// let noise: Arc<dyn NoiseModel> = Arc::new(Diagonal::unit(1)?);
/// let prior = PriorFactor::new("r", SO2::from_angle(0.3), Some(noise))?;
/// let mut values = Values::new();
/// values.insert("r", SO2::from_angle(1.1))?;
///
/// assert_factor_jacobians!(prior, values);
/// assert_factor_jacobians!(prior, values, 1e-6, 1e-6);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[macro_export]
macro_rules! assert_factor_jacobians {
    ($factor:expr, $values:expr) => {
        $crate::assert_factor_jacobians!($factor, $values, $crate::numerical::DEFAULT_STEP, 1e-5)
    };
    ($factor:expr, $values:expr, $fd_step:expr, $tolerance:expr) => {
        if let Err(error) = $crate::numerical::check::check_factor_jacobians(
            &$factor,
            &$values,
            $fd_step,
            $tolerance,
        ) {
            panic!("Factor Jacobian check failed: {}", error);
        }
    };
}
