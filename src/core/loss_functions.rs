//! Robust loss functions applied to squared whitened residual norms.
//!
//! A loss `ρ(s)` takes `s = ||r||²` and returns `[ρ(s), ρ'(s), ρ''(s)]`. The
//! [`Corrector`](crate::core::corrector::Corrector) turns these derivatives into a
//! rescaling of residuals and Jacobian blocks, which is how
//! [`RobustNoise`](crate::core::noise_model::RobustNoise) folds a loss into whitening.
//!
//! | Loss     | ρ(s)                         | behaviour on outliers |
//! |----------|------------------------------|-----------------------|
//! | L2       | `s`                          | none                  |
//! | Huber    | `s` or `2δ√s - δ²`           | linear growth         |
//! | Cauchy   | `δ² ln(1 + s/δ²)`            | logarithmic growth    |

use crate::core::{CoreError, CoreResult};
use std::fmt::Debug;

/// Trait for robust loss functions.
pub trait LossFunction: Send + Sync + Debug {
    /// Evaluate `[ρ(s), ρ'(s), ρ''(s)]` at the squared norm `s ≥ 0`.
    fn evaluate(&self, s: f64) -> [f64; 3];
}

/// Standard least squares, `ρ(s) = s`.
#[derive(Debug, Clone, Default)]
pub struct L2Loss;

impl L2Loss {
    pub fn new() -> Self {
        L2Loss
    }
}

impl LossFunction for L2Loss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        [s, 1.0, 0.0]
    }
}

/// Huber loss: quadratic below `scale`, linear above.
#[derive(Debug, Clone)]
pub struct HuberLoss {
    scale: f64,
    scale2: f64,
}

impl HuberLoss {
    /// Fails unless `scale > 0`.
    pub fn new(scale: f64) -> CoreResult<Self> {
        if scale <= 0.0 || !scale.is_finite() {
            return Err(CoreError::LossFunction(format!(
                "Huber scale must be positive and finite, got {scale}"
            ))
            .log());
        }
        Ok(HuberLoss {
            scale,
            scale2: scale * scale,
        })
    }
}

impl LossFunction for HuberLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        if s > self.scale2 {
            let r = s.sqrt();
            let rho1 = (self.scale / r).max(f64::MIN_POSITIVE);
            [2.0 * self.scale * r - self.scale2, rho1, -rho1 / (2.0 * s)]
        } else {
            [s, 1.0, 0.0]
        }
    }
}

/// Cauchy loss, `ρ(s) = δ² ln(1 + s/δ²)`.
#[derive(Debug, Clone)]
pub struct CauchyLoss {
    scale2: f64,
    c: f64,
}

impl CauchyLoss {
    /// Fails unless `scale > 0`.
    pub fn new(scale: f64) -> CoreResult<Self> {
        if scale <= 0.0 || !scale.is_finite() {
            return Err(CoreError::LossFunction(format!(
                "Cauchy scale must be positive and finite, got {scale}"
            ))
            .log());
        }
        let scale2 = scale * scale;
        Ok(CauchyLoss {
            scale2,
            c: 1.0 / scale2,
        })
    }
}

impl LossFunction for CauchyLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        let sum = 1.0 + s * self.c;
        let inv = 1.0 / sum;
        [
            self.scale2 * sum.ln(),
            inv.max(f64::MIN_POSITIVE),
            -self.c * inv * inv,
        ]
    }
}
