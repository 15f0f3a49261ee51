//! Taylor-remainder verification of directional derivatives.
//!
//! For a value function `f` and a claimed directional derivative `f'`, the
//! remainder `f(x₀ + α·dx) − f(x₀) − α·f'(x₀)·dx` must shrink like `α²` as
//! the step is halved. The routine here measures that decay over a geometric
//! sequence of steps and reports the observed convergence orders; it is a
//! diagnostic producer, not a pass/fail gate; tests assert bounds on the
//! report.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Output of a value function verified by [`taylor_convergence`]: a scalar or
/// a vector, closed under subtraction and scaled addition.
pub trait TaylorQuantity: Clone {
    fn sub(&self, other: &Self) -> Self;

    /// `self + alpha·other`.
    fn add_scaled(&self, other: &Self, alpha: f64) -> Self;

    fn norm(&self) -> f64;
}

impl TaylorQuantity for f64 {
    fn sub(&self, other: &Self) -> Self {
        self - other
    }

    fn add_scaled(&self, other: &Self, alpha: f64) -> Self {
        self + alpha * other
    }

    fn norm(&self) -> f64 {
        self.abs()
    }
}

impl TaylorQuantity for DVector<f64> {
    fn sub(&self, other: &Self) -> Self {
        self - other
    }

    fn add_scaled(&self, other: &Self, alpha: f64) -> Self {
        self + other * alpha
    }

    fn norm(&self) -> f64 {
        nalgebra::Matrix::norm(self)
    }
}

/// Remainder decay over a halving sequence of step factors.
///
/// `orders[i]` is the observed convergence order between steps `i` and
/// `i + 1` (expected ≈ 2 for a correct derivative). Exactly-linear maps
/// produce zero remainders and NaN orders; the `errors` column then carries
/// the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaylorReport {
    pub step_factors: Vec<f64>,
    pub errors: Vec<f64>,
    pub magnitudes: Vec<f64>,
    pub rel_errors: Vec<f64>,
    pub orders: Vec<f64>,
}

impl TaylorReport {
    /// Smallest finite observed order, if any step pair produced one.
    pub fn min_order(&self) -> Option<f64> {
        self.orders
            .iter()
            .copied()
            .filter(|order| order.is_finite())
            .fold(None, |acc, order| {
                Some(acc.map_or(order, |min: f64| min.min(order)))
            })
    }

    pub fn max_error(&self) -> f64 {
        self.errors.iter().copied().fold(0.0, f64::max)
    }
}

/// Measures the Taylor-remainder decay of `res` against the directional
/// derivative `jac_action` at `x0` along `dx`.
///
/// Step factors halve from 8 down to 1, largest first; callers control the
/// absolute scale through the magnitude of `dx`.
pub fn taylor_convergence<Y, F, J>(
    x0: &DVector<f64>,
    dx: &DVector<f64>,
    mut res: F,
    mut jac_action: J,
) -> TaylorReport
where
    Y: TaylorQuantity,
    F: FnMut(&DVector<f64>) -> Y,
    J: FnMut(&DVector<f64>, &DVector<f64>) -> Y,
{
    let step_factors = vec![8.0, 4.0, 2.0, 1.0];

    let res_0 = res(x0);
    let dres_linear = jac_action(x0, dx);

    let mut errors = Vec::with_capacity(step_factors.len());
    let mut magnitudes = Vec::with_capacity(step_factors.len());
    for &alpha in &step_factors {
        let res_n = res(&(x0 + dx * alpha));
        let dres_exact = res_n.sub(&res_0);
        errors.push(dres_exact.add_scaled(&dres_linear, -alpha).norm());
        magnitudes.push(0.5 * dres_exact.add_scaled(&dres_linear, alpha).norm());
    }

    let rel_errors = errors
        .iter()
        .zip(&magnitudes)
        .map(|(err, mag)| if *mag > 0.0 { err / mag } else { f64::NAN })
        .collect();

    let orders = errors
        .windows(2)
        .map(|pair| {
            if pair[0] > 0.0 && pair[1] > 0.0 {
                (pair[0] / pair[1]).ln() / 2.0f64.ln()
            } else {
                f64::NAN
            }
        })
        .collect();

    TaylorReport {
        step_factors,
        errors,
        magnitudes,
        rel_errors,
        orders,
    }
}
