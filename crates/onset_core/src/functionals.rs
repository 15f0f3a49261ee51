//! Differentiable scalar functionals of a Hopf solution.
//!
//! A functional maps a converged Hopf state (plus the model properties and,
//! for waveform functionals, a complex amplitude) to a scalar, and exposes
//! first derivatives with respect to each input. Functionals compose through
//! an explicit expression tree ([`FuncExpr`]) whose arithmetic variants
//! propagate derivatives by the elementary calculus rules; the tree never
//! inspects a leaf beyond the [`Functional`] capability set.

use crate::block::BlockVec;
use crate::hopf::HopfModel;
use crate::model::{DynamicalModel, LinearizedModel};
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use num_complex::Complex;
use std::f64::consts::TAU;

/// Capability set of a leaf functional: evaluate, differentiate with respect
/// to the Hopf state / properties / complex amplitude, and rebind each input.
pub trait Functional {
    fn eval(&self) -> f64;

    /// Derivative with respect to the full Hopf state (length `3n + 2`).
    fn grad_state(&self) -> DVector<f64>;

    /// Derivative with respect to the flat property vector.
    fn grad_props(&self) -> DVector<f64>;

    /// Derivative with respect to the complex amplitude (length 2); zero for
    /// leaves without amplitude dependence.
    fn grad_camp(&self) -> DVector<f64>;

    fn set_state(&mut self, x: &DVector<f64>);

    fn set_props(&mut self, props: &BlockVec);

    fn set_camp(&mut self, camp: &[f64; 2]);
}

/// Expression tree over functionals and numeric constants.
///
/// Gradients of a tree with no leaf (a pure constant expression) have no
/// defined dimension and come back empty; `grad_camp` is always length 2.
pub enum FuncExpr {
    Leaf(Box<dyn Functional>),
    Const(f64),
    Add(Box<FuncExpr>, Box<FuncExpr>),
    Mul(Box<FuncExpr>, Box<FuncExpr>),
    Div(Box<FuncExpr>, Box<FuncExpr>),
    Pow(Box<FuncExpr>, f64),
}

impl FuncExpr {
    pub fn leaf(func: impl Functional + 'static) -> Self {
        FuncExpr::Leaf(Box::new(func))
    }

    pub fn constant(value: f64) -> Self {
        FuncExpr::Const(value)
    }

    pub fn add(a: FuncExpr, b: FuncExpr) -> Self {
        FuncExpr::Add(Box::new(a), Box::new(b))
    }

    pub fn sub(a: FuncExpr, b: FuncExpr) -> Self {
        Self::add(a, Self::mul(Self::constant(-1.0), b))
    }

    pub fn mul(a: FuncExpr, b: FuncExpr) -> Self {
        FuncExpr::Mul(Box::new(a), Box::new(b))
    }

    pub fn div(a: FuncExpr, b: FuncExpr) -> Self {
        FuncExpr::Div(Box::new(a), Box::new(b))
    }

    pub fn powf(base: FuncExpr, exponent: f64) -> Self {
        FuncExpr::Pow(Box::new(base), exponent)
    }

    /// Multiplies by a scalar constant.
    pub fn scale(self, factor: f64) -> Self {
        Self::mul(Self::constant(factor), self)
    }

    /// Adds a scalar constant.
    pub fn offset(self, value: f64) -> Self {
        Self::add(self, Self::constant(value))
    }

    pub fn eval(&self) -> f64 {
        match self {
            FuncExpr::Leaf(leaf) => leaf.eval(),
            FuncExpr::Const(value) => *value,
            FuncExpr::Add(a, b) => a.eval() + b.eval(),
            FuncExpr::Mul(a, b) => a.eval() * b.eval(),
            FuncExpr::Div(a, b) => a.eval() / b.eval(),
            FuncExpr::Pow(base, exponent) => base.eval().powf(*exponent),
        }
    }

    pub fn grad_state(&self) -> DVector<f64> {
        self.grad(&GradKind::State)
            .unwrap_or_else(|| DVector::zeros(0))
    }

    pub fn grad_props(&self) -> DVector<f64> {
        self.grad(&GradKind::Props)
            .unwrap_or_else(|| DVector::zeros(0))
    }

    pub fn grad_camp(&self) -> DVector<f64> {
        self.grad(&GradKind::Camp)
            .unwrap_or_else(|| DVector::zeros(2))
    }

    pub fn set_state(&mut self, x: &DVector<f64>) {
        self.for_each_leaf(&mut |leaf| leaf.set_state(x));
    }

    pub fn set_props(&mut self, props: &BlockVec) {
        self.for_each_leaf(&mut |leaf| leaf.set_props(props));
    }

    pub fn set_camp(&mut self, camp: &[f64; 2]) {
        self.for_each_leaf(&mut |leaf| leaf.set_camp(camp));
    }

    /// Recursive derivative; `None` stands for an identically-zero gradient
    /// of unknown dimension (constants).
    fn grad(&self, kind: &GradKind) -> Option<DVector<f64>> {
        match self {
            FuncExpr::Leaf(leaf) => Some(match kind {
                GradKind::State => leaf.grad_state(),
                GradKind::Props => leaf.grad_props(),
                GradKind::Camp => leaf.grad_camp(),
            }),
            FuncExpr::Const(_) => None,
            FuncExpr::Add(a, b) => combine(a.grad(kind), b.grad(kind)),
            FuncExpr::Mul(a, b) => {
                let da = a.grad(kind).map(|g| g * b.eval());
                let db = b.grad(kind).map(|g| g * a.eval());
                combine(da, db)
            }
            FuncExpr::Div(a, b) => {
                let denom = b.eval();
                let da = a.grad(kind).map(|g| g / denom);
                let db = b.grad(kind).map(|g| g * (-a.eval() / (denom * denom)));
                combine(da, db)
            }
            FuncExpr::Pow(base, exponent) => base
                .grad(kind)
                .map(|g| g * (exponent * base.eval().powf(exponent - 1.0))),
        }
    }

    fn for_each_leaf(&mut self, apply: &mut impl FnMut(&mut Box<dyn Functional>)) {
        match self {
            FuncExpr::Leaf(leaf) => apply(leaf),
            FuncExpr::Const(_) => {}
            FuncExpr::Add(a, b) | FuncExpr::Mul(a, b) | FuncExpr::Div(a, b) => {
                a.for_each_leaf(apply);
                b.for_each_leaf(apply);
            }
            FuncExpr::Pow(base, _) => base.for_each_leaf(apply),
        }
    }
}

enum GradKind {
    State,
    Props,
    Camp,
}

fn combine(a: Option<DVector<f64>>, b: Option<DVector<f64>>) -> Option<DVector<f64>> {
    match (a, b) {
        (None, other) => other,
        (other, None) => other,
        (Some(a), Some(b)) => Some(a + b),
    }
}

/// The control value at onset, read from the critical-parameter slot of
/// the Hopf state.
pub struct OnsetPressure {
    n_state: usize,
    n_props: usize,
    x: DVector<f64>,
}

impl OnsetPressure {
    pub fn new<R: DynamicalModel, L: LinearizedModel>(hopf: &HopfModel<R, L>) -> Self {
        Self {
            n_state: hopf.hopf_size(),
            n_props: hopf.props_size(),
            x: DVector::zeros(hopf.hopf_size()),
        }
    }
}

impl Functional for OnsetPressure {
    fn eval(&self) -> f64 {
        self.x[self.n_state - 2]
    }

    fn grad_state(&self) -> DVector<f64> {
        let mut grad = DVector::zeros(self.n_state);
        grad[self.n_state - 2] = 1.0;
        grad
    }

    fn grad_props(&self) -> DVector<f64> {
        DVector::zeros(self.n_props)
    }

    fn grad_camp(&self) -> DVector<f64> {
        DVector::zeros(2)
    }

    fn set_state(&mut self, x: &DVector<f64>) {
        assert_eq!(x.len(), self.n_state, "hopf state size mismatch");
        self.x.copy_from(x);
    }

    fn set_props(&mut self, _props: &BlockVec) {}

    fn set_camp(&mut self, _camp: &[f64; 2]) {}
}

/// The magnitude of the oscillation frequency at onset.
pub struct OnsetFrequency {
    n_state: usize,
    n_props: usize,
    x: DVector<f64>,
}

impl OnsetFrequency {
    pub fn new<R: DynamicalModel, L: LinearizedModel>(hopf: &HopfModel<R, L>) -> Self {
        Self {
            n_state: hopf.hopf_size(),
            n_props: hopf.props_size(),
            x: DVector::zeros(hopf.hopf_size()),
        }
    }
}

impl Functional for OnsetFrequency {
    fn eval(&self) -> f64 {
        self.x[self.n_state - 1].abs()
    }

    fn grad_state(&self) -> DVector<f64> {
        let mut grad = DVector::zeros(self.n_state);
        grad[self.n_state - 1] = self.x[self.n_state - 1].signum();
        grad
    }

    fn grad_props(&self) -> DVector<f64> {
        DVector::zeros(self.n_props)
    }

    fn grad_camp(&self) -> DVector<f64> {
        DVector::zeros(2)
    }

    fn set_state(&mut self, x: &DVector<f64>) {
        assert_eq!(x.len(), self.n_state, "hopf state size mismatch");
        self.x.copy_from(x);
    }

    fn set_props(&mut self, _props: &BlockVec) {}

    fn set_camp(&mut self, _camp: &[f64; 2]) {}
}

/// Weighted squared error between a reference periodic waveform and the
/// model's small-amplitude oscillation seen through a linear observation.
///
/// With `w` the observation vector, the mode signal over one period is
///
/// ```text
/// y_k = ⟨w, u⟩ + Re[(c_re + i·c_im)·(⟨w, e_r⟩ + i·⟨w, e_i⟩)·e^{iθ_k}]
/// ```
///
/// with sample phases `θ_k = 2πk/N`. The complex amplitude `(c_re, c_im)` is
/// the functional's `camp` input; [`fit_camp`](Self::fit_camp) solves its
/// unconstrained least-squares fit in closed form.
pub struct WaveformError {
    n: usize,
    n_state: usize,
    n_props: usize,
    obs: DVector<f64>,
    ref_signal: Vec<f64>,
    weights: Vec<f64>,
    x: DVector<f64>,
    camp: [f64; 2],
}

impl WaveformError {
    pub fn new<R: DynamicalModel, L: LinearizedModel>(
        hopf: &HopfModel<R, L>,
        obs: DVector<f64>,
        ref_signal: Vec<f64>,
        weights: Option<Vec<f64>>,
    ) -> Result<Self> {
        let n = hopf.state_size();
        if obs.len() != n {
            bail!(
                "Observation vector has length {}, expected the state size {}.",
                obs.len(),
                n
            );
        }
        if ref_signal.len() < 2 {
            bail!("Reference signal must have at least two samples.");
        }
        let weights = match weights {
            Some(weights) => {
                if weights.len() != ref_signal.len() {
                    bail!(
                        "Got {} weights for {} reference samples.",
                        weights.len(),
                        ref_signal.len()
                    );
                }
                weights
            }
            None => vec![1.0; ref_signal.len()],
        };
        Ok(Self {
            n,
            n_state: hopf.hopf_size(),
            n_props: hopf.props_size(),
            obs,
            ref_signal,
            weights,
            x: DVector::zeros(hopf.hopf_size()),
            camp: [0.0, 0.0],
        })
    }

    pub fn camp(&self) -> [f64; 2] {
        self.camp
    }

    /// Observation of the three spatial segments: `(⟨w,u⟩, ⟨w,e_r⟩, ⟨w,e_i⟩)`.
    fn observed(&self) -> (f64, f64, f64) {
        let n = self.n;
        (
            self.x.rows(0, n).dot(&self.obs),
            self.x.rows(n, n).dot(&self.obs),
            self.x.rows(2 * n, n).dot(&self.obs),
        )
    }

    /// In-phase/quadrature coefficients `A + iB = camp·(w_r + i·w_i)`.
    fn amp_coeffs(&self, w_r: f64, w_i: f64) -> (f64, f64) {
        let [c_re, c_im] = self.camp;
        (c_re * w_r - c_im * w_i, c_re * w_i + c_im * w_r)
    }

    fn phase(&self, k: usize) -> f64 {
        TAU * k as f64 / self.ref_signal.len() as f64
    }

    /// Accumulated derivative sums `(Σ2λ²d, Σ2λ²d·cosθ, −Σ2λ²d·sinθ)`, i.e.
    /// the partials of the error with respect to the mean level, `A` and `B`.
    fn error_sums(&self) -> (f64, f64, f64) {
        let (w_u, w_r, w_i) = self.observed();
        let (a, b) = self.amp_coeffs(w_r, w_i);

        let mut d_mean = 0.0;
        let mut d_inphase = 0.0;
        let mut d_quad = 0.0;
        for (k, (&r, &weight)) in self.ref_signal.iter().zip(&self.weights).enumerate() {
            let theta = self.phase(k);
            let y = w_u + a * theta.cos() - b * theta.sin();
            let d = 2.0 * weight * weight * (y - r);
            d_mean += d;
            d_inphase += d * theta.cos();
            d_quad -= d * theta.sin();
        }
        (d_mean, d_inphase, d_quad)
    }

    /// Fits the complex amplitude by unconstrained least squares (closed-form
    /// 2×2 normal equations) and binds the result as the current `camp`.
    pub fn fit_camp(&mut self) -> Result<[f64; 2]> {
        let (w_u, w_r, w_i) = self.observed();
        let mode = Complex::new(w_r, w_i);
        if mode.norm() <= 1e-14 {
            bail!("Observation does not see the eigenmode; the amplitude fit is degenerate.");
        }

        let mut s_cc = 0.0;
        let mut s_ss = 0.0;
        let mut s_cs = 0.0;
        let mut rhs_c = 0.0;
        let mut rhs_s = 0.0;
        for (k, (&r, &weight)) in self.ref_signal.iter().zip(&self.weights).enumerate() {
            let theta = self.phase(k);
            let (c, s) = (theta.cos(), theta.sin());
            let w2 = weight * weight;
            s_cc += w2 * c * c;
            s_ss += w2 * s * s;
            s_cs += w2 * c * s;
            rhs_c -= w2 * (w_u - r) * c;
            rhs_s += w2 * (w_u - r) * s;
        }

        let normal = Matrix2::new(s_cc, -s_cs, -s_cs, s_ss);
        let coeffs = normal
            .lu()
            .solve(&Vector2::new(rhs_c, rhs_s))
            .ok_or_else(|| anyhow::anyhow!("Amplitude normal equations are singular."))?;

        let camp = Complex::new(coeffs[0], coeffs[1]) / mode;
        self.camp = [camp.re, camp.im];
        Ok(self.camp)
    }
}

impl Functional for WaveformError {
    fn eval(&self) -> f64 {
        let (w_u, w_r, w_i) = self.observed();
        let (a, b) = self.amp_coeffs(w_r, w_i);

        let mut error = 0.0;
        for (k, (&r, &weight)) in self.ref_signal.iter().zip(&self.weights).enumerate() {
            let theta = self.phase(k);
            let y = w_u + a * theta.cos() - b * theta.sin();
            error += (weight * (y - r)).powi(2);
        }
        error
    }

    fn grad_state(&self) -> DVector<f64> {
        let [c_re, c_im] = self.camp;
        let (d_mean, d_inphase, d_quad) = self.error_sums();

        // Chain through A = c_re·w_r − c_im·w_i, B = c_re·w_i + c_im·w_r.
        let d_wr = d_inphase * c_re + d_quad * c_im;
        let d_wi = -d_inphase * c_im + d_quad * c_re;

        let n = self.n;
        let mut grad = DVector::zeros(self.n_state);
        grad.rows_mut(0, n).copy_from(&(&self.obs * d_mean));
        grad.rows_mut(n, n).copy_from(&(&self.obs * d_wr));
        grad.rows_mut(2 * n, n).copy_from(&(&self.obs * d_wi));
        grad
    }

    fn grad_props(&self) -> DVector<f64> {
        DVector::zeros(self.n_props)
    }

    fn grad_camp(&self) -> DVector<f64> {
        let (_, w_r, w_i) = self.observed();
        let (_, d_inphase, d_quad) = self.error_sums();
        DVector::from_vec(vec![
            d_inphase * w_r + d_quad * w_i,
            -d_inphase * w_i + d_quad * w_r,
        ])
    }

    fn set_state(&mut self, x: &DVector<f64>) {
        assert_eq!(x.len(), self.n_state, "hopf state size mismatch");
        self.x.copy_from(x);
    }

    fn set_props(&mut self, _props: &BlockVec) {}

    fn set_camp(&mut self, camp: &[f64; 2]) {
        self.camp = *camp;
    }
}

/// Quadratic smoothness penalty `½‖D·g_blk‖²` on a named property block,
/// with `D` the first-difference matrix over the block entries.
pub struct PropGradientNormSqr {
    n_state: usize,
    n_props: usize,
    range: std::ops::Range<usize>,
    diff: DMatrix<f64>,
    props: DVector<f64>,
}

impl PropGradientNormSqr {
    pub fn new<R: DynamicalModel, L: LinearizedModel>(
        hopf: &HopfModel<R, L>,
        block: &str,
    ) -> Result<Self> {
        let layout = hopf.res().props_layout();
        let range = layout
            .range_of(block)
            .ok_or_else(|| anyhow::anyhow!("Unknown property block \"{block}\"."))?;

        let len = range.len();
        let rows = len.saturating_sub(1);
        let mut diff = DMatrix::zeros(rows, len);
        for i in 0..rows {
            diff[(i, i)] = -1.0;
            diff[(i, i + 1)] = 1.0;
        }

        Ok(Self {
            n_state: hopf.hopf_size(),
            n_props: layout.total_size(),
            range,
            diff,
            props: DVector::zeros(layout.total_size()),
        })
    }
}

impl Functional for PropGradientNormSqr {
    fn eval(&self) -> f64 {
        let block = self.props.rows(self.range.start, self.range.len());
        0.5 * (&self.diff * block).norm_squared()
    }

    fn grad_state(&self) -> DVector<f64> {
        DVector::zeros(self.n_state)
    }

    fn grad_props(&self) -> DVector<f64> {
        let block = self.props.rows(self.range.start, self.range.len());
        let local = self.diff.transpose() * (&self.diff * block);

        let mut grad = DVector::zeros(self.n_props);
        grad.rows_mut(self.range.start, self.range.len())
            .copy_from(&local);
        grad
    }

    fn grad_camp(&self) -> DVector<f64> {
        DVector::zeros(2)
    }

    fn set_state(&mut self, _x: &DVector<f64>) {}

    fn set_props(&mut self, props: &BlockVec) {
        assert_eq!(props.len(), self.n_props, "props size mismatch");
        self.props.copy_from(props.as_vector());
    }

    fn set_camp(&mut self, _camp: &[f64; 2]) {}
}
