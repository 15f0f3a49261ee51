//! The augmented Hopf system.
//!
//! A Hopf bifurcation point is solved for directly as the root of an
//! augmented nonlinear system in the unknowns `(u, e_r, e_i, q, ω)`: the base
//! state, the real and imaginary parts of the critical eigenmode, the control
//! value at onset, and the oscillation frequency. The residual segments are
//!
//! ```text
//! R(u; g, q)                 fixed-point condition
//! J·e_r + ω·M·e_i            eigen-condition, real part
//! J·e_i − ω·M·e_r            eigen-condition, imaginary part
//! ⟨e_r, e_ref⟩ − 1           mode magnitude
//! ⟨e_i, e_ref⟩               mode phase
//! ```
//!
//! The two eigen-condition segments are the real/imaginary split of
//! `J e = iω M e`: the linearization has a conjugate pair exactly on the
//! imaginary axis. The two scalar constraints pin the mode's otherwise free
//! scale and rotation against a fixed reference vector; without them the
//! augmented jacobian is singular.

use crate::block::BlockVec;
use crate::error::SolveError;
use crate::fixed_point::{solve_fixed_point, NewtonSettings, SolverInfo};
use crate::model::{DynamicalModel, LinearizedModel};
use crate::stability::{solve_modal, SweepPoint};
use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// The Hopf system built from a model and its exact linearization.
///
/// The reference vector `e_ref` is fixed at construction; both models must
/// share the same state/property layouts and constrained dofs.
pub struct HopfModel<R: DynamicalModel, L: LinearizedModel> {
    res: R,
    dres: L,
    e_ref: DVector<f64>,
    n: usize,
}

impl<R: DynamicalModel, L: LinearizedModel> HopfModel<R, L> {
    pub fn new(res: R, dres: L, e_ref: DVector<f64>) -> Result<Self> {
        if res.state_layout() != dres.state_layout() {
            bail!("Model and linearized model disagree on the state layout.");
        }
        if res.props_layout() != dres.props_layout() {
            bail!("Model and linearized model disagree on the property layout.");
        }
        if res.dirichlet_dofs() != dres.dirichlet_dofs() {
            bail!("Model and linearized model disagree on the constrained dofs.");
        }
        let n = res.state_layout().total_size();
        if e_ref.len() != n {
            bail!(
                "Reference vector has length {}, expected the state size {}.",
                e_ref.len(),
                n
            );
        }
        if e_ref.norm() <= 0.0 {
            bail!("Reference vector must be nonzero.");
        }
        Ok(Self { res, dres, e_ref, n })
    }

    pub fn res(&self) -> &R {
        &self.res
    }

    pub fn res_mut(&mut self) -> &mut R {
        &mut self.res
    }

    pub fn e_ref(&self) -> &DVector<f64> {
        &self.e_ref
    }

    /// Size of the base model state.
    pub fn state_size(&self) -> usize {
        self.n
    }

    /// Size of the augmented Hopf state: three state segments plus the
    /// control and frequency scalars.
    pub fn hopf_size(&self) -> usize {
        3 * self.n + 2
    }

    pub fn props_size(&self) -> usize {
        self.res.props_layout().total_size()
    }

    pub fn state_rows(&self) -> std::ops::Range<usize> {
        0..self.n
    }

    pub fn mode_real_rows(&self) -> std::ops::Range<usize> {
        self.n..2 * self.n
    }

    pub fn mode_imag_rows(&self) -> std::ops::Range<usize> {
        2 * self.n..3 * self.n
    }

    pub fn control_row(&self) -> usize {
        3 * self.n
    }

    pub fn omega_row(&self) -> usize {
        3 * self.n + 1
    }

    /// Pushes properties into both the model and its linearization.
    pub fn set_props(&mut self, props: &BlockVec) {
        self.res.set_props(props);
        self.dres.set_props(props);
    }

    /// Zeroes the constrained entries of every spatial segment of a Hopf
    /// vector.
    pub fn apply_dirichlet_vec(&self, vec: &mut DVector<f64>) {
        for offset in [0, self.n, 2 * self.n] {
            for &dof in self.res.dirichlet_dofs() {
                vec[offset + dof] = 0.0;
            }
        }
    }

    /// Replaces the constrained rows and columns of an augmented jacobian by
    /// identity, for every spatial segment.
    pub fn apply_dirichlet_mat(&self, mat: &mut DMatrix<f64>) {
        for offset in [0, self.n, 2 * self.n] {
            for &dof in self.res.dirichlet_dofs() {
                let idx = offset + dof;
                for col in 0..mat.ncols() {
                    mat[(idx, col)] = 0.0;
                }
                for row in 0..mat.nrows() {
                    mat[(row, idx)] = 0.0;
                }
            }
        }
        for offset in [0, self.n, 2 * self.n] {
            for &dof in self.res.dirichlet_dofs() {
                let idx = offset + dof;
                mat[(idx, idx)] = 1.0;
            }
        }
    }

    /// Assembles the augmented residual at the Hopf state `x`.
    pub fn assem_res(&mut self, x: &DVector<f64>) -> Result<DVector<f64>> {
        self.check_hopf_state(x)?;
        let n = self.n;
        let (u, er, ei, control, omega) = self.split(x)?;

        self.res.set_control(control);
        self.res.set_state(&u);
        let r_state = self.res.assem_res();

        self.dres.set_control(control);
        self.dres.set_state(&u);

        let ei_t = self.scaled(&ei, omega)?;
        self.dres.set_dstate(&er);
        self.dres.set_dstate_t(&ei_t);
        let r_mode_real = self.dres.assem_res();

        let er_t = self.scaled(&er, -omega)?;
        self.dres.set_dstate(&ei);
        self.dres.set_dstate_t(&er_t);
        let r_mode_imag = self.dres.assem_res();

        let mut out = DVector::zeros(self.hopf_size());
        out.rows_mut(0, n).copy_from(&r_state);
        out.rows_mut(n, n).copy_from(&r_mode_real);
        out.rows_mut(2 * n, n).copy_from(&r_mode_imag);
        out[self.control_row()] = er.as_vector().dot(&self.e_ref) - 1.0;
        out[self.omega_row()] = ei.as_vector().dot(&self.e_ref);
        Ok(out)
    }

    /// Assembles the augmented block jacobian at the Hopf state `x`.
    pub fn assem_jac(&mut self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.check_hopf_state(x)?;
        let n = self.n;
        let (u, er, ei, control, omega) = self.split(x)?;

        self.res.set_control(control);
        self.res.set_state(&u);
        let jac_state = self.res.assem_jac_state();
        let mass = self.res.assem_mass();
        let jac_control = self.res.assem_jac_control();

        self.dres.set_control(control);
        self.dres.set_state(&u);

        let ei_t = self.scaled(&ei, omega)?;
        self.dres.set_dstate(&er);
        self.dres.set_dstate_t(&ei_t);
        let mode_real_du = self.dres.assem_jac_state();
        let mode_real_dq = self.dres.assem_jac_control();

        let er_t = self.scaled(&er, -omega)?;
        self.dres.set_dstate(&ei);
        self.dres.set_dstate_t(&er_t);
        let mode_imag_du = self.dres.assem_jac_state();
        let mode_imag_dq = self.dres.assem_jac_control();

        let mass_er = &mass * er.as_vector();
        let mass_ei = &mass * ei.as_vector();

        let size = self.hopf_size();
        let mut jac = DMatrix::zeros(size, size);

        // Fixed-point rows.
        jac.view_mut((0, 0), (n, n)).copy_from(&jac_state);
        jac.view_mut((0, 3 * n), (n, 1)).copy_from(&jac_control);

        // Mode rows, real part: J·e_r + ω·M·e_i.
        jac.view_mut((n, 0), (n, n)).copy_from(&mode_real_du);
        jac.view_mut((n, n), (n, n)).copy_from(&jac_state);
        jac.view_mut((n, 2 * n), (n, n)).copy_from(&(&mass * omega));
        jac.view_mut((n, 3 * n), (n, 1)).copy_from(&mode_real_dq);
        jac.view_mut((n, 3 * n + 1), (n, 1)).copy_from(&mass_ei);

        // Mode rows, imaginary part: J·e_i − ω·M·e_r.
        jac.view_mut((2 * n, 0), (n, n)).copy_from(&mode_imag_du);
        jac.view_mut((2 * n, n), (n, n))
            .copy_from(&(&mass * (-omega)));
        jac.view_mut((2 * n, 2 * n), (n, n)).copy_from(&jac_state);
        jac.view_mut((2 * n, 3 * n), (n, 1)).copy_from(&mode_imag_dq);
        jac.view_mut((2 * n, 3 * n + 1), (n, 1))
            .copy_from(&(-&mass_er));

        // Normalization rows.
        let ref_t = self.e_ref.transpose();
        jac.view_mut((3 * n, n), (1, n)).copy_from(&ref_t);
        jac.view_mut((3 * n + 1, 2 * n), (1, n)).copy_from(&ref_t);

        Ok(jac)
    }

    /// Assembles `∂R/∂g` of the augmented residual with respect to the flat
    /// property vector; constrained rows are zeroed.
    pub fn assem_jac_props(&mut self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.check_hopf_state(x)?;
        let n = self.n;
        let (u, er, ei, control, omega) = self.split(x)?;

        self.res.set_control(control);
        self.res.set_state(&u);
        let state_dg = self.res.assem_jac_props();

        self.dres.set_control(control);
        self.dres.set_state(&u);

        let ei_t = self.scaled(&ei, omega)?;
        self.dres.set_dstate(&er);
        self.dres.set_dstate_t(&ei_t);
        let mode_real_dg = self.dres.assem_jac_props();

        let er_t = self.scaled(&er, -omega)?;
        self.dres.set_dstate(&ei);
        self.dres.set_dstate_t(&er_t);
        let mode_imag_dg = self.dres.assem_jac_props();

        let mut out = DMatrix::zeros(self.hopf_size(), self.props_size());
        out.view_mut((0, 0), (n, self.props_size()))
            .copy_from(&state_dg);
        out.view_mut((n, 0), (n, self.props_size()))
            .copy_from(&mode_real_dg);
        out.view_mut((2 * n, 0), (n, self.props_size()))
            .copy_from(&mode_imag_dg);

        for offset in [0, n, 2 * n] {
            for &dof in self.res.dirichlet_dofs() {
                for col in 0..self.props_size() {
                    out[(offset + dof, col)] = 0.0;
                }
            }
        }
        Ok(out)
    }

    /// Builds a Hopf initial guess from a stability-crossing bracket.
    ///
    /// The fixed point and the least-stable mode are solved on the unstable
    /// side of the bracket; the mode is normalized against the reference
    /// vector, the frequency is the eigenvalue's imaginary part, and the
    /// critical-control slot is seeded by linearly interpolating the growth
    /// rate's zero crossing across the bracket.
    pub fn gen_hopf_initial_guess(
        &mut self,
        x0: &BlockVec,
        bracket: &HopfBracket,
        settings: NewtonSettings,
    ) -> Result<DVector<f64>> {
        if bracket.growth_lower > 0.0 || bracket.growth_upper <= 0.0 {
            bail!(
                "Bracket does not straddle a stability crossing (growth {} .. {}).",
                bracket.growth_lower,
                bracket.growth_upper
            );
        }

        let (xfp, info) = solve_fixed_point(&mut self.res, x0, bracket.control_upper, settings)?;
        info.require_converged().with_context(|| {
            format!(
                "Fixed-point solve failed on the unstable side (control {}).",
                bracket.control_upper
            )
        })?;

        let mut mode = solve_modal(&mut self.res, &xfp, bracket.control_upper, 1)?.remove(0);
        if mode.value.im < 0.0 {
            // Use the conjugate partner so the frequency unknown is positive.
            mode.vector_imag = -mode.vector_imag;
            mode.value = mode.value.conj();
        }
        if mode.value.im.abs() <= f64::EPSILON {
            bail!("Leading mode is non-oscillatory; the crossing is not a Hopf bifurcation.");
        }

        let (er, ei) =
            normalize_eigenvector_by_hopf_condition(&mode.vector_real, &mode.vector_imag, &self.e_ref)?;

        let denom = bracket.growth_upper - bracket.growth_lower;
        let control_guess = bracket.control_lower
            - bracket.growth_lower * (bracket.control_upper - bracket.control_lower) / denom;

        let n = self.n;
        let mut x = DVector::zeros(self.hopf_size());
        x.rows_mut(0, n).copy_from(xfp.as_vector());
        x.rows_mut(n, n).copy_from(&er);
        x.rows_mut(2 * n, n).copy_from(&ei);
        x[self.control_row()] = control_guess;
        x[self.omega_row()] = mode.value.im.abs();
        Ok(x)
    }

    fn check_hopf_state(&self, x: &DVector<f64>) -> Result<()> {
        if x.len() != self.hopf_size() {
            bail!(
                "Hopf state has length {}, expected {}.",
                x.len(),
                self.hopf_size()
            );
        }
        Ok(())
    }

    fn split(&self, x: &DVector<f64>) -> Result<(BlockVec, BlockVec, BlockVec, f64, f64)> {
        let n = self.n;
        let layout = self.res.state_layout().clone();
        let u = BlockVec::from_vector(layout.clone(), x.rows(0, n).into_owned())?;
        let er = BlockVec::from_vector(layout.clone(), x.rows(n, n).into_owned())?;
        let ei = BlockVec::from_vector(layout, x.rows(2 * n, n).into_owned())?;
        Ok((u, er, ei, x[self.control_row()], x[self.omega_row()]))
    }

    fn scaled(&self, vec: &BlockVec, factor: f64) -> Result<BlockVec> {
        BlockVec::from_vector(vec.layout().clone(), vec.as_vector() * factor)
    }
}

/// A stability crossing bracketed by two control values: stable (or neutral)
/// below, unstable above.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HopfBracket {
    pub control_lower: f64,
    pub control_upper: f64,
    pub growth_lower: f64,
    pub growth_upper: f64,
}

impl HopfBracket {
    /// Builds a bracket from a stability sweep and a pair of indices
    /// identified by [`find_hopf_brackets`](crate::stability::find_hopf_brackets).
    pub fn from_sweep(sweep: &[SweepPoint], pair: (usize, usize)) -> Result<Self> {
        let (lo, hi) = pair;
        if hi != lo + 1 || hi >= sweep.len() {
            bail!("Bracket indices ({lo}, {hi}) are not adjacent sweep entries.");
        }
        Ok(Self {
            control_lower: sweep[lo].control,
            control_upper: sweep[hi].control,
            growth_lower: sweep[lo].eigenvalue.re,
            growth_upper: sweep[hi].eigenvalue.re,
        })
    }
}

/// Rescales a complex eigenvector so that `⟨e_r, e_ref⟩ = 1` and
/// `⟨e_i, e_ref⟩ = 0`.
///
/// The scale and rotation of `(e_r, e_i)` are the two-parameter family the
/// normalization removes; the rescaling factor is `1/z` with
/// `z = ⟨e_r, e_ref⟩ + i·⟨e_i, e_ref⟩`.
pub fn normalize_eigenvector_by_hopf_condition(
    vector_real: &DVector<f64>,
    vector_imag: &DVector<f64>,
    e_ref: &DVector<f64>,
) -> Result<(DVector<f64>, DVector<f64>)> {
    let z = Complex::new(vector_real.dot(e_ref), vector_imag.dot(e_ref));
    if z.norm() <= 1e-14 {
        bail!("Eigenvector is orthogonal to the reference vector; normalization is degenerate.");
    }
    let c = z.inv();
    let er = vector_real * c.re - vector_imag * c.im;
    let ei = vector_imag * c.re + vector_real * c.im;
    Ok((er, ei))
}

/// Solves the augmented Hopf system by plain Newton iteration from `x0`,
/// with one direct factorization of the augmented jacobian per step.
///
/// Convergence semantics mirror
/// [`solve_fixed_point`](crate::fixed_point::solve_fixed_point): the
/// diagnostics record carries the outcome, a singular jacobian is an error
/// (typically the reference vector is inconsistent with the mode).
pub fn solve_hopf_newton<R: DynamicalModel, L: LinearizedModel>(
    hopf: &mut HopfModel<R, L>,
    x0: &DVector<f64>,
    settings: NewtonSettings,
) -> Result<(DVector<f64>, SolverInfo)> {
    if x0.len() != hopf.hopf_size() {
        bail!(
            "Initial guess has length {}, expected {}.",
            x0.len(),
            hopf.hopf_size()
        );
    }
    if settings.max_steps == 0 {
        bail!("max_steps must be greater than zero.");
    }
    if settings.tolerance <= 0.0 {
        bail!("tolerance must be positive.");
    }
    if settings.damping <= 0.0 {
        bail!("damping must be positive.");
    }

    let mut x = x0.clone();
    let mut residual = hopf.assem_res(&x)?;
    hopf.apply_dirichlet_vec(&mut residual);
    let mut residual_norm = residual.norm();
    let mut iterations = 0usize;

    let converged = loop {
        if residual_norm <= settings.tolerance {
            break true;
        }
        if iterations >= settings.max_steps {
            break false;
        }

        let mut jacobian = hopf.assem_jac(&x)?;
        hopf.apply_dirichlet_mat(&mut jacobian);
        let delta = jacobian
            .lu()
            .solve(&residual)
            .ok_or(SolveError::SingularJacobian)?;

        x -= delta * settings.damping;
        iterations += 1;

        residual = hopf.assem_res(&x)?;
        hopf.apply_dirichlet_vec(&mut residual);
        residual_norm = residual.norm();
    };

    Ok((
        x,
        SolverInfo {
            iterations,
            residual_norm,
            converged,
        },
    ))
}
