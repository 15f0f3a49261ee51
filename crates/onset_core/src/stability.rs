//! Linear stability analysis of fixed points.
//!
//! Linearizing the model about a fixed point gives the generalized
//! eigenproblem `J x = λ M x`; the eigenvalues λ are the growth rates of
//! perturbations and a conjugate pair crossing the imaginary axis marks a
//! Hopf bifurcation. The problem is reduced on the Dirichlet-free dofs to
//! the standard form `(M⁻¹J) x = λ x` with one direct factorization, and
//! eigenvectors are recovered from the null space of the shifted operator.

use crate::block::BlockVec;
use crate::error::SolveError;
use crate::fixed_point::{solve_fixed_point, NewtonSettings, SolverInfo};
use crate::model::DynamicalModel;
use anyhow::{bail, Context, Result};
use nalgebra::linalg::{Schur, SVD};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

const EIG_MAX_ITER: usize = 10_000;

/// One eigenmode of the linearized dynamics: a complex growth rate and the
/// eigenvector split into real and imaginary parts of the state's shape.
#[derive(Debug, Clone)]
pub struct EigenMode {
    pub value: Complex<f64>,
    pub vector_real: DVector<f64>,
    pub vector_imag: DVector<f64>,
}

/// Solves the generalized eigenproblem of the model linearized about the
/// fixed point `xfp` at the given control, returning the `n_modes` modes of
/// largest real part in descending order.
///
/// Dirichlet-constrained dofs are excluded from the eigenproblem and carry
/// zeros in the returned eigenvectors.
pub fn solve_modal<M: DynamicalModel>(
    model: &mut M,
    xfp: &BlockVec,
    control: f64,
    n_modes: usize,
) -> Result<Vec<EigenMode>> {
    let n = model.state_layout().total_size();
    if xfp.layout() != model.state_layout() {
        bail!("Fixed point layout does not match the model state layout.");
    }
    if n_modes == 0 {
        bail!("At least one mode must be requested.");
    }

    let free = free_dofs(n, model.dirichlet_dofs());
    let nf = free.len();
    if n_modes > nf {
        bail!(
            "Requested {} modes but the system has only {} unconstrained dofs.",
            n_modes,
            nf
        );
    }

    model.set_control(control);
    model.set_state(xfp);
    let jac = model.assem_jac_state();
    let mass = model.assem_mass();

    let jac_ff = gather_submatrix(&jac, &free);
    let mass_ff = gather_submatrix(&mass, &free);

    // Reduce J x = λ M x to (M⁻¹J) x = λ x on the free dofs.
    let reduced = mass_ff
        .lu()
        .solve(&jac_ff)
        .ok_or_else(|| SolveError::EigensolverFailure("mass matrix is singular on the unconstrained dofs".into()))?;

    let schur = Schur::try_new(reduced.clone(), 1e-14, EIG_MAX_ITER)
        .ok_or_else(|| SolveError::EigensolverFailure("schur iteration did not converge".into()))?;
    let eigenvalues = schur.complex_eigenvalues();

    let mut order: Vec<usize> = (0..nf).collect();
    order.sort_by(|&a, &b| {
        (eigenvalues[b].re, eigenvalues[b].im)
            .partial_cmp(&(eigenvalues[a].re, eigenvalues[a].im))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let reduced_complex = reduced.map(|v| Complex::new(v, 0.0));
    let mut modes = Vec::with_capacity(n_modes);
    for &idx in order.iter().take(n_modes) {
        let lambda = eigenvalues[idx];
        let vector = nullspace_vector(&reduced_complex, lambda)?;

        let mut vector_real = DVector::zeros(n);
        let mut vector_imag = DVector::zeros(n);
        for (fi, &gi) in free.iter().enumerate() {
            vector_real[gi] = vector[fi].re;
            vector_imag[gi] = vector[fi].im;
        }
        modes.push(EigenMode {
            value: lambda,
            vector_real,
            vector_imag,
        });
    }

    Ok(modes)
}

/// Solves for a fixed point from `x0` and returns its least-stable mode
/// together with the fixed point and the Newton diagnostics.
pub fn solve_least_stable_mode<M: DynamicalModel>(
    model: &mut M,
    x0: &BlockVec,
    control: f64,
    settings: NewtonSettings,
) -> Result<(EigenMode, BlockVec, SolverInfo)> {
    let (xfp, info) = solve_fixed_point(model, x0, control, settings)?;
    info.require_converged()
        .with_context(|| format!("Fixed-point solve failed at control {control}."))?;

    let modes = solve_modal(model, &xfp, control, 1)?;
    let mode = modes.into_iter().next().expect("one mode was requested");
    Ok((mode, xfp, info))
}

/// One point of a control sweep: the control value, the least-stable
/// eigenvalue there, and the fixed point it was computed about.
#[derive(Debug, Clone)]
pub struct SweepPoint {
    pub control: f64,
    pub eigenvalue: Complex<f64>,
    pub fixed_point: BlockVec,
}

/// Sweeps the control over `controls`, solving a fixed point (warm-started
/// from the previous one) and its least-stable mode at each value.
pub fn stability_sweep<M: DynamicalModel>(
    model: &mut M,
    x0: &BlockVec,
    controls: &[f64],
    settings: NewtonSettings,
) -> Result<Vec<SweepPoint>> {
    if controls.is_empty() {
        bail!("Control sweep requires at least one control value.");
    }

    let mut points = Vec::with_capacity(controls.len());
    let mut guess = x0.clone();
    for &control in controls {
        let (mode, xfp, _) = solve_least_stable_mode(model, &guess, control, settings)?;
        guess = xfp.clone();
        points.push(SweepPoint {
            control,
            eigenvalue: mode.value,
            fixed_point: xfp,
        });
    }
    Ok(points)
}

/// Finds the index pairs `(i, i+1)` where the leading eigenvalue's real part
/// changes sign from non-positive to positive, i.e. where a stability
/// crossing is bracketed by the sweep.
pub fn find_hopf_brackets(sweep: &[SweepPoint]) -> Vec<(usize, usize)> {
    sweep
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0].eigenvalue.re <= 0.0 && pair[1].eigenvalue.re > 0.0)
        .map(|(i, _)| (i, i + 1))
        .collect()
}

fn free_dofs(n: usize, dirichlet: &[usize]) -> Vec<usize> {
    (0..n).filter(|dof| !dirichlet.contains(dof)).collect()
}

fn gather_submatrix(mat: &DMatrix<f64>, dofs: &[usize]) -> DMatrix<f64> {
    let nf = dofs.len();
    let mut out = DMatrix::zeros(nf, nf);
    for (i, &gi) in dofs.iter().enumerate() {
        for (j, &gj) in dofs.iter().enumerate() {
            out[(i, j)] = mat[(gi, gj)];
        }
    }
    out
}

/// Recovers a unit-norm null vector of `(C − λI)` via SVD.
fn nullspace_vector(
    reduced: &DMatrix<Complex<f64>>,
    lambda: Complex<f64>,
) -> Result<DVector<Complex<f64>>> {
    let nf = reduced.nrows();
    let mut shifted = reduced.clone();
    for i in 0..nf {
        shifted[(i, i)] -= lambda;
    }

    let svd = SVD::try_new(shifted, false, true, 1e-14, EIG_MAX_ITER)
        .ok_or_else(|| SolveError::EigensolverFailure("svd iteration did not converge".into()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| SolveError::EigensolverFailure("svd returned no right singular vectors".into()))?;

    // v_t is the adjoint of V; the null vector is the conjugated last row.
    let last = v_t.nrows() - 1;
    let mut vector = DVector::from_iterator(nf, v_t.row(last).iter().map(|c| c.conj()));

    let norm = vector.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    if norm <= 0.0 {
        return Err(SolveError::EigensolverFailure("eigenvector has zero norm".into()).into());
    }
    for entry in vector.iter_mut() {
        *entry /= Complex::new(norm, 0.0);
    }
    Ok(vector)
}
