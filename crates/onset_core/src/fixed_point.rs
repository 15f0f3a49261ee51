//! Newton solution of fixed points of the dynamical model.

use crate::block::BlockVec;
use crate::error::SolveError;
use crate::model::{apply_dirichlet_mat, apply_dirichlet_vec, DynamicalModel};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Settings for a plain Newton iteration (no line search).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub tolerance: f64,
    pub damping: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            tolerance: 1e-9,
            damping: 1.0,
        }
    }
}

/// Diagnostics record of a Newton solve.
///
/// `converged: false` is the primary non-convergence signal; whether that is
/// fatal is the caller's decision (retry with a better guess, continuation,
/// or escalation to [`SolveError::NonConvergence`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverInfo {
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

impl SolverInfo {
    /// Converts a non-converged record into the typed error.
    pub fn require_converged(&self) -> Result<()> {
        if self.converged {
            Ok(())
        } else {
            Err(SolveError::NonConvergence {
                iterations: self.iterations,
                residual_norm: self.residual_norm,
            }
            .into())
        }
    }
}

/// Solves `R(u; g, q) = 0` for the state `u` at a fixed control `q` by plain
/// Newton iteration from `x0`.
///
/// Dirichlet-constrained dofs are held at their initial values: the residual
/// rows are zeroed and the jacobian rows/columns replaced by identity, so the
/// guess must already satisfy the constraints.
pub fn solve_fixed_point<M: DynamicalModel>(
    model: &mut M,
    x0: &BlockVec,
    control: f64,
    settings: NewtonSettings,
) -> Result<(BlockVec, SolverInfo)> {
    if x0.layout() != model.state_layout() {
        bail!("Initial guess layout does not match the model state layout.");
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

    model.set_control(control);

    let mut state = x0.clone();
    let dofs: Vec<usize> = model.dirichlet_dofs().to_vec();

    model.set_state(&state);
    let mut residual = model.assem_res();
    apply_dirichlet_vec(&dofs, &mut residual);
    let mut residual_norm = residual.norm();
    let mut iterations = 0usize;

    let converged = loop {
        if residual_norm <= settings.tolerance {
            break true;
        }
        if iterations >= settings.max_steps {
            break false;
        }

        let mut jacobian = model.assem_jac_state();
        apply_dirichlet_mat(&dofs, &mut jacobian);
        let delta = jacobian
            .lu()
            .solve(&residual)
            .ok_or(SolveError::SingularJacobian)?;

        *state.vector_mut() -= delta * settings.damping;
        iterations += 1;

        model.set_state(&state);
        residual = model.assem_res();
        apply_dirichlet_vec(&dofs, &mut residual);
        residual_norm = residual.norm();
    };

    Ok((
        state,
        SolverInfo {
            iterations,
            residual_norm,
            converged,
        },
    ))
}
