//! Failure taxonomy shared by the nonlinear, eigenvalue, and adjoint solves.

use thiserror::Error;

/// Errors raised by the solver layers.
///
/// Non-convergence of a Newton iteration is normally reported through the
/// [`SolverInfo`](crate::fixed_point::SolverInfo) diagnostics record rather
/// than an error; the `NonConvergence` variant exists for callers that treat
/// a capped iteration as fatal (e.g. a stability sweep that cannot proceed
/// without a converged fixed point).
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("newton iteration exceeded {iterations} steps without converging (‖res‖ = {residual_norm:.3e})")]
    NonConvergence {
        iterations: usize,
        residual_norm: f64,
    },

    #[error("eigenvalue solve failed: {0}")]
    EigensolverFailure(String),

    #[error("linear solve failed: jacobian is singular")]
    SingularJacobian,
}
