//! The `onset_core` crate locates Hopf bifurcations (the onset of
//! self-sustained oscillation) of a parameterized dynamical system, and
//! differentiates scalar objectives of the bifurcation point with respect to
//! model properties for inverse analysis.
//!
//! Key components:
//! - **Model interface** (`model`, `block`): block-labeled state/property
//!   vectors and the residual/jacobian assembly contract the solvers consume.
//! - **Solvers**: Newton fixed points (`fixed_point`), generalized-eigenvalue
//!   stability analysis (`stability`), and the augmented Hopf system (`hopf`).
//! - **Sensitivities**: a differentiable functional algebra (`functionals`)
//!   and adjoint reduced gradients (`gradient`).
//! - **Verification**: Taylor-remainder convergence checks (`taylor`) and
//!   periodic-signal utilities (`signal`).

pub mod block;
pub mod error;
pub mod fixed_point;
pub mod functionals;
pub mod gradient;
pub mod hopf;
pub mod model;
pub mod signal;
pub mod stability;
pub mod taylor;

#[cfg(test)]
pub(crate) mod test_support;
