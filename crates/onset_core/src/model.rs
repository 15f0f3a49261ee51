//! Interface to the parameterized dynamical model.
//!
//! The solvers in this crate do not assemble physics themselves; they consume
//! a model object obeying the convention
//!
//! ```text
//! M(u; g, q) · du/dt = R(u; g, q)
//! ```
//!
//! where `u` is the block-structured state, `g` the block-structured
//! properties (material/geometric constants) and `q` a scalar control (e.g.
//! a driving pressure). A fixed point satisfies `R = 0`, and perturbations
//! about a fixed point grow like `e^{λt}` with `J x = λ M x`,
//! `J = ∂R/∂u`.
//!
//! Models are mutated in place: `set_state`/`set_control`/`set_props` choose
//! the current linearization point and every `assem_*` call evaluates there.
//! This is the deliberate mechanism for expressing "current point", not
//! incidental shared state; a model instance must not be aliased across two
//! interleaved solves.

use crate::block::{BlockLayout, BlockVec};
use nalgebra::{DMatrix, DVector};

/// A parameterized dynamical system supplying residual and derivative
/// assembly at its current `(state, control, props)` point.
pub trait DynamicalModel {
    fn state_layout(&self) -> &BlockLayout;

    fn props_layout(&self) -> &BlockLayout;

    /// Sorted global state indices carrying Dirichlet constraints
    /// (constrained to zero).
    fn dirichlet_dofs(&self) -> &[usize];

    fn set_state(&mut self, state: &BlockVec);

    fn set_control(&mut self, control: f64);

    fn set_props(&mut self, props: &BlockVec);

    /// Residual `R` at the current point.
    fn assem_res(&self) -> DVector<f64>;

    /// State jacobian `J = ∂R/∂u`.
    fn assem_jac_state(&self) -> DMatrix<f64>;

    /// Mass matrix `M = ∂(M·du/dt)/∂(du/dt)`; the `B` matrix of the
    /// generalized eigenproblem `J x = λ M x`.
    fn assem_mass(&self) -> DMatrix<f64>;

    /// Control jacobian `∂R/∂q`.
    fn assem_jac_control(&self) -> DVector<f64>;

    /// Property jacobian `∂R/∂g`, one column per flat property entry.
    fn assem_jac_props(&self) -> DMatrix<f64>;
}

/// The exact linearization of a [`DynamicalModel`].
///
/// A linearized model holds two direction vectors in addition to the base
/// point: `du` ([`set_dstate`](Self::set_dstate)) and `dut`
/// ([`set_dstate_t`](Self::set_dstate_t)). The assembly contract of the
/// supertrait is reinterpreted at the current `(u, g, q)`:
///
/// - `assem_res()` returns `J(u)·du + M(u)·dut`;
/// - `assem_jac_state()` returns `∂(J·du + M·dut)/∂u` (second-order actions
///   of the parent residual);
/// - `assem_jac_control()` returns `∂(J·du + M·dut)/∂q`;
/// - `assem_jac_props()` returns `∂(J·du + M·dut)/∂g`, including the
///   `∂M/∂g·dut` contribution.
pub trait LinearizedModel: DynamicalModel {
    fn set_dstate(&mut self, dstate: &BlockVec);

    fn set_dstate_t(&mut self, dstate_t: &BlockVec);
}

/// Zeroes the constrained entries of a residual or increment vector.
pub fn apply_dirichlet_vec(dofs: &[usize], vec: &mut DVector<f64>) {
    for &dof in dofs {
        vec[dof] = 0.0;
    }
}

/// Replaces constrained rows and columns by an identity constraint.
pub fn apply_dirichlet_mat(dofs: &[usize], mat: &mut DMatrix<f64>) {
    for &dof in dofs {
        for col in 0..mat.ncols() {
            mat[(dof, col)] = 0.0;
        }
        for row in 0..mat.nrows() {
            mat[(row, dof)] = 0.0;
        }
    }
    for &dof in dofs {
        mat[(dof, dof)] = 1.0;
    }
}
