//! Reduced (adjoint) gradients of functionals through the Hopf system.
//!
//! The Hopf residual `R(x; g) = 0` implicitly defines the bifurcation state
//! `x(g)` as a function of the model properties. For a functional `F(x, g)`
//! the total derivative eliminates the implicit dependence via the
//! implicit-function theorem:
//!
//! ```text
//! dF/dg = ∂F/∂g − λᵀ·∂R/∂g,     (∂R/∂x)ᵀ·λ = (∂F/∂x)ᵀ
//! ```
//!
//! One adjoint solve against the transposed Hopf jacobian per functional,
//! independent of the number of properties.

use crate::block::BlockVec;
use crate::error::SolveError;
use crate::functionals::FuncExpr;
use crate::hopf::HopfModel;
use crate::model::{DynamicalModel, LinearizedModel};
use anyhow::{bail, Result};
use nalgebra::DVector;

/// Evaluates total property derivatives of a functional bound to a Hopf
/// model.
///
/// The Hopf state passed to [`assem_dg_dprops`](Self::assem_dg_dprops) must
/// already satisfy the Hopf residual to solver tolerance; the gradient is
/// only meaningful at a converged bifurcation point and no re-solving happens
/// here.
pub struct ReducedGradient<'a, R: DynamicalModel, L: LinearizedModel> {
    func: &'a mut FuncExpr,
    hopf: &'a mut HopfModel<R, L>,
}

impl<'a, R: DynamicalModel, L: LinearizedModel> ReducedGradient<'a, R, L> {
    pub fn new(func: &'a mut FuncExpr, hopf: &'a mut HopfModel<R, L>) -> Self {
        Self { func, hopf }
    }

    /// Value of the functional at the given Hopf state and properties.
    pub fn assem_g(&mut self, xhopf: &DVector<f64>, props: &BlockVec) -> Result<f64> {
        self.bind(xhopf, props)?;
        Ok(self.func.eval())
    }

    /// Total derivative `dF/dg` at the converged Hopf state `xhopf`.
    pub fn assem_dg_dprops(
        &mut self,
        xhopf: &DVector<f64>,
        props: &BlockVec,
    ) -> Result<DVector<f64>> {
        self.bind(xhopf, props)?;

        let mut dg_dx = self.func.grad_state();
        if dg_dx.len() != self.hopf.hopf_size() {
            bail!(
                "Functional state gradient has length {}, expected {}.",
                dg_dx.len(),
                self.hopf.hopf_size()
            );
        }
        self.hopf.apply_dirichlet_vec(&mut dg_dx);

        let mut jacobian = self.hopf.assem_jac(xhopf)?;
        self.hopf.apply_dirichlet_mat(&mut jacobian);
        let adjoint = jacobian
            .transpose()
            .lu()
            .solve(&dg_dx)
            .ok_or(SolveError::SingularJacobian)?;

        let dres_dprops = self.hopf.assem_jac_props(xhopf)?;
        let dg_dprops = self.func.grad_props();
        if dg_dprops.len() != self.hopf.props_size() {
            bail!(
                "Functional property gradient has length {}, expected {}.",
                dg_dprops.len(),
                self.hopf.props_size()
            );
        }

        Ok(dg_dprops - dres_dprops.transpose() * adjoint)
    }

    fn bind(&mut self, xhopf: &DVector<f64>, props: &BlockVec) -> Result<()> {
        if props.layout() != self.hopf.res().props_layout() {
            bail!("Property layout does not match the model.");
        }
        self.hopf.set_props(props);
        self.func.set_props(props);
        self.func.set_state(xhopf);
        Ok(())
    }
}
