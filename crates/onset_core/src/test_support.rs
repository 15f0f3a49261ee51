//! Small analytic models shared by the solver test suites.
//!
//! `OscillatorModel` is a two-dof nonlinear oscillator whose damping is
//! driven by the control `q`:
//!
//! ```text
//! du/dt = v
//! m·dv/dt = (q − c_d)·v − k·w − γ·w²·v − δ·w³,    w = u − β·q
//! ```
//!
//! Its fixed point `u = β·q, v = 0` and its bifurcation point `q* = c_d`,
//! `ω* = √(k/m)` are analytic, which makes every solver result checkable in
//! closed form. `ClampedChainModel` embeds the same dynamics in a four-dof
//! chain with a clamped end (Dirichlet dofs) and a two-entry stiffness block.

use crate::block::{BlockLayout, BlockVec};
use crate::hopf::HopfModel;
use crate::model::{DynamicalModel, LinearizedModel};
use nalgebra::{DMatrix, DVector};

fn oscillator_state_layout() -> BlockLayout {
    BlockLayout::new(vec![("u", 1), ("v", 1)])
}

fn oscillator_props_layout() -> BlockLayout {
    BlockLayout::new(vec![("stiffness", 1), ("damping", 1), ("mass", 1)])
}

pub(crate) struct OscillatorModel {
    state_layout: BlockLayout,
    props_layout: BlockLayout,
    state: DVector<f64>,
    control: f64,
    props: DVector<f64>,
}

impl OscillatorModel {
    pub(crate) const K: f64 = 4.0;
    pub(crate) const C_D: f64 = 1.0;
    pub(crate) const M: f64 = 1.0;
    pub(crate) const BETA: f64 = 0.5;
    const GAMMA: f64 = 1.0;
    const DELTA: f64 = 0.5;

    pub(crate) fn standard() -> Self {
        Self {
            state_layout: oscillator_state_layout(),
            props_layout: oscillator_props_layout(),
            state: DVector::zeros(2),
            control: 0.0,
            props: DVector::from_vec(vec![Self::K, Self::C_D, Self::M]),
        }
    }

    /// Current `(u, v, k, c_d, m, q, w)`.
    fn unpack(&self) -> (f64, f64, f64, f64, f64, f64, f64) {
        let (u, v) = (self.state[0], self.state[1]);
        let (k, c_d, m) = (self.props[0], self.props[1], self.props[2]);
        let q = self.control;
        (u, v, k, c_d, m, q, u - Self::BETA * q)
    }
}

impl DynamicalModel for OscillatorModel {
    fn state_layout(&self) -> &BlockLayout {
        &self.state_layout
    }

    fn props_layout(&self) -> &BlockLayout {
        &self.props_layout
    }

    fn dirichlet_dofs(&self) -> &[usize] {
        &[]
    }

    fn set_state(&mut self, state: &BlockVec) {
        self.state.copy_from(state.as_vector());
    }

    fn set_control(&mut self, control: f64) {
        self.control = control;
    }

    fn set_props(&mut self, props: &BlockVec) {
        self.props.copy_from(props.as_vector());
    }

    fn assem_res(&self) -> DVector<f64> {
        let (_, v, k, c_d, _, q, w) = self.unpack();
        let gamma = Self::GAMMA;
        let delta = Self::DELTA;
        DVector::from_vec(vec![
            v,
            (q - c_d) * v - k * w - gamma * w * w * v - delta * w * w * w,
        ])
    }

    fn assem_jac_state(&self) -> DMatrix<f64> {
        let (_, v, k, c_d, _, q, w) = self.unpack();
        let gamma = Self::GAMMA;
        let delta = Self::DELTA;
        DMatrix::from_row_slice(
            2,
            2,
            &[
                0.0,
                1.0,
                -k - 2.0 * gamma * w * v - 3.0 * delta * w * w,
                (q - c_d) - gamma * w * w,
            ],
        )
    }

    fn assem_mass(&self) -> DMatrix<f64> {
        let m = self.props[2];
        DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, m])
    }

    fn assem_jac_control(&self) -> DVector<f64> {
        let (_, v, k, _, _, _, w) = self.unpack();
        let gamma = Self::GAMMA;
        let delta = Self::DELTA;
        let beta = Self::BETA;
        DVector::from_vec(vec![
            0.0,
            v + beta * (k + 2.0 * gamma * w * v + 3.0 * delta * w * w),
        ])
    }

    fn assem_jac_props(&self) -> DMatrix<f64> {
        let (_, v, _, _, _, _, w) = self.unpack();
        DMatrix::from_row_slice(2, 3, &[0.0, 0.0, 0.0, -w, -v, 0.0])
    }
}

/// Exact linearization of [`OscillatorModel`]: assembles `J·du + M·dut` and
/// its derivatives at the current base point.
pub(crate) struct OscillatorLinearizedModel {
    base: OscillatorModel,
    dstate: DVector<f64>,
    dstate_t: DVector<f64>,
}

impl OscillatorLinearizedModel {
    pub(crate) fn standard() -> Self {
        Self {
            base: OscillatorModel::standard(),
            dstate: DVector::zeros(2),
            dstate_t: DVector::zeros(2),
        }
    }
}

impl DynamicalModel for OscillatorLinearizedModel {
    fn state_layout(&self) -> &BlockLayout {
        self.base.state_layout()
    }

    fn props_layout(&self) -> &BlockLayout {
        self.base.props_layout()
    }

    fn dirichlet_dofs(&self) -> &[usize] {
        self.base.dirichlet_dofs()
    }

    fn set_state(&mut self, state: &BlockVec) {
        self.base.set_state(state);
    }

    fn set_control(&mut self, control: f64) {
        self.base.set_control(control);
    }

    fn set_props(&mut self, props: &BlockVec) {
        self.base.set_props(props);
    }

    fn assem_res(&self) -> DVector<f64> {
        let jac = self.base.assem_jac_state();
        let mass = self.base.assem_mass();
        jac * &self.dstate + mass * &self.dstate_t
    }

    fn assem_jac_state(&self) -> DMatrix<f64> {
        let (_, v, _, _, _, _, w) = self.base.unpack();
        let gamma = OscillatorModel::GAMMA;
        let delta = OscillatorModel::DELTA;
        let (a, b) = (self.dstate[0], self.dstate[1]);
        DMatrix::from_row_slice(
            2,
            2,
            &[
                0.0,
                0.0,
                (-2.0 * gamma * v - 6.0 * delta * w) * a - 2.0 * gamma * w * b,
                -2.0 * gamma * w * a,
            ],
        )
    }

    fn assem_mass(&self) -> DMatrix<f64> {
        self.base.assem_mass()
    }

    fn assem_jac_control(&self) -> DVector<f64> {
        let (_, v, _, _, _, _, w) = self.base.unpack();
        let gamma = OscillatorModel::GAMMA;
        let delta = OscillatorModel::DELTA;
        let beta = OscillatorModel::BETA;
        let (a, b) = (self.dstate[0], self.dstate[1]);
        DVector::from_vec(vec![
            0.0,
            (2.0 * gamma * v + 6.0 * delta * w) * beta * a + (1.0 + 2.0 * gamma * w * beta) * b,
        ])
    }

    fn assem_jac_props(&self) -> DMatrix<f64> {
        let (a, b) = (self.dstate[0], self.dstate[1]);
        let bt = self.dstate_t[1];
        DMatrix::from_row_slice(2, 3, &[0.0, 0.0, 0.0, -a, -b, bt])
    }
}

impl LinearizedModel for OscillatorLinearizedModel {
    fn set_dstate(&mut self, dstate: &BlockVec) {
        self.dstate.copy_from(dstate.as_vector());
    }

    fn set_dstate_t(&mut self, dstate_t: &BlockVec) {
        self.dstate_t.copy_from(dstate_t.as_vector());
    }
}

fn chain_state_layout() -> BlockLayout {
    BlockLayout::new(vec![("u", 2), ("v", 2)])
}

fn chain_props_layout() -> BlockLayout {
    BlockLayout::new(vec![("stiffness", 2), ("damping", 1), ("mass", 1)])
}

/// Four-dof chain with a clamped end: dofs 0 (`u0`) and 2 (`v0`) carry
/// Dirichlet constraints, the free pair follows the oscillator dynamics with
/// an extra coupling spring `k01` back to the clamped dof.
pub(crate) struct ClampedChainModel {
    state_layout: BlockLayout,
    props_layout: BlockLayout,
    state: DVector<f64>,
    control: f64,
    props: DVector<f64>,
}

impl ClampedChainModel {
    pub(crate) const K1: f64 = 4.0;
    pub(crate) const K01: f64 = 1.5;
    pub(crate) const C_D: f64 = 1.0;
    pub(crate) const M: f64 = 1.0;
    pub(crate) const BETA: f64 = 0.5;
    const GAMMA: f64 = 1.0;

    pub(crate) fn standard() -> Self {
        Self {
            state_layout: chain_state_layout(),
            props_layout: chain_props_layout(),
            state: DVector::zeros(4),
            control: 0.0,
            props: DVector::from_vec(vec![Self::K1, Self::K01, Self::C_D, Self::M]),
        }
    }

    /// Current `(u0, u1, v0, v1, k1, k01, c_d, m, q, w)`.
    #[allow(clippy::type_complexity)]
    fn unpack(&self) -> (f64, f64, f64, f64, f64, f64, f64, f64, f64, f64) {
        let (u0, u1, v0, v1) = (self.state[0], self.state[1], self.state[2], self.state[3]);
        let (k1, k01, c_d, m) = (self.props[0], self.props[1], self.props[2], self.props[3]);
        let q = self.control;
        (u0, u1, v0, v1, k1, k01, c_d, m, q, u1 - Self::BETA * q)
    }
}

impl DynamicalModel for ClampedChainModel {
    fn state_layout(&self) -> &BlockLayout {
        &self.state_layout
    }

    fn props_layout(&self) -> &BlockLayout {
        &self.props_layout
    }

    fn dirichlet_dofs(&self) -> &[usize] {
        &[0, 2]
    }

    fn set_state(&mut self, state: &BlockVec) {
        self.state.copy_from(state.as_vector());
    }

    fn set_control(&mut self, control: f64) {
        self.control = control;
    }

    fn set_props(&mut self, props: &BlockVec) {
        self.props.copy_from(props.as_vector());
    }

    fn assem_res(&self) -> DVector<f64> {
        let (u0, u1, v0, v1, k1, k01, c_d, _, q, w) = self.unpack();
        let gamma = Self::GAMMA;
        DVector::from_vec(vec![
            v0,
            v1,
            -k01 * (u0 - u1) - c_d * v0,
            (q - c_d) * v1 - k1 * w - k01 * (u1 - u0) - gamma * w * w * v1,
        ])
    }

    fn assem_jac_state(&self) -> DMatrix<f64> {
        let (_, _, _, v1, k1, k01, c_d, _, q, w) = self.unpack();
        let gamma = Self::GAMMA;
        DMatrix::from_row_slice(
            4,
            4,
            &[
                0.0, 0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, //
                -k01, k01, -c_d, 0.0, //
                k01,
                -k1 - k01 - 2.0 * gamma * w * v1,
                0.0,
                (q - c_d) - gamma * w * w,
            ],
        )
    }

    fn assem_mass(&self) -> DMatrix<f64> {
        let m = self.props[3];
        let mut mass = DMatrix::identity(4, 4);
        mass[(2, 2)] = m;
        mass[(3, 3)] = m;
        mass
    }

    fn assem_jac_control(&self) -> DVector<f64> {
        let (_, _, _, v1, k1, _, _, _, _, w) = self.unpack();
        let gamma = Self::GAMMA;
        let beta = Self::BETA;
        DVector::from_vec(vec![
            0.0,
            0.0,
            0.0,
            v1 + beta * (k1 + 2.0 * gamma * w * v1),
        ])
    }

    fn assem_jac_props(&self) -> DMatrix<f64> {
        let (u0, u1, v0, v1, _, _, _, _, _, w) = self.unpack();
        DMatrix::from_row_slice(
            4,
            4,
            &[
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, -(u0 - u1), -v0, 0.0, //
                -w, -(u1 - u0), -v1, 0.0,
            ],
        )
    }
}

pub(crate) struct ClampedChainLinearizedModel {
    base: ClampedChainModel,
    dstate: DVector<f64>,
    dstate_t: DVector<f64>,
}

impl ClampedChainLinearizedModel {
    pub(crate) fn standard() -> Self {
        Self {
            base: ClampedChainModel::standard(),
            dstate: DVector::zeros(4),
            dstate_t: DVector::zeros(4),
        }
    }
}

impl DynamicalModel for ClampedChainLinearizedModel {
    fn state_layout(&self) -> &BlockLayout {
        self.base.state_layout()
    }

    fn props_layout(&self) -> &BlockLayout {
        self.base.props_layout()
    }

    fn dirichlet_dofs(&self) -> &[usize] {
        self.base.dirichlet_dofs()
    }

    fn set_state(&mut self, state: &BlockVec) {
        self.base.set_state(state);
    }

    fn set_control(&mut self, control: f64) {
        self.base.set_control(control);
    }

    fn set_props(&mut self, props: &BlockVec) {
        self.base.set_props(props);
    }

    fn assem_res(&self) -> DVector<f64> {
        let jac = self.base.assem_jac_state();
        let mass = self.base.assem_mass();
        jac * &self.dstate + mass * &self.dstate_t
    }

    fn assem_jac_state(&self) -> DMatrix<f64> {
        let (_, _, _, v1, _, _, _, _, _, w) = self.base.unpack();
        let gamma = ClampedChainModel::GAMMA;
        let (a1, b1) = (self.dstate[1], self.dstate[3]);

        let mut jac = DMatrix::zeros(4, 4);
        jac[(3, 1)] = -2.0 * gamma * (v1 * a1 + w * b1);
        jac[(3, 3)] = -2.0 * gamma * w * a1;
        jac
    }

    fn assem_mass(&self) -> DMatrix<f64> {
        self.base.assem_mass()
    }

    fn assem_jac_control(&self) -> DVector<f64> {
        let (_, _, _, v1, _, _, _, _, _, w) = self.base.unpack();
        let gamma = ClampedChainModel::GAMMA;
        let beta = ClampedChainModel::BETA;
        let (a1, b1) = (self.dstate[1], self.dstate[3]);
        DVector::from_vec(vec![
            0.0,
            0.0,
            0.0,
            2.0 * gamma * beta * v1 * a1 + (1.0 + 2.0 * gamma * beta * w) * b1,
        ])
    }

    fn assem_jac_props(&self) -> DMatrix<f64> {
        let (a0, a1) = (self.dstate[0], self.dstate[1]);
        let (b0, b1) = (self.dstate[2], self.dstate[3]);
        let (bt0, bt1) = (self.dstate_t[2], self.dstate_t[3]);
        DMatrix::from_row_slice(
            4,
            4,
            &[
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, -(a0 - a1), -b0, bt0, //
                -a1, a0 - a1, -b1, bt1,
            ],
        )
    }
}

impl LinearizedModel for ClampedChainLinearizedModel {
    fn set_dstate(&mut self, dstate: &BlockVec) {
        self.dstate.copy_from(dstate.as_vector());
    }

    fn set_dstate_t(&mut self, dstate_t: &BlockVec) {
        self.dstate_t.copy_from(dstate_t.as_vector());
    }
}

pub(crate) fn oscillator_hopf_model() -> HopfModel<OscillatorModel, OscillatorLinearizedModel> {
    HopfModel::new(
        OscillatorModel::standard(),
        OscillatorLinearizedModel::standard(),
        DVector::from_element(2, 1.0),
    )
    .unwrap()
}

pub(crate) fn clamped_chain_hopf_model(
) -> HopfModel<ClampedChainModel, ClampedChainLinearizedModel> {
    HopfModel::new(
        ClampedChainModel::standard(),
        ClampedChainLinearizedModel::standard(),
        DVector::from_element(4, 1.0),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taylor::taylor_convergence;
    use std::cell::RefCell;

    fn check_order(report: &crate::taylor::TaylorReport) {
        // Exactly-linear dependence leaves only rounding noise; the order is
        // meaningless there.
        if report.max_error() < 1e-10 {
            return;
        }
        let order = report.min_order().expect("orders should be finite");
        assert!(
            (1.8..=2.2).contains(&order),
            "observed order {order}, report {report:?}"
        );
    }

    fn bind_state<M: DynamicalModel>(model: &mut M, values: &DVector<f64>) {
        let state = BlockVec::from_vector(model.state_layout().clone(), values.clone()).unwrap();
        model.set_state(&state);
    }

    fn bind_props<M: DynamicalModel>(model: &mut M, values: &DVector<f64>) {
        let props = BlockVec::from_vector(model.props_layout().clone(), values.clone()).unwrap();
        model.set_props(&props);
    }

    /// Verifies the state, control, and property jacobians of a model against
    /// its residual at a generic off-equilibrium point.
    fn check_model_jacobians<M: DynamicalModel>(
        model: M,
        state0: DVector<f64>,
        props0: DVector<f64>,
    ) {
        let model = RefCell::new(model);
        let control0 = 1.3;
        let n = state0.len();

        // State direction.
        let dstate = DVector::from_fn(n, |i, _| 1e-3 * (1.0 + 0.3 * i as f64));
        let report = taylor_convergence(
            &state0,
            &dstate,
            |x| {
                let mut model = model.borrow_mut();
                model.set_control(control0);
                bind_state(&mut *model, x);
                model.assem_res()
            },
            |x, dx| {
                let mut model = model.borrow_mut();
                model.set_control(control0);
                bind_state(&mut *model, x);
                &model.assem_jac_state() * dx
            },
        );
        check_order(&report);

        // Control direction.
        let q0 = DVector::from_vec(vec![control0]);
        let dq = DVector::from_vec(vec![1e-3]);
        let report = taylor_convergence(
            &q0,
            &dq,
            |q| {
                let mut model = model.borrow_mut();
                bind_state(&mut *model, &state0);
                model.set_control(q[0]);
                model.assem_res()
            },
            |q, dq| {
                let mut model = model.borrow_mut();
                bind_state(&mut *model, &state0);
                model.set_control(q[0]);
                model.assem_jac_control() * dq[0]
            },
        );
        check_order(&report);

        // Property direction.
        let np = props0.len();
        let dprops = DVector::from_fn(np, |i, _| 1e-3 * (1.0 - 0.2 * i as f64));
        let report = taylor_convergence(
            &props0,
            &dprops,
            |p| {
                let mut model = model.borrow_mut();
                model.set_control(control0);
                bind_state(&mut *model, &state0);
                bind_props(&mut *model, p);
                model.assem_res()
            },
            |p, dp| {
                let mut model = model.borrow_mut();
                model.set_control(control0);
                bind_state(&mut *model, &state0);
                bind_props(&mut *model, p);
                &model.assem_jac_props() * dp
            },
        );
        check_order(&report);
    }

    #[test]
    fn oscillator_jacobians_are_consistent() {
        check_model_jacobians(
            OscillatorModel::standard(),
            DVector::from_vec(vec![0.4, -0.2]),
            DVector::from_vec(vec![4.0, 1.0, 1.0]),
        );
    }

    #[test]
    fn oscillator_linearization_jacobians_are_consistent() {
        let mut model = OscillatorLinearizedModel::standard();
        let layout = model.state_layout().clone();
        model.set_dstate(
            &BlockVec::from_vector(layout.clone(), DVector::from_vec(vec![0.3, -0.6])).unwrap(),
        );
        model.set_dstate_t(
            &BlockVec::from_vector(layout, DVector::from_vec(vec![-0.1, 0.8])).unwrap(),
        );
        check_model_jacobians(
            model,
            DVector::from_vec(vec![0.4, -0.2]),
            DVector::from_vec(vec![4.0, 1.0, 1.0]),
        );
    }

    #[test]
    fn chain_jacobians_are_consistent() {
        check_model_jacobians(
            ClampedChainModel::standard(),
            DVector::from_vec(vec![0.1, 0.4, -0.3, 0.2]),
            DVector::from_vec(vec![4.0, 1.5, 1.0, 1.0]),
        );
    }

    #[test]
    fn chain_linearization_jacobians_are_consistent() {
        let mut model = ClampedChainLinearizedModel::standard();
        let layout = model.state_layout().clone();
        model.set_dstate(
            &BlockVec::from_vector(
                layout.clone(),
                DVector::from_vec(vec![0.2, 0.3, -0.6, 0.5]),
            )
            .unwrap(),
        );
        model.set_dstate_t(
            &BlockVec::from_vector(layout, DVector::from_vec(vec![-0.1, 0.8, 0.4, -0.2])).unwrap(),
        );
        check_model_jacobians(
            model,
            DVector::from_vec(vec![0.1, 0.4, -0.3, 0.2]),
            DVector::from_vec(vec![4.0, 1.5, 1.0, 1.0]),
        );
    }

    #[test]
    fn linearization_matches_directional_difference() {
        // J·du from the linearized model agrees with a first-order difference
        // of the parent residual.
        let mut res = OscillatorModel::standard();
        let mut dres = OscillatorLinearizedModel::standard();
        let layout = res.state_layout().clone();

        let base = DVector::from_vec(vec![0.4, -0.2]);
        let direction = DVector::from_vec(vec![0.7, 0.3]);
        let step = 1e-6;

        res.set_control(1.3);
        dres.set_control(1.3);
        bind_state(&mut res, &base);
        bind_state(&mut dres, &base);
        dres.set_dstate(&BlockVec::from_vector(layout.clone(), direction.clone()).unwrap());
        dres.set_dstate_t(&BlockVec::zeros(layout.clone()));
        let lin = dres.assem_res();

        let res_0 = res.assem_res();
        bind_state(&mut res, &(&base + &direction * step));
        let res_1 = res.assem_res();
        let diff = (res_1 - res_0) / step;

        for i in 0..2 {
            assert!(
                (lin[i] - diff[i]).abs() < 1e-4,
                "component {i}: {} vs {}",
                lin[i],
                diff[i]
            );
        }
    }
}
