//! Small circuits shared by the integration tests.
//!
//! Each fixture exposes counters through `Rc<Cell<_>>` handles so a test can
//! keep observing the loader after handing it to the engine.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use faer::Mat;
use knox::config::LinearSolverOptions;
use knox::{LoadProvider, SharedNumericSystem, UniverseComm};

/// Send engine logs to the test harness's captured output. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub const VT: f64 = 0.02585;
pub const IS: f64 = 1e-14;

/// Observation handles shared with a fixture.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub residual_loads: Rc<Cell<usize>>,
    pub jacobian_loads: Rc<Cell<usize>>,
    /// Solutions handed over by `point_accepted`, in order.
    pub accepted: Rc<RefCell<Vec<Vec<f64>>>>,
    pub abandoned: Rc<Cell<usize>>,
    /// Every parameter write, in order.
    pub parameters: Rc<RefCell<Vec<(String, f64)>>>,
}

/// 5 mA Norton source with 1 mS into node `v1`, 1 kΩ from `v1` to `v2`, and a
/// diode from `v2` to ground.
///
/// The source is scaled by `vsrcscale`, whose device-layer value is 1.
/// Solution: v2 ≈ 0.675 V.
pub struct DiodeDivider {
    pub source_scale: f64,
    pub recorder: Recorder,
}

impl DiodeDivider {
    pub fn new() -> (Self, Recorder) {
        init_tracing();
        let recorder = Recorder::default();
        (Self { source_scale: 1.0, recorder: recorder.clone() }, recorder)
    }

    fn diode(v: f64) -> (f64, f64) {
        let e = (v / VT).exp();
        (IS * (e - 1.0), IS * e / VT)
    }
}

impl LoadProvider for DiodeDivider {
    fn num_unknowns(&self) -> usize {
        2
    }

    fn load_residual(&mut self, x: &[f64], _prev: &[f64], f: &mut [f64]) -> bool {
        self.recorder.residual_loads.set(self.recorder.residual_loads.get() + 1);
        let (v1, v2) = (x[0], x[1]);
        let (id, _) = Self::diode(v2);
        f[0] = 1e-3 * v1 - 5e-3 * self.source_scale + 1e-3 * (v1 - v2);
        f[1] = 1e-3 * (v2 - v1) + id;
        true
    }

    fn load_jacobian(&mut self, x: &[f64], _prev: &[f64], jac: &mut Mat<f64>) -> bool {
        self.recorder.jacobian_loads.set(self.recorder.jacobian_loads.get() + 1);
        let (_, gd) = Self::diode(x[1]);
        jac[(0, 0)] = 2e-3;
        jac[(0, 1)] = -1e-3;
        jac[(1, 0)] = -1e-3;
        jac[(1, 1)] = 1e-3 + gd;
        true
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        self.recorder.parameters.borrow_mut().push((name.to_string(), value));
        match name {
            "vsrcscale" => {
                self.source_scale = value;
                true
            }
            _ => false,
        }
    }

    fn parameter(&self, name: &str) -> Option<f64> {
        (name == "vsrcscale").then_some(1.0)
    }

    fn unknown_index(&self, name: &str) -> Option<usize> {
        match name {
            "v1" => Some(0),
            "v2" => Some(1),
            _ => None,
        }
    }

    fn point_accepted(&mut self, x: &[f64]) {
        self.recorder.accepted.borrow_mut().push(x.to_vec());
    }

    fn point_abandoned(&mut self) {
        self.recorder.abandoned.set(self.recorder.abandoned.get() + 1);
    }
}

/// Linear resistor chain `G·x = b` with a tunable conductance to ground on
/// every node; converges in one Newton step from anywhere.
pub struct Ladder {
    pub n: usize,
    pub recorder: Recorder,
}

impl Ladder {
    pub fn new(n: usize) -> (Self, Recorder) {
        init_tracing();
        let recorder = Recorder::default();
        (Self { n, recorder: recorder.clone() }, recorder)
    }

    fn conductance(&self) -> Mat<f64> {
        Mat::from_fn(self.n, self.n, |i, j| {
            if i == j {
                3.0
            } else if i.abs_diff(j) == 1 {
                -1.0
            } else {
                0.0
            }
        })
    }
}

impl LoadProvider for Ladder {
    fn num_unknowns(&self) -> usize {
        self.n
    }

    fn load_residual(&mut self, x: &[f64], _prev: &[f64], f: &mut [f64]) -> bool {
        self.recorder.residual_loads.set(self.recorder.residual_loads.get() + 1);
        let g = self.conductance();
        for i in 0..self.n {
            f[i] = (0..self.n).map(|j| g[(i, j)] * x[j]).sum::<f64>() - 1.0;
        }
        true
    }

    fn load_jacobian(&mut self, _x: &[f64], _prev: &[f64], jac: &mut Mat<f64>) -> bool {
        self.recorder.jacobian_loads.set(self.recorder.jacobian_loads.get() + 1);
        let g = self.conductance();
        for i in 0..self.n {
            for j in 0..self.n {
                jac[(i, j)] = g[(i, j)];
            }
        }
        true
    }

    fn unknown_index(&self, name: &str) -> Option<usize> {
        name.strip_prefix('n').and_then(|k| k.parse().ok()).filter(|&k| k < self.n)
    }

    fn point_accepted(&mut self, x: &[f64]) {
        self.recorder.accepted.borrow_mut().push(x.to_vec());
    }
}

/// Resistive divider at node 0 (5 mA into 1 mS ∥ 1 mS, so 2.5 V) and a
/// node 1 with no element attached: its Jacobian row is empty.
pub struct FloatingDivider;

impl LoadProvider for FloatingDivider {
    fn num_unknowns(&self) -> usize {
        2
    }

    fn load_residual(&mut self, x: &[f64], _prev: &[f64], f: &mut [f64]) -> bool {
        f[0] = 2e-3 * x[0] - 5e-3;
        f[1] = 0.0;
        true
    }

    fn load_jacobian(&mut self, _x: &[f64], _prev: &[f64], jac: &mut Mat<f64>) -> bool {
        jac[(0, 0)] = 2e-3;
        true
    }
}

/// Residual that is NaN everywhere.
pub struct Poisoned;

impl LoadProvider for Poisoned {
    fn num_unknowns(&self) -> usize {
        2
    }

    fn load_residual(&mut self, _x: &[f64], _prev: &[f64], f: &mut [f64]) -> bool {
        f.fill(f64::NAN);
        true
    }

    fn load_jacobian(&mut self, _x: &[f64], _prev: &[f64], jac: &mut Mat<f64>) -> bool {
        jac[(0, 0)] = 1.0;
        jac[(1, 1)] = 1.0;
        true
    }
}

pub fn system(loader: impl LoadProvider + 'static) -> SharedNumericSystem {
    init_tracing();
    SharedNumericSystem::new(Box::new(loader), Rc::new(UniverseComm::Serial), LinearSolverOptions::default())
}
