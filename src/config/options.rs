//! Solver options, as handed over by the configuration layer.
//!
//! Every record derives `Deserialize` with `#[serde(default)]`, so a netlist
//! front end (or a JSON file) only has to name the values it overrides.
//! The records are treated as immutable once a solve starts.

use serde::{Deserialize, Serialize};

use crate::config::continuation::ContinuationOptions;
use crate::context::pc_context::PC;
use crate::status::codes::ReturnCodes;

/// Options for one analysis: a set per mode plus the shared code table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// DC operating point.
    pub dc_op: ModeOptions,
    /// DC sweep points.
    pub dc_sweep: ModeOptions,
    /// Transient time points.
    pub transient: ModeOptions,
    pub codes: ReturnCodes,
    pub debug: DebugWindow,
}

impl Default for SolverOptions {
    fn default() -> Self {
        let mut transient = ModeOptions::default();
        transient.nonlinear.max_steps = 20;
        Self {
            dc_op: ModeOptions::default(),
            dc_sweep: ModeOptions::default(),
            transient,
            codes: ReturnCodes::default(),
            debug: DebugWindow::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeOptions {
    pub nonlinear: NonlinearOptions,
    pub linear: LinearSolverOptions,
    pub continuation: ContinuationOptions,
}

/// Newton variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewtonMethod {
    /// Fresh Jacobian every iteration.
    #[default]
    Full,
    /// Reuse the factored Jacobian for `refresh_every` iterations.
    Chord { refresh_every: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSearch {
    /// Always take the full step.
    #[default]
    Full,
    /// Halve the step until the residual norm decreases sufficiently.
    Backtrack,
}

/// Newton iteration budget and convergence-battery tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonlinearOptions {
    pub max_steps: usize,
    pub method: NewtonMethod,
    pub line_search: LineSearch,
    pub max_line_search_steps: usize,
    /// ε_a of the update weights.
    pub abs_tol: f64,
    /// ε_r of the update weights.
    pub rel_tol: f64,
    /// Weighted update norm below which the update is converged.
    pub delta_x_tol: f64,
    /// Max-norm residual tolerance.
    pub rhs_tol: f64,
    /// Residual below this is numerically zero.
    pub mach_prec_tol: f64,
    pub small_update_tol: f64,
    /// Largest ‖F_k‖/‖F_0‖ tolerated before declaring divergence.
    pub max_norm_f_ratio: f64,
    pub max_convergence_rate: f64,
    pub max_relative_convergence_rate: f64,
    /// |rate − 1| below this counts as a stagnant iteration.
    pub stagnation_tolerance: f64,
    pub stagnation_steps: usize,
    pub check_device_convergence: bool,
    /// Nested (2-level) solve: honor the device layer's inner failure flag.
    pub two_level: bool,
}

impl Default for NonlinearOptions {
    fn default() -> Self {
        Self {
            max_steps: 200,
            method: NewtonMethod::Full,
            line_search: LineSearch::Full,
            max_line_search_steps: 9,
            abs_tol: 1e-12,
            rel_tol: 1e-3,
            delta_x_tol: 1.0,
            rhs_tol: 1e-6,
            mach_prec_tol: 1e-20,
            small_update_tol: 1e-6,
            max_norm_f_ratio: 1e10,
            max_convergence_rate: 1.0,
            max_relative_convergence_rate: 1e-2,
            stagnation_tolerance: 0.05,
            stagnation_steps: 3,
            check_device_convergence: false,
            two_level: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolverKind {
    #[default]
    DirectLu,
    Gmres { restart: usize, tol: f64, max_iters: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverOptions {
    pub kind: LinearSolverKind,
    /// Only used by iterative kinds.
    pub preconditioner: PC,
}

/// Time/step window in which an external logger should dump solver detail.
///
/// Inactive unless at least one range is set; every range that is set must
/// contain the current point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugWindow {
    pub time_range: Option<(f64, f64)>,
    pub step_range: Option<(usize, usize)>,
}

impl DebugWindow {
    pub fn contains(&self, time: f64, step: usize) -> bool {
        if self.time_range.is_none() && self.step_range.is_none() {
            return false;
        }
        let in_time = self.time_range.is_none_or(|(lo, hi)| lo <= time && time <= hi);
        let in_step = self.step_range.is_none_or(|(lo, hi)| lo <= step && step <= hi);
        in_time && in_step
    }
}
