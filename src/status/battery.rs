//! Layered convergence tests for one nonlinear iteration.
//!
//! The battery runs a fixed sequence of checks against the current iterate
//! and stops at the first one that decides. Numbers in the comments of
//! [`ConvergenceBattery::check`] follow that sequence:
//!
//! 0. non-finite residual or solution
//! 1. residual below both tolerance and machine precision
//! 2. weighted update norm and residual both below tolerance
//! 3. transient budget exhausted with acceptable rates
//! 4. small update before the budget is exhausted
//! 5. steady-state budget exhausted
//! 6. residual growth relative to the first iterate
//! 7. transient stagnation of the convergence rate
//!
//! The 2-level inner-failure check and the optional device predicate run
//! between 0 and 1.

use std::rc::Rc;

use tracing::trace;

use crate::config::options::NonlinearOptions;
use crate::core::wrappers::DistributedNorms;
use crate::error::KError;
use crate::parallel::UniverseComm;
use crate::status::codes::{CheckStatus, ReturnCodes, Verdict};

/// What the battery sees of one iteration.
#[derive(Debug, Clone, Copy)]
pub struct IterationSnapshot<'a> {
    /// 0 for the initial guess.
    pub iteration: usize,
    pub x: &'a [f64],
    /// Iterate before the last update.
    pub x_prev_iter: &'a [f64],
    /// Accepted solution of the previous time step / operating point.
    pub x_prev_step: &'a [f64],
    pub residual: &'a [f64],
    pub devices_converged: bool,
    pub inner_solve_failed: bool,
}

/// Callback that recomputes the Newton direction at the current iterate.
/// `Ok(None)` means no direction could be formed.
pub type Redirection<'a> = dyn FnMut() -> Result<Option<Vec<f64>>, KError> + 'a;

/// Per-iteration classifier with its own running history.
#[derive(Debug, Clone)]
pub struct ConvergenceBattery {
    comm: Rc<UniverseComm>,
    options: NonlinearOptions,
    codes: ReturnCodes,
    transient: bool,
    first_norm: Option<f64>,
    prev_norm: Option<f64>,
    max_residual: f64,
    max_index: usize,
    wrms: f64,
    rate: f64,
    relative_rate: f64,
    stagnant: usize,
}

impl ConvergenceBattery {
    pub fn new(comm: Rc<UniverseComm>, options: NonlinearOptions, codes: ReturnCodes, transient: bool) -> Self {
        Self {
            comm,
            options,
            codes,
            transient,
            first_norm: None,
            prev_norm: None,
            max_residual: f64::INFINITY,
            max_index: 0,
            wrms: f64::INFINITY,
            rate: 1.0,
            relative_rate: 1.0,
            stagnant: 0,
        }
    }

    /// Forget the history of the previous solve.
    pub fn reset(&mut self) {
        self.first_norm = None;
        self.prev_norm = None;
        self.max_residual = f64::INFINITY;
        self.max_index = 0;
        self.wrms = f64::INFINITY;
        self.rate = 1.0;
        self.relative_rate = 1.0;
        self.stagnant = 0;
    }

    pub fn options(&self) -> &NonlinearOptions {
        &self.options
    }

    pub fn codes(&self) -> &ReturnCodes {
        &self.codes
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn max_residual(&self) -> f64 {
        self.max_residual
    }

    /// Global index of the max-norm residual entry.
    pub fn max_residual_index(&self) -> usize {
        self.max_index
    }

    pub fn wrms(&self) -> f64 {
        self.wrms
    }

    /// ‖F_k‖₂ / ‖F_{k−1}‖₂.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// ‖F_k‖₂ / ‖F_0‖₂.
    pub fn relative_rate(&self) -> f64 {
        self.relative_rate
    }

    pub fn code(&self, status: CheckStatus) -> i32 {
        self.codes.status_code(status)
    }

    /// Classify one iteration.
    pub fn check(&mut self, snap: &IterationSnapshot<'_>, redirect: &mut Redirection<'_>) -> Result<CheckStatus, KError> {
        let status = self.run(snap, redirect)?;
        trace!(
            iteration = snap.iteration,
            max = self.max_residual,
            wrms = self.wrms,
            rate = self.rate,
            ?status,
            "battery"
        );
        Ok(status)
    }

    fn run(&mut self, snap: &IterationSnapshot<'_>, redirect: &mut Redirection<'_>) -> Result<CheckStatus, KError> {
        let comm = Rc::clone(&self.comm);
        let norms = DistributedNorms::new(&*comm);
        let o = &self.options;
        let it = snap.iteration;

        // (0)
        if !norms.all_finite(snap.residual) || !norms.all_finite(snap.x) {
            self.max_residual = f64::NAN;
            return Ok(CheckStatus::Failed(Verdict::NanFail));
        }

        if o.two_level && snap.inner_solve_failed {
            return Ok(CheckStatus::Failed(Verdict::InnerSolveFailed));
        }

        let (max, max_index) = norms.max_abs(snap.residual);
        let two = norms.norm_2(snap.residual);
        self.max_residual = max;
        self.max_index = max_index;
        let first = *self.first_norm.get_or_insert(two);
        self.rate = match self.prev_norm {
            Some(prev) if prev > 0.0 => two / prev,
            _ => 1.0,
        };
        self.relative_rate = if first > 0.0 { two / first } else { 0.0 };
        self.prev_norm = Some(two);

        if o.check_device_convergence && !snap.devices_converged && it < o.max_steps {
            return Ok(CheckStatus::Unconverged);
        }

        // (1)
        if max < o.rhs_tol && max < o.mach_prec_tol {
            return Ok(CheckStatus::Converged(Verdict::NormTooSmall));
        }

        // (2)
        if it > 0 {
            let dx: Vec<f64> = snap.x.iter().zip(snap.x_prev_iter).map(|(a, b)| a - b).collect();
            let mut wrms = norms.wrms(&dx, snap.x, snap.x_prev_step, o.abs_tol, o.rel_tol);
            if wrms == 0.0 {
                match redirect()? {
                    Some(dir) if norms.norm_inf(&dir) > 0.0 => {
                        wrms = norms.wrms(&dir, snap.x, snap.x_prev_step, o.abs_tol, o.rel_tol);
                    }
                    _ => {
                        self.wrms = 0.0;
                        return Ok(CheckStatus::Failed(Verdict::WrmsExactZero));
                    }
                }
            }
            self.wrms = wrms;
            if wrms < o.delta_x_tol && max < o.rhs_tol {
                return Ok(CheckStatus::Converged(Verdict::NormalConvergence));
            }
        }

        // (3)
        if self.transient && it >= o.max_steps {
            if self.rate <= o.max_convergence_rate && self.relative_rate <= o.max_relative_convergence_rate {
                return Ok(CheckStatus::Converged(Verdict::NearConvergence));
            }
            return Ok(CheckStatus::Failed(Verdict::TooManySteps));
        }

        // (4)
        if it > 0 && it < o.max_steps && self.wrms < o.small_update_tol {
            if self.transient {
                return Ok(CheckStatus::Converged(Verdict::SmallUpdate));
            }
            return Ok(CheckStatus::Unconverged);
        }

        // (5)
        if !self.transient && it >= o.max_steps {
            return Ok(CheckStatus::Failed(Verdict::TooManySteps));
        }

        // (6)
        if self.relative_rate > o.max_norm_f_ratio {
            return Ok(CheckStatus::Failed(Verdict::UpdateTooBig));
        }

        // (7)
        if self.transient && it > 0 {
            if (self.rate - 1.0).abs() < o.stagnation_tolerance {
                self.stagnant += 1;
            } else {
                self.stagnant = 0;
            }
            if self.stagnant >= o.stagnation_steps {
                if self.relative_rate <= o.max_relative_convergence_rate {
                    return Ok(CheckStatus::Converged(Verdict::NearConvergence));
                }
                return Ok(CheckStatus::Failed(Verdict::Stalled));
            }
        }

        Ok(CheckStatus::Unconverged)
    }
}
