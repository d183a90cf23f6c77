//! Damped Newton over a [`ContinuationState`].
//!
//! One iteration: Jacobian (or reused factors for chord Newton), Newton
//! direction, optional backtracking line search on ‖F‖₂, then a battery check.
//! The driver never retries on failure; the code goes back to the caller.

use tracing::{debug, warn};

use crate::config::options::{LineSearch, NewtonMethod, NonlinearOptions};
use crate::error::KError;
use crate::group::continuation::ContinuationState;
use crate::group::shared::SharedNumericSystem;
use crate::status::battery::{ConvergenceBattery, IterationSnapshot};
use crate::status::codes::{CheckStatus, Verdict};

// Armijo constant of the backtracking line search.
const SUFFICIENT_DECREASE: f64 = 1e-4;

/// Result of a complete Newton solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonOutcome {
    pub status: CheckStatus,
    pub code: i32,
    pub iterations: usize,
    pub max_residual: f64,
    pub max_index: usize,
}

impl NewtonOutcome {
    pub fn converged(&self) -> bool {
        self.code > 0
    }
}

#[derive(Debug, Clone)]
pub struct NewtonSolver {
    options: NonlinearOptions,
    battery: ConvergenceBattery,
    iteration: usize,
    status: CheckStatus,
    started: bool,
}

impl NewtonSolver {
    pub fn new(battery: ConvergenceBattery) -> Self {
        Self {
            options: battery.options().clone(),
            battery,
            iteration: 0,
            status: CheckStatus::Unconverged,
            started: false,
        }
    }

    pub fn battery(&self) -> &ConvergenceBattery {
        &self.battery
    }

    pub fn iterations(&self) -> usize {
        self.iteration
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn reset(&mut self) {
        self.battery.reset();
        self.iteration = 0;
        self.status = CheckStatus::Unconverged;
        self.started = false;
    }

    /// Evaluate the initial guess (iteration 0).
    pub fn begin(&mut self, state: &mut ContinuationState, sys: &mut SharedNumericSystem) -> Result<CheckStatus, KError> {
        self.reset();
        self.started = true;
        if !state.compute_residual(sys)? {
            return Ok(self.finish(CheckStatus::Failed(Verdict::NanFail)));
        }
        let x = state.x().to_vec();
        let status = self.classify(state, sys, &x)?;
        Ok(self.finish(status))
    }

    /// One Newton iteration.
    pub fn iterate(&mut self, state: &mut ContinuationState, sys: &mut SharedNumericSystem) -> Result<CheckStatus, KError> {
        if !self.started {
            let status = self.begin(state, sys)?;
            if status.is_decided() {
                return Ok(status);
            }
        }
        if self.status.is_decided() {
            return Ok(self.status);
        }

        let reuse = match self.options.method {
            NewtonMethod::Full => false,
            NewtonMethod::Chord { refresh_every } => {
                refresh_every > 1 && self.iteration % refresh_every != 0 && sys.factors_current_for(state.id())
            }
        };
        if !reuse && !state.compute_jacobian(sys)? {
            return Ok(self.finish(CheckStatus::Failed(Verdict::NanFail)));
        }
        if !state.compute_residual(sys)? {
            return Ok(self.finish(CheckStatus::Failed(Verdict::NanFail)));
        }
        let direction = if state.compute_newton(sys, reuse)? {
            state.newton(sys)?.to_vec()
        } else {
            let partial = sys.newton().to_vec();
            if !sys.norms().all_finite(&partial) || sys.norms().norm_inf(&partial) == 0.0 {
                // A non-finite residual or iterate is still a NaN failure;
                // with finite data the Jacobian itself gave no bounded update.
                let finite = state.residual_norms().is_some_and(|n| n.finite) && sys.norms().all_finite(state.x());
                let verdict = if finite { Verdict::UpdateTooBig } else { Verdict::NanFail };
                warn!(iteration = self.iteration, ?verdict, "no usable newton direction");
                return Ok(self.finish(CheckStatus::Failed(verdict)));
            }
            warn!(iteration = self.iteration, "linear solve did not converge, using partial direction");
            partial
        };

        let x_old = state.x().to_vec();
        let f_old = state.residual_norms().map_or(f64::INFINITY, |n| n.two);
        let step = self.line_search(state, sys, &x_old, &direction, f_old)?;
        self.iteration += 1;

        let f_new = state.residual_norms().map_or(f64::NAN, |n| n.two);
        debug!(iteration = self.iteration, step, residual = f_new, "newton");

        let status = if state.residual_norms().is_some_and(|n| !n.two.is_nan()) {
            self.classify(state, sys, &x_old)?
        } else {
            CheckStatus::Failed(Verdict::NanFail)
        };
        Ok(self.finish(status))
    }

    /// Iterate until the battery decides.
    pub fn solve(&mut self, state: &mut ContinuationState, sys: &mut SharedNumericSystem) -> Result<NewtonOutcome, KError> {
        let mut status = self.begin(state, sys)?;
        while !status.is_decided() {
            status = self.iterate(state, sys)?;
        }
        Ok(self.outcome())
    }

    pub fn outcome(&self) -> NewtonOutcome {
        NewtonOutcome {
            status: self.status,
            code: self.battery.code(self.status),
            iterations: self.iteration,
            max_residual: self.battery.max_residual(),
            max_index: self.battery.max_residual_index(),
        }
    }

    fn finish(&mut self, status: CheckStatus) -> CheckStatus {
        self.status = status;
        status
    }

    // Returns the accepted step length.
    fn line_search(
        &mut self,
        state: &mut ContinuationState,
        sys: &mut SharedNumericSystem,
        x_old: &[f64],
        dir: &[f64],
        f_old: f64,
    ) -> Result<f64, KError> {
        let mut lambda = 1.0;
        state.compute_x(x_old, dir, lambda)?;
        let mut ok = state.compute_residual(sys)?;
        if self.options.line_search == LineSearch::Full {
            return Ok(lambda);
        }
        for _ in 0..self.options.max_line_search_steps {
            let f_new = state.residual_norms().map_or(f64::INFINITY, |n| n.two);
            if ok && f_new.is_finite() && f_new <= (1.0 - SUFFICIENT_DECREASE * lambda) * f_old {
                break;
            }
            lambda *= 0.5;
            state.compute_x(x_old, dir, lambda)?;
            ok = state.compute_residual(sys)?;
        }
        Ok(lambda)
    }

    fn classify(
        &mut self,
        state: &mut ContinuationState,
        sys: &mut SharedNumericSystem,
        x_prev_iter: &[f64],
    ) -> Result<CheckStatus, KError> {
        let x = state.x().to_vec();
        let residual = state.residual(sys)?.to_vec();
        let previous = sys.previous().to_vec();
        let snap = IterationSnapshot {
            iteration: self.iteration,
            x: &x,
            x_prev_iter,
            x_prev_step: &previous,
            residual: &residual,
            devices_converged: sys.loader().devices_converged(),
            inner_solve_failed: sys.loader().inner_solve_failed(),
        };
        let mut redirect = || -> Result<Option<Vec<f64>>, KError> {
            if !state.compute_jacobian(sys)? || !state.compute_residual(sys)? || !state.compute_newton(sys, false)? {
                return Ok(None);
            }
            Ok(Some(state.newton(sys)?.to_vec()))
        };
        self.battery.check(&snap, &mut redirect)
    }
}
