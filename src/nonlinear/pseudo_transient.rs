//! Pseudo-transient continuation driver.
//!
//! Marches `(J + S/Δτ)·Δx = −F` with linearly implicit Euler steps in pseudo
//! time. The `S/Δτ` term comes from the [`PseudoTransient`] augmentation that
//! must already be attached to the state; this driver only controls Δτ and
//! decides when the march is close enough to hand over to Newton.
//!
//! [`PseudoTransient`]: crate::augment::PseudoTransient

use tracing::{debug, info, warn};

use crate::config::continuation::PseudoTransientOptions;
use crate::error::KError;
use crate::group::continuation::ContinuationState;
use crate::group::shared::SharedNumericSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoTransientStatus {
    /// Residual fell below the switch tolerance.
    Switched,
    /// Δτ grew to its maximum; the march is effectively Newton already.
    MaxPseudoStep,
    /// Step budget exhausted.
    MaxSteps,
    /// Δτ was cut to its minimum without a usable step.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudoTransientReport {
    pub status: PseudoTransientStatus,
    pub steps: usize,
    pub final_step: f64,
    pub max_residual: f64,
}

pub struct PseudoTransientDriver<'a> {
    options: &'a PseudoTransientOptions,
}

impl<'a> PseudoTransientDriver<'a> {
    pub fn new(options: &'a PseudoTransientOptions) -> Self {
        Self { options }
    }

    pub fn run(&self, state: &mut ContinuationState, sys: &mut SharedNumericSystem) -> Result<PseudoTransientReport, KError> {
        let mut steps = 0;
        let mut max_residual = f64::INFINITY;
        let dt = |state: &ContinuationState| state.strategy().and_then(|s| s.progress()).unwrap_or(f64::NAN);
        info!(dt = dt(state), "pseudo-transient start");

        while steps < self.options.max_steps {
            if !state.compute_residual(sys)? || !state.residual_norms().is_some_and(|n| n.finite) {
                // Nothing accepted yet at this x: the starting point itself is bad.
                return Ok(self.report(PseudoTransientStatus::Failed, steps, dt(state), f64::NAN));
            }
            let norms = state.residual_norms().map_or((f64::NAN, f64::NAN), |n| (n.two, n.max));
            max_residual = norms.1;
            if steps == 0 {
                state.update_pseudo_step(norms.0)?;
            }
            if max_residual < self.options.switch_tol {
                return Ok(self.report(PseudoTransientStatus::Switched, steps, dt(state), max_residual));
            }
            if state.strategy().is_some_and(|s| s.progress().is_some_and(|d| d >= self.options.max_step)) {
                return Ok(self.report(PseudoTransientStatus::MaxPseudoStep, steps, dt(state), max_residual));
            }

            let direction = if state.compute_jacobian(sys)? && state.compute_newton(sys, false)? {
                Some(state.newton(sys)?.to_vec())
            } else {
                None
            };
            let x_old = state.x().to_vec();
            let accepted = match direction {
                Some(dir) => {
                    state.compute_x(&x_old, &dir, 1.0)?;
                    state.compute_residual(sys)? && state.residual_norms().is_some_and(|n| n.finite)
                }
                None => false,
            };
            if !accepted {
                state.set_x(&x_old)?;
                if !state.halve_pseudo_step()? {
                    warn!(steps, "pseudo-transient step at minimum");
                    return Ok(self.report(PseudoTransientStatus::Failed, steps, dt(state), max_residual));
                }
                warn!(steps, dt = dt(state), "pseudo-transient step cut");
                continue;
            }
            steps += 1;
            let two = state.residual_norms().map_or(f64::NAN, |n| n.two);
            let next = state.update_pseudo_step(two)?;
            debug!(steps, residual = two, dt = next, "pseudo-transient step");
        }
        Ok(self.report(PseudoTransientStatus::MaxSteps, steps, dt(state), max_residual))
    }

    fn report(&self, status: PseudoTransientStatus, steps: usize, final_step: f64, max_residual: f64) -> PseudoTransientReport {
        info!(?status, steps, final_step, max_residual, "pseudo-transient end");
        PseudoTransientReport { status, steps, final_step, max_residual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::{Augmentation, Partition, PseudoTransient};
    use crate::config::options::LinearSolverOptions;
    use crate::core::loader::LoadProvider;
    use crate::group::state::SolverState;
    use crate::parallel::UniverseComm;
    use faer::Mat;
    use std::rc::Rc;

    // f = atan(x - 1): Newton diverges from |x - 1| > 1.39
    struct Arctan;

    impl LoadProvider for Arctan {
        fn num_unknowns(&self) -> usize { 1 }
        fn load_residual(&mut self, x: &[f64], _p: &[f64], f: &mut [f64]) -> bool {
            f[0] = (x[0] - 1.0).atan();
            true
        }
        fn load_jacobian(&mut self, x: &[f64], _p: &[f64], j: &mut Mat<f64>) -> bool {
            let d = x[0] - 1.0;
            j[(0, 0)] = 1.0 / (1.0 + d * d);
            true
        }
    }

    #[test]
    fn marches_to_the_root_of_arctan() {
        let opts = PseudoTransientOptions { initial_step: 0.5, max_steps: 500, ..PseudoTransientOptions::default() };
        let mut sys = SharedNumericSystem::new(Box::new(Arctan), Rc::new(UniverseComm::Serial), LinearSolverOptions::default());
        let base = SolverState::new(&mut sys, vec![11.0]).unwrap();
        let mut state = ContinuationState::new(base);
        let ptc = PseudoTransient::new(Partition::full(1), 1, opts.initial_step, opts.min_step, opts.max_step, 1.0, 1.0);
        state.attach_strategy(&sys, Augmentation::PseudoTransient(ptc)).unwrap();

        let report = PseudoTransientDriver::new(&opts).run(&mut state, &mut sys).unwrap();
        assert!(matches!(report.status, PseudoTransientStatus::Switched | PseudoTransientStatus::MaxPseudoStep));
        assert!((state.x()[0] - 1.0).abs() < 1e-3);
    }
}
