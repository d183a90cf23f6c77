//! Natural-parameter continuation: step a parameter from its start to its
//! end, solving with Newton at every point and using the last accepted
//! solution as the next initial guess.

use tracing::{debug, info, warn};

use crate::config::continuation::ParameterSpec;
use crate::error::KError;
use crate::group::continuation::ContinuationState;
use crate::group::shared::SharedNumericSystem;
use crate::nonlinear::newton::{NewtonOutcome, NewtonSolver};

/// Straight-line path of a parameter that follows the lead parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterPath {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

impl ParameterPath {
    pub fn at(&self, fraction: f64) -> f64 {
        self.start + fraction * (self.end - self.start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationStatus {
    /// Converged at the end value.
    Finished,
    /// Step cut below the minimum, or the start point did not converge.
    Failed,
    /// Step budget exhausted before the end value.
    MaxSteps,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationReport {
    pub status: ContinuationStatus,
    /// Accepted points, the start point included.
    pub accepted: usize,
    pub rejected: usize,
    /// Last accepted lead parameter value.
    pub value: f64,
    /// Newton outcome of the last attempted point.
    pub last: Option<NewtonOutcome>,
}

impl ContinuationReport {
    pub fn finished(&self) -> bool {
        self.status == ContinuationStatus::Finished
    }
}

/// Steps one lead parameter; coupled parameters move by the same fraction of
/// their own range.
pub struct NaturalStepper<'a> {
    lead: &'a ParameterSpec,
    end: f64,
    coupled: Vec<ParameterPath>,
}

impl<'a> NaturalStepper<'a> {
    /// `end` is the resolved end value of `lead`.
    pub fn new(lead: &'a ParameterSpec, end: f64) -> Self {
        Self { lead, end, coupled: Vec::new() }
    }

    pub fn with_coupled(mut self, coupled: Vec<ParameterPath>) -> Self {
        self.coupled = coupled;
        self
    }

    fn fraction(&self, value: f64) -> f64 {
        let span = self.end - self.lead.start;
        if span == 0.0 { 1.0 } else { (value - self.lead.start) / span }
    }

    fn apply(&self, state: &mut ContinuationState, value: f64) {
        state.set_parameter(&self.lead.name, value);
        let fraction = self.fraction(value);
        for p in &self.coupled {
            state.set_parameter(&p.name, p.at(fraction));
        }
    }

    /// Run the continuation. Parameter forwarding is switched on and left on;
    /// the caller decides when the phase is over.
    pub fn run(
        &self,
        state: &mut ContinuationState,
        sys: &mut SharedNumericSystem,
        newton: &mut NewtonSolver,
    ) -> Result<ContinuationReport, KError> {
        let spec = self.lead;
        let start = spec.start;
        let direction = if self.end >= start { 1.0 } else { -1.0 };
        info!(parameter = %spec.name, start, end = self.end, "continuation start");

        state.set_active(true);
        self.apply(state, start);
        let mut report = ContinuationReport {
            status: ContinuationStatus::Failed,
            accepted: 0,
            rejected: 0,
            value: start,
            last: None,
        };

        let outcome = newton.solve(state, sys)?;
        report.last = Some(outcome);
        if !outcome.converged() {
            state.step_failed(sys);
            warn!(parameter = %spec.name, value = start, code = outcome.code, "start point did not converge");
            return Ok(report);
        }
        state.step_succeeded(sys);
        report.accepted = 1;
        let mut accepted_x = state.x().to_vec();
        let mut value = start;
        let mut step = spec.initial_step.abs().min(spec.max_step);

        if value == self.end {
            report.status = ContinuationStatus::Finished;
            return Ok(report);
        }

        for attempt in 0..spec.max_steps {
            let mut next = value + direction * step;
            if direction * (next - self.end) >= 0.0 {
                next = self.end;
            }
            self.apply(state, next);
            let outcome = newton.solve(state, sys)?;
            report.last = Some(outcome);

            if outcome.converged() {
                state.step_succeeded(sys);
                report.accepted += 1;
                value = next;
                report.value = value;
                accepted_x.copy_from_slice(state.x());
                debug!(parameter = %spec.name, attempt, value, step, iterations = outcome.iterations, "continuation step");
                if value == self.end {
                    report.status = ContinuationStatus::Finished;
                    info!(parameter = %spec.name, accepted = report.accepted, rejected = report.rejected, "continuation finished");
                    return Ok(report);
                }
                step = (step * spec.growth_factor).min(spec.max_step);
            } else {
                state.step_failed(sys);
                report.rejected += 1;
                state.set_x(&accepted_x)?;
                self.apply(state, value);
                step *= 0.5;
                warn!(parameter = %spec.name, attempt, value = next, code = outcome.code, step, "continuation step cut");
                if step < spec.min_step {
                    report.status = ContinuationStatus::Failed;
                    return Ok(report);
                }
            }
        }
        report.status = ContinuationStatus::MaxSteps;
        warn!(parameter = %spec.name, value, "continuation step budget exhausted");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::options::{LinearSolverOptions, NonlinearOptions};
    use crate::core::loader::LoadProvider;
    use crate::group::state::SolverState;
    use crate::parallel::UniverseComm;
    use crate::status::battery::ConvergenceBattery;
    use crate::status::codes::ReturnCodes;
    use faer::Mat;
    use std::cell::Cell;
    use std::rc::Rc;

    // f = x^3 + x - p
    struct Cubic {
        p: f64,
        accepted: Rc<Cell<usize>>,
    }

    impl LoadProvider for Cubic {
        fn num_unknowns(&self) -> usize { 1 }
        fn load_residual(&mut self, x: &[f64], _prev: &[f64], f: &mut [f64]) -> bool {
            f[0] = x[0].powi(3) + x[0] - self.p;
            true
        }
        fn load_jacobian(&mut self, x: &[f64], _prev: &[f64], j: &mut Mat<f64>) -> bool {
            j[(0, 0)] = 3.0 * x[0] * x[0] + 1.0;
            true
        }
        fn set_parameter(&mut self, name: &str, value: f64) -> bool {
            if name == "p" {
                self.p = value;
            }
            name == "p" || name == "q"
        }
        fn point_accepted(&mut self, _x: &[f64]) {
            self.accepted.set(self.accepted.get() + 1);
        }
    }

    fn setup(max_steps: usize) -> (SharedNumericSystem, ContinuationState, NewtonSolver, Rc<Cell<usize>>) {
        let accepted = Rc::new(Cell::new(0));
        let comm = Rc::new(UniverseComm::Serial);
        let mut sys = SharedNumericSystem::new(
            Box::new(Cubic { p: 0.0, accepted: accepted.clone() }),
            comm.clone(),
            LinearSolverOptions::default(),
        );
        let state = ContinuationState::new(SolverState::zeros(&mut sys));
        let options = NonlinearOptions { max_steps, ..NonlinearOptions::default() };
        let newton = NewtonSolver::new(ConvergenceBattery::new(comm, options, ReturnCodes::default(), false));
        (sys, state, newton, accepted)
    }

    #[test]
    fn reaches_the_end_and_captures_each_point_once() {
        let (mut sys, mut state, mut newton, accepted) = setup(50);
        let spec = ParameterSpec { name: "p".into(), initial_step: 1.0, max_step: 4.0, ..ParameterSpec::default() };
        let report = NaturalStepper::new(&spec, 10.0).run(&mut state, &mut sys, &mut newton).unwrap();
        assert!(report.finished());
        assert_eq!(report.value, 10.0);
        // 0, 1, 3, 7, 10
        assert_eq!(report.accepted, 5);
        assert_eq!(accepted.get(), 5);
        assert!((state.x()[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn tight_newton_budget_cuts_steps_until_failure() {
        let (mut sys, mut state, mut newton, _) = setup(2);
        let spec = ParameterSpec { name: "p".into(), initial_step: 5.0, min_step: 0.5, max_step: 5.0, ..ParameterSpec::default() };
        let report = NaturalStepper::new(&spec, 1000.0).run(&mut state, &mut sys, &mut newton).unwrap();
        assert_ne!(report.status, ContinuationStatus::Finished);
        assert!(report.rejected > 0);
    }

    #[test]
    fn coupled_parameters_follow_the_fraction() {
        let path = ParameterPath { name: "q".into(), start: 10.0, end: 20.0 };
        assert_eq!(path.at(0.25), 12.5);
        let (mut sys, mut state, mut newton, _) = setup(50);
        let spec = ParameterSpec { name: "p".into(), end: Some(2.0), ..ParameterSpec::default() };
        let report = NaturalStepper::new(&spec, 2.0)
            .with_coupled(vec![path])
            .run(&mut state, &mut sys, &mut newton)
            .unwrap();
        assert!(report.finished());
        assert_eq!(state.parameters().get("q"), Some(20.0));
    }
}
