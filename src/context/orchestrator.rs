//! Top-level entry point of the nonlinear engine.
//!
//! `SolverOrchestrator` owns the shared numeric system, the continuation
//! state on top of it, and the Newton driver with its convergence battery.
//! One `solve()` call selects the option set of the active analysis mode,
//! rebuilds the engine if the mode changed since the previous call, picks a
//! solve type and runs the matching branch from [`strategies`].
//!
//! Session flags (first solve complete, first continuation parameter read,
//! last solve type) live for the analysis until [`reset_session`] is called.
//!
//! [`strategies`]: crate::context::strategies
//! [`reset_session`]: SolverOrchestrator::reset_session

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::augment::Partition;
use crate::config::continuation::SolveType;
use crate::config::options::{ModeOptions, SolverOptions};
use crate::context::strategies::{ContinuationContext, Driver};
use crate::core::loader::{InitialConditions, LoadProvider};
use crate::error::KError;
use crate::group::continuation::ContinuationState;
use crate::group::shared::SharedNumericSystem;
use crate::group::state::SolverState;
use crate::group::Quantity;
use crate::nonlinear::newton::{NewtonOutcome, NewtonSolver};
use crate::parallel::UniverseComm;
use crate::status::battery::ConvergenceBattery;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    #[default]
    DcOperatingPoint,
    DcSweep,
    Transient,
}

/// Per-analysis bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Session {
    mode: AnalysisMode,
    built_mode: Option<AnalysisMode>,
    continuation_params_read: bool,
    first_solve_complete: bool,
    last_solve_type: Option<SolveType>,
    rebuilds: usize,
}

impl Session {
    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    /// Mode the engine was last built for.
    pub fn built_mode(&self) -> Option<AnalysisMode> {
        self.built_mode
    }

    /// True until parameter end values have been read from the device layer.
    pub fn first_continuation_param(&self) -> bool {
        !self.continuation_params_read
    }

    /// Sticky once any solve produced a result.
    pub fn first_solve_complete(&self) -> bool {
        self.first_solve_complete
    }

    pub fn last_solve_type(&self) -> Option<SolveType> {
        self.last_solve_type
    }

    /// Number of engine rebuilds caused by mode changes.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }
}

struct Engine {
    sys: SharedNumericSystem,
    state: ContinuationState,
    newton: NewtonSolver,
}

impl Engine {
    fn build(
        loader: Box<dyn LoadProvider>,
        comm: Rc<UniverseComm>,
        options: &SolverOptions,
        mode: AnalysisMode,
        x: Option<Vec<f64>>,
    ) -> Result<Self, KError> {
        let mode_options = mode_options(options, mode);
        let mut sys = SharedNumericSystem::new(loader, Rc::clone(&comm), mode_options.linear.clone());
        let base = match x {
            Some(x) => SolverState::new(&mut sys, x)?,
            None => SolverState::zeros(&mut sys),
        };
        let battery = ConvergenceBattery::new(
            comm,
            mode_options.nonlinear.clone(),
            options.codes.clone(),
            mode == AnalysisMode::Transient,
        );
        Ok(Self { sys, state: ContinuationState::new(base), newton: NewtonSolver::new(battery) })
    }
}

fn mode_options(options: &SolverOptions, mode: AnalysisMode) -> &ModeOptions {
    match mode {
        AnalysisMode::DcOperatingPoint => &options.dc_op,
        AnalysisMode::DcSweep => &options.dc_sweep,
        AnalysisMode::Transient => &options.transient,
    }
}

pub struct SolverOrchestrator {
    options: SolverOptions,
    engine: Option<Engine>,
    session: Session,
    context: Option<ContinuationContext>,
    initial_conditions: InitialConditions,
    seed: Option<Partition>,
    last: Option<NewtonOutcome>,
    last_code: i32,
    time: f64,
    step_number: usize,
}

impl SolverOrchestrator {
    pub fn new(loader: Box<dyn LoadProvider>, comm: UniverseComm, options: SolverOptions) -> Result<Self, KError> {
        let mode = AnalysisMode::default();
        let engine = Engine::build(loader, Rc::new(comm), &options, mode, None)?;
        Ok(Self {
            options,
            engine: Some(engine),
            session: Session { built_mode: Some(mode), ..Session::default() },
            context: None,
            initial_conditions: InitialConditions::new(),
            seed: None,
            last: None,
            last_code: 0,
            time: 0.0,
            step_number: 0,
        })
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn set_mode(&mut self, mode: AnalysisMode) {
        self.session.mode = mode;
    }

    /// Clear per-phase flags. The engine and the current solution stay.
    pub fn reset_session(&mut self) {
        let mode = self.session.mode;
        let built_mode = self.session.built_mode;
        let rebuilds = self.session.rebuilds;
        self.session = Session { mode, built_mode, rebuilds, ..Session::default() };
        self.context = None;
    }

    /// `.IC`-style values, clamped by plain Newton and Gmin stepping.
    pub fn set_initial_conditions(&mut self, ics: InitialConditions) -> Result<(), KError> {
        if let (Some(ctx), Some(engine)) = (self.context.as_mut(), self.engine.as_ref()) {
            ctx.initial_conditions = if ics.is_empty() { None } else { Some(ics.resolve(engine.sys.loader())?) };
        }
        self.initial_conditions = ics;
        Ok(())
    }

    /// Partial prior solution from a restart file. The matched values are
    /// written into the solution and pinned for the first Newton step of the
    /// next plain Newton solve.
    pub fn set_operating_point_seed(&mut self, seed: &InitialConditions) -> Result<(), KError> {
        let engine = self.engine()?;
        let (partition, values) = seed.resolve(engine.sys.loader())?;
        let mut x = engine.state.x().to_vec();
        for (&i, &v) in partition.indices().iter().zip(&values) {
            x[i] = v;
        }
        engine.state.set_x(&x)?;
        self.seed = Some(partition);
        Ok(())
    }

    fn engine(&mut self) -> Result<&mut Engine, KError> {
        self.engine.as_mut().ok_or_else(|| KError::Config("engine torn down".into()))
    }

    fn ensure_built(&mut self) -> Result<(), KError> {
        let mode = self.session.mode;
        if self.session.built_mode == Some(mode) {
            return Ok(());
        }
        let Some(Engine { sys, state, .. }) = self.engine.take() else {
            return Err(KError::Config("engine torn down".into()));
        };
        let x = state.x().to_vec();
        let previous = sys.previous().to_vec();
        let (loader, comm) = sys.into_parts();
        info!(from = ?self.session.built_mode, to = ?mode, "rebuilding for new mode");
        let mut engine = Engine::build(loader, comm, &self.options, mode, Some(x))?;
        engine.sys.set_previous(&previous)?;
        self.engine = Some(engine);
        self.session.built_mode = Some(mode);
        self.session.rebuilds += 1;
        Ok(())
    }

    fn ensure_context(&mut self) -> Result<(), KError> {
        if self.context.is_some() {
            return Ok(());
        }
        let Some(engine) = self.engine.as_ref() else {
            return Err(KError::Config("engine torn down".into()));
        };
        let o = &self.options;
        let ctx = ContinuationContext::build(
            engine.sys.loader(),
            &[&o.dc_op, &o.dc_sweep, &o.transient],
            &self.initial_conditions,
        )?;
        self.context = Some(ctx);
        self.session.continuation_params_read = true;
        Ok(())
    }

    /// Solve type for the next call in the current mode.
    pub fn effective_solve_type(&self) -> SolveType {
        match self.session.mode {
            AnalysisMode::Transient => SolveType::Newton,
            AnalysisMode::DcSweep if self.session.first_solve_complete => SolveType::Newton,
            mode => mode_options(&self.options, mode).continuation.solve_type,
        }
    }

    /// Run one complete solve. Returns the signed result code; errors are
    /// consistency failures only.
    pub fn solve(&mut self) -> Result<i32, KError> {
        self.ensure_built()?;
        self.ensure_context()?;
        let solve_type = self.effective_solve_type();
        self.session.last_solve_type = Some(solve_type);

        let mode = self.session.mode;
        let options = mode_options(&self.options, mode);
        let (Some(engine), Some(ctx)) = (self.engine.as_mut(), self.context.as_ref()) else {
            return Err(KError::Config("engine torn down".into()));
        };
        let mut driver = Driver {
            sys: &mut engine.sys,
            state: &mut engine.state,
            newton: &mut engine.newton,
            options,
            ctx,
            seed: self.seed.take(),
            last: None,
        };
        let result = driver.run(solve_type);
        let last = driver.last;
        self.seed = driver.seed.take();
        self.last = last.or(self.last);
        let code = result?;

        self.session.first_solve_complete = true;
        self.last_code = code;
        info!(?mode, ?solve_type, code, "solve finished");
        Ok(code)
    }

    /// One Newton iteration on the current state; 0 while undecided.
    pub fn step(&mut self) -> Result<i32, KError> {
        self.ensure_built()?;
        let engine = self.engine()?;
        if engine.newton.status().is_decided() {
            engine.newton.reset();
        }
        let status = engine.newton.iterate(&mut engine.state, &mut engine.sys)?;
        let outcome = engine.newton.outcome();
        debug!(iteration = outcome.iterations, code = outcome.code, "step");
        self.last = Some(outcome);
        self.last_code = outcome.code;
        if status.is_decided() {
            self.session.first_solve_complete = true;
        }
        Ok(outcome.code)
    }

    pub fn last_code(&self) -> i32 {
        self.last_code
    }

    pub fn last_solve_type(&self) -> Option<SolveType> {
        self.session.last_solve_type
    }

    /// Newton iterations of the last solve (or of the last continuation point).
    pub fn iterations(&self) -> usize {
        self.last.map_or(0, |o| o.iterations)
    }

    pub fn max_residual(&self) -> f64 {
        self.last.map_or(f64::INFINITY, |o| o.max_residual)
    }

    pub fn max_residual_index(&self) -> usize {
        self.last.map_or(0, |o| o.max_index)
    }

    pub fn solution(&self) -> &[f64] {
        match &self.engine {
            Some(e) => e.state.x(),
            None => &[],
        }
    }

    pub fn set_solution(&mut self, x: &[f64]) -> Result<(), KError> {
        self.engine()?.state.set_x(x)
    }

    /// Solution of the previous time step / sweep point, passed to loads.
    pub fn set_previous_step_solution(&mut self, x: &[f64]) -> Result<(), KError> {
        let engine = self.engine()?;
        engine.sys.set_previous(x)?;
        engine.state.invalidate();
        Ok(())
    }

    pub fn set_time_point(&mut self, time: f64, step: usize) {
        self.time = time;
        self.step_number = step;
    }

    /// Whether an external logger should dump detail at the current point.
    pub fn debug_window_active(&self) -> bool {
        self.options.debug.contains(self.time, self.step_number)
    }

    fn ensure_jacobian(&mut self) -> Result<(), KError> {
        let engine = self.engine()?;
        if !engine.state.is_valid(&engine.sys, Quantity::JACOBIAN) && !engine.state.compute_jacobian(&mut engine.sys)? {
            return Err(KError::SolveError("jacobian load failed".into()));
        }
        Ok(())
    }

    /// r = J v at the current solution.
    pub fn apply_jacobian(&mut self, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.ensure_jacobian()?;
        let engine = self.engine()?;
        engine.state.apply_jacobian(&engine.sys, v, r)
    }

    /// r = Jᵀ v at the current solution.
    pub fn apply_jacobian_transpose(&mut self, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.ensure_jacobian()?;
        let engine = self.engine()?;
        engine.state.apply_jacobian_transpose(&engine.sys, v, r)
    }

    /// Tear down and hand the device layer back.
    pub fn into_loader(self) -> Option<Box<dyn LoadProvider>> {
        self.engine.map(|e| e.sys.into_parts().0)
    }
}

impl std::fmt::Debug for SolverOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverOrchestrator")
            .field("session", &self.session)
            .field("last_code", &self.last_code)
            .finish()
    }
}
