//! Solve-type branches of the orchestrator.
//!
//! Each branch attaches what it needs to the continuation state, drives the
//! solve, detaches again and returns one signed code. Continuations that do
//! not finish map to [`CONTINUATION_FAILED`] whatever the phase.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::augment::{
    Augmentation, ClampWithGmin, GminStepping, InitialConditionClamp, OperatingPointSeed, Partition, PseudoTransient,
};
use crate::config::continuation::{ParameterSpec, SolveType};
use crate::config::options::ModeOptions;
use crate::continuation::homotopy::HomotopyBlend;
use crate::continuation::natural::{ContinuationReport, NaturalStepper, ParameterPath};
use crate::core::loader::{InitialConditions, LoadProvider};
use crate::error::KError;
use crate::group::continuation::{ContinuationState, HOMOTOPY_PARAMETER, PROGRESS_PARAMETER};
use crate::group::shared::SharedNumericSystem;
use crate::nonlinear::newton::{NewtonOutcome, NewtonSolver};
use crate::nonlinear::pseudo_transient::{PseudoTransientDriver, PseudoTransientStatus};
use crate::status::codes::CONTINUATION_FAILED;

/// Data shared by every continuation of a session: the voltage partition,
/// resolved initial conditions and parameter end values read from the
/// device layer.
#[derive(Debug, Clone)]
pub struct ContinuationContext {
    pub voltage: Partition,
    pub initial_conditions: Option<(Partition, Vec<f64>)>,
    end_values: HashMap<String, f64>,
}

impl ContinuationContext {
    /// Resolve everything once. `modes` are the option sets whose parameters
    /// may leave their end value to the device layer.
    pub fn build(
        loader: &dyn LoadProvider,
        modes: &[&ModeOptions],
        ics: &InitialConditions,
    ) -> Result<Self, KError> {
        let n = loader.num_unknowns();
        let voltage = Partition::new(loader.voltage_unknowns(), n)?;
        let initial_conditions = if ics.is_empty() { None } else { Some(ics.resolve(loader)?) };
        let mut end_values = HashMap::new();
        for mode in modes {
            let c = &mode.continuation;
            let specs = c
                .parameters
                .iter()
                .chain([&c.device.gain, &c.device.nonlinear, &c.device.size, &c.source, &c.homotopy]);
            for spec in specs.filter(|s| s.end.is_none()) {
                if let Some(v) = loader.parameter(&spec.name) {
                    end_values.insert(spec.name.clone(), v);
                }
            }
        }
        Ok(Self { voltage, initial_conditions, end_values })
    }

    /// End value of a parameter: configured, or read from the device layer.
    pub fn end_of(&self, spec: &ParameterSpec) -> Result<f64, KError> {
        match spec.end {
            Some(v) => Ok(v),
            None => self
                .end_values
                .get(&spec.name)
                .copied()
                .ok_or_else(|| KError::Config(format!("no end value for parameter {}", spec.name))),
        }
    }

    fn path(&self, spec: &ParameterSpec) -> Result<ParameterPath, KError> {
        Ok(ParameterPath { name: spec.name.clone(), start: spec.start, end: self.end_of(spec)? })
    }
}

/// One solve on a built engine.
pub(crate) struct Driver<'a> {
    pub sys: &'a mut SharedNumericSystem,
    pub state: &'a mut ContinuationState,
    pub newton: &'a mut NewtonSolver,
    pub options: &'a ModeOptions,
    pub ctx: &'a ContinuationContext,
    /// Restart seed for the first plain Newton solve.
    pub seed: Option<Partition>,
    pub last: Option<NewtonOutcome>,
}

impl<'a> Driver<'a> {
    pub fn run(&mut self, solve_type: SolveType) -> Result<i32, KError> {
        info!(?solve_type, "solve");
        let options: &'a ModeOptions = self.options;
        let c = &options.continuation;
        let dev = &c.device;
        match solve_type {
            SolveType::Newton => self.newton(),
            SolveType::NaturalParameter => {
                let first = c
                    .parameters
                    .first()
                    .ok_or_else(|| KError::Config("natural continuation with no parameters".into()))?;
                self.phases(&[vec![first]])
            }
            SolveType::MultiParameter => {
                if c.parameters.is_empty() {
                    return Err(KError::Config("multi-parameter continuation with no parameters".into()));
                }
                let phases: Vec<Vec<&ParameterSpec>> = c.parameters.iter().map(|p| vec![p]).collect();
                self.phases(&phases)
            }
            SolveType::VectorParameter => {
                if c.parameters.is_empty() {
                    return Err(KError::Config("vector continuation with no parameters".into()));
                }
                self.phases(&[c.parameters.iter().collect()])
            }
            SolveType::DeviceGainThenNonlinear => self.phases(&[vec![&dev.gain], vec![&dev.nonlinear]]),
            SolveType::DeviceNonlinearThenGain => self.phases(&[vec![&dev.nonlinear], vec![&dev.gain]]),
            SolveType::DeviceSizeGainNonlinear => {
                self.phases(&[vec![&dev.size], vec![&dev.gain], vec![&dev.nonlinear]])
            }
            SolveType::DeviceSimultaneous => self.phases(&[vec![&dev.gain, &dev.nonlinear]]),
            SolveType::BlockGainscale => {
                if dev.block_gain_names.is_empty() {
                    return Err(KError::Config("block gain stepping with no block parameters".into()));
                }
                let blocks: Vec<ParameterSpec> = dev
                    .block_gain_names
                    .iter()
                    .map(|name| ParameterSpec { name: name.clone(), ..dev.gain.clone() })
                    .collect();
                let mut phases: Vec<Vec<&ParameterSpec>> = blocks.iter().map(|b| vec![b]).collect();
                phases.push(vec![&dev.nonlinear]);
                self.phases(&phases)
            }
            SolveType::SourceStepping => self.phases(&[vec![&c.source]]),
            SolveType::GminStepping => self.gmin(),
            SolveType::PseudoTransient => self.pseudo_transient(),
            SolveType::ArtificialHomotopy => self.homotopy(),
        }
    }

    fn clamp(&self) -> Result<Option<InitialConditionClamp>, KError> {
        match &self.ctx.initial_conditions {
            Some((partition, values)) if self.options.continuation.use_initial_conditions => {
                Ok(Some(InitialConditionClamp::new(partition.clone(), values.clone())?))
            }
            _ => Ok(None),
        }
    }

    fn impose(&mut self, clamp: &InitialConditionClamp) -> Result<(), KError> {
        let mut x = self.state.x().to_vec();
        clamp.impose(&mut x);
        self.state.set_x(&x)
    }

    fn solve_newton(&mut self) -> Result<i32, KError> {
        let outcome = self.newton.solve(self.state, self.sys)?;
        self.last = Some(outcome);
        Ok(outcome.code)
    }

    fn newton(&mut self) -> Result<i32, KError> {
        let strategy = if let Some(clamp) = self.clamp()? {
            self.impose(&clamp)?;
            Some(Augmentation::Clamp(clamp))
        } else {
            self.seed.take().map(|p| Augmentation::Seed(OperatingPointSeed::new(p)))
        };
        let attached = strategy.is_some();
        if let Some(s) = strategy {
            self.state.attach_strategy(self.sys, s)?;
        }
        let code = self.solve_newton();
        if attached {
            self.state.detach_strategy();
        }
        code
    }

    // Natural continuation phase by phase. Within a phase the first spec
    // leads and the rest follow by fraction. A run that does not converge
    // hands every phase parameter back to the device layer at its end value.
    fn phases(&mut self, phases: &[Vec<&ParameterSpec>]) -> Result<i32, KError> {
        for spec in phases.iter().flatten() {
            self.state.set_parameter(&spec.name, spec.start);
        }
        self.state.set_active(true);
        let result = self.run_phases(phases);
        self.state.set_active(false);
        if matches!(result, Ok(code) if code > 0) {
            return result;
        }
        let restored = self.restore_ends(phases);
        result.and_then(|code| restored.map(|()| code))
    }

    fn restore_ends(&mut self, phases: &[Vec<&ParameterSpec>]) -> Result<(), KError> {
        for spec in phases.iter().flatten() {
            let end = self.ctx.end_of(spec)?;
            self.state.push_parameter(self.sys, &spec.name, end)?;
            debug!(parameter = %spec.name, end, "parameter restored");
        }
        Ok(())
    }

    fn run_phases(&mut self, phases: &[Vec<&ParameterSpec>]) -> Result<i32, KError> {
        let mut code = CONTINUATION_FAILED;
        for phase in phases {
            let Some((lead, rest)) = phase.split_first() else { continue };
            let ctx: &'a ContinuationContext = self.ctx;
            let coupled = rest.iter().map(|s| ctx.path(s)).collect::<Result<Vec<_>, _>>()?;
            let end = ctx.end_of(lead)?;
            let report = NaturalStepper::new(lead, end).with_coupled(coupled).run(self.state, self.sys, self.newton)?;
            code = self.finish(&report);
            if code == CONTINUATION_FAILED {
                break;
            }
        }
        Ok(code)
    }

    fn finish(&mut self, report: &ContinuationReport) -> i32 {
        self.last = report.last;
        match (report.finished(), report.last) {
            (true, Some(outcome)) => outcome.code,
            _ => {
                warn!(status = ?report.status, value = report.value, "continuation did not finish");
                CONTINUATION_FAILED
            }
        }
    }

    fn gmin(&mut self) -> Result<i32, KError> {
        let options: &'a ModeOptions = self.options;
        let g = &options.continuation.gmin;
        let spec = g.parameter();
        let gmin = GminStepping::new(self.ctx.voltage.clone(), g.start, g.end, g.residual_conductance);
        let strategy = match self.clamp()? {
            Some(clamp) => {
                self.impose(&clamp)?;
                Augmentation::ClampWithGmin(ClampWithGmin::new(gmin, clamp))
            }
            None => Augmentation::Gmin(gmin),
        };
        self.state.attach_strategy(self.sys, strategy)?;
        self.state.set_active(true);
        let report = NaturalStepper::new(&spec, g.end).run(self.state, self.sys, self.newton);
        self.state.set_active(false);
        self.state.remove_parameter(PROGRESS_PARAMETER);
        self.state.detach_strategy();
        Ok(self.finish(&report?))
    }

    fn pseudo_transient(&mut self) -> Result<i32, KError> {
        let options: &'a ModeOptions = self.options;
        let p = &options.continuation.pseudo_transient;
        let ptc = PseudoTransient::new(
            self.ctx.voltage.clone(),
            self.sys.n(),
            p.initial_step,
            p.min_step,
            p.max_step,
            p.voltage_scale,
            p.other_scale,
        );
        self.state.attach_strategy(self.sys, Augmentation::PseudoTransient(ptc))?;
        let report = PseudoTransientDriver::new(p).run(self.state, self.sys);
        self.state.detach_strategy();
        if report?.status == PseudoTransientStatus::Failed {
            return Ok(CONTINUATION_FAILED);
        }
        self.solve_newton()
    }

    fn homotopy(&mut self) -> Result<i32, KError> {
        let spec = self.options.continuation.homotopy.clone();
        let end = self.ctx.end_of(&spec)?;
        self.state.attach_homotopy(HomotopyBlend::new(self.state.x().to_vec()));
        let report = NaturalStepper::new(&spec, end).run(self.state, self.sys, self.newton);
        self.state.set_active(false);
        self.state.remove_parameter(HOMOTOPY_PARAMETER);
        self.state.detach_homotopy();
        Ok(self.finish(&report?))
    }
}
