use faer::Mat;
use tracing::debug;

use crate::augment::Augmentation;
use crate::continuation::homotopy::HomotopyBlend;
use crate::error::KError;
use crate::group::shared::SharedNumericSystem;
use crate::group::state::{ComputeHooks, ResidualNorms, SolverState};
use crate::group::{OwnerId, Quantity};

/// Reserved parameter name routed to the attached strategy's progress
/// variable instead of the device layer.
pub const PROGRESS_PARAMETER: &str = "GSTEPPING";

/// Parameter name that sets λ of an attached homotopy blend.
pub const HOMOTOPY_PARAMETER: &str = "HOMOTOPY";

/// Ordered (name, value) pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinuationParameters {
    entries: Vec<(String, f64)>,
}

impl ContinuationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite, keeping first-insertion order.
    pub fn set(&mut self, name: &str, value: f64) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|&(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<f64> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Disjoint borrows of a ContinuationState handed to the base state's computes.
struct StateHooks<'a> {
    params: &'a ContinuationParameters,
    strategy: &'a mut Option<Augmentation>,
    homotopy: &'a mut Option<HomotopyBlend>,
    active: bool,
}

impl ComputeHooks for StateHooks<'_> {
    fn before_compute(&mut self, sys: &mut SharedNumericSystem) -> Result<(), KError> {
        if !self.active {
            return Ok(());
        }
        for (name, value) in self.params.iter() {
            match name {
                PROGRESS_PARAMETER => match self.strategy.as_mut() {
                    Some(s) => s.set_progress(value)?,
                    None => {
                        return Err(KError::Dispatch(format!("{PROGRESS_PARAMETER} set with no strategy attached")));
                    }
                },
                HOMOTOPY_PARAMETER => match self.homotopy.as_mut() {
                    Some(h) => h.set_lambda(value),
                    None => {
                        return Err(KError::Dispatch(format!("{HOMOTOPY_PARAMETER} set with no homotopy attached")));
                    }
                },
                _ => {
                    if !sys.loader_mut().set_parameter(name, value) {
                        return Err(KError::Config(format!("device layer rejected parameter {name}")));
                    }
                }
            }
        }
        Ok(())
    }

    fn augment_residual(&mut self, x: &[f64], f: &mut [f64]) {
        if let Some(s) = self.strategy.as_mut() {
            s.augment_residual(x, f);
        }
        if let Some(h) = self.homotopy.as_ref() {
            h.augment_residual(x, f);
        }
    }

    fn augment_jacobian(&mut self, jac: &mut Mat<f64>, load: u64) {
        if let Some(s) = self.strategy.as_mut() {
            s.augment_jacobian(jac, load);
        }
        if let Some(h) = self.homotopy.as_ref() {
            h.augment_jacobian(jac);
        }
    }
}

/// A [`SolverState`] plus continuation parameters and an optional
/// augmentation strategy.
#[derive(Debug)]
pub struct ContinuationState {
    base: SolverState,
    params: ContinuationParameters,
    strategy: Option<Augmentation>,
    homotopy: Option<HomotopyBlend>,
    active: bool,
    // Generation of the last point handed to `point_accepted`.
    captured: Option<u64>,
}

impl ContinuationState {
    pub fn new(base: SolverState) -> Self {
        Self { base, params: ContinuationParameters::new(), strategy: None, homotopy: None, active: false, captured: None }
    }

    pub fn base(&self) -> &SolverState {
        &self.base
    }

    pub fn id(&self) -> OwnerId {
        self.base.id()
    }

    pub fn x(&self) -> &[f64] {
        self.base.x()
    }

    pub fn generation(&self) -> u64 {
        self.base.generation()
    }

    pub fn set_x(&mut self, x: &[f64]) -> Result<(), KError> {
        self.base.set_x(x)
    }

    pub fn compute_x(&mut self, base: &[f64], dir: &[f64], step: f64) -> Result<(), KError> {
        self.base.compute_x(base, dir, step)
    }

    pub fn invalidate(&mut self) {
        self.base.invalidate();
    }

    pub fn parameters(&self) -> &ContinuationParameters {
        &self.params
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) {
        if self.params.get(name) != Some(value) {
            self.params.set(name, value);
            self.base.invalidate();
        }
    }

    /// Set a device parameter and hand it to the device layer now, whether
    /// or not forwarding is active.
    pub fn push_parameter(&mut self, sys: &mut SharedNumericSystem, name: &str, value: f64) -> Result<(), KError> {
        self.set_parameter(name, value);
        if !sys.loader_mut().set_parameter(name, value) {
            return Err(KError::Config(format!("device layer rejected parameter {name}")));
        }
        Ok(())
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<f64> {
        let old = self.params.remove(name);
        if old.is_some() {
            self.base.invalidate();
        }
        old
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Toggle forwarding of parameters before each compute.
    pub fn set_active(&mut self, active: bool) {
        if self.active != active {
            self.active = active;
            self.base.invalidate();
        }
    }

    /// Attach a strategy. Its partitions are checked against the system size;
    /// only one strategy may be attached at a time.
    pub fn attach_strategy(&mut self, sys: &SharedNumericSystem, strategy: Augmentation) -> Result<(), KError> {
        if let Some(current) = &self.strategy {
            return Err(KError::Dispatch(format!(
                "{} attached while {} is still attached",
                strategy.name(),
                current.name()
            )));
        }
        strategy.validate(sys.n())?;
        debug!(strategy = strategy.name(), "attach");
        self.strategy = Some(strategy);
        self.base.invalidate();
        Ok(())
    }

    pub fn detach_strategy(&mut self) -> Option<Augmentation> {
        let old = self.strategy.take();
        if let Some(s) = &old {
            debug!(strategy = s.name(), "detach");
            self.base.invalidate();
        }
        old
    }

    pub fn strategy(&self) -> Option<&Augmentation> {
        self.strategy.as_ref()
    }

    /// Accept a pseudo-time step with residual norm `norm`; returns the new
    /// Δτ. Only the Jacobian-derived quantities go stale.
    pub fn update_pseudo_step(&mut self, norm: f64) -> Result<f64, KError> {
        let ptc = self
            .strategy
            .as_mut()
            .ok_or_else(|| KError::Dispatch("no strategy attached".into()))?
            .as_pseudo_transient_mut()?;
        let dt = ptc.update_step(norm);
        self.base.invalidate_derivatives();
        Ok(dt)
    }

    /// Halve Δτ; `Ok(false)` once at its minimum.
    pub fn halve_pseudo_step(&mut self) -> Result<bool, KError> {
        let ptc = self
            .strategy
            .as_mut()
            .ok_or_else(|| KError::Dispatch("no strategy attached".into()))?
            .as_pseudo_transient_mut()?;
        let cut = ptc.halve_step();
        self.base.invalidate_derivatives();
        Ok(cut)
    }

    pub fn attach_homotopy(&mut self, blend: HomotopyBlend) {
        self.homotopy = Some(blend);
        self.base.invalidate();
    }

    pub fn detach_homotopy(&mut self) -> Option<HomotopyBlend> {
        let old = self.homotopy.take();
        if old.is_some() {
            self.base.invalidate();
        }
        old
    }

    fn split(&mut self) -> (&mut SolverState, StateHooks<'_>) {
        let hooks = StateHooks {
            params: &self.params,
            strategy: &mut self.strategy,
            homotopy: &mut self.homotopy,
            active: self.active,
        };
        (&mut self.base, hooks)
    }

    pub fn compute_residual(&mut self, sys: &mut SharedNumericSystem) -> Result<bool, KError> {
        let (base, mut hooks) = self.split();
        base.compute_residual_with(sys, &mut hooks)
    }

    pub fn compute_jacobian(&mut self, sys: &mut SharedNumericSystem) -> Result<bool, KError> {
        let (base, mut hooks) = self.split();
        base.compute_jacobian_with(sys, &mut hooks)
    }

    pub fn compute_newton(&mut self, sys: &mut SharedNumericSystem, reuse_factors: bool) -> Result<bool, KError> {
        self.base.compute_newton(sys, reuse_factors)
    }

    pub fn compute_gradient(&mut self, sys: &mut SharedNumericSystem) -> Result<(), KError> {
        self.base.compute_gradient(sys)
    }

    pub fn apply_jacobian(&self, sys: &SharedNumericSystem, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.base.apply_jacobian(sys, v, r)
    }

    pub fn apply_jacobian_transpose(&self, sys: &SharedNumericSystem, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.base.apply_jacobian_transpose(sys, v, r)
    }

    pub fn is_valid(&self, sys: &SharedNumericSystem, q: Quantity) -> bool {
        self.base.is_valid(sys, q)
    }

    pub fn is_jacobian_owner(&self, sys: &SharedNumericSystem) -> bool {
        self.base.is_jacobian_owner(sys)
    }

    pub fn residual<'a>(&self, sys: &'a SharedNumericSystem) -> Result<&'a [f64], KError> {
        self.base.residual(sys)
    }

    pub fn newton<'a>(&self, sys: &'a SharedNumericSystem) -> Result<&'a [f64], KError> {
        self.base.newton(sys)
    }

    pub fn residual_norms(&self) -> Option<ResidualNorms> {
        self.base.residual_norms()
    }

    /// The outer driver accepted the current point. Hands the solution to the
    /// device layer once per generation, the very first point included.
    pub fn step_succeeded(&mut self, sys: &mut SharedNumericSystem) {
        let generation = self.base.generation();
        if self.captured == Some(generation) {
            return;
        }
        sys.loader_mut().point_accepted(self.base.x());
        self.captured = Some(generation);
    }

    /// The outer driver rejected the in-flight point.
    pub fn step_failed(&mut self, sys: &mut SharedNumericSystem) {
        sys.loader_mut().point_abandoned();
    }

    /// Copy taking over the quantities this state owns. The attached strategy
    /// and homotopy are copied; the capture record starts fresh.
    pub fn deep_clone(&self, sys: &mut SharedNumericSystem) -> ContinuationState {
        ContinuationState {
            base: self.base.deep_clone(sys),
            params: self.params.clone(),
            strategy: self.strategy.clone(),
            homotopy: self.homotopy.clone(),
            active: self.active,
            captured: None,
        }
    }

    /// Same size and parameters, zero solution, nothing valid, no strategy.
    pub fn shallow_clone(&self, sys: &mut SharedNumericSystem) -> ContinuationState {
        ContinuationState {
            base: self.base.shallow_clone(sys),
            params: self.params.clone(),
            strategy: None,
            homotopy: None,
            active: self.active,
            captured: None,
        }
    }

    pub fn retire(self, sys: &mut SharedNumericSystem) {
        self.base.retire(sys);
    }
}
