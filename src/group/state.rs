use faer::Mat;
use tracing::trace;

use crate::error::KError;
use crate::group::shared::SharedNumericSystem;
use crate::group::{OwnerHandle, OwnerId, Quantity, Validity};

/// Customization points around a compute.
///
/// `before_compute` runs before a residual load (parameter forwarding);
/// the augment hooks run on freshly loaded quantities before they are marked
/// valid.
pub trait ComputeHooks {
    fn before_compute(&mut self, _sys: &mut SharedNumericSystem) -> Result<(), KError> {
        Ok(())
    }
    fn augment_residual(&mut self, _x: &[f64], _f: &mut [f64]) {}
    /// `load` identifies the Jacobian load being augmented.
    fn augment_jacobian(&mut self, _jac: &mut Mat<f64>, _load: u64) {}
}

/// Plain Newton: no hooks.
pub struct NoHooks;

impl ComputeHooks for NoHooks {}

/// Residual norms captured when the residual was computed, so they remain
/// readable after another state takes the shared vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualNorms {
    pub two: f64,
    pub max: f64,
    /// Global index of the max-norm entry.
    pub max_index: usize,
    pub finite: bool,
}

// Slots of the four cached quantities in `SolverState::validity`.
const CACHED: [Quantity; 4] = [Quantity::RESIDUAL, Quantity::JACOBIAN, Quantity::NEWTON, Quantity::GRADIENT];

/// One solution vector plus lazily computed residual, Jacobian, Newton
/// direction and gradient.
///
/// Each compute is idempotent per generation: while the state still owns a
/// quantity and its flag is `Valid`, computing it again is free.
#[derive(Debug)]
pub struct SolverState {
    handle: OwnerHandle,
    x: Vec<f64>,
    generation: u64,
    validity: [Validity; 4],
    norms: Option<ResidualNorms>,
}

impl SolverState {
    pub fn new(sys: &mut SharedNumericSystem, x: Vec<f64>) -> Result<Self, KError> {
        if x.len() != sys.n() {
            return Err(KError::DimensionMismatch { expected: sys.n(), found: x.len() });
        }
        Ok(Self { handle: sys.register(), x, generation: 0, validity: [Validity::Stale; 4], norms: None })
    }

    /// Zero solution.
    pub fn zeros(sys: &mut SharedNumericSystem) -> Self {
        let n = sys.n();
        Self { handle: sys.register(), x: vec![0.0; n], generation: 0, validity: [Validity::Stale; 4], norms: None }
    }

    pub fn id(&self) -> OwnerId {
        self.handle.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    fn slot(q: Quantity) -> usize {
        CACHED.iter().position(|&c| c == q).unwrap_or(0)
    }

    fn flag(&self, q: Quantity) -> Validity {
        self.validity[Self::slot(q)]
    }

    fn set_flag(&mut self, q: Quantity, v: Validity) {
        self.validity[Self::slot(q)] = v;
    }

    /// Valid flag and still the owner in the shared system.
    pub fn is_valid(&self, sys: &SharedNumericSystem, q: Quantity) -> bool {
        self.flag(q) == Validity::Valid && sys.owns(self.id(), q)
    }

    pub fn is_jacobian_owner(&self, sys: &SharedNumericSystem) -> bool {
        sys.owns(self.id(), Quantity::JACOBIAN)
    }

    /// Mark everything stale and start a new generation.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.validity = [Validity::Stale; 4];
        self.norms = None;
    }

    /// Keep the residual, drop everything derived from the Jacobian.
    pub fn invalidate_derivatives(&mut self) {
        for q in [Quantity::JACOBIAN, Quantity::NEWTON, Quantity::GRADIENT] {
            self.set_flag(q, Validity::Stale);
        }
    }

    pub fn set_x(&mut self, x: &[f64]) -> Result<(), KError> {
        if x.len() != self.x.len() {
            return Err(KError::DimensionMismatch { expected: self.x.len(), found: x.len() });
        }
        self.x.copy_from_slice(x);
        self.invalidate();
        Ok(())
    }

    /// x ← base + step·dir.
    pub fn compute_x(&mut self, base: &[f64], dir: &[f64], step: f64) -> Result<(), KError> {
        if base.len() != self.x.len() || dir.len() != self.x.len() {
            return Err(KError::DimensionMismatch { expected: self.x.len(), found: base.len().max(dir.len()) });
        }
        for ((xi, &bi), &di) in self.x.iter_mut().zip(base).zip(dir) {
            *xi = bi + step * di;
        }
        self.invalidate();
        Ok(())
    }

    pub fn compute_residual(&mut self, sys: &mut SharedNumericSystem) -> Result<bool, KError> {
        self.compute_residual_with(sys, &mut NoHooks)
    }

    /// Load F(x) unless this state already holds a valid residual. Returns
    /// `Ok(false)` when the device layer could not evaluate.
    pub fn compute_residual_with(
        &mut self,
        sys: &mut SharedNumericSystem,
        hooks: &mut dyn ComputeHooks,
    ) -> Result<bool, KError> {
        if self.is_valid(sys, Quantity::RESIDUAL) {
            return Ok(true);
        }
        if self.flag(Quantity::RESIDUAL) == Validity::Computing {
            return Err(KError::Reentrant("residual"));
        }
        self.set_flag(Quantity::RESIDUAL, Validity::Computing);
        let result = self.load_residual(sys, hooks);
        let ok = matches!(result, Ok(true));
        self.set_flag(Quantity::RESIDUAL, if ok { Validity::Valid } else { Validity::Stale });
        if ok {
            // The auxiliary state moved; anything built on the old one is stale.
            self.invalidate_derivatives();
        }
        result
    }

    fn load_residual(&mut self, sys: &mut SharedNumericSystem, hooks: &mut dyn ComputeHooks) -> Result<bool, KError> {
        hooks.before_compute(sys)?;
        if !sys.load_residual(&self.handle, &self.x)? {
            self.norms = Some(ResidualNorms { two: f64::NAN, max: f64::NAN, max_index: 0, finite: false });
            return Ok(false);
        }
        let f = sys.residual_mut(&self.handle)?;
        hooks.augment_residual(&self.x, f);
        let norms = sys.norms();
        let (max, max_index) = norms.max_abs(sys.residual());
        let finite = norms.all_finite(sys.residual());
        let two = norms.norm_2(sys.residual());
        trace!(id = self.id().get(), two, max, max_index, "residual");
        self.norms = Some(ResidualNorms { two, max, max_index, finite });
        Ok(true)
    }

    pub fn compute_jacobian(&mut self, sys: &mut SharedNumericSystem) -> Result<bool, KError> {
        self.compute_jacobian_with(sys, &mut NoHooks)
    }

    /// Load J(x). If the auxiliary device state was last refreshed by another
    /// state (or for another solution), the residual is recomputed first.
    pub fn compute_jacobian_with(
        &mut self,
        sys: &mut SharedNumericSystem,
        hooks: &mut dyn ComputeHooks,
    ) -> Result<bool, KError> {
        if self.is_valid(sys, Quantity::JACOBIAN) {
            return Ok(true);
        }
        if self.flag(Quantity::JACOBIAN) == Validity::Computing {
            return Err(KError::Reentrant("jacobian"));
        }
        if !self.is_valid(sys, Quantity::RESIDUAL) || !sys.owns(self.id(), Quantity::AUX_STATE) {
            self.set_flag(Quantity::RESIDUAL, Validity::Stale);
            if !self.compute_residual_with(sys, hooks)? {
                return Ok(false);
            }
        }
        if !sys.owns(self.id(), Quantity::AUX_STATE) {
            return Err(KError::Prerequisite { quantity: Quantity::JACOBIAN, requires: Quantity::AUX_STATE });
        }
        self.set_flag(Quantity::JACOBIAN, Validity::Computing);
        let result = self.load_jacobian(sys, hooks);
        let ok = matches!(result, Ok(true));
        self.set_flag(Quantity::JACOBIAN, if ok { Validity::Valid } else { Validity::Stale });
        self.set_flag(Quantity::NEWTON, Validity::Stale);
        self.set_flag(Quantity::GRADIENT, Validity::Stale);
        result
    }

    fn load_jacobian(&self, sys: &mut SharedNumericSystem, hooks: &mut dyn ComputeHooks) -> Result<bool, KError> {
        if !sys.load_jacobian(&self.handle, &self.x)? {
            return Ok(false);
        }
        let load = sys.jacobian_load();
        hooks.augment_jacobian(sys.jacobian_mut(&self.handle)?, load);
        Ok(true)
    }

    /// Solve for the Newton direction.
    ///
    /// Requires a valid residual and either a valid Jacobian or, when
    /// `reuse_factors` is set, current factors of this state's last Jacobian.
    pub fn compute_newton(&mut self, sys: &mut SharedNumericSystem, reuse_factors: bool) -> Result<bool, KError> {
        if self.is_valid(sys, Quantity::NEWTON) {
            return Ok(true);
        }
        if !self.is_valid(sys, Quantity::RESIDUAL) {
            return Err(KError::Prerequisite { quantity: Quantity::NEWTON, requires: Quantity::RESIDUAL });
        }
        let reuse = reuse_factors && sys.factors_current_for(self.id());
        if !reuse && !self.is_valid(sys, Quantity::JACOBIAN) {
            return Err(KError::Prerequisite { quantity: Quantity::NEWTON, requires: Quantity::JACOBIAN });
        }
        self.set_flag(Quantity::NEWTON, Validity::Computing);
        let result = sys.solve_newton(&self.handle, reuse);
        let ok = matches!(result, Ok(true));
        self.set_flag(Quantity::NEWTON, if ok { Validity::Valid } else { Validity::Stale });
        result
    }

    pub fn compute_gradient(&mut self, sys: &mut SharedNumericSystem) -> Result<(), KError> {
        if self.is_valid(sys, Quantity::GRADIENT) {
            return Ok(());
        }
        if !self.is_valid(sys, Quantity::JACOBIAN) {
            return Err(KError::Prerequisite { quantity: Quantity::GRADIENT, requires: Quantity::JACOBIAN });
        }
        sys.compute_gradient(&self.handle)?;
        self.set_flag(Quantity::GRADIENT, Validity::Valid);
        Ok(())
    }

    /// r = J v with this state's Jacobian.
    pub fn apply_jacobian(&self, sys: &SharedNumericSystem, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.require(sys, Quantity::JACOBIAN)?;
        sys.apply_jacobian(v, r)
    }

    /// r = Jᵀ v with this state's Jacobian.
    pub fn apply_jacobian_transpose(&self, sys: &SharedNumericSystem, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.require(sys, Quantity::JACOBIAN)?;
        sys.apply_jacobian_transpose(v, r)
    }

    fn require(&self, sys: &SharedNumericSystem, q: Quantity) -> Result<(), KError> {
        if self.is_valid(sys, q) { Ok(()) } else { Err(KError::Stale(q)) }
    }

    pub fn residual<'a>(&self, sys: &'a SharedNumericSystem) -> Result<&'a [f64], KError> {
        self.require(sys, Quantity::RESIDUAL)?;
        Ok(sys.residual())
    }

    pub fn newton<'a>(&self, sys: &'a SharedNumericSystem) -> Result<&'a [f64], KError> {
        self.require(sys, Quantity::NEWTON)?;
        Ok(sys.newton())
    }

    pub fn gradient<'a>(&self, sys: &'a SharedNumericSystem) -> Result<&'a [f64], KError> {
        self.require(sys, Quantity::GRADIENT)?;
        Ok(sys.gradient())
    }

    /// Norms of the last residual this state computed for its current x.
    pub fn residual_norms(&self) -> Option<ResidualNorms> {
        self.norms
    }

    /// Copy that takes over every quantity this state owns.
    pub fn deep_clone(&self, sys: &mut SharedNumericSystem) -> SolverState {
        let handle = sys.register();
        sys.transfer(self.id(), &handle);
        SolverState {
            handle,
            x: self.x.clone(),
            generation: self.generation,
            validity: self.validity,
            norms: self.norms,
        }
    }

    /// Same size, zero solution, nothing valid.
    pub fn shallow_clone(&self, sys: &mut SharedNumericSystem) -> SolverState {
        SolverState::zeros(sys)
    }

    /// Give up all ownership records.
    pub fn retire(self, sys: &mut SharedNumericSystem) {
        sys.release(&self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::options::LinearSolverOptions;
    use crate::core::loader::LoadProvider;
    use crate::parallel::UniverseComm;
    use std::cell::Cell;
    use std::rc::Rc;

    // f_i = x_i^2 - 4
    struct Squares {
        loads: Rc<Cell<usize>>,
    }

    impl LoadProvider for Squares {
        fn num_unknowns(&self) -> usize { 2 }
        fn load_residual(&mut self, x: &[f64], _p: &[f64], f: &mut [f64]) -> bool {
            self.loads.set(self.loads.get() + 1);
            for (fi, xi) in f.iter_mut().zip(x) {
                *fi = xi * xi - 4.0;
            }
            true
        }
        fn load_jacobian(&mut self, x: &[f64], _p: &[f64], j: &mut Mat<f64>) -> bool {
            for i in 0..2 {
                j[(i, i)] = 2.0 * x[i];
            }
            true
        }
    }

    fn setup() -> (SharedNumericSystem, Rc<Cell<usize>>) {
        let loads = Rc::new(Cell::new(0));
        let sys = SharedNumericSystem::new(
            Box::new(Squares { loads: loads.clone() }),
            Rc::new(UniverseComm::Serial),
            LinearSolverOptions::default(),
        );
        (sys, loads)
    }

    #[test]
    fn residual_is_cached_per_generation() {
        let (mut sys, loads) = setup();
        let mut s = SolverState::new(&mut sys, vec![1.0, 1.0]).unwrap();
        assert!(s.compute_residual(&mut sys).unwrap());
        assert!(s.compute_residual(&mut sys).unwrap());
        assert_eq!(loads.get(), 1);
        s.set_x(&[3.0, 3.0]).unwrap();
        s.compute_residual(&mut sys).unwrap();
        assert_eq!(loads.get(), 2);
        assert_eq!(s.residual_norms().unwrap().max, 5.0);
    }

    #[test]
    fn jacobian_forces_residual_refresh_when_aux_state_moved() {
        let (mut sys, loads) = setup();
        let mut a = SolverState::new(&mut sys, vec![1.0, 1.0]).unwrap();
        let mut b = SolverState::new(&mut sys, vec![2.0, 2.0]).unwrap();
        a.compute_residual(&mut sys).unwrap();
        b.compute_residual(&mut sys).unwrap();
        assert_eq!(loads.get(), 2);
        assert!(a.compute_jacobian(&mut sys).unwrap());
        assert_eq!(loads.get(), 3);
        assert!(a.is_jacobian_owner(&sys));
        assert!(!b.is_valid(&sys, Quantity::RESIDUAL));
    }

    #[test]
    fn newton_needs_prerequisites() {
        let (mut sys, _) = setup();
        let mut s = SolverState::new(&mut sys, vec![1.0, 1.0]).unwrap();
        assert!(matches!(
            s.compute_newton(&mut sys, false),
            Err(KError::Prerequisite { requires: Quantity::RESIDUAL, .. })
        ));
        s.compute_residual(&mut sys).unwrap();
        assert!(matches!(
            s.compute_newton(&mut sys, false),
            Err(KError::Prerequisite { requires: Quantity::JACOBIAN, .. })
        ));
        s.compute_jacobian(&mut sys).unwrap();
        assert!(s.compute_newton(&mut sys, false).unwrap());
        // x = 1: f = -3, J = 2, dx = 1.5
        assert!((s.newton(&sys).unwrap()[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn chord_reuses_factors_after_move() {
        let (mut sys, _) = setup();
        let mut s = SolverState::new(&mut sys, vec![1.0, 1.0]).unwrap();
        s.compute_jacobian(&mut sys).unwrap();
        s.compute_newton(&mut sys, false).unwrap();
        let dir = s.newton(&sys).unwrap().to_vec();
        let x0 = s.x().to_vec();
        s.compute_x(&x0, &dir, 1.0).unwrap();
        s.compute_residual(&mut sys).unwrap();
        assert!(s.compute_newton(&mut sys, true).unwrap());
        // f(2.5) = 2.25 against the old J = 2
        assert!((s.newton(&sys).unwrap()[0] + 1.125).abs() < 1e-12);
    }

    #[test]
    fn deep_clone_takes_ownership_shallow_clone_starts_stale() {
        let (mut sys, _) = setup();
        let mut s = SolverState::new(&mut sys, vec![1.0, 1.0]).unwrap();
        s.compute_jacobian(&mut sys).unwrap();
        let d = s.deep_clone(&mut sys);
        assert!(d.is_jacobian_owner(&sys));
        assert!(!s.is_jacobian_owner(&sys));
        assert!(d.is_valid(&sys, Quantity::RESIDUAL));
        let sh = d.shallow_clone(&mut sys);
        assert_eq!(sh.x(), &[0.0, 0.0]);
        assert!(!sh.is_valid(&sys, Quantity::RESIDUAL));
        d.retire(&mut sys);
        assert!(sys.owner(Quantity::JACOBIAN).is_none());
    }
}
