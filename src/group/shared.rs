use std::rc::Rc;

use faer::Mat;
use tracing::{trace, warn};

use crate::config::options::LinearSolverOptions;
use crate::context::ksp_context::KspContext;
use crate::core::loader::LoadProvider;
use crate::core::traits::MatTransVec;
use crate::core::wrappers::DistributedNorms;
use crate::error::KError;
use crate::group::{OwnerHandle, OwnerId, Quantity};
use crate::parallel::{Comm, UniverseComm};

/// Sole holder of the mutable residual, Jacobian, Newton direction and
/// gradient for one analysis, plus the linear-solve context that factors the
/// Jacobian.
pub struct SharedNumericSystem {
    loader: Box<dyn LoadProvider>,
    comm: Rc<UniverseComm>,
    residual: Vec<f64>,
    jacobian: Mat<f64>,
    newton: Vec<f64>,
    gradient: Vec<f64>,
    previous: Vec<f64>,
    owners: [Option<OwnerId>; Quantity::COUNT],
    // State whose Jacobian the current factors were built from.
    factor_owner: Option<OwnerId>,
    ksp: KspContext,
    next_id: u64,
    // Bumped on every Jacobian load.
    jacobian_loads: u64,
}

impl SharedNumericSystem {
    pub fn new(loader: Box<dyn LoadProvider>, comm: Rc<UniverseComm>, linear: LinearSolverOptions) -> Self {
        let n = loader.num_unknowns();
        Self {
            loader,
            comm,
            residual: vec![0.0; n],
            jacobian: Mat::zeros(n, n),
            newton: vec![0.0; n],
            gradient: vec![0.0; n],
            previous: vec![0.0; n],
            owners: [None; Quantity::COUNT],
            factor_owner: None,
            ksp: KspContext::new(linear),
            next_id: 0,
            jacobian_loads: 0,
        }
    }

    /// Number of local unknowns.
    pub fn n(&self) -> usize {
        self.residual.len()
    }

    /// Mint a handle for a new solver state.
    pub fn register(&mut self) -> OwnerHandle {
        self.next_id += 1;
        OwnerHandle::new(self.next_id)
    }

    /// Current owner of a single quantity.
    pub fn owner(&self, q: Quantity) -> Option<OwnerId> {
        self.owners[q.slot()]
    }

    /// Whether `id` owns every quantity in `q`.
    pub fn owns(&self, id: OwnerId, q: Quantity) -> bool {
        q.iter().all(|bit| self.owners[bit.slot()] == Some(id))
    }

    /// Quantities currently owned by `id`.
    pub fn owned_by(&self, id: OwnerId) -> Quantity {
        Quantity::all().iter().filter(|bit| self.owners[bit.slot()] == Some(id)).collect()
    }

    fn claim(&mut self, id: OwnerId, q: Quantity) {
        for bit in q.iter() {
            self.owners[bit.slot()] = Some(id);
        }
    }

    fn disown(&mut self, q: Quantity) {
        for bit in q.iter() {
            self.owners[bit.slot()] = None;
        }
    }

    /// Move everything `from` owns, including its factors, to `to`.
    pub fn transfer(&mut self, from: OwnerId, to: &OwnerHandle) -> Quantity {
        let moved = self.owned_by(from);
        self.claim(to.id(), moved);
        if self.factor_owner == Some(from) {
            self.factor_owner = Some(to.id());
        }
        moved
    }

    /// Drop every ownership record held by `handle`.
    pub fn release(&mut self, handle: &OwnerHandle) {
        let held = self.owned_by(handle.id());
        self.disown(held);
        if self.factor_owner == Some(handle.id()) {
            self.factor_owner = None;
        }
    }

    /// Evaluate F(x); the caller becomes owner of the residual and of the
    /// auxiliary device state.
    pub fn load_residual(&mut self, handle: &OwnerHandle, x: &[f64]) -> Result<bool, KError> {
        self.check_len(x.len())?;
        let ok = self.loader.load_residual(x, &self.previous, &mut self.residual);
        if ok {
            self.claim(handle.id(), Quantity::RESIDUAL | Quantity::AUX_STATE);
        } else {
            warn!("residual load failed");
            self.disown(Quantity::RESIDUAL | Quantity::AUX_STATE);
        }
        Ok(ok)
    }

    /// Evaluate J(x). The caller must own the auxiliary state refreshed at
    /// the same `x`.
    pub fn load_jacobian(&mut self, handle: &OwnerHandle, x: &[f64]) -> Result<bool, KError> {
        self.check_len(x.len())?;
        if !self.owns(handle.id(), Quantity::AUX_STATE) {
            return Err(KError::Prerequisite { quantity: Quantity::JACOBIAN, requires: Quantity::AUX_STATE });
        }
        let n = self.n();
        self.jacobian = Mat::zeros(n, n);
        self.jacobian_loads += 1;
        self.ksp.invalidate();
        self.factor_owner = None;
        let ok = self.loader.load_jacobian(x, &self.previous, &mut self.jacobian);
        if ok {
            self.claim(handle.id(), Quantity::JACOBIAN);
        } else {
            warn!("jacobian load failed");
            self.disown(Quantity::JACOBIAN);
        }
        Ok(ok)
    }

    /// Identifies the Jacobian currently in storage; changes with every load.
    pub fn jacobian_load(&self) -> u64 {
        self.jacobian_loads
    }

    pub fn residual(&self) -> &[f64] {
        &self.residual
    }

    pub fn residual_mut(&mut self, handle: &OwnerHandle) -> Result<&mut [f64], KError> {
        if !self.owns(handle.id(), Quantity::RESIDUAL) {
            return Err(KError::NotOwner { quantity: Quantity::RESIDUAL });
        }
        Ok(&mut self.residual)
    }

    pub fn jacobian(&self) -> &Mat<f64> {
        &self.jacobian
    }

    pub fn jacobian_mut(&mut self, handle: &OwnerHandle) -> Result<&mut Mat<f64>, KError> {
        if !self.owns(handle.id(), Quantity::JACOBIAN) {
            return Err(KError::NotOwner { quantity: Quantity::JACOBIAN });
        }
        // Edits change the matrix the factors came from.
        self.ksp.invalidate();
        Ok(&mut self.jacobian)
    }

    pub fn newton(&self) -> &[f64] {
        &self.newton
    }

    pub fn gradient(&self) -> &[f64] {
        &self.gradient
    }

    /// Whether the factors in the linear-solve context belong to `id`'s
    /// Jacobian and are still current.
    pub fn factors_current_for(&self, id: OwnerId) -> bool {
        self.factor_owner == Some(id) && self.ksp.factors_current()
    }

    /// Solve J·Δx = −F into the Newton vector.
    ///
    /// With `reuse` and current factors for this owner the cached factors are
    /// used even if the Jacobian itself is stale. Returns `Ok(false)` when the
    /// backend solve failed or produced non-finite values.
    pub fn solve_newton(&mut self, handle: &OwnerHandle, reuse: bool) -> Result<bool, KError> {
        let id = handle.id();
        if !self.owns(id, Quantity::RESIDUAL) {
            return Err(KError::Prerequisite { quantity: Quantity::NEWTON, requires: Quantity::RESIDUAL });
        }
        let cached = reuse && self.factors_current_for(id);
        if !cached && !self.owns(id, Quantity::JACOBIAN) {
            return Err(KError::Prerequisite { quantity: Quantity::NEWTON, requires: Quantity::JACOBIAN });
        }
        let rhs: Vec<f64> = self.residual.iter().map(|f| -f).collect();
        let stats = match self.ksp.solve(&self.jacobian, &rhs, &mut self.newton, cached) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "linear solve failed");
                self.newton.fill(0.0);
                self.disown(Quantity::NEWTON);
                return Ok(false);
            }
        };
        self.factor_owner = Some(id);
        let finite = DistributedNorms::new(&*self.comm).all_finite(&self.newton);
        trace!(reuse = cached, iterations = stats.iterations, finite, "newton direction");
        if !finite || !stats.converged {
            self.disown(Quantity::NEWTON);
            return Ok(false);
        }
        self.claim(id, Quantity::NEWTON);
        Ok(true)
    }

    /// g = Jᵀ F.
    pub fn compute_gradient(&mut self, handle: &OwnerHandle) -> Result<(), KError> {
        let id = handle.id();
        for q in [Quantity::RESIDUAL, Quantity::JACOBIAN] {
            if !self.owns(id, q) {
                return Err(KError::Prerequisite { quantity: Quantity::GRADIENT, requires: q });
            }
        }
        let f = self.residual.clone();
        self.jacobian.mattransvec(&f, &mut self.gradient);
        self.claim(id, Quantity::GRADIENT);
        Ok(())
    }

    /// r = J v with whatever Jacobian is stored.
    pub fn apply_jacobian(&self, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.check_len(v.len())?;
        self.check_len(r.len())?;
        self.comm.parallel_mat_vec(&self.jacobian, v, r);
        Ok(())
    }

    /// r = Jᵀ v with whatever Jacobian is stored.
    pub fn apply_jacobian_transpose(&self, v: &[f64], r: &mut [f64]) -> Result<(), KError> {
        self.check_len(v.len())?;
        self.check_len(r.len())?;
        let mut out = vec![0.0; r.len()];
        self.jacobian.mattransvec(&v.to_vec(), &mut out);
        r.copy_from_slice(&out);
        Ok(())
    }

    /// Solution at the previous time step / accepted point, passed to loads.
    pub fn previous(&self) -> &[f64] {
        &self.previous
    }

    pub fn set_previous(&mut self, x: &[f64]) -> Result<(), KError> {
        self.check_len(x.len())?;
        self.previous.copy_from_slice(x);
        // Loads depend on the previous solution.
        self.disown(Quantity::all());
        self.factor_owner = None;
        Ok(())
    }

    pub fn loader(&self) -> &dyn LoadProvider {
        self.loader.as_ref()
    }

    pub fn loader_mut(&mut self) -> &mut dyn LoadProvider {
        self.loader.as_mut()
    }

    pub fn comm(&self) -> &UniverseComm {
        &self.comm
    }

    pub fn comm_handle(&self) -> Rc<UniverseComm> {
        Rc::clone(&self.comm)
    }

    pub fn norms(&self) -> DistributedNorms<'_, UniverseComm> {
        DistributedNorms::new(&*self.comm)
    }

    /// Tear down, keeping the device layer and communicator for a rebuild.
    pub fn into_parts(self) -> (Box<dyn LoadProvider>, Rc<UniverseComm>) {
        (self.loader, self.comm)
    }

    fn check_len(&self, len: usize) -> Result<(), KError> {
        if len != self.n() {
            return Err(KError::DimensionMismatch { expected: self.n(), found: len });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SharedNumericSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedNumericSystem")
            .field("n", &self.n())
            .field("owners", &self.owners)
            .field("factor_owner", &self.factor_owner)
            .field("comm", &self.comm)
            .finish()
    }
}
