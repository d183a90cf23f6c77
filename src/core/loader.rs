//! Boundary to the device-model layer.
//!
//! The engine never evaluates device physics itself. A [`LoadProvider`]
//! assembles the residual and Jacobian for a given solution, owns whatever
//! auxiliary device state ("state"/"store" vectors) that assembly refreshes,
//! and receives continuation parameters and point acceptance notices.

use std::collections::BTreeMap;

use faer::Mat;

use crate::augment::Partition;
use crate::error::KError;

/// Residual/Jacobian assembly for one discretized circuit.
///
/// Loads return `false` when the device layer could not evaluate at `x`
/// (e.g. a model limiting failure); the engine treats that as a numerical
/// failure, never as an error.
pub trait LoadProvider {
    /// Number of locally owned unknowns.
    fn num_unknowns(&self) -> usize;

    /// Assemble F(x) into `f`. Refreshes the auxiliary device state for `x`.
    fn load_residual(&mut self, x: &[f64], x_prev: &[f64], f: &mut [f64]) -> bool;

    /// Assemble ∂F/∂x at `x` into `jac`, which arrives zeroed.
    ///
    /// Relies on the auxiliary state left by the last `load_residual` at the
    /// same `x`.
    fn load_jacobian(&mut self, x: &[f64], x_prev: &[f64], jac: &mut Mat<f64>) -> bool;

    /// Forward a continuation parameter. Returns `false` for unknown names.
    fn set_parameter(&mut self, name: &str, value: f64) -> bool {
        let _ = (name, value);
        false
    }

    /// Current value of a named parameter, if the device layer knows it.
    fn parameter(&self, name: &str) -> Option<f64> {
        let _ = name;
        None
    }

    /// Local indices of node-voltage unknowns (the rest are branch currents
    /// and internal variables).
    fn voltage_unknowns(&self) -> Vec<usize> {
        (0..self.num_unknowns()).collect()
    }

    /// Local index of a named unknown.
    fn unknown_index(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }

    /// Whether every device reports its own internal convergence.
    fn devices_converged(&self) -> bool {
        true
    }

    /// Whether a nested (2-level) sub-solve failed during the last load.
    fn inner_solve_failed(&self) -> bool {
        false
    }

    /// An outer continuation point converged at `x`; capture it.
    fn point_accepted(&mut self, x: &[f64]) {
        let _ = x;
    }

    /// The in-flight continuation point was rejected.
    fn point_abandoned(&mut self) {}
}

/// Named unknown → value map from a restart file or `.IC` style statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialConditions {
    values: BTreeMap<String, f64>,
}

impl InitialConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Map names to local indices. Returns the partition and the values in
    /// partition order.
    pub fn resolve<L: LoadProvider + ?Sized>(&self, loader: &L) -> Result<(Partition, Vec<f64>), KError> {
        let mut pairs = Vec::with_capacity(self.values.len());
        for (name, &value) in &self.values {
            let idx = loader
                .unknown_index(name)
                .ok_or_else(|| KError::Partition(format!("unknown initial-condition node '{name}'")))?;
            pairs.push((idx, value));
        }
        pairs.sort_by_key(|&(i, _)| i);
        if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(KError::Partition("two initial conditions name the same unknown".into()));
        }
        let values = pairs.iter().map(|&(_, v)| v).collect();
        let partition = Partition::new(pairs.into_iter().map(|(i, _)| i).collect(), loader.num_unknowns())?;
        Ok((partition, values))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for InitialConditions {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }
}
