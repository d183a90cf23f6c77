//! Linear-solve context for the Newton correction system.
//!
//! `KspContext` owns the linear solver state that outlives a single solve:
//! the cached LU factors of the last Jacobian and, for GMRES, the
//! preconditioner built from it. Both are marked stale whenever the Jacobian
//! is reloaded ([`KspContext::invalidate`]) and rebuilt lazily on the next
//! solve. A caller that knows the matrix has not changed (chord Newton) may
//! ask to reuse them.
//!
//! # References
//! - PETSc KSP manual pages: https://petsc.org/release/docs/manualpages/KSP/

use faer::Mat;
use tracing::{debug, trace};

use crate::config::options::{LinearSolverKind, LinearSolverOptions};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::{GmresSolver, LinearSolver, LuSolver};
use crate::utils::convergence::SolveStats;

/// Linear solver and its reusable setup for one shared Jacobian.
pub struct KspContext {
    pub options: LinearSolverOptions,
    lu: LuSolver<f64>,
    pc: Option<Box<dyn Preconditioner<Mat<f64>, Vec<f64>>>>,
    pc_current: bool,
    factors_current: bool,
    last: Option<SolveStats<f64>>,
}

impl KspContext {
    pub fn new(options: LinearSolverOptions) -> Self {
        Self {
            options,
            lu: LuSolver::new(),
            pc: None,
            pc_current: false,
            factors_current: false,
            last: None,
        }
    }

    /// The matrix changed: factors and preconditioner are stale.
    pub fn invalidate(&mut self) {
        self.factors_current = false;
        self.pc_current = false;
    }

    /// Whether the cached setup corresponds to the current matrix.
    pub fn factors_current(&self) -> bool {
        self.factors_current
    }

    pub fn last_stats(&self) -> Option<&SolveStats<f64>> {
        self.last.as_ref()
    }

    /// Solve `a·x = b`.
    ///
    /// With `reuse` set and current factors, the cached setup is used as is.
    /// An unconverged iterative solve is reported through
    /// `SolveStats::converged`, not as an error.
    pub fn solve(&mut self, a: &Mat<f64>, b: &[f64], x: &mut Vec<f64>, reuse: bool) -> Result<SolveStats<f64>, KError> {
        let n = b.len();
        if a.nrows() != n {
            return Err(KError::DimensionMismatch { expected: a.nrows(), found: n });
        }
        x.clear();
        x.resize(n, 0.0);
        let stats = match self.options.kind {
            LinearSolverKind::DirectLu => {
                if !(reuse && self.factors_current && self.lu.has_factors()) {
                    trace!(n, "factoring Jacobian");
                    self.lu.factor(a)?;
                }
                self.lu.solve_cached(b, x)?;
                SolveStats { iterations: 1, final_residual: 0.0, converged: true }
            }
            LinearSolverKind::Gmres { restart, tol, max_iters } => {
                if !(reuse && self.pc_current) {
                    self.pc = self.options.preconditioner.build();
                    if let Some(pc) = self.pc.as_mut() {
                        pc.setup(a)?;
                    }
                    self.pc_current = true;
                }
                let mut gmres = GmresSolver::new(restart, tol, max_iters);
                let rhs = b.to_vec();
                let stats = gmres.solve(a, self.pc.as_deref(), &rhs, x)?;
                debug!(iterations = stats.iterations, residual = stats.final_residual, converged = stats.converged, "gmres");
                stats
            }
        };
        self.factors_current = true;
        self.last = Some(stats.clone());
        Ok(stats)
    }
}
