//! Direct dense LU solver using faer, with reusable factors.
//!
//! The Newton driver solves one system per iteration with a fresh Jacobian,
//! but chord (modified) Newton and the pseudo-transient phase solve several
//! right-hand sides against the same matrix. [`LuSolver`] keeps the full-pivot
//! LU of the last matrix it factored so those solves skip refactorization.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations, §3.4

use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;
use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::traits::{ComplexField, RealField};
use faer::{Conj, Mat, MatMut};

/// LU solver using full pivoting from faer.
pub struct LuSolver<T> {
    factor: Option<FullPivLu<T>>,
    dim: usize,
}

impl<T: ComplexField + RealField> LuSolver<T> {
    /// Create a new LU solver (no factorization yet).
    pub fn new() -> Self {
        LuSolver { factor: None, dim: 0 }
    }

    /// Factor `a` and keep the factors.
    pub fn factor(&mut self, a: &Mat<T>) -> Result<(), KError> {
        if a.nrows() != a.ncols() {
            return Err(KError::FactorError(format!(
                "LU needs a square matrix, got {}x{}",
                a.nrows(),
                a.ncols()
            )));
        }
        self.factor = Some(FullPivLu::new(a.as_ref()));
        self.dim = a.nrows();
        Ok(())
    }

    pub fn has_factors(&self) -> bool {
        self.factor.is_some()
    }

    /// Drop the cached factors.
    pub fn clear(&mut self) {
        self.factor = None;
        self.dim = 0;
    }

    /// Solve using the cached LU factorization.
    pub fn solve_cached(&self, b: &[T], x: &mut [T]) -> Result<(), KError> {
        let factor = self
            .factor
            .as_ref()
            .ok_or_else(|| KError::FactorError("solve_cached called before factorization".into()))?;
        if b.len() != self.dim || x.len() != self.dim {
            return Err(KError::DimensionMismatch { expected: self.dim, found: b.len().max(x.len()) });
        }
        x.clone_from_slice(b);
        let n = x.len();
        let x_mat = MatMut::from_column_major_slice_mut(x, n, 1);
        factor.solve_in_place_with_conj(Conj::No, x_mat);
        Ok(())
    }
}

impl<T: ComplexField + RealField + Copy + PartialOrd + From<f64>> LinearSolver<Mat<T>, Vec<T>> for LuSolver<T> {
    type Error = KError;
    type Scalar = T;

    /// Factor `a` (replacing any cached factors) and solve. The preconditioner
    /// is ignored.
    fn solve(
        &mut self,
        a: &Mat<T>,
        _pc: Option<&dyn Preconditioner<Mat<T>, Vec<T>>>,
        b: &Vec<T>,
        x: &mut Vec<T>,
    ) -> Result<SolveStats<T>, KError> {
        self.factor(a)?;
        x.resize(b.len(), <T as From<f64>>::from(0.0));
        self.solve_cached(b, x)?;
        Ok(SolveStats { iterations: 1, final_residual: <T as From<f64>>::from(0.0), converged: true })
    }
}

impl<T: ComplexField + RealField> Default for LuSolver<T> {
    fn default() -> Self {
        Self::new()
    }
}
