//! Convergence tracking & tolerance checks for the inner linear solvers.

/// Stopping criteria for an iterative linear solve.
#[derive(Clone, Copy, Debug)]
pub struct Convergence<T> {
    pub tol: T,
    pub max_iters: usize,
}

/// Outcome of one linear solve.
#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    ///
    /// Running out of iterations stops the solve but is not convergence.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let rel = if res0_norm > T::zero() { res_norm / res0_norm } else { T::zero() };
        let converged = rel <= self.tol;
        (
            converged || i >= self.max_iters,
            SolveStats { iterations: i, final_residual: res_norm, converged },
        )
    }
}
