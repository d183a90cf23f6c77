//! Restarted GMRES with right preconditioning (Saad §6.4, §9.3.2).
//!
//! Used as the iterative alternative to the direct LU for the Newton
//! correction system. Right preconditioning keeps the monitored residual the
//! true residual of J·Δx = −F, which is what the nonlinear solver needs when it
//! decides whether an inexact direction is usable.
//!
//! Implementation notes:
//! - Modified Gram-Schmidt with one reorthogonalization pass
//! - Givens rotations for the least-squares update
//! - Happy breakdown ends the cycle early
//! - Back-substitution skips (zeroes) vanishing pivots
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM.

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};
use num_traits::Float;

/// GMRES solver with restart.
pub struct GmresSolver<T> {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Convergence criteria (relative tolerance and max iterations)
    pub conv: Convergence<T>,
}

impl<T: Float> GmresSolver<T> {
    pub fn new(restart: usize, tol: T, max_iters: usize) -> Self {
        Self { restart: restart.max(1), conv: Convergence { tol, max_iters } }
    }

    /// Apply the stored rotations to column `j` of `h`, build the new one, and
    /// rotate `g`.
    fn apply_givens(h: &mut [Vec<T>], g: &mut [T], cs: &mut [T], sn: &mut [T], j: usize, epsilon: T) {
        for i in 0..j {
            let temp = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = temp;
        }
        let (a, b) = (h[j][j], h[j + 1][j]);
        let r = a.hypot(b);
        if r < epsilon {
            cs[j] = T::one();
            sn[j] = T::zero();
        } else {
            cs[j] = a / r;
            sn[j] = b / r;
        }
        h[j][j] = cs[j] * a + sn[j] * b;
        h[j + 1][j] = T::zero();
        let temp = cs[j] * g[j] + sn[j] * g[j + 1];
        g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
        g[j] = temp;
    }

    fn back_substitution(h: &[Vec<T>], g: &[T], m: usize, epsilon: T) -> Vec<T> {
        let mut y = vec![T::zero(); m];
        for i in (0..m).rev() {
            let mut s = g[i];
            for k in (i + 1)..m {
                s = s - h[i][k] * y[k];
            }
            y[i] = if h[i][i].abs() > epsilon { s / h[i][i] } else { T::zero() };
        }
        y
    }
}

fn residual<M, T>(a: &M, b: &[T], x: &[T]) -> Vec<T>
where
    M: MatVec<Vec<T>>,
    T: Float,
{
    let mut ax = vec![T::zero(); b.len()];
    a.matvec(&x.to_vec(), &mut ax);
    b.iter().zip(&ax).map(|(&bi, &axi)| bi - axi).collect()
}

impl<M, T> LinearSolver<M, Vec<T>> for GmresSolver<T>
where
    M: MatVec<Vec<T>>,
    (): InnerProduct<Vec<T>, Scalar = T>,
    T: Float + From<f64>,
{
    type Error = KError;
    type Scalar = T;

    /// Solve `a·x = b`; `x` holds the initial guess on entry.
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<M, Vec<T>>>,
        b: &Vec<T>,
        x: &mut Vec<T>,
    ) -> Result<SolveStats<T>, KError> {
        let n = b.len();
        if x.len() != n {
            return Err(KError::DimensionMismatch { expected: n, found: x.len() });
        }
        let ip = ();
        let epsilon = <T as From<f64>>::from(1e-14);
        let mut r = residual(a, b, x);
        let res0 = ip.norm(&r);
        let mut stats = SolveStats { iterations: 0, final_residual: res0, converged: res0 == T::zero() };
        if stats.converged {
            return Ok(stats);
        }

        let m_max = self.restart;
        let mut iteration = 0;
        while iteration < self.conv.max_iters {
            let beta = ip.norm(&r);
            let mut v_basis: Vec<Vec<T>> = Vec::with_capacity(m_max + 1);
            let mut z_basis: Vec<Vec<T>> = Vec::with_capacity(m_max);
            v_basis.push(r.iter().map(|&ri| ri / beta).collect());

            let mut h = vec![vec![T::zero(); m_max]; m_max + 1];
            let mut g = vec![T::zero(); m_max + 1];
            g[0] = beta;
            let mut cs = vec![T::zero(); m_max];
            let mut sn = vec![T::zero(); m_max];
            let mut m = 0;
            let mut stop = false;

            for j in 0..m_max {
                iteration += 1;
                // z_j = M⁻¹ v_j, w = A z_j
                let z = match pc {
                    Some(pc) => {
                        let mut z = vec![T::zero(); n];
                        pc.apply(&v_basis[j], &mut z)?;
                        z
                    }
                    None => v_basis[j].clone(),
                };
                let mut w = vec![T::zero(); n];
                a.matvec(&z, &mut w);
                z_basis.push(z);

                for _pass in 0..2 {
                    for i in 0..=j {
                        let hij = ip.dot(&w, &v_basis[i]);
                        h[i][j] = h[i][j] + hij;
                        for (wk, vk) in w.iter_mut().zip(&v_basis[i]) {
                            *wk = *wk - hij * *vk;
                        }
                    }
                }
                h[j + 1][j] = ip.norm(&w);
                let breakdown = h[j + 1][j] < epsilon;
                if !breakdown {
                    let inv = T::one() / h[j + 1][j];
                    v_basis.push(w.iter().map(|&wk| wk * inv).collect());
                }

                Self::apply_givens(&mut h, &mut g, &mut cs, &mut sn, j, epsilon);
                m = j + 1;
                let (done, s) = self.conv.check(g[j + 1].abs(), res0, iteration);
                stats = s;
                if done || breakdown {
                    stop = true;
                    break;
                }
            }

            let y = Self::back_substitution(&h, &g, m, epsilon);
            for (yj, zj) in y.iter().zip(&z_basis) {
                for (xi, zi) in x.iter_mut().zip(zj) {
                    *xi = *xi + *yj * *zi;
                }
            }

            r = residual(a, b, x);
            let res = ip.norm(&r);
            stats.iterations = iteration;
            stats.final_residual = res;
            stats.converged = res <= self.conv.tol * res0;
            if stats.converged || (stop && iteration >= self.conv.max_iters) {
                break;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditioner::Jacobi;
    use faer::Mat;

    fn system() -> (Mat<f64>, Vec<f64>, Vec<f64>) {
        let rows = [
            [4.0, 1.0, 0.0, 0.0],
            [1.0, 3.0, 1.0, 0.0],
            [0.0, 1.0, 2.0, 1.0],
            [0.5, 0.0, 1.0, 3.0],
        ];
        let a = Mat::from_fn(4, 4, |i, j| rows[i][j]);
        let x_true = vec![1.0, 2.0, 3.0, 4.0];
        let mut b = vec![0.0; 4];
        a.matvec(&x_true, &mut b);
        (a, b, x_true)
    }

    #[test]
    fn gmres_solves_well_conditioned_nonsym() {
        let (a, b, x_true) = system();
        let mut x = vec![0.0; 4];
        let mut solver = GmresSolver::new(4, 1e-10, 100);
        let stats = solver.solve(&a, None, &b, &mut x).unwrap();
        for (xi, ei) in x.iter().zip(&x_true) {
            assert!((xi - ei).abs() < 1e-8, "xi = {}, expected = {}", xi, ei);
        }
        assert!(stats.converged, "GMRES did not converge");
    }

    #[test]
    fn gmres_with_jacobi_restarts() {
        let (a, b, x_true) = system();
        let mut pc = Jacobi::new();
        Preconditioner::<Mat<f64>, Vec<f64>>::setup(&mut pc, &a).unwrap();
        let mut x = vec![0.0; 4];
        let mut solver = GmresSolver::new(2, 1e-10, 200);
        let stats = solver.solve(&a, Some(&pc), &b, &mut x).unwrap();
        assert!(stats.converged);
        for (xi, ei) in x.iter().zip(&x_true) {
            assert!((xi - ei).abs() < 1e-7);
        }
    }

    #[test]
    fn zero_rhs_returns_immediately() {
        let (a, _, _) = system();
        let mut x = vec![0.0; 4];
        let stats = GmresSolver::new(4, 1e-10, 10).solve(&a, None, &vec![0.0; 4], &mut x).unwrap();
        assert!(stats.converged);
        assert_eq!(stats.iterations, 0);
    }
}
