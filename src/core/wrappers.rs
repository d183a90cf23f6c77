//! Wrappers for faer dense matrix types and distributed vector reductions.
//!
//! This module implements the core linear-algebra traits for `faer::Mat` and
//! `Vec<T>` so the linear solvers and augmentation strategies can be written
//! generically, and provides [`DistributedNorms`], the set of global norms the
//! convergence battery is built on (2-norm, max-norm with its global index,
//! weighted RMS, finiteness).
//!
//! Reductions over the local slice use rayon parallel iterators when the
//! `rayon` feature is enabled; the communicator then combines the per-rank
//! partial results.
//!
//! # References
//! - [faer crate documentation](https://docs.rs/faer)
//! - Hairer & Wanner, *Solving ODEs II*, §IV.8 (weighted RMS error norms)

use crate::core::traits::{DiagonalAccess, Indexing, InnerProduct, MatTransVec, MatVec};
use crate::parallel::Comm;
use faer::Mat;
use num_traits::Float;

/// Implements matrix-vector multiplication for `faer::Mat`.
///
/// Computes `y = A * x` where `A` is a dense matrix, `x` and `y` are vectors.
impl<T: Float> MatVec<Vec<T>> for Mat<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        assert_eq!(self.nrows(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.ncols(), x.len(), "Input vector x has incorrect length");
        for i in 0..self.nrows() {
            y[i] = T::zero();
            for j in 0..self.ncols() {
                y[i] = y[i] + self[(i, j)] * x[j];
            }
        }
    }
}

/// Implements matrix-transpose-vector multiplication for `faer::Mat`.
///
/// Computes `y = A^T * x`.
impl<T: Float> MatTransVec<Vec<T>> for Mat<T> {
    fn mattransvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        assert_eq!(self.ncols(), y.len(), "Output vector y has incorrect length");
        assert_eq!(self.nrows(), x.len(), "Input vector x has incorrect length");
        for j in 0..self.ncols() {
            y[j] = T::zero();
            for i in 0..self.nrows() {
                y[j] = y[j] + self[(i, j)] * x[i];
            }
        }
    }
}

/// Implements inner product and norm for vectors, with optional Rayon parallelism.
impl<T: Float + From<f64> + Send + Sync> InnerProduct<Vec<T>> for () {
    type Scalar = T;
    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.as_slice()
                .par_iter()
                .zip(y.as_slice().par_iter())
                .map(|(xi, yi)| *xi * *yi)
                .reduce(|| T::zero(), |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter()
                .zip(y.iter())
                .map(|(xi, yi)| *xi * *yi)
                .fold(T::zero(), |acc, v| acc + v)
        }
    }
    fn norm(&self, x: &Vec<T>) -> T {
        self.dot(x, x).sqrt()
    }
}

/// Diagonal and row access on a dense faer matrix.
impl<T: Float> DiagonalAccess<T> for Mat<T> {
    fn diagonal(&self) -> Vec<T> {
        let n = self.nrows().min(self.ncols());
        (0..n).map(|i| self[(i, i)]).collect()
    }

    fn replace_diagonal(&mut self, d: &[T]) {
        let n = self.nrows().min(self.ncols());
        assert_eq!(n, d.len(), "diagonal has incorrect length");
        for (i, &v) in d.iter().enumerate() {
            self[(i, i)] = v;
        }
    }

    fn diagonal_entry(&self, i: usize) -> T {
        self[(i, i)]
    }

    fn set_diagonal_entry(&mut self, i: usize, v: T) {
        self[(i, i)] = v;
    }

    fn set_row_to_identity(&mut self, i: usize) {
        for j in 0..self.ncols() {
            self[(i, j)] = T::zero();
        }
        self[(i, i)] = T::one();
    }

    fn row_is_zero(&self, i: usize) -> bool {
        (0..self.ncols()).all(|j| self[(i, j)] == T::zero())
    }
}

/// Global norms over row-distributed vectors.
///
/// Each rank passes its local slice; the communicator combines the partial
/// results so every rank sees the same value.
pub struct DistributedNorms<'a, C: Comm> {
    /// Reference to the communicator implementing the `Comm` trait.
    pub comm: &'a C,
}

impl<'a, C: Comm> DistributedNorms<'a, C> {
    pub fn new(comm: &'a C) -> Self {
        Self { comm }
    }

    /// Global length of a distributed vector.
    pub fn global_len(&self, x: &[f64]) -> usize {
        self.comm.all_reduce(x.len() as f64) as usize
    }

    /// Computes the distributed dot product of two slices.
    pub fn dot(&self, x: &[f64], y: &[f64]) -> f64 {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        self.comm.all_reduce(local_sum(x.len(), |i| x[i] * y[i]))
    }

    /// ‖x‖₂ over all ranks.
    pub fn norm_2(&self, x: &[f64]) -> f64 {
        self.comm.all_reduce(local_sum(x.len(), |i| x[i] * x[i])).sqrt()
    }

    /// ‖x‖∞ over all ranks.
    pub fn norm_inf(&self, x: &[f64]) -> f64 {
        self.max_abs(x).0
    }

    /// Largest |x_i| and its global index.
    ///
    /// Ties across ranks resolve to the lowest global index. An empty vector
    /// reports `(0.0, 0)`.
    pub fn max_abs(&self, x: &[f64]) -> (f64, usize) {
        let (local_idx, local_max) = x
            .iter()
            .enumerate()
            .fold((0usize, 0.0f64), |(bi, bv), (i, &v)| {
                if v.abs() > bv { (i, v.abs()) } else { (bi, bv) }
            });
        let global_max = self.comm.all_reduce_max(local_max);
        let offset = self.comm.exclusive_scan(x.len());
        // Max-reduce of the negated candidate picks the smallest index.
        let candidate = if !x.is_empty() && local_max == global_max {
            -((offset + local_idx) as f64)
        } else {
            f64::NEG_INFINITY
        };
        let best = self.comm.all_reduce_max(candidate);
        let index = if best.is_finite() { (-best) as usize } else { 0 };
        (global_max, index)
    }

    /// Weighted root-mean-square norm of `dx`:
    /// `sqrt( (1/N) Σ (dx_i / w_i)² )` with `w_i = abs_tol + rel_tol · max(|x_i|, |x_ref_i|)`.
    pub fn wrms(&self, dx: &[f64], x: &[f64], x_ref: &[f64], abs_tol: f64, rel_tol: f64) -> f64 {
        assert_eq!(dx.len(), x.len(), "Vectors must have the same length");
        assert_eq!(dx.len(), x_ref.len(), "Vectors must have the same length");
        let n = self.global_len(dx);
        if n == 0 {
            return 0.0;
        }
        let local = local_sum(dx.len(), |i| {
            let w = abs_tol + rel_tol * x[i].abs().max(x_ref[i].abs());
            let r = dx[i] / w;
            r * r
        });
        (self.comm.all_reduce(local) / n as f64).sqrt()
    }

    /// True when no rank holds a NaN or infinite entry.
    pub fn all_finite(&self, x: &[f64]) -> bool {
        let bad = x.iter().any(|v| v.is_nan() || v.is_infinite());
        self.comm.all_reduce_max(if bad { 1.0 } else { 0.0 }) == 0.0
    }
}

fn local_sum<F: Fn(usize) -> f64 + Sync + Send>(n: usize, f: F) -> f64 {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..n).into_par_iter().map(f).sum()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..n).map(f).sum()
    }
}

/// Implements the `Indexing` trait for `Vec<T>`, treating a vector as a column vector.
impl<T> Indexing for Vec<T> {
    fn nrows(&self) -> usize {
        self.len()
    }
}

/// Implements the `Indexing` trait for `faer::Mat`, returning the number of rows.
impl<T> Indexing for Mat<T> {
    fn nrows(&self) -> usize {
        self.nrows()
    }
}
