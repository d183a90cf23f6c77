//! ILU(0) factorization with zero fill (Saad §10.3, Algorithm 10.4).

use crate::error::KError;
use crate::preconditioner::Preconditioner;
use faer::Mat;
use num_traits::Float;

/// Incomplete LU restricted to the nonzero pattern of A.
///
/// L (unit lower) and U share one matrix.
pub struct Ilu0<T> {
    pub(crate) lu: Mat<T>,
}

impl<T: Float> Ilu0<T> {
    pub fn new() -> Self {
        Self { lu: Mat::from_fn(0, 0, |_, _| T::zero()) }
    }
}

impl<T: Float> Default for Ilu0<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Float> Preconditioner<Mat<T>, Vec<T>> for Ilu0<T> {
    fn setup(&mut self, a: &Mat<T>) -> Result<(), KError> {
        let n = a.nrows();
        let mut w = Mat::from_fn(n, n, |i, j| a[(i, j)]);
        for i in 0..n {
            for k in 0..i {
                if a[(i, k)] == T::zero() {
                    continue;
                }
                let pivot = w[(k, k)];
                if pivot == T::zero() {
                    return Err(KError::ZeroPivot(k));
                }
                let lik = w[(i, k)] / pivot;
                w[(i, k)] = lik;
                for j in (k + 1)..n {
                    if a[(i, j)] != T::zero() {
                        w[(i, j)] = w[(i, j)] - lik * w[(k, j)];
                    }
                }
            }
            if w[(i, i)] == T::zero() {
                return Err(KError::ZeroPivot(i));
            }
        }
        self.lu = w;
        Ok(())
    }

    fn apply(&self, x: &Vec<T>, y: &mut Vec<T>) -> Result<(), KError> {
        let n = self.lu.nrows();
        if x.len() != n {
            return Err(KError::DimensionMismatch { expected: n, found: x.len() });
        }
        let mut z = x.clone();
        // L z = x
        for i in 0..n {
            for j in 0..i {
                z[i] = z[i] - self.lu[(i, j)] * z[j];
            }
        }
        // U y = z
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                z[i] = z[i] - self.lu[(i, j)] * z[j];
            }
            z[i] = z[i] / self.lu[(i, i)];
        }
        *y = z;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tridiagonal_ilu_is_exact() {
        let n = 5;
        let a = Mat::from_fn(n, n, |i, j| {
            if i == j { 2.0 } else if i.abs_diff(j) == 1 { -1.0 } else { 0.0 }
        });
        let mut pc = Ilu0::new();
        pc.setup(&a).unwrap();
        let x_true = vec![1.0; n];
        let b: Vec<f64> = (0..n).map(|i| (0..n).map(|j| a[(i, j)] * x_true[j]).sum()).collect();
        let mut y = vec![0.0; n];
        pc.apply(&b, &mut y).unwrap();
        for yi in y {
            assert!((yi - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_pivot_is_reported() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 0.0 } else { 1.0 });
        let mut pc = Ilu0::new();
        assert!(matches!(pc.setup(&a), Err(KError::ZeroPivot(0))));
    }
}
