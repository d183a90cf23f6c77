// Jacobi preconditioner implementation

use crate::core::traits::{DiagonalAccess, Indexing};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use num_traits::Float;

/// Jacobi preconditioner: M⁻¹ = D⁻¹
///
/// Rows with a zero diagonal (ideal voltage sources, inductor branches) are
/// passed through unscaled.
pub struct Jacobi<T> {
    pub(crate) inv_diag: Vec<T>,
}

impl<T: Float> Jacobi<T> {
    /// new with empty state; user must call `setup`.
    pub fn new() -> Self {
        Self { inv_diag: Vec::new() }
    }
}

impl<T: Float> Default for Jacobi<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, V, T> Preconditioner<M, V> for Jacobi<T>
where
    M: DiagonalAccess<T> + Indexing,
    V: AsRef<[T]> + AsMut<[T]>,
    T: Float,
{
    fn setup(&mut self, a: &M) -> Result<(), KError> {
        self.inv_diag = a
            .diagonal()
            .into_iter()
            .map(|d| if d != T::zero() { T::one() / d } else { T::one() })
            .collect();
        Ok(())
    }

    fn apply(&self, x: &V, y: &mut V) -> Result<(), KError> {
        let x_ref = x.as_ref();
        if x_ref.len() != self.inv_diag.len() {
            return Err(KError::DimensionMismatch { expected: self.inv_diag.len(), found: x_ref.len() });
        }
        for ((yi, &xi), &di) in y.as_mut().iter_mut().zip(x_ref).zip(&self.inv_diag) {
            *yi = di * xi;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn zero_diagonal_passes_through() {
        let a = Mat::from_fn(2, 2, |i, j| match (i, j) {
            (0, 0) => 4.0,
            (1, 1) => 0.0,
            _ => 1.0,
        });
        let mut pc = Jacobi::new();
        Preconditioner::<Mat<f64>, Vec<f64>>::setup(&mut pc, &a).unwrap();
        let mut z = vec![0.0; 2];
        Preconditioner::<Mat<f64>, Vec<f64>>::apply(&pc, &vec![2.0, 3.0], &mut z).unwrap();
        assert_eq!(z, vec![0.5, 3.0]);
    }
}
