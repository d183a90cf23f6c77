//! Core linear-algebra traits for knox.

/// Matrix–vector product: y ← A x.
pub trait MatVec<V> {
    /// Compute y = A · x.
    fn matvec(&self, x: &V, y: &mut V);
}

/// Transposed matrix–vector product: y ← Aᵀ x.
pub trait MatTransVec<V> {
    /// Compute y = Aᵀ · x.
    fn mattransvec(&self, x: &V, y: &mut V);
}

/// Inner products & norms.
pub trait InnerProduct<V> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd + From<f64>;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}

/// Uniform indexing into vectors (dense or sparse).
pub trait Indexing {
    /// Number of rows (or length for a vector).
    fn nrows(&self) -> usize;
}

/// Diagonal and row access needed by the augmentation strategies.
///
/// Every augmentation only touches the diagonal or replaces a whole row with
/// the identity, so this is the full surface they need from a Jacobian.
pub trait DiagonalAccess<T> {
    /// Copy of the diagonal.
    fn diagonal(&self) -> Vec<T>;
    /// Overwrite the diagonal with `d`.
    fn replace_diagonal(&mut self, d: &[T]);
    fn diagonal_entry(&self, i: usize) -> T;
    fn set_diagonal_entry(&mut self, i: usize, v: T);
    /// Zero row `i` and put a one on its diagonal.
    fn set_row_to_identity(&mut self, i: usize);
    /// Whether row `i` has no nonzero entry.
    fn row_is_zero(&self, i: usize) -> bool;
}
