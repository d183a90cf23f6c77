//! Preconditioners for the iterative Newton-correction solve.
//!
//! Circuit Jacobians are small-bandwidth but badly scaled (conductances span
//! many decades), so the two kept here are diagonal scaling and ILU(0).

use crate::error::KError;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<M, V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &V, z: &mut V) -> Result<(), KError>;
    /// Setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), KError> { Ok(()) }
}

pub mod ilu;
pub mod jacobi;

pub use ilu::Ilu0;
pub use jacobi::Jacobi;

pub use crate::context::pc_context::PC;
