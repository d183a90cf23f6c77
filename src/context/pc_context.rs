//! Preconditioner selection for the iterative linear solve.
//!
//! # Example
//!
//! ```rust
//! use knox::context::pc_context::PC;
//! let pc = PC::Ilu0;
//! assert!(pc.build().is_some());
//! ```

use faer::Mat;
use serde::{Deserialize, Serialize};

use crate::preconditioner::{Ilu0, Jacobi, Preconditioner};

/// Unified preconditioner enum for all supported types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PC {
    /// Unpreconditioned.
    None,
    /// Jacobi (diagonal scaling) preconditioner.
    #[default]
    Jacobi,
    /// Incomplete LU factorization with zero fill-in (ILU(0)).
    Ilu0,
}

impl PC {
    /// Fresh, not yet set up, preconditioner object for this selection.
    pub fn build(self) -> Option<Box<dyn Preconditioner<Mat<f64>, Vec<f64>>>> {
        match self {
            PC::None => None,
            PC::Jacobi => Some(Box::new(Jacobi::<f64>::new())),
            PC::Ilu0 => Some(Box::new(Ilu0::<f64>::new())),
        }
    }
}
