use thiserror::Error;

use crate::group::Quantity;

// Unified error type for knox.
//
// Only consistency errors live here. Numerical non-convergence is reported
// through the signed codes in `status::codes`, never as an `Err`.

#[derive(Error, Debug)]
pub enum KError {
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("{quantity:?} requested before {requires:?} is valid for the current solution")]
    Prerequisite { quantity: Quantity, requires: Quantity },
    #[error("{0:?} is not valid for the current solution")]
    Stale(Quantity),
    #[error("write to {quantity:?} by a state that does not own it")]
    NotOwner { quantity: Quantity },
    #[error("reentrant compute of {0}")]
    Reentrant(&'static str),
    #[error("inconsistent partition: {0}")]
    Partition(String),
    #[error("invalid dispatch: {0}")]
    Dispatch(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}
