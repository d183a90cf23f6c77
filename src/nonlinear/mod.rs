//! Nonlinear drivers over a continuation state.

pub mod newton;
pub mod pseudo_transient;

pub use newton::{NewtonOutcome, NewtonSolver};
pub use pseudo_transient::{PseudoTransientDriver, PseudoTransientReport, PseudoTransientStatus};
