//! knox: nonlinear solve and continuation engine for circuit simulation.
//!
//! Finds x with F(x) = 0 at a time point or operating condition, using Newton
//! with optional globalization: Gmin stepping, pseudo-transient continuation,
//! natural-parameter and device-family continuation, and artificial-parameter
//! homotopy. The device layer supplies residuals and Jacobians through
//! [`LoadProvider`]; the engine owns the shared residual/Jacobian storage, the
//! linear solves and the convergence classification.

pub mod parallel;

pub mod augment;
pub mod config;
pub mod context;
pub mod continuation;
pub mod core;
pub mod error;
pub mod group;
pub mod nonlinear;
pub mod preconditioner;
pub mod solver;
pub mod status;
pub mod utils;

// Re-exports for convenience
pub use augment::{Augmentation, Partition};
pub use config::{ContinuationOptions, ModeOptions, NonlinearOptions, ParameterSpec, SolveType, SolverOptions};
pub use context::{AnalysisMode, SolverOrchestrator};
pub use core::{InitialConditions, LoadProvider};
pub use error::KError;
pub use group::{ContinuationState, SharedNumericSystem, SolverState};
pub use nonlinear::{NewtonOutcome, NewtonSolver};
pub use parallel::UniverseComm;
pub use status::{CheckStatus, ConvergenceBattery, ReturnCodes, Verdict, CONTINUATION_FAILED};

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
