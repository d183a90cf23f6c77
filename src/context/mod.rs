//! Solve contexts.
//!
//! Modules:
//! - [`ksp_context`]: linear-solve context for the Newton correction system
//!   (cached LU factors, lazily rebuilt GMRES preconditioner).
//! - [`pc_context`]: preconditioner selection.
//! - [`orchestrator`]: the nonlinear engine's entry point, one `solve()` per
//!   time point or operating condition.
//! - [`strategies`]: the solve-type branches the orchestrator dispatches to.
//!
//! # Example
//! ```rust,ignore
//! use knox::context::{AnalysisMode, SolverOrchestrator};
//! let mut engine = SolverOrchestrator::new(Box::new(circuit), UniverseComm::Serial, options)?;
//! engine.set_mode(AnalysisMode::DcOperatingPoint);
//! let code = engine.solve()?;
//! ```
//!
//! # References
//! - PETSc SNES/KSP manual pages: https://petsc.org/release/docs/manualpages/
//! - Kelley, C. T., Keyes, D. E. (1998). Convergence analysis of
//!   pseudo-transient continuation. SIAM J. Numer. Anal. 35(2).

pub mod ksp_context;
pub use ksp_context::KspContext;
pub mod orchestrator;
pub use orchestrator::{AnalysisMode, Session, SolverOrchestrator};
pub mod pc_context;
pub mod strategies;
pub use strategies::ContinuationContext;
