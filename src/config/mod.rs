pub mod continuation;
pub mod options;

pub use continuation::{
    ContinuationOptions, DeviceContinuationOptions, GminOptions, ParameterSpec, PseudoTransientOptions, SolveType,
};
pub use options::{
    DebugWindow, LineSearch, LinearSolverKind, LinearSolverOptions, ModeOptions, NewtonMethod, NonlinearOptions,
    SolverOptions,
};
