//! Convergence classification and the signed result codes of a solve.

pub mod battery;
pub mod codes;

pub use battery::{ConvergenceBattery, Redirection, IterationSnapshot};
pub use codes::{CheckStatus, ReturnCodes, Verdict, CONTINUATION_FAILED};
