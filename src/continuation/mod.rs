//! Outer continuation drivers.
//!
//! [`NaturalStepper`] walks one parameter (and any coupled ones) from start to
//! end with step-size control. [`HomotopyBlend`] is the artificial-parameter
//! embedding the homotopy solve type steps through.

pub mod homotopy;
pub mod natural;

pub use homotopy::HomotopyBlend;
pub use natural::{ContinuationReport, ContinuationStatus, NaturalStepper, ParameterPath};
