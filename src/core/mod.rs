//! Numeric backend: linear-algebra traits, faer wrappers, distributed norms
//! and the device-layer boundary.

pub mod loader;
pub mod traits;
pub mod wrappers;

pub use loader::{InitialConditions, LoadProvider};
pub use traits::{DiagonalAccess, Indexing, InnerProduct, MatTransVec, MatVec};
pub use wrappers::DistributedNorms;
