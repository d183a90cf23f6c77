//! Solver states over shared residual/Jacobian storage.
//!
//! A [`SharedNumericSystem`] holds the single mutable residual, Jacobian,
//! Newton-direction and gradient vectors for one analysis. Any number of
//! [`SolverState`]s (and the [`ContinuationState`] that decorates one) may
//! exist; each carries its own solution vector and validity flags, and the
//! shared system records which state owns each quantity. A state's quantity
//! reads as valid only if its own flag says so *and* it is still the owner.
//!
//! Writes to shared storage require the [`OwnerHandle`] the system minted for
//! the writing state. Handles are not `Clone`, so the only way to obtain one
//! is `SharedNumericSystem::register`.

use bitflags::bitflags;

pub mod continuation;
pub mod shared;
pub mod state;

pub use continuation::{ContinuationParameters, ContinuationState, HOMOTOPY_PARAMETER, PROGRESS_PARAMETER};
pub use shared::SharedNumericSystem;
pub use state::{ComputeHooks, NoHooks, ResidualNorms, SolverState};

bitflags! {
    /// Shared quantities whose ownership is tracked.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Quantity: u8 {
        const RESIDUAL  = 0b0_0001;
        const JACOBIAN  = 0b0_0010;
        const NEWTON    = 0b0_0100;
        const GRADIENT  = 0b0_1000;
        /// Device state refreshed by the last residual load.
        const AUX_STATE = 0b1_0000;
    }
}

impl Quantity {
    pub(crate) const COUNT: usize = 5;

    pub(crate) fn slot(self) -> usize {
        self.bits().trailing_zeros() as usize
    }
}

/// Per-quantity cache state of one solver state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Validity {
    #[default]
    Stale,
    Computing,
    Valid,
}

/// Identity of a registered solver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Write capability over shared storage, minted by
/// [`SharedNumericSystem::register`].
#[derive(Debug, PartialEq, Eq)]
pub struct OwnerHandle {
    id: OwnerId,
}

impl OwnerHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self { id: OwnerId(raw) }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }
}
