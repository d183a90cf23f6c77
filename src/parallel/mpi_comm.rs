//! MPI-based communicator.
//!
//! Wraps the world communicator of an initialized MPI universe and provides
//! the sum/max all-reduce and exclusive-scan collectives used by the
//! distributed norms. Only available with the `mpi` feature.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "mpi")]
//! # {
//! use knox::parallel::{Comm, MpiComm};
//! let comm = MpiComm::new().expect("MPI initialization");
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! # }
//! ```

use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use crate::error::KError;

/// MPI communicator wrapper for distributed parallelism.
pub struct MpiComm {
    /// The MPI world communicator (all processes in the job).
    pub world: SimpleCommunicator,
    /// The rank (ID) of this process within the communicator.
    pub rank: usize,
    /// The total number of processes in the communicator.
    pub size: usize,
    // Finalizes MPI on drop.
    _universe: Universe,
}

impl MpiComm {
    /// Initializes MPI and constructs a new `MpiComm`.
    ///
    /// Fails if MPI was already initialized in this process.
    pub fn new() -> Result<Self, KError> {
        let universe = mpi::initialize()
            .ok_or_else(|| KError::Config("MPI already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { world, rank, size, _universe: universe })
    }
}

impl super::Comm for MpiComm {
    fn rank(&self) -> usize { self.rank }
    fn size(&self) -> usize { self.size }

    fn all_reduce(&self, x: f64) -> f64 {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, SystemOperation::sum());
        y
    }

    fn all_reduce_max(&self, x: f64) -> f64 {
        let mut y = x;
        self.world.all_reduce_into(&x, &mut y, SystemOperation::max());
        y
    }

    fn exclusive_scan(&self, x: usize) -> usize {
        let send = x as u64;
        let mut recv = 0u64;
        self.world.exclusive_scan_into(&send, &mut recv, SystemOperation::sum());
        // MPI leaves the receive buffer undefined on rank 0.
        if self.rank == 0 { 0 } else { recv as usize }
    }
}
