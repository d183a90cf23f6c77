//! Communicators for the global reductions the nonlinear engine needs.
//!
//! Vectors are distributed by contiguous blocks of rows; every rank holds its
//! local slice. Norms, dot products and the global index of the largest
//! residual entry are assembled through the collectives below.

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Sum of `x` over all ranks.
    fn all_reduce(&self, x: f64) -> f64;
    /// Maximum of `x` over all ranks.
    fn all_reduce_max(&self, x: f64) -> f64;
    /// Sum of `x` over all ranks below this one.
    fn exclusive_scan(&self, x: usize) -> usize;
    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        let local = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f64>();
        self.all_reduce(local)
    }
    // Row-distributed matrix-vector product over the locally held rows
    fn parallel_mat_vec(&self, a: &faer::Mat<f64>, x: &[f64], y: &mut [f64]) {
        assert_eq!(a.ncols(), x.len());
        assert_eq!(a.nrows(), y.len());
        for i in 0..a.nrows() {
            y[i] = 0.0;
            for j in 0..a.ncols() {
                y[i] += a[(i, j)] * x[j];
            }
        }
    }
}

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

#[cfg(feature = "rayon")]
pub mod rayon_comm;
#[cfg(feature = "rayon")]
pub use rayon_comm::RayonComm;

/// Communicator selected at run time.
///
/// `Serial` is always available and is the default; the other variants exist
/// when their features are enabled.
#[derive(Default)]
pub enum UniverseComm {
    #[cfg(feature = "mpi")]
    Mpi(MpiComm),
    #[cfg(feature = "rayon")]
    Rayon(RayonComm),
    #[default]
    Serial,
}

impl std::fmt::Debug for UniverseComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => write!(f, "Mpi({}/{})", comm.rank, comm.size),
            #[cfg(feature = "rayon")]
            UniverseComm::Rayon(_) => f.write_str("Rayon"),
            UniverseComm::Serial => f.write_str("Serial"),
        }
    }
}

impl Comm for UniverseComm {
    fn rank(&self) -> usize {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.rank(),
            #[cfg(feature = "rayon")]
            UniverseComm::Rayon(comm) => comm.rank(),
            UniverseComm::Serial => 0,
        }
    }
    fn size(&self) -> usize {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.size(),
            #[cfg(feature = "rayon")]
            UniverseComm::Rayon(comm) => comm.size(),
            UniverseComm::Serial => 1,
        }
    }
    fn all_reduce(&self, x: f64) -> f64 {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_reduce(x),
            #[cfg(feature = "rayon")]
            UniverseComm::Rayon(comm) => comm.all_reduce(x),
            UniverseComm::Serial => x,
        }
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_reduce_max(x),
            #[cfg(feature = "rayon")]
            UniverseComm::Rayon(comm) => comm.all_reduce_max(x),
            UniverseComm::Serial => x,
        }
    }
    fn exclusive_scan(&self, x: usize) -> usize {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.exclusive_scan(x),
            #[cfg(feature = "rayon")]
            UniverseComm::Rayon(comm) => comm.exclusive_scan(x),
            UniverseComm::Serial => {
                let _ = x;
                0
            }
        }
    }
    fn parallel_mat_vec(&self, a: &faer::Mat<f64>, x: &[f64], y: &mut [f64]) {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.parallel_mat_vec(a, x, y),
            #[cfg(feature = "rayon")]
            UniverseComm::Rayon(comm) => comm.parallel_mat_vec(a, x, y),
            UniverseComm::Serial => {
                assert_eq!(a.ncols(), x.len());
                assert_eq!(a.nrows(), y.len());
                for (i, yi) in y.iter_mut().enumerate() {
                    *yi = (0..a.ncols()).map(|j| a[(i, j)] * x[j]).sum();
                }
            }
        }
    }
}
