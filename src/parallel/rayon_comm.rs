// rayon-based shared-memory communicator

use rayon::prelude::*;

/// Single address space: every collective is the identity, mat-vec rows are
/// split across the global rayon pool.
pub struct RayonComm;

impl RayonComm {
    pub fn new() -> Self {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .build_global()
            .ok();
        RayonComm
    }
}

impl Default for RayonComm {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Comm for RayonComm {
    fn rank(&self) -> usize { 0 }
    fn size(&self) -> usize { 1 }
    fn all_reduce(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        x
    }
    fn exclusive_scan(&self, _x: usize) -> usize {
        0
    }
    fn parallel_mat_vec(&self, a: &faer::Mat<f64>, x: &[f64], y: &mut [f64]) {
        assert_eq!(a.ncols(), x.len());
        assert_eq!(a.nrows(), y.len());
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            *yi = (0..a.ncols()).map(|j| a[(i, j)] * x[j]).sum();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::Comm;

    #[test]
    fn rayon_mat_vec_matches_serial() {
        let comm = RayonComm::new();
        let a = faer::Mat::from_fn(3, 3, |i, j| if i == j { 2.0 } else { 1.0 });
        let mut y = vec![0.0; 3];
        comm.parallel_mat_vec(&a, &[1.0, 2.0, 3.0], &mut y);
        assert_eq!(y, vec![7.0, 8.0, 9.0]);
        assert_eq!(comm.exclusive_scan(3), 0);
    }
}
