use crate::augment::{DiagonalShift, Partition};
use crate::core::traits::DiagonalAccess;

/// Gmin stepping: a conductance from every unknown in the partition to
/// reference.
///
/// The progress variable `p` is log10-scaled; the injected conductance is
/// `10^p − 10^end + floor`, never below `floor`. Sweeping `p` from +4 down to
/// `end` leaves exactly `floor` at the end of the sweep.
///
/// Unknowns whose Jacobian row came back from the device layer with no entry
/// at all (a node with no element attached) keep at least `10^end` for the
/// whole sweep, so they stay tied to reference at its end instead of leaving
/// the final system singular.
#[derive(Debug, Clone)]
pub struct GminStepping {
    partition: Partition,
    progress: f64,
    end: f64,
    floor: f64,
    shift: DiagonalShift,
    // Sorted rows of the partition found empty on the last fresh load.
    floating: Vec<usize>,
}

impl GminStepping {
    pub fn new(partition: Partition, progress: f64, end: f64, floor: f64) -> Self {
        Self { partition, progress, end, floor, shift: DiagonalShift::default(), floating: Vec::new() }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn set_progress(&mut self, p: f64) {
        self.progress = p;
    }

    pub fn conductance(&self) -> f64 {
        Self::conductance_at(self.progress, self.end, self.floor)
    }

    pub fn conductance_at(p: f64, end: f64, floor: f64) -> f64 {
        (10f64.powf(p) - 10f64.powf(end) + floor).max(floor)
    }

    /// Unknowns held by the end-of-sweep tie.
    pub fn floating(&self) -> &[usize] {
        &self.floating
    }

    fn tie(floating: &[usize], end: f64, g: f64, i: usize) -> f64 {
        if floating.binary_search(&i).is_ok() { g.max(10f64.powf(end)) } else { g }
    }

    pub fn augment_residual(&self, x: &[f64], f: &mut [f64]) {
        let g = self.conductance();
        for &i in self.partition.indices() {
            f[i] += Self::tie(&self.floating, self.end, g, i) * x[i];
        }
    }

    pub fn augment_jacobian<M: DiagonalAccess<f64> + ?Sized>(&mut self, jac: &mut M, load: u64) {
        if self.shift.is_fresh(load) {
            self.floating = self.partition.indices().iter().copied().filter(|&i| jac.row_is_zero(i)).collect();
        }
        let g = self.conductance();
        let (floating, end) = (&self.floating, self.end);
        self.shift.apply(jac, &self.partition, load, |i| Self::tie(floating, end, g, i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conductance_decays_to_floor() {
        let hi = GminStepping::conductance_at(4.0, -12.0, 0.0);
        let lo = GminStepping::conductance_at(-4.0, -12.0, 0.0);
        assert!(hi > lo);
        assert!((hi - 1e4).abs() < 1e-6);
        assert_eq!(GminStepping::conductance_at(-12.0, -12.0, 0.0), 0.0);
        assert_eq!(GminStepping::conductance_at(-12.0, -12.0, 1e-12), 1e-12);
        // Past the end the floor still holds.
        assert_eq!(GminStepping::conductance_at(-14.0, -12.0, 1e-12), 1e-12);
    }

    #[test]
    fn empty_rows_stay_tied_at_the_end_of_the_sweep() {
        let mut g = GminStepping::new(Partition::full(2), -4.0, -4.0, 0.0);
        let mut j = faer::Mat::<f64>::zeros(2, 2);
        j[(0, 0)] = 2e-3;
        g.augment_jacobian(&mut j, 1);
        assert_eq!(g.floating(), &[1]);
        assert_eq!(j[(0, 0)], 2e-3);
        assert!((j[(1, 1)] - 1e-4).abs() < 1e-16);

        let mut f = vec![0.0, 0.0];
        g.augment_residual(&[1.0, 2.0], &mut f);
        assert_eq!(f[0], 0.0);
        assert!((f[1] - 2e-4).abs() < 1e-16);
    }

    #[test]
    fn residual_adds_conductance_times_value() {
        let g = GminStepping::new(Partition::new(vec![1], 2).unwrap(), 0.0, -12.0, 0.0);
        let mut f = vec![1.0, 1.0];
        g.augment_residual(&[3.0, 3.0], &mut f);
        assert_eq!(f[0], 1.0);
        assert!((f[1] - (1.0 + 3.0 * (1.0 - 1e-12))).abs() < 1e-12);
    }
}
