use crate::augment::Partition;
use crate::core::traits::DiagonalAccess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPhase {
    /// Nothing applied yet.
    Pending,
    /// Residual rows zeroed; the next Jacobian gets identity rows.
    Applied,
    /// Used up; both hooks are no-ops.
    Spent,
}

/// Pins the unknowns matched by a restart (operating-point) file for the
/// first Newton step only.
///
/// The matched values are expected to already sit in the solution vector.
#[derive(Debug, Clone)]
pub struct OperatingPointSeed {
    partition: Partition,
    phase: SeedPhase,
}

impl OperatingPointSeed {
    pub fn new(partition: Partition) -> Self {
        Self { partition, phase: SeedPhase::Pending }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn phase(&self) -> SeedPhase {
        self.phase
    }

    pub fn augment_residual(&mut self, f: &mut [f64]) {
        if self.phase != SeedPhase::Pending {
            return;
        }
        for &i in self.partition.indices() {
            f[i] = 0.0;
        }
        self.phase = SeedPhase::Applied;
    }

    pub fn augment_jacobian<M: DiagonalAccess<f64> + ?Sized>(&mut self, jac: &mut M) {
        if self.phase != SeedPhase::Applied {
            return;
        }
        for &i in self.partition.indices() {
            jac.set_row_to_identity(i);
        }
        self.phase = SeedPhase::Spent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn seed_applies_once() {
        let mut s = OperatingPointSeed::new(Partition::new(vec![0], 2).unwrap());
        let mut f = vec![3.0, 4.0];
        s.augment_residual(&mut f);
        assert_eq!(f, vec![0.0, 4.0]);
        let mut j = Mat::from_fn(2, 2, |_, _| 2.0);
        s.augment_jacobian(&mut j);
        assert_eq!((j[(0, 0)], j[(0, 1)]), (1.0, 0.0));
        assert_eq!(s.phase(), SeedPhase::Spent);

        let mut f = vec![3.0, 4.0];
        s.augment_residual(&mut f);
        assert_eq!(f, vec![3.0, 4.0]);
    }
}
