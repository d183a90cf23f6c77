use crate::augment::{GminStepping, Partition};
use crate::core::traits::DiagonalAccess;
use crate::error::KError;

/// Holds the unknowns of a partition at fixed values.
///
/// The clamped residual row is `x_i − v_i` and the Jacobian row is the
/// identity, so a Newton step moves each clamped unknown straight onto its
/// value and leaves it there, whatever the conditioning of the rest of the
/// system.
#[derive(Debug, Clone)]
pub struct InitialConditionClamp {
    partition: Partition,
    values: Vec<f64>,
}

impl InitialConditionClamp {
    /// `values` are in partition order.
    pub fn new(partition: Partition, values: Vec<f64>) -> Result<Self, KError> {
        if partition.len() != values.len() {
            return Err(KError::Partition(format!(
                "{} clamp values for {} clamped unknowns",
                values.len(),
                partition.len()
            )));
        }
        Ok(Self { partition, values })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Write the clamp values into `x`.
    pub fn impose(&self, x: &mut [f64]) {
        for (&i, &v) in self.partition.indices().iter().zip(&self.values) {
            x[i] = v;
        }
    }

    pub fn augment_residual(&self, x: &[f64], f: &mut [f64]) {
        for (&i, &v) in self.partition.indices().iter().zip(&self.values) {
            f[i] = x[i] - v;
        }
    }

    pub fn augment_jacobian<M: DiagonalAccess<f64> + ?Sized>(&self, jac: &mut M) {
        for &i in self.partition.indices() {
            jac.set_row_to_identity(i);
        }
    }
}

/// Gmin on one partition, initial-condition clamp on another.
///
/// The partitions may overlap; the clamp runs last and wins.
#[derive(Debug, Clone)]
pub struct ClampWithGmin {
    gmin: GminStepping,
    clamp: InitialConditionClamp,
}

impl ClampWithGmin {
    pub fn new(gmin: GminStepping, clamp: InitialConditionClamp) -> Self {
        Self { gmin, clamp }
    }

    pub fn gmin(&self) -> &GminStepping {
        &self.gmin
    }

    pub fn gmin_mut(&mut self) -> &mut GminStepping {
        &mut self.gmin
    }

    pub fn clamp(&self) -> &InitialConditionClamp {
        &self.clamp
    }

    pub fn augment_residual(&self, x: &[f64], f: &mut [f64]) {
        self.gmin.augment_residual(x, f);
        self.clamp.augment_residual(x, f);
    }

    pub fn augment_jacobian<M: DiagonalAccess<f64> + ?Sized>(&mut self, jac: &mut M, load: u64) {
        self.gmin.augment_jacobian(jac, load);
        self.clamp.augment_jacobian(jac);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn clamp_residual_vanishes_at_value() {
        let c = InitialConditionClamp::new(Partition::new(vec![1], 3).unwrap(), vec![2.5]).unwrap();
        let mut f = vec![7.0, 7.0, 7.0];
        c.augment_residual(&[0.0, 2.5, 0.0], &mut f);
        assert_eq!(f, vec![7.0, 0.0, 7.0]);
        c.augment_residual(&[0.0, 1.0, 0.0], &mut f);
        assert_eq!(f[1], -1.5);
    }

    #[test]
    fn clamp_wins_over_gmin_on_overlap() {
        let part = Partition::full(2);
        let mut cg = ClampWithGmin::new(
            GminStepping::new(part.clone(), 2.0, -12.0, 0.0),
            InitialConditionClamp::new(Partition::new(vec![0], 2).unwrap(), vec![1.0]).unwrap(),
        );
        let mut j = Mat::from_fn(2, 2, |_, _| 1.0);
        cg.augment_jacobian(&mut j, 1);
        assert_eq!(j[(0, 0)], 1.0);
        assert_eq!(j[(0, 1)], 0.0);
        assert!(j[(1, 1)] > 100.0);
        let mut f = vec![0.0, 0.0];
        cg.augment_residual(&[3.0, 1.0], &mut f);
        assert_eq!(f[0], 2.0);
    }

    #[test]
    fn mismatched_values_are_rejected() {
        assert!(InitialConditionClamp::new(Partition::full(2), vec![1.0]).is_err());
    }
}
