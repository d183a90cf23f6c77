use crate::augment::{DiagonalShift, Partition};
use crate::core::traits::DiagonalAccess;

/// Pseudo-transient continuation term `(1/Δτ)·S` on the Jacobian diagonal.
///
/// `S` is `voltage_scale` on the voltage partition and `other_scale`
/// elsewhere. The residual is left untouched, so a converged pseudo-time
/// march is a steady state of the original system. Δτ follows switched
/// evolution relaxation: it grows with the residual-norm reduction between
/// accepted steps.
#[derive(Debug, Clone)]
pub struct PseudoTransient {
    voltage: Partition,
    all: Partition,
    dt: f64,
    dt_min: f64,
    dt_max: f64,
    voltage_scale: f64,
    other_scale: f64,
    last_norm: Option<f64>,
    shift: DiagonalShift,
}

impl PseudoTransient {
    pub fn new(voltage: Partition, n: usize, dt: f64, dt_min: f64, dt_max: f64, voltage_scale: f64, other_scale: f64) -> Self {
        Self {
            voltage,
            all: Partition::full(n),
            dt: dt.clamp(dt_min, dt_max),
            dt_min,
            dt_max,
            voltage_scale,
            other_scale,
            last_norm: None,
            shift: DiagonalShift::default(),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.voltage
    }

    pub fn step(&self) -> f64 {
        self.dt
    }

    pub fn set_step(&mut self, dt: f64) {
        self.dt = dt.clamp(self.dt_min, self.dt_max);
    }

    /// Accept a step whose residual norm was `norm`; returns the new Δτ.
    pub fn update_step(&mut self, norm: f64) -> f64 {
        if let Some(prev) = self.last_norm
            && norm > 0.0
            && prev.is_finite()
        {
            self.set_step(self.dt * prev / norm);
        }
        self.last_norm = Some(norm);
        self.dt
    }

    /// Cut Δτ after a non-finite evaluation. Returns `false` when already at
    /// the minimum.
    pub fn halve_step(&mut self) -> bool {
        if self.dt <= self.dt_min {
            return false;
        }
        self.set_step(self.dt * 0.5);
        true
    }

    pub fn reached_max_step(&self) -> bool {
        self.dt >= self.dt_max
    }

    pub fn augment_jacobian<M: DiagonalAccess<f64> + ?Sized>(&mut self, jac: &mut M, load: u64) {
        let inv = 1.0 / self.dt;
        let (voltage, vs, os) = (&self.voltage, self.voltage_scale, self.other_scale);
        self.shift
            .apply(jac, &self.all, load, |i| if voltage.contains(i) { vs * inv } else { os * inv });
    }
}
