//! Linear-system augmentations that globalize Newton.
//!
//! Each strategy is a pure transformation of an already computed residual
//! and Jacobian: it adds a correction on a partition of the unknowns to the
//! residual and the matching term to the Jacobian diagonal, or replaces rows
//! with the identity. [`Augmentation`] is the closed set of strategies; the
//! continuation state calls its two hooks after every load.
//!
//! Jacobian hooks touch only the diagonal (or whole identity rows) and are
//! idempotent per load: re-augmenting the same Jacobian load swaps the old
//! shift for the current one, while a new load always gets the full shift.

pub mod clamp;
pub mod gmin;
pub mod pseudo_transient;
pub mod seed;

pub use clamp::{ClampWithGmin, InitialConditionClamp};
pub use gmin::GminStepping;
pub use pseudo_transient::PseudoTransient;
pub use seed::{OperatingPointSeed, SeedPhase};

use crate::core::traits::DiagonalAccess;
use crate::error::KError;

/// Sorted, duplicate-free set of local unknown indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    indices: Vec<usize>,
    n: usize,
}

impl Partition {
    /// Build a partition of `0..n`. Out-of-range indices are a configuration
    /// error.
    pub fn new(mut indices: Vec<usize>, n: usize) -> Result<Self, KError> {
        indices.sort_unstable();
        indices.dedup();
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(KError::Partition(format!("index {bad} outside 0..{n}")));
        }
        Ok(Self { indices, n })
    }

    /// Every unknown.
    pub fn full(n: usize) -> Self {
        Self { indices: (0..n).collect(), n }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn contains(&self, i: usize) -> bool {
        self.indices.binary_search(&i).is_ok()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Size of the vector this partition was built against.
    pub fn universe(&self) -> usize {
        self.n
    }

    pub(crate) fn check(&self, n: usize, what: &str) -> Result<(), KError> {
        if self.n != n {
            return Err(KError::Partition(format!(
                "{what} partition built for {} unknowns, system has {n}",
                self.n
            )));
        }
        Ok(())
    }
}

/// Remembers the last diagonal shift and the Jacobian load it went onto, so
/// a repeated augment of the same load restores the base value before adding
/// the shift again.
#[derive(Debug, Clone, Default)]
pub(crate) struct DiagonalShift {
    load: Option<u64>,
    applied: Vec<f64>,
}

impl DiagonalShift {
    /// Whether `load` has not been shifted yet.
    pub(crate) fn is_fresh(&self, load: u64) -> bool {
        self.load != Some(load)
    }

    pub(crate) fn apply<M, F>(&mut self, jac: &mut M, partition: &Partition, load: u64, shift: F)
    where
        M: DiagonalAccess<f64> + ?Sized,
        F: Fn(usize) -> f64,
    {
        let again = !self.is_fresh(load) && self.applied.len() == partition.len();
        let mut applied = Vec::with_capacity(partition.len());
        for (k, &i) in partition.indices().iter().enumerate() {
            let d = jac.diagonal_entry(i);
            let s = shift(i);
            let value = match again {
                true if s == self.applied[k] => d,
                true => d - self.applied[k] + s,
                false => d + s,
            };
            jac.set_diagonal_entry(i, value);
            applied.push(s);
        }
        self.load = Some(load);
        self.applied = applied;
    }
}

/// The closed set of augmentation strategies.
#[derive(Debug, Clone)]
pub enum Augmentation {
    Gmin(GminStepping),
    PseudoTransient(PseudoTransient),
    Clamp(InitialConditionClamp),
    ClampWithGmin(ClampWithGmin),
    Seed(OperatingPointSeed),
}

impl Augmentation {
    pub fn name(&self) -> &'static str {
        match self {
            Augmentation::Gmin(_) => "gmin-stepping",
            Augmentation::PseudoTransient(_) => "pseudo-transient",
            Augmentation::Clamp(_) => "initial-condition-clamp",
            Augmentation::ClampWithGmin(_) => "initial-condition-clamp-with-gmin",
            Augmentation::Seed(_) => "operating-point-seed",
        }
    }

    /// Partitions must be built against the system's unknown count.
    pub fn validate(&self, n: usize) -> Result<(), KError> {
        match self {
            Augmentation::Gmin(g) => g.partition().check(n, "gmin"),
            Augmentation::PseudoTransient(p) => p.partition().check(n, "pseudo-transient"),
            Augmentation::Clamp(c) => c.partition().check(n, "clamp"),
            Augmentation::ClampWithGmin(c) => {
                c.gmin().partition().check(n, "gmin")?;
                c.clamp().partition().check(n, "clamp")
            }
            Augmentation::Seed(s) => s.partition().check(n, "seed"),
        }
    }

    /// Update the strategy's progress variable.
    pub fn set_progress(&mut self, value: f64) -> Result<(), KError> {
        match self {
            Augmentation::Gmin(g) => {
                g.set_progress(value);
                Ok(())
            }
            Augmentation::ClampWithGmin(c) => {
                c.gmin_mut().set_progress(value);
                Ok(())
            }
            Augmentation::PseudoTransient(p) => {
                p.set_step(value);
                Ok(())
            }
            Augmentation::Clamp(_) | Augmentation::Seed(_) => {
                Err(KError::Dispatch(format!("{} has no progress variable", self.name())))
            }
        }
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            Augmentation::Gmin(g) => Some(g.progress()),
            Augmentation::ClampWithGmin(c) => Some(c.gmin().progress()),
            Augmentation::PseudoTransient(p) => Some(p.step()),
            Augmentation::Clamp(_) | Augmentation::Seed(_) => None,
        }
    }

    pub fn augment_residual(&mut self, x: &[f64], f: &mut [f64]) {
        match self {
            Augmentation::Gmin(g) => g.augment_residual(x, f),
            Augmentation::PseudoTransient(_) => {}
            Augmentation::Clamp(c) => c.augment_residual(x, f),
            Augmentation::ClampWithGmin(c) => c.augment_residual(x, f),
            Augmentation::Seed(s) => s.augment_residual(f),
        }
    }

    /// `load` identifies the Jacobian load; diagonal shifts are applied in
    /// full once per load.
    pub fn augment_jacobian<M: DiagonalAccess<f64> + ?Sized>(&mut self, jac: &mut M, load: u64) {
        match self {
            Augmentation::Gmin(g) => g.augment_jacobian(jac, load),
            Augmentation::PseudoTransient(p) => p.augment_jacobian(jac, load),
            Augmentation::Clamp(c) => c.augment_jacobian(jac),
            Augmentation::ClampWithGmin(c) => c.augment_jacobian(jac, load),
            Augmentation::Seed(s) => s.augment_jacobian(jac),
        }
    }

    pub fn as_pseudo_transient_mut(&mut self) -> Result<&mut PseudoTransient, KError> {
        match self {
            Augmentation::PseudoTransient(p) => Ok(p),
            other => Err(KError::Dispatch(format!("expected pseudo-transient, found {}", other.name()))),
        }
    }
}
