//! Strategy selection and continuation parameter lists.

use serde::{Deserialize, Serialize};

use crate::group::continuation::{HOMOTOPY_PARAMETER, PROGRESS_PARAMETER};

/// Which solve strategy the orchestrator runs for a mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveType {
    /// Plain Newton, optionally with an initial-condition clamp or an
    /// operating-point seed.
    #[default]
    Newton,
    /// Natural continuation of the first configured parameter.
    NaturalParameter,
    /// Natural continuation of each configured parameter in turn.
    MultiParameter,
    /// All configured parameters stepped together.
    VectorParameter,
    DeviceGainThenNonlinear,
    DeviceNonlinearThenGain,
    DeviceSizeGainNonlinear,
    DeviceSimultaneous,
    /// One gain phase per device block, then the nonlinear phase.
    BlockGainscale,
    SourceStepping,
    GminStepping,
    /// Pseudo-transient continuation to steady state, then Newton.
    PseudoTransient,
    ArtificialHomotopy,
}

impl SolveType {
    pub const ALL: [SolveType; 13] = [
        SolveType::Newton,
        SolveType::NaturalParameter,
        SolveType::MultiParameter,
        SolveType::VectorParameter,
        SolveType::DeviceGainThenNonlinear,
        SolveType::DeviceNonlinearThenGain,
        SolveType::DeviceSizeGainNonlinear,
        SolveType::DeviceSimultaneous,
        SolveType::BlockGainscale,
        SolveType::SourceStepping,
        SolveType::GminStepping,
        SolveType::PseudoTransient,
        SolveType::ArtificialHomotopy,
    ];

    pub fn is_continuation(self) -> bool {
        self != SolveType::Newton
    }
}

/// One continuation parameter and its step control.
///
/// `end == None` means "the value the device layer currently holds", read
/// once per session before the first continuation solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSpec {
    pub name: String,
    pub start: f64,
    pub end: Option<f64>,
    /// Magnitude of the first step; the sign follows `end - start`.
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// Step growth after a successful step.
    pub growth_factor: f64,
    pub max_steps: usize,
}

impl Default for ParameterSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            start: 0.0,
            end: Some(1.0),
            initial_step: 0.2,
            min_step: 1e-4,
            max_step: 1.0,
            growth_factor: 2.0,
            max_steps: 100,
        }
    }
}

impl ParameterSpec {
    /// 0 → 1 ramp of a scale factor.
    pub fn ramp(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }
}

/// Device-family continuation parameters (MOSFET scaling by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceContinuationOptions {
    pub gain: ParameterSpec,
    pub nonlinear: ParameterSpec,
    pub size: ParameterSpec,
    /// Per-block gain parameter names for block gain stepping.
    pub block_gain_names: Vec<String>,
}

impl Default for DeviceContinuationOptions {
    fn default() -> Self {
        Self {
            gain: ParameterSpec::ramp("mosfet:gainscale"),
            nonlinear: ParameterSpec::ramp("mosfet:nltermscale"),
            size: ParameterSpec::ramp("mosfet:sizescale"),
            block_gain_names: Vec::new(),
        }
    }
}

/// Gmin stepping: log10 of the injected conductance sweeps `start → end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GminOptions {
    pub start: f64,
    pub end: f64,
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub max_steps: usize,
    /// Conductance left in place once the sweep reaches `end`.
    pub residual_conductance: f64,
}

impl Default for GminOptions {
    fn default() -> Self {
        Self {
            start: 4.0,
            end: -12.0,
            initial_step: 1.0,
            min_step: 1e-3,
            max_step: 4.0,
            max_steps: 200,
            residual_conductance: 0.0,
        }
    }
}

impl GminOptions {
    pub fn parameter(&self) -> ParameterSpec {
        ParameterSpec {
            name: PROGRESS_PARAMETER.to_string(),
            start: self.start,
            end: Some(self.end),
            initial_step: self.initial_step,
            min_step: self.min_step,
            max_step: self.max_step,
            growth_factor: 2.0,
            max_steps: self.max_steps,
        }
    }
}

/// Pseudo-transient continuation (ΨTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PseudoTransientOptions {
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub max_steps: usize,
    /// Switch to plain Newton once the residual max-norm falls below this.
    pub switch_tol: f64,
    /// Scale of 1/Δτ on voltage unknowns.
    pub voltage_scale: f64,
    /// Scale of 1/Δτ on the remaining unknowns.
    pub other_scale: f64,
}

impl Default for PseudoTransientOptions {
    fn default() -> Self {
        Self {
            initial_step: 1e-3,
            min_step: 1e-14,
            max_step: 1e12,
            max_steps: 200,
            switch_tol: 1e-8,
            voltage_scale: 1.0,
            other_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationOptions {
    pub solve_type: SolveType,
    /// Parameters for the natural, multi and vector parameter types.
    pub parameters: Vec<ParameterSpec>,
    pub device: DeviceContinuationOptions,
    pub source: ParameterSpec,
    pub gmin: GminOptions,
    pub pseudo_transient: PseudoTransientOptions,
    pub homotopy: ParameterSpec,
    /// Honor initial conditions (clamp) when they are supplied.
    pub use_initial_conditions: bool,
}

impl Default for ContinuationOptions {
    fn default() -> Self {
        Self {
            solve_type: SolveType::Newton,
            parameters: Vec::new(),
            device: DeviceContinuationOptions::default(),
            source: ParameterSpec::ramp("vsrcscale"),
            gmin: GminOptions::default(),
            pseudo_transient: PseudoTransientOptions::default(),
            homotopy: ParameterSpec::ramp(HOMOTOPY_PARAMETER),
            use_initial_conditions: true,
        }
    }
}
