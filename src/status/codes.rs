//! Signed result codes of a nonlinear solve.
//!
//! Positive codes are successes. Zero means "not decided yet" and is only
//! returned by single-step entry points. Negative codes are failures, of
//! which `Stalled` and `WrmsExactZero` are borderline: a caller may still
//! accept the iterate.

use serde::{Deserialize, Serialize};

/// Fixed code for any continuation that did not finish, whatever the phase.
pub const CONTINUATION_FAILED: i32 = -1;

/// Outcome classes of the convergence battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    NormTooSmall,
    NormalConvergence,
    NearConvergence,
    SmallUpdate,
    TooManySteps,
    UpdateTooBig,
    Stalled,
    WrmsExactZero,
    InnerSolveFailed,
    NanFail,
}

/// One battery evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Unconverged,
    Converged(Verdict),
    Failed(Verdict),
}

impl CheckStatus {
    pub fn is_decided(self) -> bool {
        !matches!(self, CheckStatus::Unconverged)
    }

    pub fn verdict(self) -> Option<Verdict> {
        match self {
            CheckStatus::Unconverged => None,
            CheckStatus::Converged(v) | CheckStatus::Failed(v) => Some(v),
        }
    }
}

/// Verdict → signed code table. Overridable through configuration, fixed
/// once a battery is built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnCodes {
    pub norm_too_small: i32,
    pub normal_convergence: i32,
    pub near_convergence: i32,
    pub small_update: i32,
    pub too_many_steps: i32,
    pub update_too_big: i32,
    pub stalled: i32,
    pub wrms_exact_zero: i32,
    pub inner_solve_failed: i32,
    pub nan_fail: i32,
}

impl Default for ReturnCodes {
    fn default() -> Self {
        Self {
            norm_too_small: 1,
            normal_convergence: 2,
            near_convergence: 3,
            small_update: 4,
            too_many_steps: -1,
            update_too_big: -2,
            stalled: -3,
            wrms_exact_zero: -4,
            inner_solve_failed: -5,
            nan_fail: -6,
        }
    }
}

impl ReturnCodes {
    pub fn code(&self, v: Verdict) -> i32 {
        match v {
            Verdict::NormTooSmall => self.norm_too_small,
            Verdict::NormalConvergence => self.normal_convergence,
            Verdict::NearConvergence => self.near_convergence,
            Verdict::SmallUpdate => self.small_update,
            Verdict::TooManySteps => self.too_many_steps,
            Verdict::UpdateTooBig => self.update_too_big,
            Verdict::Stalled => self.stalled,
            Verdict::WrmsExactZero => self.wrms_exact_zero,
            Verdict::InnerSolveFailed => self.inner_solve_failed,
            Verdict::NanFail => self.nan_fail,
        }
    }

    /// Code for a status; 0 while undecided.
    pub fn status_code(&self, status: CheckStatus) -> i32 {
        status.verdict().map_or(0, |v| self.code(v))
    }

    pub fn is_success(code: i32) -> bool {
        code > 0
    }

    /// Failures a caller may still accept.
    pub fn is_borderline(&self, code: i32) -> bool {
        code == self.stalled || code == self.wrms_exact_zero
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let c = ReturnCodes::default();
        assert_eq!(c.code(Verdict::NormalConvergence), 2);
        assert_eq!(c.code(Verdict::NanFail), -6);
        assert_eq!(c.status_code(CheckStatus::Unconverged), 0);
        assert!(ReturnCodes::is_success(c.code(Verdict::SmallUpdate)));
        assert!(c.is_borderline(-3) && c.is_borderline(-4) && !c.is_borderline(-2));
    }

    #[test]
    fn overrides_are_used() {
        let c = ReturnCodes { stalled: 5, ..ReturnCodes::default() };
        assert_eq!(c.status_code(CheckStatus::Failed(Verdict::Stalled)), 5);
    }
}
