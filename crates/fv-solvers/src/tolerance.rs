//! Tolerance adaptation.
//!
//! A user asks for `tolerance` under a named [`Criterion`]. Each suite has
//! its own idea of what a tolerance means, so the criterion is translated
//! into a scale factor and a [`NativeCriterion`] the suite's kernels
//! understand. The effective target is `tolerance * scale`, interpreted
//! according to the native criterion.
//!
//! # Per-suite tables
//!
//! | criterion | direct | krylov | distributed | accelerated |
//! |-----------|--------|--------|-------------|-------------|
//! | default   | initial | legacy | initial | initial |
//! | unscaled  | 1, absolute | 1, absolute | 1, absolute | 1, absolute |
//! | RHS       | ‖b‖, absolute | ‖b‖, absolute | 1, native RHS | ‖b‖, absolute |
//! | matrix    | ‖L‖∞, absolute | ‖L‖∞, absolute | 1, native matrix | ‖L‖∞, absolute |
//! | initial   | 1, native r₀ | 1, native r₀ | 1, native r₀ | 1, native r₀ |
//! | legacy    | initial | ‖b‖, absolute | initial | initial |
//! | solution  | unsupported | unsupported | 1, native Δx | unsupported |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::convergence::Suite;
use crate::error::{Result, SolverError};

/// Interpretation of a user tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "unscaled", alias = "ABSOLUTE")]
    Unscaled,
    #[serde(rename = "RHS", alias = "rhs")]
    Rhs,
    #[serde(rename = "matrix")]
    Matrix,
    #[serde(rename = "initial")]
    Initial,
    #[serde(rename = "solution")]
    Solution,
    #[serde(rename = "legacy")]
    Legacy,
}

impl Criterion {
    pub const ALL: [Criterion; 7] = [
        Criterion::Default,
        Criterion::Unscaled,
        Criterion::Rhs,
        Criterion::Matrix,
        Criterion::Initial,
        Criterion::Solution,
        Criterion::Legacy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Default => "default",
            Criterion::Unscaled => "unscaled",
            Criterion::Rhs => "RHS",
            Criterion::Matrix => "matrix",
            Criterion::Initial => "initial",
            Criterion::Solution => "solution",
            Criterion::Legacy => "legacy",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Criterion {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Criterion::Default),
            "unscaled" | "ABSOLUTE" => Ok(Criterion::Unscaled),
            "RHS" | "rhs" => Ok(Criterion::Rhs),
            "matrix" => Ok(Criterion::Matrix),
            "initial" => Ok(Criterion::Initial),
            "solution" => Ok(Criterion::Solution),
            "legacy" => Ok(Criterion::Legacy),
            other => Err(SolverError::InvalidConfig(format!(
                "unknown tolerance criterion '{}'",
                other
            ))),
        }
    }
}

/// Tolerance, its interpretation, and the iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceSpec {
    pub criterion: Criterion,
    pub tolerance: f64,
    /// Zero means "do not iterate"; the solve reports max-iterations-reached.
    pub max_iterations: usize,
}

impl Default for ToleranceSpec {
    fn default() -> Self {
        Self {
            criterion: Criterion::Default,
            tolerance: 1e-10,
            max_iterations: 1000,
        }
    }
}

impl ToleranceSpec {
    pub fn new(criterion: Criterion, tolerance: f64, max_iterations: usize) -> Self {
        Self {
            criterion,
            tolerance,
            max_iterations,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(SolverError::InvalidConfig(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Convergence test a suite's kernels evaluate natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeCriterion {
    /// ‖r‖ ≤ target
    Absolute,
    /// ‖r‖ ≤ target · ‖r₀‖
    RelativeToInitial,
    /// ‖r‖ ≤ target · ‖b‖
    RelativeToRhs,
    /// ‖r‖ ≤ target · ‖L‖∞
    RelativeToMatrix,
    /// ‖xₖ − xₖ₋₁‖ ≤ target
    SolutionUpdate,
}

impl NativeCriterion {
    pub fn token(&self) -> &'static str {
        match self {
            NativeCriterion::Absolute => "ABSOLUTE",
            NativeCriterion::RelativeToInitial => "RELATIVE_INI",
            NativeCriterion::RelativeToRhs => "RELATIVE_RHS",
            NativeCriterion::RelativeToMatrix => "RELATIVE_ANORM",
            NativeCriterion::SolutionUpdate => "SOLUTION_UPDATE",
        }
    }
}

/// Where the scale factor comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleSource {
    One,
    RhsNorm,
    MatrixNorm,
}

/// Entry of a suite's criterion table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionRule {
    /// Same as another criterion
    Alias(Criterion),
    Use(ScaleSource, NativeCriterion),
    Unsupported,
}

/// The per-suite criterion table. Exhaustive over suites and criteria.
pub fn criterion_rule(suite: Suite, criterion: Criterion) -> CriterionRule {
    use CriterionRule::*;
    use NativeCriterion as N;
    use ScaleSource as S;

    match suite {
        Suite::Direct => match criterion {
            Criterion::Default | Criterion::Legacy => Alias(Criterion::Initial),
            Criterion::Unscaled => Use(S::One, N::Absolute),
            Criterion::Rhs => Use(S::RhsNorm, N::Absolute),
            Criterion::Matrix => Use(S::MatrixNorm, N::Absolute),
            Criterion::Initial => Use(S::One, N::RelativeToInitial),
            Criterion::Solution => Unsupported,
        },
        Suite::Krylov => match criterion {
            Criterion::Default => Alias(Criterion::Legacy),
            Criterion::Legacy => Use(S::RhsNorm, N::Absolute),
            Criterion::Unscaled => Use(S::One, N::Absolute),
            Criterion::Rhs => Use(S::RhsNorm, N::Absolute),
            Criterion::Matrix => Use(S::MatrixNorm, N::Absolute),
            Criterion::Initial => Use(S::One, N::RelativeToInitial),
            Criterion::Solution => Unsupported,
        },
        Suite::Distributed => match criterion {
            Criterion::Default | Criterion::Legacy => Alias(Criterion::Initial),
            Criterion::Unscaled => Use(S::One, N::Absolute),
            Criterion::Rhs => Use(S::One, N::RelativeToRhs),
            Criterion::Matrix => Use(S::One, N::RelativeToMatrix),
            Criterion::Initial => Use(S::One, N::RelativeToInitial),
            Criterion::Solution => Use(S::One, N::SolutionUpdate),
        },
        Suite::Accelerated => match criterion {
            Criterion::Default | Criterion::Legacy => Alias(Criterion::Initial),
            Criterion::Unscaled => Use(S::One, N::Absolute),
            Criterion::Rhs => Use(S::RhsNorm, N::Absolute),
            Criterion::Matrix => Use(S::MatrixNorm, N::Absolute),
            Criterion::Initial => Use(S::One, N::RelativeToInitial),
            Criterion::Solution => Unsupported,
        },
    }
}

/// Follow aliases to a concrete table entry.
pub fn resolve(suite: Suite, criterion: Criterion) -> Result<(Criterion, ScaleSource, NativeCriterion)> {
    let mut current = criterion;
    for _ in 0..Criterion::ALL.len() {
        match criterion_rule(suite, current) {
            CriterionRule::Alias(next) => current = next,
            CriterionRule::Use(scale, native) => return Ok((current, scale, native)),
            CriterionRule::Unsupported => break,
        }
    }
    Err(SolverError::UnsupportedCriterion {
        criterion: criterion.name(),
        suite: suite.name(),
    })
}

/// Reference norms of the stored system. Distributed implementations reduce
/// over their communicator.
pub trait SystemNorms {
    /// ‖b‖₂
    fn rhs_norm(&self) -> f64;
    /// ‖L‖∞
    fn matrix_norm(&self) -> f64;
}

/// Result of adapting a criterion to a suite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptedTolerance {
    /// Criterion after alias resolution
    pub criterion: Criterion,
    pub scale: f64,
    pub native: NativeCriterion,
}

impl AdaptedTolerance {
    /// Tolerance handed to the native kernel.
    pub fn scaled(&self, tolerance: f64) -> f64 {
        tolerance * self.scale
    }
}

/// Translate `criterion` for `suite`, computing the scale from `norms`.
///
/// A zero or non-finite reference norm falls back to a unit scale.
pub fn adapt(suite: Suite, criterion: Criterion, norms: &dyn SystemNorms) -> Result<AdaptedTolerance> {
    let (resolved, source, native) = resolve(suite, criterion)?;
    let scale = match source {
        ScaleSource::One => 1.0,
        ScaleSource::RhsNorm => norms.rhs_norm(),
        ScaleSource::MatrixNorm => norms.matrix_norm(),
    };
    let scale = if scale > 0.0 && scale.is_finite() {
        scale
    } else {
        tracing::debug!(
            criterion = resolved.name(),
            scale,
            "reference norm unusable, falling back to unscaled tolerance"
        );
        1.0
    };

    tracing::debug!(
        suite = suite.name(),
        criterion = resolved.name(),
        scale,
        native = native.token(),
        "adapted tolerance"
    );

    Ok(AdaptedTolerance {
        criterion: resolved,
        scale,
        native,
    })
}
