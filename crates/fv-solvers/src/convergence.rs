//! Normalized convergence reporting.
//!
//! Each backend family reports its own native status code. The code is kept
//! verbatim in [`ConvergenceOutcome::code`] and classified into the shared
//! [`ConvergenceStatus`] taxonomy through the suite's table.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend family that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    /// Dense LU with iterative refinement
    Direct,
    /// Serial Krylov methods over CSR
    Krylov,
    /// Krylov methods over a partitioned mesh
    Distributed,
    /// Device-resident FGMRES and algebraic multigrid
    Accelerated,
}

impl Suite {
    pub fn name(&self) -> &'static str {
        match self {
            Suite::Direct => "direct",
            Suite::Krylov => "krylov",
            Suite::Distributed => "distributed",
            Suite::Accelerated => "accelerated",
        }
    }

    /// Classify a native status code.
    pub fn classify(&self, code: i32) -> ConvergenceStatus {
        use ConvergenceStatus::*;
        match (self, code) {
            (Suite::Direct, 0) => Converged,
            (Suite::Direct, 1) => MaxIterationsReached,
            (Suite::Direct, -1) => Breakdown,

            (Suite::Krylov, 0) => Converged,
            (Suite::Krylov, -1) => MaxIterationsReached,
            (Suite::Krylov, -3) => Breakdown,
            (Suite::Krylov, -4) => Diverged,

            // AztecOO-style termination reasons
            (Suite::Distributed, 0) => Converged,
            (Suite::Distributed, 2) => Breakdown,
            (Suite::Distributed, 3) => Breakdown,
            (Suite::Distributed, 5) => MaxIterationsReached,
            (Suite::Distributed, 6) => Diverged,

            // AMGX-style solve status
            (Suite::Accelerated, 0) => Converged,
            (Suite::Accelerated, 1) => Breakdown,
            (Suite::Accelerated, 2) => Diverged,
            (Suite::Accelerated, 3) => MaxIterationsReached,

            _ => Unknown,
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cross-backend convergence taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvergenceStatus {
    Converged,
    Diverged,
    MaxIterationsReached,
    Breakdown,
    Unknown,
}

impl ConvergenceStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ConvergenceStatus::Converged => "converged",
            ConvergenceStatus::Diverged => "diverged",
            ConvergenceStatus::MaxIterationsReached => "max-iterations-reached",
            ConvergenceStatus::Breakdown => "breakdown",
            ConvergenceStatus::Unknown => "unknown",
        }
    }

    /// Whether the iterate is usable: converged, or stopped by the cap.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::Converged | ConvergenceStatus::MaxIterationsReached
        )
    }
}

/// Result of one solve attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceOutcome {
    pub suite: Suite,
    pub status: ConvergenceStatus,
    /// Native status code of the suite
    pub code: i32,
    pub iterations: usize,
    /// Raw residual norm ‖Lx − b‖
    pub residual: f64,
    /// `residual / tolerance_scale`, comparable across suites
    pub scaled_residual: f64,
    pub tolerance_scale: f64,
    /// Named residual variants and reference norms
    pub residual_breakdown: BTreeMap<String, f64>,
    /// Wall time of the native solve, in seconds
    pub solve_time: Option<f64>,
}

impl ConvergenceOutcome {
    pub fn new(
        suite: Suite,
        code: i32,
        iterations: usize,
        residual: f64,
        tolerance_scale: f64,
    ) -> Self {
        let scaled_residual = if tolerance_scale > 0.0 && tolerance_scale.is_finite() {
            residual / tolerance_scale
        } else {
            residual
        };
        Self {
            suite,
            status: suite.classify(code),
            code,
            iterations,
            residual,
            scaled_residual,
            tolerance_scale,
            residual_breakdown: BTreeMap::new(),
            solve_time: None,
        }
    }

    pub fn with_breakdown(mut self, breakdown: BTreeMap<String, f64>) -> Self {
        self.residual_breakdown = breakdown;
        self
    }

    pub fn with_solve_time(mut self, seconds: f64) -> Self {
        self.solve_time = Some(seconds);
        self
    }

    pub fn is_converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }

    /// Emit a warning-level diagnostic when the solve did not converge.
    /// Never fails.
    pub fn warn(&self) {
        if !self.is_converged() {
            tracing::warn!(
                suite = self.suite.name(),
                status = self.status.name(),
                code = self.code,
                iterations = self.iterations,
                residual = self.residual,
                "linear solver did not converge"
            );
        }
    }
}

impl fmt::Display for ConvergenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (code {}) after {} iterations, residual {:.3e}",
            self.suite,
            self.status.name(),
            self.code,
            self.iterations,
            self.residual
        )
    }
}
