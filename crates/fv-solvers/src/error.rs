//! Error types for fv-solvers

use thiserror::Error;

use crate::convergence::ConvergenceOutcome;

pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Criterion '{criterion}' is not supported by the {suite} suite")]
    UnsupportedCriterion {
        criterion: &'static str,
        suite: &'static str,
    },

    #[error("Preconditioner '{preconditioner}' cannot be combined with {method} on the {suite} suite")]
    IncompatiblePreconditioner {
        preconditioner: &'static str,
        method: &'static str,
        suite: &'static str,
    },

    #[error("Method '{method}' is not provided by the {suite} suite")]
    UnsupportedMethod {
        method: &'static str,
        suite: &'static str,
    },

    #[error("The {suite} suite cannot run on {processes} processes")]
    MultiProcessUnsupported {
        suite: &'static str,
        processes: usize,
    },

    #[error("{preconditioner} setup failed: {reason}")]
    PreconditionerSetupFailed {
        preconditioner: &'static str,
        reason: String,
    },

    #[error("Solve failed ({reason}) after {} iterations, residual {:.3e}", .outcome.iterations, .outcome.residual)]
    SolveFailed {
        outcome: Box<ConvergenceOutcome>,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Matrix error: {0}")]
    Matrix(String),

    #[error("Solver resources have been released")]
    Released,
}

impl SolverError {
    pub(crate) fn setup(preconditioner: &'static str, reason: impl Into<String>) -> Self {
        SolverError::PreconditionerSetupFailed {
            preconditioner,
            reason: reason.into(),
        }
    }

    /// The partial outcome carried by a failed solve, if any.
    pub fn outcome(&self) -> Option<&ConvergenceOutcome> {
        match self {
            SolverError::SolveFailed { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}
