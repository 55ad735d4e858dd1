//! Preconditioners and smoothers.
//!
//! A [`PreconditionerSpec`] names a preconditioner; applying it to a matrix
//! yields a handle implementing [`Preconditioner`], which computes
//! `z = M⁻¹ r`. The matrix itself is never modified.
//!
//! Handles are cached in a [`PreconditionerSlot`] keyed by the matrix
//! signature:
//!
//! ```text
//! same structure, same values   -> reuse
//! same structure, new values    -> refactor
//! new structure or reset        -> rebuild
//! ```

pub mod block_jacobi;
pub mod ic;
pub mod ilu;
pub mod jacobi;
pub mod ssor;

pub use block_jacobi::BlockJacobiPreconditioner;
pub use ic::IncompleteCholeskyPreconditioner;
pub use ilu::Ilu0Preconditioner;
pub use jacobi::JacobiPreconditioner;
pub use ssor::SsorPreconditioner;

use std::fmt;
use std::str::FromStr;

use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::config::Method;
use crate::convergence::Suite;
use crate::error::{Result, SolverError};
use crate::matrix::MatrixSignature;

/// Block size of the default block-Jacobi smoother.
pub const DEFAULT_BLOCK_SIZE: usize = 4;

/// z = M⁻¹ r for some approximation M of the system matrix.
pub trait Preconditioner: Send + Sync {
    fn name(&self) -> &'static str;

    /// z = M⁻¹ r
    fn apply(&self, r: &[f64], z: &mut [f64]);

    /// Recompute numeric factors for a matrix with unchanged structure.
    fn refactor(&mut self, matrix: &CsrMatrix<f64>) -> Result<()>;
}

/// Named preconditioner choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PreconditionerSpec {
    None,
    Jacobi,
    Ilu,
    Ssor { omega: f64 },
    IncompleteCholesky,
    /// Per-rank ILU(0) of the owned block, block-Jacobi across ranks
    DomainDecomposition,
    BlockJacobi { block_size: usize },
}

impl PreconditionerSpec {
    pub fn name(&self) -> &'static str {
        match self {
            PreconditionerSpec::None => "none",
            PreconditionerSpec::Jacobi => "jacobi",
            PreconditionerSpec::Ilu => "ilu",
            PreconditionerSpec::Ssor { .. } => "ssor",
            PreconditionerSpec::IncompleteCholesky => "icc",
            PreconditionerSpec::DomainDecomposition => "domain-decomposition",
            PreconditionerSpec::BlockJacobi { .. } => "block-jacobi",
        }
    }

    /// Backend default for `method` on `suite`.
    pub fn default_for(suite: Suite, method: Method) -> Self {
        match (suite, method) {
            (Suite::Direct, _) => PreconditionerSpec::None,
            (Suite::Krylov, _) => PreconditionerSpec::Jacobi,
            (Suite::Distributed, _) => PreconditionerSpec::DomainDecomposition,
            (Suite::Accelerated, Method::Amg) => PreconditionerSpec::BlockJacobi {
                block_size: DEFAULT_BLOCK_SIZE,
            },
            (Suite::Accelerated, _) => PreconditionerSpec::Jacobi,
        }
    }

    /// Reject combinations the backend cannot run.
    pub fn check_compatible(&self, suite: Suite, method: Method) -> Result<()> {
        use PreconditionerSpec as P;

        let ok = match suite {
            Suite::Direct => matches!(self, P::None),
            Suite::Krylov => matches!(
                self,
                P::None | P::Jacobi | P::Ilu | P::Ssor { .. } | P::IncompleteCholesky
            ),
            Suite::Distributed => matches!(self, P::None | P::Jacobi | P::DomainDecomposition),
            Suite::Accelerated => match method {
                // AMG needs a smoother
                Method::Amg => matches!(self, P::Jacobi | P::BlockJacobi { .. }),
                _ => matches!(self, P::None | P::Jacobi | P::BlockJacobi { .. }),
            },
        };
        if !ok {
            return Err(SolverError::IncompatiblePreconditioner {
                preconditioner: self.name(),
                method: method.name(),
                suite: suite.name(),
            });
        }
        match self {
            P::Ssor { omega } if !(*omega > 0.0 && *omega < 2.0) => Err(SolverError::InvalidConfig(
                format!("SSOR relaxation must lie in (0, 2), got {}", omega),
            )),
            P::BlockJacobi { block_size: 0 } => Err(SolverError::InvalidConfig(
                "block-Jacobi block size must be positive".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Build a handle for `matrix`. `None` for the no-op preconditioner.
    pub fn apply_to_matrix(&self, matrix: &CsrMatrix<f64>) -> Result<Option<Box<dyn Preconditioner>>> {
        if matrix.nrows() != matrix.ncols() {
            return Err(SolverError::DimensionMismatch(format!(
                "{} preconditioner needs a square matrix, got {}x{}",
                self.name(),
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let handle: Box<dyn Preconditioner> = match *self {
            PreconditionerSpec::None => return Ok(None),
            PreconditionerSpec::Jacobi => Box::new(JacobiPreconditioner::from_matrix(matrix)?),
            PreconditionerSpec::Ilu => Box::new(Ilu0Preconditioner::new(matrix)?),
            PreconditionerSpec::Ssor { omega } => {
                Box::new(SsorPreconditioner::from_matrix(matrix, omega)?)
            }
            PreconditionerSpec::IncompleteCholesky => {
                Box::new(IncompleteCholeskyPreconditioner::new(matrix)?)
            }
            PreconditionerSpec::DomainDecomposition => {
                Box::new(Ilu0Preconditioner::new(matrix)?.named("domain-decomposition"))
            }
            PreconditionerSpec::BlockJacobi { block_size } => {
                Box::new(BlockJacobiPreconditioner::new(matrix, block_size)?)
            }
        };
        Ok(Some(handle))
    }
}

impl fmt::Display for PreconditionerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PreconditionerSpec {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PreconditionerSpec::None),
            "jacobi" => Ok(PreconditionerSpec::Jacobi),
            "ilu" => Ok(PreconditionerSpec::Ilu),
            "ssor" => Ok(PreconditionerSpec::Ssor { omega: 1.0 }),
            "icc" | "ic" => Ok(PreconditionerSpec::IncompleteCholesky),
            "dd" | "domain-decomposition" => Ok(PreconditionerSpec::DomainDecomposition),
            "block-jacobi" | "bj" => Ok(PreconditionerSpec::BlockJacobi {
                block_size: DEFAULT_BLOCK_SIZE,
            }),
            other => Err(SolverError::InvalidConfig(format!(
                "unknown preconditioner '{}'",
                other
            ))),
        }
    }
}

/// Copy `r` into `z`, or apply `pc` when present.
pub fn apply_or_copy(pc: Option<&dyn Preconditioner>, r: &[f64], z: &mut [f64]) {
    match pc {
        Some(pc) => pc.apply(r, z),
        None => z.copy_from_slice(r),
    }
}

/// Cached preconditioner handle for one solver instance.
pub struct PreconditionerSlot {
    spec: PreconditionerSpec,
    handle: Option<Box<dyn Preconditioner>>,
    signature: Option<MatrixSignature>,
    builds: usize,
    refactors: usize,
}

impl PreconditionerSlot {
    pub fn new(spec: PreconditionerSpec) -> Self {
        Self {
            spec,
            handle: None,
            signature: None,
            builds: 0,
            refactors: 0,
        }
    }

    pub fn spec(&self) -> PreconditionerSpec {
        self.spec
    }

    /// Bring the cached handle up to date with `matrix` and return it.
    pub fn prepare(&mut self, matrix: &CsrMatrix<f64>) -> Result<Option<&dyn Preconditioner>> {
        if self.spec == PreconditionerSpec::None {
            return Ok(None);
        }
        let signature = MatrixSignature::of(matrix);

        let cached = if self.handle.is_some() { self.signature } else { None };
        match cached {
            Some(old) if old == signature => {}
            Some(old) if old.same_structure(&signature) => {
                tracing::debug!(preconditioner = self.spec.name(), "refactoring preconditioner");
                let refactored = match self.handle.as_mut() {
                    Some(handle) => handle.refactor(matrix),
                    None => Ok(()),
                };
                if let Err(e) = refactored {
                    self.reset();
                    return Err(e);
                }
                self.refactors += 1;
                self.signature = Some(signature);
            }
            _ => {
                tracing::debug!(preconditioner = self.spec.name(), "building preconditioner");
                self.handle = self.spec.apply_to_matrix(matrix)?;
                self.builds += 1;
                self.signature = Some(signature);
            }
        }
        Ok(self.handle.as_deref())
    }

    /// Current handle without touching the cache.
    pub fn get(&self) -> Option<&dyn Preconditioner> {
        self.handle.as_deref()
    }

    /// Drop the cached handle; the next `prepare` rebuilds.
    pub fn reset(&mut self) {
        self.handle = None;
        self.signature = None;
    }

    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn refactors(&self) -> usize {
        self.refactors
    }
}

impl fmt::Debug for PreconditionerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreconditionerSlot")
            .field("spec", &self.spec)
            .field("built", &self.handle.is_some())
            .field("builds", &self.builds)
            .field("refactors", &self.refactors)
            .finish()
    }
}
