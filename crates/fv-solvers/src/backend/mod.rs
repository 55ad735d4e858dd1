//! Backend drivers.
//!
//! Each suite wraps its numerical engine behind [`SolverDriver`]: load a
//! system, solve it from an initial guess, report the suite's native status.
//! The facade turns that status into a [`ConvergenceOutcome`].
//!
//! # Architecture
//!
//! ```text
//!                  Solver (facade)
//!                        │
//!                        ▼
//!              Driver (closed enum, SolverDriver)
//!    ┌────────────┬──────┴───────┬───────────────┐
//!    ▼            ▼              ▼               ▼
//!  Direct      Krylov       Distributed     Accelerated
//!  dense LU    CG/CGS/      owned rows +    device context,
//!  + refine    GMRES/       ghost import,   FGMRES / AMG
//!              BiCGSTAB     reduced dots
//! ```
//!
//! [`ConvergenceOutcome`]: crate::convergence::ConvergenceOutcome

pub mod accelerated;
pub mod device;
pub mod direct;
pub mod distributed;
pub mod krylov;

pub use accelerated::AcceleratedDriver;
pub use device::{DeviceContext, DeviceMatrix, DeviceVector};
pub use direct::DirectDriver;
pub use distributed::DistributedDriver;
pub use krylov::KrylovDriver;

use std::collections::BTreeMap;
use std::fmt;

use nalgebra_sparse::CsrMatrix;

use crate::config::{Method, SolverConfig};
use crate::convergence::Suite;
use crate::error::{Result, SolverError};
use crate::krylov::{KernelOutcome, Stopping};
use crate::matrix::{norm_inf, MatrixSignature};
use crate::partition::MeshPartition;
use crate::tolerance::{adapt, AdaptedTolerance, SystemNorms, ToleranceSpec};
use crate::vector_ops::norm2;

/// Lifecycle of a solver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    ResourcesAllocated,
    MatrixLoaded,
    Solving,
    Solved,
    Failed,
    Released,
}

/// Native result of one backend solve.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatus {
    pub code: i32,
    pub iterations: usize,
    /// ‖b − L x‖ of the returned iterate
    pub residual: f64,
    pub tolerance_scale: f64,
    pub breakdown: BTreeMap<String, f64>,
    /// Seconds spent in the native solve
    pub elapsed: f64,
}

/// Settings every driver reads from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub method: Method,
    pub tolerance: ToleranceSpec,
    pub divergence_tolerance: f64,
    pub restart: usize,
}

impl DriverSettings {
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            method: config.method,
            tolerance: config.tolerance,
            divergence_tolerance: config.divergence_tolerance,
            restart: config.restart,
        }
    }

    /// Adapt the tolerance to `suite` and build the kernels' stopping rule.
    pub fn stopping(&self, suite: Suite, norms: &dyn SystemNorms) -> Result<(AdaptedTolerance, Stopping)> {
        let adapted = adapt(suite, self.tolerance.criterion, norms)?;
        let stopping = Stopping::new(
            &adapted,
            self.tolerance.tolerance,
            self.tolerance.max_iterations,
            self.divergence_tolerance,
            norms.rhs_norm(),
            norms.matrix_norm(),
        );
        Ok((adapted, stopping))
    }
}

/// Operations every backend provides.
pub trait SolverDriver {
    fn suite(&self) -> Suite;

    /// Copy the system into backend storage.
    fn load(&mut self, matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<()>;

    /// Solve the loaded system, updating `x` in place from the initial guess.
    fn solve(&mut self, x: &mut [f64]) -> Result<RawStatus>;

    /// Forget every structure-dependent resource.
    fn reset(&mut self);

    /// Free backend resources. Idempotent.
    fn release(&mut self);
}

/// The four backend families.
pub enum Driver {
    Direct(DirectDriver),
    Krylov(KrylovDriver),
    Distributed(DistributedDriver),
    Accelerated(AcceleratedDriver),
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Driver").field(&self.suite()).finish()
    }
}

impl Driver {
    /// Allocate the driver for `config`. Fails on a configuration the
    /// backend cannot run, before any system is seen.
    ///
    /// Without a partition the system is treated as serial.
    pub fn new(config: &SolverConfig, partition: Option<&MeshPartition>) -> Result<Self> {
        config.validate()?;
        let suite = config.backend;
        let processes = partition.map_or(1, MeshPartition::number_of_processes);
        if suite != Suite::Distributed && processes > 1 {
            return Err(SolverError::MultiProcessUnsupported {
                suite: suite.name(),
                processes,
            });
        }

        let settings = DriverSettings::from_config(config);
        let preconditioner = config.effective_preconditioner();
        let driver = match suite {
            Suite::Direct => Driver::Direct(DirectDriver::new(settings)),
            Suite::Krylov => Driver::Krylov(KrylovDriver::new(settings, preconditioner)?),
            Suite::Distributed => {
                Driver::Distributed(DistributedDriver::new(settings, preconditioner, partition.cloned())?)
            }
            Suite::Accelerated => Driver::Accelerated(AcceleratedDriver::new(
                settings,
                preconditioner,
                &config.extra_options,
            )?),
        };
        tracing::debug!(
            suite = suite.name(),
            method = config.method.name(),
            preconditioner = preconditioner.name(),
            "allocated solver resources"
        );
        Ok(driver)
    }

    fn inner(&self) -> &dyn SolverDriver {
        match self {
            Driver::Direct(d) => d,
            Driver::Krylov(d) => d,
            Driver::Distributed(d) => d,
            Driver::Accelerated(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SolverDriver {
        match self {
            Driver::Direct(d) => d,
            Driver::Krylov(d) => d,
            Driver::Distributed(d) => d,
            Driver::Accelerated(d) => d,
        }
    }
}

impl SolverDriver for Driver {
    fn suite(&self) -> Suite {
        self.inner().suite()
    }

    fn load(&mut self, matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<()> {
        self.inner_mut().load(matrix, rhs)
    }

    fn solve(&mut self, x: &mut [f64]) -> Result<RawStatus> {
        self.inner_mut().solve(x)
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }

    fn release(&mut self) {
        self.inner_mut().release()
    }
}

/// A serial system held by a single-process driver.
#[derive(Debug, Clone)]
pub(crate) struct StoredSystem {
    pub matrix: CsrMatrix<f64>,
    pub rhs: Vec<f64>,
    pub signature: MatrixSignature,
    rhs_norm: f64,
    matrix_norm: f64,
}

impl StoredSystem {
    pub fn new(matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Self {
        Self {
            matrix: matrix.clone(),
            rhs: rhs.to_vec(),
            signature: MatrixSignature::of(matrix),
            rhs_norm: norm2(rhs),
            matrix_norm: norm_inf(matrix),
        }
    }
}

impl SystemNorms for StoredSystem {
    fn rhs_norm(&self) -> f64 {
        self.rhs_norm
    }

    fn matrix_norm(&self) -> f64 {
        self.matrix_norm
    }
}

/// Reference norms and kernel residuals, shared by the breakdown maps.
pub(crate) fn breakdown(
    adapted: &AdaptedTolerance,
    kernel: &KernelOutcome,
    residual: f64,
    norms: &dyn SystemNorms,
) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    map.insert("residual".to_string(), residual);
    map.insert("recursive_residual".to_string(), kernel.residual);
    map.insert("initial_residual".to_string(), kernel.initial_residual);
    map.insert("scaled_residual".to_string(), residual / adapted.scale);
    map.insert("rhs_norm".to_string(), norms.rhs_norm());
    map.insert("matrix_norm".to_string(), norms.matrix_norm());
    map
}

pub(crate) fn not_loaded(suite: Suite) -> SolverError {
    SolverError::InvalidConfig(format!("no system loaded into the {} driver", suite.name()))
}
