//! Linear solver layer for finite-volume PDE codes.
//!
//! The discretization layer hands over an assembled sparse system
//! `L x = b`; this crate solves it with one of four backend families and
//! reports the result in a common form.
//!
//! - [`tolerance`]: translate a user tolerance criterion into each
//!   backend's native convergence test.
//! - [`preconditioner`]: preconditioners and smoothers, cached per solver.
//! - [`backend`]: the direct, Krylov, distributed and accelerated drivers.
//! - [`convergence`]: native status codes classified into one taxonomy.
//! - [`solver`]: the facade tying these together.
//!
//! Distributed solves take their communicator from the [`MeshPartition`]
//! they are given; nothing in the crate uses process-global state.

pub mod amg;
pub mod backend;
pub mod comm;
pub mod config;
pub mod convergence;
pub mod error;
pub mod krylov;
pub mod matrix;
pub mod partition;
pub mod preconditioner;
pub mod solver;
pub mod tolerance;
pub mod vector_ops;

pub use backend::{Driver, DriverState, RawStatus, SolverDriver};
pub use comm::{Communicator, LocalGroupComm, SerialComm};
pub use config::{Method, SolverConfig};
pub use convergence::{ConvergenceOutcome, ConvergenceStatus, Suite};
pub use error::{Result, SolverError};
pub use matrix::{diagonal_matrix, MatrixSignature, SparseTriplets};
pub use partition::{GridShape, MeshPartition};
pub use preconditioner::{Preconditioner, PreconditionerSpec};
pub use solver::{LinearSystem, Solver};
pub use tolerance::{adapt, AdaptedTolerance, Criterion, NativeCriterion, SystemNorms, ToleranceSpec};

/// Re-exported so callers can build matrices without a direct dependency.
pub use nalgebra_sparse::CsrMatrix;
