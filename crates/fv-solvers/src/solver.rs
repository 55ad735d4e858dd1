//! Solver facade.
//!
//! [`Solver`] is the object the discretization layer talks to. It owns one
//! backend driver for its whole lifetime, validates systems before the
//! backend sees them, classifies the native result and writes the solution
//! back into the caller's storage.
//!
//! # Example
//!
//! ```rust
//! use fv_solvers::{diagonal_matrix, Criterion, LinearSystem, Solver, SolverConfig};
//!
//! let config = SolverConfig::pcg().with_tolerance(Criterion::Unscaled, 1e-10, 100);
//! let mut solver = Solver::new(config)?;
//!
//! let matrix = diagonal_matrix(&[2.0, 2.0, 2.0])?;
//! let mut x = vec![0.0; 3];
//! let outcome = solver.solve(LinearSystem::new(&matrix, &mut x, &[2.0, 2.0, 2.0]))?;
//!
//! assert!(outcome.is_converged());
//! assert!((x[0] - 1.0).abs() < 1e-10);
//! # Ok::<(), fv_solvers::SolverError>(())
//! ```

use nalgebra_sparse::CsrMatrix;

use crate::backend::{Driver, DriverState, SolverDriver};
use crate::config::SolverConfig;
use crate::convergence::{ConvergenceOutcome, Suite};
use crate::error::{Result, SolverError};
use crate::matrix::MatrixSignature;
use crate::partition::MeshPartition;

/// One assembled system, borrowed from the assembly and field layers.
#[derive(Debug)]
pub struct LinearSystem<'a> {
    pub matrix: &'a CsrMatrix<f64>,
    /// Initial guess on entry; the solution on success
    pub solution: &'a mut [f64],
    pub rhs: &'a [f64],
    /// The written-back solution is divided by this factor
    pub unit_factor: f64,
}

impl<'a> LinearSystem<'a> {
    pub fn new(matrix: &'a CsrMatrix<f64>, solution: &'a mut [f64], rhs: &'a [f64]) -> Self {
        Self {
            matrix,
            solution,
            rhs,
            unit_factor: 1.0,
        }
    }

    pub fn with_unit_factor(mut self, unit_factor: f64) -> Self {
        self.unit_factor = unit_factor;
        self
    }
}

fn check_dimensions(matrix: &CsrMatrix<f64>, solution_len: usize, rhs_len: usize) -> Result<()> {
    let (rows, cols) = (matrix.nrows(), matrix.ncols());
    if rows != cols {
        return Err(SolverError::DimensionMismatch(format!(
            "matrix must be square, got {}x{}",
            rows, cols
        )));
    }
    if solution_len != cols {
        return Err(SolverError::DimensionMismatch(format!(
            "solution has {} entries, matrix has {} columns",
            solution_len, cols
        )));
    }
    if rhs_len != rows {
        return Err(SolverError::DimensionMismatch(format!(
            "right-hand side has {} entries, matrix has {} rows",
            rhs_len, rows
        )));
    }
    Ok(())
}

/// Linear solver bound to one backend.
///
/// Resources are allocated by the constructor and released by
/// [`Solver::release`] or when the solver is dropped, whichever comes first.
#[derive(Debug)]
pub struct Solver {
    config: SolverConfig,
    driver: Driver,
    state: DriverState,
    /// Signature and dimension of the stored matrix
    stored: Option<(MatrixSignature, usize)>,
    convergence: Option<ConvergenceOutcome>,
}

impl Solver {
    /// Single-process solver.
    pub fn new(config: SolverConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Solver for one rank of a partitioned mesh. Only the distributed
    /// backend accepts a partition spanning more than one process.
    pub fn with_partition(config: SolverConfig, partition: &MeshPartition) -> Result<Self> {
        Self::build(config, Some(partition))
    }

    fn build(config: SolverConfig, partition: Option<&MeshPartition>) -> Result<Self> {
        let driver = Driver::new(&config, partition)?;
        Ok(Self {
            config,
            driver,
            state: DriverState::ResourcesAllocated,
            stored: None,
            convergence: None,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn suite(&self) -> Suite {
        self.config.backend
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Outcome of the last completed solve.
    pub fn convergence(&self) -> Option<&ConvergenceOutcome> {
        self.convergence.as_ref()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == DriverState::Released {
            Err(SolverError::Released)
        } else {
            Ok(())
        }
    }

    /// Copy `matrix` and `rhs` into the backend.
    ///
    /// A change in the nonzero structure since the last stored matrix
    /// discards every structure-dependent resource.
    pub fn store_matrix(&mut self, matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<()> {
        self.ensure_live()?;
        check_dimensions(matrix, matrix.ncols(), rhs.len())?;

        let signature = MatrixSignature::of(matrix);
        if let Some((previous, _)) = self.stored {
            if !previous.same_structure(&signature) {
                tracing::debug!(suite = self.suite().name(), "matrix structure changed");
                self.driver.reset();
            }
        }
        if let Err(e) = self.driver.load(matrix, rhs) {
            self.state = DriverState::Failed;
            return Err(e);
        }
        self.stored = Some((signature, matrix.nrows()));
        self.state = DriverState::MatrixLoaded;
        Ok(())
    }

    /// Validate, store and solve `system`.
    pub fn solve(&mut self, system: LinearSystem<'_>) -> Result<ConvergenceOutcome> {
        self.ensure_live()?;
        check_dimensions(system.matrix, system.solution.len(), system.rhs.len())?;
        self.store_matrix(system.matrix, system.rhs)?;
        self.solve_stored(system.solution, system.unit_factor)
    }

    /// Solve the stored system from the initial guess in `solution`.
    ///
    /// On a converged or iteration-capped result the solution is written
    /// back, divided by `unit_factor`; a result that did no iterations
    /// leaves it untouched. Any other result is a [`SolverError::SolveFailed`]
    /// and `solution` is not modified.
    pub fn solve_stored(&mut self, solution: &mut [f64], unit_factor: f64) -> Result<ConvergenceOutcome> {
        self.ensure_live()?;
        let dim = match self.stored {
            Some((_, dim)) => dim,
            None => {
                return Err(SolverError::InvalidConfig(
                    "solve called before a matrix was stored".into(),
                ));
            }
        };
        if solution.len() != dim {
            return Err(SolverError::DimensionMismatch(format!(
                "solution has {} entries, stored matrix has {} rows",
                solution.len(),
                dim
            )));
        }
        if !(unit_factor.is_finite() && unit_factor != 0.0) {
            return Err(SolverError::InvalidConfig(format!(
                "unit factor must be finite and nonzero, got {}",
                unit_factor
            )));
        }

        let suite = self.suite();
        self.state = DriverState::Solving;
        tracing::debug!(suite = suite.name(), method = self.config.method.name(), "BEGIN solve");

        let mut work = solution.to_vec();
        let raw = match self.driver.solve(&mut work) {
            Ok(raw) => raw,
            Err(e) => {
                self.state = DriverState::Failed;
                return Err(e);
            }
        };

        let outcome = ConvergenceOutcome::new(suite, raw.code, raw.iterations, raw.residual, raw.tolerance_scale)
            .with_breakdown(raw.breakdown)
            .with_solve_time(raw.elapsed);
        outcome.warn();
        tracing::debug!(
            suite = suite.name(),
            status = outcome.status.name(),
            iterations = outcome.iterations,
            residual = outcome.residual,
            "END solve"
        );

        if !outcome.status.is_usable() {
            self.state = DriverState::Failed;
            self.convergence = Some(outcome.clone());
            return Err(SolverError::SolveFailed {
                reason: outcome.status.name().to_string(),
                outcome: Box::new(outcome),
            });
        }

        if outcome.iterations > 0 {
            for (target, value) in solution.iter_mut().zip(&work) {
                *target = value / unit_factor;
            }
        }
        self.state = DriverState::Solved;
        self.convergence = Some(outcome.clone());
        Ok(outcome)
    }

    /// Signal a structure change: rebuild preconditioners and factorizations
    /// on the next solve.
    pub fn reset(&mut self) {
        if self.state != DriverState::Released {
            tracing::debug!(suite = self.suite().name(), "solver reset");
            self.driver.reset();
        }
    }

    /// Release backend resources. Idempotent.
    pub fn release(&mut self) {
        if self.state != DriverState::Released {
            self.driver.release();
            self.state = DriverState::Released;
            self.stored = None;
            tracing::debug!(suite = self.suite().name(), "released solver resources");
        }
    }
}

impl Drop for Solver {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::ConvergenceStatus;
    use crate::matrix::{diagonal_matrix, SparseTriplets};
    use crate::tolerance::Criterion;

    #[test]
    fn lifecycle_states() {
        let mut solver = Solver::new(SolverConfig::pcg()).unwrap();
        assert_eq!(solver.state(), DriverState::ResourcesAllocated);

        let a = diagonal_matrix(&[1.0, 2.0]).unwrap();
        solver.store_matrix(&a, &[1.0, 2.0]).unwrap();
        assert_eq!(solver.state(), DriverState::MatrixLoaded);

        let mut x = vec![0.0; 2];
        solver.solve_stored(&mut x, 1.0).unwrap();
        assert_eq!(solver.state(), DriverState::Solved);
        assert!(solver.convergence().unwrap().is_converged());

        solver.release();
        assert_eq!(solver.state(), DriverState::Released);
        assert!(matches!(solver.solve_stored(&mut x, 1.0), Err(SolverError::Released)));
    }

    #[test]
    fn solve_stored_needs_a_matrix() {
        let mut solver = Solver::new(SolverConfig::gmres()).unwrap();
        let mut x = vec![0.0; 2];
        assert!(matches!(solver.solve_stored(&mut x, 1.0), Err(SolverError::InvalidConfig(_))));
    }

    #[test]
    fn unit_factor_divides_written_solution() {
        let mut solver = Solver::new(SolverConfig::lu()).unwrap();
        let a = diagonal_matrix(&[1.0, 1.0]).unwrap();
        let mut x = vec![0.0; 2];
        solver
            .solve(LinearSystem::new(&a, &mut x, &[4.0, 8.0]).with_unit_factor(2.0))
            .unwrap();
        assert_eq!(x, vec![2.0, 4.0]);
    }

    #[test]
    fn breakdown_leaves_solution_untouched() {
        let mut solver = Solver::new(SolverConfig::lu()).unwrap();
        let a = diagonal_matrix(&[1.0, 0.0]).unwrap();
        let mut x = vec![0.25, 0.75];
        let err = solver.solve(LinearSystem::new(&a, &mut x, &[1.0, 1.0])).unwrap_err();
        let outcome = err.outcome().unwrap();
        assert_eq!(outcome.status, ConvergenceStatus::Breakdown);
        assert_eq!(x, vec![0.25, 0.75]);
        assert_eq!(solver.state(), DriverState::Failed);
    }

    #[test]
    fn structure_change_rebuilds_preconditioner() {
        let mut solver = Solver::new(SolverConfig::pcg().with_tolerance(Criterion::Initial, 1e-10, 100)).unwrap();
        let a = diagonal_matrix(&[2.0, 2.0, 2.0]).unwrap();
        let mut x = vec![0.0; 3];
        solver.solve(LinearSystem::new(&a, &mut x, &[2.0, 2.0, 2.0])).unwrap();

        let mut t = SparseTriplets::new(3, 3);
        for (r, c, v) in [(0, 0, 2.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 2.0), (2, 2, 2.0)] {
            t.push(r, c, v);
        }
        let b = t.to_csr().unwrap();
        let mut y = vec![0.0; 3];
        let outcome = solver.solve(LinearSystem::new(&b, &mut y, &[1.0, 1.0, 2.0])).unwrap();
        assert!(outcome.is_converged());
        assert!((y[0] - 1.0).abs() < 1e-8 && (y[2] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn zero_unit_factor_is_rejected() {
        let mut solver = Solver::new(SolverConfig::pcg()).unwrap();
        let a = diagonal_matrix(&[1.0]).unwrap();
        let mut x = vec![0.0];
        let result = solver.solve(LinearSystem::new(&a, &mut x, &[1.0]).with_unit_factor(0.0));
        assert!(matches!(result, Err(SolverError::InvalidConfig(_))));
    }
}
