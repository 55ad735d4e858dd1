//! Direct backend: dense LU with iterative refinement.
//!
//! The stored matrix is factorized once per distinct matrix and reused for
//! later right-hand sides. Each refinement step solves `L e = r` with the
//! factors and corrects `x`, until the adapted tolerance is met or the
//! iteration cap is reached. This is what lets every residual-based
//! criterion, `matrix` included, mean the same thing here as elsewhere.
//!
//! Suitable for small-to-medium systems; the factorization is dense.

use std::time::Instant;

use nalgebra::{DVector, Dyn, LU};
use nalgebra_sparse::CsrMatrix;

use super::{breakdown, not_loaded, DriverSettings, RawStatus, SolverDriver, StoredSystem};
use crate::convergence::Suite;
use crate::error::Result;
use crate::krylov::{Check, KernelOutcome, Termination};
use crate::matrix::{residual, to_dense, MatrixSignature};
use crate::vector_ops::{axpy, norm2};

pub const CONVERGED: i32 = 0;
pub const MAX_ITERATIONS: i32 = 1;
pub const SINGULAR: i32 = -1;

pub struct DirectDriver {
    settings: DriverSettings,
    system: Option<StoredSystem>,
    factors: Option<(MatrixSignature, LU<f64, Dyn, Dyn>)>,
    factorizations: usize,
}

impl DirectDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            settings,
            system: None,
            factors: None,
            factorizations: 0,
        }
    }

    /// Number of LU factorizations performed so far.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    fn code(termination: Termination) -> i32 {
        match termination {
            Termination::Converged => CONVERGED,
            Termination::MaxIterations => MAX_ITERATIONS,
            Termination::Breakdown | Termination::Diverged => SINGULAR,
        }
    }
}

impl SolverDriver for DirectDriver {
    fn suite(&self) -> Suite {
        Suite::Direct
    }

    fn load(&mut self, matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<()> {
        self.system = Some(StoredSystem::new(matrix, rhs));
        Ok(())
    }

    fn solve(&mut self, x: &mut [f64]) -> Result<RawStatus> {
        let system = self.system.as_ref().ok_or_else(|| not_loaded(Suite::Direct))?;
        let (adapted, stopping) = self.settings.stopping(Suite::Direct, system)?;
        let start = Instant::now();

        let stale = match &self.factors {
            Some((signature, _)) => *signature != system.signature,
            None => true,
        };
        if stale {
            tracing::debug!(rows = system.matrix.nrows(), "LU factorization");
            self.factors = Some((system.signature, to_dense(&system.matrix).lu()));
            self.factorizations += 1;
        }
        let lu = match &self.factors {
            Some((_, lu)) => lu,
            None => return Err(not_loaded(Suite::Direct)),
        };

        let n = x.len();
        let mut r = vec![0.0; n];
        residual(&system.matrix, x, &system.rhs, &mut r);
        let r0 = norm2(&r);

        let kernel = match stopping.initial(r0) {
            Some(outcome) => outcome,
            None if !lu.is_invertible() => KernelOutcome::new(Termination::Breakdown, 0, r0, r0),
            None => {
                let mut outcome = None;
                let mut previous = r0;
                for iter in 1..=stopping.max_iterations {
                    let Some(e) = lu.solve(&DVector::from_column_slice(&r)) else {
                        outcome = Some(KernelOutcome::new(Termination::Breakdown, iter - 1, previous, r0));
                        break;
                    };
                    axpy(1.0, e.as_slice(), x);
                    residual(&system.matrix, x, &system.rhs, &mut r);
                    let current = norm2(&r);
                    tracing::trace!(iter, residual = current, "lu refinement");

                    let update = stopping.tracks_update().then(|| e.norm());
                    if let Check::Stop(termination) = stopping.check(current, r0, update) {
                        outcome = Some(KernelOutcome::new(termination, iter, current, r0));
                        break;
                    }
                    // refinement has hit round-off
                    if current >= previous {
                        outcome = Some(KernelOutcome::new(Termination::MaxIterations, iter, current, r0));
                        break;
                    }
                    previous = current;
                }
                outcome.unwrap_or_else(|| {
                    KernelOutcome::new(Termination::MaxIterations, stopping.max_iterations, previous, r0)
                })
            }
        };

        residual(&system.matrix, x, &system.rhs, &mut r);
        let final_residual = norm2(&r);
        Ok(RawStatus {
            code: Self::code(kernel.termination),
            iterations: kernel.iterations,
            residual: final_residual,
            tolerance_scale: adapted.scale,
            breakdown: breakdown(&adapted, &kernel, final_residual, system),
            elapsed: start.elapsed().as_secs_f64(),
        })
    }

    fn reset(&mut self) {
        self.factors = None;
    }

    fn release(&mut self) {
        self.factors = None;
        self.system = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::matrix::{diagonal_matrix, SparseTriplets};
    use crate::tolerance::Criterion;

    fn driver(criterion: Criterion, tolerance: f64, max_iterations: usize) -> DirectDriver {
        let config = SolverConfig::lu().with_tolerance(criterion, tolerance, max_iterations);
        DirectDriver::new(DriverSettings::from_config(&config))
    }

    #[test]
    fn solves_diagonal_system() {
        // Solve: [2 0; 0 3] * [x; y] = [4; 9]
        let mut d = driver(Criterion::Default, 1e-10, 10);
        d.load(&diagonal_matrix(&[2.0, 3.0]).unwrap(), &[4.0, 9.0]).unwrap();
        let mut x = vec![0.0; 2];
        let status = d.solve(&mut x).unwrap();
        assert_eq!(status.code, CONVERGED);
        assert_eq!(status.iterations, 1);
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn solves_3x3_and_reuses_factors() {
        // K = [4 -1 0; -1 4 -1; 0 -1 4]
        let mut t = SparseTriplets::new(3, 3);
        for (r, c, v) in [(0, 0, 4.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 4.0), (1, 2, -1.0), (2, 1, -1.0), (2, 2, 4.0)] {
            t.push(r, c, v);
        }
        let k = t.to_csr().unwrap();
        let mut d = driver(Criterion::Unscaled, 1e-12, 10);

        d.load(&k, &[1.0, 2.0, 1.0]).unwrap();
        let mut x = vec![0.0; 3];
        assert_eq!(d.solve(&mut x).unwrap().code, CONVERGED);

        d.load(&k, &[0.0, 1.0, 0.0]).unwrap();
        let mut y = vec![0.0; 3];
        let status = d.solve(&mut y).unwrap();
        assert_eq!(status.code, CONVERGED);
        assert!(status.residual <= 1e-12);
        assert_eq!(d.factorizations(), 1);
    }

    #[test]
    fn singular_matrix_reports_breakdown() {
        let mut d = driver(Criterion::Default, 1e-10, 10);
        d.load(&diagonal_matrix(&[1.0, 0.0]).unwrap(), &[1.0, 1.0]).unwrap();
        let mut x = vec![0.0; 2];
        let status = d.solve(&mut x).unwrap();
        assert_eq!(status.code, SINGULAR);
        assert_eq!(Suite::Direct.classify(status.code), crate::convergence::ConvergenceStatus::Breakdown);
    }

    #[test]
    fn matrix_criterion_scales_by_infinity_norm() {
        let mut d = driver(Criterion::Matrix, 1e-10, 10);
        d.load(&diagonal_matrix(&[8.0, 2.0]).unwrap(), &[1.0, 1.0]).unwrap();
        let mut x = vec![0.0; 2];
        let status = d.solve(&mut x).unwrap();
        assert_eq!(status.tolerance_scale, 8.0);
        assert_eq!(status.code, CONVERGED);
    }

    #[test]
    fn zero_iterations_leave_guess_alone() {
        let mut d = driver(Criterion::Default, 1e-10, 0);
        d.load(&diagonal_matrix(&[2.0, 2.0]).unwrap(), &[2.0, 2.0]).unwrap();
        let mut x = vec![0.5, 0.5];
        let status = d.solve(&mut x).unwrap();
        assert_eq!(status.code, MAX_ITERATIONS);
        assert_eq!(status.iterations, 0);
        assert_eq!(x, vec![0.5, 0.5]);
    }
}
