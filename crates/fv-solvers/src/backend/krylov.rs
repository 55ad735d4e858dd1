//! Serial Krylov backend over CSR storage.

use std::time::Instant;

use nalgebra_sparse::CsrMatrix;

use super::{breakdown, not_loaded, DriverSettings, RawStatus, SolverDriver, StoredSystem};
use crate::convergence::Suite;
use crate::error::{Result, SolverError};
use crate::krylov::{self, CsrOperator, KrylovMethod, Operator, Termination};
use crate::preconditioner::{PreconditionerSlot, PreconditionerSpec};

pub const CONVERGED: i32 = 0;
pub const MAX_ITERATIONS: i32 = -1;
pub const BREAKDOWN: i32 = -3;
pub const DIVERGED: i32 = -4;

pub struct KrylovDriver {
    settings: DriverSettings,
    method: KrylovMethod,
    preconditioner: PreconditionerSlot,
    system: Option<StoredSystem>,
}

impl KrylovDriver {
    pub fn new(settings: DriverSettings, preconditioner: PreconditionerSpec) -> Result<Self> {
        let method = KrylovMethod::from_method(settings.method, settings.restart).ok_or(
            SolverError::UnsupportedMethod {
                method: settings.method.name(),
                suite: Suite::Krylov.name(),
            },
        )?;
        Ok(Self {
            settings,
            method,
            preconditioner: PreconditionerSlot::new(preconditioner),
            system: None,
        })
    }

    pub fn method(&self) -> KrylovMethod {
        self.method
    }

    pub fn preconditioner(&self) -> &PreconditionerSlot {
        &self.preconditioner
    }

    fn code(termination: Termination) -> i32 {
        match termination {
            Termination::Converged => CONVERGED,
            Termination::MaxIterations => MAX_ITERATIONS,
            Termination::Breakdown => BREAKDOWN,
            Termination::Diverged => DIVERGED,
        }
    }
}

impl SolverDriver for KrylovDriver {
    fn suite(&self) -> Suite {
        Suite::Krylov
    }

    fn load(&mut self, matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<()> {
        self.system = Some(StoredSystem::new(matrix, rhs));
        Ok(())
    }

    fn solve(&mut self, x: &mut [f64]) -> Result<RawStatus> {
        let system = self.system.as_ref().ok_or_else(|| not_loaded(Suite::Krylov))?;
        let (adapted, stopping) = self.settings.stopping(Suite::Krylov, system)?;
        let start = Instant::now();

        let pc = self.preconditioner.prepare(&system.matrix)?;
        let op = CsrOperator::new(&system.matrix);
        let kernel = krylov::solve(self.method, &op, pc, &system.rhs, x, &stopping);

        let mut r = vec![0.0; x.len()];
        op.residual(x, &system.rhs, &mut r);
        let residual = op.norm(&r);
        tracing::debug!(
            method = self.method.name(),
            iterations = kernel.iterations,
            residual,
            "krylov solve finished"
        );

        Ok(RawStatus {
            code: Self::code(kernel.termination),
            iterations: kernel.iterations,
            residual,
            tolerance_scale: adapted.scale,
            breakdown: breakdown(&adapted, &kernel, residual, system),
            elapsed: start.elapsed().as_secs_f64(),
        })
    }

    fn reset(&mut self) {
        self.preconditioner.reset();
    }

    fn release(&mut self) {
        self.preconditioner.reset();
        self.system = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::matrix::spmv;
    use crate::preconditioner::test_matrices::{poisson1d, upwind1d};
    use crate::tolerance::Criterion;

    fn run(config: SolverConfig, a: &CsrMatrix<f64>) -> (RawStatus, Vec<f64>) {
        let mut driver =
            KrylovDriver::new(DriverSettings::from_config(&config), config.effective_preconditioner()).unwrap();
        let mut b = vec![0.0; a.nrows()];
        spmv(a, &vec![1.0; a.nrows()], &mut b);
        driver.load(a, &b).unwrap();
        let mut x = vec![0.0; a.nrows()];
        let status = driver.solve(&mut x).unwrap();
        (status, x)
    }

    #[test]
    fn pcg_solves_poisson() {
        let a = poisson1d(30);
        let (status, x) = run(SolverConfig::pcg().with_tolerance(Criterion::Initial, 1e-10, 200), &a);
        assert_eq!(status.code, CONVERGED);
        assert!(x.iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert!(status.breakdown.contains_key("recursive_residual"));
    }

    #[test]
    fn bicgstab_on_non_symmetric() {
        let a = upwind1d(25);
        let (status, _) = run(SolverConfig::bicgstab().with_tolerance(Criterion::Rhs, 1e-10, 200), &a);
        assert_eq!(status.code, CONVERGED);
        assert!(status.tolerance_scale > 1.0);
    }

    #[test]
    fn iteration_cap_maps_to_native_code() {
        let a = poisson1d(50);
        let (status, _) = run(SolverConfig::cg().with_tolerance(Criterion::Initial, 1e-14, 3), &a);
        assert_eq!(status.code, MAX_ITERATIONS);
        assert_eq!(status.iterations, 3);
        assert_eq!(
            Suite::Krylov.classify(status.code),
            crate::convergence::ConvergenceStatus::MaxIterationsReached
        );
    }

    #[test]
    fn preconditioner_is_reused_across_solves() {
        let a = poisson1d(10);
        let config = SolverConfig::pcg();
        let mut driver =
            KrylovDriver::new(DriverSettings::from_config(&config), config.effective_preconditioner()).unwrap();
        for _ in 0..3 {
            driver.load(&a, &vec![1.0; 10]).unwrap();
            let mut x = vec![0.0; 10];
            driver.solve(&mut x).unwrap();
        }
        assert_eq!(driver.preconditioner().builds(), 1);

        driver.reset();
        let mut x = vec![0.0; 10];
        driver.solve(&mut x).unwrap();
        assert_eq!(driver.preconditioner().builds(), 2);
    }

    #[test]
    fn lu_is_not_a_krylov_method() {
        let settings = DriverSettings::from_config(&SolverConfig::lu());
        assert!(matches!(
            KrylovDriver::new(settings, PreconditionerSpec::None),
            Err(SolverError::UnsupportedMethod { .. })
        ));
    }
}
