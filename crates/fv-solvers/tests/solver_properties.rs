//! Facade-level properties every backend must satisfy
//!
//! Each test runs the same scenario through one configuration per backend
//! family: direct LU, serial Krylov, distributed Krylov on one process, and
//! both accelerated solvers.
use std::sync::Arc;

use fv_solvers::{
    diagonal_matrix, Communicator, ConvergenceStatus, CsrMatrix, Criterion, DriverState, GridShape,
    LinearSystem, LocalGroupComm, MeshPartition, PreconditionerSpec, Solver, SolverConfig,
    SolverError, SparseTriplets, Suite,
};

fn every_backend() -> Vec<SolverConfig> {
    vec![
        SolverConfig::lu(),
        SolverConfig::pcg(),
        SolverConfig::gmres(),
        SolverConfig::distributed_cg(),
        SolverConfig::fgmres(),
        SolverConfig::amg(),
    ]
}

fn tridiagonal(n: usize) -> CsrMatrix<f64> {
    let mut t = SparseTriplets::new(n, n);
    for i in 0..n {
        t.push(i, i, 3.0);
        if i > 0 {
            t.push(i, i - 1, -1.0);
        }
        if i + 1 < n {
            t.push(i, i + 1, -1.0);
        }
    }
    t.to_csr().unwrap()
}

#[test]
fn identity_converges_in_one_iteration() {
    let identity = diagonal_matrix(&[1.0; 5]).unwrap();
    let b = [1.0, -2.0, 3.0, 0.5, 4.0];
    for config in every_backend() {
        let suite = config.backend;
        let config = config.with_tolerance(Criterion::Unscaled, 1e-10, 50);
        let mut solver = Solver::new(config).unwrap();
        let mut x = vec![0.0; 5];
        let outcome = solver.solve(LinearSystem::new(&identity, &mut x, &b)).unwrap();

        assert_eq!(outcome.status, ConvergenceStatus::Converged, "{}", suite);
        assert!(outcome.iterations <= 1, "{}: {} iterations", suite, outcome.iterations);
        assert!(outcome.residual <= 1e-10, "{}", suite);
        for (xi, bi) in x.iter().zip(&b) {
            assert!((xi - bi).abs() < 1e-10, "{}", suite);
        }
    }
}

#[test]
fn diag_two_scenario() {
    // L = diag(2,2,2), b = [2,2,2], unscaled 1e-10, 100 iterations
    let a = diagonal_matrix(&[2.0, 2.0, 2.0]).unwrap();
    for config in every_backend() {
        let suite = config.backend;
        let mut solver = Solver::new(config.with_tolerance(Criterion::Unscaled, 1e-10, 100)).unwrap();
        let mut x = vec![0.0; 3];
        let outcome = solver.solve(LinearSystem::new(&a, &mut x, &[2.0, 2.0, 2.0])).unwrap();

        assert!(outcome.is_converged(), "{}: {}", suite, outcome);
        assert!(outcome.iterations <= 3, "{}", suite);
        assert!(x.iter().all(|v| (v - 1.0).abs() < 1e-9), "{}: {:?}", suite, x);
        assert_eq!(solver.convergence(), Some(&outcome));
    }
}

#[test]
fn zero_iterations_report_cap_and_keep_guess() {
    let a = tridiagonal(6);
    for config in every_backend() {
        let suite = config.backend;
        let mut solver = Solver::new(config.with_tolerance(Criterion::Initial, 1e-8, 0)).unwrap();
        let mut x = vec![0.5; 6];
        let outcome = solver.solve(LinearSystem::new(&a, &mut x, &[1.0; 6])).unwrap();

        assert_eq!(outcome.status, ConvergenceStatus::MaxIterationsReached, "{}", suite);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(x, vec![0.5; 6], "{}", suite);
    }
}

#[test]
fn storing_twice_gives_the_same_outcome() {
    let a = tridiagonal(12);
    let b = vec![1.0; 12];
    for config in every_backend() {
        let config = config.with_tolerance(Criterion::Initial, 1e-10, 200);

        let mut once = Solver::new(config.clone()).unwrap();
        once.store_matrix(&a, &b).unwrap();
        let mut x1 = vec![0.0; 12];
        let first = once.solve_stored(&mut x1, 1.0).unwrap();

        let mut twice = Solver::new(config).unwrap();
        twice.store_matrix(&a, &b).unwrap();
        twice.store_matrix(&a, &b).unwrap();
        let mut x2 = vec![0.0; 12];
        let second = twice.solve_stored(&mut x2, 1.0).unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.code, second.code);
        assert_eq!(first.iterations, second.iterations);
        assert_eq!(first.residual, second.residual);
        assert_eq!(first.residual_breakdown, second.residual_breakdown);
        assert_eq!(x1, x2);
    }
}

/// Configurations that cache a factorization, preconditioner or hierarchy.
fn cached_setups() -> Vec<SolverConfig> {
    vec![
        SolverConfig::lu(),
        SolverConfig::gmres().with_preconditioner(PreconditionerSpec::Ilu),
        SolverConfig::fgmres(),
        SolverConfig::amg(),
    ]
}

fn pentadiagonal(n: usize) -> CsrMatrix<f64> {
    let mut t = SparseTriplets::new(n, n);
    for i in 0..n {
        t.push(i, i, 5.0);
        for offset in [1, 2] {
            if i >= offset {
                t.push(i, i - offset, -1.0);
            }
            if i + offset < n {
                t.push(i, i + offset, -1.0);
            }
        }
    }
    t.to_csr().unwrap()
}

#[test]
fn stored_system_solves_identically_after_reset() {
    let a = tridiagonal(12);
    let b = vec![1.0; 12];
    for config in cached_setups() {
        let suite = config.backend;
        let config = config.with_tolerance(Criterion::Initial, 1e-10, 300);

        let mut fresh = Solver::new(config.clone()).unwrap();
        fresh.store_matrix(&a, &b).unwrap();
        let mut x1 = vec![0.0; 12];
        let expected = fresh.solve_stored(&mut x1, 1.0).unwrap();

        let mut reset = Solver::new(config).unwrap();
        reset.store_matrix(&a, &b).unwrap();
        let mut warmup = vec![0.0; 12];
        reset.solve_stored(&mut warmup, 1.0).unwrap();
        reset.reset();
        let mut x2 = vec![0.0; 12];
        let after = reset.solve_stored(&mut x2, 1.0).unwrap();

        assert_eq!(expected.status, ConvergenceStatus::Converged, "{}", suite);
        assert_eq!(expected.status, after.status, "{}", suite);
        assert_eq!(expected.code, after.code, "{}", suite);
        assert_eq!(expected.iterations, after.iterations, "{}", suite);
        assert_eq!(expected.residual, after.residual, "{}", suite);
        assert_eq!(x1, x2, "{}", suite);
    }
}

#[test]
fn structure_change_solves_like_a_fresh_solver() {
    let b = vec![1.0; 10];
    let first = tridiagonal(10);
    let second = pentadiagonal(10);
    for config in cached_setups() {
        let suite = config.backend;
        let config = config.with_tolerance(Criterion::Initial, 1e-10, 300);

        let mut fresh = Solver::new(config.clone()).unwrap();
        let mut x1 = vec![0.0; 10];
        let expected = fresh.solve(LinearSystem::new(&second, &mut x1, &b)).unwrap();

        let mut reused = Solver::new(config).unwrap();
        let mut x0 = vec![0.0; 10];
        reused.solve(LinearSystem::new(&first, &mut x0, &b)).unwrap();
        let mut x2 = vec![0.0; 10];
        let after = reused.solve(LinearSystem::new(&second, &mut x2, &b)).unwrap();

        assert_eq!(expected.status, ConvergenceStatus::Converged, "{}", suite);
        assert_eq!(expected.status, after.status, "{}", suite);
        assert_eq!(expected.iterations, after.iterations, "{}", suite);
        assert_eq!(expected.residual, after.residual, "{}", suite);
        assert_eq!(x1, x2, "{}", suite);
    }
}

#[test]
fn dimension_mismatch_never_reaches_backend() {
    let square = tridiagonal(4);
    let mut rect = SparseTriplets::new(4, 3);
    rect.push(0, 0, 1.0);
    let rect = rect.to_csr().unwrap();

    for config in every_backend() {
        let mut solver = Solver::new(config).unwrap();

        let mut short = vec![0.0; 3];
        let result = solver.solve(LinearSystem::new(&square, &mut short, &[1.0; 4]));
        assert!(matches!(result, Err(SolverError::DimensionMismatch(_))));

        let mut x = vec![0.0; 4];
        let result = solver.solve(LinearSystem::new(&square, &mut x, &[1.0; 5]));
        assert!(matches!(result, Err(SolverError::DimensionMismatch(_))));

        let mut x = vec![0.0; 3];
        let result = solver.solve(LinearSystem::new(&rect, &mut x, &[1.0; 4]));
        assert!(matches!(result, Err(SolverError::DimensionMismatch(_))));

        assert_eq!(solver.state(), DriverState::ResourcesAllocated);
    }
}

#[test]
fn single_process_backends_reject_multi_process_partitions() {
    let comms = LocalGroupComm::group(2);
    let comm: Arc<dyn Communicator> = Arc::new(comms[0].clone());
    let partition = MeshPartition::slabs(GridShape::grid1d(8), 1, comm).unwrap();

    for config in [SolverConfig::lu(), SolverConfig::pcg(), SolverConfig::fgmres(), SolverConfig::amg()] {
        let suite = config.backend;
        match Solver::with_partition(config, &partition) {
            Err(SolverError::MultiProcessUnsupported { processes, .. }) => assert_eq!(processes, 2),
            other => panic!("{}: expected MultiProcessUnsupported, got {:?}", suite, other.map(|_| ())),
        }
    }
}

#[test]
fn preconditioning_a_direct_solve_fails_eagerly() {
    let result = Solver::new(SolverConfig::lu().with_preconditioner(PreconditionerSpec::Jacobi));
    assert!(matches!(result, Err(SolverError::IncompatiblePreconditioner { .. })));
}

#[test]
fn solution_criterion_only_on_distributed() {
    for config in [SolverConfig::lu(), SolverConfig::gmres(), SolverConfig::amg()] {
        let result = Solver::new(config.with_tolerance(Criterion::Solution, 1e-8, 10));
        assert!(matches!(result, Err(SolverError::UnsupportedCriterion { .. })));
    }
    let a = tridiagonal(8);
    let mut solver =
        Solver::new(SolverConfig::distributed_cg().with_tolerance(Criterion::Solution, 1e-12, 100)).unwrap();
    let mut x = vec![0.0; 8];
    let outcome = solver.solve(LinearSystem::new(&a, &mut x, &[1.0; 8])).unwrap();
    assert!(outcome.is_converged());
}

#[test]
fn direct_solver_honours_matrix_criterion() {
    // LU refines until ‖Lx − b‖ ≤ tol·‖L‖∞; the criterion is neither
    // ignored nor rejected
    let a = tridiagonal(10);
    let mut solver = Solver::new(SolverConfig::lu().with_tolerance(Criterion::Matrix, 1e-12, 10)).unwrap();
    let mut x = vec![0.0; 10];
    let outcome = solver.solve(LinearSystem::new(&a, &mut x, &[1.0; 10])).unwrap();

    assert_eq!(outcome.suite, Suite::Direct);
    assert!(outcome.is_converged());
    assert_eq!(outcome.tolerance_scale, 5.0);
    assert!(outcome.residual <= 1e-12 * 5.0);
    assert_eq!(outcome.residual_breakdown["matrix_norm"], 5.0);
}

#[test]
fn scales_are_positive_for_well_posed_systems() {
    let a = tridiagonal(6);
    let b = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
    for config in every_backend() {
        for criterion in Criterion::ALL {
            let config = config.clone().with_tolerance(criterion, 1e-8, 200);
            let Ok(mut solver) = Solver::new(config) else {
                continue;
            };
            let mut x = vec![0.0; 6];
            let outcome = solver.solve(LinearSystem::new(&a, &mut x, &b)).unwrap();
            assert!(outcome.tolerance_scale > 0.0 && outcome.tolerance_scale.is_finite());
            assert!(outcome.scaled_residual.is_finite());
        }
    }
}

#[test]
fn release_is_idempotent() {
    for config in every_backend() {
        let mut solver = Solver::new(config).unwrap();
        solver.release();
        solver.release();
        assert_eq!(solver.state(), DriverState::Released);
        let a = diagonal_matrix(&[1.0]).unwrap();
        let mut x = vec![0.0];
        assert!(matches!(
            solver.solve(LinearSystem::new(&a, &mut x, &[1.0])),
            Err(SolverError::Released)
        ));
    }
}
