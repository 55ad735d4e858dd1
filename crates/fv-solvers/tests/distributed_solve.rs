//! Multi-rank solves on threads, checked against a serial solve
//!
//! A 2D five-point system is split into slabs with one ghost layer. Each
//! rank assembles the rows of its overlapping cells, solves through the
//! facade, and must end with the serial solution on every local cell,
//! ghosts included.
use std::sync::Arc;
use std::thread;

use fv_solvers::{
    ConvergenceStatus, CsrMatrix, Criterion, DriverState, GridShape, LinearSystem, LocalGroupComm,
    MeshPartition, PreconditionerSpec, Solver, SolverConfig, SparseTriplets,
};

const NX: usize = 6;
const NY: usize = 8;

fn rhs_at(gid: usize) -> f64 {
    1.0 + (gid % 5) as f64 * 0.25
}

/// Rows of the cells in `ids` (global numbering), columns restricted to
/// the same set and renumbered locally.
fn assemble(ids: &[usize]) -> (CsrMatrix<f64>, Vec<f64>) {
    let local_of = |gid: usize| ids.iter().position(|&g| g == gid);
    let mut t = SparseTriplets::new(ids.len(), ids.len());
    let mut b = Vec::with_capacity(ids.len());
    for (i, &gid) in ids.iter().enumerate() {
        let (ix, iy) = (gid % NX, gid / NX);
        t.push(i, i, 4.0);
        let mut neighbours = Vec::new();
        if ix > 0 {
            neighbours.push(gid - 1);
        }
        if ix + 1 < NX {
            neighbours.push(gid + 1);
        }
        if iy > 0 {
            neighbours.push(gid - NX);
        }
        if iy + 1 < NY {
            neighbours.push(gid + NX);
        }
        for n in neighbours {
            if let Some(j) = local_of(n) {
                t.push(i, j, -1.0);
            }
        }
        b.push(rhs_at(gid));
    }
    (t.to_csr().unwrap(), b)
}

fn serial_solution() -> Vec<f64> {
    let ids: Vec<usize> = (0..NX * NY).collect();
    let (a, b) = assemble(&ids);
    let mut solver = Solver::new(SolverConfig::lu()).unwrap();
    let mut x = vec![0.0; ids.len()];
    solver.solve(LinearSystem::new(&a, &mut x, &b)).unwrap();
    x
}

fn run_ranks(ranks: usize, config: SolverConfig) -> Vec<(Vec<usize>, Vec<f64>, usize)> {
    let handles: Vec<_> = LocalGroupComm::group(ranks)
        .into_iter()
        .map(|comm| {
            let config = config.clone();
            thread::spawn(move || {
                let partition = MeshPartition::slabs(GridShape::grid2d(NX, NY), 1, Arc::new(comm)).unwrap();
                let ids = partition.global_overlapping_ids().to_vec();
                let (a, b) = assemble(&ids);

                let mut solver = Solver::with_partition(config, &partition).unwrap();
                let mut x = vec![0.0; ids.len()];
                let outcome = solver.solve(LinearSystem::new(&a, &mut x, &b)).unwrap();
                assert_eq!(outcome.status, ConvergenceStatus::Converged);

                solver.release();
                assert_eq!(solver.state(), DriverState::Released);
                (ids, x, outcome.iterations)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn assert_matches_serial(results: &[(Vec<usize>, Vec<f64>, usize)]) {
    let expected = serial_solution();
    let iterations = results[0].2;
    for (ids, x, its) in results {
        assert_eq!(*its, iterations, "ranks disagree on iteration count");
        for (&gid, &value) in ids.iter().zip(x) {
            assert!(
                (value - expected[gid]).abs() < 1e-8,
                "cell {}: {} vs {}",
                gid,
                value,
                expected[gid]
            );
        }
    }
}

#[test]
fn two_ranks_cg_matches_serial() {
    let config = SolverConfig::distributed_cg().with_tolerance(Criterion::Initial, 1e-12, 500);
    assert_matches_serial(&run_ranks(2, config));
}

#[test]
fn four_ranks_gmres_matches_serial() {
    let config = SolverConfig::distributed_gmres().with_tolerance(Criterion::Rhs, 1e-12, 500);
    assert_matches_serial(&run_ranks(4, config));
}

#[test]
fn jacobi_bicgstab_on_three_ranks() {
    let config = SolverConfig::distributed_bicgstab()
        .with_preconditioner(PreconditionerSpec::Jacobi)
        .with_tolerance(Criterion::Unscaled, 1e-10, 500);
    assert_matches_serial(&run_ranks(3, config));
}

#[test]
fn one_rank_in_a_group_of_one_matches_serial() {
    let config = SolverConfig::distributed_cg().with_tolerance(Criterion::Matrix, 1e-13, 500);
    assert_matches_serial(&run_ranks(1, config));
}
