//! Preconditioned Conjugate Gradient, for symmetric positive definite systems.

use super::{Check, KernelOutcome, Operator, Stopping, Termination};
use crate::preconditioner::{apply_or_copy, Preconditioner};
use crate::vector_ops::{axpy, xpby};

pub fn solve<O: Operator + ?Sized>(
    op: &O,
    pc: Option<&dyn Preconditioner>,
    b: &[f64],
    x: &mut [f64],
    stopping: &Stopping,
) -> KernelOutcome {
    let n = op.dim();
    let mut r = vec![0.0; n];
    op.residual(x, b, &mut r);
    let r0 = op.norm(&r);
    if let Some(outcome) = stopping.initial(r0) {
        return outcome;
    }

    let mut z = vec![0.0; n];
    let mut q = vec![0.0; n];
    apply_or_copy(pc, &r, &mut z);
    let mut p = z.clone();
    let mut rz = op.dot(&r, &z);
    let mut residual = r0;

    for iter in 1..=stopping.max_iterations {
        op.apply(&p, &mut q);
        let pq = op.dot(&p, &q);
        if pq == 0.0 || !pq.is_finite() {
            return KernelOutcome::new(Termination::Breakdown, iter - 1, residual, r0);
        }
        let alpha = rz / pq;
        axpy(alpha, &p, x);
        axpy(-alpha, &q, &mut r);

        residual = op.norm(&r);
        let update = stopping.tracks_update().then(|| alpha.abs() * op.norm(&p));
        tracing::trace!(iter, residual, "cg");
        if let Check::Stop(termination) = stopping.check(residual, r0, update) {
            return KernelOutcome::new(termination, iter, residual, r0);
        }

        apply_or_copy(pc, &r, &mut z);
        let rz_next = op.dot(&r, &z);
        if rz_next == 0.0 || !rz_next.is_finite() {
            return KernelOutcome::new(Termination::Breakdown, iter, residual, r0);
        }
        let beta = rz_next / rz;
        rz = rz_next;
        // p = z + beta * p
        xpby(&z, beta, &mut p);
    }

    KernelOutcome::new(Termination::MaxIterations, stopping.max_iterations, residual, r0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krylov::test_support::{error_against_ones, stopping};
    use crate::krylov::CsrOperator;
    use crate::preconditioner::test_matrices::poisson1d;
    use crate::preconditioner::{JacobiPreconditioner, SsorPreconditioner};
    use crate::tolerance::NativeCriterion;

    #[test]
    fn solves_poisson() {
        let a = poisson1d(20);
        let s = stopping(NativeCriterion::RelativeToInitial, 1e-12, 100);
        let err = error_against_ones(&a, |b, x| {
            let out = solve(&CsrOperator::new(&a), None, b, x, &s);
            assert_eq!(out.termination, Termination::Converged);
            // exact arithmetic would need at most n steps
            assert!(out.iterations <= 20);
        });
        assert!(err < 1e-9);
    }

    #[test]
    fn preconditioning_keeps_solution() {
        let a = poisson1d(30);
        let s = stopping(NativeCriterion::RelativeToInitial, 1e-12, 200);
        let jacobi = JacobiPreconditioner::from_matrix(&a).unwrap();
        let ssor = SsorPreconditioner::from_matrix(&a, 1.2).unwrap();
        for pc in [&jacobi as &dyn Preconditioner, &ssor] {
            let err = error_against_ones(&a, |b, x| {
                let out = solve(&CsrOperator::new(&a), Some(pc), b, x, &s);
                assert_eq!(out.termination, Termination::Converged, "{}", pc.name());
            });
            assert!(err < 1e-8);
        }
    }

    #[test]
    fn iteration_cap_reports_max_iterations() {
        let a = poisson1d(50);
        let s = stopping(NativeCriterion::RelativeToInitial, 1e-14, 3);
        let b = vec![1.0; 50];
        let mut x = vec![0.0; 50];
        let out = solve(&CsrOperator::new(&a), None, &b, &mut x, &s);
        assert_eq!(out.termination, Termination::MaxIterations);
        assert_eq!(out.iterations, 3);
        assert!(out.residual < out.initial_residual);
    }

    #[test]
    fn stops_on_small_update() {
        let a = poisson1d(10);
        let s = stopping(NativeCriterion::SolutionUpdate, 1e-8, 100);
        let err = error_against_ones(&a, |b, x| {
            let out = solve(&CsrOperator::new(&a), None, b, x, &s);
            assert_eq!(out.termination, Termination::Converged);
        });
        assert!(err < 1e-6);
    }
}
