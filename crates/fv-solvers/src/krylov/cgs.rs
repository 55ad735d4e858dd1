//! Conjugate Gradient Squared, right-preconditioned.

use super::{Check, KernelOutcome, Operator, Stopping, Termination};
use crate::preconditioner::{apply_or_copy, Preconditioner};
use crate::vector_ops::axpy;

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

    let shadow = r.clone();
    let mut u = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut v_hat = vec![0.0; n];
    let mut u_hat = vec![0.0; n];
    let mut q_hat = vec![0.0; n];
    let mut sum = vec![0.0; n];
    let mut rho_prev = 1.0;
    let mut residual = r0;

    for iter in 1..=stopping.max_iterations {
        let rho = op.dot(&shadow, &r);
        if rho == 0.0 || !rho.is_finite() {
            return KernelOutcome::new(Termination::Breakdown, iter - 1, residual, r0);
        }
        if iter == 1 {
            u.copy_from_slice(&r);
            p.copy_from_slice(&u);
        } else {
            let beta = rho / rho_prev;
            for i in 0..n {
                u[i] = r[i] + beta * q[i];
                p[i] = u[i] + beta * (q[i] + beta * p[i]);
            }
        }
        rho_prev = rho;

        apply_or_copy(pc, &p, &mut p_hat);
        op.apply(&p_hat, &mut v_hat);
        let sigma = op.dot(&shadow, &v_hat);
        if sigma == 0.0 || !sigma.is_finite() {
            return KernelOutcome::new(Termination::Breakdown, iter - 1, residual, r0);
        }
        let alpha = rho / sigma;

        for i in 0..n {
            q[i] = u[i] - alpha * v_hat[i];
            sum[i] = u[i] + q[i];
        }
        apply_or_copy(pc, &sum, &mut u_hat);
        axpy(alpha, &u_hat, x);
        op.apply(&u_hat, &mut q_hat);
        axpy(-alpha, &q_hat, &mut r);

        residual = op.norm(&r);
        let update = stopping.tracks_update().then(|| alpha.abs() * op.norm(&u_hat));
        tracing::trace!(iter, residual, "cgs");
        if let Check::Stop(termination) = stopping.check(residual, r0, update) {
            return KernelOutcome::new(termination, iter, residual, r0);
        }
    }

    KernelOutcome::new(Termination::MaxIterations, stopping.max_iterations, residual, r0)
}
