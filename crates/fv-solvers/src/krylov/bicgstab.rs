//! Biconjugate Gradient Stabilized, right-preconditioned.

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
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s_hat = vec![0.0; n];
    let mut dx = vec![0.0; n];

    let mut rho_prev = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;
    let mut residual = r0;

    for iter in 1..=stopping.max_iterations {
        let rho = op.dot(&shadow, &r);
        if rho == 0.0 || !rho.is_finite() {
            return KernelOutcome::new(Termination::Breakdown, iter - 1, residual, r0);
        }
        if iter == 1 {
            p.copy_from_slice(&r);
        } else {
            let beta = (rho / rho_prev) * (alpha / omega);
            for i in 0..n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
            }
        }
        rho_prev = rho;

        apply_or_copy(pc, &p, &mut p_hat);
        op.apply(&p_hat, &mut v);
        let shadow_v = op.dot(&shadow, &v);
        if shadow_v == 0.0 || !shadow_v.is_finite() {
            return KernelOutcome::new(Termination::Breakdown, iter - 1, residual, r0);
        }
        alpha = rho / shadow_v;

        for i in 0..n {
            s[i] = r[i] - alpha * v[i];
        }
        let s_norm = op.norm(&s);
        if s_norm <= stopping.threshold(r0) {
            axpy(alpha, &p_hat, x);
            tracing::trace!(iter, residual = s_norm, "bicgstab half step");
            return KernelOutcome::new(Termination::Converged, iter, s_norm, r0);
        }

        apply_or_copy(pc, &s, &mut s_hat);
        op.apply(&s_hat, &mut t);
        let tt = op.dot(&t, &t);
        if tt == 0.0 || !tt.is_finite() {
            return KernelOutcome::new(Termination::Breakdown, iter, s_norm, r0);
        }
        omega = op.dot(&t, &s) / tt;
        if omega == 0.0 || !omega.is_finite() {
            axpy(alpha, &p_hat, x);
            return KernelOutcome::new(Termination::Breakdown, iter, s_norm, r0);
        }

        for i in 0..n {
            dx[i] = alpha * p_hat[i] + omega * s_hat[i];
            r[i] = s[i] - omega * t[i];
        }
        axpy(1.0, &dx, x);

        residual = op.norm(&r);
        let update = stopping.tracks_update().then(|| op.norm(&dx));
        tracing::trace!(iter, residual, "bicgstab");
        if let Check::Stop(termination) = stopping.check(residual, r0, update) {
            return KernelOutcome::new(termination, iter, residual, r0);
        }
    }

    KernelOutcome::new(Termination::MaxIterations, stopping.max_iterations, residual, r0)
}
