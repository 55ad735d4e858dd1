//! Restarted flexible GMRES with right preconditioning.
//!
//! The preconditioned basis vectors zⱼ = M⁻¹vⱼ are kept, so the
//! preconditioner may change between iterations (a multigrid cycle, for
//! instance). With a fixed preconditioner this is plain right-preconditioned
//! GMRES. The Hessenberg matrix is reduced with Givens rotations, giving the
//! residual norm of every iterate without forming it.

use super::{Check, KernelOutcome, Operator, Stopping, Termination};
use crate::preconditioner::{apply_or_copy, Preconditioner};
use crate::vector_ops::axpy;

pub fn solve<O: Operator + ?Sized>(
    op: &O,
    pc: Option<&dyn Preconditioner>,
    b: &[f64],
    x: &mut [f64],
    stopping: &Stopping,
    restart: usize,
) -> KernelOutcome {
    let n = op.dim();
    let m = restart.max(1);
    let mut r = vec![0.0; n];
    op.residual(x, b, &mut r);
    let r0 = op.norm(&r);
    if let Some(outcome) = stopping.initial(r0) {
        return outcome;
    }

    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
    let mut precond_basis: Vec<Vec<f64>> = Vec::with_capacity(m);
    let mut h = vec![vec![0.0; m]; m + 1];
    let mut cs = vec![0.0; m];
    let mut sn = vec![0.0; m];
    let mut g = vec![0.0; m + 1];
    let mut w = vec![0.0; n];
    let mut correction = vec![0.0; n];

    let mut beta = r0;
    let mut iterations = 0;

    loop {
        basis.clear();
        precond_basis.clear();
        basis.push(r.iter().map(|v| v / beta).collect());
        g.fill(0.0);
        g[0] = beta;

        let mut k = 0;
        let mut residual = beta;
        let mut stop = None;

        while k < m && iterations < stopping.max_iterations {
            iterations += 1;

            let mut z = vec![0.0; n];
            apply_or_copy(pc, &basis[k], &mut z);
            op.apply(&z, &mut w);
            precond_basis.push(z);

            // modified Gram-Schmidt
            for (i, v) in basis.iter().enumerate() {
                let hik = op.dot(&w, v);
                h[i][k] = hik;
                axpy(-hik, v, &mut w);
            }
            let h_next = op.norm(&w);
            h[k + 1][k] = h_next;

            for i in 0..k {
                let (upper, lower) = (h[i][k], h[i + 1][k]);
                h[i][k] = cs[i] * upper + sn[i] * lower;
                h[i + 1][k] = -sn[i] * upper + cs[i] * lower;
            }
            let denom = h[k][k].hypot(h[k + 1][k]);
            if denom == 0.0 || !denom.is_finite() {
                stop = Some(Termination::Breakdown);
                break;
            }
            cs[k] = h[k][k] / denom;
            sn[k] = h[k + 1][k] / denom;
            h[k][k] = denom;
            h[k + 1][k] = 0.0;
            g[k + 1] = -sn[k] * g[k];
            g[k] *= cs[k];

            residual = g[k + 1].abs();
            k += 1;
            tracing::trace!(iter = iterations, residual, "gmres");

            if residual <= stopping.threshold(r0) {
                stop = Some(Termination::Converged);
                break;
            }
            // lucky breakdown: the Krylov space holds the solution
            if h_next == 0.0 {
                break;
            }
            basis.push(w.iter().map(|v| v / h_next).collect());
        }

        // y = H⁻¹ g on the leading k×k triangle
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[i][j] * y[j];
            }
            y[i] = sum / h[i][i];
        }
        correction.fill(0.0);
        for (yj, zj) in y.iter().zip(&precond_basis) {
            axpy(*yj, zj, &mut correction);
        }
        axpy(1.0, &correction, x);

        if stop == Some(Termination::Breakdown) {
            return KernelOutcome::new(Termination::Breakdown, iterations, residual, r0);
        }

        op.residual(x, b, &mut r);
        let true_residual = op.norm(&r);
        if stop == Some(Termination::Converged) {
            return KernelOutcome::new(Termination::Converged, iterations, true_residual, r0);
        }
        let update = stopping.tracks_update().then(|| op.norm(&correction));
        if let Check::Stop(termination) = stopping.check(true_residual, r0, update) {
            return KernelOutcome::new(termination, iterations, true_residual, r0);
        }
        if iterations >= stopping.max_iterations {
            return KernelOutcome::new(Termination::MaxIterations, iterations, true_residual, r0);
        }

        tracing::trace!(iter = iterations, residual = true_residual, "gmres restart");
        beta = true_residual;
    }
}
