//! Krylov subspace kernels.
//!
//! Kernels are written against the [`Operator`] trait, so the same code runs
//! on a serial CSR matrix and on the owned rows of a partitioned one. Every
//! inner product goes through [`Operator::dot`], which is a global reduction
//! in the distributed case; all ranks therefore take the same branches.
//!
//! Stopping decisions come from [`Stopping`], built from an adapted
//! tolerance:
//!
//! ```text
//! threshold = tolerance * scale * reference
//! reference = 1 | ‖r₀‖ | ‖b‖ | ‖L‖∞        (by native criterion)
//! ```

pub mod bicgstab;
pub mod cg;
pub mod cgs;
pub mod gmres;

use nalgebra_sparse::CsrMatrix;

use crate::config::Method;
use crate::matrix::spmv;
use crate::preconditioner::Preconditioner;
use crate::tolerance::{AdaptedTolerance, NativeCriterion};
use crate::vector_ops;

/// Linear operator over the vectors a kernel iterates on.
pub trait Operator {
    /// Length of the vectors this rank holds.
    fn dim(&self) -> usize;

    /// y = A x
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// Global inner product.
    fn dot(&self, a: &[f64], b: &[f64]) -> f64;

    fn norm(&self, a: &[f64]) -> f64 {
        self.dot(a, a).sqrt()
    }

    /// r = b − A x
    fn residual(&self, x: &[f64], b: &[f64], r: &mut [f64]) {
        self.apply(x, r);
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
    }
}

/// Serial operator over a CSR matrix.
#[derive(Debug, Clone, Copy)]
pub struct CsrOperator<'a> {
    matrix: &'a CsrMatrix<f64>,
}

impl<'a> CsrOperator<'a> {
    pub fn new(matrix: &'a CsrMatrix<f64>) -> Self {
        Self { matrix }
    }
}

impl Operator for CsrOperator<'_> {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        spmv(self.matrix, x, y);
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        vector_ops::dot(a, b)
    }
}

/// Why a kernel stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged,
    MaxIterations,
    Breakdown,
    Diverged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelOutcome {
    pub termination: Termination,
    pub iterations: usize,
    /// Residual norm as tracked by the recurrence
    pub residual: f64,
    pub initial_residual: f64,
}

impl KernelOutcome {
    pub fn new(termination: Termination, iterations: usize, residual: f64, initial_residual: f64) -> Self {
        Self {
            termination,
            iterations,
            residual,
            initial_residual,
        }
    }
}

/// Result of one convergence test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Continue,
    Stop(Termination),
}

/// Stopping rule shared by every kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stopping {
    pub native: NativeCriterion,
    /// tolerance · scale
    pub target: f64,
    pub rhs_norm: f64,
    pub matrix_norm: f64,
    pub max_iterations: usize,
    pub divergence_tolerance: f64,
}

impl Stopping {
    pub fn new(
        adapted: &AdaptedTolerance,
        tolerance: f64,
        max_iterations: usize,
        divergence_tolerance: f64,
        rhs_norm: f64,
        matrix_norm: f64,
    ) -> Self {
        Self {
            native: adapted.native,
            target: adapted.scaled(tolerance),
            rhs_norm,
            matrix_norm,
            max_iterations,
            divergence_tolerance,
        }
    }

    /// Residual threshold; zero for the solution-update criterion.
    pub fn threshold(&self, initial_residual: f64) -> f64 {
        match self.native {
            NativeCriterion::Absolute => self.target,
            NativeCriterion::RelativeToInitial => self.target * initial_residual,
            NativeCriterion::RelativeToRhs => self.target * self.rhs_norm,
            NativeCriterion::RelativeToMatrix => self.target * self.matrix_norm,
            NativeCriterion::SolutionUpdate => 0.0,
        }
    }

    /// Whether kernels need to report ‖xₖ − xₖ₋₁‖.
    pub fn tracks_update(&self) -> bool {
        self.native == NativeCriterion::SolutionUpdate
    }

    /// Decide before the first iteration.
    pub fn initial(&self, initial_residual: f64) -> Option<KernelOutcome> {
        let stop = |termination| Some(KernelOutcome::new(termination, 0, initial_residual, initial_residual));
        if self.max_iterations == 0 {
            return stop(Termination::MaxIterations);
        }
        if !initial_residual.is_finite() {
            return stop(Termination::Breakdown);
        }
        if initial_residual <= self.threshold(initial_residual) {
            return stop(Termination::Converged);
        }
        None
    }

    /// Test the residual (and, when tracked, the solution update).
    pub fn check(&self, residual: f64, initial_residual: f64, update: Option<f64>) -> Check {
        if !residual.is_finite() {
            return Check::Stop(Termination::Breakdown);
        }
        if residual <= self.threshold(initial_residual) {
            return Check::Stop(Termination::Converged);
        }
        if let Some(update) = update {
            if self.tracks_update() && update <= self.target {
                return Check::Stop(Termination::Converged);
            }
        }
        if residual > self.divergence_tolerance * initial_residual.max(f64::MIN_POSITIVE) {
            return Check::Stop(Termination::Diverged);
        }
        Check::Continue
    }
}

/// The Krylov kernels, with their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrylovMethod {
    Cg,
    Cgs,
    /// Right-preconditioned flexible GMRES(restart)
    Gmres { restart: usize },
    BiCgStab,
}

impl KrylovMethod {
    /// Kernel for `method`; `None` for non-Krylov methods.
    pub fn from_method(method: Method, restart: usize) -> Option<Self> {
        match method {
            Method::Cg => Some(KrylovMethod::Cg),
            Method::Cgs => Some(KrylovMethod::Cgs),
            Method::Gmres | Method::FGmres => Some(KrylovMethod::Gmres { restart }),
            Method::BiCgStab => Some(KrylovMethod::BiCgStab),
            Method::Lu | Method::Amg => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KrylovMethod::Cg => "cg",
            KrylovMethod::Cgs => "cgs",
            KrylovMethod::Gmres { .. } => "gmres",
            KrylovMethod::BiCgStab => "bicgstab",
        }
    }
}

/// Run `method` on `op`, updating `x` in place.
pub fn solve<O: Operator + ?Sized>(
    method: KrylovMethod,
    op: &O,
    pc: Option<&dyn Preconditioner>,
    b: &[f64],
    x: &mut [f64],
    stopping: &Stopping,
) -> KernelOutcome {
    match method {
        KrylovMethod::Cg => cg::solve(op, pc, b, x, stopping),
        KrylovMethod::Cgs => cgs::solve(op, pc, b, x, stopping),
        KrylovMethod::Gmres { restart } => gmres::solve(op, pc, b, x, stopping, restart),
        KrylovMethod::BiCgStab => bicgstab::solve(op, pc, b, x, stopping),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::tolerance::Criterion;

    pub fn stopping(native: NativeCriterion, target: f64, max_iterations: usize) -> Stopping {
        let adapted = AdaptedTolerance {
            criterion: Criterion::Unscaled,
            scale: 1.0,
            native,
        };
        Stopping::new(&adapted, target, max_iterations, 1e5, 1.0, 1.0)
    }

    /// Max-norm distance from the exact solution of A x = A·1.
    pub fn error_against_ones(a: &CsrMatrix<f64>, solve: impl FnOnce(&[f64], &mut [f64])) -> f64 {
        let n = a.nrows();
        let ones = vec![1.0; n];
        let mut b = vec![0.0; n];
        spmv(a, &ones, &mut b);
        let mut x = vec![0.0; n];
        solve(&b, &mut x);
        x.iter().map(|v| (v - 1.0).abs()).fold(0.0, f64::max)
    }
}
