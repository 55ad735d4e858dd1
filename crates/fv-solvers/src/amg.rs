//! Aggregation algebraic multigrid.
//!
//! Setup coarsens greedily over strong connections, builds a piecewise
//! constant prolongation P and Galerkin coarse operators Pᵀ A P, and stops
//! at `coarse_size` unknowns or `max_levels` levels. The coarsest level is
//! solved with a dense LU factorization when small enough, otherwise with
//! smoother sweeps.
//!
//! A V-cycle with damped smoothing is exposed as a [`Preconditioner`];
//! [`solve`] iterates it as a stationary method.

use nalgebra::{DVector, Dyn, LU};
use nalgebra_sparse::CsrMatrix;
use serde_json::{Map, Value};

use crate::error::{Result, SolverError};
use crate::krylov::{Check, KernelOutcome, Operator, Stopping, Termination};
use crate::matrix::{residual, spmv, to_dense};
use crate::preconditioner::{Preconditioner, PreconditionerSpec};

/// Largest coarsest level factorized densely.
const MAX_DIRECT_COARSE: usize = 2000;
/// Smoother sweeps on a coarsest level too large to factorize.
const COARSE_SWEEPS: usize = 20;

const UNASSIGNED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmgOptions {
    pub max_levels: usize,
    pub coarse_size: usize,
    pub presweeps: usize,
    pub postsweeps: usize,
    /// Damping of each smoothing step
    pub relaxation: f64,
    /// |a_ij| ≥ θ · max_k |a_ik| makes j a strong neighbour of i
    pub strength_threshold: f64,
}

impl Default for AmgOptions {
    fn default() -> Self {
        Self {
            max_levels: 10,
            coarse_size: 32,
            presweeps: 1,
            postsweeps: 1,
            relaxation: 0.9,
            strength_threshold: 0.25,
        }
    }
}

impl AmgOptions {
    /// Read the multigrid keys of a backend config object; other keys are ignored.
    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let defaults = Self::default();
        let options = Self {
            max_levels: read_usize(config, "max_levels", defaults.max_levels)?,
            coarse_size: read_usize(config, "coarse_size", defaults.coarse_size)?,
            presweeps: read_usize(config, "presweeps", defaults.presweeps)?,
            postsweeps: read_usize(config, "postsweeps", defaults.postsweeps)?,
            relaxation: read_f64(config, "relaxation", defaults.relaxation)?,
            strength_threshold: read_f64(config, "strength_threshold", defaults.strength_threshold)?,
        };
        if options.max_levels == 0 {
            return Err(SolverError::InvalidConfig("max_levels must be positive".into()));
        }
        if !(options.relaxation > 0.0 && options.relaxation <= 2.0) {
            return Err(SolverError::InvalidConfig(format!(
                "relaxation {} outside (0, 2]",
                options.relaxation
            )));
        }
        Ok(options)
    }
}

fn read_usize(config: &Map<String, Value>, key: &str, default: usize) -> Result<usize> {
    match config.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| SolverError::InvalidConfig(format!("'{}' must be a non-negative integer", key))),
    }
}

fn read_f64(config: &Map<String, Value>, key: &str, default: f64) -> Result<f64> {
    match config.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| SolverError::InvalidConfig(format!("'{}' must be a number", key))),
    }
}

struct Level {
    matrix: CsrMatrix<f64>,
    prolongation: CsrMatrix<f64>,
    restriction: CsrMatrix<f64>,
    smoother: Box<dyn Preconditioner>,
}

enum CoarseSolver {
    Direct(LU<f64, Dyn, Dyn>),
    Smooth(Box<dyn Preconditioner>),
}

/// Multigrid hierarchy for one matrix.
pub struct AmgHierarchy {
    options: AmgOptions,
    smoother: PreconditionerSpec,
    levels: Vec<Level>,
    coarse_matrix: CsrMatrix<f64>,
    coarse: CoarseSolver,
}

impl std::fmt::Debug for AmgHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmgHierarchy")
            .field("options", &self.options)
            .field("smoother", &self.smoother)
            .field("level_sizes", &self.level_sizes())
            .finish()
    }
}

impl AmgHierarchy {
    pub fn new(matrix: &CsrMatrix<f64>, options: AmgOptions, smoother: PreconditionerSpec) -> Result<Self> {
        if smoother == PreconditionerSpec::None {
            return Err(SolverError::setup("amg", "multigrid needs a smoother"));
        }
        let mut levels = Vec::new();
        let mut current = matrix.clone();

        while current.nrows() > options.coarse_size && levels.len() + 1 < options.max_levels {
            let (aggregates, count) = aggregate(&current, options.strength_threshold);
            if count == 0 || count == current.nrows() {
                break;
            }
            let prolongation = piecewise_constant(&aggregates, count)?;
            let restriction = prolongation.transpose();
            let coarse = &(&restriction * &current) * &prolongation;
            let level_smoother = build_smoother(smoother, &current)?;

            tracing::debug!(
                level = levels.len(),
                fine = current.nrows(),
                coarse = count,
                "amg coarsening"
            );
            levels.push(Level {
                matrix: current,
                prolongation,
                restriction,
                smoother: level_smoother,
            });
            current = coarse;
        }

        let coarse = if current.nrows() <= MAX_DIRECT_COARSE {
            let lu = to_dense(&current).lu();
            if !lu.is_invertible() {
                return Err(SolverError::setup("amg", "singular coarsest-level matrix"));
            }
            CoarseSolver::Direct(lu)
        } else {
            CoarseSolver::Smooth(build_smoother(smoother, &current)?)
        };

        Ok(Self {
            options,
            smoother,
            levels,
            coarse_matrix: current,
            coarse,
        })
    }

    pub fn options(&self) -> &AmgOptions {
        &self.options
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// Unknowns per level, finest first.
    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels
            .iter()
            .map(|l| l.matrix.nrows())
            .chain(std::iter::once(self.coarse_matrix.nrows()))
            .collect()
    }

    fn smooth(&self, matrix: &CsrMatrix<f64>, smoother: &dyn Preconditioner, b: &[f64], x: &mut [f64], sweeps: usize) {
        let n = b.len();
        let mut r = vec![0.0; n];
        let mut z = vec![0.0; n];
        for _ in 0..sweeps {
            residual(matrix, x, b, &mut r);
            smoother.apply(&r, &mut z);
            for (xi, zi) in x.iter_mut().zip(&z) {
                *xi += self.options.relaxation * zi;
            }
        }
    }

    fn cycle(&self, level: usize, b: &[f64], x: &mut [f64]) {
        let Some(current) = self.levels.get(level) else {
            match &self.coarse {
                CoarseSolver::Direct(lu) => {
                    if let Some(solution) = lu.solve(&DVector::from_column_slice(b)) {
                        x.copy_from_slice(solution.as_slice());
                    }
                }
                CoarseSolver::Smooth(smoother) => {
                    self.smooth(&self.coarse_matrix, smoother.as_ref(), b, x, COARSE_SWEEPS)
                }
            }
            return;
        };

        self.smooth(&current.matrix, current.smoother.as_ref(), b, x, self.options.presweeps);

        let mut r = vec![0.0; b.len()];
        residual(&current.matrix, x, b, &mut r);
        let coarse_n = current.restriction.nrows();
        let mut coarse_b = vec![0.0; coarse_n];
        spmv(&current.restriction, &r, &mut coarse_b);
        let mut coarse_x = vec![0.0; coarse_n];
        self.cycle(level + 1, &coarse_b, &mut coarse_x);

        let mut correction = vec![0.0; b.len()];
        spmv(&current.prolongation, &coarse_x, &mut correction);
        for (xi, ci) in x.iter_mut().zip(&correction) {
            *xi += ci;
        }

        self.smooth(&current.matrix, current.smoother.as_ref(), b, x, self.options.postsweeps);
    }
}

impl Preconditioner for AmgHierarchy {
    fn name(&self) -> &'static str {
        "amg"
    }

    /// One V-cycle from a zero initial guess.
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.fill(0.0);
        self.cycle(0, r, z);
    }

    fn refactor(&mut self, matrix: &CsrMatrix<f64>) -> Result<()> {
        *self = Self::new(matrix, self.options, self.smoother)?;
        Ok(())
    }
}

fn build_smoother(spec: PreconditionerSpec, matrix: &CsrMatrix<f64>) -> Result<Box<dyn Preconditioner>> {
    spec.apply_to_matrix(matrix)?
        .ok_or_else(|| SolverError::setup("amg", "multigrid needs a smoother"))
}

/// Greedy aggregation over strong connections. Returns the aggregate of
/// every row and the number of aggregates.
fn aggregate(matrix: &CsrMatrix<f64>, theta: f64) -> (Vec<usize>, usize) {
    let n = matrix.nrows();
    let strong: Vec<Vec<usize>> = matrix
        .row_iter()
        .enumerate()
        .map(|(i, row)| {
            let max_off = row
                .col_indices()
                .iter()
                .zip(row.values())
                .filter(|(j, _)| **j != i)
                .map(|(_, v)| v.abs())
                .fold(0.0, f64::max);
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|(j, v)| **j != i && max_off > 0.0 && v.abs() >= theta * max_off)
                .map(|(j, _)| *j)
                .collect()
        })
        .collect();

    let mut assignment = vec![UNASSIGNED; n];
    let mut count = 0;

    // seed aggregates from rows whose neighbourhood is still free
    for i in 0..n {
        if assignment[i] == UNASSIGNED && strong[i].iter().all(|&j| assignment[j] == UNASSIGNED) {
            assignment[i] = count;
            for &j in &strong[i] {
                assignment[j] = count;
            }
            count += 1;
        }
    }

    // attach leftovers to a neighbouring aggregate
    for i in 0..n {
        if assignment[i] == UNASSIGNED {
            let neighbour = strong[i]
                .iter()
                .map(|&j| assignment[j])
                .find(|&a| a != UNASSIGNED);
            assignment[i] = match neighbour {
                Some(a) => a,
                None => {
                    count += 1;
                    count - 1
                }
            };
        }
    }

    (assignment, count)
}

fn piecewise_constant(aggregates: &[usize], count: usize) -> Result<CsrMatrix<f64>> {
    let n = aggregates.len();
    CsrMatrix::try_from_csr_data(n, count, (0..=n).collect(), aggregates.to_vec(), vec![1.0; n])
        .map_err(|e| SolverError::Matrix(format!("Failed to build prolongation: {:?}", e)))
}

/// Stationary multigrid: x ← x + V(b − A x) until the stopping rule fires.
pub fn solve<O: Operator + ?Sized>(
    op: &O,
    hierarchy: &AmgHierarchy,
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

    let mut e = vec![0.0; n];
    let mut residual_norm = r0;
    for iter in 1..=stopping.max_iterations {
        hierarchy.apply(&r, &mut e);
        for (xi, ei) in x.iter_mut().zip(&e) {
            *xi += ei;
        }
        op.residual(x, b, &mut r);
        residual_norm = op.norm(&r);
        let update = stopping.tracks_update().then(|| op.norm(&e));
        tracing::trace!(iter, residual = residual_norm, "amg");
        if let Check::Stop(termination) = stopping.check(residual_norm, r0, update) {
            return KernelOutcome::new(termination, iter, residual_norm, r0);
        }
    }
    KernelOutcome::new(Termination::MaxIterations, stopping.max_iterations, residual_norm, r0)
}
