//! Distributed Krylov backend over a partitioned mesh.
//!
//! Each rank stores the rows of the cells it owns, with columns in local
//! (overlapping) numbering. A matrix-vector product first imports ghost
//! values from the owning ranks, then multiplies the owned rows; inner
//! products are reduced over the communicator. Preconditioning is
//! block-Jacobi across ranks: each rank factors its owned diagonal block.
//!
//! Native status codes follow AztecOO's termination reasons:
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | converged |
//! | 2 | numerical breakdown |
//! | 3 | residual lost (non-finite) |
//! | 5 | maximum iterations |
//! | 6 | diverged |

use std::time::Instant;

use nalgebra_sparse::CsrMatrix;

use super::{breakdown, not_loaded, DriverSettings, RawStatus, SolverDriver};
use crate::comm::Communicator;
use crate::convergence::Suite;
use crate::error::{Result, SolverError};
use crate::krylov::{self, KernelOutcome, KrylovMethod, Operator, Termination};
use crate::matrix::SparseTriplets;
use crate::partition::MeshPartition;
use crate::preconditioner::{PreconditionerSlot, PreconditionerSpec};
use crate::tolerance::SystemNorms;
use crate::vector_ops;

pub const CONVERGED: i32 = 0;
pub const BREAKDOWN: i32 = 2;
pub const LOSS_OF_PRECISION: i32 = 3;
pub const MAX_ITERATIONS: i32 = 5;
pub const DIVERGED: i32 = 6;

/// Owned rows of the local system, plus globally reduced reference norms.
#[derive(Debug, Clone)]
struct DistributedSystem {
    /// owned × local, columns in overlapping numbering
    rows: CsrMatrix<f64>,
    /// owned × owned diagonal block
    block: CsrMatrix<f64>,
    rhs: Vec<f64>,
    rhs_norm: f64,
    matrix_norm: f64,
}

impl SystemNorms for DistributedSystem {
    fn rhs_norm(&self) -> f64 {
        self.rhs_norm
    }

    fn matrix_norm(&self) -> f64 {
        self.matrix_norm
    }
}

/// Operator over the owned rows; vectors hold owned entries only.
struct DistributedOperator<'a> {
    rows: &'a CsrMatrix<f64>,
    partition: &'a MeshPartition,
}

impl DistributedOperator<'_> {
    /// Local overlapping vector whose owned entries are `owned` and whose
    /// ghosts come from their owners. Collective.
    fn import(&self, owned: &[f64]) -> Vec<f64> {
        import_ghosts(self.partition, owned)
    }
}

impl Operator for DistributedOperator<'_> {
    fn dim(&self) -> usize {
        self.rows.nrows()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let local = self.import(x);
        crate::matrix::spmv(self.rows, &local, y);
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        self.partition.comm().all_reduce_sum(vector_ops::dot(a, b))
    }
}

/// Scatter owned values to every rank and assemble the overlapping vector.
fn import_ghosts(partition: &MeshPartition, owned: &[f64]) -> Vec<f64> {
    let pairs: Vec<(usize, f64)> = partition
        .local_non_overlapping_ids()
        .iter()
        .zip(owned)
        .map(|(&local, &value)| (partition.global_overlapping_ids()[local], value))
        .collect();
    let mut global = vec![0.0; partition.global_number_of_cells()];
    for (gid, value) in partition.comm().all_gather(&pairs) {
        global[gid] = value;
    }
    partition
        .global_overlapping_ids()
        .iter()
        .map(|&gid| global[gid])
        .collect()
}

/// Rows `rows` of `matrix`, with columns renumbered through `columns`;
/// entries whose column maps to `None` are dropped.
fn restrict(
    matrix: &CsrMatrix<f64>,
    rows: &[usize],
    columns: &[Option<usize>],
    ncols: usize,
) -> Result<CsrMatrix<f64>> {
    let mut triplets = SparseTriplets::new(rows.len(), ncols);
    for (i, &row) in rows.iter().enumerate() {
        let row = matrix.row(row);
        for (&col, &value) in row.col_indices().iter().zip(row.values()) {
            if let Some(j) = columns[col] {
                triplets.push(i, j, value);
            }
        }
    }
    triplets.to_csr()
}

pub struct DistributedDriver {
    settings: DriverSettings,
    method: KrylovMethod,
    preconditioner: PreconditionerSlot,
    partition: MeshPartition,
    /// No partition was given: a serial one is sized from each loaded matrix
    sized_by_matrix: bool,
    system: Option<DistributedSystem>,
}

impl DistributedDriver {
    pub fn new(
        settings: DriverSettings,
        preconditioner: PreconditionerSpec,
        partition: Option<MeshPartition>,
    ) -> Result<Self> {
        let method = KrylovMethod::from_method(settings.method, settings.restart).ok_or(
            SolverError::UnsupportedMethod {
                method: settings.method.name(),
                suite: Suite::Distributed.name(),
            },
        )?;
        let sized_by_matrix = partition.is_none();
        Ok(Self {
            settings,
            method,
            preconditioner: PreconditionerSlot::new(preconditioner),
            partition: partition.unwrap_or_else(|| MeshPartition::serial(0)),
            sized_by_matrix,
            system: None,
        })
    }

    pub fn partition(&self) -> &MeshPartition {
        &self.partition
    }

    pub fn preconditioner(&self) -> &PreconditionerSlot {
        &self.preconditioner
    }

    fn code(kernel: &KernelOutcome) -> i32 {
        match kernel.termination {
            Termination::Converged => CONVERGED,
            Termination::MaxIterations => MAX_ITERATIONS,
            Termination::Breakdown if !kernel.residual.is_finite() => LOSS_OF_PRECISION,
            Termination::Breakdown => BREAKDOWN,
            Termination::Diverged => DIVERGED,
        }
    }

    /// Owned rows over all local columns, the owned diagonal block and the
    /// owned right-hand side.
    fn local_system(
        &self,
        matrix: &CsrMatrix<f64>,
        rhs: &[f64],
    ) -> Result<(CsrMatrix<f64>, CsrMatrix<f64>, Vec<f64>)> {
        let local = self.partition.number_of_cells();
        if matrix.nrows() != local || matrix.ncols() != local || rhs.len() != local {
            return Err(SolverError::DimensionMismatch(format!(
                "rank {} holds {} cells, got a {}x{} matrix and {} right-hand side entries",
                self.partition.process_id(),
                local,
                matrix.nrows(),
                matrix.ncols(),
                rhs.len()
            )));
        }

        let owned = self.partition.local_non_overlapping_ids();
        let all_columns: Vec<Option<usize>> = (0..local).map(Some).collect();
        let mut owned_columns = vec![None; local];
        for (position, &i) in owned.iter().enumerate() {
            owned_columns[i] = Some(position);
        }

        let rows = restrict(matrix, owned, &all_columns, local)?;
        let block = restrict(matrix, owned, &owned_columns, owned.len())?;
        let rhs = owned.iter().map(|&i| rhs[i]).collect();
        Ok((rows, block, rhs))
    }
}

impl SolverDriver for DistributedDriver {
    fn suite(&self) -> Suite {
        Suite::Distributed
    }

    /// Collective: every rank must load its local system.
    fn load(&mut self, matrix: &CsrMatrix<f64>, rhs: &[f64]) -> Result<()> {
        if self.sized_by_matrix && self.partition.number_of_cells() != matrix.nrows() {
            self.partition = MeshPartition::serial(matrix.nrows());
        }
        // every rank reaches the reduction, so a bad local system fails the
        // whole group instead of leaving the others waiting
        let local_system = self.local_system(matrix, rhs);
        let comm = self.partition.comm();
        let failed = comm.all_reduce_max(if local_system.is_err() { 1.0 } else { 0.0 });
        let (rows, block, rhs) = match local_system {
            Err(e) => {
                self.system = None;
                return Err(e);
            }
            Ok(_) if failed > 0.0 => {
                self.system = None;
                return Err(SolverError::DimensionMismatch(
                    "local system rejected on another rank".to_string(),
                ));
            }
            Ok(parts) => parts,
        };

        let rhs_norm = comm.all_reduce_sum(vector_ops::dot(&rhs, &rhs)).sqrt();
        let matrix_norm = comm.all_reduce_max(crate::matrix::norm_inf(&rows));

        self.system = Some(DistributedSystem {
            rows,
            block,
            rhs,
            rhs_norm,
            matrix_norm,
        });
        Ok(())
    }

    /// Collective. `x` is the overlapping local vector; on return its ghost
    /// entries hold the owners' values.
    fn solve(&mut self, x: &mut [f64]) -> Result<RawStatus> {
        let system = self.system.as_ref().ok_or_else(|| not_loaded(Suite::Distributed))?;
        let (adapted, stopping) = self.settings.stopping(Suite::Distributed, system)?;
        let start = Instant::now();

        let owned = self.partition.local_non_overlapping_ids();
        let mut x_owned: Vec<f64> = owned.iter().map(|&i| x[i]).collect();

        // a rank failing to factor its block must not leave the others
        // waiting in a reduction
        let local_pc = self.preconditioner.prepare(&system.block);
        let failed = self
            .partition
            .comm()
            .all_reduce_max(if local_pc.is_err() { 1.0 } else { 0.0 });
        let pc = match local_pc {
            Err(e) => return Err(e),
            Ok(_) if failed > 0.0 => {
                return Err(SolverError::setup(
                    "domain-decomposition",
                    "preconditioner setup failed on another rank",
                ));
            }
            Ok(pc) => pc,
        };

        let op = DistributedOperator {
            rows: &system.rows,
            partition: &self.partition,
        };
        let kernel = krylov::solve(self.method, &op, pc, &system.rhs, &mut x_owned, &stopping);

        let mut r = vec![0.0; x_owned.len()];
        op.residual(&x_owned, &system.rhs, &mut r);
        let residual = op.norm(&r);

        let local = import_ghosts(&self.partition, &x_owned);
        x.copy_from_slice(&local);

        tracing::debug!(
            rank = self.partition.process_id(),
            method = self.method.name(),
            iterations = kernel.iterations,
            residual,
            "distributed solve finished"
        );

        Ok(RawStatus {
            code: Self::code(&kernel),
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
