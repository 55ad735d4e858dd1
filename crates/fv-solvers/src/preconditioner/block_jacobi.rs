//! Block-Jacobi: dense inverses of contiguous diagonal blocks.
//! Also serves as the multigrid smoother.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;

use super::Preconditioner;
use crate::error::{Result, SolverError};

#[derive(Debug, Clone)]
pub struct BlockJacobiPreconditioner {
    block_size: usize,
    /// Inverse of block `k`, covering rows `k * block_size ..`
    inverses: Vec<DMatrix<f64>>,
}

impl BlockJacobiPreconditioner {
    pub fn new(matrix: &CsrMatrix<f64>, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(SolverError::setup("block-jacobi", "block size must be positive"));
        }
        let n = matrix.nrows();
        let mut inverses = Vec::with_capacity(n.div_ceil(block_size));
        for start in (0..n).step_by(block_size) {
            let end = (start + block_size).min(n);
            let mut block = DMatrix::zeros(end - start, end - start);
            for i in start..end {
                let row = matrix.row(i);
                for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                    if (start..end).contains(&j) {
                        block[(i - start, j - start)] += v;
                    }
                }
            }
            let inverse = block.try_inverse().ok_or_else(|| {
                SolverError::setup(
                    "block-jacobi",
                    format!("singular diagonal block at rows {}..{}", start, end),
                )
            })?;
            inverses.push(inverse);
        }
        Ok(Self { block_size, inverses })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Preconditioner for BlockJacobiPreconditioner {
    fn name(&self) -> &'static str {
        "block-jacobi"
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        for (k, inverse) in self.inverses.iter().enumerate() {
            let start = k * self.block_size;
            let end = start + inverse.nrows();
            let local = inverse * DVector::from_column_slice(&r[start..end]);
            z[start..end].copy_from_slice(local.as_slice());
        }
    }

    fn refactor(&mut self, matrix: &CsrMatrix<f64>) -> Result<()> {
        *self = Self::new(matrix, self.block_size)?;
        Ok(())
    }
}
