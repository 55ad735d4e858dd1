//! ILU(0): incomplete LU factorization restricted to the sparsity pattern
//! of the matrix. L (unit lower) and U share one value array.

use nalgebra_sparse::CsrMatrix;

use super::Preconditioner;
use crate::error::{Result, SolverError};

#[derive(Debug, Clone)]
pub struct Ilu0Preconditioner {
    name: &'static str,
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    lu_values: Vec<f64>,
    diag_ptr: Vec<usize>,
}

impl Ilu0Preconditioner {
    pub fn new(matrix: &CsrMatrix<f64>) -> Result<Self> {
        let n = matrix.nrows();
        let row_ptr = matrix.row_offsets().to_vec();
        let col_idx = matrix.col_indices().to_vec();

        let mut diag_ptr = Vec::with_capacity(n);
        for i in 0..n {
            let row = &col_idx[row_ptr[i]..row_ptr[i + 1]];
            match row.binary_search(&i) {
                Ok(pos) => diag_ptr.push(row_ptr[i] + pos),
                Err(_) => {
                    return Err(SolverError::setup(
                        "ilu",
                        format!("structurally missing diagonal at row {}", i),
                    ))
                }
            }
        }

        let mut pc = Self {
            name: "ilu",
            n,
            row_ptr,
            col_idx,
            lu_values: matrix.values().to_vec(),
            diag_ptr,
        };
        pc.factorize()?;
        Ok(pc)
    }

    /// Report under a different name (used for domain-decomposition blocks).
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    fn find(&self, row: usize, col: usize) -> Option<usize> {
        let start = self.row_ptr[row];
        self.col_idx[start..self.row_ptr[row + 1]]
            .binary_search(&col)
            .ok()
            .map(|pos| start + pos)
    }

    fn factorize(&mut self) -> Result<()> {
        for i in 0..self.n {
            for k_idx in self.row_ptr[i]..self.diag_ptr[i] {
                let k = self.col_idx[k_idx];
                let pivot = self.lu_values[self.diag_ptr[k]];
                if pivot == 0.0 || !pivot.is_finite() {
                    return Err(SolverError::setup(self.name, format!("zero pivot at row {}", k)));
                }
                let factor = self.lu_values[k_idx] / pivot;
                self.lu_values[k_idx] = factor;

                for j_idx in (k_idx + 1)..self.row_ptr[i + 1] {
                    let j = self.col_idx[j_idx];
                    if let Some(m_idx) = self.find(k, j) {
                        let update = factor * self.lu_values[m_idx];
                        self.lu_values[j_idx] -= update;
                    }
                }
            }
            let d = self.lu_values[self.diag_ptr[i]];
            if d == 0.0 || !d.is_finite() {
                return Err(SolverError::setup(self.name, format!("zero pivot at row {}", i)));
            }
        }
        Ok(())
    }
}

impl Preconditioner for Ilu0Preconditioner {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        // L y = r, unit diagonal
        z.copy_from_slice(r);
        for i in 0..self.n {
            let mut sum = z[i];
            for k in self.row_ptr[i]..self.diag_ptr[i] {
                sum -= self.lu_values[k] * z[self.col_idx[k]];
            }
            z[i] = sum;
        }
        // U z = y
        for i in (0..self.n).rev() {
            let mut sum = z[i];
            for k in (self.diag_ptr[i] + 1)..self.row_ptr[i + 1] {
                sum -= self.lu_values[k] * z[self.col_idx[k]];
            }
            z[i] = sum / self.lu_values[self.diag_ptr[i]];
        }
    }

    fn refactor(&mut self, matrix: &CsrMatrix<f64>) -> Result<()> {
        if matrix.nnz() != self.lu_values.len() {
            return Err(SolverError::setup(self.name, "sparsity pattern changed"));
        }
        self.lu_values.copy_from_slice(matrix.values());
        self.factorize()
    }
}
