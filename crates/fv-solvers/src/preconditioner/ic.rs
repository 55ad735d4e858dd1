//! IC(0): incomplete Cholesky on the lower-triangular pattern of a
//! symmetric matrix, M = L Lᵀ.

use nalgebra_sparse::CsrMatrix;

use super::Preconditioner;
use crate::error::{Result, SolverError};
use crate::matrix::is_symmetric;

const SYMMETRY_TOL: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct IncompleteCholeskyPreconditioner {
    n: usize,
    /// Row offsets of the lower triangle, diagonal last in each row
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl IncompleteCholeskyPreconditioner {
    pub fn new(matrix: &CsrMatrix<f64>) -> Result<Self> {
        if !is_symmetric(matrix, SYMMETRY_TOL) {
            return Err(SolverError::setup("icc", "matrix is not symmetric"));
        }
        let n = matrix.nrows();
        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for (i, row) in matrix.row_iter().enumerate() {
            let mut has_diag = false;
            for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                if j <= i {
                    col_idx.push(j);
                    values.push(v);
                    has_diag |= j == i;
                }
            }
            if !has_diag {
                return Err(SolverError::setup(
                    "icc",
                    format!("structurally missing diagonal at row {}", i),
                ));
            }
            row_ptr.push(col_idx.len());
        }

        let mut pc = Self {
            n,
            row_ptr,
            col_idx,
            values,
        };
        pc.factorize()?;
        Ok(pc)
    }

    /// Σ L[i][m] L[j][m] over the shared pattern with m < j.
    fn row_product(&self, i: usize, j: usize) -> f64 {
        let (mut a, a_end) = (self.row_ptr[i], self.row_ptr[i + 1]);
        let (mut b, b_end) = (self.row_ptr[j], self.row_ptr[j + 1]);
        let mut sum = 0.0;
        while a < a_end && b < b_end {
            let (ca, cb) = (self.col_idx[a], self.col_idx[b]);
            if ca >= j || cb >= j {
                break;
            }
            match ca.cmp(&cb) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[a] * self.values[b];
                    a += 1;
                    b += 1;
                }
            }
        }
        sum
    }

    fn factorize(&mut self) -> Result<()> {
        for i in 0..self.n {
            let start = self.row_ptr[i];
            let diag_idx = self.row_ptr[i + 1] - 1;
            for idx in start..diag_idx {
                let j = self.col_idx[idx];
                let l_jj = self.values[self.row_ptr[j + 1] - 1];
                let product = self.row_product(i, j);
                self.values[idx] = (self.values[idx] - product) / l_jj;
            }
            let squares: f64 = self.values[start..diag_idx].iter().map(|v| v * v).sum();
            let pivot = self.values[diag_idx] - squares;
            if !(pivot > 0.0 && pivot.is_finite()) {
                return Err(SolverError::setup(
                    "icc",
                    format!("non-positive pivot {:.3e} at row {}", pivot, i),
                ));
            }
            self.values[diag_idx] = pivot.sqrt();
        }
        Ok(())
    }
}

impl Preconditioner for IncompleteCholeskyPreconditioner {
    fn name(&self) -> &'static str {
        "icc"
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        // L y = r
        for i in 0..self.n {
            let diag_idx = self.row_ptr[i + 1] - 1;
            let mut sum = r[i];
            for idx in self.row_ptr[i]..diag_idx {
                sum -= self.values[idx] * z[self.col_idx[idx]];
            }
            z[i] = sum / self.values[diag_idx];
        }
        // Lᵀ z = y, column-oriented over the rows of L
        for i in (0..self.n).rev() {
            let diag_idx = self.row_ptr[i + 1] - 1;
            z[i] /= self.values[diag_idx];
            let zi = z[i];
            for idx in self.row_ptr[i]..diag_idx {
                z[self.col_idx[idx]] -= self.values[idx] * zi;
            }
        }
    }

    fn refactor(&mut self, matrix: &CsrMatrix<f64>) -> Result<()> {
        *self = Self::new(matrix)?;
        Ok(())
    }
}
