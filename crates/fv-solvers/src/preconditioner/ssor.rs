//! Symmetric successive over-relaxation.
//!
//! M = (D + ωL) D⁻¹ (D + ωU) / (ω(2 − ω)), with L and U the strict lower
//! and upper parts of A.

use nalgebra_sparse::CsrMatrix;

use super::Preconditioner;
use crate::error::{Result, SolverError};
use crate::matrix::diagonal;

#[derive(Debug, Clone)]
pub struct SsorPreconditioner {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
    diag: Vec<f64>,
    omega: f64,
}

impl SsorPreconditioner {
    pub fn from_matrix(matrix: &CsrMatrix<f64>, omega: f64) -> Result<Self> {
        if !(omega > 0.0 && omega < 2.0) {
            return Err(SolverError::setup(
                "ssor",
                format!("relaxation factor {} outside (0, 2)", omega),
            ));
        }
        Ok(Self {
            row_ptr: matrix.row_offsets().to_vec(),
            col_idx: matrix.col_indices().to_vec(),
            values: matrix.values().to_vec(),
            diag: checked_diagonal(matrix)?,
            omega,
        })
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }
}

fn checked_diagonal(matrix: &CsrMatrix<f64>) -> Result<Vec<f64>> {
    let diag = diagonal(matrix);
    match diag.iter().position(|d| *d == 0.0 || !d.is_finite()) {
        Some(i) => Err(SolverError::setup("ssor", format!("zero diagonal at row {}", i))),
        None => Ok(diag),
    }
}

impl Preconditioner for SsorPreconditioner {
    fn name(&self) -> &'static str {
        "ssor"
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        let n = self.diag.len();
        let omega = self.omega;

        // (D + ωL) y = r
        for i in 0..n {
            let mut sum = r[i];
            for idx in self.row_ptr[i]..self.row_ptr[i + 1] {
                let j = self.col_idx[idx];
                if j < i {
                    sum -= omega * self.values[idx] * z[j];
                }
            }
            z[i] = sum / self.diag[i];
        }

        let scale = omega * (2.0 - omega);
        for i in 0..n {
            z[i] *= self.diag[i] * scale;
        }

        // (D + ωU) z = D y
        for i in (0..n).rev() {
            let mut sum = z[i];
            for idx in self.row_ptr[i]..self.row_ptr[i + 1] {
                let j = self.col_idx[idx];
                if j > i {
                    sum -= omega * self.values[idx] * z[j];
                }
            }
            z[i] = sum / self.diag[i];
        }
    }

    fn refactor(&mut self, matrix: &CsrMatrix<f64>) -> Result<()> {
        if matrix.nnz() != self.values.len() {
            return Err(SolverError::setup("ssor", "sparsity pattern changed"));
        }
        self.diag = checked_diagonal(matrix)?;
        self.values.copy_from_slice(matrix.values());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::diagonal_matrix;
    use crate::preconditioner::test_matrices::poisson1d;

    #[test]
    fn unit_omega_on_diagonal_matrix_is_jacobi() {
        let a = diagonal_matrix(&[2.0, 4.0]).unwrap();
        let pc = SsorPreconditioner::from_matrix(&a, 1.0).unwrap();
        let mut z = vec![0.0; 2];
        pc.apply(&[2.0, 2.0], &mut z);
        assert!((z[0] - 1.0).abs() < 1e-15);
        assert!((z[1] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn preconditioned_direction_is_descent() {
        // M is SPD for SPD A, so r·M⁻¹r > 0
        let a = poisson1d(10);
        let pc = SsorPreconditioner::from_matrix(&a, 1.5).unwrap();
        let r: Vec<f64> = (0..10).map(|i| (i as f64).sin() + 0.1).collect();
        let mut z = vec![0.0; 10];
        pc.apply(&r, &mut z);
        let rz: f64 = r.iter().zip(&z).map(|(a, b)| a * b).sum();
        assert!(rz > 0.0);
    }

    #[test]
    fn rejects_bad_relaxation() {
        assert!(SsorPreconditioner::from_matrix(&poisson1d(3), 0.0).is_err());
        assert!(SsorPreconditioner::from_matrix(&poisson1d(3), 2.0).is_err());
    }
}
