//! Jacobi (diagonal) preconditioner: z_i = r_i / a_ii.

use nalgebra_sparse::CsrMatrix;

use super::Preconditioner;
use crate::error::{Result, SolverError};
use crate::matrix::diagonal;

#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inv_diag: Vec<f64>,
}

impl JacobiPreconditioner {
    /// Fails on a zero or missing diagonal entry.
    pub fn from_matrix(matrix: &CsrMatrix<f64>) -> Result<Self> {
        Self::from_diagonal(&diagonal(matrix))
    }

    pub fn from_diagonal(diag: &[f64]) -> Result<Self> {
        let inv_diag = diag
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                if d != 0.0 && d.is_finite() {
                    Ok(1.0 / d)
                } else {
                    Err(SolverError::setup("jacobi", format!("zero diagonal at row {}", i)))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { inv_diag })
    }

    pub fn inv_diagonal(&self) -> &[f64] {
        &self.inv_diag
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn name(&self) -> &'static str {
        "jacobi"
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        for ((zi, &ri), &d) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * d;
        }
    }

    fn refactor(&mut self, matrix: &CsrMatrix<f64>) -> Result<()> {
        *self = Self::from_matrix(matrix)?;
        Ok(())
    }
}
