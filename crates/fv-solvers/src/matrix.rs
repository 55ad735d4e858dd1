//! Sparse matrix helpers shared by every backend.
//!
//! Matrices arrive from the assembly layer as CSR (`nalgebra_sparse`),
//! row and column indexed by local cell ID. COO triplets remain the
//! interchange format for assembly: duplicate `(i, j)` entries are summed
//! when converting to CSR.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::error::{Result, SolverError};

/// Rows below this count are multiplied serially.
const PARALLEL_ROWS: usize = 4096;

/// Sparse matrix in COO (coordinate/triplet) format.
#[derive(Debug, Clone, Default)]
pub struct SparseTriplets {
    pub nrows: usize,
    pub ncols: usize,
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseTriplets {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            ..Default::default()
        }
    }

    /// Number of stored entries (duplicates counted separately).
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.row_indices.push(row);
        self.col_indices.push(col);
        self.values.push(value);
    }

    /// Convert to CSR, summing duplicate entries.
    pub fn to_csr(&self) -> Result<CsrMatrix<f64>> {
        let coo = CooMatrix::try_from_triplets(
            self.nrows,
            self.ncols,
            self.row_indices.clone(),
            self.col_indices.clone(),
            self.values.clone(),
        )
        .map_err(|e| SolverError::Matrix(format!("Failed to create COO matrix: {:?}", e)))?;
        Ok(CsrMatrix::from(&coo))
    }
}

/// Build a square CSR matrix from its diagonal.
pub fn diagonal_matrix(diag: &[f64]) -> Result<CsrMatrix<f64>> {
    let n = diag.len();
    let offsets: Vec<usize> = (0..=n).collect();
    let indices: Vec<usize> = (0..n).collect();
    CsrMatrix::try_from_csr_data(n, n, offsets, indices, diag.to_vec())
        .map_err(|e| SolverError::Matrix(format!("Failed to create diagonal matrix: {:?}", e)))
}

/// y = A * x
pub fn spmv(a: &CsrMatrix<f64>, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(a.ncols(), x.len());
    debug_assert_eq!(a.nrows(), y.len());

    let offsets = a.row_offsets();
    let cols = a.col_indices();
    let vals = a.values();
    let row_dot = |i: usize| -> f64 {
        (offsets[i]..offsets[i + 1])
            .map(|k| vals[k] * x[cols[k]])
            .sum()
    };

    if a.nrows() >= PARALLEL_ROWS {
        y.par_iter_mut()
            .enumerate()
            .for_each(|(i, yi)| *yi = row_dot(i));
    } else {
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = row_dot(i);
        }
    }
}

/// r = b - A * x
pub fn residual(a: &CsrMatrix<f64>, x: &[f64], b: &[f64], r: &mut [f64]) {
    spmv(a, x, r);
    for (ri, &bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
}

/// Infinity norm: maximum absolute row sum.
pub fn norm_inf(a: &CsrMatrix<f64>) -> f64 {
    a.row_iter()
        .map(|row| row.values().iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Diagonal entries; structurally missing entries read as zero.
pub fn diagonal(a: &CsrMatrix<f64>) -> Vec<f64> {
    let n = a.nrows().min(a.ncols());
    (0..n)
        .map(|i| {
            let row = a.row(i);
            row.col_indices()
                .iter()
                .position(|&c| c == i)
                .map(|pos| row.values()[pos])
                .unwrap_or(0.0)
        })
        .collect()
}

/// Whether `a` equals its transpose up to `rel_tol * ‖A‖∞`.
pub fn is_symmetric(a: &CsrMatrix<f64>, rel_tol: f64) -> bool {
    if a.nrows() != a.ncols() {
        return false;
    }
    let tol = rel_tol * norm_inf(a).max(f64::MIN_POSITIVE);
    let at = a.transpose();
    let diff = a - &at;
    diff.values().iter().all(|v| v.abs() <= tol)
}

/// Dense copy, used by the direct backend and coarse-level solves.
pub fn to_dense(a: &CsrMatrix<f64>) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(a.nrows(), a.ncols());
    for (row_idx, row) in a.row_iter().enumerate() {
        for (&col_idx, &value) in row.col_indices().iter().zip(row.values().iter()) {
            dense[(row_idx, col_idx)] += value;
        }
    }
    dense
}

/// Fingerprint of a matrix: nonzero structure and values hashed separately
/// so callers can tell a value-only update from a structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixSignature {
    pub structure: u64,
    pub values: u64,
}

impl MatrixSignature {
    pub fn of(a: &CsrMatrix<f64>) -> Self {
        let mut s = DefaultHasher::new();
        a.nrows().hash(&mut s);
        a.ncols().hash(&mut s);
        a.row_offsets().hash(&mut s);
        a.col_indices().hash(&mut s);

        let mut v = DefaultHasher::new();
        for value in a.values() {
            value.to_bits().hash(&mut v);
        }

        Self {
            structure: s.finish(),
            values: v.finish(),
        }
    }

    pub fn same_structure(&self, other: &MatrixSignature) -> bool {
        self.structure == other.structure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiagonal(n: usize) -> CsrMatrix<f64> {
        let mut t = SparseTriplets::new(n, n);
        for i in 0..n {
            t.push(i, i, 2.0);
            if i > 0 {
                t.push(i, i - 1, -1.0);
            }
            if i + 1 < n {
                t.push(i, i + 1, -1.0);
            }
        }
        t.to_csr().unwrap()
    }

    #[test]
    fn triplets_sum_duplicates() {
        let mut t = SparseTriplets::new(2, 2);
        t.push(0, 0, 1.0);
        t.push(0, 0, 2.5);
        t.push(1, 1, 4.0);
        let a = t.to_csr().unwrap();
        assert_eq!(a.nnz(), 2);
        assert_eq!(diagonal(&a), vec![3.5, 4.0]);
    }

    #[test]
    fn spmv_and_residual() {
        let a = tridiagonal(4);
        let x = vec![1.0; 4];
        let mut y = vec![0.0; 4];
        spmv(&a, &x, &mut y);
        assert_eq!(y, vec![1.0, 0.0, 0.0, 1.0]);

        let b = vec![1.0, 0.0, 0.0, 1.0];
        let mut r = vec![9.0; 4];
        residual(&a, &x, &b, &mut r);
        assert!(r.iter().all(|v| v.abs() < 1e-15));
    }

    #[test]
    fn infinity_norm_is_max_row_sum() {
        let a = tridiagonal(5);
        assert!((norm_inf(&a) - 4.0).abs() < 1e-15);
    }

    #[test]
    fn symmetry_check() {
        assert!(is_symmetric(&tridiagonal(6), 1e-12));

        let mut t = SparseTriplets::new(2, 2);
        t.push(0, 0, 1.0);
        t.push(0, 1, 2.0);
        t.push(1, 1, 1.0);
        assert!(!is_symmetric(&t.to_csr().unwrap(), 1e-12));
    }

    #[test]
    fn signature_separates_structure_and_values() {
        let a = tridiagonal(4);
        let mut b = a.clone();
        b.values_mut()[0] = 7.0;
        let sa = MatrixSignature::of(&a);
        let sb = MatrixSignature::of(&b);
        assert!(sa.same_structure(&sb));
        assert_ne!(sa.values, sb.values);
        assert_eq!(sa, MatrixSignature::of(&a.clone()));
        assert!(!sa.same_structure(&MatrixSignature::of(&tridiagonal(5))));
    }

    #[test]
    fn dense_copy_matches() {
        let a = tridiagonal(3);
        let d = to_dense(&a);
        assert_eq!(d[(0, 0)], 2.0);
        assert_eq!(d[(0, 1)], -1.0);
        assert_eq!(d[(0, 2)], 0.0);
    }
}
