//! Finite-volume assembly of the benchmark problem.
//!
//! `∂φ/∂t = ∇·(D(φ) ∇φ)` on the unit square, discretized on an `n × n`
//! grid with implicit Euler. The diffusivity on each face is the harmonic
//! mean of the two adjacent cell values of `φ`; on a face with a Dirichlet
//! value it is that value. Left and right boundaries are Dirichlet, top
//! and bottom carry no flux.

use std::collections::HashMap;

use fv_solvers::{CsrMatrix, SparseTriplets};

/// Grid, boundary values and time step of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffusionProblem {
    n: usize,
    left: f64,
    right: f64,
    dt: f64,
}

fn harmonic(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if sum == 0.0 { 0.0 } else { 2.0 * a * b / sum }
}

impl DiffusionProblem {
    /// Square grid with `⌊√number_of_elements⌋` cells per side.
    pub fn new(number_of_elements: usize, left: f64, right: f64) -> Self {
        let n = ((number_of_elements as f64).sqrt().floor() as usize).max(1);
        Self {
            n,
            left,
            right,
            dt: 1.0,
        }
    }

    /// Cells per side.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn number_of_cells(&self) -> usize {
        self.n * self.n
    }

    fn spacing(&self) -> f64 {
        1.0 / self.n as f64
    }

    /// Cell-centre coordinates in global cell order.
    pub fn cell_centers(&self) -> (Vec<f64>, Vec<f64>) {
        let h = self.spacing();
        (0..self.number_of_cells())
            .map(|id| {
                let (ix, iy) = (id % self.n, id / self.n);
                ((ix as f64 + 0.5) * h, (iy as f64 + 0.5) * h)
            })
            .unzip()
    }

    /// Assemble the rows of the cells `ids` (global numbering).
    ///
    /// `phi` and `phi_old` are indexed like `ids`. Columns are renumbered
    /// into the same local order; couplings to cells outside `ids` are
    /// dropped, which only happens on the outer ghost layer of a rank.
    pub fn assemble(
        &self,
        ids: &[usize],
        phi: &[f64],
        phi_old: &[f64],
    ) -> fv_solvers::Result<(CsrMatrix<f64>, Vec<f64>)> {
        if phi.len() != ids.len() || phi_old.len() != ids.len() {
            return Err(fv_solvers::SolverError::DimensionMismatch(format!(
                "{} cells but {} current and {} old values",
                ids.len(),
                phi.len(),
                phi_old.len()
            )));
        }

        let local: HashMap<usize, usize> = ids.iter().enumerate().map(|(i, &g)| (g, i)).collect();
        let h = self.spacing();
        let transient = h * h / self.dt;
        // face area over centre distance: h / h inside, h / (h / 2) at a wall
        let wall = 2.0;

        let mut triplets = SparseTriplets::new(ids.len(), ids.len());
        let mut rhs = Vec::with_capacity(ids.len());

        for (i, &gid) in ids.iter().enumerate() {
            let (ix, iy) = (gid % self.n, gid / self.n);
            let mut diag = transient;
            let mut b = transient * phi_old[i];

            let mut neighbours = Vec::with_capacity(4);
            if ix > 0 {
                neighbours.push(gid - 1);
            }
            if ix + 1 < self.n {
                neighbours.push(gid + 1);
            }
            if iy > 0 {
                neighbours.push(gid - self.n);
            }
            if iy + 1 < self.n {
                neighbours.push(gid + self.n);
            }
            for neighbour in neighbours {
                if let Some(&j) = local.get(&neighbour) {
                    let coeff = harmonic(phi[i], phi[j]);
                    diag += coeff;
                    triplets.push(i, j, -coeff);
                }
            }

            if ix == 0 {
                let coeff = wall * self.left;
                diag += coeff;
                b += coeff * self.left;
            }
            if ix + 1 == self.n {
                let coeff = wall * self.right;
                diag += coeff;
                b += coeff * self.right;
            }

            triplets.push(i, i, diag);
            rhs.push(b);
        }

        Ok((triplets.to_csr()?, rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fv_solvers::matrix::{is_symmetric, residual};

    fn all_ids(p: &DiffusionProblem) -> Vec<usize> {
        (0..p.number_of_cells()).collect()
    }

    #[test]
    fn grid_side_is_floor_of_square_root() {
        assert_eq!(DiffusionProblem::new(10000, 1.0, 0.0).n(), 100);
        assert_eq!(DiffusionProblem::new(99, 1.0, 0.0).n(), 9);
        assert_eq!(DiffusionProblem::new(0, 1.0, 0.0).n(), 1);
    }

    #[test]
    fn harmonic_mean_of_face_values() {
        assert_eq!(harmonic(2.0, 2.0), 2.0);
        assert!((harmonic(1.0, 3.0) - 1.5).abs() < 1e-15);
        assert_eq!(harmonic(0.0, 0.0), 0.0);
    }

    #[test]
    fn matrix_is_symmetric_with_positive_diagonal() {
        let p = DiffusionProblem::new(25, 2.0, 0.5);
        let ids = all_ids(&p);
        let phi: Vec<f64> = (0..ids.len()).map(|i| 0.5 + 0.1 * i as f64).collect();
        let (a, b) = p.assemble(&ids, &phi, &phi).unwrap();

        assert_eq!(a.nrows(), 25);
        assert_eq!(b.len(), 25);
        assert!(is_symmetric(&a, 1e-14));
        assert!(fv_solvers::matrix::diagonal(&a).iter().all(|&d| d > 0.0));
    }

    #[test]
    fn uniform_state_matching_both_walls_is_steady() {
        let p = DiffusionProblem::new(16, 1.5, 1.5);
        let ids = all_ids(&p);
        let phi = vec![1.5; ids.len()];
        let (a, b) = p.assemble(&ids, &phi, &phi).unwrap();

        let mut r = vec![0.0; ids.len()];
        residual(&a, &phi, &b, &mut r);
        assert!(r.iter().all(|v| v.abs() < 1e-14), "{:?}", r);
    }

    #[test]
    fn zero_wall_value_closes_the_boundary() {
        // D = 0 on the right face: the rightmost column has no wall term
        let p = DiffusionProblem::new(9, 1.0, 0.0);
        let ids = all_ids(&p);
        let phi = vec![1.0; 9];
        let (a, b) = p.assemble(&ids, &phi, &phi).unwrap();
        let h2 = 1.0 / 9.0;
        let diag = fv_solvers::matrix::diagonal(&a);

        // cell 2 is bottom-right: one horizontal and one vertical neighbour
        assert!((diag[2] - (h2 + 2.0)).abs() < 1e-14);
        assert!((b[2] - h2).abs() < 1e-14);
        // cell 0 is bottom-left: neighbours plus the wall at D = 1
        assert!((diag[0] - (h2 + 2.0 + 2.0)).abs() < 1e-14);
        assert!((b[0] - (h2 + 2.0)).abs() < 1e-14);
    }

    #[test]
    fn subset_rows_drop_couplings_outside_the_subset() {
        let p = DiffusionProblem::new(16, 1.0, 0.0);
        let ids: Vec<usize> = (0..8).collect();
        let phi = vec![1.0; 8];
        let (a, _) = p.assemble(&ids, &phi, &phi).unwrap();
        assert_eq!(a.ncols(), 8);
        // row 4 (second layer) keeps its downward neighbour only
        let row = a.row(4);
        assert_eq!(row.col_indices(), &[0, 4, 5]);
    }

    #[test]
    fn mismatched_values_are_rejected() {
        let p = DiffusionProblem::new(4, 1.0, 0.0);
        assert!(p.assemble(&[0, 1, 2, 3], &[1.0; 3], &[1.0; 4]).is_err());
    }

    #[test]
    fn cell_centres_cover_the_unit_square() {
        let p = DiffusionProblem::new(4, 1.0, 0.0);
        let (x, y) = p.cell_centers();
        assert_eq!(x, vec![0.25, 0.75, 0.25, 0.75]);
        assert_eq!(y, vec![0.25, 0.25, 0.75, 0.75]);
    }
}
