//! Device-side resources of the accelerated backend.
//!
//! A [`DeviceContext`] owns the backend configuration and hands out
//! device-resident copies of matrices and vectors. Host data crosses the
//! boundary only through [`DeviceContext::upload_matrix`],
//! [`DeviceContext::upload_vector`] and [`DeviceVector::download`].
//!
//! # Lifetime
//!
//! ```text
//! create ──► upload_matrix / upload_vector ──► solve ──► download
//!    │                                                       │
//!    └────────────── destroy (explicit, or on drop) ◄────────┘
//! ```
//!
//! `destroy` is idempotent; uploads after it fail with
//! [`SolverError::Released`].

use nalgebra_sparse::CsrMatrix;
use serde_json::{Map, Value};

use crate::error::{Result, SolverError};
use crate::krylov::{CsrOperator, Operator};

/// RAII handle on the device and its configuration.
#[derive(Debug)]
pub struct DeviceContext {
    config: Map<String, Value>,
    active: bool,
}

impl DeviceContext {
    /// Open a context configured by `config`.
    pub fn create(config: Map<String, Value>) -> Result<Self> {
        tracing::debug!(keys = config.len(), "device context created");
        Ok(Self {
            config,
            active: true,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(SolverError::Released)
        }
    }

    /// Copy a square CSR matrix to the device.
    pub fn upload_matrix(&self, matrix: &CsrMatrix<f64>) -> Result<DeviceMatrix> {
        self.ensure_active()?;
        if matrix.nrows() != matrix.ncols() {
            return Err(SolverError::DimensionMismatch(format!(
                "device matrix must be square, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        Ok(DeviceMatrix {
            matrix: matrix.clone(),
        })
    }

    pub fn upload_vector(&self, data: &[f64]) -> Result<DeviceVector> {
        self.ensure_active()?;
        Ok(DeviceVector { data: data.to_vec() })
    }

    /// Free the device. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.active {
            self.active = false;
            tracing::debug!("device context destroyed");
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Matrix resident on the device.
#[derive(Debug, Clone)]
pub struct DeviceMatrix {
    matrix: CsrMatrix<f64>,
}

impl DeviceMatrix {
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub(crate) fn csr(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }
}

impl Operator for DeviceMatrix {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        CsrOperator::new(&self.matrix).apply(x, y);
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        CsrOperator::new(&self.matrix).dot(a, b)
    }
}

/// Vector resident on the device.
#[derive(Debug, Clone)]
pub struct DeviceVector {
    data: Vec<f64>,
}

impl DeviceVector {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Copy back to host memory.
    pub fn download(&self, out: &mut [f64]) -> Result<()> {
        if out.len() != self.data.len() {
            return Err(SolverError::DimensionMismatch(format!(
                "download into {} entries from a device vector of {}",
                out.len(),
                self.data.len()
            )));
        }
        out.copy_from_slice(&self.data);
        Ok(())
    }
}
