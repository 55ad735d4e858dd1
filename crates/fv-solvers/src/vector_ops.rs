//! Dense vector kernels used by the iterative solvers.

use rayon::prelude::*;

const PARALLEL_LEN: usize = 8192;
const CHUNK: usize = 2048;

/// Dot product. Partial sums are taken over fixed chunks and combined in
/// order, so the result does not depend on thread scheduling.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.len() >= PARALLEL_LEN {
        let partials: Vec<f64> = a
            .par_chunks(CHUNK)
            .zip(b.par_chunks(CHUNK))
            .map(|(x, y)| serial_dot(x, y))
            .collect();
        partials.iter().sum()
    } else {
        serial_dot(a, b)
    }
}

fn serial_dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// y += alpha * x
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// y = x + beta * y
pub fn xpby(x: &[f64], beta: f64, y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = xi + beta * *yi;
    }
}
