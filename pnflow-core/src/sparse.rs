//! Sparse matrix operations.
//!
//! Uses CSR (Compressed Sparse Row) format for efficient matrix-vector products
//! and compatibility with direct/iterative solvers. Also hosts the small dense
//! vector kernels shared by the iterative solvers.

use crate::error::{Error, Result};
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Builder for assembling a sparse matrix from triplets (COO format).
///
/// Accumulates (row, col, value) triplets and converts to CSR when complete.
/// Triplets are kept in insertion order, so identical insertion sequences
/// produce bit-identical matrices.
#[derive(Debug, Clone)]
pub struct TripletMatrix {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl TripletMatrix {
    /// Create a new triplet matrix builder.
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self::with_capacity(n_rows, n_cols, 0)
    }

    /// Create with estimated capacity.
    pub fn with_capacity(n_rows: usize, n_cols: usize, nnz_estimate: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            rows: Vec::with_capacity(nnz_estimate),
            cols: Vec::with_capacity(nnz_estimate),
            values: Vec::with_capacity(nnz_estimate),
        }
    }

    /// Add a value at (row, col). Exact zeros are skipped; duplicates are
    /// summed during conversion.
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        if value != 0.0 {
            self.add_explicit(row, col, value);
        }
    }

    /// Add a value at (row, col) even if it is zero, reserving the position
    /// in the sparsity pattern.
    pub fn add_explicit(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.n_rows, "Row index out of bounds");
        debug_assert!(col < self.n_cols, "Column index out of bounds");

        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    /// Number of stored triplets.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Convert to CSR format, summing duplicate entries.
    pub fn to_csr(self) -> Result<CsrMatrix> {
        let coo = CooMatrix::try_from_triplets(
            self.n_rows,
            self.n_cols,
            self.rows,
            self.cols,
            self.values,
        )
        .map_err(|e| Error::Assembly(format!("invalid triplet data: {}", e)))?;

        Ok(CsrMatrix::from(&coo))
    }
}

/// Diagonal of a square CSR matrix (missing entries are zero).
pub fn diagonal(matrix: &CsrMatrix) -> Vec<f64> {
    let mut diag = vec![0.0; matrix.nrows()];
    for (i, j, &v) in matrix.triplet_iter() {
        if i == j {
            diag[i] += v;
        }
    }
    diag
}

/// y = A x
pub fn spmv(matrix: &CsrMatrix, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(matrix.ncols(), x.len());
    debug_assert_eq!(matrix.nrows(), y.len());
    for (i, row) in matrix.row_iter().enumerate() {
        y[i] = row
            .col_indices()
            .iter()
            .zip(row.values())
            .map(|(&j, &v)| v * x[j])
            .sum();
    }
}

/// y = Aᵀ x
pub fn spmv_transpose(matrix: &CsrMatrix, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(matrix.nrows(), x.len());
    debug_assert_eq!(matrix.ncols(), y.len());
    y.fill(0.0);
    for (i, row) in matrix.row_iter().enumerate() {
        let xi = x[i];
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            y[j] += v * xi;
        }
    }
}

/// r = b - A x
pub fn residual(matrix: &CsrMatrix, x: &[f64], b: &[f64], r: &mut [f64]) {
    spmv(matrix, x, r);
    for (ri, bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// y += alpha x
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}
