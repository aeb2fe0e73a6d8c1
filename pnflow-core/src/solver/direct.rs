//! Sparse direct solvers backed by faer.

use super::{check_dimensions, Backend, Solution, SolveStats, Solver, SolverFamily};
use super::config::{Method, SolverSpec};
use crate::error::{Error, Result};
use crate::sparse::{norm2, residual, CsrMatrix};
use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, Lu, SymbolicLlt, SymbolicLu};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};

/// Residual ratio above which a direct solution is rejected as garbage from
/// a numerically singular factorization.
const SINGULAR_RESIDUAL_RATIO: f64 = 1e-6;

/// Convert a nalgebra-sparse CSR matrix to a faer CSC matrix holding the
/// same entries.
fn csr_to_faer_csc(csr: &CsrMatrix) -> SparseColMat<usize, f64> {
    let nrows = csr.nrows();
    let ncols = csr.ncols();
    let row_offsets = csr.row_offsets();
    let col_indices = csr.col_indices();
    let values = csr.values();

    let mut col_offsets = vec![0usize; ncols + 1];
    for &col in col_indices {
        col_offsets[col + 1] += 1;
    }
    for i in 0..ncols {
        col_offsets[i + 1] += col_offsets[i];
    }

    let nnz = values.len();
    let mut row_indices = vec![0usize; nnz];
    let mut csc_values = vec![0.0f64; nnz];
    let mut next = col_offsets[..ncols].to_vec();

    // Rows are visited in order, so row indices within each column stay sorted.
    for row in 0..nrows {
        for idx in row_offsets[row]..row_offsets[row + 1] {
            let col = col_indices[idx];
            let pos = next[col];
            row_indices[pos] = row;
            csc_values[pos] = values[idx];
            next[col] += 1;
        }
    }

    // SAFETY: offsets are monotone, row indices are in bounds and sorted
    // within each column, and there are no duplicates since the CSR had none.
    unsafe {
        SparseColMat::new(
            SymbolicSparseColMat::new_unchecked(nrows, ncols, col_offsets, None, row_indices),
            csc_values,
        )
    }
}

/// Reject non-finite solutions and solutions whose residual shows the
/// factorization was numerically singular.
fn checked_solution(
    name: &str,
    matrix: &CsrMatrix,
    rhs: &[f64],
    x: Vec<f64>,
) -> Result<Solution> {
    if let Some(i) = x.iter().position(|v| !v.is_finite()) {
        return Err(Error::SingularSystem(format!(
            "{} produced a non-finite value at unknown {}",
            name, i
        )));
    }
    let mut r = vec![0.0; rhs.len()];
    residual(matrix, &x, rhs, &mut r);
    let res = norm2(&r);
    let scale = norm2(rhs).max(f64::MIN_POSITIVE);
    if res > SINGULAR_RESIDUAL_RATIO * scale {
        return Err(Error::SingularSystem(format!(
            "{} residual {:.3e} is too large for a direct solve, the matrix is singular",
            name, res
        )));
    }
    Ok(Solution {
        x,
        stats: SolveStats::direct(name, res),
    })
}

/// Sparse Cholesky (LLᵀ) solver.
///
/// Requires a symmetric positive definite matrix. The conductance matrix
/// after boundary conditions satisfies this whenever every connected
/// cluster of pores holds at least one value condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerCholeskySolver;

impl FaerCholeskySolver {
    pub fn new() -> Self {
        Self
    }
}

impl Solver for FaerCholeskySolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Solution> {
        check_dimensions(matrix, rhs)?;
        let n = rhs.len();
        if n == 0 {
            return Ok(Solution::empty(self.name()));
        }

        let csc = csr_to_faer_csc(matrix);
        let csc_ref = csc.as_ref();

        let symbolic = SymbolicLlt::try_new(csc_ref.symbolic(), faer::Side::Lower)
            .map_err(|e| Error::Solver(format!("symbolic Cholesky analysis failed: {:?}", e)))?;

        let llt = Llt::try_new_with_symbolic(symbolic, csc_ref, faer::Side::Lower).map_err(
            |e| match e {
                SparseLltError::Generic(err) => {
                    Error::Solver(format!("sparse Cholesky error: {:?}", err))
                }
                SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
                    Error::SingularSystem(format!(
                        "matrix is not positive definite at pivot {}",
                        index
                    ))
                }
            },
        )?;

        let mut x = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
        llt.solve_in_place(x.as_mut());

        checked_solution(self.name(), matrix, rhs, (0..n).map(|i| x[(i, 0)]).collect())
    }

    fn name(&self) -> &str {
        "cholesky"
    }
}

/// Sparse LU solver. Works for general square matrices.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerLuSolver;

impl FaerLuSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Solver for FaerLuSolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Solution> {
        check_dimensions(matrix, rhs)?;
        let n = rhs.len();
        if n == 0 {
            return Ok(Solution::empty(self.name()));
        }

        let csc = csr_to_faer_csc(matrix);
        let csc_ref = csc.as_ref();

        let symbolic = SymbolicLu::try_new(csc_ref.symbolic())
            .map_err(|e| Error::Solver(format!("symbolic LU analysis failed: {:?}", e)))?;
        let lu = Lu::try_new_with_symbolic(symbolic, csc_ref)
            .map_err(|e| Error::SingularSystem(format!("sparse LU failed: {:?}", e)))?;

        let mut x = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
        lu.solve_in_place(x.as_mut());

        checked_solution(self.name(), matrix, rhs, (0..n).map(|i| x[(i, 0)]).collect())
    }

    fn name(&self) -> &str {
        "lu"
    }
}

/// Built-in direct family.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBackend;

impl Backend for DirectBackend {
    fn family(&self) -> SolverFamily {
        SolverFamily::Direct
    }

    fn name(&self) -> &str {
        "faer"
    }

    fn configure(&self, spec: &SolverSpec) -> Result<Box<dyn Solver>> {
        match spec.method() {
            Method::Cholesky => Ok(Box::new(FaerCholeskySolver::new())),
            Method::Lu => Ok(Box::new(FaerLuSolver::new())),
            other => Err(Error::Configuration(format!(
                "direct backend cannot run '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::TripletMatrix;
    use approx::assert_relative_eq;

    fn matrix(n: usize, entries: &[(usize, usize, f64)]) -> CsrMatrix {
        let mut triplet = TripletMatrix::new(n, n);
        for &(i, j, v) in entries {
            triplet.add(i, j, v);
        }
        triplet.to_csr().unwrap()
    }

    #[test]
    fn test_cholesky_3x3_spd() {
        // x = [-3/16, 11/8, 3/4]
        let a = matrix(
            3,
            &[
                (0, 0, 4.0),
                (0, 1, 2.0),
                (1, 0, 2.0),
                (1, 1, 5.0),
                (1, 2, 2.0),
                (2, 1, 2.0),
                (2, 2, 3.0),
            ],
        );
        let solution = FaerCholeskySolver::new().solve(&a, &[2.0, 8.0, 5.0]).unwrap();
        let expected = [-0.1875, 1.375, 0.75];
        for i in 0..3 {
            assert_relative_eq!(solution.x[i], expected[i], epsilon = 1e-10);
        }
        assert_eq!(solution.stats.iterations, None);
        assert!(solution.stats.converged);
    }

    #[test]
    fn test_cholesky_not_positive_definite() {
        // Eigenvalues 3 and -1
        let a = matrix(2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 1.0)]);
        let err = FaerCholeskySolver::new().solve(&a, &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, Error::SingularSystem(_)));
    }

    #[test]
    fn test_lu_nonsymmetric() {
        // [2 1; 0 4] x = [3; 8] -> x = [0.5, 2]
        let a = matrix(2, &[(0, 0, 2.0), (0, 1, 1.0), (1, 1, 4.0)]);
        let solution = FaerLuSolver::new().solve(&a, &[3.0, 8.0]).unwrap();
        assert_relative_eq!(solution.x[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(solution.x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_direct_solvers_agree() {
        let mut entries = Vec::new();
        for i in 0..6 {
            entries.push((i, i, 4.0));
        }
        for i in 0..5 {
            entries.push((i, i + 1, -1.0));
            entries.push((i + 1, i, -1.0));
        }
        let a = matrix(6, &entries);
        let b = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let chol = FaerCholeskySolver::new().solve(&a, &b).unwrap();
        let lu = FaerLuSolver::new().solve(&a, &b).unwrap();
        for i in 0..6 {
            assert_relative_eq!(chol.x[i], lu.x[i], epsilon = 1e-12);
        }
        assert!(chol.stats.residual < 1e-12);
    }

    #[test]
    fn test_empty_and_mismatch() {
        let empty = matrix(0, &[]);
        assert!(FaerLuSolver::new().solve(&empty, &[]).unwrap().x.is_empty());
        let a = matrix(2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        assert!(FaerCholeskySolver::new().solve(&a, &[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_backend_rejects_iterative_method() {
        let spec = SolverSpec::new(Method::Cg);
        assert!(DirectBackend.configure(&spec).is_err());
        let spec = SolverSpec::new(Method::Lu);
        assert_eq!(DirectBackend.configure(&spec).unwrap().name(), "lu");
    }
}
