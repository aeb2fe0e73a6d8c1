//! Smoothed-aggregation algebraic multigrid.
//!
//! The hierarchy is built from the matrix alone:
//!
//! 1. strength of connection `|a_ij| ≥ θ·sqrt(|a_ii·a_jj|)`
//! 2. greedy aggregation of strongly connected neighbourhoods
//! 3. tentative prolongator with one unit entry per fine node
//! 4. Jacobi smoothing `P = (I − ω D⁻¹ A) P_tent` with `ω = 4 / (3ρ)`
//! 5. Galerkin coarse operator `A_c = Pᵀ A P`
//!
//! One V-cycle with symmetric Gauss–Seidel smoothing is a symmetric
//! preconditioner, so the multigrid family runs it inside CG.

use super::krylov::KrylovSolver;
use super::preconditioner::Preconditioner;
use super::config::{Method, PreconditionerKind, SolverSpec};
use super::{Backend, Solver, SolverFamily};
use crate::error::{Error, Result};
use crate::sparse::{axpy, diagonal, residual, spmv, CsrMatrix, TripletMatrix};
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

const UNAGGREGATED: usize = usize::MAX;

/// Hierarchy construction parameters.
#[derive(Debug, Clone)]
pub struct AmgParams {
    /// Strength-of-connection threshold θ.
    pub strength_threshold: f64,
    /// Stop coarsening at or below this many unknowns.
    pub max_coarse: usize,
    pub max_levels: usize,
    /// Stop coarsening when a level keeps more than this fraction of unknowns.
    pub min_coarsening: f64,
    pub pre_sweeps: usize,
    pub post_sweeps: usize,
}

impl Default for AmgParams {
    fn default() -> Self {
        Self {
            strength_threshold: 0.0,
            max_coarse: 64,
            max_levels: 10,
            min_coarsening: 0.8,
            pre_sweeps: 1,
            post_sweeps: 1,
        }
    }
}

#[derive(Debug, Clone)]
struct Level {
    a: CsrMatrix,
    diag: Vec<f64>,
    p: CsrMatrix,
    r: CsrMatrix,
}

/// Multigrid hierarchy ready to apply V-cycles.
#[derive(Debug, Clone)]
pub struct AmgHierarchy {
    levels: Vec<Level>,
    coarse: LU<f64, Dyn, Dyn>,
    coarse_n: usize,
    pre_sweeps: usize,
    post_sweeps: usize,
}

impl AmgHierarchy {
    /// Build the hierarchy for `matrix`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SingularSystem`] if the coarsest operator cannot be
    /// factored.
    pub fn build(matrix: &CsrMatrix, params: &AmgParams) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(Error::Solver("multigrid needs a square matrix".into()));
        }

        let mut levels = Vec::new();
        let mut a = matrix.clone();
        while a.nrows() > params.max_coarse && levels.len() + 1 < params.max_levels {
            let (aggregates, n_agg) = aggregate(&a, params.strength_threshold);
            if n_agg == 0 || n_agg as f64 > params.min_coarsening * a.nrows() as f64 {
                break;
            }
            let diag = diagonal(&a);
            let p = smoothed_prolongator(&a, &diag, &aggregates, n_agg)?;
            let r = p.transpose();
            let coarse = &r * &(&a * &p);
            log::debug!(
                "amg level {}: {} -> {} unknowns",
                levels.len(),
                a.nrows(),
                coarse.nrows()
            );
            levels.push(Level { a, diag, p, r });
            a = coarse;
        }

        let coarse_n = a.nrows();
        let coarse = DMatrix::from(&a).lu();
        if coarse_n > 0 && !coarse.is_invertible() {
            return Err(Error::SingularSystem(format!(
                "coarsest multigrid operator ({} unknowns) is singular",
                coarse_n
            )));
        }

        Ok(Self {
            levels,
            coarse,
            coarse_n,
            pre_sweeps: params.pre_sweeps,
            post_sweeps: params.post_sweeps,
        })
    }

    /// Number of levels including the coarsest.
    pub fn n_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// Unknowns per level, finest first.
    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels
            .iter()
            .map(|l| l.a.nrows())
            .chain(std::iter::once(self.coarse_n))
            .collect()
    }

    fn cycle(&self, depth: usize, b: &[f64], x: &mut [f64]) {
        let Some(level) = self.levels.get(depth) else {
            let rhs = DVector::from_column_slice(b);
            match self.coarse.solve(&rhs) {
                Some(sol) => x.copy_from_slice(sol.as_slice()),
                None => x.fill(0.0),
            }
            return;
        };

        x.fill(0.0);
        for _ in 0..self.pre_sweeps {
            gauss_seidel(&level.a, &level.diag, b, x, Sweep::Forward);
        }

        let mut r = vec![0.0; b.len()];
        residual(&level.a, x, b, &mut r);
        let mut rc = vec![0.0; level.r.nrows()];
        spmv(&level.r, &r, &mut rc);
        let mut xc = vec![0.0; rc.len()];
        self.cycle(depth + 1, &rc, &mut xc);

        let mut correction = vec![0.0; b.len()];
        spmv(&level.p, &xc, &mut correction);
        axpy(1.0, &correction, x);

        for _ in 0..self.post_sweeps {
            gauss_seidel(&level.a, &level.diag, b, x, Sweep::Backward);
        }
    }
}

impl Preconditioner for AmgHierarchy {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        self.cycle(0, r, z);
    }

    fn name(&self) -> &'static str {
        "amg"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sweep {
    Forward,
    Backward,
}

/// In-place Gauss–Seidel sweep. Rows with a zero diagonal are skipped.
fn gauss_seidel(a: &CsrMatrix, diag: &[f64], b: &[f64], x: &mut [f64], sweep: Sweep) {
    let offsets = a.row_offsets();
    let cols = a.col_indices();
    let values = a.values();
    let mut relax = |i: usize| {
        if diag[i] == 0.0 {
            return;
        }
        let mut sigma = 0.0;
        for idx in offsets[i]..offsets[i + 1] {
            let j = cols[idx];
            if j != i {
                sigma += values[idx] * x[j];
            }
        }
        x[i] = (b[i] - sigma) / diag[i];
    };
    match sweep {
        Sweep::Forward => (0..a.nrows()).for_each(&mut relax),
        Sweep::Backward => (0..a.nrows()).rev().for_each(&mut relax),
    }
}

fn strong_neighbours(a: &CsrMatrix, diag: &[f64], theta: f64, i: usize) -> Vec<usize> {
    let row = a.row(i);
    row.col_indices()
        .iter()
        .zip(row.values())
        .filter(|(&j, &v)| {
            j != i && v != 0.0 && v.abs() >= theta * (diag[i] * diag[j]).abs().sqrt()
        })
        .map(|(&j, _)| j)
        .collect()
}

/// Greedy aggregation. Returns the aggregate of every node and the number
/// of aggregates.
fn aggregate(a: &CsrMatrix, theta: f64) -> (Vec<usize>, usize) {
    let n = a.nrows();
    let diag = diagonal(a);
    let mut agg = vec![UNAGGREGATED; n];
    let mut count = 0;

    // Seed aggregates from nodes whose whole strong neighbourhood is free.
    for i in 0..n {
        if agg[i] != UNAGGREGATED {
            continue;
        }
        let neighbours = strong_neighbours(a, &diag, theta, i);
        if neighbours.iter().all(|&j| agg[j] == UNAGGREGATED) {
            agg[i] = count;
            for j in neighbours {
                agg[j] = count;
            }
            count += 1;
        }
    }

    // Attach leftovers to a neighbouring aggregate.
    let seeded = agg.clone();
    for i in 0..n {
        if agg[i] != UNAGGREGATED {
            continue;
        }
        let attached = strong_neighbours(a, &diag, theta, i)
            .into_iter()
            .find(|&j| seeded[j] != UNAGGREGATED);
        if let Some(j) = attached {
            agg[i] = seeded[j];
        }
    }

    // Anything still free starts a new aggregate with its free neighbours.
    for i in 0..n {
        if agg[i] != UNAGGREGATED {
            continue;
        }
        agg[i] = count;
        for j in strong_neighbours(a, &diag, theta, i) {
            if agg[j] == UNAGGREGATED {
                agg[j] = count;
            }
        }
        count += 1;
    }

    (agg, count)
}

/// Spectral radius bound of `D⁻¹A` from Gershgorin discs.
fn gershgorin_radius(a: &CsrMatrix, diag: &[f64]) -> f64 {
    a.row_iter()
        .enumerate()
        .filter(|(i, _)| diag[*i] != 0.0)
        .map(|(i, row)| row.values().iter().map(|v| v.abs()).sum::<f64>() / diag[i].abs())
        .fold(0.0, f64::max)
}

fn smoothed_prolongator(
    a: &CsrMatrix,
    diag: &[f64],
    aggregates: &[usize],
    n_agg: usize,
) -> Result<CsrMatrix> {
    let n = a.nrows();
    let mut tentative = TripletMatrix::with_capacity(n, n_agg, n);
    for (i, &k) in aggregates.iter().enumerate() {
        tentative.add(i, k, 1.0);
    }
    let tentative = tentative.to_csr()?;

    let rho = gershgorin_radius(a, diag);
    if rho == 0.0 {
        return Ok(tentative);
    }
    let omega = 4.0 / (3.0 * rho);

    // ω D⁻¹ A, scaled row by row.
    let mut scaled = a.clone();
    let offsets = a.row_offsets();
    let values = scaled.values_mut();
    for i in 0..n {
        let s = if diag[i] != 0.0 { omega / diag[i] } else { 0.0 };
        for v in &mut values[offsets[i]..offsets[i + 1]] {
            *v *= s;
        }
    }

    let smoothing = &scaled * &tentative;
    Ok(&tentative - &smoothing)
}

/// Built-in multigrid family: CG preconditioned by one V-cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultigridBackend;

impl Backend for MultigridBackend {
    fn family(&self) -> SolverFamily {
        SolverFamily::Multigrid
    }

    fn name(&self) -> &str {
        "builtin-amg"
    }

    fn configure(&self, spec: &SolverSpec) -> Result<Box<dyn Solver>> {
        if spec.method() != Method::Amg {
            return Err(Error::Configuration(format!(
                "multigrid backend cannot run '{}'",
                spec.method()
            )));
        }
        let solver = KrylovSolver::new(Method::Cg, spec)?
            .with_preconditioner(PreconditionerKind::Amg)
            .with_label("amg");
        Ok(Box::new(solver))
    }
}
