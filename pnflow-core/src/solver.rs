//! Linear system solvers and the dispatcher that selects between them.
//!
//! Solvers are grouped into families:
//!
//! - **direct**: [`FaerCholeskySolver`] and [`FaerLuSolver`] (faer sparse
//!   factorizations).
//! - **krylov**: [`KrylovSolver`] running CG, BiCG, BiCGSTAB, CGS, GMRES or
//!   MINRES with an optional preconditioner.
//! - **multigrid**: CG preconditioned by an [`AmgHierarchy`] V-cycle.
//! - **external**: whatever [`Backend`] the caller registers for it. No
//!   external library ships with the crate.
//!
//! A [`SolverDispatcher`] validates a [`SolverSpec`] against a
//! [`SolverRegistry`] before any numeric work and then runs the solve.

pub mod amg;
pub mod config;
pub mod direct;
pub mod krylov;
pub mod preconditioner;

pub use amg::{AmgHierarchy, AmgParams, MultigridBackend};
pub use config::{Method, PreconditionerKind, SolverFamily, SolverSpec};
pub use direct::{DirectBackend, FaerCholeskySolver, FaerLuSolver};
pub use krylov::{KrylovBackend, KrylovSolver};
pub use preconditioner::{IdentityPreconditioner, JacobiPreconditioner, Preconditioner};

use crate::assembly::LinearSystem;
use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;
use std::fmt;
use std::time::Instant;

/// Linear solver interface.
pub trait Solver: Send + Sync {
    /// Solve the linear system Ax = b.
    ///
    /// # Arguments
    ///
    /// * `matrix` - System matrix
    /// * `rhs` - Right-hand side vector
    ///
    /// # Errors
    ///
    /// Iterative solvers return [`Error::Convergence`] instead of a partial
    /// result; direct solvers return [`Error::SingularSystem`] when the
    /// factorization breaks down.
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Solution>;

    /// Solver name for diagnostics.
    fn name(&self) -> &str;
}

/// Solution statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveStats {
    /// Solver name used.
    pub solver: String,
    /// Number of iterations (iterative solvers only).
    pub iterations: Option<usize>,
    /// Residual norm `‖b − A x‖`.
    pub residual: f64,
    pub converged: bool,
    /// Wall-clock time in seconds.
    pub time_seconds: f64,
}

impl SolveStats {
    pub fn direct(solver: &str, residual: f64) -> Self {
        Self {
            solver: solver.to_string(),
            iterations: None,
            residual,
            converged: true,
            time_seconds: 0.0,
        }
    }

    pub fn iterative(solver: &str, iterations: usize, residual: f64) -> Self {
        Self {
            iterations: Some(iterations),
            ..Self::direct(solver, residual)
        }
    }
}

/// Solution vector with its statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub x: Vec<f64>,
    pub stats: SolveStats,
}

impl Solution {
    /// Solution of a system with no unknowns.
    pub fn empty(solver: &str) -> Self {
        Self {
            x: Vec::new(),
            stats: SolveStats::direct(solver, 0.0),
        }
    }
}

/// Check that `matrix` is square and matches `rhs`.
pub(crate) fn check_dimensions(matrix: &CsrMatrix, rhs: &[f64]) -> Result<()> {
    if matrix.nrows() != matrix.ncols() {
        return Err(Error::Solver(format!(
            "matrix must be square, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.nrows() != rhs.len() {
        return Err(Error::Solver(format!(
            "RHS has length {}, matrix has {} rows",
            rhs.len(),
            matrix.nrows()
        )));
    }
    Ok(())
}

/// Provider of one solver family.
///
/// The built-in families are always available. An external library binding
/// implements this trait for [`SolverFamily::External`] and is registered
/// with [`SolverRegistry::register`].
pub trait Backend: Send + Sync {
    fn family(&self) -> SolverFamily;

    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Whether the backing library can be used right now.
    fn is_available(&self) -> bool {
        true
    }

    /// Create a solver for validated settings.
    fn configure(&self, spec: &SolverSpec) -> Result<Box<dyn Solver>>;
}

/// Registry of solver backends, at most one per family.
pub struct SolverRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl SolverRegistry {
    /// Registry with no backends at all.
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Add a backend, replacing any previous one of the same family.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        let family = backend.family();
        self.backends.retain(|b| b.family() != family);
        self.backends.push(backend);
    }

    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.register(Box::new(backend));
        self
    }

    pub fn get(&self, family: SolverFamily) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.family() == family)
            .map(|b| b.as_ref())
    }

    /// Families whose backend is registered and available.
    pub fn available_families(&self) -> Vec<SolverFamily> {
        SolverFamily::ALL
            .into_iter()
            .filter(|&f| self.get(f).is_some_and(|b| b.is_available()))
            .collect()
    }
}

impl Default for SolverRegistry {
    /// The built-in direct, Krylov and multigrid families.
    fn default() -> Self {
        Self::empty()
            .with_backend(DirectBackend)
            .with_backend(KrylovBackend)
            .with_backend(MultigridBackend)
    }
}

impl fmt::Debug for SolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| (b.family(), b.name())))
            .finish()
    }
}

/// Dispatcher life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Configured,
    Validated,
    Solving,
    Converged,
    Failed,
}

/// Runs one solver configuration: validate, then solve.
pub struct SolverDispatcher {
    spec: SolverSpec,
    state: DispatchState,
    solver: Option<Box<dyn Solver>>,
}

impl SolverDispatcher {
    pub fn new(spec: SolverSpec) -> Self {
        Self {
            spec,
            state: DispatchState::Configured,
            solver: None,
        }
    }

    pub fn spec(&self) -> &SolverSpec {
        &self.spec
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Check the solver settings and resolve their backend. Does no numeric work.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for invalid settings, or
    /// [`Error::DependencyUnavailable`] when the family has no usable backend.
    pub fn validate(&mut self, registry: &SolverRegistry) -> Result<()> {
        match self.resolve(registry) {
            Ok(solver) => {
                log::info!("selected solver {} ({})", self.spec, solver.name());
                self.solver = Some(solver);
                self.state = DispatchState::Validated;
                Ok(())
            }
            Err(e) => {
                self.solver = None;
                self.state = DispatchState::Failed;
                Err(e)
            }
        }
    }

    fn resolve(&self, registry: &SolverRegistry) -> Result<Box<dyn Solver>> {
        self.spec.validate()?;
        let family = self.spec.family();
        let backend = registry.get(family).ok_or_else(|| {
            Error::DependencyUnavailable(format!("no backend registered for the {} family", family))
        })?;
        if !backend.is_available() {
            return Err(Error::DependencyUnavailable(format!(
                "{} backend '{}' is not available",
                family,
                backend.name()
            )));
        }
        backend.configure(&self.spec)
    }

    /// Solve a constrained system with the validated solver.
    ///
    /// The returned statistics carry the true residual and the wall time.
    pub fn solve(&mut self, system: &LinearSystem) -> Result<Solution> {
        let solver = match (&self.solver, self.state) {
            (Some(solver), DispatchState::Validated) => solver,
            _ => {
                return Err(Error::Configuration(format!(
                    "solver must be validated before solving, state is {:?}",
                    self.state
                )))
            }
        };

        self.state = DispatchState::Solving;
        let start = Instant::now();
        let result = solver.solve(&system.matrix, &system.rhs);
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(mut solution) => {
                solution.stats.residual = system.residual_norm(&solution.x);
                solution.stats.time_seconds = elapsed;
                log::info!(
                    "{} converged: iterations = {:?}, residual = {:.3e}, {:.3}s",
                    solution.stats.solver,
                    solution.stats.iterations,
                    solution.stats.residual,
                    elapsed
                );
                self.state = DispatchState::Converged;
                Ok(solution)
            }
            Err(e) => {
                log::warn!("{} failed after {:.3}s: {}", solver.name(), elapsed, e);
                self.state = DispatchState::Failed;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for SolverDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverDispatcher")
            .field("spec", &self.spec)
            .field("state", &self.state)
            .finish()
    }
}
