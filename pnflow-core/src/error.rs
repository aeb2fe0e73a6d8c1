//! Error types for pore-network transport operations.

use crate::boundary::BcKind;
use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or solving a transport problem.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid settings: unknown solver family or method, incompatible
    /// parameters, malformed property keys, out-of-range pores.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A pore already carries a boundary condition of the other kind.
    #[error("boundary condition conflict at pore {pore}: already has a {existing} condition, cannot add a {requested} condition")]
    BoundaryConflict {
        pore: usize,
        existing: BcKind,
        requested: BcKind,
    },

    /// The selected backend relies on an optional library that is not present.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Matrix singularity (disconnected pores, floating clusters).
    #[error("singular system: {0}")]
    SingularSystem(String),

    /// Iterative solve stopped before reaching the requested tolerance.
    #[error("{solver} did not converge after {iterations} iterations (residual {residual:.3e}, relative tolerance {tolerance:.3e})")]
    Convergence {
        solver: String,
        iterations: usize,
        /// Absolute residual norm when the method stopped.
        residual: f64,
        /// Configured relative tolerance.
        tolerance: f64,
    },

    /// Assembly errors (bad conductance arrays).
    #[error("assembly error: {0}")]
    Assembly(String),

    /// Network topology errors.
    #[error("network error: {0}")]
    Network(String),

    /// A required property array is not present in the store.
    #[error("missing property '{0}'")]
    MissingProperty(String),

    /// A property array has the wrong shape or invalid contents.
    #[error("property error: {0}")]
    Property(String),

    /// No solved field is available under the requested key.
    #[error("no result: {0}")]
    NoResult(String),

    /// Solver errors (shape mismatches, backend failures).
    #[error("solver error: {0}")]
    Solver(String),
}

impl Error {
    /// Whether this error belongs to the configuration class: detected before
    /// any numeric work and caused by the caller's settings.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::BoundaryConflict { .. })
    }
}
