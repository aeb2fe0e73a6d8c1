//! pnflow core - steady-state transport on pore networks
//!
//! Solves linear transport (fluid flow, heat conduction, diffusion) on a
//! network of pores connected by throats:
//! - Series-resistors conductance models from conduit geometry
//! - Parallel assembly of the conductance Laplacian (CSR format)
//! - Value and rate boundary conditions
//! - Direct, Krylov, multigrid and pluggable external linear solvers
//!
//! # Architecture
//!
//! The engine is built around these abstractions:
//!
//! - [`Topology`] trait: read-only network connectivity, implemented by [`Network`]
//! - [`SeriesResistors`]: throat conductance from conduit segments
//! - [`BoundaryConditions`]: per-pore value/rate constraints
//! - [`Solver`] and [`Backend`] traits: solver families behind a [`SolverRegistry`]
//! - [`Transport`]: runs assemble → constrain → solve and stores the result
//!
//! # Example
//!
//! ```
//! use pnflow_core::{Network, PropertyStore, Topology, Transport, TransportSettings};
//!
//! let net = Network::cubic([3, 3, 3], 1.0)?;
//! let mut physics = PropertyStore::new();
//! physics.set_uniform("throat.conductance", net.n_throats(), 1.0)?;
//!
//! let mut transport = Transport::new();
//! transport.set_value_bc(net.pores("left")?, 1.0)?;
//! transport.set_value_bc(net.pores("right")?, 0.0)?;
//! transport.run(
//!     &TransportSettings::new("pore.x", "throat.conductance")?,
//!     &net,
//!     &physics,
//! )?;
//! assert_eq!(transport.result("pore.x")?.len(), 27);
//! # Ok::<(), pnflow_core::Error>(())
//! ```

pub mod types;
pub mod error;
pub mod properties;
pub mod network;
pub mod conductance;
pub mod sparse;
pub mod assembly;
pub mod boundary;
pub mod solver;
pub mod transport;

pub use types::{Conn, Entity, Point3, PropKey};
pub use error::{Error, Result};
pub use properties::PropertyStore;
pub use network::{Network, Topology};
pub use conductance::{SegmentLaw, SeriesResistors};
pub use sparse::CsrMatrix;
pub use assembly::{assemble, LinearSystem};
pub use boundary::{BcKind, BcValues, BoundaryConditions};
pub use solver::{
    Backend, DispatchState, Method, PreconditionerKind, Solution, SolveStats, Solver,
    SolverDispatcher, SolverFamily, SolverRegistry, SolverSpec,
};
pub use transport::{Transport, TransportSettings};
