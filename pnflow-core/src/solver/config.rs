//! Solver selection: families, methods and the validated [`SolverSpec`].
//!
//! A spec can be written as a bare name or as a record:
//!
//! ```text
//! "cg"                       -> krylov family, conjugate gradients
//! "direct"                   -> direct family, its default method (cholesky)
//! { "family": "krylov", "solver": "gmres", "max_iterations": 500 }
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Default relative residual target for iterative methods.
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// Default iteration cap for iterative methods.
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Class of linear-solving algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverFamily {
    /// Sparse factorization and solve.
    Direct,
    /// Krylov subspace iterations.
    Krylov,
    /// Algebraic multigrid.
    Multigrid,
    /// Methods served by an optional external library.
    External,
}

impl SolverFamily {
    pub const ALL: [SolverFamily; 4] = [
        SolverFamily::Direct,
        SolverFamily::Krylov,
        SolverFamily::Multigrid,
        SolverFamily::External,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SolverFamily::Direct => "direct",
            SolverFamily::Krylov => "krylov",
            SolverFamily::Multigrid => "multigrid",
            SolverFamily::External => "external",
        }
    }

    /// Method used when only the family is given.
    pub fn default_method(self) -> Method {
        match self {
            SolverFamily::Direct => Method::Cholesky,
            SolverFamily::Krylov => Method::Cg,
            SolverFamily::Multigrid => Method::Amg,
            SolverFamily::External => Method::Cg,
        }
    }

    /// Whether `method` can run in this family.
    pub fn supports(self, method: Method) -> bool {
        match self {
            SolverFamily::Direct => method.is_direct(),
            SolverFamily::Krylov => method.native_family() == SolverFamily::Krylov,
            SolverFamily::Multigrid => method == Method::Amg,
            SolverFamily::External => method != Method::Amg,
        }
    }
}

impl fmt::Display for SolverFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SolverFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SolverFamily::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown solver family '{}'", s)))
    }
}

/// Linear solver method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Sparse Cholesky (LLᵀ).
    Cholesky,
    /// Sparse LU.
    Lu,
    /// Conjugate gradients.
    Cg,
    /// Biconjugate gradients.
    Bicg,
    /// Biconjugate gradients stabilized.
    Bicgstab,
    /// Conjugate gradients squared.
    Cgs,
    /// Restarted generalized minimal residual.
    Gmres,
    /// Minimal residual for symmetric systems.
    Minres,
    /// Quasi-minimal residual.
    Qmr,
    /// GCROT(m, k): GMRES cycles with a retained correction subspace.
    Gcrotmk,
    /// Restarted GMRES augmented with previous error approximations.
    Lgmres,
    /// Smoothed-aggregation multigrid accelerated by CG.
    Amg,
}

impl Method {
    pub const ALL: [Method; 12] = [
        Method::Cholesky,
        Method::Lu,
        Method::Cg,
        Method::Bicg,
        Method::Bicgstab,
        Method::Cgs,
        Method::Gmres,
        Method::Minres,
        Method::Qmr,
        Method::Gcrotmk,
        Method::Lgmres,
        Method::Amg,
    ];

    /// Every Krylov method.
    pub const KRYLOV: [Method; 9] = [
        Method::Cg,
        Method::Bicg,
        Method::Bicgstab,
        Method::Cgs,
        Method::Gmres,
        Method::Minres,
        Method::Qmr,
        Method::Gcrotmk,
        Method::Lgmres,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::Cholesky => "cholesky",
            Method::Lu => "lu",
            Method::Cg => "cg",
            Method::Bicg => "bicg",
            Method::Bicgstab => "bicgstab",
            Method::Cgs => "cgs",
            Method::Gmres => "gmres",
            Method::Minres => "minres",
            Method::Qmr => "qmr",
            Method::Gcrotmk => "gcrotmk",
            Method::Lgmres => "lgmres",
            Method::Amg => "amg",
        }
    }

    /// Family a bare method name resolves to.
    pub fn native_family(self) -> SolverFamily {
        match self {
            Method::Cholesky | Method::Lu => SolverFamily::Direct,
            Method::Amg => SolverFamily::Multigrid,
            _ => SolverFamily::Krylov,
        }
    }

    pub fn is_direct(self) -> bool {
        matches!(self, Method::Cholesky | Method::Lu)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Method::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown solver method '{}'", s)))
    }
}

/// Preconditioner for iterative methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreconditionerKind {
    /// No preconditioning.
    None,
    /// Inverse diagonal.
    Jacobi,
    /// One smoothed-aggregation V-cycle.
    Amg,
}

impl PreconditionerKind {
    pub fn name(self) -> &'static str {
        match self {
            PreconditionerKind::None => "none",
            PreconditionerKind::Jacobi => "jacobi",
            PreconditionerKind::Amg => "amg",
        }
    }
}

impl fmt::Display for PreconditionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PreconditionerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(PreconditionerKind::None),
            "jacobi" => Ok(PreconditionerKind::Jacobi),
            "amg" => Ok(PreconditionerKind::Amg),
            other => Err(Error::Configuration(format!(
                "unknown preconditioner '{}'",
                other
            ))),
        }
    }
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawSolverSpec")]
pub struct SolverSpec {
    family: SolverFamily,
    method: Method,
    tolerance: f64,
    max_iterations: usize,
    preconditioner: Option<PreconditionerKind>,
}

impl SolverSpec {
    /// Spec for `method` in its native family with default parameters.
    pub fn new(method: Method) -> Self {
        Self {
            family: method.native_family(),
            method,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            preconditioner: None,
        }
    }

    /// Spec for the default method of `family`.
    pub fn for_family(family: SolverFamily) -> Self {
        Self::new(family.default_method()).with_family(family)
    }

    pub fn with_family(mut self, family: SolverFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Relative residual target: stop once `‖b − Ax‖ ≤ tolerance·‖b‖`.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_preconditioner(mut self, preconditioner: PreconditionerKind) -> Self {
        self.preconditioner = Some(preconditioner);
        self
    }

    pub fn family(&self) -> SolverFamily {
        self.family
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Effective preconditioner: the configured one, or Jacobi for
    /// iterative methods and none for direct ones.
    pub fn preconditioner(&self) -> PreconditionerKind {
        match (self.preconditioner, self.method) {
            (Some(p), _) => p,
            (None, m) if m.is_direct() => PreconditionerKind::None,
            (None, Method::Amg) => PreconditionerKind::Amg,
            (None, _) => PreconditionerKind::Jacobi,
        }
    }

    /// Check for contradictions. Does no numeric work.
    pub fn validate(&self) -> Result<()> {
        if !self.family.supports(self.method) {
            return Err(Error::Configuration(format!(
                "method '{}' is not available in the {} family",
                self.method, self.family
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::Configuration(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        match (self.preconditioner, self.method) {
            (Some(p), m) if m.is_direct() => Err(Error::Configuration(format!(
                "preconditioner '{}' does not apply to direct method '{}'",
                p, m
            ))),
            (Some(p), Method::Amg) if p != PreconditionerKind::Amg => {
                Err(Error::Configuration(format!(
                    "multigrid always uses its own hierarchy, not '{}'",
                    p
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for SolverSpec {
    fn default() -> Self {
        Self::new(Method::Cholesky)
    }
}

impl FromStr for SolverSpec {
    type Err = Error;

    /// Accepts a family name (its default method) or a method name (its
    /// native family).
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(family) = s.parse::<SolverFamily>() {
            return Ok(Self::for_family(family));
        }
        s.parse::<Method>().map(Self::new).map_err(|_| {
            Error::Configuration(format!("'{}' is neither a solver family nor a method", s))
        })
    }
}

impl fmt::Display for SolverSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.method)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSolverSpec {
    Name(String),
    Record(RawSolverRecord),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSolverRecord {
    family: Option<String>,
    solver: Option<String>,
    tolerance: Option<f64>,
    #[serde(alias = "maxiter")]
    max_iterations: Option<usize>,
    preconditioner: Option<String>,
}

impl TryFrom<RawSolverSpec> for SolverSpec {
    type Error = Error;

    fn try_from(raw: RawSolverSpec) -> Result<Self> {
        let spec = match raw {
            RawSolverSpec::Name(name) => name.parse()?,
            RawSolverSpec::Record(record) => {
                let family = record
                    .family
                    .as_deref()
                    .map(SolverFamily::from_str)
                    .transpose()?;
                let method = record.solver.as_deref().map(Method::from_str).transpose()?;
                let mut spec = match (family, method) {
                    (Some(f), Some(m)) => SolverSpec::new(m).with_family(f),
                    (Some(f), None) => SolverSpec::for_family(f),
                    (None, Some(m)) => SolverSpec::new(m),
                    (None, None) => SolverSpec::default(),
                };
                if let Some(tol) = record.tolerance {
                    spec = spec.with_tolerance(tol);
                }
                if let Some(max_iterations) = record.max_iterations {
                    spec = spec.with_max_iterations(max_iterations);
                }
                if let Some(p) = record.preconditioner {
                    spec = spec.with_preconditioner(p.parse()?);
                }
                spec
            }
        };
        spec.validate()?;
        Ok(spec)
    }
}
