//! Preconditioners for the Krylov methods.
//!
//! A preconditioner applies `z = M⁻¹ r` for some `M ≈ A` that is cheap to
//! invert. All implementations here are symmetric, so the same operator
//! serves as `M⁻ᵀ` for the transpose-based methods.

use super::amg::{AmgHierarchy, AmgParams};
use super::config::PreconditionerKind;
use crate::error::Result;
use crate::sparse::{diagonal, CsrMatrix};

/// Diagonal entries smaller than this are treated as missing.
const DIAGONAL_THRESHOLD: f64 = 1e-300;

pub trait Preconditioner: Send + Sync {
    /// z = M⁻¹ r
    fn apply(&self, r: &[f64], z: &mut [f64]);

    fn name(&self) -> &'static str;
}

/// M = I
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// M = diag(A). Rows with a missing diagonal pass through unscaled.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inv_diag: Vec<f64>,
}

impl JacobiPreconditioner {
    pub fn from_matrix(matrix: &CsrMatrix) -> Self {
        let inv_diag = diagonal(matrix)
            .into_iter()
            .map(|d| if d.abs() > DIAGONAL_THRESHOLD { 1.0 / d } else { 1.0 })
            .collect();
        Self { inv_diag }
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * di;
        }
    }

    fn name(&self) -> &'static str {
        "jacobi"
    }
}

/// Build the preconditioner selected by `kind` for `matrix`.
pub fn build(kind: PreconditionerKind, matrix: &CsrMatrix) -> Result<Box<dyn Preconditioner>> {
    Ok(match kind {
        PreconditionerKind::None => Box::new(IdentityPreconditioner),
        PreconditionerKind::Jacobi => Box::new(JacobiPreconditioner::from_matrix(matrix)),
        PreconditionerKind::Amg => Box::new(AmgHierarchy::build(matrix, &AmgParams::default())?),
    })
}
