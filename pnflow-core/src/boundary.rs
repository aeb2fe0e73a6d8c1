//! Boundary conditions on pores.
//!
//! Two kinds of constraint are supported:
//!
//! - **value**: fixes the unknown at a pore (Dirichlet).
//! - **rate**: fixes the net flow leaving the pore into the network
//!   (Neumann); a positive rate is injection from outside.
//!
//! A pore carries at most one kind. Re-registering a pore with the same kind
//! overwrites its magnitude; registering the other kind is a conflict.
//!
//! # Application order
//!
//! [`BoundaryConditions::apply`] processes rate constraints first (added to
//! the right-hand side) and value constraints second. A value constraint
//! replaces its row with the identity row and sets the right-hand side to the
//! value, overriding anything a rate contributed there. Its column is then
//! eliminated from every other row (moved to the right-hand side) so that
//! the constrained matrix stays symmetric for Cholesky, CG and MINRES; the
//! solution is the same as with plain row replacement.

use crate::assembly::LinearSystem;
use crate::error::{Error, Result};
use crate::sparse::TripletMatrix;
use std::collections::BTreeMap;
use std::fmt;

/// Constraint kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BcKind {
    /// Fixed unknown (Dirichlet).
    Value,
    /// Fixed net flow (Neumann).
    Rate,
}

impl fmt::Display for BcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BcKind::Value => f.write_str("value"),
            BcKind::Rate => f.write_str("rate"),
        }
    }
}

/// Magnitudes for a set of pores: one scalar broadcast to all of them, or one
/// value per pore.
#[derive(Debug, Clone, PartialEq)]
pub enum BcValues {
    Scalar(f64),
    PerPore(Vec<f64>),
}

impl BcValues {
    fn expand(&self, n_pores: usize) -> Result<Vec<f64>> {
        let values = match self {
            BcValues::Scalar(v) => vec![*v; n_pores],
            BcValues::PerPore(values) => {
                if values.len() != n_pores {
                    return Err(Error::Configuration(format!(
                        "{} boundary values given for {} pores",
                        values.len(),
                        n_pores
                    )));
                }
                values.clone()
            }
        };
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(Error::Configuration(format!(
                "boundary value {} is not finite",
                bad
            )));
        }
        Ok(values)
    }
}

impl From<f64> for BcValues {
    fn from(value: f64) -> Self {
        BcValues::Scalar(value)
    }
}

impl From<Vec<f64>> for BcValues {
    fn from(values: Vec<f64>) -> Self {
        BcValues::PerPore(values)
    }
}

impl From<&[f64]> for BcValues {
    fn from(values: &[f64]) -> Self {
        BcValues::PerPore(values.to_vec())
    }
}

/// A single registered constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryCondition {
    pub kind: BcKind,
    pub value: f64,
}

/// Registry of per-pore constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryConditions {
    entries: BTreeMap<usize, BoundaryCondition>,
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the unknown at `pores`.
    pub fn set_value(&mut self, pores: &[usize], values: impl Into<BcValues>) -> Result<()> {
        self.set(BcKind::Value, pores, values.into())
    }

    /// Fix the net flow at `pores`.
    pub fn set_rate(&mut self, pores: &[usize], values: impl Into<BcValues>) -> Result<()> {
        self.set(BcKind::Rate, pores, values.into())
    }

    /// Validate the whole request before touching any entry, so a rejected
    /// call leaves the registry unchanged.
    fn set(&mut self, kind: BcKind, pores: &[usize], values: BcValues) -> Result<()> {
        let values = values.expand(pores.len())?;
        for &pore in pores {
            if let Some(existing) = self.entries.get(&pore) {
                if existing.kind != kind {
                    return Err(Error::BoundaryConflict {
                        pore,
                        existing: existing.kind,
                        requested: kind,
                    });
                }
            }
        }
        for (&pore, value) in pores.iter().zip(values) {
            self.entries.insert(pore, BoundaryCondition { kind, value });
        }
        log::debug!("registered {} {} boundary condition(s)", pores.len(), kind);
        Ok(())
    }

    /// Drop any constraint on `pores`.
    pub fn remove(&mut self, pores: &[usize]) {
        for pore in pores {
            self.entries.remove(pore);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, pore: usize) -> Option<BoundaryCondition> {
        self.entries.get(&pore).copied()
    }

    /// Pores with a value constraint, ascending.
    pub fn value_pores(&self) -> Vec<usize> {
        self.pores_of(BcKind::Value)
    }

    /// Pores with a rate constraint, ascending.
    pub fn rate_pores(&self) -> Vec<usize> {
        self.pores_of(BcKind::Rate)
    }

    fn pores_of(&self, kind: BcKind) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|(_, bc)| bc.kind == kind)
            .map(|(&p, _)| p)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every constrained pore is below `n_pores`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first pore outside.
    pub fn check_bounds(&self, n_pores: usize) -> Result<()> {
        match self.entries.range(n_pores..).next() {
            Some((&pore, _)) => Err(Error::Configuration(format!(
                "boundary condition on pore {} but the network has {} pores",
                pore, n_pores
            ))),
            None => Ok(()),
        }
    }

    /// Build the constrained system from an assembled one.
    ///
    /// The input system is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a constrained pore is outside the
    /// system.
    pub fn apply(&self, system: &LinearSystem) -> Result<LinearSystem> {
        let n = system.n();
        self.check_bounds(n)?;

        let mut rhs = system.rhs.clone();
        for (&pore, bc) in &self.entries {
            if bc.kind == BcKind::Rate {
                rhs[pore] += bc.value;
            }
        }

        let mut fixed: Vec<Option<f64>> = vec![None; n];
        for (&pore, bc) in &self.entries {
            if bc.kind == BcKind::Value {
                fixed[pore] = Some(bc.value);
            }
        }

        let mut triplet = TripletMatrix::with_capacity(n, n, system.matrix.nnz());
        for (i, j, &a) in system.matrix.triplet_iter() {
            match (fixed[i], fixed[j]) {
                (Some(_), _) => {}
                (None, Some(vj)) => rhs[i] -= a * vj,
                (None, None) => {
                    if i == j {
                        triplet.add_explicit(i, j, a);
                    } else {
                        triplet.add(i, j, a);
                    }
                }
            }
        }
        for (pore, value) in fixed.iter().enumerate() {
            if let Some(v) = value {
                triplet.add_explicit(pore, pore, 1.0);
                rhs[pore] = *v;
            }
        }

        log::debug!(
            "applied {} value and {} rate boundary conditions",
            fixed.iter().filter(|v| v.is_some()).count(),
            self.entries.len() - fixed.iter().filter(|v| v.is_some()).count()
        );

        Ok(LinearSystem {
            matrix: triplet.to_csr()?,
            rhs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::assemble;
    use crate::network::Network;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector, Vector3};

    fn chain_system(conductances: &[f64]) -> LinearSystem {
        let mut net = Network::new();
        for i in 0..=conductances.len() {
            net.add_pore(Vector3::new(i as f64, 0.0, 0.0));
        }
        for i in 0..conductances.len() {
            net.add_throat(i, i + 1).unwrap();
        }
        assemble(&net, conductances).unwrap()
    }

    fn dense_solve(system: &LinearSystem) -> Vec<f64> {
        let a = DMatrix::from(&system.matrix);
        let b = DVector::from_column_slice(&system.rhs);
        a.lu().solve(&b).unwrap().as_slice().to_vec()
    }

    #[test]
    fn test_scalar_broadcast() {
        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[0, 1, 2], 1.5).unwrap();
        assert_eq!(bcs.len(), 3);
        assert_eq!(bcs.get(2).unwrap().value, 1.5);
    }

    #[test]
    fn test_per_pore_values_length_mismatch() {
        let mut bcs = BoundaryConditions::new();
        let err = bcs.set_rate(&[0, 1], vec![1.0]).unwrap_err();
        assert!(err.is_configuration());
        assert!(bcs.is_empty());
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let mut bcs = BoundaryConditions::new();
        assert!(bcs.set_value(&[0], f64::NAN).is_err());
    }

    #[test]
    fn test_conflict_leaves_other_pores_untouched() {
        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[0, 1], 1.0).unwrap();
        bcs.set_rate(&[5], 2.0).unwrap();

        let err = bcs.set_rate(&[3, 1], 0.5).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err,
            Error::BoundaryConflict {
                pore: 1,
                existing: BcKind::Value,
                requested: BcKind::Rate
            }
        ));

        // Nothing from the rejected call was applied.
        assert!(bcs.get(3).is_none());
        assert_eq!(bcs.get(1).unwrap().kind, BcKind::Value);
        assert_eq!(bcs.get(0).unwrap().value, 1.0);
        assert_eq!(bcs.get(5).unwrap().value, 2.0);
    }

    #[test]
    fn test_same_kind_overwrites() {
        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[0, 1], 1.0).unwrap();
        bcs.set_value(&[1], 0.0).unwrap();
        assert_eq!(bcs.get(1).unwrap().value, 0.0);
        assert_eq!(bcs.value_pores(), vec![0, 1]);
    }

    #[test]
    fn test_remove_then_switch_kind() {
        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[2], 1.0).unwrap();
        bcs.remove(&[2]);
        bcs.set_rate(&[2], 1.0).unwrap();
        assert_eq!(bcs.rate_pores(), vec![2]);
    }

    #[test]
    fn test_value_row_replacement() {
        let system = chain_system(&[1.0, 2.0]);
        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[0], 3.0).unwrap();

        let constrained = bcs.apply(&system).unwrap();
        let dense = DMatrix::from(&constrained.matrix);
        assert_relative_eq!(dense[(0, 0)], 1.0);
        assert_relative_eq!(dense[(0, 1)], 0.0);
        assert_relative_eq!(constrained.rhs[0], 3.0);
        // Column lifted into the neighbour's right-hand side.
        assert_relative_eq!(dense[(1, 0)], 0.0);
        assert_relative_eq!(constrained.rhs[1], 3.0);
        assert!(constrained.is_symmetric(0.0));

        // The assembled system is untouched.
        assert!(system.rhs.iter().all(|&b| b == 0.0));
        assert_relative_eq!(DMatrix::from(&system.matrix)[(1, 0)], -1.0);
    }

    #[test]
    fn test_rate_only_touches_rhs() {
        let system = chain_system(&[1.0, 1.0]);
        let mut bcs = BoundaryConditions::new();
        bcs.set_rate(&[1], 0.25).unwrap();

        let constrained = bcs.apply(&system).unwrap();
        assert_eq!(constrained.matrix, system.matrix);
        assert_eq!(constrained.rhs, vec![0.0, 0.25, 0.0]);
    }

    #[test]
    fn test_linear_profile_between_two_values() {
        let system = chain_system(&[1.0, 1.0, 1.0, 1.0]);
        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[0], 1.0).unwrap();
        bcs.set_value(&[4], 0.0).unwrap();

        let x = dense_solve(&bcs.apply(&system).unwrap());
        for (i, xi) in x.iter().enumerate() {
            assert_relative_eq!(*xi, 1.0 - i as f64 / 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rate_and_value_combined() {
        // Inject q at pore 0, hold pore 2 at zero: x0 = q (1/g1 + 1/g2)
        let system = chain_system(&[2.0, 4.0]);
        let mut bcs = BoundaryConditions::new();
        bcs.set_rate(&[0], 1.0).unwrap();
        bcs.set_value(&[2], 0.0).unwrap();

        let x = dense_solve(&bcs.apply(&system).unwrap());
        assert_relative_eq!(x[0], 0.75, epsilon = 1e-12);
        assert_relative_eq!(x[1], 0.25, epsilon = 1e-12);
        assert_relative_eq!(x[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_value_on_isolated_pore() {
        let mut net = Network::new();
        net.add_pore(Vector3::new(0.0, 0.0, 0.0));
        let system = assemble(&net, &[]).unwrap();
        assert_eq!(system.isolated_pores(), vec![0]);

        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[0], 2.0).unwrap();
        let constrained = bcs.apply(&system).unwrap();
        assert!(constrained.isolated_pores().is_empty());
        assert_eq!(dense_solve(&constrained), vec![2.0]);
    }

    #[test]
    fn test_out_of_range_pore() {
        let system = chain_system(&[1.0]);
        let mut bcs = BoundaryConditions::new();
        bcs.set_value(&[7], 1.0).unwrap();
        assert!(bcs.apply(&system).unwrap_err().is_configuration());
        assert!(bcs.check_bounds(7).is_err());
        assert!(bcs.check_bounds(8).is_ok());
    }
}
