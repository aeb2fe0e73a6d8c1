//! Conductance matrix assembly.
//!
//! Builds the weighted graph Laplacian of the network: for every throat
//! `t = (i, j)` with conductance `g`,
//!
//! ```text
//! A[i,i] += g    A[j,j] += g    A[i,j] -= g    A[j,i] -= g
//! ```
//!
//! so that `(A x)[i] = Σ_j g_ij (x_i - x_j)` is the net flow leaving pore `i`.
//! The right-hand side starts at zero; sources enter through boundary
//! conditions.

use crate::error::{Error, Result};
use crate::network::Topology;
use crate::sparse::{diagonal, norm2, residual, CsrMatrix, TripletMatrix};
use rayon::prelude::*;

/// Linear system `A x = b` owned by a single solve.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    /// System matrix.
    pub matrix: CsrMatrix,
    /// Right-hand side.
    pub rhs: Vec<f64>,
}

impl LinearSystem {
    /// Number of unknowns.
    pub fn n(&self) -> usize {
        self.rhs.len()
    }

    /// Rows with a zero diagonal.
    ///
    /// In an assembled Laplacian these are pores without any conducting
    /// throat; left unconstrained they make the system singular.
    pub fn isolated_pores(&self) -> Vec<usize> {
        diagonal(&self.matrix)
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Pores whose connected cluster contains none of `anchored`.
    ///
    /// Clusters follow the non-zero off-diagonal entries, i.e. the conducting
    /// throats. On an assembled Laplacian every such cluster leaves the
    /// solution undetermined up to a constant. Anchors outside the system are
    /// ignored.
    pub fn floating_pores(&self, anchored: &[usize]) -> Vec<usize> {
        let n = self.n();
        let mut cluster = vec![usize::MAX; n];
        let mut has_anchor: Vec<bool> = Vec::new();
        let mut stack = Vec::new();
        for start in 0..n {
            if cluster[start] != usize::MAX {
                continue;
            }
            let id = has_anchor.len();
            has_anchor.push(false);
            cluster[start] = id;
            stack.push(start);
            while let Some(i) = stack.pop() {
                let row = self.matrix.row(i);
                for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                    if j != i && v != 0.0 && cluster[j] == usize::MAX {
                        cluster[j] = id;
                        stack.push(j);
                    }
                }
            }
        }
        for &p in anchored {
            if let Some(&id) = cluster.get(p) {
                has_anchor[id] = true;
            }
        }
        (0..n).filter(|&p| !has_anchor[cluster[p]]).collect()
    }

    /// Check `|A[i,j] - A[j,i]| <= tol` for every stored entry.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        let transposed = self.matrix.transpose();
        let entry = |m: &CsrMatrix, i: usize, j: usize| {
            m.get_entry(i, j).map_or(0.0, |e| e.into_value())
        };
        self.matrix
            .triplet_iter()
            .all(|(i, j, &v)| (v - entry(&transposed, i, j)).abs() <= tol)
            && transposed
                .triplet_iter()
                .all(|(i, j, &v)| (v - entry(&self.matrix, i, j)).abs() <= tol)
    }

    /// Euclidean norm of `b - A x`.
    pub fn residual_norm(&self, x: &[f64]) -> f64 {
        let mut r = vec![0.0; self.n()];
        residual(&self.matrix, x, &self.rhs, &mut r);
        norm2(&r)
    }
}

/// Assemble the conductance Laplacian of a network.
///
/// # Arguments
///
/// * `topology` - Network connectivity
/// * `conductance` - One conductance per throat, finite and non-negative
///
/// # Errors
///
/// Returns an error if the conductance array has the wrong length or bad
/// values, or if a throat references a pore outside the network.
pub fn assemble<T: Topology + ?Sized>(topology: &T, conductance: &[f64]) -> Result<LinearSystem> {
    let np = topology.n_pores();
    let nt = topology.n_throats();
    let conns = topology.conns();

    if conductance.len() != nt {
        return Err(Error::Assembly(format!(
            "conductance array has length {}, network has {} throats",
            conductance.len(),
            nt
        )));
    }
    if let Some((t, g)) = conductance
        .iter()
        .enumerate()
        .find(|(_, g)| !(g.is_finite() && **g >= 0.0))
    {
        return Err(Error::Assembly(format!(
            "throat {} has invalid conductance {}",
            t, g
        )));
    }
    if let Some((t, conn)) = conns
        .iter()
        .enumerate()
        .find(|(_, c)| c[0] >= np || c[1] >= np)
    {
        return Err(Error::Network(format!(
            "throat {} connects {:?} but network has {} pores",
            t, conn, np
        )));
    }

    // Per-throat stencils evaluated in parallel, collected in throat order.
    let stencils: Vec<Option<[(usize, usize, f64); 4]>> = conns
        .par_iter()
        .zip(conductance.par_iter())
        .map(|(&[i, j], &g)| {
            if i == j || g == 0.0 {
                None
            } else {
                Some([(i, i, g), (j, j, g), (i, j, -g), (j, i, -g)])
            }
        })
        .collect();

    let mut triplet = TripletMatrix::with_capacity(np, np, np + 4 * nt);
    for p in 0..np {
        triplet.add_explicit(p, p, 0.0);
    }
    for (row, col, value) in stencils.into_iter().flatten().flatten() {
        triplet.add(row, col, value);
    }

    let matrix = triplet.to_csr()?;
    log::debug!(
        "assembled {}x{} conductance matrix with {} non-zeros from {} throats",
        np,
        np,
        matrix.nnz(),
        nt
    );

    Ok(LinearSystem {
        matrix,
        rhs: vec![0.0; np],
    })
}
