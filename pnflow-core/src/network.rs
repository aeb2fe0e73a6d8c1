//! Pore network data structure.
//!
//! Stores pore coordinates, throat connectivity, pore labels and the geometric
//! property arrays of the network. The transport engine only sees a network
//! through the read-only [`Topology`] trait.

use crate::error::{Error, Result};
use crate::properties::PropertyStore;
use crate::types::{Conn, Point3};
use std::collections::BTreeMap;

/// Read-only view of network connectivity consumed by assembly.
pub trait Topology {
    /// Number of pores (`Np`).
    fn n_pores(&self) -> usize;

    /// Number of throats (`Nt`).
    fn n_throats(&self) -> usize {
        self.conns().len()
    }

    /// Pore index pairs, one per throat.
    fn conns(&self) -> &[Conn];
}

/// Pore network.
#[derive(Debug, Clone, Default)]
pub struct Network {
    /// Pore centre coordinates.
    coords: Vec<Point3>,
    /// Throat connectivity.
    conns: Vec<Conn>,
    /// Named pore sets, sorted and deduplicated.
    labels: BTreeMap<String, Vec<usize>>,
    /// Geometric properties (areas, lengths, diameters).
    geometry: PropertyStore,
}

impl Network {
    /// Create a new empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network with pre-allocated capacity.
    pub fn with_capacity(n_pores: usize, n_throats: usize) -> Self {
        Self {
            coords: Vec::with_capacity(n_pores),
            conns: Vec::with_capacity(n_throats),
            ..Self::default()
        }
    }

    /// Regular cubic lattice with `shape = [nx, ny, nz]` pores.
    ///
    /// Pore `(i, j, k)` has index `i * ny * nz + j * nz + k` and sits at
    /// `((i, j, k) + 0.5) * spacing`. Each pore connects to its six face
    /// neighbours. Face labels follow the axes: `front`/`back` on x,
    /// `left`/`right` on y, `bottom`/`top` on z; `surface` is their union
    /// and `internal` the rest.
    pub fn cubic(shape: [usize; 3], spacing: f64) -> Result<Self> {
        let [nx, ny, nz] = shape;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(Error::Network(format!(
                "lattice shape {:?} must be non-zero in every direction",
                shape
            )));
        }
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(Error::Network(format!(
                "lattice spacing must be positive, got {}",
                spacing
            )));
        }

        let index = |i: usize, j: usize, k: usize| i * ny * nz + j * nz + k;
        let n_pores = nx * ny * nz;
        let n_throats = (nx - 1) * ny * nz + nx * (ny - 1) * nz + nx * ny * (nz - 1);
        let mut net = Self::with_capacity(n_pores, n_throats);

        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    net.coords.push(Point3::new(
                        (i as f64 + 0.5) * spacing,
                        (j as f64 + 0.5) * spacing,
                        (k as f64 + 0.5) * spacing,
                    ));
                }
            }
        }

        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    let p = index(i, j, k);
                    if i + 1 < nx {
                        net.conns.push([p, index(i + 1, j, k)]);
                    }
                    if j + 1 < ny {
                        net.conns.push([p, index(i, j + 1, k)]);
                    }
                    if k + 1 < nz {
                        net.conns.push([p, index(i, j, k + 1)]);
                    }
                }
            }
        }

        let mut faces: [(&str, Vec<usize>); 6] = [
            ("front", Vec::new()),
            ("back", Vec::new()),
            ("left", Vec::new()),
            ("right", Vec::new()),
            ("bottom", Vec::new()),
            ("top", Vec::new()),
        ];
        let mut internal = Vec::new();
        let mut surface = Vec::new();
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    let p = index(i, j, k);
                    let hits = [i == 0, i + 1 == nx, j == 0, j + 1 == ny, k == 0, k + 1 == nz];
                    for (face, hit) in faces.iter_mut().zip(hits) {
                        if hit {
                            face.1.push(p);
                        }
                    }
                    if hits.iter().any(|&h| h) {
                        surface.push(p);
                    } else {
                        internal.push(p);
                    }
                }
            }
        }
        for (name, pores) in faces {
            net.labels.insert(name.to_string(), pores);
        }
        net.labels.insert("surface".to_string(), surface);
        net.labels.insert("internal".to_string(), internal);

        Ok(net)
    }

    /// Add a pore to the network, returning its index.
    pub fn add_pore(&mut self, point: Point3) -> usize {
        let idx = self.coords.len();
        self.coords.push(point);
        idx
    }

    /// Add a throat between two existing pores.
    pub fn add_throat(&mut self, p1: usize, p2: usize) -> Result<usize> {
        for &p in &[p1, p2] {
            if p >= self.coords.len() {
                return Err(Error::Network(format!(
                    "Pore index {} out of bounds (network has {} pores)",
                    p,
                    self.coords.len()
                )));
            }
        }
        if p1 == p2 {
            return Err(Error::Network(format!(
                "throat would connect pore {} to itself",
                p1
            )));
        }

        let idx = self.conns.len();
        self.conns.push([p1, p2]);
        Ok(idx)
    }

    /// Attach a label to a set of pores, merging with any existing set.
    pub fn set_label(&mut self, label: &str, pores: &[usize]) -> Result<()> {
        if let Some(&bad) = pores.iter().find(|&&p| p >= self.coords.len()) {
            return Err(Error::Network(format!(
                "cannot label pore {}: network has {} pores",
                bad,
                self.coords.len()
            )));
        }
        let entry = self.labels.entry(label.to_string()).or_default();
        entry.extend_from_slice(pores);
        entry.sort_unstable();
        entry.dedup();
        Ok(())
    }

    /// Pores carrying `label`, in ascending order.
    pub fn pores(&self, label: &str) -> Result<&[usize]> {
        self.labels
            .get(label)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Network(format!("no pores labelled '{}'", label)))
    }

    /// Get pore coordinates.
    pub fn coords(&self) -> &[Point3] {
        &self.coords
    }

    /// Geometric property arrays.
    pub fn geometry(&self) -> &PropertyStore {
        &self.geometry
    }

    /// Mutable access to the geometric property arrays.
    pub fn geometry_mut(&mut self) -> &mut PropertyStore {
        &mut self.geometry
    }
}

impl Topology for Network {
    fn n_pores(&self) -> usize {
        self.coords.len()
    }

    fn conns(&self) -> &[Conn] {
        &self.conns
    }
}
