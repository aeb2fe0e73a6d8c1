//! Named property arrays for pores and throats.
//!
//! A [`PropertyStore`] is the read-only data source the physics layer works
//! from: geometry (areas, conduit lengths) lives on the network's store, phase
//! properties (conductivity, viscosity) and derived conductances live on a
//! separate store owned by the caller.

use crate::error::{Error, Result};
use crate::types::{Conn, PropKey};
use std::collections::BTreeMap;

/// Dense `f64` arrays keyed by `<entity>.<name>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyStore {
    arrays: BTreeMap<PropKey, Vec<f64>>,
}

impl PropertyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an array.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed.
    pub fn set(&mut self, key: &str, values: Vec<f64>) -> Result<()> {
        let key: PropKey = key.parse()?;
        self.arrays.insert(key, values);
        Ok(())
    }

    /// Insert an array filled with a single value.
    pub fn set_uniform(&mut self, key: &str, len: usize, value: f64) -> Result<()> {
        self.set(key, vec![value; len])
    }

    /// Look up an array.
    pub fn get(&self, key: &str) -> Result<&[f64]> {
        let parsed: PropKey = key.parse()?;
        self.arrays
            .get(&parsed)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::MissingProperty(key.to_string()))
    }

    /// Look up an array and check its length.
    pub fn get_checked(&self, key: &str, expected_len: usize) -> Result<&[f64]> {
        let values = self.get(key)?;
        if values.len() != expected_len {
            return Err(Error::Property(format!(
                "'{}' has length {}, expected {}",
                key,
                values.len(),
                expected_len
            )));
        }
        Ok(values)
    }

    /// Whether the store holds an array under `key`.
    pub fn contains(&self, key: &str) -> bool {
        key.parse::<PropKey>()
            .map(|k| self.arrays.contains_key(&k))
            .unwrap_or(false)
    }

    /// Remove an array, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Vec<f64>> {
        let parsed: PropKey = key.parse().ok()?;
        self.arrays.remove(&parsed)
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &PropKey> {
        self.arrays.keys()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

/// Map pore values onto throats as the arithmetic mean of the two end pores.
pub fn interpolate_to_throats(pore_values: &[f64], conns: &[Conn]) -> Result<Vec<f64>> {
    conns
        .iter()
        .enumerate()
        .map(|(t, &[p1, p2])| match (pore_values.get(p1), pore_values.get(p2)) {
            (Some(a), Some(b)) => Ok(0.5 * (a + b)),
            _ => Err(Error::Network(format!(
                "throat {} references pore outside 0..{}",
                t,
                pore_values.len()
            ))),
        })
        .collect()
}
