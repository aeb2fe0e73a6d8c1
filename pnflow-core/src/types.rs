//! Core data types for pore-network operations.
//!
//! This module defines fundamental types used throughout the crate:
//! - Geometric primitives (pore coordinates)
//! - Throat connectivity
//! - Property keys of the form `<entity>.<name>` (e.g. `pore.x`)

use crate::error::{Error, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A point in 3D space.
pub type Point3 = Vector3<f64>;

/// Pore indices at the two ends of a throat.
pub type Conn = [usize; 2];

/// The kind of network entity a property belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    /// Network node.
    Pore,
    /// Network edge.
    Throat,
}

impl Entity {
    /// Key prefix for this entity.
    pub fn prefix(self) -> &'static str {
        match self {
            Entity::Pore => "pore",
            Entity::Throat => "throat",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A validated property key: entity plus a (possibly dotted) quantity name.
///
/// `throat.conduit_lengths.pore1` parses as entity [`Entity::Throat`] and
/// name `conduit_lengths.pore1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropKey {
    entity: Entity,
    name: String,
}

impl PropKey {
    /// Build a key from its parts.
    pub fn new(entity: Entity, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.split('.').any(str::is_empty) {
            return Err(Error::Configuration(format!(
                "invalid property name '{}'",
                name
            )));
        }
        Ok(Self { entity, name })
    }

    /// Shorthand for a pore key.
    pub fn pore(name: impl Into<String>) -> Result<Self> {
        Self::new(Entity::Pore, name)
    }

    /// Shorthand for a throat key.
    pub fn throat(name: impl Into<String>) -> Result<Self> {
        Self::new(Entity::Throat, name)
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fail unless this key refers to the given entity.
    pub fn expect_entity(&self, entity: Entity) -> Result<()> {
        if self.entity != entity {
            return Err(Error::Configuration(format!(
                "'{}' must be a {} property",
                self, entity
            )));
        }
        Ok(())
    }
}

impl FromStr for PropKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (prefix, name) = s.split_once('.').ok_or_else(|| {
            Error::Configuration(format!(
                "property key '{}' must look like 'pore.<name>' or 'throat.<name>'",
                s
            ))
        })?;
        let entity = match prefix {
            "pore" => Entity::Pore,
            "throat" => Entity::Throat,
            other => {
                return Err(Error::Configuration(format!(
                    "unknown entity '{}' in property key '{}'",
                    other, s
                )))
            }
        };
        Self::new(entity, name)
    }
}

impl TryFrom<String> for PropKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PropKey> for String {
    fn from(key: PropKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.name)
    }
}
