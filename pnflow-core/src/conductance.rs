//! Throat conductance models.
//!
//! Every conductance in the network (thermal, diffusive, electrical,
//! hydraulic) is computed the same way: a throat and the two pore halves
//! it joins form a conduit of three segments in series,
//!
//! ```text
//! 1/g = L1/g1' + Lt/gt' + L2/g2'      with  g' = c · k^p · A^q
//! ```
//!
//! where `L` is the segment length, `A` its cross-sectional area and `k` the
//! transport property of the phase. Only the property, the coefficient `c`
//! and the exponents `p`, `q` change between physics; see [`SegmentLaw`].
//!
//! A zero-length segment adds no resistance. A segment with positive length
//! and zero `c · k^p · A^q` blocks the conduit entirely (conductance 0).

use crate::error::{Error, Result};
use crate::network::{Network, Topology};
use crate::properties::{interpolate_to_throats, PropertyStore};
use rayon::prelude::*;
use std::f64::consts::PI;

/// Per-segment transport law `g' = c · k^p · A^q` (conductance times length).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentLaw {
    /// Leading coefficient `c`.
    pub coefficient: f64,
    /// Exponent applied to the transport property.
    pub property_exponent: f64,
    /// Exponent applied to the cross-sectional area.
    pub area_exponent: f64,
}

impl SegmentLaw {
    /// Fourier/Fick/Ohm conduction: `g' = k · A`.
    pub fn diffusive() -> Self {
        Self {
            coefficient: 1.0,
            property_exponent: 1.0,
            area_exponent: 1.0,
        }
    }

    /// Hagen–Poiseuille flow in a cylinder: `g' = A² / (8π μ)`.
    pub fn hydraulic() -> Self {
        Self {
            coefficient: 1.0 / (8.0 * PI),
            property_exponent: -1.0,
            area_exponent: 2.0,
        }
    }

    /// Resistance of one segment.
    ///
    /// Returns `0.0` for a zero-length segment and `f64::INFINITY` when the
    /// segment cannot conduct.
    pub fn resistance(&self, property: f64, area: f64, length: f64) -> f64 {
        if length == 0.0 {
            return 0.0;
        }
        let g = self.coefficient
            * property.powf(self.property_exponent)
            * area.powf(self.area_exponent);
        if g == 0.0 {
            f64::INFINITY
        } else {
            length / g
        }
    }
}

/// Combine segment resistances in series into a single conductance.
///
/// `series_resistors(&[0.0, 0.0, 0.0])` is infinite; callers decide whether
/// that is acceptable.
pub fn series_resistors(resistances: &[f64]) -> f64 {
    1.0 / resistances.iter().sum::<f64>()
}

/// Conduit geometry of one throat: lengths and areas of its three segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conduit {
    /// Lengths `[pore1, throat, pore2]`.
    pub lengths: [f64; 3],
    /// Cross-sectional areas `[pore1, throat, pore2]`.
    pub areas: [f64; 3],
}

impl Conduit {
    /// Effective conductance for the given per-segment properties.
    pub fn conductance(&self, law: &SegmentLaw, properties: [f64; 3]) -> f64 {
        let resistances = [
            law.resistance(properties[0], self.areas[0], self.lengths[0]),
            law.resistance(properties[1], self.areas[1], self.lengths[1]),
            law.resistance(properties[2], self.areas[2], self.lengths[2]),
        ];
        series_resistors(&resistances)
    }
}

/// Series-resistors conductance model reading named property arrays.
///
/// Geometry (`pore_area`, `throat_area`, conduit lengths) is read from the
/// network's geometry store. The transport property is read from the phase
/// store: `pore.<name>` for the pore halves and `throat.<name>` for the
/// throat segment, falling back to the mean of the two pore values when no
/// throat array exists.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesResistors {
    law: SegmentLaw,
    property: String,
    pore_area: String,
    throat_area: String,
    conduit_lengths: String,
}

impl SeriesResistors {
    /// Model with a custom law and property name (without entity prefix).
    pub fn new(law: SegmentLaw, property: impl Into<String>) -> Self {
        Self {
            law,
            property: property.into(),
            pore_area: "pore.area".to_string(),
            throat_area: "throat.area".to_string(),
            conduit_lengths: "throat.conduit_lengths".to_string(),
        }
    }

    /// Thermal conductance from `thermal_conductivity`.
    pub fn thermal() -> Self {
        Self::new(SegmentLaw::diffusive(), "thermal_conductivity")
    }

    /// Diffusive conductance from `diffusivity`.
    pub fn diffusive() -> Self {
        Self::new(SegmentLaw::diffusive(), "diffusivity")
    }

    /// Electrical conductance from `electrical_conductivity`.
    pub fn electrical() -> Self {
        Self::new(SegmentLaw::diffusive(), "electrical_conductivity")
    }

    /// Hydraulic conductance from `viscosity`.
    pub fn hydraulic() -> Self {
        Self::new(SegmentLaw::hydraulic(), "viscosity")
    }

    /// Read a different transport property.
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    /// Read areas from different keys.
    pub fn with_areas(mut self, pore_area: impl Into<String>, throat_area: impl Into<String>) -> Self {
        self.pore_area = pore_area.into();
        self.throat_area = throat_area.into();
        self
    }

    /// Read conduit lengths from `<prefix>.pore1`, `<prefix>.throat`, `<prefix>.pore2`.
    pub fn with_conduit_lengths(mut self, prefix: impl Into<String>) -> Self {
        self.conduit_lengths = prefix.into();
        self
    }

    pub fn law(&self) -> &SegmentLaw {
        &self.law
    }

    /// Evaluate the conductance of every throat.
    ///
    /// # Errors
    ///
    /// Returns an error if a required array is missing, has the wrong length,
    /// or contains negative lengths or areas.
    pub fn compute(&self, network: &Network, phase: &PropertyStore) -> Result<Vec<f64>> {
        let np = network.n_pores();
        let nt = network.n_throats();
        let conns = network.conns();
        let geometry = network.geometry();

        let pore_area = geometry.get_checked(&self.pore_area, np)?;
        let throat_area = geometry.get_checked(&self.throat_area, nt)?;
        let l1 = geometry.get_checked(&format!("{}.pore1", self.conduit_lengths), nt)?;
        let lt = geometry.get_checked(&format!("{}.throat", self.conduit_lengths), nt)?;
        let l2 = geometry.get_checked(&format!("{}.pore2", self.conduit_lengths), nt)?;
        for (name, values) in [
            (&self.pore_area, pore_area),
            (&self.throat_area, throat_area),
            (&self.conduit_lengths, l1),
            (&self.conduit_lengths, lt),
            (&self.conduit_lengths, l2),
        ] {
            if values.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
                return Err(Error::Property(format!(
                    "'{}' must contain finite, non-negative values",
                    name
                )));
            }
        }

        let pore_key = format!("pore.{}", self.property);
        let throat_key = format!("throat.{}", self.property);
        let k_pore = phase.get_checked(&pore_key, np)?;
        let interpolated;
        let k_throat = if phase.contains(&throat_key) {
            phase.get_checked(&throat_key, nt)?
        } else {
            interpolated = interpolate_to_throats(k_pore, conns)?;
            interpolated.as_slice()
        };

        let g = conns
            .par_iter()
            .enumerate()
            .map(|(t, &[p1, p2])| {
                let conduit = Conduit {
                    lengths: [l1[t], lt[t], l2[t]],
                    areas: [pore_area[p1], throat_area[t], pore_area[p2]],
                };
                conduit.conductance(&self.law, [k_pore[p1], k_throat[t], k_pore[p2]])
            })
            .collect();

        log::debug!(
            "evaluated series-resistors conductance from '{}' on {} throats",
            self.property,
            nt
        );
        Ok(g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_conduit(lengths: [f64; 3]) -> Conduit {
        Conduit {
            lengths,
            areas: [1.0; 3],
        }
    }

    #[test]
    fn test_unit_resistance_sum() {
        // 0.25 + 0.6 + 0.15 = 1
        let g = unit_conduit([0.25, 0.6, 0.15]).conductance(&SegmentLaw::diffusive(), [1.0; 3]);
        assert_relative_eq!(g, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_length_throat_is_short_circuit() {
        let g = unit_conduit([0.5, 0.0, 0.5]).conductance(&SegmentLaw::diffusive(), [1.0; 3]);
        assert_relative_eq!(g, 1.0, epsilon = 1e-12);
        assert!(g.is_finite());
    }

    #[test]
    fn test_dominant_segment_limit() {
        let law = SegmentLaw::diffusive();
        let k = [2.0, 3.0, 4.0];
        let conduit = Conduit {
            lengths: [1e-12, 2.0, 1e-12],
            areas: [1.0, 0.5, 1.0],
        };
        // Throat alone: k A / L = 3 * 0.5 / 2
        assert_relative_eq!(conduit.conductance(&law, k), 0.75, max_relative = 1e-9);
    }

    #[test]
    fn test_blocked_segment() {
        let conduit = Conduit {
            lengths: [0.5, 1.0, 0.5],
            areas: [1.0, 0.0, 1.0],
        };
        assert_eq!(conduit.conductance(&SegmentLaw::diffusive(), [1.0; 3]), 0.0);
    }

    #[test]
    fn test_all_zero_lengths_infinite() {
        let g = unit_conduit([0.0; 3]).conductance(&SegmentLaw::diffusive(), [1.0; 3]);
        assert!(g.is_infinite());
    }

    #[test]
    fn test_hydraulic_poiseuille() {
        // Single cylinder of radius r, length L: g = π r^4 / (8 μ L)
        let r: f64 = 0.1;
        let mu = 1e-3;
        let len = 2.0;
        let area = PI * r * r;
        let conduit = Conduit {
            lengths: [0.0, len, 0.0],
            areas: [area; 3],
        };
        let g = conduit.conductance(&SegmentLaw::hydraulic(), [mu; 3]);
        assert_relative_eq!(g, PI * r.powi(4) / (8.0 * mu * len), max_relative = 1e-12);
    }

    fn two_pore_network() -> Network {
        let mut net = Network::new();
        net.add_pore(nalgebra::Vector3::new(0.0, 0.0, 0.0));
        net.add_pore(nalgebra::Vector3::new(1.0, 0.0, 0.0));
        net.add_throat(0, 1).unwrap();
        let geo = net.geometry_mut();
        geo.set("pore.area", vec![2.0, 2.0]).unwrap();
        geo.set("throat.area", vec![1.0]).unwrap();
        geo.set("throat.conduit_lengths.pore1", vec![0.5]).unwrap();
        geo.set("throat.conduit_lengths.throat", vec![1.0]).unwrap();
        geo.set("throat.conduit_lengths.pore2", vec![0.5]).unwrap();
        net
    }

    #[test]
    fn test_model_interpolates_throat_property() {
        let net = two_pore_network();
        let mut phase = PropertyStore::new();
        phase.set("pore.thermal_conductivity", vec![1.0, 3.0]).unwrap();

        let g = SeriesResistors::thermal().compute(&net, &phase).unwrap();
        // R = 0.5/(1*2) + 1/(2*1) + 0.5/(3*2)
        let expected = 1.0 / (0.25 + 0.5 + 0.5 / 6.0);
        assert_relative_eq!(g[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_model_prefers_throat_property() {
        let net = two_pore_network();
        let mut phase = PropertyStore::new();
        phase.set("pore.diffusivity", vec![1.0, 1.0]).unwrap();
        phase.set("throat.diffusivity", vec![4.0]).unwrap();

        let g = SeriesResistors::diffusive().compute(&net, &phase).unwrap();
        let expected = 1.0 / (0.25 + 0.25 + 0.25);
        assert_relative_eq!(g[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_model_custom_property() {
        let net = two_pore_network();
        let mut phase = PropertyStore::new();
        phase.set("pore.k_eff", vec![1.0, 1.0]).unwrap();
        let model = SeriesResistors::thermal().with_property("k_eff");
        assert!(model.compute(&net, &phase).is_ok());
    }

    #[test]
    fn test_model_missing_property() {
        let net = two_pore_network();
        let phase = PropertyStore::new();
        let err = SeriesResistors::electrical().compute(&net, &phase).unwrap_err();
        assert!(matches!(err, Error::MissingProperty(_)));
    }

    #[test]
    fn test_model_rejects_negative_length() {
        let mut net = two_pore_network();
        net.geometry_mut()
            .set("throat.conduit_lengths.throat", vec![-1.0])
            .unwrap();
        let mut phase = PropertyStore::new();
        phase.set("pore.thermal_conductivity", vec![1.0, 1.0]).unwrap();
        assert!(matches!(
            SeriesResistors::thermal().compute(&net, &phase),
            Err(Error::Property(_))
        ));
    }
}
