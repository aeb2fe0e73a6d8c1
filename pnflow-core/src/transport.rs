//! Steady-state linear transport on a pore network.
//!
//! [`Transport`] ties the pieces together:
//!
//! ```text
//! conductance (throat.*) ──► assemble ──► apply BCs ──► dispatch ──► result (pore.*)
//! ```
//!
//! One instance owns the boundary conditions, the solver registry and the
//! result of the last successful run.

use crate::assembly::assemble;
use crate::boundary::{BcValues, BoundaryConditions};
use crate::error::{Error, Result};
use crate::network::Topology;
use crate::properties::PropertyStore;
use crate::solver::{SolveStats, SolverDispatcher, SolverRegistry, SolverSpec};
use crate::types::{Entity, PropKey};
use serde::Deserialize;

/// Settings for one transport run.
///
/// Deserialises from a map such as
/// `{"quantity": "pore.temperature", "conductance": "throat.thermal_conductance", "solver": "cg"}`.
/// Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTransportSettings")]
pub struct TransportSettings {
    /// Pore property the solution is stored under.
    pub quantity: PropKey,
    /// Throat property holding the conductances.
    pub conductance: PropKey,
    pub solver: SolverSpec,
}

impl TransportSettings {
    /// Settings with the default direct solver.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the keys are malformed or name the
    /// wrong entity.
    pub fn new(quantity: &str, conductance: &str) -> Result<Self> {
        let settings = Self {
            quantity: quantity.parse()?,
            conductance: conductance.parse()?,
            solver: SolverSpec::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_solver(mut self, solver: SolverSpec) -> Self {
        self.solver = solver;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.quantity.expect_entity(Entity::Pore)?;
        self.conductance.expect_entity(Entity::Throat)?;
        self.solver.validate()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransportSettings {
    quantity: PropKey,
    conductance: PropKey,
    #[serde(default)]
    solver: SolverSpec,
}

impl TryFrom<RawTransportSettings> for TransportSettings {
    type Error = Error;

    fn try_from(raw: RawTransportSettings) -> Result<Self> {
        let settings = Self {
            quantity: raw.quantity,
            conductance: raw.conductance,
            solver: raw.solver,
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone)]
struct TransportResult {
    quantity: PropKey,
    values: Vec<f64>,
    stats: SolveStats,
}

/// Transport algorithm: boundary conditions, solver registry and the last
/// solved field.
#[derive(Debug, Default)]
pub struct Transport {
    bcs: BoundaryConditions,
    registry: SolverRegistry,
    result: Option<TransportResult>,
}

impl Transport {
    /// Transport with the built-in solver families.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport using a custom registry, e.g. one with an external backend.
    pub fn with_registry(registry: SolverRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    pub fn registry(&self) -> &SolverRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SolverRegistry {
        &mut self.registry
    }

    /// Fix the quantity at `pores`.
    pub fn set_value_bc(&mut self, pores: &[usize], values: impl Into<BcValues>) -> Result<()> {
        self.bcs.set_value(pores, values)
    }

    /// Fix the net flow at `pores`. A positive rate injects into the network.
    pub fn set_rate_bc(&mut self, pores: &[usize], values: impl Into<BcValues>) -> Result<()> {
        self.bcs.set_rate(pores, values)
    }

    pub fn remove_bc(&mut self, pores: &[usize]) {
        self.bcs.remove(pores);
    }

    pub fn clear_bcs(&mut self) {
        self.bcs.clear();
    }

    pub fn boundary_conditions(&self) -> &BoundaryConditions {
        &self.bcs
    }

    /// Assemble, constrain and solve.
    ///
    /// The previous result is discarded first, so a failed run leaves no
    /// result behind.
    ///
    /// # Arguments
    ///
    /// * `settings` - Quantity, conductance key and solver
    /// * `topology` - Network connectivity
    /// * `physics` - Store holding the throat conductance array
    ///
    /// # Errors
    ///
    /// Configuration errors are reported before any numeric work. Systems
    /// with a pore cluster that no conducting path links to a value
    /// condition, isolated pores included, are rejected as
    /// [`Error::SingularSystem`]. Backend failures propagate unchanged.
    pub fn run<T: Topology + ?Sized>(
        &mut self,
        settings: &TransportSettings,
        topology: &T,
        physics: &PropertyStore,
    ) -> Result<()> {
        self.result = None;
        settings.validate()?;

        let mut dispatcher = SolverDispatcher::new(settings.solver.clone());
        dispatcher.validate(&self.registry)?;

        self.bcs.check_bounds(topology.n_pores())?;
        let conductance_key = settings.conductance.to_string();
        let conductance = physics.get_checked(&conductance_key, topology.n_throats())?;
        let system = assemble(topology, conductance)?;

        let n = system.n();
        let value_pores = self.bcs.value_pores();
        if n > 0 && value_pores.is_empty() {
            return Err(Error::SingularSystem(
                "no value boundary condition, the solution is not unique".into(),
            ));
        }
        let floating = system.floating_pores(&value_pores);
        if !floating.is_empty() {
            let isolated = system.isolated_pores();
            let unanchored_isolated = isolated.iter().filter(|p| floating.contains(p)).count();
            return Err(Error::SingularSystem(format!(
                "{} pore(s) are not connected to any value condition through conducting throats \
                 ({} without any conducting throat), first is {}",
                floating.len(),
                unanchored_isolated,
                floating[0]
            )));
        }
        let constrained = self.bcs.apply(&system)?;
        log::debug!(
            "solving for {} on {} pores with {} value and {} rate condition(s)",
            settings.quantity,
            n,
            value_pores.len(),
            self.bcs.rate_pores().len()
        );

        let solution = dispatcher.solve(&constrained)?;
        self.result = Some(TransportResult {
            quantity: settings.quantity.clone(),
            values: solution.x,
            stats: solution.stats,
        });
        Ok(())
    }

    /// Field from the last successful run, looked up by its quantity key.
    pub fn result(&self, key: &str) -> Result<&[f64]> {
        match &self.result {
            Some(result) if result.quantity.to_string() == key => Ok(&result.values),
            Some(result) => Err(Error::NoResult(format!(
                "'{}' was not solved for, last run solved '{}'",
                key, result.quantity
            ))),
            None => Err(Error::NoResult(format!(
                "'{}' is not available, no successful run",
                key
            ))),
        }
    }

    /// Statistics of the last successful run.
    pub fn stats(&self) -> Option<&SolveStats> {
        self.result.as_ref().map(|r| &r.stats)
    }

    /// Net flow leaving `pores` through the throats that cross the set's
    /// boundary, computed from the last solution.
    ///
    /// For a set of value pores this is the flow they inject into the rest
    /// of the network.
    pub fn rate<T: Topology + ?Sized>(
        &self,
        topology: &T,
        conductance: &[f64],
        pores: &[usize],
    ) -> Result<f64> {
        let x = match &self.result {
            Some(result) => &result.values,
            None => return Err(Error::NoResult("no successful run to compute rates from".into())),
        };
        if conductance.len() != topology.n_throats() {
            return Err(Error::Property(format!(
                "conductance array has length {}, network has {} throats",
                conductance.len(),
                topology.n_throats()
            )));
        }
        if x.len() != topology.n_pores() {
            return Err(Error::Network(format!(
                "last result has {} pores, network has {}",
                x.len(),
                topology.n_pores()
            )));
        }
        let np = x.len();
        if let Some((t, conn)) = topology
            .conns()
            .iter()
            .enumerate()
            .find(|(_, c)| c[0] >= np || c[1] >= np)
        {
            return Err(Error::Network(format!(
                "throat {} connects {:?} but network has {} pores",
                t, conn, np
            )));
        }
        let mut inside = vec![false; np];
        for &p in pores {
            let slot = inside.get_mut(p).ok_or_else(|| {
                Error::Configuration(format!("pore {} is outside the network", p))
            })?;
            *slot = true;
        }

        let total = topology
            .conns()
            .iter()
            .zip(conductance)
            .map(|(&[i, j], &g)| match (inside[i], inside[j]) {
                (true, false) => g * (x[i] - x[j]),
                (false, true) => g * (x[j] - x[i]),
                _ => 0.0,
            })
            .sum();
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::solver::{Method, SolverFamily};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn chain(n: usize) -> Network {
        let mut net = Network::new();
        for i in 0..n {
            net.add_pore(Vector3::new(i as f64, 0.0, 0.0));
        }
        for i in 1..n {
            net.add_throat(i - 1, i).unwrap();
        }
        net
    }

    fn physics(g: Vec<f64>) -> PropertyStore {
        let mut store = PropertyStore::new();
        store.set("throat.conductance", g).unwrap();
        store
    }

    fn settings() -> TransportSettings {
        TransportSettings::new("pore.x", "throat.conductance").unwrap()
    }

    #[test]
    fn test_linear_profile_along_chain() {
        let net = chain(5);
        let mut transport = Transport::new();
        transport.set_value_bc(&[0], 1.0).unwrap();
        transport.set_value_bc(&[4], 0.0).unwrap();
        transport.run(&settings(), &net, &physics(vec![1.0; 4])).unwrap();

        let x = transport.result("pore.x").unwrap();
        for (i, xi) in x.iter().enumerate() {
            assert_relative_eq!(*xi, 1.0 - i as f64 / 4.0, epsilon = 1e-12);
        }
        let stats = transport.stats().unwrap();
        assert_eq!(stats.solver, "cholesky");
        assert!(stats.converged);
    }

    #[test]
    fn test_rate_bc_and_outflow() {
        // Inject 2.0 at pore 0, hold pore 2 at zero: x = [2/1 + 2/2, 2/2, 0].
        let net = chain(3);
        let g = vec![1.0, 2.0];
        let mut transport = Transport::new();
        transport.set_rate_bc(&[0], 2.0).unwrap();
        transport.set_value_bc(&[2], 0.0).unwrap();
        transport.run(&settings(), &net, &physics(g.clone())).unwrap();

        let x = transport.result("pore.x").unwrap();
        assert_relative_eq!(x[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], 0.0, epsilon = 1e-12);
        assert_relative_eq!(transport.rate(&net, &g, &[0]).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(transport.rate(&net, &g, &[2]).unwrap(), -2.0, epsilon = 1e-12);
        assert_relative_eq!(transport.rate(&net, &g, &[0, 1, 2]).unwrap(), 0.0);
    }

    #[test]
    fn test_no_result_before_run_and_wrong_key() {
        let net = chain(2);
        let mut transport = Transport::new();
        assert!(matches!(transport.result("pore.x"), Err(Error::NoResult(_))));
        transport.set_value_bc(&[0, 1], 1.0).unwrap();
        transport.run(&settings(), &net, &physics(vec![1.0])).unwrap();
        assert!(matches!(transport.result("pore.y"), Err(Error::NoResult(_))));
    }

    #[test]
    fn test_failed_run_clears_result() {
        let net = chain(4);
        let mut transport = Transport::new();
        transport.set_value_bc(&[0], 1.0).unwrap();
        transport.run(&settings(), &net, &physics(vec![1.0; 3])).unwrap();
        assert!(transport.result("pore.x").is_ok());

        let failing = settings().with_solver(SolverSpec::new(Method::Cg).with_max_iterations(1));
        transport.set_value_bc(&[3], 0.0).unwrap();
        let err = transport
            .run(&failing, &net, &physics(vec![1.0, 3.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, Error::Convergence { .. }));
        assert!(transport.result("pore.x").is_err());
        assert!(transport.stats().is_none());
    }

    #[test]
    fn test_singular_configurations() {
        let mut net = chain(3);
        net.add_pore(Vector3::new(9.0, 0.0, 0.0));
        let mut transport = Transport::new();
        let store = physics(vec![1.0, 1.0]);

        let err = transport.run(&settings(), &net, &store).unwrap_err();
        assert!(matches!(err, Error::SingularSystem(_)));

        transport.set_value_bc(&[0], 1.0).unwrap();
        let err = transport.run(&settings(), &net, &store).unwrap_err();
        assert!(matches!(err, Error::SingularSystem(_)));

        // A value condition on the isolated pore makes the system well posed.
        transport.set_value_bc(&[3], 0.5).unwrap();
        transport.run(&settings(), &net, &store).unwrap();
        assert_relative_eq!(transport.result("pore.x").unwrap()[3], 0.5);
    }

    #[test]
    fn test_configuration_errors_before_numeric_work() {
        let net = chain(2);
        let mut transport = Transport::new();
        transport.set_value_bc(&[0], 1.0).unwrap();

        let external = settings().with_solver(SolverSpec::for_family(SolverFamily::External));
        let err = transport.run(&external, &net, &physics(vec![1.0])).unwrap_err();
        assert!(matches!(err, Error::DependencyUnavailable(_)));

        let err = transport.run(&settings(), &net, &PropertyStore::new()).unwrap_err();
        assert!(matches!(err, Error::MissingProperty(_)));

        transport.set_value_bc(&[7], 1.0).unwrap();
        let err = transport.run(&settings(), &net, &physics(vec![1.0])).unwrap_err();
        assert!(err.is_configuration());
        // Reported before the conductance is even looked up.
        let err = transport.run(&settings(), &net, &PropertyStore::new()).unwrap_err();
        assert!(err.is_configuration(), "{:?}", err);
    }

    #[test]
    fn test_floating_cluster_is_singular() {
        // Pores 0-2 and 3-5 form two chains joined by a non-conducting throat.
        let net = chain(6);
        let store = physics(vec![1.0, 1.0, 0.0, 1.0, 1.0]);
        for method in [Method::Cholesky, Method::Lu, Method::Cg, Method::Amg] {
            let mut transport = Transport::new();
            transport.set_value_bc(&[0], 1.0).unwrap();
            transport.set_value_bc(&[2], 0.0).unwrap();
            let solver = settings().with_solver(SolverSpec::new(method));
            let err = transport.run(&solver, &net, &store).unwrap_err();
            assert!(matches!(err, Error::SingularSystem(_)), "{}: {:?}", method, err);
            assert!(transport.result("pore.x").is_err());

            // Anchoring the second chain makes it well posed.
            transport.set_rate_bc(&[3], 1.0).unwrap();
            transport.set_value_bc(&[5], 0.0).unwrap();
            transport.run(&solver, &net, &store).unwrap();
            let x = transport.result("pore.x").unwrap();
            assert_relative_eq!(x[1], 0.5, epsilon = 1e-8);
            assert_relative_eq!(x[3], 2.0, epsilon = 1e-8);
        }
    }

    /// Topology whose last throat points past the pore count.
    struct Dangling {
        conns: Vec<[usize; 2]>,
    }

    impl Topology for Dangling {
        fn n_pores(&self) -> usize {
            3
        }

        fn conns(&self) -> &[[usize; 2]] {
            &self.conns
        }
    }

    #[test]
    fn test_rate_rejects_dangling_throat() {
        let net = chain(3);
        let mut transport = Transport::new();
        transport.set_value_bc(&[0], 1.0).unwrap();
        transport.set_value_bc(&[2], 0.0).unwrap();
        transport.run(&settings(), &net, &physics(vec![1.0, 1.0])).unwrap();

        let dangling = Dangling {
            conns: vec![[0, 1], [1, 9]],
        };
        let err = transport.rate(&dangling, &[1.0, 1.0], &[0]).unwrap_err();
        assert!(matches!(err, Error::Network(_)), "{:?}", err);
    }

    #[test]
    fn test_settings_entities_checked() {
        assert!(TransportSettings::new("throat.x", "throat.conductance").is_err());
        assert!(TransportSettings::new("pore.x", "pore.conductance").is_err());
    }

    #[test]
    fn test_settings_deserialize() {
        let settings: TransportSettings = serde_json::from_str(
            r#"{"quantity": "pore.pressure", "conductance": "throat.hydraulic_conductance",
                "solver": {"solver": "bicgstab", "maxiter": 200}}"#,
        )
        .unwrap();
        assert_eq!(settings.quantity.name(), "pressure");
        assert_eq!(settings.solver.method(), Method::Bicgstab);
        assert_eq!(settings.solver.max_iterations(), 200);

        let defaulted: TransportSettings =
            serde_json::from_str(r#"{"quantity": "pore.x", "conductance": "throat.g"}"#).unwrap();
        assert_eq!(defaulted.solver, SolverSpec::default());

        assert!(serde_json::from_str::<TransportSettings>(
            r#"{"quantity": "pore.x", "conductance": "throat.g", "typo": 1}"#
        )
        .is_err());
        assert!(serde_json::from_str::<TransportSettings>(
            r#"{"quantity": "throat.x", "conductance": "throat.g"}"#
        )
        .is_err());
    }
}
