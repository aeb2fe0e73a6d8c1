//! Solver families on a 10x10x10 lattice with random conductances.

use approx::assert_relative_eq;
use pnflow_core::solver::{DirectBackend, KrylovBackend};
use pnflow_core::{
    Backend, Error, Method, Network, PreconditionerKind, PropertyStore, Result, Solver,
    SolverFamily, SolverRegistry, SolverSpec, Topology, Transport, TransportSettings,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

const CONDUCTANCE: &str = "throat.conductance";
const QUANTITY: &str = "pore.x";

/// Lattice with uniform random conductances in [0, 1).
fn lattice() -> (Network, PropertyStore) {
    let net = Network::cubic([10, 10, 10], 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let g: Vec<f64> = (0..net.n_throats()).map(|_| rng.gen::<f64>()).collect();
    let mut physics = PropertyStore::new();
    physics.set(CONDUCTANCE, g).unwrap();
    (net, physics)
}

fn transport(net: &Network, registry: SolverRegistry) -> Transport {
    let mut transport = Transport::with_registry(registry);
    transport.set_value_bc(net.pores("left").unwrap(), 1.0).unwrap();
    transport.set_value_bc(net.pores("bottom").unwrap(), 0.0).unwrap();
    transport
}

fn settings(solver: SolverSpec) -> TransportSettings {
    TransportSettings::new(QUANTITY, CONDUCTANCE)
        .unwrap()
        .with_solver(solver)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Field from the direct Cholesky solver.
fn reference(net: &Network, physics: &PropertyStore) -> Vec<f64> {
    let mut t = transport(net, SolverRegistry::default());
    t.run(&settings(SolverSpec::default()), net, physics).unwrap();
    t.result(QUANTITY).unwrap().to_vec()
}

/// External library stand-in that serves methods with the built-in code.
struct LoopbackExternal;

impl Backend for LoopbackExternal {
    fn family(&self) -> SolverFamily {
        SolverFamily::External
    }

    fn name(&self) -> &str {
        "loopback"
    }

    fn configure(&self, spec: &SolverSpec) -> Result<Box<dyn Solver>> {
        let native = spec.clone().with_family(spec.method().native_family());
        match native.family() {
            SolverFamily::Direct => DirectBackend.configure(&native),
            _ => KrylovBackend.configure(&native),
        }
    }
}

#[test_log::test]
fn test_reference_field_is_physical() {
    let (net, physics) = lattice();
    let x = reference(&net, &physics);

    assert_eq!(x.len(), 1000);
    let m = mean(&x);
    assert!(m > 0.0 && m < 1.0, "mean {}", m);
    // Maximum principle: no value outside the boundary range.
    assert!(x.iter().all(|&v| (-1e-10..=1.0 + 1e-10).contains(&v)));

    // The left/bottom edge is claimed by the later bottom condition.
    for &p in net.pores("bottom").unwrap() {
        assert_eq!(x[p], 0.0);
    }
    let bottom = net.pores("bottom").unwrap();
    for &p in net.pores("left").unwrap().iter().filter(|p| !bottom.contains(*p)) {
        assert_eq!(x[p], 1.0);
    }
}

#[test_log::test]
fn test_every_solver_reaches_the_same_field() {
    let (net, physics) = lattice();
    let expected = reference(&net, &physics);
    let expected_mean = mean(&expected);

    let specs = [
        SolverSpec::new(Method::Lu),
        SolverSpec::new(Method::Cg),
        SolverSpec::new(Method::Bicg),
        SolverSpec::new(Method::Bicgstab),
        SolverSpec::new(Method::Cgs),
        SolverSpec::new(Method::Gmres),
        SolverSpec::new(Method::Minres),
        SolverSpec::new(Method::Qmr),
        SolverSpec::new(Method::Gcrotmk),
        SolverSpec::new(Method::Lgmres),
        SolverSpec::new(Method::Amg),
        SolverSpec::new(Method::Cg).with_preconditioner(PreconditionerKind::Amg),
        SolverSpec::new(Method::Bicgstab).with_preconditioner(PreconditionerKind::None),
    ];

    for spec in specs {
        let mut t = transport(&net, SolverRegistry::default());
        t.run(&settings(spec.clone()), &net, &physics)
            .unwrap_or_else(|e| panic!("{} failed: {}", spec, e));
        let x = t.result(QUANTITY).unwrap();

        assert_relative_eq!(mean(x), expected_mean, max_relative = 1e-6);
        for (a, b) in x.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6, "{}: {} vs {}", spec, a, b);
        }
        let stats = t.stats().unwrap();
        assert!(stats.converged);
        assert_eq!(stats.iterations.is_some(), !spec.method().is_direct());
    }
}

#[test_log::test]
fn test_single_iteration_does_not_converge() {
    let (net, physics) = lattice();
    let mut methods = Method::KRYLOV.to_vec();
    methods.push(Method::Amg);

    for method in methods {
        let mut t = transport(&net, SolverRegistry::default());
        let capped = SolverSpec::new(method).with_max_iterations(1);
        let err = t.run(&settings(capped), &net, &physics).unwrap_err();
        assert!(
            matches!(err, Error::Convergence { .. }),
            "{} returned {:?}",
            method,
            err
        );
        assert!(t.result(QUANTITY).is_err());

        // Restoring the default cap restores convergence.
        t.run(&settings(SolverSpec::new(method)), &net, &physics)
            .unwrap();
        assert!(t.result(QUANTITY).is_ok());
    }
}

#[test_log::test]
fn test_external_family_requires_registration() {
    let (net, physics) = lattice();

    let mut t = transport(&net, SolverRegistry::default());
    let err = t
        .run(&settings("external".parse().unwrap()), &net, &physics)
        .unwrap_err();
    assert!(matches!(err, Error::DependencyUnavailable(_)));

    let expected_mean = mean(&reference(&net, &physics));
    for method in [Method::Cholesky, Method::Cg, Method::Gmres] {
        let registry = SolverRegistry::default().with_backend(LoopbackExternal);
        let mut t = transport(&net, registry);
        let spec = SolverSpec::new(method).with_family(SolverFamily::External);
        t.run(&settings(spec), &net, &physics).unwrap();
        assert_relative_eq!(
            mean(t.result(QUANTITY).unwrap()),
            expected_mean,
            max_relative = 1e-6
        );
    }
}

#[test_log::test]
fn test_settings_from_json() {
    let (net, physics) = lattice();
    let expected_mean = mean(&reference(&net, &physics));

    for solver in [
        json!("minres"),
        json!("lgmres"),
        json!({"solver": "gcrotmk", "preconditioner": "jacobi"}),
        json!("multigrid"),
        json!({"family": "krylov", "solver": "gmres", "maxiter": 5000}),
        json!({"solver": "cg", "tolerance": 1e-12, "preconditioner": "amg"}),
    ] {
        let settings: TransportSettings = serde_json::from_value(json!({
            "quantity": QUANTITY,
            "conductance": CONDUCTANCE,
            "solver": solver,
        }))
        .unwrap();
        let mut t = transport(&net, SolverRegistry::default());
        t.run(&settings, &net, &physics).unwrap();
        assert_relative_eq!(
            mean(t.result(QUANTITY).unwrap()),
            expected_mean,
            max_relative = 1e-6
        );
    }

    for bad in [
        json!({"quantity": QUANTITY, "conductance": CONDUCTANCE, "solver": "superlu"}),
        json!({"quantity": QUANTITY, "conductance": CONDUCTANCE, "solver": {"family": "direct", "solver": "cg"}}),
        json!({"quantity": QUANTITY, "conductance": CONDUCTANCE, "solver": {"solver": "cg", "tolerance": -1.0}}),
        json!({"quantity": QUANTITY, "conductance": CONDUCTANCE, "solver": {"solver": "cholesky", "preconditioner": "jacobi"}}),
    ] {
        assert!(serde_json::from_value::<TransportSettings>(bad).is_err());
    }
}

#[test_log::test]
fn test_conflicting_condition_leaves_registry_untouched() {
    let (net, _) = lattice();
    let mut t = transport(&net, SolverRegistry::default());
    let before = t.boundary_conditions().clone();

    let left = net.pores("left").unwrap();
    let free = net.pores("internal").unwrap()[0];
    let err = t.set_rate_bc(&[free, left[0]], 1.0).unwrap_err();

    assert!(err.is_configuration());
    assert!(matches!(err, Error::BoundaryConflict { pore, .. } if pore == left[0]));
    assert_eq!(t.boundary_conditions(), &before);
    assert!(t.boundary_conditions().get(free).is_none());
}

#[test_log::test]
fn test_rate_condition_balances_outflow() {
    let (net, physics) = lattice();
    let g = physics.get(CONDUCTANCE).unwrap().to_vec();
    let source = net.pores("internal").unwrap()[0];

    let mut t = Transport::new();
    t.set_value_bc(net.pores("top").unwrap(), 0.0).unwrap();
    t.set_rate_bc(&[source], 2.5).unwrap();
    t.run(&settings(SolverSpec::new(Method::Cg)), &net, &physics)
        .unwrap();

    assert_relative_eq!(t.rate(&net, &g, &[source]).unwrap(), 2.5, max_relative = 1e-6);
    assert_relative_eq!(
        t.rate(&net, &g, net.pores("top").unwrap()).unwrap(),
        -2.5,
        max_relative = 1e-6
    );
}
