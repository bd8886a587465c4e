use approx::assert_relative_eq;
use nalgebra::DVector;

use benthos_rs::config::ModelDefinition;
use benthos_rs::error::BuildError;
use benthos_rs::model::Model;
use benthos_rs::model::equation::Cast;
use benthos_rs::simulation::Simulation;

fn build(text: &str) -> Result<Model, BuildError> {
    Model::build(&ModelDefinition::from_yaml(text).expect("valid YAML"))
}

const SCOPES: &str = r#"
domain:
  sediment_length: 1 mm
  dbl_length: 0.2 mm
environment:
  x:
    cls: Variable
    value: 1
  uses_x:
    cls: Process
    formula: 2 * x
microbes:
  bugs:
    features:
      biomass:
        value: 3
      x:
        value: 5
    processes:
      local_x:
        formula: 2 * x
      env_x:
        formula: 2 * env.x
      from_env_process:
        formula: uses_x + biomass
"#;

#[test]
fn nearest_scope_wins_and_full_paths_reach_outer_scopes() {
    let m = build(SCOPES).unwrap();
    let value = |path: &str| m.process(path).unwrap().evaluate(&m.fields).unwrap()[0];

    assert_eq!(value("env.uses_x"), 2.0);
    assert_eq!(value("microbes.bugs.local_x"), 10.0);
    assert_eq!(value("microbes.bugs.env_x"), 2.0);
    // A process reference is resolved in its own scope, not the caller's.
    assert_eq!(value("microbes.bugs.from_env_process"), 2.0 + 3.0);
}

#[test]
fn unknown_symbols_name_the_symbol_and_the_formula() {
    let text = SCOPES.replace("formula: 2 * env.x", "formula: 2 * env.y");
    match build(&text) {
        Err(BuildError::UnresolvedSymbol { symbol, path, formula }) => {
            assert_eq!(symbol, "env.y");
            assert_eq!(path, "microbes.bugs.processes.env_x");
            assert_eq!(formula, "2 * env.y");
        }
        other => panic!("expected UnresolvedSymbol, got {other:?}"),
    }
}

const SWITCHES: &str = r#"
domain:
  sediment_length: 1 mm
  dbl_length: 0 mm
environment:
  c:
    cls: Variable
    value: 1
    has_previous_value: true
  piecewise:
    cls: Process
    formula:
      base: -k * c
      pieces:
        - expr: "1"
          where: c > K
        - expr: "0.5"
          where: c <= K
    params:
      k: 0.1
      K: 0.5
  thresholded:
    cls: Process
    formula: -k * c * (c > K)
    params:
      k: 0.1
      K: 0.5
equations:
  cEqn:
    transient: [env.c, 1]
    sources:
      - env.piecewise
      - env.thresholded
"#;

#[test]
fn piecewise_predicates_keep_terms_differentiable() {
    let m = build(SWITCHES).unwrap();
    let eq = m.equation("cEqn").unwrap();

    let piecewise = eq.source("env.piecewise").unwrap();
    assert!(piecewise.term.is_differentiable());
    assert_eq!(piecewise.cast, Cast::Implicit);

    let thresholded = eq.source("env.thresholded").unwrap();
    assert!(!thresholded.term.is_differentiable());
    assert_eq!(thresholded.cast, Cast::Explicit);

    // Above the threshold both forms agree.
    let rate = |path: &str| m.process(path).unwrap().evaluate(&m.fields).unwrap()[0];
    assert_relative_eq!(rate("env.piecewise"), -0.1);
    assert_relative_eq!(rate("env.thresholded"), -0.1);
}

#[test]
fn manual_override_forces_explicit_treatment() {
    let text = SWITCHES.replace("      k: 0.1\n      K: 0.5\n  thresholded", "      k: 0.1\n      K: 0.5\n    implicit: false\n  thresholded");
    let m = build(&text).unwrap();
    let eq = m.equation("cEqn").unwrap();
    assert_eq!(eq.source("env.piecewise").unwrap().cast, Cast::Explicit);
}

const COUPLED: &str = r#"
domain:
  sediment_length: 1 mm
  dbl_length: 0 mm
environment:
  a:
    cls: Variable
    value: 1
    has_previous_value: true
  b:
    cls: Variable
    value: 3
    has_previous_value: true
  r:
    cls: Process
    formula: k * a
    params:
      k: 1e-3
equations:
  aEqn:
    transient: [env.a, 1]
    sources: [[env.r, -2]]
  bEqn:
    transient: [env.b, 1]
    sources: [[env.r, -1]]
simulation:
  simtime_total: 600 s
  simtime_step: 100 s
  step_max: 100 s
"#;

#[test]
fn shared_process_couples_equations_stoichiometrically() {
    let m = build(COUPLED).unwrap();
    let a0 = m.domain.integrate(m.field("env.a").unwrap());
    let b0 = m.domain.integrate(m.field("env.b").unwrap());

    let mut sim = Simulation::new(m).unwrap();
    sim.run().unwrap();
    let a1 = sim.model.domain.integrate(sim.model.field("env.a").unwrap());
    let b1 = sim.model.domain.integrate(sim.model.field("env.b").unwrap());

    assert!(a1 < a0);
    assert_relative_eq!(a1 - a0, 2.0 * (b1 - b0), max_relative = 1e-9);
}

#[test]
fn zero_coefficient_sources_are_rejected() {
    let text = COUPLED.replace("sources: [[env.r, -1]]", "sources: [[env.r, 0]]");
    match build(&text) {
        Err(BuildError::ZeroCoefficientTerm { equation, term }) => {
            assert_eq!(equation, "bEqn");
            assert_eq!(term, "env.r");
        }
        other => panic!("expected ZeroCoefficientTerm, got {other:?}"),
    }
}

const SEEDED: &str = r#"
domain:
  cell_size: 0.1 mm
  sediment_length: 3 mm
  dbl_length: 0.5 mm
environment:
  oxy:
    cls: Variable
    value: 0
    constraints:
      top: 0.2 mmol/l
      bottom: 0
    seed:
      profile: linear
microbes:
  mat:
    features:
      biomass:
        value: 0
        constraints:
          dbl: 0
        seed:
          profile: lognormal
          params:
            loc: 0 mm
            scale: 1 mm
            coeff: 12 mg/cm**3
"#;

#[test]
fn seeding_is_reproducible() {
    let first = build(SEEDED).unwrap();
    let second = build(SEEDED).unwrap();
    for path in ["env.oxy", "microbes.mat.biomass"] {
        let a = first.field(path).unwrap();
        let b = second.field(path).unwrap();
        assert_eq!(a, b);
        assert_eq!(&first.seed_variable(path).unwrap(), a);
    }

    let oxy = first.field("oxy").unwrap();
    assert_relative_eq!(oxy[0], 0.2, epsilon = 1e-12);
    assert_eq!(oxy[oxy.len() - 1], 0.0);

    let biomass = first.field("microbes.mat.biomass").unwrap();
    let dbl = first.domain.dbl_cells;
    assert!(biomass.rows(0, dbl).iter().all(|v| *v == 0.0));
    assert!(biomass.max() <= 12_000.0 * (1.0 + 1e-12));
    assert!(biomass.max() > 0.0);
}

#[test]
fn unknown_seed_profiles_are_rejected() {
    let text = SEEDED.replace("profile: lognormal", "profile: gamma");
    assert!(matches!(
        build(&text),
        Err(BuildError::InvalidSeedProfile { ref path, .. }) if path == "microbes.mat.features.biomass"
    ));
}

const LIGHT: &str = r#"
domain:
  cell_size: 0.1 mm
  sediment_length: 2 mm
  dbl_length: 0.5 mm
environment:
  irradiance:
    cls: Irradiance
    hours_total: 12 h
    day_fraction: 0.4
    zenith_level: 80
    channels:
      - name: par
        k0: 10 1/mm
"#;

#[test]
fn surface_irradiance_is_periodic_and_continuous() {
    let m = build(LIGHT).unwrap();
    let light = m.irradiance.as_ref().unwrap();
    let period = 12.0 * 3600.0;
    let day = 0.4 * period;

    for i in 0..50 {
        let t = i as f64 * period / 37.0;
        assert_relative_eq!(
            m.surface_irradiance(t),
            m.surface_irradiance(t + period),
            epsilon = 1e-9
        );
    }
    // Midnight at t = 0, zenith one day length later.
    assert_eq!(light.surface_intensity(0.0), 0.0);
    assert_relative_eq!(light.surface_intensity(day), 80.0, epsilon = 1e-9);
    for edge in [0.5 * day, 1.5 * day, period + 0.5 * day] {
        let eps = 1e-3;
        assert!(light.surface_intensity(edge - eps).abs() < 1e-6);
        assert!(light.surface_intensity(edge + eps).abs() < 1e-6);
    }
    assert_eq!(light.surface_intensity(0.75 * period), 0.0);
}

#[test]
fn light_decays_only_in_the_sediment() {
    let m = build(LIGHT).unwrap();
    let light = m.irradiance.as_ref().unwrap();
    let mut fields = m.fields.clone();
    let noon = 0.4 * 12.0 * 3600.0;
    light.update(noon, &m.domain, &mut fields);

    let par: &DVector<f64> = fields.by_path("env.irradiance.par").unwrap();
    let surface = m.domain.idx_surface();
    assert_relative_eq!(par[surface - 1], 80.0, epsilon = 1e-9);
    assert_relative_eq!(
        par[surface + 1] / par[surface],
        (-10.0e3 * m.domain.cell_size).exp(),
        epsilon = 1e-12
    );
}

const EVENTS: &str = r#"
domain:
  cell_size: 0.1 mm
  sediment_length: 1 mm
  dbl_length: 0 mm
environment:
  c:
    cls: Variable
    value: 1
  release:
    cls: Process
    formula: k * low
    params:
      k: 2
    events:
      low:
        expr: c < 0.5
"#;

#[test]
fn event_clocks_accumulate_and_reset() {
    let m = build(EVENTS).unwrap();
    let c = m.fields.id_of("env.c").unwrap();
    let n = m.domain.num_cells();
    let mut fields = m.fields.clone();
    fields.set(c, DVector::from_fn(n, |i, _| if i < 3 { 0.2 } else { 0.8 }));

    m.prepare_step(&mut fields, 60.0, 60.0);
    m.prepare_step(&mut fields, 135.0, 75.0);
    let clock = fields.by_path("env.release.low").unwrap();
    assert!(clock.rows(0, 3).iter().all(|t| *t == 135.0));
    assert!(clock.rows(3, n - 3).iter().all(|t| *t == 0.0));

    // The owning formula sees the clock.
    let rate = m.process("env.release").unwrap().evaluate(&fields).unwrap();
    assert_eq!(rate[0], 270.0);
    assert_eq!(rate[n - 1], 0.0);

    // Cell 0 recovers and its clock restarts; cell 1 keeps counting.
    fields.get_mut(c)[0] = 0.9;
    m.prepare_step(&mut fields, 195.0, 60.0);
    let clock = fields.by_path("env.release.low").unwrap();
    assert_eq!(clock[0], 0.0);
    assert_eq!(clock[1], 195.0);
}
