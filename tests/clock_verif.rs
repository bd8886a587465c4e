use approx::assert_relative_eq;
use tempfile::tempdir;

use benthos_rs::config::ModelDefinition;
use benthos_rs::error::RunError;
use benthos_rs::model::Model;
use benthos_rs::simulation::observer::{Checkpoint, Observer};
use benthos_rs::simulation::snapshot::{JsonFileStore, SnapshotStore};
use benthos_rs::simulation::{ClockState, Phase, Simulation};

const DECAY: &str = r#"
domain:
  cell_size: 0.1 mm
  sediment_length: 1 mm
  dbl_length: 0.3 mm
environment:
  c:
    cls: Variable
    value: 0.5 mmol/l
    has_previous_value: true
    clip_min: 0
    constraints:
      top: 1 mmol/l
  D:
    cls: Process
    formula: D0 * porosity
    params:
      D0: 1e-9 m**2/s
  uptake:
    cls: Process
    formula: -Vmax * c / (Km + c) * sediment_mask
    params:
      Vmax: 1e-4
      Km: 0.1
  irradiance:
    cls: Irradiance
    hours_total: 6 h
    channels:
      - name: par
        k0: 1 1/mm
equations:
  cEqn:
    transient: [env.c, 1]
    diffusion: [env.D, 1]
    sources: [env.uptake]
    track_budget: true
simulation:
  simtime_total: 2 h
  simtime_step: 60 s
  step_max: 600 s
  snapshot_every: 3
"#;

fn simulation(text: &str) -> Simulation {
    let def = ModelDefinition::from_yaml(text).expect("valid YAML");
    Simulation::new(Model::build(&def).expect("model builds")).expect("valid run config")
}

#[test]
fn run_completes_with_snapshots() {
    let mut sim = simulation(DECAY);
    assert_eq!(sim.run().unwrap(), Phase::Completed);
    assert_eq!(sim.state.time, 7200.0);
    assert!(sim.state.steps > 0);

    let len = sim.store().len();
    assert_eq!(len, 1 + sim.state.steps.div_ceil(3));
    let first = sim.snapshot(0).unwrap();
    assert_eq!(first.time, 0.0);
    let last = sim.snapshot(-1).unwrap();
    assert_eq!(last.time, 7200.0);
    assert_eq!(last.state.phase, Phase::Completed);

    // Steps grow after acceptance but never beyond the limit.
    let dts: Vec<f64> = sim.state.history.iter().map(|r| r.dt).collect();
    assert_eq!(dts[0], 60.0);
    assert_relative_eq!(dts[1], 75.0);
    assert!(dts.iter().all(|dt| *dt <= 600.0));

    let c = sim.model.field("env.c").unwrap();
    assert!(c.iter().all(|v| *v >= 0.0));
    let budget = &sim.model.budgets["cEqn"];
    assert!(budget.sources < 0.0);
    assert!(budget.transport > 0.0);
}

#[test]
fn budget_balances_the_quantity_change() {
    let mut sim = simulation(DECAY);
    for _ in 0..3 {
        sim.step().unwrap();
        let budget = &sim.model.budgets["cEqn"];
        let change = budget.quantity - budget.initial_quantity;
        assert!(change.abs() > 0.0);
        assert!(budget.imbalance().abs() <= 1e-6 * (budget.sources.abs() + budget.transport.abs()));
    }

    sim.run().unwrap();
    let c = sim.model.field("env.c").unwrap();
    assert!(c.iter().all(|v| *v > 0.0), "clip limit must stay inactive");
    let budget = &sim.model.budgets["cEqn"];
    let change = budget.quantity - budget.initial_quantity;
    assert_relative_eq!(change, budget.sources + budget.transport, max_relative = 1e-5);
}

#[test]
fn resuming_reproduces_the_uninterrupted_run() {
    let mut reference = simulation(DECAY);
    reference.run().unwrap();
    let expected = reference.model.fields.clone();
    let snapshots = reference.store().len();
    assert!(snapshots > 3);

    for index in [1, -2] {
        let mut sim = simulation(DECAY);
        sim.run().unwrap();
        sim.resume(index).unwrap();
        let resumed = sim.snapshot(-1).unwrap();
        assert!(resumed.time < 7200.0);
        assert_eq!(sim.state.time, resumed.time);

        sim.run().unwrap();
        assert_eq!(sim.store().len(), snapshots);
        for (id, path, values) in expected.iter() {
            assert_eq!(sim.model.fields.get(id), values, "field {path} after resuming at {index}");
        }
        assert_eq!(sim.state, reference.state);
    }
}

#[test]
fn resuming_from_a_json_store() {
    let dir = tempdir().unwrap();
    let mut reference = simulation(DECAY).with_store(Box::new(JsonFileStore::open(dir.path()).unwrap()));
    reference.run().unwrap();
    let total = reference.store().len();

    let mut sim = simulation(DECAY).with_store(Box::new(JsonFileStore::open(dir.path()).unwrap()));
    assert_eq!(sim.store().len(), total);
    sim.resume(2).unwrap();
    assert_eq!(sim.store().len(), 3);
    assert!(!dir.path().join(format!("snapshot_{:06}.json", total - 1)).exists());

    sim.run().unwrap();
    assert_eq!(sim.store().len(), total);
    assert_eq!(
        sim.model.field("env.c").unwrap(),
        reference.model.field("env.c").unwrap()
    );
}

#[test]
fn out_of_range_snapshot_indices_are_rejected() {
    let mut sim = simulation(DECAY);
    sim.initialize().unwrap();
    assert!(matches!(
        sim.resume(1),
        Err(RunError::SnapshotIndexOutOfRange { index: 1, len: 1 })
    ));
    assert!(matches!(
        sim.resume(-2),
        Err(RunError::SnapshotIndexOutOfRange { index: -2, len: 1 })
    ));
    sim.resume(-1).unwrap();
    assert_eq!(sim.state.time, 0.0);
}

#[test]
fn step_size_halves_until_the_floor() {
    let text = DECAY
        .replace("formula: -Vmax * c / (Km + c) * sediment_mask", "formula: ln(c - 1)")
        .replace("  step_max: 600 s\n", "  step_max: 600 s\n  step_min: 1 s\n");
    let mut sim = simulation(&text);

    match sim.run() {
        Err(RunError::SimulationDiverged { time, step_size, attempts }) => {
            assert_eq!(time, 0.0);
            assert_eq!(attempts, vec![60.0, 30.0, 15.0, 7.5, 3.75, 1.875]);
            assert_eq!(step_size, 1.875);
        }
        other => panic!("expected SimulationDiverged, got {other:?}"),
    }
    assert_eq!(sim.state.phase, Phase::Diverged);
    assert_eq!(sim.state.steps, 0);
}

#[test]
fn unconverged_attempts_report_the_equation() {
    let text = DECAY.replace("formula: -Vmax * c / (Km + c) * sediment_mask", "formula: ln(c - 1)");
    let sim = simulation(&text);
    match sim.try_step(60.0) {
        Err(RunError::Solver(_)) | Err(RunError::StepNotConverged { .. }) => {}
        other => panic!("expected a failed attempt, got {:?}", other.map(|o| o.sweeps)),
    }
}

struct StopAfter {
    checkpoints: usize,
    signal: benthos_rs::simulation::StopSignal,
    seen: Vec<(usize, f64)>,
}

impl Observer for StopAfter {
    fn on_checkpoint(&mut self, cp: &Checkpoint<'_>) -> std::io::Result<()> {
        self.seen.push((cp.index, cp.state.time));
        assert!(cp.process_rates.contains_key("env.uptake"));
        if self.seen.len() == self.checkpoints {
            self.signal.stop();
        }
        Ok(())
    }

    fn on_finish(&mut self, state: &ClockState) -> std::io::Result<()> {
        assert_ne!(state.phase, Phase::Running);
        Ok(())
    }
}

#[test]
fn stop_signal_is_honoured_between_steps() {
    let mut sim = simulation(DECAY);
    let signal = sim.stop_signal();
    sim.add_observer(Box::new(StopAfter {
        checkpoints: 2,
        signal: signal.clone(),
        seen: Vec::new(),
    }));

    assert_eq!(sim.run().unwrap(), Phase::Completed);
    assert!(sim.state.stopped);
    assert!(sim.state.time < 7200.0);
    assert_eq!(sim.state.steps, 3);
    assert_eq!(sim.store().len(), 2);
    let persisted = sim.snapshot(-1).unwrap();
    assert_eq!(persisted.time, sim.state.time);
    assert_eq!(
        persisted.fields["env.c"].as_slice(),
        sim.model.field("env.c").unwrap().as_slice()
    );

    signal.reset();
    assert_eq!(sim.run().unwrap(), Phase::Completed);
    assert!(!sim.state.stopped);
    assert_eq!(sim.state.time, 7200.0);
}
