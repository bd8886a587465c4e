//! The simulation clock: adaptive, resumable stepping of a built model.
//!
//! Each step retries with a shrinking step size until the solver converges
//! or the size falls below the floor. Accepted steps advance the clock and
//! grow the step again; snapshots are taken every `snapshot_every` accepted
//! steps so a run can be resumed from any of them.

pub mod observer;
pub mod snapshot;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::SimulationDef;
use crate::error::RunError;
use crate::model::Model;
use crate::numerics::Convergence;
use crate::numerics::solver::{CoupledSystem, SolverBackend, StepOutcome, SweepControl};
use crate::numerics::sweep::SweepSolver;
use crate::numerics::timing::{record_step, reset_timing};

use observer::{Checkpoint, Observer};
use snapshot::{MemoryStore, Snapshot, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initialized,
    Running,
    Completed,
    Diverged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Time at the end of the step (s).
    pub time: f64,
    pub dt: f64,
    pub sweeps: usize,
    pub residual: f64,
    /// Rejected attempts before this step was accepted.
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockState {
    pub time: f64,
    /// Step size the next step starts with.
    pub dt: f64,
    /// Accepted steps so far.
    pub steps: usize,
    pub phase: Phase,
    /// Set when the run completed early on a stop request.
    #[serde(default)]
    pub stopped: bool,
    pub history: Vec<StepRecord>,
}

/// Run parameters in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub total: f64,
    pub initial_step: f64,
    pub step_min: f64,
    pub step_max: f64,
    pub residual_lim: f64,
    pub max_sweeps: usize,
    pub growth: f64,
    pub shrink: f64,
    pub snapshot_every: usize,
}

fn seconds(q: &crate::units::Quantity, default_unit: &str, name: &str) -> Result<f64, RunError> {
    q.to_base_or(default_unit)
        .map_err(|e| RunError::InvalidConfig(format!("{name}: {e}")))
}

impl RunConfig {
    /// Resolve run parameters; `diel_period` (s) scales `simtime_days`.
    pub fn from_def(def: &SimulationDef, diel_period: f64) -> Result<Self, RunError> {
        let total = match def.simtime_days {
            Some(days) => days * diel_period,
            None => seconds(&def.simtime_total, "h", "simtime_total")?,
        };
        let initial_step = seconds(&def.simtime_step, "s", "simtime_step")?;
        let step_min = match &def.step_min {
            Some(q) => seconds(q, "s", "step_min")?,
            None => initial_step * 1e-3,
        };
        let step_max = match &def.step_max {
            Some(q) => seconds(q, "s", "step_max")?,
            None => initial_step * 10.0,
        };
        let config = Self {
            total,
            initial_step,
            step_min,
            step_max,
            residual_lim: def.residual_lim,
            max_sweeps: def.max_sweeps,
            growth: def.growth,
            shrink: def.shrink,
            snapshot_every: def.snapshot_every,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        let invalid = |msg: String| Err(RunError::InvalidConfig(msg));
        if !(self.total > 0.0) {
            return invalid(format!("total simulated time must be positive, got {} s", self.total));
        }
        if !(self.initial_step > 0.0 && self.initial_step < self.total) {
            return invalid(format!(
                "simtime_step {} s must be positive and below the total {} s",
                self.initial_step, self.total
            ));
        }
        if !(0.0 < self.step_min && self.step_min <= self.initial_step && self.initial_step <= self.step_max) {
            return invalid(format!(
                "step limits must satisfy 0 < step_min ({}) <= simtime_step ({}) <= step_max ({})",
                self.step_min, self.initial_step, self.step_max
            ));
        }
        if !(self.residual_lim > 0.0 && self.residual_lim <= 1e-6) {
            return invalid(format!("residual_lim {} must lie in (0, 1e-6]", self.residual_lim));
        }
        if self.max_sweeps < 2 {
            return invalid(format!("max_sweeps {} must be at least 2", self.max_sweeps));
        }
        if !(self.growth >= 1.0) {
            return invalid(format!("growth {} must be at least 1", self.growth));
        }
        if !(0.0 < self.shrink && self.shrink < 1.0) {
            return invalid(format!("shrink {} must lie in (0, 1)", self.shrink));
        }
        if self.snapshot_every == 0 {
            return invalid("snapshot_every must be at least 1".into());
        }
        Ok(())
    }

    fn control(&self) -> SweepControl {
        SweepControl {
            max_sweeps: self.max_sweeps,
            convergence: Convergence::new(self.residual_lim),
        }
    }
}

/// Cooperative stop request, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Relative slack when comparing simulated time against the end time.
const TIME_EPS: f64 = 1e-9;

pub struct Simulation<S: SolverBackend = SweepSolver> {
    pub model: Model,
    pub config: RunConfig,
    pub state: ClockState,
    solver: S,
    store: Box<dyn SnapshotStore>,
    observers: Vec<Box<dyn Observer>>,
    stop: StopSignal,
}

impl Simulation<SweepSolver> {
    pub fn new(model: Model) -> Result<Self, RunError> {
        Self::with_solver(model, SweepSolver)
    }
}

impl<S: SolverBackend> Simulation<S> {
    pub fn with_solver(model: Model, solver: S) -> Result<Self, RunError> {
        let config = RunConfig::from_def(&model.simulation, model.diel_period())?;
        let state = ClockState {
            time: 0.0,
            dt: config.initial_step,
            steps: 0,
            phase: Phase::Initialized,
            stopped: false,
            history: Vec::new(),
        };
        Ok(Self {
            model,
            config,
            state,
            solver,
            store: Box::new(MemoryStore::new()),
            observers: Vec::new(),
            stop: StopSignal::new(),
        })
    }

    pub fn with_store(mut self, store: Box<dyn SnapshotStore>) -> Self {
        self.store = store;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    pub fn snapshot(&self, index: isize) -> Result<Snapshot, RunError> {
        let index = self.resolve_index(index)?;
        self.store
            .load(index)?
            .ok_or(RunError::SnapshotIndexOutOfRange {
                index: index as isize,
                len: self.store.len(),
            })
    }

    fn resolve_index(&self, index: isize) -> Result<usize, RunError> {
        let len = self.store.len();
        let resolved = if index < 0 {
            len as isize + index
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(RunError::SnapshotIndexOutOfRange { index, len });
        }
        Ok(resolved as usize)
    }

    pub fn is_finished(&self) -> bool {
        self.state.time >= self.config.total * (1.0 - TIME_EPS)
    }

    /// Record the current state as the next snapshot and notify observers.
    fn checkpoint(&mut self) -> Result<(), RunError> {
        let index = self.store.len();
        let snapshot = Snapshot::capture(index, &self.state, &self.model.fields);
        self.store.save(&snapshot)?;
        let cp = Checkpoint {
            index,
            state: &self.state,
            domain: &self.model.domain,
            fields: &self.model.fields,
            surface_irradiance: self.model.surface_irradiance(self.state.time),
            process_rates: self.model.process_rates(&self.model.fields),
        };
        for observer in &mut self.observers {
            observer.on_checkpoint(&cp)?;
        }
        debug!(index, time = self.state.time, "snapshot saved");
        Ok(())
    }

    /// Store the initial state as snapshot 0, discarding earlier snapshots.
    #[instrument(skip_all)]
    pub fn initialize(&mut self) -> Result<(), RunError> {
        self.store.truncate(0)?;
        self.state.phase = Phase::Running;
        info!(
            total_h = self.config.total / 3600.0,
            dt = self.config.initial_step,
            equations = self.model.equations.len(),
            "simulation initialized"
        );
        self.checkpoint()
    }

    /// Restore the state stored at `index` (negative counts from the end) and
    /// discard every later snapshot.
    #[instrument(skip(self))]
    pub fn resume(&mut self, index: isize) -> Result<(), RunError> {
        let resolved = self.resolve_index(index)?;
        let snapshot = self
            .store
            .load(resolved)?
            .ok_or(RunError::SnapshotIndexOutOfRange {
                index,
                len: self.store.len(),
            })?;

        let n = self.model.domain.num_cells();
        let mut fields = self.model.fields.clone();
        for (path, values) in &snapshot.fields {
            let id = fields.id_of(path).ok_or_else(|| {
                RunError::SnapshotMismatch(format!("field `{path}` is not part of the model"))
            })?;
            if values.len() != n {
                return Err(RunError::SnapshotMismatch(format!(
                    "field `{path}` has {} values for {n} cells",
                    values.len()
                )));
            }
            fields.set(id, DVector::from_column_slice(values));
        }
        for (_, path, _) in self.model.fields.dynamic() {
            if !snapshot.fields.contains_key(path) {
                return Err(RunError::SnapshotMismatch(format!(
                    "field `{path}` is missing from snapshot {resolved}"
                )));
            }
        }

        self.model.fields = fields;
        self.model.reset_budgets();
        self.state = snapshot.state;
        self.state.stopped = false;
        self.state.phase = if self.is_finished() {
            Phase::Completed
        } else {
            Phase::Running
        };
        self.store.truncate(resolved + 1)?;
        info!(index = resolved, time = self.state.time, "resumed from snapshot");
        Ok(())
    }

    /// Attempt one step of length `dt` from the current state without
    /// committing it.
    pub fn try_step(&self, dt: f64) -> Result<StepOutcome, RunError> {
        let mut trial = self.model.fields.clone();
        self.model.prepare_step(&mut trial, self.state.time + dt, dt);
        let system = CoupledSystem {
            equations: &self.model.equations,
            domain: &self.model.domain,
        };
        let outcome = self
            .solver
            .solve_step(&system, &trial, dt, &self.config.control())?;
        if !outcome.converged {
            return Err(RunError::StepNotConverged {
                equation: outcome.worst_equation.unwrap_or_default(),
                time: self.state.time,
                step_size: dt,
                residual: outcome.residual,
            });
        }
        Ok(outcome)
    }

    /// Advance by one accepted step, shrinking the step size on failure.
    pub fn step(&mut self) -> Result<StepRecord, RunError> {
        let remaining = self.config.total - self.state.time;
        let clamped = remaining < self.state.dt;
        let mut dt = self.state.dt.min(remaining);
        let mut attempts = Vec::new();

        let outcome = loop {
            attempts.push(dt);
            match self.try_step(dt) {
                Ok(outcome) => break outcome,
                Err(err @ (RunError::StepNotConverged { .. } | RunError::Solver(_))) => {
                    warn!(time = self.state.time, step_size = dt, "{err}");
                }
                Err(err) => return Err(err),
            }
            let next = dt * self.config.shrink;
            if next < self.config.step_min {
                self.state.phase = Phase::Diverged;
                error!(
                    time = self.state.time,
                    step_size = dt,
                    attempts = attempts.len(),
                    "step size fell below the floor"
                );
                return Err(RunError::SimulationDiverged {
                    time: self.state.time,
                    step_size: dt,
                    attempts,
                });
            }
            dt = next;
        };

        let mut fields = outcome.fields;
        self.model.finish_step(&mut fields);
        self.model.fields = fields;
        self.model.record_budgets(dt);
        let rejected = attempts.len() - 1;
        record_step(rejected);
        self.state.time = if remaining - dt <= self.config.total * TIME_EPS {
            self.config.total
        } else {
            self.state.time + dt
        };
        if !(clamped && rejected == 0) {
            self.state.dt = (dt * self.config.growth).min(self.config.step_max);
        }
        self.state.steps += 1;
        let record = StepRecord {
            time: self.state.time,
            dt,
            sweeps: outcome.sweeps,
            residual: outcome.residual,
            rejected,
        };
        debug!(
            time = record.time,
            dt,
            sweeps = record.sweeps,
            residual = record.residual,
            rejected,
            "step accepted"
        );
        self.state.history.push(record.clone());
        Ok(record)
    }

    /// Run to the end time, or until the stop signal is raised.
    ///
    /// A stopped run also ends `Completed`, with `state.stopped` set and the
    /// last accepted state stored as the latest snapshot. Calling `run`
    /// again after the signal is reset continues from there.
    #[instrument(skip_all)]
    pub fn run(&mut self) -> Result<Phase, RunError> {
        reset_timing();
        let started = std::time::Instant::now();
        if self.state.phase == Phase::Initialized || self.store.is_empty() {
            self.initialize()?;
        }
        self.state.stopped = false;
        if !self.is_finished() {
            self.state.phase = Phase::Running;
        }

        while !self.is_finished() {
            if self.stop.is_stopped() {
                self.state.phase = Phase::Completed;
                self.state.stopped = true;
                info!(time = self.state.time, "stop requested");
                if self.state.steps % self.config.snapshot_every != 0 {
                    self.checkpoint()?;
                }
                break;
            }
            self.step()?;
            if self.is_finished() {
                self.state.phase = Phase::Completed;
                self.checkpoint()?;
            } else if self.state.steps % self.config.snapshot_every == 0 {
                self.checkpoint()?;
            }
        }

        for observer in &mut self.observers {
            observer.on_finish(&self.state)?;
        }
        crate::numerics::timing::finalize_and_print(started.elapsed());
        Ok(self.state.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Quantity;
    use approx::assert_relative_eq;

    fn def() -> SimulationDef {
        SimulationDef {
            simtime_total: Quantity::new(1.0, "h"),
            simtime_step: Quantity::new(60.0, "s"),
            ..SimulationDef::default()
        }
    }

    #[test]
    fn run_config_defaults_and_units() {
        let config = RunConfig::from_def(&def(), 86_400.0).unwrap();
        assert_eq!(config.total, 3600.0);
        assert_eq!(config.initial_step, 60.0);
        assert_relative_eq!(config.step_min, 0.06);
        assert_eq!(config.step_max, 600.0);
        assert_eq!(config.shrink, 0.5);

        let days = SimulationDef {
            simtime_days: Some(2.0),
            ..def()
        };
        assert_eq!(RunConfig::from_def(&days, 43_200.0).unwrap().total, 86_400.0);
    }

    #[test]
    fn run_config_rejects_bad_limits() {
        let cases = [
            SimulationDef { max_sweeps: 1, ..def() },
            SimulationDef { residual_lim: 1e-3, ..def() },
            SimulationDef { simtime_step: Quantity::new(2.0, "h"), ..def() },
            SimulationDef { shrink: 1.0, ..def() },
            SimulationDef { step_min: Some(Quantity::new(120.0, "s")), ..def() },
        ];
        for case in cases {
            assert!(matches!(
                RunConfig::from_def(&case, 86_400.0),
                Err(RunError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn stop_signal_is_shared() {
        let a = StopSignal::new();
        let b = a.clone();
        b.stop();
        assert!(a.is_stopped());
        a.reset();
        assert!(!b.is_stopped());
    }
}
