//! Read-only hooks called at every checkpoint of a run.

use std::io;
use std::path::PathBuf;

use indexmap::IndexMap;
use tracing::info;

use super::ClockState;
use crate::discretization::domain::Domain;
use crate::model::fields::FieldSet;
use crate::processing::csv_writer;

/// What an observer sees at a checkpoint.
pub struct Checkpoint<'a> {
    pub index: usize,
    pub state: &'a ClockState,
    pub domain: &'a Domain,
    pub fields: &'a FieldSet,
    pub surface_irradiance: f64,
    /// Depth-integrated process rates by path.
    pub process_rates: IndexMap<String, f64>,
}

pub trait Observer {
    fn on_checkpoint(&mut self, checkpoint: &Checkpoint<'_>) -> io::Result<()>;

    fn on_finish(&mut self, _state: &ClockState) -> io::Result<()> {
        Ok(())
    }
}

/// Logs a progress line per checkpoint.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total: f64,
}

impl ProgressReporter {
    pub fn new(total: f64) -> Self {
        Self { total }
    }
}

impl Observer for ProgressReporter {
    fn on_checkpoint(&mut self, cp: &Checkpoint<'_>) -> io::Result<()> {
        let percent = if self.total > 0.0 {
            100.0 * cp.state.time / self.total
        } else {
            100.0
        };
        let last = cp.state.history.last();
        info!(
            snapshot = cp.index,
            time_h = cp.state.time / 3600.0,
            progress = %format!("{percent:.1}%"),
            dt = cp.state.dt,
            sweeps = last.map_or(0, |r| r.sweeps),
            residual = last.map_or(0.0, |r| r.residual),
            irradiance = cp.surface_irradiance,
            "checkpoint"
        );
        Ok(())
    }

    fn on_finish(&mut self, state: &ClockState) -> io::Result<()> {
        info!(
            phase = ?state.phase,
            stopped = state.stopped,
            time_h = state.time / 3600.0,
            steps = state.steps,
            "run finished"
        );
        Ok(())
    }
}

/// Writes one depth-profile CSV per checkpoint and a time series of
/// surface irradiance and depth-integrated process rates.
#[derive(Debug)]
pub struct ProfileCsvWriter {
    dir: PathBuf,
    times: Vec<f64>,
    irradiance: Vec<f64>,
    rates: IndexMap<String, Vec<f64>>,
}

impl ProfileCsvWriter {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            times: Vec::new(),
            irradiance: Vec::new(),
            rates: IndexMap::new(),
        })
    }

    fn write_series(&self) -> io::Result<()> {
        let mut columns = vec![
            ("time", self.times.as_slice()),
            ("surface_irradiance", self.irradiance.as_slice()),
        ];
        columns.extend(self.rates.iter().map(|(name, v)| (name.as_str(), v.as_slice())));
        csv_writer::write_columns(self.dir.join("process_rates.csv"), &columns)
    }
}

impl Observer for ProfileCsvWriter {
    fn on_checkpoint(&mut self, cp: &Checkpoint<'_>) -> io::Result<()> {
        let mut columns = vec![("depth", cp.domain.depths.as_slice())];
        columns.extend(cp.fields.dynamic().map(|(_, path, values)| (path, values.as_slice())));
        let path = self.dir.join(format!("profiles_{:06}.csv", cp.index));
        csv_writer::write_table(path, &columns)?;

        // Resumed runs revisit earlier checkpoints.
        let keep = self.times.iter().take_while(|t| **t < cp.state.time).count();
        self.times.truncate(keep);
        self.irradiance.truncate(keep);
        for series in self.rates.values_mut() {
            series.truncate(keep);
        }

        self.times.push(cp.state.time);
        self.irradiance.push(cp.surface_irradiance);
        for (name, rate) in &cp.process_rates {
            self.rates
                .entry(name.clone())
                .or_insert_with(|| vec![f64::NAN; keep])
                .push(*rate);
        }
        self.write_series()
    }
}
