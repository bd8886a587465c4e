use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use indexmap::IndexMap;

use crate::model::equation::Budget;
use crate::simulation::{Phase, Simulation};
use crate::numerics::solver::SolverBackend;

pub struct RunSummary {
    // Domain
    pub num_cells: usize,
    pub cell_size: f64,
    pub sediment_length: f64,
    pub dbl_length: f64,

    // Model
    pub num_variables: usize,
    pub num_processes: usize,
    pub equations: Vec<(String, usize, usize)>,

    // Run
    pub phase: Phase,
    pub stopped: bool,
    pub simulated_time: f64,
    pub total_time: f64,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub min_step: f64,
    pub max_step: f64,
    pub mean_sweeps: f64,
    pub max_residual: f64,
    pub snapshots: usize,
    pub wall_time: f64,

    pub budgets: IndexMap<String, Budget>,
}

impl RunSummary {
    pub fn from_run<S: SolverBackend>(sim: &Simulation<S>, wall_time: f64) -> Self {
        let model = &sim.model;
        let history = &sim.state.history;
        let dts = history.iter().map(|r| r.dt);
        let min_step = dts.clone().fold(f64::INFINITY, f64::min);
        let max_step = dts.fold(0.0, f64::max);
        let mean_sweeps = if history.is_empty() {
            0.0
        } else {
            history.iter().map(|r| r.sweeps as f64).sum::<f64>() / history.len() as f64
        };

        Self {
            num_cells: model.domain.num_cells(),
            cell_size: model.domain.cell_size,
            sediment_length: model.domain.sediment_length,
            dbl_length: model.domain.dbl_length,
            num_variables: model.variables.len(),
            num_processes: model.processes.len(),
            equations: model
                .equations
                .iter()
                .map(|eq| {
                    let implicit = eq.implicit_sources().count();
                    (eq.name.clone(), implicit, eq.sources.len() - implicit)
                })
                .collect(),
            phase: sim.state.phase,
            stopped: sim.state.stopped,
            simulated_time: sim.state.time,
            total_time: sim.config.total,
            accepted_steps: sim.state.steps,
            rejected_steps: history.iter().map(|r| r.rejected).sum(),
            min_step: if history.is_empty() { 0.0 } else { min_step },
            max_step,
            mean_sweeps,
            max_residual: history.iter().map(|r| r.residual).fold(0.0, f64::max),
            snapshots: sim.store().len(),
            wall_time,
            budgets: model.budgets.clone(),
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        self.write(&mut file)
    }

    fn write(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out, "BENTHIC COLUMN SIMULATION SUMMARY")?;
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out)?;

        writeln!(out, "DOMAIN")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Number of cells:     {}", self.num_cells)?;
        writeln!(out, "Cell size:           {:.3} mm", self.cell_size * 1e3)?;
        writeln!(out, "Sediment length:     {:.3} mm", self.sediment_length * 1e3)?;
        writeln!(out, "DBL length:          {:.3} mm", self.dbl_length * 1e3)?;
        writeln!(out)?;

        writeln!(out, "MODEL")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Variables:           {}", self.num_variables)?;
        writeln!(out, "Processes:           {}", self.num_processes)?;
        for (name, implicit, explicit) in &self.equations {
            writeln!(
                out,
                "  {name:<18} {implicit} implicit, {explicit} explicit source(s)"
            )?;
        }
        writeln!(out)?;

        writeln!(out, "RUN")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Outcome:             {}", self.outcome())?;
        writeln!(
            out,
            "Simulated time:      {:.4} h of {:.4} h",
            self.simulated_time / 3600.0,
            self.total_time / 3600.0
        )?;
        writeln!(
            out,
            "Steps:               {} accepted, {} rejected",
            self.accepted_steps, self.rejected_steps
        )?;
        writeln!(
            out,
            "Step size:           {:.3e} s to {:.3e} s",
            self.min_step, self.max_step
        )?;
        writeln!(out, "Mean sweeps:         {:.2}", self.mean_sweeps)?;
        writeln!(out, "Max residual:        {:.3e}", self.max_residual)?;
        writeln!(out, "Snapshots:           {}", self.snapshots)?;
        writeln!(out, "Wall time:           {:.3} s", self.wall_time)?;
        writeln!(out)?;

        if !self.budgets.is_empty() {
            writeln!(out, "BUDGETS (per unit area)")?;
            writeln!(out, "{}", "-".repeat(60))?;
            for (name, b) in &self.budgets {
                writeln!(out, "{name}:")?;
                writeln!(out, "  Initial quantity:  {:.6e}", b.initial_quantity)?;
                writeln!(out, "  Final quantity:    {:.6e}", b.quantity)?;
                writeln!(out, "  Sources:           {:.6e}", b.sources)?;
                writeln!(out, "  Transport:         {:.6e}", b.transport)?;
                writeln!(out, "  Imbalance:         {:.6e}", b.imbalance())?;
            }
            writeln!(out)?;
        }

        writeln!(out, "{}", "=".repeat(60))?;
        Ok(())
    }

    fn outcome(&self) -> String {
        if self.stopped {
            format!("{:?} (stopped early)", self.phase)
        } else {
            format!("{:?}", self.phase)
        }
    }

    pub fn print_to_console(&self) {
        println!("\n{}", "=".repeat(60));
        println!("SIMULATION SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Outcome:       {} at {:.3} h",
            self.outcome(),
            self.simulated_time / 3600.0
        );
        println!(
            "Steps:         {} accepted, {} rejected",
            self.accepted_steps, self.rejected_steps
        );
        println!("Mean sweeps:   {:.2}", self.mean_sweeps);
        for (name, b) in &self.budgets {
            println!("Budget {name}: imbalance {:.3e}", b.imbalance());
        }
        println!("{}\n", "=".repeat(60));
    }
}
