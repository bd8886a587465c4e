use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use benthos_rs::config::ModelDefinition;
use benthos_rs::model::Model;
use benthos_rs::models;
use benthos_rs::processing::csv_writer;
use benthos_rs::processing::summary::RunSummary;
use benthos_rs::simulation::Simulation;
use benthos_rs::simulation::observer::{ProfileCsvWriter, ProgressReporter};
use benthos_rs::simulation::snapshot::JsonFileStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(err) = run() {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let definition = match args.next() {
        Some(path) => {
            info!(path = %path, "loading model definition");
            ModelDefinition::load(&path)?
        }
        None => {
            info!("no definition given, using the built-in microbial mat");
            models::microbial_mat()?
        }
    };
    let output = PathBuf::from(args.next().unwrap_or_else(|| "output/main".into()));
    fs::create_dir_all(&output)?;

    let model = Model::build(&definition)?;
    let mut sim =
        Simulation::new(model)?.with_store(Box::new(JsonFileStore::open(output.join("snapshots"))?));
    sim.add_observer(Box::new(ProgressReporter::new(sim.config.total)));
    sim.add_observer(Box::new(ProfileCsvWriter::new(output.join("profiles"))?));

    let started = Instant::now();
    let result = sim.run();
    let wall_time = started.elapsed().as_secs_f64();

    save_step_sizes(&sim, &output)?;
    let summary = RunSummary::from_run(&sim, wall_time);
    summary.write_to_file(output.join("simulation_summary.txt"))?;
    summary.print_to_console();
    info!(path = %output.display(), "outputs written");

    result?;
    Ok(())
}

fn save_step_sizes(sim: &Simulation, output: &std::path::Path) -> std::io::Result<()> {
    let history = &sim.state.history;
    let times: Vec<f64> = history.iter().map(|r| r.time).collect();
    let steps: Vec<f64> = history.iter().map(|r| r.dt).collect();
    let sweeps: Vec<f64> = history.iter().map(|r| r.sweeps as f64).collect();
    let residuals: Vec<f64> = history.iter().map(|r| r.residual).collect();
    csv_writer::write_table(
        output.join("step_sizes.csv"),
        &[
            ("time", times.as_slice()),
            ("dt", steps.as_slice()),
            ("sweeps", sweeps.as_slice()),
            ("residual", residuals.as_slice()),
        ],
    )
}
