//! Error taxonomy for model construction and for running a model.

use thiserror::Error;

use crate::expression::parser::ParseError;
use crate::numerics::solver::SolverError;
use crate::units::UnitError;

/// Everything that can go wrong while turning a definition into a model.
///
/// Any of these aborts construction; no partially built model is returned.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unresolved symbol `{symbol}` in {path}: `{formula}`")]
    UnresolvedSymbol {
        symbol: String,
        path: String,
        formula: String,
    },
    #[error("cyclic definition of `{symbol}` in {path}")]
    CyclicDefinition { symbol: String, path: String },
    #[error("invalid seed profile for {path}: {reason}")]
    InvalidSeedProfile { path: String, reason: String },
    #[error("equation `{equation}`: term `{term}` has a zero coefficient")]
    ZeroCoefficientTerm { equation: String, term: String },
    #[error("cannot parse formula of {path}: `{formula}`: {source}")]
    Parse {
        path: String,
        formula: String,
        #[source]
        source: ParseError,
    },
    #[error("`{function}` in {path} takes {expected} argument(s), got {found}")]
    ArityMismatch {
        function: String,
        path: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid unit in {path}: {source}")]
    Unit {
        path: String,
        #[source]
        source: UnitError,
    },
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("invalid irradiance: {0}")]
    InvalidIrradiance(String),
    #[error("invalid constraint on {path}: {reason}")]
    InvalidConstraint { path: String, reason: String },
    #[error("duplicate entity {0}")]
    DuplicateEntity(String),
    #[error("invalid entity name `{0}`")]
    InvalidName(String),
    #[error("microbial group `{0}` has no `biomass` feature")]
    MissingBiomass(String),
    #[error("equation `{equation}` lists source {path} more than once")]
    DuplicateSource { equation: String, path: String },
    #[error("equation `{equation}`: transient variable {variable} does not keep a previous value")]
    TransientWithoutHistory { equation: String, variable: String },
    #[error("equation `{equation}`: {path} {reason}")]
    InvalidTerm {
        equation: String,
        path: String,
        reason: String,
    },
}

impl BuildError {
    pub(crate) fn unit(path: impl Into<String>) -> impl FnOnce(UnitError) -> BuildError {
        let path = path.into();
        move |source| BuildError::Unit { path, source }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while stepping or resuming a built model.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "equation `{equation}` did not converge at t = {time:.6e} s with dt = {step_size:.3e} s (residual {residual:.3e})"
    )]
    StepNotConverged {
        equation: String,
        time: f64,
        step_size: f64,
        residual: f64,
    },
    #[error(
        "simulation diverged after t = {time:.6e} s; step size {step_size:.3e} s fell below the floor"
    )]
    SimulationDiverged {
        time: f64,
        step_size: f64,
        attempts: Vec<f64>,
    },
    #[error("snapshot index {index} out of range for {len} stored snapshot(s)")]
    SnapshotIndexOutOfRange { index: isize, len: usize },
    #[error("snapshot does not match the model: {0}")]
    SnapshotMismatch(String),
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("observer output failed: {0}")]
    Output(#[from] std::io::Error),
    #[error(transparent)]
    Solver(#[from] SolverError),
}
