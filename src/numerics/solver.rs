//! The contract between the simulation clock and a linear-solve backend.

use thiserror::Error;

use super::Convergence;
use crate::discretization::domain::Domain;
use crate::model::equation::CoupledEquation;
use crate::model::fields::FieldSet;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("linear solve failed for equation `{0}`")]
    LinearSolveFailed(String),
    #[error("equation `{0}` produced non-finite values")]
    NonFinite(String),
}

/// The equations solved together in one step.
pub struct CoupledSystem<'a> {
    pub equations: &'a [CoupledEquation],
    pub domain: &'a Domain,
}

pub struct SweepControl {
    pub max_sweeps: usize,
    pub convergence: Convergence,
}

pub struct StepOutcome {
    /// Field values at the end of the step.
    pub fields: FieldSet,
    pub sweeps: usize,
    /// Largest equation residual of the last sweep.
    pub residual: f64,
    pub converged: bool,
    /// Equation with the largest residual of the last sweep.
    pub worst_equation: Option<String>,
}

/// Advances every equation of `system` over one step of length `dt`.
///
/// `fields` holds the state at the start of the step with time-driven
/// fields already moved to the end of the step. A backend reports
/// non-convergence through [`StepOutcome::converged`]; errors are reserved
/// for failures that make the step meaningless.
pub trait SolverBackend {
    fn solve_step(
        &self,
        system: &CoupledSystem<'_>,
        fields: &FieldSet,
        dt: f64,
        control: &SweepControl,
    ) -> Result<StepOutcome, SolverError>;
}
