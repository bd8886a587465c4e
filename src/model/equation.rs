//! Assembly of named equations into coupled transient / diffusion / source
//! definitions, one per solved variable.

use std::sync::Arc;

use nalgebra::DVector;
use serde::Serialize;
use tracing::{debug, warn};

use super::fields::FieldSet;
use super::variable::{Constraints, Variable};
use crate::config::{EquationDef, TermRef};
use crate::discretization::domain::Domain;
use crate::discretization::mesh::Boundary;
use crate::error::BuildError;
use crate::expression::{CompiledTerm, FieldId, FieldSource};

/// How a source enters the linear system of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    /// Linearized around the current iterate: `S ≈ S0 + S1 * v`.
    Implicit,
    /// Evaluated at the current iterate and held fixed.
    Explicit,
}

#[derive(Debug, Clone)]
pub struct SourceTerm {
    pub path: String,
    pub coeff: f64,
    pub term: Arc<CompiledTerm>,
    pub cast: Cast,
}

impl SourceTerm {
    /// `(S0, S1)` with `coeff * S ≈ S0 + S1 * v` in one cell.
    pub fn linearize(&self, fields: &impl FieldSource, cell: usize, variable: FieldId) -> (f64, f64) {
        match self.cast {
            Cast::Explicit => (self.coeff * self.term.eval_cell(fields, cell), 0.0),
            Cast::Implicit => {
                let (s, ds) = self.term.eval_with_derivative(fields, cell, variable);
                let v = fields.cell_value(variable, cell);
                (self.coeff * (s - ds * v), self.coeff * ds)
            }
        }
    }

    pub fn rate(&self, fields: &impl FieldSource) -> DVector<f64> {
        self.term.evaluate(fields) * self.coeff
    }
}

#[derive(Debug, Clone)]
pub struct DiffusionTerm {
    pub path: String,
    pub coeff: f64,
    pub term: CompiledTerm,
}

/// What the assembler needs from the model to resolve term paths.
pub trait TermLookup {
    /// The variable a transient path refers to.
    fn variable(&self, equation: &str, path: &str) -> Result<&Variable, BuildError>;
    /// The compiled term behind a path, with its `implicit` override.
    fn term(
        &self,
        equation: &str,
        path: &str,
    ) -> Result<(Arc<CompiledTerm>, Option<bool>), BuildError>;
}

#[derive(Debug, Clone)]
pub struct CoupledEquation {
    pub name: String,
    pub variable: FieldId,
    pub variable_path: String,
    pub transient_coeff: f64,
    pub diffusion: Option<DiffusionTerm>,
    pub sources: Vec<SourceTerm>,
    pub constraints: Constraints,
    pub clip_min: Option<f64>,
    pub clip_max: Option<f64>,
    pub track_budget: bool,
}

fn check_coeff(equation: &str, term: &TermRef) -> Result<f64, BuildError> {
    let coeff = term.coeff();
    if coeff == 0.0 {
        return Err(BuildError::ZeroCoefficientTerm {
            equation: equation.to_string(),
            term: term.path().to_string(),
        });
    }
    if !coeff.is_finite() {
        return Err(BuildError::InvalidTerm {
            equation: equation.to_string(),
            path: term.path().to_string(),
            reason: format!("has a non-finite coefficient {coeff}"),
        });
    }
    Ok(coeff)
}

/// Implicit only for terms that depend on the solved variable; a manual
/// `implicit` flag overrides the automatic classification.
fn cast_for(
    equation: &str,
    path: &str,
    term: &CompiledTerm,
    implicit: Option<bool>,
    variable: FieldId,
) -> Cast {
    if !term.depends_on(variable) {
        return Cast::Explicit;
    }
    match implicit {
        Some(false) => Cast::Explicit,
        Some(true) => {
            if !term.is_differentiable() {
                warn!(
                    equation,
                    source = path,
                    formula = %term.formula,
                    "implicit treatment forced on a non-differentiable term"
                );
            }
            Cast::Implicit
        }
        None if term.is_differentiable() => Cast::Implicit,
        None => Cast::Explicit,
    }
}

impl CoupledEquation {
    pub fn assemble(
        name: &str,
        def: &EquationDef,
        lookup: &dyn TermLookup,
    ) -> Result<Self, BuildError> {
        let transient_coeff = check_coeff(name, &def.transient)?;
        let diffusion_coeff = def
            .diffusion
            .as_ref()
            .map(|d| check_coeff(name, d))
            .transpose()?;
        let source_coeffs = def
            .sources
            .iter()
            .map(|s| check_coeff(name, s))
            .collect::<Result<Vec<_>, _>>()?;

        if def.diffusion.is_none() && def.sources.is_empty() {
            return Err(BuildError::InvalidTerm {
                equation: name.to_string(),
                path: def.transient.path().to_string(),
                reason: "equation needs a diffusion term or at least one source".into(),
            });
        }

        let variable = lookup.variable(name, def.transient.path())?;
        if !variable.has_previous_value {
            return Err(BuildError::TransientWithoutHistory {
                equation: name.to_string(),
                variable: variable.path.clone(),
            });
        }

        let diffusion = match (&def.diffusion, diffusion_coeff) {
            (Some(d), Some(coeff)) => {
                let (term, _) = lookup.term(name, d.path())?;
                Some(DiffusionTerm {
                    path: d.path().to_string(),
                    coeff,
                    term: term.as_ref().clone(),
                })
            }
            _ => None,
        };

        let mut sources: Vec<SourceTerm> = Vec::with_capacity(def.sources.len());
        for (source, coeff) in def.sources.iter().zip(source_coeffs) {
            let path = source.path();
            if sources.iter().any(|s| s.path == path) {
                return Err(BuildError::DuplicateSource {
                    equation: name.to_string(),
                    path: path.to_string(),
                });
            }
            let (term, implicit) = lookup.term(name, path)?;
            let cast = cast_for(name, path, &term, implicit, variable.field);
            debug!(equation = name, source = path, coeff, ?cast, "assembled source");
            sources.push(SourceTerm {
                path: path.to_string(),
                coeff,
                term,
                cast,
            });
        }

        Ok(Self {
            name: name.to_string(),
            variable: variable.field,
            variable_path: variable.path.clone(),
            transient_coeff,
            diffusion,
            sources,
            constraints: variable.constraints.clone(),
            clip_min: variable.clip_min,
            clip_max: variable.clip_max,
            track_budget: def.track_budget,
        })
    }

    pub fn implicit_sources(&self) -> impl Iterator<Item = &SourceTerm> {
        self.sources.iter().filter(|s| s.cast == Cast::Implicit)
    }

    pub fn explicit_sources(&self) -> impl Iterator<Item = &SourceTerm> {
        self.sources.iter().filter(|s| s.cast == Cast::Explicit)
    }

    pub fn source(&self, path: &str) -> Option<&SourceTerm> {
        self.sources.iter().find(|s| s.path == path)
    }

    pub fn clip(&self, values: &mut DVector<f64>) {
        if self.clip_min.is_none() && self.clip_max.is_none() {
            return;
        }
        let lo = self.clip_min.unwrap_or(f64::NEG_INFINITY);
        let hi = self.clip_max.unwrap_or(f64::INFINITY);
        values.apply(|v| *v = v.clamp(lo, hi));
    }

    /// Total weighted source rate per cell.
    pub fn source_rate(&self, fields: &impl FieldSource) -> DVector<f64> {
        self.sources
            .iter()
            .fold(DVector::zeros(fields.num_cells()), |acc, s| acc + s.rate(fields))
    }

    /// Effective diffusivity per cell, if the equation has a diffusion term.
    pub fn diffusivity(&self, fields: &impl FieldSource) -> Option<DVector<f64>> {
        self.diffusion
            .as_ref()
            .map(|d| d.term.evaluate(fields) * d.coeff)
    }

    /// Inward flux through one end of the column.
    pub fn boundary_flux(
        &self,
        which: Boundary,
        fields: &FieldSet,
        diffusivity: Option<&DVector<f64>>,
        domain: &Domain,
    ) -> f64 {
        let mesh = &domain.mesh;
        let Some((_, face)) = mesh.boundary_face(which) else {
            return 0.0;
        };
        let (value, flux) = match which {
            Boundary::Top => (self.constraints.top, self.constraints.top_flux),
            Boundary::Bottom => (self.constraints.bottom, self.constraints.bottom_flux),
        };
        if let Some(q) = flux {
            return q * face.area;
        }
        match (value, diffusivity) {
            (Some(g), Some(d)) => {
                let cell = face.neighbor_cell_ids.0;
                let v = fields.get(self.variable)[cell];
                d[cell] * face.area * (g - v) / mesh.face_distance(face)
            }
            _ => 0.0,
        }
    }
}

/// Running mass balance of one equation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Budget {
    pub initial_quantity: f64,
    pub quantity: f64,
    /// Time-integrated source total.
    pub sources: f64,
    /// Time-integrated inward boundary transport.
    pub transport: f64,
}

impl Budget {
    fn rates(eq: &CoupledEquation, fields: &FieldSet, domain: &Domain) -> (f64, f64) {
        let source = domain.integrate(&eq.source_rate(fields));
        let d = eq.diffusivity(fields);
        let transport = eq.boundary_flux(Boundary::Top, fields, d.as_ref(), domain)
            + eq.boundary_flux(Boundary::Bottom, fields, d.as_ref(), domain);
        (source, transport)
    }

    fn quantity(eq: &CoupledEquation, fields: &FieldSet, domain: &Domain) -> f64 {
        eq.transient_coeff * domain.integrate(fields.get(eq.variable))
    }

    pub fn start(eq: &CoupledEquation, fields: &FieldSet, domain: &Domain) -> Self {
        let quantity = Self::quantity(eq, fields, domain);
        Self {
            initial_quantity: quantity,
            quantity,
            sources: 0.0,
            transport: 0.0,
        }
    }

    /// Update after an accepted step of length `dt`, charging the end-of-step
    /// rates over the whole step as the backward Euler solve does.
    pub fn record(&mut self, eq: &CoupledEquation, fields: &FieldSet, domain: &Domain, dt: f64) {
        let (source, transport) = Self::rates(eq, fields, domain);
        self.sources += source * dt;
        self.transport += transport * dt;
        self.quantity = Self::quantity(eq, fields, domain);
    }

    /// Change in quantity not explained by sources and transport.
    pub fn imbalance(&self) -> f64 {
        (self.quantity - self.initial_quantity) - (self.sources + self.transport)
    }
}
