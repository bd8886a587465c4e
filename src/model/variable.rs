use nalgebra::DVector;

use super::seed;
use crate::config::{SeedDef, VariableDef};
use crate::discretization::domain::Domain;
use crate::error::BuildError;
use crate::expression::FieldId;
use crate::units::Quantity;

/// Boundary and region constraints, in base units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub top: Option<f64>,
    pub bottom: Option<f64>,
    pub dbl: Option<f64>,
    pub sediment: Option<f64>,
    /// Inward flux through the top face.
    pub top_flux: Option<f64>,
    /// Inward flux through the bottom face.
    pub bottom_flux: Option<f64>,
}

impl Constraints {
    /// Whether cell `i` is held at a fixed value, and which.
    pub fn region_value(&self, domain: &Domain, i: usize) -> Option<f64> {
        if i < domain.idx_surface() {
            self.dbl
        } else {
            self.sediment
        }
    }
}

/// A scalar field over the mesh, as declared in the definition.
#[derive(Debug, Clone)]
pub struct Variable {
    pub path: String,
    pub field: FieldId,
    pub unit: String,
    pub initial: f64,
    pub has_previous_value: bool,
    pub clip_min: Option<f64>,
    pub clip_max: Option<f64>,
    pub constraints: Constraints,
    pub seed: Option<SeedDef>,
}

fn base(path: &str, q: &Option<Quantity>) -> Result<Option<f64>, BuildError> {
    q.as_ref()
        .map(|q| q.to_base().map_err(BuildError::unit(path)))
        .transpose()
}

impl Variable {
    pub fn from_def(path: &str, field: FieldId, def: &VariableDef) -> Result<Self, BuildError> {
        let c = &def.constraints;
        let constraints = Constraints {
            top: base(path, &c.top)?,
            bottom: base(path, &c.bottom)?,
            dbl: base(path, &c.dbl)?,
            sediment: base(path, &c.sediment)?,
            top_flux: base(path, &c.top_flux)?,
            bottom_flux: base(path, &c.bottom_flux)?,
        };
        if constraints.top.is_some() && constraints.top_flux.is_some() {
            return Err(BuildError::InvalidConstraint {
                path: path.to_string(),
                reason: "both a value and a flux on the top boundary".into(),
            });
        }
        if constraints.bottom.is_some() && constraints.bottom_flux.is_some() {
            return Err(BuildError::InvalidConstraint {
                path: path.to_string(),
                reason: "both a value and a flux on the bottom boundary".into(),
            });
        }

        let clip_min = base(path, &def.clip_min)?;
        let clip_max = base(path, &def.clip_max)?;
        if let (Some(lo), Some(hi)) = (clip_min, clip_max) {
            if lo > hi {
                return Err(BuildError::InvalidConstraint {
                    path: path.to_string(),
                    reason: format!("clip_min {lo} exceeds clip_max {hi}"),
                });
            }
        }

        Ok(Self {
            path: path.to_string(),
            field,
            unit: def.value.unit.clone(),
            initial: def.value.to_base().map_err(BuildError::unit(path))?,
            has_previous_value: def.has_previous_value,
            clip_min,
            clip_max,
            constraints,
            seed: def.seed.clone(),
        })
    }

    /// Initial value everywhere, then the seed profile, then region
    /// constraints.
    pub fn initial_field(&self, domain: &Domain) -> Result<DVector<f64>, BuildError> {
        let mut values = match &self.seed {
            Some(profile) => seed::seed(&self.path, profile, &self.constraints, domain)?,
            None => DVector::from_element(domain.num_cells(), self.initial),
        };
        self.apply_region_constraints(domain, &mut values);
        self.clip(&mut values);
        Ok(values)
    }

    pub fn apply_region_constraints(&self, domain: &Domain, values: &mut DVector<f64>) {
        for (i, v) in values.iter_mut().enumerate() {
            if let Some(fixed) = self.constraints.region_value(domain, i) {
                *v = fixed;
            }
        }
    }

    pub fn clip(&self, values: &mut DVector<f64>) {
        if self.clip_min.is_none() && self.clip_max.is_none() {
            return;
        }
        let lo = self.clip_min.unwrap_or(f64::NEG_INFINITY);
        let hi = self.clip_max.unwrap_or(f64::INFINITY);
        values.apply(|v| *v = v.clamp(lo, hi));
    }
}
