//! Initial spatial profiles.

use nalgebra::DVector;

use super::variable::Constraints;
use crate::config::SeedDef;
use crate::discretization::domain::Domain;
use crate::error::BuildError;

const DEFAULT_LOGNORMAL_SHAPE: f64 = 1.25;

struct Params<'a> {
    path: &'a str,
    def: &'a SeedDef,
}

impl Params<'_> {
    fn invalid(&self, reason: impl Into<String>) -> BuildError {
        BuildError::InvalidSeedProfile {
            path: self.path.to_string(),
            reason: reason.into(),
        }
    }

    /// Value in base units; lengths default to millimetres.
    fn get(&self, name: &str, default_unit: &str) -> Result<Option<f64>, BuildError> {
        self.def
            .params
            .get(name)
            .map(|q| {
                q.to_base_or(default_unit)
                    .map_err(|e| self.invalid(format!("{name}: {e}")))
            })
            .transpose()
    }

    fn require(&self, name: &str, default_unit: &str) -> Result<f64, BuildError> {
        self.get(name, default_unit)?.ok_or_else(|| {
            self.invalid(format!(
                "profile `{}` requires parameter `{name}`",
                self.def.profile
            ))
        })
    }
}

/// Produce the seeded field for a variable.
///
/// Deterministic: the same profile, parameters and domain always produce the
/// same values.
pub fn seed(
    path: &str,
    def: &SeedDef,
    constraints: &Constraints,
    domain: &Domain,
) -> Result<DVector<f64>, BuildError> {
    let p = Params { path, def };
    let n = domain.num_cells();
    let depths = &domain.depths;

    match def.profile.as_str() {
        "linear" => {
            let start = match p.get("start", "")? {
                Some(v) => v,
                None => constraints.top.ok_or_else(|| {
                    p.invalid("linear profile needs `start` or a `top` constraint")
                })?,
            };
            let stop = match p.get("stop", "")? {
                Some(v) => v,
                None => constraints.bottom.ok_or_else(|| {
                    p.invalid("linear profile needs `stop` or a `bottom` constraint")
                })?,
            };
            let span = (n.max(2) - 1) as f64;
            Ok(DVector::from_fn(n, |i, _| {
                start + (stop - start) * i as f64 / span
            }))
        }
        "normal" => {
            let loc = p.require("loc", "mm")?;
            let scale = p.require("scale", "mm")?;
            let coeff = p.require("coeff", "")?;
            if !(scale > 0.0) {
                return Err(p.invalid("`scale` must be positive"));
            }
            Ok(depths.map(|z| {
                let u = (z - loc) / scale;
                coeff * (-0.5 * u * u).exp()
            }))
        }
        "lognormal" => {
            let loc = p.require("loc", "mm")?;
            let scale = p.require("scale", "mm")?;
            let coeff = p.require("coeff", "")?;
            let shape = p.get("shape", "")?.unwrap_or(DEFAULT_LOGNORMAL_SHAPE);
            if !(scale > 0.0 && shape > 0.0) {
                return Err(p.invalid("`scale` and `shape` must be positive"));
            }
            let density = |x: f64| {
                let l = (x / scale).ln();
                (-(l * l) / (2.0 * shape * shape)).exp() / x
            };
            let mode = scale * (-shape * shape).exp();
            let peak = density(mode);
            Ok(depths.map(|z| {
                let x = z - loc;
                if x > 0.0 {
                    coeff * density(x) / peak
                } else {
                    0.0
                }
            }))
        }
        other => Err(p.invalid(format!("unknown profile `{other}`"))),
    }
}
