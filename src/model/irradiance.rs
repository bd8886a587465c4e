//! Diel light clock and per-channel attenuation through the column.

use std::f64::consts::PI;

use nalgebra::DVector;

use super::fields::FieldSet;
use crate::config::IrradianceDef;
use crate::discretization::domain::Domain;
use crate::error::BuildError;
use crate::expression::{CompiledTerm, FieldId};

/// Adds `coeff * value` of another entity to a channel's attenuation.
#[derive(Debug, Clone)]
pub struct AttenuationModifier {
    pub path: String,
    pub coeff: f64,
    pub term: CompiledTerm,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    /// Base attenuation coefficient in the sediment (1/m); zero in the DBL.
    pub k0: f64,
    /// Intensity field.
    pub field: FieldId,
    /// Total attenuation coefficient field, `<name>_k`.
    pub k_field: FieldId,
    pub modifiers: Vec<AttenuationModifier>,
}

#[derive(Debug, Clone)]
pub struct Irradiance {
    pub path: String,
    /// Diel period (s).
    pub hours_total: f64,
    pub day_fraction: f64,
    pub zenith_level: f64,
    pub channels: Vec<Channel>,
}

impl Irradiance {
    pub fn new(path: &str, def: &IrradianceDef) -> Result<Self, BuildError> {
        let hours_total = def
            .hours_total
            .to_base_or("h")
            .map_err(BuildError::unit(path))?;
        let hours = hours_total / 3600.0;
        if !(2.0..=48.0).contains(&hours) {
            return Err(BuildError::InvalidIrradiance(format!(
                "hours_total must lie in [2, 48] h, got {hours} h"
            )));
        }
        if !(0.0 < def.day_fraction && def.day_fraction < 1.0) {
            return Err(BuildError::InvalidIrradiance(format!(
                "day_fraction must lie in (0, 1), got {}",
                def.day_fraction
            )));
        }
        if !(def.zenith_level > 0.0) {
            return Err(BuildError::InvalidIrradiance(format!(
                "zenith_level must be positive, got {}",
                def.zenith_level
            )));
        }
        Ok(Self {
            path: path.to_string(),
            hours_total,
            day_fraction: def.day_fraction,
            zenith_level: def.zenith_level,
            channels: Vec::new(),
        })
    }

    /// Length of the illuminated window (s).
    pub fn day_length(&self) -> f64 {
        self.day_fraction * self.hours_total
    }

    /// Clock time of the zenith within each period (s).
    pub fn zenith_time(&self) -> f64 {
        self.day_length()
    }

    /// Surface intensity at simulated time `t` (s).
    ///
    /// Each period starts at midnight. Dawn comes half a day length later;
    /// the intensity then rises as `sin²` to `zenith_level` at
    /// [`zenith_time`](Self::zenith_time) and falls back to zero at dusk.
    pub fn surface_intensity(&self, t: f64) -> f64 {
        let day = self.day_length();
        let since_dawn = (t - 0.5 * day).rem_euclid(self.hours_total);
        if since_dawn >= day {
            return 0.0;
        }
        let s = (PI * since_dawn / day).sin();
        self.zenith_level * s * s
    }

    /// Attenuation coefficient profile of one channel.
    pub fn attenuation(&self, channel: &Channel, domain: &Domain, fields: &FieldSet) -> DVector<f64> {
        let mut k = &domain.sediment_mask * channel.k0;
        for m in &channel.modifiers {
            k += m.term.evaluate(fields) * m.coeff;
        }
        k
    }

    /// Recompute `k` and intensity fields of every channel at time `t`.
    pub fn update(&self, t: f64, domain: &Domain, fields: &mut FieldSet) {
        let surface = self.surface_intensity(t);
        for channel in &self.channels {
            let k = self.attenuation(channel, domain, fields);
            let mut remaining = 1.0;
            let intensity = DVector::from_fn(k.len(), |i, _| {
                remaining *= (-k[i] * domain.cell_size).exp();
                surface * remaining
            });
            fields.set(channel.k_field, k);
            fields.set(channel.field, intensity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainDef;
    use crate::model::fields::FieldRole;
    use crate::units::Quantity;
    use approx::assert_relative_eq;

    fn light(hours: f64, fraction: f64) -> Irradiance {
        Irradiance::new(
            "env.irradiance",
            &IrradianceDef {
                hours_total: Quantity::new(hours, "h"),
                day_fraction: fraction,
                zenith_level: 100.0,
                channels: Vec::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn dark_outside_the_day_window_and_periodic() {
        let irr = light(24.0, 0.5);
        let h = 3600.0;
        assert_eq!(irr.zenith_time(), 12.0 * h);
        assert_eq!(irr.surface_intensity(0.0), 0.0);
        assert_eq!(irr.surface_intensity(6.0 * h), 0.0);
        assert_relative_eq!(irr.surface_intensity(12.0 * h), 100.0);
        assert_relative_eq!(irr.surface_intensity(9.0 * h), 50.0, max_relative = 1e-12);
        assert_eq!(irr.surface_intensity(18.0 * h), 0.0);
        assert_eq!(irr.surface_intensity(20.0 * h), 0.0);
        for t in [1.0, 7.25, 11.9, 16.5] {
            assert_relative_eq!(
                irr.surface_intensity(t * h),
                irr.surface_intensity((t + 24.0) * h),
                max_relative = 1e-9
            );
        }
    }

    #[test]
    fn continuous_at_window_edges() {
        let eps = 1e-3;
        for (hours, fraction) in [(16.0, 0.25), (3.0, 0.5), (24.0, 0.8)] {
            let irr = light(hours, fraction);
            let day = irr.day_length();
            for edge in [0.5 * day, 1.5 * day] {
                assert!(irr.surface_intensity(edge - eps) < 1e-6);
                assert!(irr.surface_intensity(edge + eps) < 1e-6);
            }
            assert_relative_eq!(irr.surface_intensity(day), 100.0);
        }
    }

    #[test]
    fn night_integrates_to_zero() {
        let irr = light(24.0, 0.4);
        let dt = 60.0;
        let (dawn, dusk) = (0.5 * irr.day_length(), 1.5 * irr.day_length());
        let night: f64 = (0..)
            .map(|i| i as f64 * dt)
            .take_while(|&t| t < irr.hours_total)
            .filter(|&t| t <= dawn || t >= dusk)
            .map(|t| irr.surface_intensity(t) * dt)
            .sum();
        assert_eq!(night, 0.0);
        let day: f64 = (0..)
            .map(|i| dawn + i as f64 * dt)
            .take_while(|&t| t < dusk)
            .map(|t| irr.surface_intensity(t) * dt)
            .sum();
        // Mean of sin² over the window is 1/2.
        assert_relative_eq!(day, 50.0 * irr.day_length(), max_relative = 1e-3);
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let def = |hours: f64, fraction: f64| IrradianceDef {
            hours_total: Quantity::new(hours, "h"),
            day_fraction: fraction,
            zenith_level: 100.0,
            channels: Vec::new(),
        };
        assert!(Irradiance::new("i", &def(1.5, 0.5)).is_err());
        assert!(Irradiance::new("i", &def(48.5, 0.5)).is_err());
        assert!(Irradiance::new("i", &def(24.0, 1.0)).is_err());
        assert!(Irradiance::new("i", &def(2.0, 0.5)).is_ok());
        assert!(Irradiance::new("i", &def(3.0, 0.5)).is_ok());
        assert!(Irradiance::new("i", &def(48.0, 0.5)).is_ok());
    }

    #[test]
    fn beer_lambert_attenuation_in_sediment_only() {
        let domain = Domain::new(&DomainDef {
            cell_size: Quantity::new(0.1, "mm"),
            sediment_length: Quantity::new(1.0, "mm"),
            dbl_length: Quantity::new(0.3, "mm"),
            porosity: Default::default(),
        })
        .unwrap();
        let n = domain.num_cells();
        let mut fields = FieldSet::new(n);
        let field = fields.insert("env.irradiance.par", FieldRole::Irradiance, DVector::zeros(n));
        let k_field = fields.insert("env.irradiance.par_k", FieldRole::Irradiance, DVector::zeros(n));

        let mut irr = light(24.0, 0.5);
        irr.channels.push(Channel {
            name: "par".into(),
            k0: 1000.0,
            field,
            k_field,
            modifiers: Vec::new(),
        });
        irr.update(12.0 * 3600.0, &domain, &mut fields);

        let par = fields.get(field);
        assert_relative_eq!(par[0], 100.0);
        assert_relative_eq!(par[2], 100.0);
        let step = (-1000.0 * domain.cell_size).exp();
        assert_relative_eq!(par[3], 100.0 * step, max_relative = 1e-12);
        assert_relative_eq!(par[n - 1], 100.0 * step.powi(10), max_relative = 1e-12);
        assert_eq!(fields.get(k_field)[0], 0.0);
    }
}
