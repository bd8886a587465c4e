//! Physical quantities at the configuration boundary.
//!
//! Configuration values may carry a unit (`"0.3e-3 mol/l"`, `"24 h"`,
//! `"1.5 cm**2/s"`). Everything past the loader works on plain numbers in
//! the base system: metre, second, mole, gram (litre = 1e-3 m³).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("cannot parse quantity `{0}`")]
    BadQuantity(String),
    #[error("unknown unit symbol `{symbol}` in `{unit}`")]
    UnknownSymbol { symbol: String, unit: String },
    #[error("malformed unit expression `{0}`")]
    Malformed(String),
}

/// A number with an (optional) unit string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuantityRepr")]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Number(f64),
    Text(String),
    Map {
        value: f64,
        #[serde(default)]
        unit: String,
    },
}

impl TryFrom<QuantityRepr> for Quantity {
    type Error = UnitError;

    fn try_from(repr: QuantityRepr) -> Result<Self, Self::Error> {
        let q = match repr {
            QuantityRepr::Number(value) => Quantity::dimensionless(value),
            QuantityRepr::Text(text) => Quantity::parse(&text)?,
            QuantityRepr::Map { value, unit } => Quantity::new(value, unit),
        };
        // Reject unknown units at load time rather than at first use.
        unit_factor(&q.unit)?;
        Ok(q)
    }
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    pub fn dimensionless(value: f64) -> Self {
        Self::new(value, "")
    }

    /// Parse `"<number> <unit>"`. A bare number is dimensionless.
    pub fn parse(text: &str) -> Result<Self, UnitError> {
        let text = text.trim();
        let (number, unit) = match text.find(char::is_whitespace) {
            Some(pos) => (&text[..pos], text[pos..].trim()),
            None => (text, ""),
        };
        let value = number
            .parse::<f64>()
            .map_err(|_| UnitError::BadQuantity(text.to_string()))?;
        Ok(Self::new(value, unit))
    }

    /// Value converted to base units.
    pub fn to_base(&self) -> Result<f64, UnitError> {
        Ok(self.value * unit_factor(&self.unit)?)
    }

    /// Value in base units, treating a missing unit as `default_unit`.
    ///
    /// Used where the original configuration format implies a unit, e.g.
    /// hours for total simulation time.
    pub fn to_base_or(&self, default_unit: &str) -> Result<f64, UnitError> {
        if self.unit.is_empty() {
            Ok(self.value * unit_factor(default_unit)?)
        } else {
            self.to_base()
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.unit)
        }
    }
}

fn symbol_factor(symbol: &str) -> Option<f64> {
    let factor = match symbol {
        "" | "1" => 1.0,
        "m" => 1.0,
        "km" => 1e3,
        "cm" => 1e-2,
        "mm" => 1e-3,
        "um" | "µm" | "micron" => 1e-6,
        "nm" => 1e-9,
        "s" | "sec" => 1.0,
        "min" => 60.0,
        "h" | "hr" | "hour" => 3600.0,
        "d" | "day" => 86400.0,
        "mol" => 1.0,
        "mmol" => 1e-3,
        "umol" | "µmol" => 1e-6,
        "nmol" => 1e-9,
        "g" => 1.0,
        "kg" => 1e3,
        "mg" => 1e-3,
        "ug" | "µg" => 1e-6,
        "l" | "L" | "liter" => 1e-3,
        "ml" | "mL" => 1e-6,
        "W" | "J" | "K" => 1.0,
        _ => return None,
    };
    Some(factor)
}

/// Conversion factor from `unit` to base units.
///
/// Accepts products and quotients of symbols with integer powers written as
/// `**n` or `^n`, e.g. `mol/g/h`, `cm**2/s`, `1/cm`.
pub fn unit_factor(unit: &str) -> Result<f64, UnitError> {
    let compact: String = unit.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(1.0);
    }
    let normalized = compact.replace("**", "^");

    let mut factor = 1.0;
    let mut dividing = false;
    let mut rest = normalized.as_str();
    loop {
        let end = rest.find(['*', '/']).unwrap_or(rest.len());
        let (term, tail) = rest.split_at(end);
        if term.is_empty() {
            return Err(UnitError::Malformed(unit.to_string()));
        }

        let (symbol, power) = match term.split_once('^') {
            Some((s, p)) => (
                s,
                p.parse::<i32>()
                    .map_err(|_| UnitError::Malformed(unit.to_string()))?,
            ),
            None => (term, 1),
        };
        let base = symbol_factor(symbol).ok_or_else(|| UnitError::UnknownSymbol {
            symbol: symbol.to_string(),
            unit: unit.to_string(),
        })?;
        let scaled = base.powi(power);
        if dividing {
            factor /= scaled;
        } else {
            factor *= scaled;
        }

        match tail.chars().next() {
            None => break,
            Some(op) => {
                dividing = op == '/';
                rest = &tail[1..];
            }
        }
    }
    Ok(factor)
}
