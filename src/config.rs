//! Typed model definitions, loaded from YAML.
//!
//! The loader only checks shape. Semantic checks (symbol resolution,
//! coefficients, cycles) happen when the definition is built into a
//! [`Model`](crate::model::Model).

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::units::Quantity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse definition: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A complete model plus its run parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDefinition {
    #[serde(default)]
    pub domain: DomainDef,
    /// Shared namespace functions, visible to every process.
    #[serde(default)]
    pub formulae: IndexMap<String, FunctionDef>,
    #[serde(default)]
    pub environment: IndexMap<String, EnvEntry>,
    #[serde(default)]
    pub microbes: IndexMap<String, MicrobialGroupDef>,
    #[serde(default)]
    pub equations: IndexMap<String, EquationDef>,
    #[serde(default)]
    pub simulation: SimulationDef,
}

impl ModelDefinition {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainDef {
    #[serde(default = "default_cell_size")]
    pub cell_size: Quantity,
    #[serde(default = "default_sediment_length")]
    pub sediment_length: Quantity,
    #[serde(default = "default_dbl_length")]
    pub dbl_length: Quantity,
    #[serde(default)]
    pub porosity: PorosityDef,
}

impl Default for DomainDef {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            sediment_length: default_sediment_length(),
            dbl_length: default_dbl_length(),
            porosity: PorosityDef::default(),
        }
    }
}

fn default_cell_size() -> Quantity {
    Quantity::new(0.1, "mm")
}

fn default_sediment_length() -> Quantity {
    Quantity::new(10.0, "mm")
}

fn default_dbl_length() -> Quantity {
    Quantity::new(1.0, "mm")
}

/// Sediment porosity, either uniform or varying linearly with depth.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PorosityDef {
    Uniform(f64),
    Linear { top: f64, bottom: f64 },
}

impl Default for PorosityDef {
    fn default() -> Self {
        PorosityDef::Uniform(0.6)
    }
}

/// A reusable function: `saturation(x, Km): x / (x + Km)`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDef {
    #[serde(default)]
    pub vars: Vec<String>,
    pub expr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cls")]
pub enum EnvEntry {
    Variable(VariableDef),
    Process(ProcessDef),
    Irradiance(IrradianceDef),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDef {
    /// Initial value, before seeding and constraints.
    #[serde(default = "zero", alias = "initial")]
    pub value: Quantity,
    #[serde(default, alias = "hasOld")]
    pub has_previous_value: bool,
    #[serde(default)]
    pub clip_min: Option<Quantity>,
    #[serde(default)]
    pub clip_max: Option<Quantity>,
    #[serde(default)]
    pub constraints: ConstraintsDef,
    #[serde(default)]
    pub seed: Option<SeedDef>,
}

fn zero() -> Quantity {
    Quantity::dimensionless(0.0)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintsDef {
    pub top: Option<Quantity>,
    pub bottom: Option<Quantity>,
    pub dbl: Option<Quantity>,
    pub sediment: Option<Quantity>,
    pub top_flux: Option<Quantity>,
    pub bottom_flux: Option<Quantity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedDef {
    pub profile: String,
    #[serde(default)]
    pub params: IndexMap<String, Quantity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessDef {
    pub formula: FormulaDef,
    #[serde(default)]
    pub params: IndexMap<String, Quantity>,
    #[serde(default)]
    pub namespace: IndexMap<String, FunctionDef>,
    #[serde(default)]
    pub derived: IndexMap<String, String>,
    #[serde(default)]
    pub implicit: Option<bool>,
    #[serde(default)]
    pub events: IndexMap<String, EventDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FormulaDef {
    Plain(String),
    Piecewise {
        #[serde(default)]
        base: Option<String>,
        pieces: Vec<PieceDef>,
    },
}

impl FormulaDef {
    /// Human-readable form, used in error messages.
    pub fn display(&self) -> String {
        match self {
            FormulaDef::Plain(text) => text.clone(),
            FormulaDef::Piecewise { base, pieces } => {
                let body: Vec<String> = pieces
                    .iter()
                    .map(|p| format!("({}) if ({})", p.expr, p.where_))
                    .collect();
                match base {
                    Some(base) => format!("({base}) * [{}]", body.join("; ")),
                    None => format!("[{}]", body.join("; ")),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PieceDef {
    pub expr: String,
    #[serde(rename = "where")]
    pub where_: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventDef {
    pub expr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IrradianceDef {
    #[serde(default = "default_hours_total")]
    pub hours_total: Quantity,
    #[serde(default = "default_day_fraction")]
    pub day_fraction: f64,
    #[serde(default = "default_zenith_level")]
    pub zenith_level: f64,
    #[serde(default)]
    pub channels: Vec<ChannelDef>,
}

fn default_hours_total() -> Quantity {
    Quantity::new(24.0, "h")
}

fn default_day_fraction() -> f64 {
    0.5
}

fn default_zenith_level() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelDef {
    pub name: String,
    #[serde(default = "zero")]
    pub k0: Quantity,
    /// `[entity path, coefficient]` pairs adding `coeff * value` to the
    /// attenuation coefficient.
    #[serde(default)]
    pub k_mods: Vec<(String, Quantity)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MicrobialGroupDef {
    #[serde(default)]
    pub features: IndexMap<String, VariableDef>,
    #[serde(default)]
    pub processes: IndexMap<String, ProcessDef>,
}

/// Reference to a term: `path`, `[path, coeff]` or `{path, coeff}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TermRef {
    Path(String),
    Pair(String, f64),
    Keyed {
        path: String,
        #[serde(default)]
        coeff: Option<f64>,
    },
}

impl TermRef {
    pub fn path(&self) -> &str {
        match self {
            TermRef::Path(path) | TermRef::Pair(path, _) | TermRef::Keyed { path, .. } => path,
        }
    }

    pub fn coeff(&self) -> f64 {
        match self {
            TermRef::Path(_) => 1.0,
            TermRef::Pair(_, c) => *c,
            TermRef::Keyed { coeff, .. } => coeff.unwrap_or(1.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EquationDef {
    pub transient: TermRef,
    #[serde(default)]
    pub diffusion: Option<TermRef>,
    #[serde(default)]
    pub sources: Vec<TermRef>,
    #[serde(default)]
    pub track_budget: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationDef {
    /// Total simulated time; hours when no unit is given.
    #[serde(default = "default_simtime_total")]
    pub simtime_total: Quantity,
    /// Number of diel periods; overrides `simtime_total` when set.
    #[serde(default)]
    pub simtime_days: Option<f64>,
    /// Initial step size; seconds when no unit is given.
    #[serde(default = "default_simtime_step")]
    pub simtime_step: Quantity,
    #[serde(default)]
    pub step_min: Option<Quantity>,
    #[serde(default)]
    pub step_max: Option<Quantity>,
    #[serde(default = "default_residual_lim")]
    pub residual_lim: f64,
    #[serde(default = "default_max_sweeps")]
    pub max_sweeps: usize,
    #[serde(default = "default_growth")]
    pub growth: f64,
    #[serde(default = "default_shrink")]
    pub shrink: f64,
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: usize,
}

impl Default for SimulationDef {
    fn default() -> Self {
        Self {
            simtime_total: default_simtime_total(),
            simtime_days: None,
            simtime_step: default_simtime_step(),
            step_min: None,
            step_max: None,
            residual_lim: default_residual_lim(),
            max_sweeps: default_max_sweeps(),
            growth: default_growth(),
            shrink: default_shrink(),
            snapshot_every: default_snapshot_every(),
        }
    }
}

fn default_simtime_total() -> Quantity {
    Quantity::new(6.0, "h")
}

fn default_simtime_step() -> Quantity {
    Quantity::new(120.0, "s")
}

fn default_residual_lim() -> f64 {
    1e-8
}

fn default_max_sweeps() -> usize {
    25
}

fn default_growth() -> f64 {
    1.25
}

fn default_shrink() -> f64 {
    0.5
}

fn default_snapshot_every() -> usize {
    1
}
