//! Declarative composition and time-stepping of one-dimensional
//! diffusion-reaction models of microbial mats and sediments.
//!
//! A [`config::ModelDefinition`] is built into a [`model::Model`]: an entity
//! tree of variables, processes and an irradiance source over a sediment
//! column, with named equations coupling them. A [`simulation::Simulation`]
//! then advances the model with an adaptive, resumable clock.

pub mod config;
pub mod discretization;
pub mod entity;
pub mod error;
pub mod expression;
pub mod model;
pub mod models;
pub mod numerics;
pub mod processing;
pub mod simulation;
pub mod units;

pub use config::ModelDefinition;
pub use error::{BuildError, RunError};
pub use model::Model;
pub use simulation::Simulation;
