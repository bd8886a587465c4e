pub mod domain;
pub mod generator;
pub mod mesh;
