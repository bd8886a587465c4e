//! Built-in model definitions.

use crate::config::{self, ModelDefinition};

/// Cyanobacterial mat with oxygen and sulfide cycling under diel light.
pub const MICROBIAL_MAT: &str = include_str!("microbial_mat.yml");

pub fn microbial_mat() -> config::Result<ModelDefinition> {
    ModelDefinition::from_yaml(MICROBIAL_MAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::model::equation::Cast;

    #[test]
    fn microbial_mat_builds() {
        let model = Model::build(&microbial_mat().unwrap()).unwrap();
        assert_eq!(model.domain.num_cells(), 110);
        assert_eq!(model.equations.len(), 2);

        let oxy = model.equation("oxyEqn").unwrap();
        assert_eq!(oxy.source("env.sox").unwrap().coeff, -2.0);
        // The inhibition response compares against a threshold.
        assert_eq!(oxy.source("microbes.cyano.oxyPS").unwrap().cast, Cast::Explicit);
        assert_eq!(oxy.source("microbes.cyano.respiration").unwrap().cast, Cast::Implicit);

        let h2s = model.equation("h2sEqn").unwrap();
        assert_eq!(h2s.source("env.sox").unwrap().coeff, -1.0);
        assert_eq!(h2s.source("env.sox").unwrap().cast, Cast::Implicit);
        assert!(model.budgets.contains_key("oxyEqn"));
    }
}
