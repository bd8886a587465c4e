use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::DVector;

use super::fields::FieldSet;
use crate::config::ProcessDef;
use crate::entity::NodeId;
use crate::expression::{CompiledTerm, FieldId};

/// A relational predicate whose field counts how long (s) it has held.
#[derive(Debug, Clone)]
pub struct ProcessEvent {
    pub name: String,
    pub field: FieldId,
    pub predicate: Option<CompiledTerm>,
}

impl ProcessEvent {
    /// Add `dt` where the predicate holds and reset to zero elsewhere.
    pub fn advance(&self, dt: f64, fields: &mut FieldSet) {
        let Some(predicate) = &self.predicate else {
            return;
        };
        let holds = predicate.evaluate(fields);
        let clock = fields.get_mut(self.field);
        for (c, h) in clock.iter_mut().zip(holds.iter()) {
            *c = if *h != 0.0 { *c + dt } else { 0.0 };
        }
    }
}

/// A named rate expression.
#[derive(Debug, Clone)]
pub struct Process {
    pub path: String,
    pub node: NodeId,
    pub def: ProcessDef,
    /// Parameters in base units.
    pub params: IndexMap<String, f64>,
    pub events: Vec<ProcessEvent>,
    pub term: Option<Arc<CompiledTerm>>,
}

impl Process {
    pub fn implicit(&self) -> Option<bool> {
        self.def.implicit
    }

    pub fn evaluate(&self, fields: &FieldSet) -> Option<DVector<f64>> {
        self.term.as_ref().map(|t| t.evaluate(fields))
    }
}
