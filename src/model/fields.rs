use indexmap::IndexMap;
use nalgebra::DVector;

use crate::expression::{FieldId, FieldSource};

/// How a field's values change over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Fixed at build time (domain geometry).
    Static,
    /// Solved or carried state, persisted in snapshots.
    Variable,
    /// Recomputed from time and other fields every step.
    Irradiance,
    /// Per-cell event clock of a process.
    Event,
}

/// Every mesh field of a model, addressed by [`FieldId`] or entity path.
#[derive(Debug, Clone)]
pub struct FieldSet {
    num_cells: usize,
    values: IndexMap<String, DVector<f64>>,
    roles: Vec<FieldRole>,
}

impl FieldSet {
    pub fn new(num_cells: usize) -> Self {
        Self {
            num_cells,
            values: IndexMap::new(),
            roles: Vec::new(),
        }
    }

    pub fn insert(&mut self, path: &str, role: FieldRole, values: DVector<f64>) -> FieldId {
        debug_assert_eq!(values.len(), self.num_cells);
        let (id, previous) = self.values.insert_full(path.to_string(), values);
        if previous.is_none() {
            self.roles.push(role);
        }
        id
    }

    pub fn get(&self, id: FieldId) -> &DVector<f64> {
        &self.values[id]
    }

    pub fn get_mut(&mut self, id: FieldId) -> &mut DVector<f64> {
        &mut self.values[id]
    }

    pub fn set(&mut self, id: FieldId, values: DVector<f64>) {
        self.values[id] = values;
    }

    pub fn id_of(&self, path: &str) -> Option<FieldId> {
        self.values.get_index_of(path)
    }

    pub fn by_path(&self, path: &str) -> Option<&DVector<f64>> {
        self.values.get(path)
    }

    pub fn name(&self, id: FieldId) -> &str {
        self.values
            .get_index(id)
            .map(|(k, _)| k.as_str())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &str, &DVector<f64>)> {
        self.values
            .iter()
            .enumerate()
            .map(|(id, (k, v))| (id, k.as_str(), v))
    }

    /// Fields that carry run state, i.e. everything except geometry.
    pub fn dynamic(&self) -> impl Iterator<Item = (FieldId, &str, &DVector<f64>)> {
        self.iter()
            .filter(|(id, _, _)| self.roles[*id] != FieldRole::Static)
    }
}

impl FieldSource for FieldSet {
    fn cell_value(&self, field: FieldId, cell: usize) -> f64 {
        self.values[field][cell]
    }

    fn num_cells(&self) -> usize {
        self.num_cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_insertion_order() {
        let mut fields = FieldSet::new(3);
        let a = fields.insert("domain.depths", FieldRole::Static, DVector::zeros(3));
        let b = fields.insert("env.oxy", FieldRole::Variable, DVector::from_element(3, 2.0));
        assert_eq!((a, b), (0, 1));
        assert_eq!(fields.id_of("env.oxy"), Some(1));
        assert_eq!(fields.name(b), "env.oxy");
        assert_eq!(fields.cell_value(b, 2), 2.0);

        let dynamic: Vec<&str> = fields.dynamic().map(|(_, name, _)| name).collect();
        assert_eq!(dynamic, vec!["env.oxy"]);
    }
}
