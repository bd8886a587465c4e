//! Formula compilation: text is parsed once into an immutable term bound to
//! resolved field references, then evaluated against current field values.

pub mod ast;
pub mod compile;
pub mod eval;
pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;

use nalgebra::DVector;
use num_dual::{Dual64, DualNum};

pub use compile::{Binding, ExpressionDef, NamespaceFn, SymbolResolver, compile};
pub use eval::{FieldId, Function, Node};

/// Read access to per-cell field values.
pub trait FieldSource {
    fn cell_value(&self, field: FieldId, cell: usize) -> f64;
    fn num_cells(&self) -> usize;
}

/// Differentiability of a compiled term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Smoothness {
    /// Closed-form first derivative everywhere; may be linearized.
    Differentiable,
    /// Contains comparisons or non-smooth functions outside piecewise
    /// predicates; explicit treatment only.
    NonDifferentiable,
}

#[derive(Debug, Clone)]
pub struct CompiledTerm {
    /// Formula as written, for diagnostics.
    pub formula: String,
    pub root: Node,
    pub smoothness: Smoothness,
    fields: BTreeSet<FieldId>,
}

impl CompiledTerm {
    pub fn new(formula: impl Into<String>, root: Node) -> Self {
        let mut fields = BTreeSet::new();
        root.collect_fields(&mut fields);
        let smoothness = if root.is_smooth() {
            Smoothness::Differentiable
        } else {
            Smoothness::NonDifferentiable
        };
        Self {
            formula: formula.into(),
            root,
            smoothness,
            fields,
        }
    }

    pub fn is_differentiable(&self) -> bool {
        self.smoothness == Smoothness::Differentiable
    }

    pub fn depends_on(&self, field: FieldId) -> bool {
        self.fields.contains(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.iter().copied()
    }

    pub fn eval_cell(&self, source: &impl FieldSource, cell: usize) -> f64 {
        self.root.eval(&|id| source.cell_value(id, cell))
    }

    /// Value and partial derivative with respect to `wrt` in one cell.
    pub fn eval_with_derivative(
        &self,
        source: &impl FieldSource,
        cell: usize,
        wrt: FieldId,
    ) -> (f64, f64) {
        let d: Dual64 = self.root.eval(&|id| {
            let v = source.cell_value(id, cell);
            if id == wrt {
                Dual64::new(v, 1.0)
            } else {
                Dual64::from_re(v)
            }
        });
        (d.re, d.eps)
    }

    pub fn evaluate(&self, source: &impl FieldSource) -> DVector<f64> {
        DVector::from_fn(source.num_cells(), |cell, _| self.eval_cell(source, cell))
    }
}
