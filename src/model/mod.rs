//! The assembled model: entity tree, mesh fields, processes, irradiance and
//! coupled equations built from a [`ModelDefinition`].

pub mod equation;
pub mod fields;
pub mod irradiance;
pub mod process;
pub mod seed;
pub mod variable;

use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::DVector;
use tracing::{debug, info, instrument};

use crate::config::{
    EnvEntry, FormulaDef, IrradianceDef, ModelDefinition, ProcessDef, SimulationDef,
    VariableDef,
};
use crate::discretization::domain::Domain;
use crate::entity::{EntityKind, EntityTree, NodeId, Payload};
use crate::error::BuildError;
use crate::expression::compile::compile_reference;
use crate::expression::{Binding, CompiledTerm, ExpressionDef, NamespaceFn, Node, compile};
use crate::units::Quantity;

use equation::{Budget, CoupledEquation, TermLookup};
use fields::{FieldRole, FieldSet};
use irradiance::{AttenuationModifier, Channel, Irradiance};
use process::{Process, ProcessEvent};
use variable::Variable;

#[derive(Debug, Clone)]
pub struct Model {
    pub domain: Domain,
    pub tree: EntityTree,
    /// Current values of every field.
    pub fields: FieldSet,
    /// Keyed by entity path.
    pub variables: IndexMap<String, Variable>,
    pub processes: Vec<Process>,
    pub irradiance: Option<Irradiance>,
    pub equations: Vec<CoupledEquation>,
    /// Mass balances of equations with `track_budget`, keyed by equation.
    pub budgets: IndexMap<String, Budget>,
    pub simulation: SimulationDef,
}

/// Mutable state shared by the registration passes of [`Model::build`].
struct Registry {
    domain: Domain,
    tree: EntityTree,
    fields: FieldSet,
    variables: IndexMap<String, Variable>,
    processes: Vec<Process>,
    /// The irradiance source with its channel attenuation modifiers, which
    /// are compiled once every entity is registered.
    irradiance: Option<(NodeId, Irradiance, Vec<Vec<(String, Quantity)>>)>,
}

impl Registry {
    fn add_variable(
        &mut self,
        parent: NodeId,
        name: &str,
        def: &VariableDef,
    ) -> Result<(), BuildError> {
        let node = self.tree.add(parent, name, EntityKind::Variable, Payload::None)?;
        let path = self.tree.path(node);
        let field = self
            .fields
            .insert(&path, FieldRole::Variable, DVector::zeros(self.domain.num_cells()));
        let variable = Variable::from_def(&path, field, def)?;
        self.fields.set(field, variable.initial_field(&self.domain)?);
        self.tree.set_payload(node, Payload::Field(field));
        debug!(path = %path, seeded = variable.seed.is_some(), "registered variable");
        self.variables.insert(path, variable);
        Ok(())
    }

    fn add_process(
        &mut self,
        parent: NodeId,
        name: &str,
        def: &ProcessDef,
    ) -> Result<(), BuildError> {
        let index = self.processes.len();
        let node = self
            .tree
            .add(parent, name, EntityKind::Process, Payload::Process(index))?;
        let path = self.tree.path(node);

        let params = def
            .params
            .iter()
            .map(|(k, q)| Ok((k.clone(), q.to_base().map_err(BuildError::unit(&path))?)))
            .collect::<Result<IndexMap<_, _>, BuildError>>()?;

        let mut events = Vec::with_capacity(def.events.len());
        for event in def.events.keys() {
            let event_path = format!("{path}.{event}");
            let field = self.fields.insert(
                &event_path,
                FieldRole::Event,
                DVector::zeros(self.domain.num_cells()),
            );
            self.tree
                .add(node, event, EntityKind::Event, Payload::Field(field))?;
            events.push(ProcessEvent {
                name: event.clone(),
                field,
                predicate: None,
            });
        }

        debug!(path = %path, formula = %def.formula.display(), "registered process");
        self.processes.push(Process {
            path,
            node,
            def: def.clone(),
            params,
            events,
            term: None,
        });
        Ok(())
    }

    fn add_irradiance(
        &mut self,
        parent: NodeId,
        name: &str,
        def: &IrradianceDef,
    ) -> Result<(), BuildError> {
        if let Some((node, _, _)) = &self.irradiance {
            return Err(BuildError::InvalidIrradiance(format!(
                "only one irradiance source is supported, found `{}` and `{name}`",
                self.tree.path(*node)
            )));
        }
        let node = self
            .tree
            .add_transparent(parent, name, EntityKind::Irradiance)?;
        let path = self.tree.path(node);
        let mut irradiance = Irradiance::new(&path, def)?;

        let n = self.domain.num_cells();
        for channel in &def.channels {
            let k_name = format!("{}_k", channel.name);
            let field = self
                .fields
                .insert(&format!("{path}.{}", channel.name), FieldRole::Irradiance, DVector::zeros(n));
            let k_field = self
                .fields
                .insert(&format!("{path}.{k_name}"), FieldRole::Irradiance, DVector::zeros(n));
            self.tree.add(
                node,
                &channel.name,
                EntityKind::Variable,
                Payload::Field(field),
            )?;
            self.tree
                .add(node, &k_name, EntityKind::Variable, Payload::Field(k_field))?;
            let k0 = channel
                .k0
                .to_base_or("1/m")
                .map_err(BuildError::unit(&path))?;
            irradiance.channels.push(Channel {
                name: channel.name.clone(),
                k0,
                field,
                k_field,
                modifiers: Vec::new(),
            });
        }
        debug!(path = %path, channels = irradiance.channels.len(), "registered irradiance");
        let k_mods = def.channels.iter().map(|c| c.k_mods.clone()).collect();
        self.irradiance = Some((node, irradiance, k_mods));
        Ok(())
    }
}

enum CompileState {
    Pending,
    InProgress,
    Done(Arc<CompiledTerm>),
}

/// Compiles process formulas on demand so that process references can be
/// inlined in any declaration order.
struct ProcessCompiler<'a> {
    tree: &'a EntityTree,
    processes: &'a [Process],
    globals: &'a IndexMap<String, NamespaceFn>,
    states: Vec<CompileState>,
}

impl<'a> ProcessCompiler<'a> {
    fn new(
        tree: &'a EntityTree,
        processes: &'a [Process],
        globals: &'a IndexMap<String, NamespaceFn>,
    ) -> Self {
        Self {
            tree,
            processes,
            globals,
            states: processes.iter().map(|_| CompileState::Pending).collect(),
        }
    }

    fn binding(&mut self, symbol: &str, scope: NodeId) -> Result<Option<Binding>, BuildError> {
        let Some(id) = self.tree.lookup(symbol, scope) else {
            return Ok(None);
        };
        Ok(match self.tree.get(id).payload {
            Payload::Field(field) => Some(Binding::Field(field)),
            Payload::Scalar(v) => Some(Binding::Const(v)),
            Payload::Process(index) => Some(Binding::Term(self.process(index)?.root.clone())),
            Payload::None => None,
        })
    }

    fn namespace(&self, process: &Process) -> Result<IndexMap<String, NamespaceFn>, BuildError> {
        let mut namespace = self.globals.clone();
        for (name, def) in &process.def.namespace {
            let f = NamespaceFn::parse(&format!("{}.{name}", process.path), def)?;
            namespace.insert(name.clone(), f);
        }
        Ok(namespace)
    }

    fn process(&mut self, index: usize) -> Result<Arc<CompiledTerm>, BuildError> {
        let processes = self.processes;
        let process = &processes[index];
        match &self.states[index] {
            CompileState::Done(term) => return Ok(term.clone()),
            CompileState::InProgress => {
                return Err(BuildError::CyclicDefinition {
                    symbol: process.path.clone(),
                    path: process.path.clone(),
                });
            }
            CompileState::Pending => {}
        }
        self.states[index] = CompileState::InProgress;

        let namespace = self.namespace(process)?;
        let def = ExpressionDef {
            path: &process.path,
            formula: &process.def.formula,
            params: &process.params,
            namespace: &namespace,
            derived: &process.def.derived,
        };
        let scope = process.node;
        let term = compile(&def, &mut |symbol: &str| -> Result<Option<Binding>, BuildError> {
            self.binding(symbol, scope)
        })?;
        let term = Arc::new(term);
        debug!(
            path = %process.path,
            differentiable = term.is_differentiable(),
            "compiled process"
        );
        self.states[index] = CompileState::Done(term.clone());
        Ok(term)
    }

    /// Event predicates share their process's parameters and namespace.
    fn events(&mut self, index: usize) -> Result<Vec<ProcessEvent>, BuildError> {
        let processes = self.processes;
        let process = &processes[index];
        let namespace = self.namespace(process)?;
        let scope = process.node;
        let mut events = process.events.clone();
        for event in &mut events {
            let path = format!("{}.{}", process.path, event.name);
            let formula = FormulaDef::Plain(process.def.events[&event.name].expr.clone());
            let def = ExpressionDef {
                path: &path,
                formula: &formula,
                params: &process.params,
                namespace: &namespace,
                derived: &process.def.derived,
            };
            let predicate = compile(&def, &mut |symbol: &str| -> Result<Option<Binding>, BuildError> {
                self.binding(symbol, scope)
            })?;
            event.predicate = Some(predicate);
        }
        Ok(events)
    }

    fn reference(&mut self, path: &str, owner: NodeId) -> Result<CompiledTerm, BuildError> {
        let owner_path = self.tree.path(owner);
        compile_reference(path, &owner_path, &mut |symbol: &str| -> Result<Option<Binding>, BuildError> {
            self.binding(symbol, owner)
        })
    }
}

impl Model {
    #[instrument(skip_all)]
    pub fn build(def: &ModelDefinition) -> Result<Self, BuildError> {
        let domain = Domain::new(&def.domain)?;
        let mut reg = Registry {
            fields: FieldSet::new(domain.num_cells()),
            domain,
            tree: EntityTree::new(),
            variables: IndexMap::new(),
            processes: Vec::new(),
            irradiance: None,
        };

        let domain_node = reg
            .tree
            .add_transparent(EntityTree::ROOT, "domain", EntityKind::Domain)?;
        let static_fields = [
            ("depths", reg.domain.depths.clone()),
            ("porosity", reg.domain.porosity.clone()),
            ("sediment_mask", reg.domain.sediment_mask.clone()),
            ("dbl_mask", reg.domain.dbl_mask.clone()),
        ];
        for (name, values) in static_fields {
            let field = reg
                .fields
                .insert(&format!("domain.{name}"), FieldRole::Static, values);
            reg.tree
                .add(domain_node, name, EntityKind::Parameter, Payload::Field(field))?;
        }
        let scalars = [
            ("cell_size", reg.domain.cell_size),
            ("sediment_length", reg.domain.sediment_length),
            ("dbl_length", reg.domain.dbl_length),
        ];
        for (name, value) in scalars {
            reg.tree
                .add(domain_node, name, EntityKind::Parameter, Payload::Scalar(value))?;
        }

        let env = reg
            .tree
            .add_transparent(EntityTree::ROOT, "env", EntityKind::Container)?;
        for (name, entry) in &def.environment {
            match entry {
                EnvEntry::Variable(v) => reg.add_variable(env, name, v)?,
                EnvEntry::Process(p) => reg.add_process(env, name, p)?,
                EnvEntry::Irradiance(i) => reg.add_irradiance(env, name, i)?,
            }
        }

        let microbes = reg.tree.add(
            EntityTree::ROOT,
            "microbes",
            EntityKind::Container,
            Payload::None,
        )?;
        for (group_name, group) in &def.microbes {
            if !group.features.contains_key("biomass") {
                return Err(BuildError::MissingBiomass(group_name.clone()));
            }
            let group_node = reg.tree.add(
                microbes,
                group_name,
                EntityKind::MicrobialGroup,
                Payload::None,
            )?;
            let features = reg
                .tree
                .add_transparent(group_node, "features", EntityKind::Container)?;
            let processes = reg
                .tree
                .add_transparent(group_node, "processes", EntityKind::Container)?;
            for (name, v) in &group.features {
                reg.add_variable(features, name, v)?;
            }
            for (name, p) in &group.processes {
                reg.add_process(processes, name, p)?;
            }
        }

        let globals = def
            .formulae
            .iter()
            .map(|(name, f)| Ok((name.clone(), NamespaceFn::parse(&format!("formulae.{name}"), f)?)))
            .collect::<Result<IndexMap<_, _>, BuildError>>()?;

        let Registry {
            domain,
            tree,
            mut fields,
            variables,
            mut processes,
            irradiance,
        } = reg;

        let mut compiled = Vec::with_capacity(processes.len());
        let mut compiled_events = Vec::with_capacity(processes.len());
        let irradiance = {
            let mut compiler = ProcessCompiler::new(&tree, &processes, &globals);
            for index in 0..processes.len() {
                compiled.push(compiler.process(index)?);
                compiled_events.push(compiler.events(index)?);
            }
            match irradiance {
                Some((node, mut irradiance, k_mods)) => {
                    for (channel, mods) in irradiance.channels.iter_mut().zip(k_mods) {
                        for (path, coeff) in mods {
                            let coeff = coeff.to_base().map_err(BuildError::unit(&path))?;
                            let term = compiler.reference(&path, node)?;
                            channel.modifiers.push(AttenuationModifier { path, coeff, term });
                        }
                    }
                    Some(irradiance)
                }
                None => None,
            }
        };
        for ((process, term), events) in processes.iter_mut().zip(compiled).zip(compiled_events) {
            process.term = Some(term);
            process.events = events;
        }

        if let Some(irradiance) = &irradiance {
            irradiance.update(0.0, &domain, &mut fields);
        }

        let mut model = Self {
            domain,
            tree,
            fields,
            variables,
            processes,
            irradiance,
            equations: Vec::new(),
            budgets: IndexMap::new(),
            simulation: def.simulation.clone(),
        };

        let mut equations = Vec::with_capacity(def.equations.len());
        for (name, eq_def) in &def.equations {
            let eq = CoupledEquation::assemble(name, eq_def, &model)?;
            debug!(
                equation = %name,
                variable = %eq.variable_path,
                sources = eq.sources.len(),
                diffusion = eq.diffusion.is_some(),
                "assembled equation"
            );
            equations.push(eq);
        }
        if let Some(dup) = equations
            .iter()
            .enumerate()
            .find(|(i, eq)| equations[..*i].iter().any(|o| o.variable == eq.variable))
            .map(|(_, eq)| eq)
        {
            return Err(BuildError::InvalidTerm {
                equation: dup.name.clone(),
                path: dup.variable_path.clone(),
                reason: "variable is already solved by another equation".into(),
            });
        }
        model.equations = equations;
        model.reset_budgets();

        info!(
            cells = model.domain.num_cells(),
            fields = model.fields.len(),
            variables = model.variables.len(),
            processes = model.processes.len(),
            equations = model.equations.len(),
            "model built"
        );
        Ok(model)
    }

    fn node_field(&self, path: &str) -> Option<usize> {
        match self.tree.get(self.tree.find(path)?).payload {
            Payload::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Current values of a field by entity path; transparent segments such
    /// as `env` may be omitted.
    pub fn field(&self, path: &str) -> Option<&DVector<f64>> {
        self.fields
            .by_path(path)
            .or_else(|| self.node_field(path).map(|id| self.fields.get(id)))
    }

    pub fn variable(&self, path: &str) -> Option<&Variable> {
        self.variables.get(path).or_else(|| {
            let field = self.node_field(path)?;
            self.variables.values().find(|v| v.field == field)
        })
    }

    pub fn process(&self, path: &str) -> Option<&Process> {
        match self.tree.get(self.tree.find(path)?).payload {
            Payload::Process(index) => self.processes.get(index),
            _ => None,
        }
    }

    pub fn equation(&self, name: &str) -> Option<&CoupledEquation> {
        self.equations.iter().find(|eq| eq.name == name)
    }

    /// Recompute a variable's initial field from its definition.
    pub fn seed_variable(&self, path: &str) -> Result<DVector<f64>, BuildError> {
        let variable = self.variable(path).ok_or_else(|| BuildError::UnresolvedSymbol {
            symbol: path.to_string(),
            path: String::new(),
            formula: path.to_string(),
        })?;
        variable.initial_field(&self.domain)
    }

    pub fn surface_irradiance(&self, t: f64) -> f64 {
        self.irradiance
            .as_ref()
            .map_or(0.0, |i| i.surface_intensity(t))
    }

    /// Diel period (s), or a day without an irradiance source.
    pub fn diel_period(&self) -> f64 {
        self.irradiance.as_ref().map_or(86_400.0, |i| i.hours_total)
    }

    /// Advance time-driven fields for a step ending at `t_new`: event clocks
    /// from the state at the start of the step, then the light profile.
    pub fn prepare_step(&self, fields: &mut FieldSet, t_new: f64, dt: f64) {
        for process in &self.processes {
            for event in &process.events {
                event.advance(dt, fields);
            }
        }
        if let Some(irradiance) = &self.irradiance {
            irradiance.update(t_new, &self.domain, fields);
        }
    }

    /// Region constraints and clipping on every variable.
    pub fn finish_step(&self, fields: &mut FieldSet) {
        for variable in self.variables.values() {
            let values = fields.get_mut(variable.field);
            variable.apply_region_constraints(&self.domain, values);
            variable.clip(values);
        }
    }

    pub fn reset_budgets(&mut self) {
        self.budgets = self
            .equations
            .iter()
            .filter(|eq| eq.track_budget)
            .map(|eq| (eq.name.clone(), Budget::start(eq, &self.fields, &self.domain)))
            .collect();
    }

    pub fn record_budgets(&mut self, dt: f64) {
        for eq in &self.equations {
            if let Some(budget) = self.budgets.get_mut(&eq.name) {
                budget.record(eq, &self.fields, &self.domain, dt);
            }
        }
    }

    /// Depth-integrated rate of every process, keyed by path.
    pub fn process_rates(&self, fields: &FieldSet) -> IndexMap<String, f64> {
        self.processes
            .iter()
            .filter_map(|p| Some((p.path.clone(), self.domain.integrate(&p.evaluate(fields)?))))
            .collect()
    }
}

impl TermLookup for Model {
    fn variable(&self, equation: &str, path: &str) -> Result<&Variable, BuildError> {
        if self.tree.find(path).is_none() {
            return Err(BuildError::UnresolvedSymbol {
                symbol: path.to_string(),
                path: format!("equations.{equation}"),
                formula: path.to_string(),
            });
        }
        Model::variable(self, path).ok_or_else(|| BuildError::InvalidTerm {
            equation: equation.to_string(),
            path: path.to_string(),
            reason: "transient term must name a variable".into(),
        })
    }

    fn term(
        &self,
        equation: &str,
        path: &str,
    ) -> Result<(Arc<CompiledTerm>, Option<bool>), BuildError> {
        let node = self
            .tree
            .find(path)
            .ok_or_else(|| BuildError::UnresolvedSymbol {
                symbol: path.to_string(),
                path: format!("equations.{equation}"),
                formula: path.to_string(),
            })?;
        match self.tree.get(node).payload {
            Payload::Process(index) => {
                let process = &self.processes[index];
                let term = process.term.clone().ok_or_else(|| BuildError::InvalidTerm {
                    equation: equation.to_string(),
                    path: path.to_string(),
                    reason: "process was not compiled".into(),
                })?;
                Ok((term, process.implicit()))
            }
            Payload::Field(field) => Ok((Arc::new(CompiledTerm::new(path, Node::Field(field))), None)),
            Payload::Scalar(v) => Ok((Arc::new(CompiledTerm::new(path, Node::Const(v))), None)),
            Payload::None => Err(BuildError::InvalidTerm {
                equation: equation.to_string(),
                path: path.to_string(),
                reason: "path names a container, not a value".into(),
            }),
        }
    }
}
