//! The entity tree: a named hierarchy (domain, environment, microbial
//! groups, processes) with dotted-path addressing and scope fallback.
//!
//! Nodes live in an arena; a node's `parent` is an index, so children are
//! owned by the tree and back-references never own anything.

use indexmap::IndexMap;

use crate::error::BuildError;
use crate::expression::FieldId;

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Grouping node with no value of its own (`env`, `microbes`, ...).
    Container,
    Domain,
    Variable,
    Parameter,
    Process,
    /// Per-cell event clock owned by a process.
    Event,
    Irradiance,
    MicrobialGroup,
}

/// What a node stands for when referenced from a formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    None,
    Field(FieldId),
    Scalar(f64),
    /// Index into the model's process table.
    Process(usize),
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub parent: Option<NodeId>,
    pub payload: Payload,
    /// Children of a transparent node are found by lookups in its parent,
    /// so `domain.porosity` is also reachable as `porosity`.
    pub transparent: bool,
    children: IndexMap<String, NodeId>,
}

#[derive(Debug, Clone)]
pub struct EntityTree {
    nodes: Vec<Entity>,
}

impl Default for EntityTree {
    fn default() -> Self {
        Self::new()
    }
}

fn is_symbol_safe(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl EntityTree {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![Entity {
                name: String::new(),
                kind: EntityKind::Container,
                parent: None,
                payload: Payload::None,
                transparent: false,
                children: IndexMap::new(),
            }],
        }
    }

    pub fn add(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: EntityKind,
        payload: Payload,
    ) -> Result<NodeId, BuildError> {
        if !is_symbol_safe(name) {
            return Err(BuildError::InvalidName(name.to_string()));
        }
        if self.nodes[parent].children.contains_key(name) {
            return Err(BuildError::DuplicateEntity(self.join(parent, name)));
        }
        let id = self.nodes.len();
        self.nodes.push(Entity {
            name: name.to_string(),
            kind,
            parent: Some(parent),
            payload,
            transparent: false,
            children: IndexMap::new(),
        });
        self.nodes[parent].children.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn add_transparent(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: EntityKind,
    ) -> Result<NodeId, BuildError> {
        let id = self.add(parent, name, kind, Payload::None)?;
        self.nodes[id].transparent = true;
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> &Entity {
        &self.nodes[id]
    }

    pub fn set_payload(&mut self, id: NodeId, payload: Payload) {
        self.nodes[id].payload = payload;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Dotted path from the root.
    pub fn path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n != Self::ROOT {
                parts.push(self.nodes[n].name.as_str());
            }
            cur = self.nodes[n].parent;
        }
        parts.reverse();
        parts.join(".")
    }

    fn join(&self, parent: NodeId, name: &str) -> String {
        let base = self.path(parent);
        if base.is_empty() {
            name.to_string()
        } else {
            format!("{base}.{name}")
        }
    }

    /// A child by name: direct children first, then children of transparent
    /// children, depth first in declaration order.
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let node = &self.nodes[id];
        if let Some(&c) = node.children.get(name) {
            return Some(c);
        }
        node.children
            .values()
            .filter(|&&c| self.nodes[c].transparent)
            .find_map(|&c| self.child(c, name))
    }

    fn lookup_local(&self, scope: NodeId, path: &str) -> Option<NodeId> {
        path.split('.')
            .try_fold(scope, |node, segment| self.child(node, segment))
    }

    /// Resolve `path` as seen from `from`: try `from` itself, then each
    /// ancestor up to the root. The first scope that can resolve the whole
    /// path wins.
    pub fn lookup(&self, path: &str, from: NodeId) -> Option<NodeId> {
        let mut scope = Some(from);
        while let Some(s) = scope {
            if let Some(found) = self.lookup_local(s, path) {
                return Some(found);
            }
            scope = self.nodes[s].parent;
        }
        None
    }

    pub fn resolve(&self, path: &str, from: NodeId) -> Result<NodeId, BuildError> {
        self.lookup(path, from)
            .ok_or_else(|| BuildError::UnresolvedSymbol {
                symbol: path.to_string(),
                path: self.path(from),
                formula: path.to_string(),
            })
    }

    /// Resolve an absolute path from the root.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.lookup_local(Self::ROOT, path)
    }
}
