//! From formula definitions to [`CompiledTerm`]s.
//!
//! Order of work: parse, assemble piecewise sums, substitute `derived`
//! symbols, expand namespace calls, then lower to [`Node`]s, resolving every
//! remaining free symbol against the parameters or the entity scope.

use std::convert::Infallible;

use indexmap::IndexMap;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::eval::{FieldId, Function, Node};
use super::parser;
use super::CompiledTerm;
use crate::config::{FormulaDef, FunctionDef};
use crate::error::BuildError;

/// A parsed namespace function such as `saturation(x, Km)`.
#[derive(Debug, Clone)]
pub struct NamespaceFn {
    pub vars: Vec<String>,
    pub body: Expr,
}

impl NamespaceFn {
    pub fn parse(path: &str, def: &FunctionDef) -> Result<Self, BuildError> {
        let body = parser::parse(&def.expr).map_err(|source| BuildError::Parse {
            path: path.to_string(),
            formula: def.expr.clone(),
            source,
        })?;
        Ok(Self {
            vars: def.vars.clone(),
            body,
        })
    }
}

/// What a free symbol resolved to.
#[derive(Debug, Clone)]
pub enum Binding {
    Const(f64),
    Field(FieldId),
    /// Another compiled expression, inlined in place of the symbol.
    Term(Node),
}

pub trait SymbolResolver {
    /// `Ok(None)` means the symbol is unknown in every reachable scope.
    fn resolve(&mut self, symbol: &str) -> Result<Option<Binding>, BuildError>;
}

impl<F> SymbolResolver for F
where
    F: FnMut(&str) -> Result<Option<Binding>, BuildError>,
{
    fn resolve(&mut self, symbol: &str) -> Result<Option<Binding>, BuildError> {
        self(symbol)
    }
}

/// Everything needed to compile one formula.
pub struct ExpressionDef<'a> {
    /// Entity path, for diagnostics.
    pub path: &'a str,
    pub formula: &'a FormulaDef,
    /// Literal parameters in base units.
    pub params: &'a IndexMap<String, f64>,
    pub namespace: &'a IndexMap<String, NamespaceFn>,
    pub derived: &'a IndexMap<String, String>,
}

pub fn compile(
    def: &ExpressionDef<'_>,
    resolver: &mut dyn SymbolResolver,
) -> Result<CompiledTerm, BuildError> {
    let text = def.formula.display();
    let expr = assemble(def)?;
    let expr = expand_derived(&expr, def, &mut Vec::new())?;
    let expr = expand_calls(&expr, def, &mut Vec::new())?;
    let node = lower(&expr, def.path, &text, def.params, resolver)?;
    Ok(CompiledTerm::new(text, node))
}

/// Compile a bare entity reference, e.g. the diffusion coefficient path of
/// an equation.
pub fn compile_reference(
    path: &str,
    owner: &str,
    resolver: &mut dyn SymbolResolver,
) -> Result<CompiledTerm, BuildError> {
    let node = lower(
        &Expr::Symbol(path.to_string()),
        owner,
        path,
        &IndexMap::new(),
        resolver,
    )?;
    Ok(CompiledTerm::new(path, node))
}

fn parse_in(def: &ExpressionDef<'_>, src: &str) -> Result<Expr, BuildError> {
    parser::parse(src).map_err(|source| BuildError::Parse {
        path: def.path.to_string(),
        formula: src.to_string(),
        source,
    })
}

/// `base * (sum_i expr_i * [where_i] + [no where_i holds])`.
fn assemble(def: &ExpressionDef<'_>) -> Result<Expr, BuildError> {
    let (base, pieces) = match def.formula {
        FormulaDef::Plain(src) => return parse_in(def, src),
        FormulaDef::Piecewise { base, pieces } => (base, pieces),
    };

    let base = match base {
        Some(src) => parse_in(def, src)?,
        None => Expr::Number(1.0),
    };

    let mut weighted: Option<Expr> = None;
    let mut any_match: Option<Expr> = None;
    for piece in pieces {
        let expr = parse_in(def, &piece.expr)?;
        let predicate = parse_in(def, &piece.where_)?;
        let term = Expr::binary(
            BinaryOp::Mul,
            expr,
            Expr::Indicator(Box::new(predicate.clone())),
        );
        weighted = Some(match weighted {
            Some(sum) => Expr::binary(BinaryOp::Add, sum, term),
            None => term,
        });
        any_match = Some(match any_match {
            Some(any) => Expr::binary(BinaryOp::Or, any, predicate),
            None => predicate,
        });
    }

    let (Some(weighted), Some(any_match)) = (weighted, any_match) else {
        return Ok(base);
    };
    let unmatched = Expr::Indicator(Box::new(Expr::Unary(UnaryOp::Not, Box::new(any_match))));
    Ok(Expr::binary(
        BinaryOp::Mul,
        base,
        Expr::binary(BinaryOp::Add, weighted, unmatched),
    ))
}

fn expand_derived(
    expr: &Expr,
    def: &ExpressionDef<'_>,
    stack: &mut Vec<String>,
) -> Result<Expr, BuildError> {
    expr.rewrite(&mut |node| {
        let Expr::Symbol(name) = node else {
            return Ok(None);
        };
        let Some(src) = def.derived.get(name) else {
            return Ok(None);
        };
        if stack.contains(name) {
            return Err(BuildError::CyclicDefinition {
                symbol: name.clone(),
                path: def.path.to_string(),
            });
        }
        let body = parse_in(def, src)?;
        stack.push(name.clone());
        let expanded = expand_derived(&body, def, stack)?;
        stack.pop();
        Ok(Some(expanded))
    })
}

fn expand_calls(
    expr: &Expr,
    def: &ExpressionDef<'_>,
    stack: &mut Vec<String>,
) -> Result<Expr, BuildError> {
    expr.rewrite(&mut |node| {
        let Expr::Call(name, args) = node else {
            return Ok(None);
        };
        let Some(function) = def.namespace.get(name) else {
            return Ok(None);
        };
        if args.len() != function.vars.len() {
            return Err(BuildError::ArityMismatch {
                function: name.clone(),
                path: def.path.to_string(),
                expected: function.vars.len(),
                found: args.len(),
            });
        }
        if stack.contains(name) {
            return Err(BuildError::CyclicDefinition {
                symbol: name.clone(),
                path: def.path.to_string(),
            });
        }

        let args = args
            .iter()
            .map(|a| expand_calls(a, def, stack))
            .collect::<Result<Vec<_>, _>>()?;
        let bound = bind_arguments(&function.body, &function.vars, &args);
        // Function bodies may name derived symbols of the caller's scope.
        let bound = expand_derived(&bound, def, &mut Vec::new())?;

        stack.push(name.clone());
        let expanded = expand_calls(&bound, def, stack)?;
        stack.pop();
        Ok(Some(expanded))
    })
}

fn bind_arguments(body: &Expr, vars: &[String], args: &[Expr]) -> Expr {
    let bound = body.rewrite::<Infallible>(&mut |node| {
        Ok(match node {
            Expr::Symbol(name) => vars
                .iter()
                .position(|v| v == name)
                .map(|i| args[i].clone()),
            _ => None,
        })
    });
    match bound {
        Ok(expr) => expr,
        Err(never) => match never {},
    }
}

fn lower(
    expr: &Expr,
    path: &str,
    formula: &str,
    params: &IndexMap<String, f64>,
    resolver: &mut dyn SymbolResolver,
) -> Result<Node, BuildError> {
    let unresolved = |symbol: &str| BuildError::UnresolvedSymbol {
        symbol: symbol.to_string(),
        path: path.to_string(),
        formula: formula.to_string(),
    };

    Ok(match expr {
        Expr::Number(v) => Node::Const(*v),
        Expr::Symbol(name) => {
            if let Some(v) = params.get(name) {
                Node::Const(*v)
            } else {
                match resolver.resolve(name)? {
                    Some(Binding::Const(v)) => Node::Const(v),
                    Some(Binding::Field(id)) => Node::Field(id),
                    Some(Binding::Term(node)) => node,
                    None => return Err(unresolved(name)),
                }
            }
        }
        Expr::Unary(op, e) => Node::Unary(*op, Box::new(lower(e, path, formula, params, resolver)?)),
        Expr::Indicator(e) => Node::Indicator(Box::new(lower(e, path, formula, params, resolver)?)),
        Expr::Binary(op, a, b) => Node::Binary(
            *op,
            Box::new(lower(a, path, formula, params, resolver)?),
            Box::new(lower(b, path, formula, params, resolver)?),
        ),
        Expr::Call(name, args) => {
            let (function, arity) = Function::lookup(name).ok_or_else(|| unresolved(name))?;
            if args.len() != arity {
                return Err(BuildError::ArityMismatch {
                    function: name.clone(),
                    path: path.to_string(),
                    expected: arity,
                    found: args.len(),
                });
            }
            let args = args
                .iter()
                .map(|a| lower(a, path, formula, params, resolver))
                .collect::<Result<Vec<_>, _>>()?;
            Node::Call(function, args)
        }
    })
}
