//! Compiled expression nodes and their evaluation.
//!
//! Nodes are generic over `DualNum<f64>` so the same tree yields plain values
//! (`f64`) or values with a first derivative (`Dual64`).

use std::collections::BTreeSet;

use num_dual::DualNum;

use super::ast::{BinaryOp, UnaryOp};

/// Index of a mesh field in the model's field set.
pub type FieldId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Exp,
    Ln,
    Log10,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Abs,
    Min,
    Max,
    Floor,
    Ceil,
    Round,
    Sign,
}

impl Function {
    /// Built-in function and its arity.
    pub fn lookup(name: &str) -> Option<(Function, usize)> {
        let f = match name {
            "exp" => Function::Exp,
            "ln" | "log" => Function::Ln,
            "log10" => Function::Log10,
            "sqrt" => Function::Sqrt,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "abs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "round" => Function::Round,
            "sign" => Function::Sign,
            _ => return None,
        };
        let arity = if matches!(f, Function::Min | Function::Max) { 2 } else { 1 };
        Some((f, arity))
    }

    /// Whether the function has a closed-form derivative everywhere.
    pub fn is_smooth(self) -> bool {
        !matches!(
            self,
            Function::Abs
                | Function::Min
                | Function::Max
                | Function::Floor
                | Function::Ceil
                | Function::Round
                | Function::Sign
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(f64),
    Field(FieldId),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
    Indicator(Box<Node>),
}

fn truth<T: DualNum<f64>>(b: bool) -> T {
    T::from(if b { 1.0 } else { 0.0 })
}

impl Node {
    pub fn eval<T, L>(&self, leaf: &L) -> T
    where
        T: DualNum<f64> + Copy,
        L: Fn(FieldId) -> T,
    {
        match self {
            Node::Const(v) => T::from(*v),
            Node::Field(id) => leaf(*id),
            Node::Unary(UnaryOp::Neg, e) => -(e.eval::<T, L>(leaf)),
            Node::Unary(UnaryOp::Not, e) => truth(e.eval::<T, L>(leaf).re() == 0.0),
            Node::Indicator(p) => truth(p.eval::<T, L>(leaf).re() != 0.0),
            Node::Binary(op, a, b) => {
                let (x, y): (T, T) = (a.eval(leaf), b.eval(leaf));
                match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Pow => match **b {
                        Node::Const(c) if c.fract() == 0.0 && c.abs() < i32::MAX as f64 => {
                            x.powi(c as i32)
                        }
                        Node::Const(c) => x.powf(c),
                        _ => x.powd(y),
                    },
                    BinaryOp::Lt => truth(x.re() < y.re()),
                    BinaryOp::Le => truth(x.re() <= y.re()),
                    BinaryOp::Gt => truth(x.re() > y.re()),
                    BinaryOp::Ge => truth(x.re() >= y.re()),
                    BinaryOp::Eq => truth(x.re() == y.re()),
                    BinaryOp::Ne => truth(x.re() != y.re()),
                    BinaryOp::And => truth(x.re() != 0.0 && y.re() != 0.0),
                    BinaryOp::Or => truth(x.re() != 0.0 || y.re() != 0.0),
                }
            }
            Node::Call(f, args) => {
                let x: T = args[0].eval(leaf);
                match f {
                    Function::Exp => x.exp(),
                    Function::Ln => x.ln(),
                    Function::Log10 => x.log10(),
                    Function::Sqrt => x.sqrt(),
                    Function::Sin => x.sin(),
                    Function::Cos => x.cos(),
                    Function::Tan => x.tan(),
                    Function::Sinh => x.sinh(),
                    Function::Cosh => x.cosh(),
                    Function::Tanh => x.tanh(),
                    Function::Abs => {
                        if x.re() < 0.0 {
                            -x
                        } else {
                            x
                        }
                    }
                    Function::Min | Function::Max => {
                        let y: T = args[1].eval(leaf);
                        let take_x = if *f == Function::Min {
                            x.re() <= y.re()
                        } else {
                            x.re() >= y.re()
                        };
                        if take_x { x } else { y }
                    }
                    Function::Floor => T::from(x.re().floor()),
                    Function::Ceil => T::from(x.re().ceil()),
                    Function::Round => T::from(x.re().round()),
                    Function::Sign => {
                        let r = x.re();
                        T::from(if r > 0.0 {
                            1.0
                        } else if r < 0.0 {
                            -1.0
                        } else {
                            0.0
                        })
                    }
                }
            }
        }
    }

    /// True unless a comparison, boolean connective or non-smooth function
    /// appears outside a piecewise indicator.
    pub fn is_smooth(&self) -> bool {
        match self {
            Node::Const(_) | Node::Field(_) | Node::Indicator(_) => true,
            Node::Unary(UnaryOp::Not, _) => false,
            Node::Unary(UnaryOp::Neg, e) => e.is_smooth(),
            Node::Binary(op, a, b) => !op.is_relational() && a.is_smooth() && b.is_smooth(),
            Node::Call(f, args) => f.is_smooth() && args.iter().all(Node::is_smooth),
        }
    }

    pub fn collect_fields(&self, out: &mut BTreeSet<FieldId>) {
        match self {
            Node::Const(_) => {}
            Node::Field(id) => {
                out.insert(*id);
            }
            Node::Unary(_, e) | Node::Indicator(e) => e.collect_fields(out),
            Node::Binary(_, a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
            Node::Call(_, args) => args.iter().for_each(|a| a.collect_fields(out)),
        }
    }
}
