//! Pratt parser for formula text.

use std::ops::Range;

use logos::Logos;
use thiserror::Error;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::Token;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at {}..{}", span.start, span.end)]
pub struct ParseError {
    pub message: String,
    pub span: Range<usize>,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

const PREC_NOT: u8 = 25;
const PREC_NEG: u8 = 55;

fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinaryOp)> {
    let info = match token {
        Token::Or => (10, Assoc::Left, BinaryOp::Or),
        Token::And => (20, Assoc::Left, BinaryOp::And),
        Token::Lt => (30, Assoc::Left, BinaryOp::Lt),
        Token::Le => (30, Assoc::Left, BinaryOp::Le),
        Token::Gt => (30, Assoc::Left, BinaryOp::Gt),
        Token::Ge => (30, Assoc::Left, BinaryOp::Ge),
        Token::EqEq => (30, Assoc::Left, BinaryOp::Eq),
        Token::Ne => (30, Assoc::Left, BinaryOp::Ne),
        Token::Plus => (40, Assoc::Left, BinaryOp::Add),
        Token::Minus => (40, Assoc::Left, BinaryOp::Sub),
        Token::Star => (50, Assoc::Left, BinaryOp::Mul),
        Token::Slash => (50, Assoc::Left, BinaryOp::Div),
        Token::Pow => (60, Assoc::Right, BinaryOp::Pow),
        _ => return None,
    };
    Some(info)
}

struct TokenStream {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    end: usize,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn span(&self) -> Range<usize> {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| s.clone())
            .unwrap_or(self.end..self.end)
    }

    fn advance(&mut self) -> Option<(Token, Range<usize>)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ParseError::new(format!("expected {what}"), self.span()))
        }
    }
}

/// Parse formula text into an expression tree.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let mut tokens = Vec::new();
    for (token, span) in Token::lexer(source).spanned() {
        match token {
            Ok(t) => tokens.push((t, span)),
            Err(()) => {
                return Err(ParseError::new(
                    format!("unexpected character `{}`", &source[span.clone()]),
                    span,
                ));
            }
        }
    }
    if tokens.is_empty() {
        return Err(ParseError::new("empty formula", 0..0));
    }

    let mut stream = TokenStream {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parse_bp(&mut stream, 0)?;
    if stream.peek().is_some() {
        return Err(ParseError::new("unexpected trailing input", stream.span()));
    }
    Ok(expr)
}

fn parse_bp(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let mut lhs = parse_prefix(stream)?;

    while let Some((prec, assoc, op)) = stream.peek().and_then(binary_op_info) {
        if prec < min_prec {
            break;
        }
        stream.advance();
        let next_min = match assoc {
            Assoc::Left => prec + 1,
            Assoc::Right => prec,
        };
        let rhs = parse_bp(stream, next_min)?;
        lhs = Expr::binary(op, lhs, rhs);
    }

    Ok(lhs)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let span = stream.span();
    let Some((token, _)) = stream.advance() else {
        return Err(ParseError::new("unexpected end of formula", span));
    };

    match token {
        Token::Number(v) => Ok(Expr::Number(v)),
        Token::Ident(name) => {
            if stream.peek() == Some(&Token::LParen) {
                stream.advance();
                let args = parse_args(stream)?;
                Ok(Expr::Call(name, args))
            } else {
                Ok(Expr::Symbol(name))
            }
        }
        Token::LParen => {
            let inner = parse_bp(stream, 0)?;
            stream.expect(Token::RParen, "`)`")?;
            Ok(inner)
        }
        Token::Minus => {
            let operand = parse_bp(stream, PREC_NEG)?;
            Ok(match operand {
                Expr::Number(v) => Expr::Number(-v),
                other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
            })
        }
        Token::Plus => parse_bp(stream, PREC_NEG),
        Token::Not => {
            let operand = parse_bp(stream, PREC_NOT)?;
            Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
        }
        other => Err(ParseError::new(format!("unexpected token {other:?}"), span)),
    }
}

fn parse_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ParseError> {
    let mut args = Vec::new();
    if stream.peek() == Some(&Token::RParen) {
        stream.advance();
        return Ok(args);
    }
    loop {
        args.push(parse_bp(stream, 0)?);
        match stream.peek() {
            Some(Token::Comma) => {
                stream.advance();
            }
            Some(Token::RParen) => {
                stream.advance();
                return Ok(args);
            }
            _ => return Err(ParseError::new("expected `,` or `)`", stream.span())),
        }
    }
}
