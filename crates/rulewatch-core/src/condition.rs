//! The rule condition language.
//!
//! A condition is a boolean expression over the three campaign metrics
//! `spend`, `ctr` and `roas`:
//!
//! ```text
//! (spend > 500 && ctr < 1) || roas < 2
//! spend * 0.1 >= roas
//! ```
//!
//! Source text is tokenized, parsed by a recursive-descent parser into a
//! typed tree ([`Condition`] for booleans, [`Operand`] for numbers) and then
//! evaluated directly against a [`Metrics`] value. Nothing outside the
//! grammar below can be expressed, so there is nothing to sandbox.
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := cmp ( "&&" cmp )*
//! cmp     := sum [ op sum ]
//! op      := ">" | "<" | ">=" | "<=" | "==" | "===" | "!=" | "!=="
//! sum     := term ( ("+" | "-") term )*
//! term    := unary ( ("*" | "/") unary )*
//! unary   := "-" unary | atom
//! atom    := NUMBER | "spend" | "ctr" | "roas" | "(" or ")"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::metrics::Metrics;

/// Maximum nesting of parentheses and unary minus.
const MAX_DEPTH: usize = 64;

/// Maximum number of tokens in one condition. Operator chains build the tree
/// one level per operator, so this also bounds the depth of `&&`, `||` and
/// arithmetic chains that evaluation, formatting and drop recurse through.
pub const MAX_TOKENS: usize = 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,

    #[error("unexpected character '{ch}' at {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unknown identifier '{name}' at {offset}: only spend, ctr and roas are allowed")]
    UnknownIdentifier { name: String, offset: usize },

    #[error("invalid number '{text}' at {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("unexpected '{found}' at {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unexpected end of condition")]
    UnexpectedEnd,

    #[error("function calls are not supported (at {offset})")]
    FunctionCall { offset: usize },

    #[error("expected a comparison at {offset}")]
    ExpectedBoolean { offset: usize },

    #[error("expected a number or metric at {offset}")]
    ExpectedNumber { offset: usize },

    #[error("comparisons cannot be chained (at {offset})")]
    ChainedComparison { offset: usize },

    #[error("unclosed '(' at {offset}")]
    UnclosedParen { offset: usize },

    #[error("condition is nested too deeply (at {offset})")]
    TooDeep { offset: usize },

    #[error("condition is too long (more than {} tokens, at {offset})", MAX_TOKENS)]
    TooLong { offset: usize },

    #[error("arithmetic produced a non-finite value")]
    NonFinite,
}

// ---------------------------------------------------------------------------
// Metric / operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Spend,
    Ctr,
    Roas,
}

impl Metric {
    pub fn all() -> &'static [Metric] {
        &[Metric::Spend, Metric::Ctr, Metric::Roas]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Spend => "spend",
            Metric::Ctr => "ctr",
            Metric::Roas => "roas",
        }
    }

    fn lookup(name: &str) -> Option<Metric> {
        Metric::all().iter().copied().find(|m| m.as_str() == name)
    }

    fn value(self, metrics: &Metrics) -> f64 {
        match self {
            Metric::Spend => metrics.spend,
            Metric::Ctr => metrics.ctr,
            Metric::Roas => metrics.roas,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    fn apply(self, l: f64, r: f64) -> bool {
        match self {
            CmpOp::Gt => l > r,
            CmpOp::Lt => l < r,
            CmpOp::Ge => l >= r,
            CmpOp::Le => l <= r,
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }

    fn apply(self, l: f64, r: f64) -> f64 {
        match self {
            ArithOp::Add => l + r,
            ArithOp::Sub => l - r,
            ArithOp::Mul => l * r,
            ArithOp::Div => l / r,
        }
    }
}

// ---------------------------------------------------------------------------
// Typed tree
// ---------------------------------------------------------------------------

/// Numeric side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(f64),
    Metric(Metric),
    Neg(Box<Operand>),
    Arith {
        left: Box<Operand>,
        op: ArithOp,
        right: Box<Operand>,
    },
}

impl Operand {
    pub fn evaluate(&self, metrics: &Metrics) -> Result<f64, ConditionError> {
        let value = match self {
            Operand::Literal(v) => *v,
            Operand::Metric(m) => m.value(metrics),
            Operand::Neg(inner) => -inner.evaluate(metrics)?,
            Operand::Arith { left, op, right } => {
                op.apply(left.evaluate(metrics)?, right.evaluate(metrics)?)
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ConditionError::NonFinite)
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Metric(m) => write!(f, "{m}"),
            Operand::Neg(inner) => write!(f, "-{inner}"),
            Operand::Arith { left, op, right } => write!(f, "({left} {} {right})", op.as_str()),
        }
    }
}

/// A compiled rule condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Parse condition source text.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let parsed = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(ConditionError::UnexpectedToken {
                found: tok.kind.to_string(),
                offset: tok.offset,
            });
        }
        parsed.into_condition()
    }

    /// Evaluate against metric values. `&&` and `||` short-circuit.
    pub fn evaluate(&self, metrics: &Metrics) -> Result<bool, ConditionError> {
        match self {
            Condition::Compare { left, op, right } => {
                Ok(op.apply(left.evaluate(metrics)?, right.evaluate(metrics)?))
            }
            Condition::And(l, r) => Ok(l.evaluate(metrics)? && r.evaluate(metrics)?),
            Condition::Or(l, r) => Ok(l.evaluate(metrics)? || r.evaluate(metrics)?),
        }
    }

    /// Fail-closed evaluation: any evaluation error counts as "no match".
    pub fn matches(&self, metrics: &Metrics) -> bool {
        match self.evaluate(metrics) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(condition = %self, error = %e, "condition evaluation failed");
                false
            }
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { left, op, right } => write!(f, "{left} {} {right}", op.as_str()),
            Condition::And(l, r) => write!(f, "({l} && {r})"),
            Condition::Or(l, r) => write!(f, "({l} || {r})"),
        }
    }
}

/// Parse and evaluate `condition` in one step.
///
/// Never fails: a condition that does not parse, or that errors while being
/// evaluated, is treated as not matching.
pub fn evaluate(condition: &str, metrics: &Metrics) -> bool {
    match Condition::parse(condition) {
        Ok(c) => c.matches(metrics),
        Err(e) => {
            tracing::debug!(condition, error = %e, "condition rejected");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Metric(Metric),
    Cmp(CmpOp),
    Arith(ArithOp),
    AndAnd,
    OrOr,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(v) => write!(f, "{v}"),
            TokenKind::Metric(m) => write!(f, "{m}"),
            TokenKind::Cmp(op) => f.write_str(op.as_str()),
            TokenKind::Arith(op) => f.write_str(op.as_str()),
            TokenKind::AndAnd => f.write_str("&&"),
            TokenKind::OrOr => f.write_str("||"),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if tokens.len() == MAX_TOKENS {
            return Err(ConditionError::TooLong { offset: start });
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let text = &source[start..i];
            let value = text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ConditionError::InvalidNumber {
                    text: text.to_string(),
                    offset: start,
                })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            let name = &source[start..i];
            let metric = Metric::lookup(name).ok_or_else(|| ConditionError::UnknownIdentifier {
                name: name.to_string(),
                offset: start,
            })?;
            tokens.push(Token {
                kind: TokenKind::Metric(metric),
                offset: start,
            });
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let (kind, len) = match (c, next) {
            (b'>', Some(b'=')) => (TokenKind::Cmp(CmpOp::Ge), 2),
            (b'>', _) => (TokenKind::Cmp(CmpOp::Gt), 1),
            (b'<', Some(b'=')) => (TokenKind::Cmp(CmpOp::Le), 2),
            (b'<', _) => (TokenKind::Cmp(CmpOp::Lt), 1),
            (b'=', Some(b'=')) if bytes.get(i + 2) == Some(&b'=') => (TokenKind::Cmp(CmpOp::Eq), 3),
            (b'=', Some(b'=')) => (TokenKind::Cmp(CmpOp::Eq), 2),
            (b'!', Some(b'=')) if bytes.get(i + 2) == Some(&b'=') => (TokenKind::Cmp(CmpOp::Ne), 3),
            (b'!', Some(b'=')) => (TokenKind::Cmp(CmpOp::Ne), 2),
            (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
            (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
            (b'+', _) => (TokenKind::Arith(ArithOp::Add), 1),
            (b'-', _) => (TokenKind::Arith(ArithOp::Sub), 1),
            (b'*', _) => (TokenKind::Arith(ArithOp::Mul), 1),
            (b'/', _) => (TokenKind::Arith(ArithOp::Div), 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            _ => {
                let ch = source[start..].chars().next().unwrap_or('\u{fffd}');
                return Err(ConditionError::UnexpectedChar { ch, offset: start });
            }
        };
        tokens.push(Token {
            kind,
            offset: start,
        });
        i += len;
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Intermediate result: parenthesised groups may hold either type until the
/// surrounding operator decides which one is required.
enum Node {
    Bool(Condition),
    Num(Operand),
}

struct Parsed {
    node: Node,
    offset: usize,
}

impl Parsed {
    fn into_condition(self) -> Result<Condition, ConditionError> {
        match self.node {
            Node::Bool(c) => Ok(c),
            Node::Num(_) => Err(ConditionError::ExpectedBoolean {
                offset: self.offset,
            }),
        }
    }

    fn into_operand(self) -> Result<Operand, ConditionError> {
        match self.node {
            Node::Num(o) => Ok(o),
            Node::Bool(_) => Err(ConditionError::ExpectedNumber {
                offset: self.offset,
            }),
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn descend(&mut self, offset: usize) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::TooDeep { offset });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Parsed, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek_kind() == Some(&TokenKind::OrOr) {
            self.pos += 1;
            let right = self.parse_and()?;
            let offset = left.offset;
            let cond = Condition::Or(
                Box::new(left.into_condition()?),
                Box::new(right.into_condition()?),
            );
            left = Parsed {
                node: Node::Bool(cond),
                offset,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Parsed, ConditionError> {
        let mut left = self.parse_comparison()?;
        while self.peek_kind() == Some(&TokenKind::AndAnd) {
            self.pos += 1;
            let right = self.parse_comparison()?;
            let offset = left.offset;
            let cond = Condition::And(
                Box::new(left.into_condition()?),
                Box::new(right.into_condition()?),
            );
            left = Parsed {
                node: Node::Bool(cond),
                offset,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Parsed, ConditionError> {
        let left = self.parse_sum()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Cmp(op)) => *op,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_sum()?;
        if let Some(tok) = self.peek() {
            if matches!(tok.kind, TokenKind::Cmp(_)) {
                return Err(ConditionError::ChainedComparison { offset: tok.offset });
            }
        }
        let offset = left.offset;
        Ok(Parsed {
            node: Node::Bool(Condition::Compare {
                left: left.into_operand()?,
                op,
                right: right.into_operand()?,
            }),
            offset,
        })
    }

    fn parse_sum(&mut self) -> Result<Parsed, ConditionError> {
        let mut left = self.parse_term()?;
        while let Some(TokenKind::Arith(op @ (ArithOp::Add | ArithOp::Sub))) = self.peek_kind() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_term()?;
            left = arith(left, op, right)?;
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Parsed, ConditionError> {
        let mut left = self.parse_unary()?;
        while let Some(TokenKind::Arith(op @ (ArithOp::Mul | ArithOp::Div))) = self.peek_kind() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_unary()?;
            left = arith(left, op, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Parsed, ConditionError> {
        let Some(tok) = self.peek() else {
            return Err(ConditionError::UnexpectedEnd);
        };
        if tok.kind != TokenKind::Arith(ArithOp::Sub) {
            return self.parse_atom();
        }
        let offset = tok.offset;
        self.pos += 1;
        self.descend(offset)?;
        let inner = self.parse_unary()?.into_operand()?;
        self.depth -= 1;
        Ok(Parsed {
            node: Node::Num(Operand::Neg(Box::new(inner))),
            offset,
        })
    }

    fn parse_atom(&mut self) -> Result<Parsed, ConditionError> {
        let Some(tok) = self.advance() else {
            return Err(ConditionError::UnexpectedEnd);
        };
        let offset = tok.offset;
        match tok.kind.clone() {
            TokenKind::Number(v) => Ok(Parsed {
                node: Node::Num(Operand::Literal(v)),
                offset,
            }),
            TokenKind::Metric(m) => {
                if self.peek_kind() == Some(&TokenKind::LParen) {
                    return Err(ConditionError::FunctionCall { offset });
                }
                Ok(Parsed {
                    node: Node::Num(Operand::Metric(m)),
                    offset,
                })
            }
            TokenKind::LParen => {
                self.descend(offset)?;
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => {}
                    _ => return Err(ConditionError::UnclosedParen { offset }),
                }
                self.depth -= 1;
                Ok(Parsed {
                    node: inner.node,
                    offset,
                })
            }
            other => Err(ConditionError::UnexpectedToken {
                found: other.to_string(),
                offset,
            }),
        }
    }
}

fn arith(left: Parsed, op: ArithOp, right: Parsed) -> Result<Parsed, ConditionError> {
    let offset = left.offset;
    Ok(Parsed {
        node: Node::Num(Operand::Arith {
            left: Box::new(left.into_operand()?),
            op,
            right: Box::new(right.into_operand()?),
        }),
        offset,
    })
}
