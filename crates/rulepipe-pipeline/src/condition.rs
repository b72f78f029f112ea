//! Predicate language for condition nodes: parser and evaluator.
//!
//! Grammar:
//! ```text
//! predicate  ::= and ( ("or" | "||") and )*
//! and        ::= unary ( ("and" | "&&") unary )*
//! unary      ::= ("not" | "!") unary | atom
//! atom       ::= comparison | "(" predicate ")" | has | in | "true" | "false"
//! has        ::= "has" "(" path ")"
//! in         ::= "in" "(" expr "," "[" literal ("," literal)* "]" ")"
//! comparison ::= expr ("=" | "==" | "!=" | "<" | "<=" | ">" | ">=") expr
//! ```
//!
//! Operands are [`Expr`]s. Evaluation errors (a missing operand, a type
//! mismatch in arithmetic) propagate out of [`Predicate::evaluate`]; callers
//! decide how to fold them.

use std::cmp::Ordering;

use winnow::combinator::{alt, cut_err, delimited, repeat, separated};
use winnow::error::{StrContext, StrContextValue};
use winnow::{ModalResult, Parser};

use rulepipe_types::{EvalError, FieldPath, Record, Value};

use crate::expr::{expr, field_path, keyword, literal, parse_complete, symbol, ws, Expr, SyntaxError};

/// A parsed predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    Has(FieldPath),
    In {
        subject: Expr,
        set: Vec<Value>,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Equality is defined for every pair of values; ordering only for
    /// number/number and string/string; other pairs compare `false`.
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            CompareOp::Eq => left.loose_eq(right),
            CompareOp::NotEq => !left.loose_eq(right),
            CompareOp::Lt => left.compare(right) == Some(Ordering::Less),
            CompareOp::LtEq => matches!(
                left.compare(right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gt => left.compare(right) == Some(Ordering::Greater),
            CompareOp::GtEq => matches!(
                left.compare(right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Parse a predicate string. Empty input is an error.
pub fn parse_predicate(input: &str) -> Result<Predicate, SyntaxError> {
    parse_complete(input, or_expr)
}

impl Predicate {
    /// Evaluate left to right. `and` / `or` short-circuit, so the right-hand
    /// side is never touched once the result is known.
    pub fn evaluate(&self, record: &Record) -> Result<bool, EvalError> {
        match self {
            Predicate::Const(b) => Ok(*b),
            Predicate::Compare { left, op, right } => {
                let l = left.eval(record)?;
                let r = right.eval(record)?;
                Ok(op.apply(&l, &r))
            }
            Predicate::Has(path) => Ok(record.contains(path)),
            Predicate::In { subject, set } => {
                let v = subject.eval(record)?;
                Ok(set.iter().any(|candidate| v.loose_eq(candidate)))
            }
            Predicate::Not(inner) => Ok(!inner.evaluate(record)?),
            Predicate::And(a, b) => Ok(a.evaluate(record)? && b.evaluate(record)?),
            Predicate::Or(a, b) => Ok(a.evaluate(record)? || b.evaluate(record)?),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn expected(desc: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(desc))
}

fn or_op(input: &mut &str) -> ModalResult<()> {
    alt((|i: &mut &str| keyword(i, "or"), |i: &mut &str| symbol(i, "||"))).parse_next(input)?;
    let _ = ws.parse_next(input)?;
    Ok(())
}

fn and_op(input: &mut &str) -> ModalResult<()> {
    alt((|i: &mut &str| keyword(i, "and"), |i: &mut &str| symbol(i, "&&"))).parse_next(input)?;
    let _ = ws.parse_next(input)?;
    Ok(())
}

fn or_expr(input: &mut &str) -> ModalResult<Predicate> {
    let mut left = and_expr.parse_next(input)?;
    let rest: Vec<Predicate> = repeat(
        0..,
        (or_op, cut_err(and_expr).context(expected("predicate after 'or'"))).map(|(_, p)| p),
    )
    .parse_next(input)?;
    for right in rest {
        left = Predicate::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn and_expr(input: &mut &str) -> ModalResult<Predicate> {
    let mut left = unary.parse_next(input)?;
    let rest: Vec<Predicate> = repeat(
        0..,
        (and_op, cut_err(unary).context(expected("predicate after 'and'"))).map(|(_, p)| p),
    )
    .parse_next(input)?;
    for right in rest {
        left = Predicate::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn not_op(input: &mut &str) -> ModalResult<()> {
    alt((|i: &mut &str| keyword(i, "not"), |i: &mut &str| symbol(i, "!"))).parse_next(input)?;
    let _ = ws.parse_next(input)?;
    Ok(())
}

fn unary(input: &mut &str) -> ModalResult<Predicate> {
    alt((
        (not_op, cut_err(unary).context(expected("predicate after 'not'")))
            .map(|(_, p)| Predicate::Not(Box::new(p))),
        atom,
    ))
    .parse_next(input)
}

fn atom(input: &mut &str) -> ModalResult<Predicate> {
    let out = alt((
        comparison,
        grouped,
        has,
        membership,
        |i: &mut &str| keyword(i, "true").map(|_| Predicate::Const(true)),
        |i: &mut &str| keyword(i, "false").map(|_| Predicate::Const(false)),
    ))
    .context(StrContext::Label("predicate"))
    .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    Ok(out)
}

fn compare_op(input: &mut &str) -> ModalResult<CompareOp> {
    let op = alt((
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::NotEq),
        "<=".value(CompareOp::LtEq),
        ">=".value(CompareOp::GtEq),
        "=".value(CompareOp::Eq),
        "<".value(CompareOp::Lt),
        ">".value(CompareOp::Gt),
    ))
    .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    Ok(op)
}

fn comparison(input: &mut &str) -> ModalResult<Predicate> {
    let left = expr.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let op = compare_op.parse_next(input)?;
    let right = cut_err(expr)
        .context(expected("right-hand operand"))
        .parse_next(input)?;
    Ok(Predicate::Compare { left, op, right })
}

fn grouped(input: &mut &str) -> ModalResult<Predicate> {
    let _ = symbol(input, "(")?;
    let inner = or_expr.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = ')'.parse_next(input)?;
    Ok(inner)
}

fn has(input: &mut &str) -> ModalResult<Predicate> {
    let _ = keyword(input, "has")?;
    let _ = ws.parse_next(input)?;
    let _ = cut_err(|i: &mut &str| symbol(i, "("))
        .context(expected("'(' after has"))
        .parse_next(input)?;
    let path = cut_err(field_path)
        .context(expected("field path"))
        .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = cut_err(')').context(expected("')'")).parse_next(input)?;
    Ok(Predicate::Has(path))
}

fn membership(input: &mut &str) -> ModalResult<Predicate> {
    let _ = keyword(input, "in")?;
    let _ = ws.parse_next(input)?;
    let _ = cut_err(|i: &mut &str| symbol(i, "("))
        .context(expected("'(' after in"))
        .parse_next(input)?;
    let subject = cut_err(expr)
        .context(expected("membership subject"))
        .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = cut_err(|i: &mut &str| symbol(i, ","))
        .context(expected("',' before the value list"))
        .parse_next(input)?;
    let _ = cut_err(|i: &mut &str| symbol(i, "["))
        .context(expected("'[' opening the value list"))
        .parse_next(input)?;
    let set: Vec<Value> = separated(1.., delimited(ws, literal, ws), ',').parse_next(input)?;
    let _ = cut_err(|i: &mut &str| symbol(i, "]"))
        .context(expected("']' closing the value list"))
        .parse_next(input)?;
    let _ = cut_err(')').context(expected("')'")).parse_next(input)?;
    Ok(Predicate::In { subject, set })
}
