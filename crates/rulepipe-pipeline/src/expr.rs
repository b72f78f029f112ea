//! Value expressions: field references, literals, arithmetic and a small set
//! of built-in functions.
//!
//! Expressions are parsed once when a pipeline is built and evaluated against
//! each record. Parsing uses `winnow`; the predicate grammar in
//! [`crate::condition`] reuses the token parsers defined here.

use std::borrow::Cow;
use std::fmt;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{any, one_of, take_while};
use winnow::{ModalResult, Parser};

use rulepipe_types::{EvalError, FieldPath, Record, RecordError, Value};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Field(FieldPath),
    Neg(Box<Expr>),
    Binary {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Concat,
    Upper,
    Lower,
    Len,
    Coalesce,
    ToString,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "concat" => Some(Function::Concat),
            "upper" => Some(Function::Upper),
            "lower" => Some(Function::Lower),
            "len" => Some(Function::Len),
            "coalesce" => Some(Function::Coalesce),
            "to_string" => Some(Function::ToString),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Concat => "concat",
            Function::Upper => "upper",
            Function::Lower => "lower",
            Function::Len => "len",
            Function::Coalesce => "coalesce",
            Function::ToString => "to_string",
        }
    }

    /// Variadic functions take one or more arguments, the rest exactly one.
    fn accepts(self, count: usize) -> bool {
        match self {
            Function::Concat | Function::Coalesce => count >= 1,
            _ => count == 1,
        }
    }
}

/// Words reserved by the predicate grammar. They never parse as field names.
pub(crate) const KEYWORDS: &[&str] = &["and", "or", "not", "has", "in", "true", "false", "null"];

/// A parse failure with the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (at offset {offset})")]
pub struct SyntaxError {
    pub offset: usize,
    pub message: String,
}

/// Parse a complete value expression.
pub fn parse_expr(source: &str) -> Result<Expr, SyntaxError> {
    parse_complete(source, expr)
}

/// Deepest nesting the grammars accept. Every open bracket and every unary
/// operator (`-`, `not`, `!`) adds a level.
pub const MAX_NESTING: usize = 64;

/// Run `parser` over all of `source`, surrounding whitespace allowed.
pub(crate) fn parse_complete<O>(
    source: &str,
    mut parser: impl FnMut(&mut &str) -> ModalResult<O>,
) -> Result<O, SyntaxError> {
    check_nesting(source)?;

    let mut input = source;
    let outcome = padded(&mut input, &mut parser);

    let offset = source.len() - input.len();
    match outcome {
        Ok(out) if input.is_empty() => Ok(out),
        Ok(_) => Err(SyntaxError {
            offset,
            message: format!("unexpected trailing input '{}'", snippet(input)),
        }),
        Err(e) => {
            let context = match e {
                ErrMode::Backtrack(c) | ErrMode::Cut(c) => c.to_string(),
                ErrMode::Incomplete(_) => String::new(),
            };
            let message = if !context.trim().is_empty() {
                context.replace('\n', "; ")
            } else if input.is_empty() {
                "unexpected end of input".to_string()
            } else {
                format!("unexpected input '{}'", snippet(input))
            };
            Err(SyntaxError { offset, message })
        }
    }
}

fn padded<O>(
    input: &mut &str,
    parser: &mut impl FnMut(&mut &str) -> ModalResult<O>,
) -> ModalResult<O> {
    let _ = ws.parse_next(input)?;
    let out = parser(input)?;
    let _ = ws.parse_next(input)?;
    Ok(out)
}

fn snippet(rest: &str) -> String {
    rest.chars().take(20).collect()
}

/// Token scan that rejects input nested beyond [`MAX_NESTING`] before the
/// recursive grammar sees it.
fn check_nesting(source: &str) -> Result<(), SyntaxError> {
    // Unary operators open at each bracket level.
    let mut levels: Vec<usize> = vec![0];
    let mut expect_operand = true;
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let deeper = match c {
            '\'' | '"' => {
                while let Some((_, d)) = chars.next() {
                    if d == '\\' {
                        chars.next();
                    } else if d == c {
                        break;
                    }
                }
                end_operand(&mut levels, &mut expect_operand);
                false
            }
            '(' | '[' => {
                levels.push(0);
                expect_operand = true;
                true
            }
            ')' | ']' => {
                if levels.len() > 1 {
                    levels.pop();
                }
                end_operand(&mut levels, &mut expect_operand);
                false
            }
            '-' if expect_operand => {
                bump(&mut levels);
                true
            }
            '!' if expect_operand && !matches!(chars.peek(), Some((_, '='))) => {
                bump(&mut levels);
                true
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut end = offset + c.len_utf8();
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_' || d == '.') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                match &source[offset..end] {
                    "not" if expect_operand => {
                        bump(&mut levels);
                        true
                    }
                    "and" | "or" => {
                        expect_operand = true;
                        false
                    }
                    _ => {
                        end_operand(&mut levels, &mut expect_operand);
                        false
                    }
                }
            }
            c if c.is_whitespace() => false,
            _ => {
                expect_operand = true;
                false
            }
        };

        if deeper && levels.len() - 1 + levels.iter().sum::<usize>() > MAX_NESTING {
            return Err(SyntaxError {
                offset,
                message: format!("nesting deeper than {MAX_NESTING} levels"),
            });
        }
    }
    Ok(())
}

fn bump(levels: &mut [usize]) {
    if let Some(top) = levels.last_mut() {
        *top += 1;
    }
}

fn end_operand(levels: &mut [usize], expect_operand: &mut bool) {
    if let Some(top) = levels.last_mut() {
        *top = 0;
    }
    *expect_operand = false;
}

// ---------------------------------------------------------------------------
// Token parsers
// ---------------------------------------------------------------------------

pub(crate) fn make_cut_error(desc: &'static str) -> ErrMode<ContextError> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

fn expected(desc: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(desc))
}

pub(crate) fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub(crate) fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// A whole-word keyword; `order` never matches `or`.
pub(crate) fn keyword(input: &mut &str, kw: &'static str) -> ModalResult<()> {
    identifier.verify(|id: &str| id == kw).void().parse_next(input)
}

/// Punctuation followed by optional whitespace.
pub(crate) fn symbol(input: &mut &str, mut sym: &'static str) -> ModalResult<()> {
    let _ = sym.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    Ok(())
}

fn number(input: &mut &str) -> ModalResult<Value> {
    let text: &str = (
        opt('-'),
        digit1,
        opt(('.', digit1)),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)?;

    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|_| make_cut_error("a valid float literal"))
    } else {
        text.parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| make_cut_error("an integer literal within 64-bit range"))
    }
}

/// Single- or double-quoted string with backslash escapes.
fn string_literal(input: &mut &str) -> ModalResult<String> {
    let quote = one_of(['\'', '"']).parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = cut_err(any)
            .context(expected("closing quote"))
            .parse_next(input)?;
        match c {
            c if c == quote => break,
            '\\' => {
                let esc = cut_err(any)
                    .context(expected("escape character"))
                    .parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    '\\' => s.push('\\'),
                    '\'' => s.push('\''),
                    '"' => s.push('"'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

fn list_literal(input: &mut &str) -> ModalResult<Value> {
    let _ = symbol(input, "[")?;
    let items: Vec<Value> =
        separated(0.., delimited(ws, literal, ws), ',').parse_next(input)?;
    let _ = cut_err(|i: &mut &str| symbol(i, "]"))
        .context(expected("']' closing the list"))
        .parse_next(input)?;
    Ok(Value::Sequence(items))
}

/// `null`, booleans, numbers, strings, and lists of literals.
pub(crate) fn literal(input: &mut &str) -> ModalResult<Value> {
    alt((
        |i: &mut &str| keyword(i, "null").map(|_| Value::Null),
        |i: &mut &str| keyword(i, "true").map(|_| Value::Bool(true)),
        |i: &mut &str| keyword(i, "false").map(|_| Value::Bool(false)),
        number,
        string_literal.map(Value::String),
        list_literal,
    ))
    .parse_next(input)
}

/// `a.b[0].c`, rejecting reserved words as the leading segment.
pub(crate) fn field_path(input: &mut &str) -> ModalResult<FieldPath> {
    let text: &str = (
        identifier.verify(|id: &str| !KEYWORDS.contains(&id)),
        repeat::<_, _, (), _, _>(
            0..,
            alt((
                preceded('.', identifier).void(),
                ('[', digit1, ']').void(),
            )),
        ),
    )
        .take()
        .parse_next(input)?;

    FieldPath::parse(text).map_err(|_| make_cut_error("a valid field path"))
}

// ---------------------------------------------------------------------------
// Expression grammar
// ---------------------------------------------------------------------------

fn call(input: &mut &str) -> ModalResult<Expr> {
    let func = identifier
        .verify_map(Function::from_name)
        .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = symbol(input, "(")?;
    let args: Vec<Expr> = separated(0.., delimited(ws, expr, ws), ',').parse_next(input)?;
    let _ = cut_err(|i: &mut &str| symbol(i, ")"))
        .context(expected("')' closing the argument list"))
        .parse_next(input)?;

    if !func.accepts(args.len()) {
        return Err(make_cut_error("a supported number of function arguments"));
    }
    Ok(Expr::Call { func, args })
}

fn parenthesized(input: &mut &str) -> ModalResult<Expr> {
    let _ = symbol(input, "(")?;
    let inner = expr.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = ')'.parse_next(input)?;
    Ok(inner)
}

fn negated(input: &mut &str) -> ModalResult<Expr> {
    let _ = symbol(input, "-")?;
    let inner = factor.parse_next(input)?;
    Ok(Expr::Neg(Box::new(inner)))
}

fn factor(input: &mut &str) -> ModalResult<Expr> {
    let out = alt((
        literal.map(Expr::Literal),
        call,
        field_path.map(Expr::Field),
        parenthesized,
        negated,
    ))
    .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    Ok(out)
}

fn term(input: &mut &str) -> ModalResult<Expr> {
    let mut left = factor.parse_next(input)?;
    loop {
        let op = opt(alt((
            '*'.value(ArithOp::Mul),
            '/'.value(ArithOp::Div),
            '%'.value(ArithOp::Rem),
        )))
        .parse_next(input)?;
        let Some(op) = op else { break };
        let _ = ws.parse_next(input)?;
        let right = cut_err(factor)
            .context(expected("operand"))
            .parse_next(input)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

/// `term (("+" | "-") term)*`
pub(crate) fn expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = term.parse_next(input)?;
    loop {
        let op = opt(alt(('+'.value(ArithOp::Add), '-'.value(ArithOp::Sub)))).parse_next(input)?;
        let Some(op) = op else { break };
        let _ = ws.parse_next(input)?;
        let right = cut_err(term)
            .context(expected("operand"))
            .parse_next(input)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn field(path: FieldPath) -> Self {
        Expr::Field(path)
    }

    /// Evaluate against `record`. Field reads borrow from the record.
    pub fn eval<'a>(&'a self, record: &'a Record) -> Result<Cow<'a, Value>, EvalError> {
        match self {
            Expr::Literal(v) => Ok(Cow::Borrowed(v)),
            Expr::Field(path) => resolve(record, path).map(Cow::Borrowed),
            Expr::Neg(inner) => {
                let v = inner.eval(record)?;
                negate(&v).map(Cow::Owned)
            }
            Expr::Binary { op, left, right } => {
                let l = left.eval(record)?;
                let r = right.eval(record)?;
                arith(*op, &l, &r).map(Cow::Owned)
            }
            Expr::Call { func, args } => call_function(*func, args, record).map(Cow::Owned),
        }
    }
}

/// Read a field for an expression operand.
pub(crate) fn resolve<'a>(record: &'a Record, path: &FieldPath) -> Result<&'a Value, EvalError> {
    record.get(path).map_err(|e| match e {
        RecordError::FieldNotFound { .. } | RecordError::IndexOutOfBounds { .. } => {
            EvalError::MissingOperand {
                path: path.to_string(),
            }
        }
        other => EvalError::type_mismatch(other.to_string()),
    })
}

fn negate(v: &Value) -> Result<Value, EvalError> {
    match v {
        Value::Integer(i) => i
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| EvalError::Overflow { op: "-".into() }),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(EvalError::type_mismatch(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

fn arith(op: ArithOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    if let (ArithOp::Add, Value::String(a), Value::String(b)) = (op, l, r) {
        return Ok(Value::String(format!("{a}{b}")));
    }

    let mismatch = || {
        EvalError::type_mismatch(format!(
            "cannot apply '{}' to {} and {}",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))
    };
    let overflow = || EvalError::Overflow {
        op: op.symbol().into(),
    };

    if let (Value::Integer(a), Value::Integer(b)) = (l, r) {
        let (a, b) = (*a, *b);
        return match op {
            ArithOp::Add => a.checked_add(b).map(Value::Integer).ok_or_else(overflow),
            ArithOp::Sub => a.checked_sub(b).map(Value::Integer).ok_or_else(overflow),
            ArithOp::Mul => a.checked_mul(b).map(Value::Integer).ok_or_else(overflow),
            ArithOp::Div if b == 0 => Err(EvalError::DivisionByZero),
            ArithOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            ArithOp::Rem if b == 0 => Err(EvalError::DivisionByZero),
            ArithOp::Rem => a.checked_rem(b).map(Value::Integer).ok_or_else(overflow),
        };
    }

    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(mismatch()),
    };
    match op {
        ArithOp::Add => Ok(Value::Float(a + b)),
        ArithOp::Sub => Ok(Value::Float(a - b)),
        ArithOp::Mul => Ok(Value::Float(a * b)),
        ArithOp::Div | ArithOp::Rem if b == 0.0 => Err(EvalError::DivisionByZero),
        ArithOp::Div => Ok(Value::Float(a / b)),
        ArithOp::Rem => Ok(Value::Float(a % b)),
    }
}

fn call_function(func: Function, args: &[Expr], record: &Record) -> Result<Value, EvalError> {
    if func == Function::Coalesce {
        for arg in args {
            match arg.eval(record) {
                Ok(v) if !v.is_null() => return Ok(v.into_owned()),
                Ok(_) | Err(EvalError::MissingOperand { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        return Ok(Value::Null);
    }

    let values = args
        .iter()
        .map(|a| a.eval(record))
        .collect::<Result<Vec<_>, _>>()?;

    match (func, values.as_slice()) {
        (Function::Concat, values) => Ok(Value::String(
            values.iter().map(|v| v.to_string()).collect(),
        )),
        (Function::Coalesce, _) => Ok(Value::Null),
        (Function::ToString, [value]) => Ok(Value::String(value.to_string())),
        (Function::Upper | Function::Lower, [value]) => match value.as_ref() {
            Value::String(s) if func == Function::Upper => Ok(Value::String(s.to_uppercase())),
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(EvalError::type_mismatch(format!(
                "{}() expects a string, got {}",
                func.name(),
                other.type_name()
            ))),
        },
        (Function::Len, [value]) => {
            let len = match value.as_ref() {
                Value::String(s) => s.chars().count(),
                Value::Sequence(items) => items.len(),
                Value::Record(r) => r.len(),
                other => {
                    return Err(EvalError::type_mismatch(format!(
                        "len() expects a string, sequence or record, got {}",
                        other.type_name()
                    )))
                }
            };
            i64::try_from(len)
                .map(Value::Integer)
                .map_err(|_| EvalError::Overflow { op: "len".into() })
        }
        // Hand-built calls skip the parser's arity check.
        (_, values) => Err(EvalError::type_mismatch(format!(
            "{}() takes exactly one argument, got {}",
            func.name(),
            values.len()
        ))),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "{:?}", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Field(p) => write!(f, "{}", p),
            Expr::Neg(inner) => write!(f, "-{}", inner),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: serde_json::Value) -> Record {
        Record::from_json(v).unwrap()
    }

    fn eval(src: &str, rec: &Record) -> Result<Value, EvalError> {
        parse_expr(src).unwrap().eval(rec).map(Cow::into_owned)
    }

    #[test]
    fn parses_precedence() {
        let e = parse_expr("a + b * 2").unwrap();
        assert_eq!(e.to_string(), "(a + (b * 2))");
        let e = parse_expr("(a + b) * 2").unwrap();
        assert_eq!(e.to_string(), "((a + b) * 2)");
    }

    #[test]
    fn parses_literals() {
        assert_eq!(parse_expr("null").unwrap(), Expr::Literal(Value::Null));
        assert_eq!(parse_expr("-12").unwrap(), Expr::Literal(Value::Integer(-12)));
        assert_eq!(parse_expr("2.5e1").unwrap(), Expr::Literal(Value::Float(25.0)));
        assert_eq!(
            parse_expr(r#"'it\'s'"#).unwrap(),
            Expr::Literal(Value::from("it's"))
        );
        assert_eq!(
            parse_expr("[1, 'a', null]").unwrap(),
            Expr::Literal(Value::Sequence(vec![
                Value::Integer(1),
                Value::from("a"),
                Value::Null
            ]))
        );
    }

    #[test]
    fn field_names_may_start_with_keywords() {
        let e = parse_expr("nullable + order").unwrap();
        assert_eq!(e.to_string(), "(nullable + order)");
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "a +", "'open", "upper(a, b)", "a b", "and", "len()", "x[1"] {
            assert!(parse_expr(bad).is_err(), "'{bad}' should fail to parse");
        }
    }

    #[test]
    fn syntax_error_reports_offset() {
        let err = parse_expr("a + b )").unwrap_err();
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn integer_arithmetic_is_checked() {
        let rec = record(json!({"big": i64::MAX, "n": 7}));
        assert_eq!(eval("n * 2 - 4", &rec).unwrap(), Value::Integer(10));
        assert_eq!(eval("n % 4", &rec).unwrap(), Value::Integer(3));
        assert!(matches!(eval("big + 1", &rec), Err(EvalError::Overflow { .. })));
    }

    #[test]
    fn division_always_yields_float() {
        let rec = record(json!({"n": 7}));
        assert_eq!(eval("n / 2", &rec).unwrap(), Value::Float(3.5));
        assert_eq!(eval("n / 0", &rec), Err(EvalError::DivisionByZero));
        assert_eq!(eval("n % 0", &rec), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn mixed_numbers_promote() {
        let rec = record(json!({"i": 2, "f": 0.5}));
        assert_eq!(eval("i + f", &rec).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn plus_concatenates_strings() {
        let rec = record(json!({"first": "Ada", "last": "Lovelace"}));
        assert_eq!(
            eval("first + ' ' + last", &rec).unwrap(),
            Value::from("Ada Lovelace")
        );
        assert!(matches!(
            eval("first + 1", &rec),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn missing_field_is_missing_operand() {
        let rec = record(json!({"a": {"b": [1]}}));
        assert_eq!(
            eval("a.c", &rec),
            Err(EvalError::MissingOperand { path: "a.c".into() })
        );
        assert_eq!(
            eval("a.b[3]", &rec),
            Err(EvalError::MissingOperand { path: "a.b[3]".into() })
        );
        assert_eq!(eval("a.b[0]", &rec).unwrap(), Value::Integer(1));
    }

    #[test]
    fn stepping_into_a_scalar_is_a_type_mismatch() {
        let rec = record(json!({"a": {"b": [1]}}));
        assert!(matches!(
            eval("a.b[0].x", &rec),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(matches!(
            eval("coalesce(a.b[0].x, 1)", &rec),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn functions() {
        let rec = record(json!({"name": "Ada", "tags": ["x", "y"], "nothing": null}));
        assert_eq!(eval("upper(name)", &rec).unwrap(), Value::from("ADA"));
        assert_eq!(eval("lower(name)", &rec).unwrap(), Value::from("ada"));
        assert_eq!(eval("len(tags)", &rec).unwrap(), Value::Integer(2));
        assert_eq!(eval("len(name)", &rec).unwrap(), Value::Integer(3));
        assert_eq!(
            eval("concat(name, '-', 1)", &rec).unwrap(),
            Value::from("Ada-1")
        );
        assert_eq!(eval("to_string(len(tags))", &rec).unwrap(), Value::from("2"));
        assert_eq!(
            eval("coalesce(missing, nothing, name)", &rec).unwrap(),
            Value::from("Ada")
        );
        assert_eq!(eval("coalesce(missing)", &rec).unwrap(), Value::Null);
        assert!(matches!(eval("upper(tags)", &rec), Err(EvalError::TypeMismatch { .. })));
    }

    #[test]
    fn hand_built_call_with_wrong_arity_is_an_error() {
        let rec = record(json!({"name": "Ada"}));
        for func in [Function::Upper, Function::Lower, Function::Len, Function::ToString] {
            let empty = Expr::Call { func, args: vec![] };
            assert!(
                matches!(empty.eval(&rec), Err(EvalError::TypeMismatch { .. })),
                "{}()",
                func.name()
            );
        }

        let two = Expr::Call {
            func: Function::Upper,
            args: vec![Expr::literal("a"), Expr::literal("b")],
        };
        assert!(matches!(two.eval(&rec), Err(EvalError::TypeMismatch { .. })));

        let concat = Expr::Call {
            func: Function::Concat,
            args: vec![],
        };
        assert_eq!(concat.eval(&rec).unwrap().into_owned(), Value::from(""));
    }

    #[test]
    fn nesting_is_bounded() {
        let ok = format!("{}a{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(parse_expr(&ok).is_ok());

        let deep = format!("{}a{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        let err = parse_expr(&deep).unwrap_err();
        assert_eq!(err.offset, MAX_NESTING);
        assert!(err.message.contains("nesting"), "{}", err.message);

        let negations = format!("{}1", "-".repeat(10_000));
        assert!(parse_expr(&negations).is_err());
        let brackets = format!("{}1", "[".repeat(100_000));
        assert!(parse_expr(&brackets).is_err());
    }

    #[test]
    fn long_flat_expressions_are_not_nesting() {
        let sum = vec!["a"; 500].join(" - ");
        let rec = record(json!({"a": 1}));
        assert_eq!(eval(&sum, &rec).unwrap(), Value::Integer(-498));

        let quoted = format!("'{}'", "(".repeat(200));
        assert!(parse_expr(&quoted).is_ok());
    }

    #[test]
    fn field_reads_borrow_from_record() {
        let rec = record(json!({"a": "text"}));
        let e = parse_expr("a").unwrap();
        assert!(matches!(e.eval(&rec).unwrap(), Cow::Borrowed(_)));
    }
}
