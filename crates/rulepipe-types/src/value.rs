//! Field values carried by a [`Record`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Record;

/// A single field value.
///
/// `PartialEq` is structural: `Integer(1)` and `Float(1.0)` are different
/// values. Use [`Value::loose_eq`] when numeric promotion is wanted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Record(Record),
    Sequence(Vec<Value>),
}

impl Value {
    /// Human-readable type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Record(_) => "record",
            Value::Sequence(_) => "sequence",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view with integer-to-float promotion.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Nesting depth: scalars are 0, containers are one more than their
    /// deepest element.
    pub fn depth(&self) -> usize {
        match self {
            Value::Record(r) => r.depth(),
            Value::Sequence(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Ordering between numbers (with promotion) or between strings.
    /// Every other pairing is incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Equality with numeric promotion; otherwise structural.
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self.is_number() && other.is_number() {
            return self.compare(other) == Some(Ordering::Equal);
        }
        self == other
    }

    /// Convert to a `serde_json::Value` without consuming `self`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Record(r) => r.to_json(),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_split_into_integer_and_float() {
        assert_eq!(Value::from(json!(3)), Value::Integer(3));
        assert_eq!(Value::from(json!(2.5)), Value::Float(2.5));
        assert_eq!(Value::from(json!(u64::MAX)), Value::Float(u64::MAX as f64));
    }

    #[test]
    fn structural_equality_keeps_numeric_types_apart() {
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert!(Value::Integer(1).loose_eq(&Value::Float(1.0)));
        assert!(!Value::from("1").loose_eq(&Value::Integer(1)));
    }

    #[test]
    fn compare_promotes_numbers_and_orders_strings() {
        assert_eq!(Value::Integer(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from("1").compare(&Value::Integer(1)), None);
        assert_eq!(Value::Bool(true).compare(&Value::Bool(false)), None);
        assert_eq!(Value::Float(f64::NAN).compare(&Value::Float(1.0)), None);
    }

    #[test]
    fn depth_counts_container_nesting() {
        assert_eq!(Value::Integer(1).depth(), 0);
        assert_eq!(Value::from(json!([1, 2])).depth(), 1);
        assert_eq!(Value::from(json!({"a": {"b": [1]}})).depth(), 3);
    }

    #[test]
    fn display_renders_strings_bare() {
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::Integer(7).to_string(), "7");
        assert_eq!(Value::from(json!([1, "x"])).to_string(), r#"[1,"x"]"#);
    }

    #[test]
    fn serde_goes_through_json_form() {
        let v: Value = serde_json::from_str(r#"{"a": [1, 2.5, null, true]}"#).unwrap();
        let record = v.as_record().unwrap();
        assert_eq!(
            record.field("a"),
            Some(&Value::Sequence(vec![
                Value::Integer(1),
                Value::Float(2.5),
                Value::Null,
                Value::Bool(true),
            ]))
        );
        assert_eq!(serde_json::to_value(&v).unwrap(), json!({"a": [1, 2.5, null, true]}));
    }
}
