//! Immutable, copy-on-write records.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::path::{FieldPath, Segment};
use crate::{RecordError, Value};

/// An insertion-ordered mapping from field name to [`Value`].
///
/// Fields live behind an `Arc`, so cloning a record is cheap and nested
/// records are shared until one side writes to them. Every "mutating"
/// operation (`with`, `without`, `merge`) returns a new record and leaves the
/// receiver untouched.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub struct Record {
    fields: Arc<Vec<(String, Value)>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object.
    pub fn from_json(value: serde_json::Value) -> Result<Self, RecordError> {
        match Value::from(value) {
            Value::Record(record) => Ok(record),
            other => Err(RecordError::NotARecord {
                found: other.type_name(),
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .map(|(k, v)| (k.to_string(), v.to_json()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Top-level field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|i| &self.fields[i].1)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == name)
    }

    /// Record nesting depth: a flat record is 1.
    pub fn depth(&self) -> usize {
        1 + self.fields.iter().map(|(_, v)| v.depth()).max().unwrap_or(0)
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.get(path).is_ok()
    }

    /// Resolve a path.
    ///
    /// An absent key is `FieldNotFound`, an index past the end of a sequence
    /// is `IndexOutOfBounds`, and a segment that steps into a value of the
    /// wrong shape (a key into a scalar, an index into a record) is
    /// `NotAContainer`.
    pub fn get(&self, path: &FieldPath) -> Result<&Value, RecordError> {
        let mut segments = path.segments().iter();
        let mut current = match segments.next() {
            Some(Segment::Key(k)) => self.field(k).ok_or_else(|| not_found(path))?,
            _ => return Err(not_found(path)),
        };
        for segment in segments {
            current = match (segment, current) {
                (Segment::Key(k), Value::Record(r)) => {
                    r.field(k).ok_or_else(|| not_found(path))?
                }
                (Segment::Index(i), Value::Sequence(items)) => {
                    items.get(*i).ok_or_else(|| RecordError::IndexOutOfBounds {
                        path: path.to_string(),
                        index: *i,
                        len: items.len(),
                    })?
                }
                (_, other) => {
                    return Err(RecordError::NotAContainer {
                        path: path.to_string(),
                        found: other.type_name(),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Return a copy with `path` set to `value`.
    ///
    /// Missing intermediate keys are created as empty records. Sequence
    /// indexes must already exist.
    pub fn with(&self, path: &FieldPath, value: Value) -> Result<Record, RecordError> {
        let mut next = self.clone();
        next.set_path(path.segments(), value, path)?;
        Ok(next)
    }

    /// Return a copy with `path` removed, together with the removed value.
    pub fn without(&self, path: &FieldPath) -> Result<(Record, Value), RecordError> {
        let mut next = self.clone();
        let removed = next.remove_path(path.segments(), path)?;
        Ok((next, removed))
    }

    /// Shallow field-wise merge; `other` wins on key collisions.
    pub fn merge(&self, other: &Record) -> Record {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.insert(key, value.clone());
        }
        merged
    }

    /// Set a top-level field on an owned record. Existing keys keep their
    /// position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let fields = Arc::make_mut(&mut self.fields);
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => fields.push((key, value)),
        }
    }

    fn set_path(
        &mut self,
        segments: &[Segment],
        value: Value,
        path: &FieldPath,
    ) -> Result<(), RecordError> {
        let (first, rest) = match segments.split_first() {
            Some((Segment::Key(k), rest)) => (k, rest),
            _ => {
                return Err(RecordError::InvalidPath {
                    path: path.to_string(),
                    reason: "expected a key segment".into(),
                })
            }
        };
        if rest.is_empty() {
            self.insert(first.clone(), value);
            return Ok(());
        }

        let index = self.position(first);
        let fields = Arc::make_mut(&mut self.fields);
        let index = match index {
            Some(i) => i,
            None => {
                fields.push((first.clone(), Value::Record(Record::new())));
                fields.len() - 1
            }
        };
        set_in_value(&mut fields[index].1, rest, value, path)
    }

    fn remove_path(&mut self, segments: &[Segment], path: &FieldPath) -> Result<Value, RecordError> {
        let (first, rest) = match segments.split_first() {
            Some((Segment::Key(k), rest)) => (k, rest),
            _ => return Err(not_found(path)),
        };
        let index = self.position(first).ok_or_else(|| not_found(path))?;
        let fields = Arc::make_mut(&mut self.fields);
        if rest.is_empty() {
            return Ok(fields.remove(index).1);
        }
        remove_in_value(&mut fields[index].1, rest, path)
    }
}

fn not_found(path: &FieldPath) -> RecordError {
    RecordError::FieldNotFound {
        path: path.to_string(),
    }
}

fn set_in_value(
    slot: &mut Value,
    segments: &[Segment],
    value: Value,
    path: &FieldPath,
) -> Result<(), RecordError> {
    match (segments.first(), slot) {
        (None, slot) => {
            *slot = value;
            Ok(())
        }
        (Some(Segment::Key(_)), Value::Record(record)) => record.set_path(segments, value, path),
        (Some(Segment::Index(i)), Value::Sequence(items)) => {
            let len = items.len();
            let item = items.get_mut(*i).ok_or(RecordError::IndexOutOfBounds {
                path: path.to_string(),
                index: *i,
                len,
            })?;
            set_in_value(item, &segments[1..], value, path)
        }
        (Some(_), other) => Err(RecordError::NotAContainer {
            path: path.to_string(),
            found: other.type_name(),
        }),
    }
}

fn remove_in_value(
    slot: &mut Value,
    segments: &[Segment],
    path: &FieldPath,
) -> Result<Value, RecordError> {
    match (segments, slot) {
        ([Segment::Key(_), ..], Value::Record(record)) => record.remove_path(segments, path),
        ([Segment::Index(i)], Value::Sequence(items)) if *i < items.len() => Ok(items.remove(*i)),
        ([Segment::Index(i), rest @ ..], Value::Sequence(items)) if !rest.is_empty() => {
            match items.get_mut(*i) {
                Some(item) => remove_in_value(item, rest, path),
                None => Err(not_found(path)),
            }
        }
        _ => Err(not_found(path)),
    }
}

/// Structural equality: same keys with structurally equal values. Field
/// order does not participate.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.fields, &other.fields) {
            return true;
        }
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.field(k).is_some_and(|ov| ov == v))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    /// Duplicate keys keep the first position and the last value.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut fields: Vec<(String, Value)> = Vec::with_capacity(iter.size_hint().0);
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(iter.size_hint().0);
        for (k, v) in iter {
            let key = k.into();
            match positions.get(&key) {
                Some(&i) => fields[i].1 = v.into(),
                None => {
                    positions.insert(key.clone(), fields.len());
                    fields.push((key, v.into()));
                }
            }
        }
        Record {
            fields: Arc::new(fields),
        }
    }
}

impl TryFrom<serde_json::Value> for Record {
    type Error = RecordError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        Record::from_json(value)
    }
}

impl From<Record> for serde_json::Value {
    fn from(record: Record) -> Self {
        record.to_json()
    }
}
