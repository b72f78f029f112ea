//! Dotted / indexed field paths such as `user.tags[0].name`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::RecordError;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path into a [`Record`](crate::Record).
///
/// The first segment is always a key. Keys are separated by `.` and sequence
/// indexes are written `[n]` directly after a key or another index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a path string.
    pub fn parse(input: &str) -> Result<Self, RecordError> {
        let invalid = |reason: &str| RecordError::InvalidPath {
            path: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        for part in input.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if name.is_empty() {
                return Err(invalid("empty key segment"));
            }
            if name.contains(']') {
                return Err(invalid("unexpected ']'"));
            }
            segments.push(Segment::Key(name.to_string()));

            while !rest.is_empty() {
                if !rest.starts_with('[') {
                    return Err(invalid("expected '[' after index"));
                }
                let close = rest.find(']').ok_or_else(|| invalid("unterminated index"))?;
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        }

        Ok(Self { segments })
    }

    /// Build a path from already-split segments. The first must be a key.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, RecordError> {
        match segments.first() {
            Some(Segment::Key(k)) if !k.is_empty() => Ok(Self { segments }),
            _ => Err(RecordError::InvalidPath {
                path: format_segments(&segments),
                reason: "path must start with a key".into(),
            }),
        }
    }

    /// A single top-level key.
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Key(name.into())],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The top-level field this path starts from.
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Key(k)) => k,
            _ => "",
        }
    }
}

fn format_segments(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        match seg {
            Segment::Key(k) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(k);
            }
            Segment::Index(n) => {
                out.push('[');
                out.push_str(&n.to_string());
                out.push(']');
            }
        }
    }
    out
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_segments(&self.segments))
    }
}

impl FromStr for FieldPath {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_keys() {
        let path = FieldPath::parse("user.address.city").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("user".into()),
                Segment::Key("address".into()),
                Segment::Key("city".into()),
            ]
        );
        assert_eq!(path.root(), "user");
    }

    #[test]
    fn parses_indexes() {
        let path = FieldPath::parse("items[2][0].name").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("items".into()),
                Segment::Index(2),
                Segment::Index(0),
                Segment::Key("name".into()),
            ]
        );
    }

    #[test]
    fn display_round_trips_source_text() {
        for src in ["a", "a.b", "a[0]", "a[1].b[2].c"] {
            assert_eq!(FieldPath::parse(src).unwrap().to_string(), src);
        }
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", ".a", "a.", "a..b", "[0]", "a[", "a[x]", "a[-1]", "a[0]b", "a]"] {
            let err = FieldPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, RecordError::InvalidPath { .. }),
                "'{bad}' should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn from_segments_requires_leading_key() {
        assert!(FieldPath::from_segments(vec![Segment::Index(0)]).is_err());
        assert!(FieldPath::from_segments(vec![]).is_err());
        let path = FieldPath::from_segments(vec![Segment::Key("a".into()), Segment::Index(3)]).unwrap();
        assert_eq!(path.to_string(), "a[3]");
    }

    #[test]
    fn serde_uses_string_form() {
        let path: FieldPath = serde_json::from_str("\"a.b[1]\"").unwrap();
        assert_eq!(path.to_string(), "a.b[1]");
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"a.b[1]\"");
        assert!(serde_json::from_str::<FieldPath>("\"a..b\"").is_err());
    }
}
