//! Match handler that tests ordered patterns against a subject value.

use std::cmp::Ordering;

use regex::Regex;

use rulepipe_types::{Record, Value};

use crate::expr::Expr;
use crate::handler::Match;

/// One case pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Structural equality with the subject.
    Exact(Value),
    OneOf(Vec<Value>),
    /// Inclusive numeric bounds, integers and floats compared after promotion.
    Range {
        min: Option<Value>,
        max: Option<Value>,
    },
    /// Matched against string subjects only.
    Regex(Regex),
    /// Any present value, `null` included.
    Wildcard,
}

impl Pattern {
    /// A range with at least one numeric bound, `min <= max` when both are set.
    pub fn range(min: Option<Value>, max: Option<Value>) -> Result<Self, String> {
        if min.is_none() && max.is_none() {
            return Err("range needs at least one of 'min' or 'max'".into());
        }
        for bound in min.iter().chain(max.iter()) {
            if !bound.is_number() {
                return Err(format!("range bound must be a number, got {}", bound.type_name()));
            }
        }
        if let (Some(lo), Some(hi)) = (&min, &max) {
            if lo.compare(hi) == Some(Ordering::Greater) {
                return Err(format!("empty range: min {} is greater than max {}", lo, hi));
            }
        }
        Ok(Pattern::Range { min, max })
    }

    pub fn regex(source: &str) -> Result<Self, String> {
        Regex::new(source)
            .map(Pattern::Regex)
            .map_err(|e| e.to_string())
    }

    pub fn matches(&self, subject: &Value) -> bool {
        match self {
            Pattern::Exact(expected) => subject == expected,
            Pattern::OneOf(candidates) => candidates.iter().any(|c| c == subject),
            Pattern::Range { min, max } => {
                if !subject.is_number() {
                    return false;
                }
                let above = min.as_ref().map_or(true, |lo| {
                    matches!(subject.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                });
                let below = max.as_ref().map_or(true, |hi| {
                    matches!(subject.compare(hi), Some(Ordering::Less | Ordering::Equal))
                });
                above && below
            }
            Pattern::Regex(re) => subject.as_str().is_some_and(|s| re.is_match(s)),
            Pattern::Wildcard => true,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Pattern::Wildcard)
    }
}

/// Tests `cases` in declaration order; the first matching pattern wins.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    subject: Expr,
    cases: Vec<(Pattern, String)>,
    default: String,
}

impl PatternMatch {
    pub fn new(subject: Expr, cases: Vec<(Pattern, String)>, default: impl Into<String>) -> Self {
        Self {
            subject,
            cases,
            default: default.into(),
        }
    }

    pub fn cases(&self) -> &[(Pattern, String)] {
        &self.cases
    }

    /// The branch for `record`. An absent or unevaluable subject takes the
    /// default branch.
    pub fn select(&self, record: &Record) -> &str {
        let Ok(subject) = self.subject.eval(record) else {
            return &self.default;
        };
        self.cases
            .iter()
            .find(|(pattern, _)| pattern.matches(&subject))
            .map_or(self.default.as_str(), |(_, branch)| branch.as_str())
    }
}

impl Match for PatternMatch {
    fn branches(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.cases.len() + 1);
        for branch in self
            .cases
            .iter()
            .map(|(_, b)| b)
            .chain(std::iter::once(&self.default))
        {
            if !out.contains(branch) {
                out.push(branch.clone());
            }
        }
        out
    }

    fn default_branch(&self) -> &str {
        &self.default
    }

    fn evaluate(&self, record: &Record) -> String {
        self.select(record).to_string()
    }
}
