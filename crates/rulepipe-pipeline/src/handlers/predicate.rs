use rulepipe_types::{EvalError, Record};

use crate::condition::{parse_predicate, Predicate};
use crate::expr::SyntaxError;
use crate::handler::Condition;

/// Condition backed by a parsed predicate expression.
#[derive(Debug, Clone)]
pub struct PredicateCondition {
    source: String,
    predicate: Predicate,
}

impl PredicateCondition {
    pub fn parse(source: &str) -> Result<Self, SyntaxError> {
        Ok(Self {
            source: source.trim().to_string(),
            predicate: parse_predicate(source)?,
        })
    }

    /// The predicate text as written in the definition.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

impl Condition for PredicateCondition {
    fn evaluate(&self, record: &Record) -> Result<bool, EvalError> {
        self.predicate.evaluate(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_parsed_predicate() {
        let cond = PredicateCondition::parse("  age >= 18 ").unwrap();
        assert_eq!(cond.source(), "age >= 18");

        let adult = Record::from_json(json!({"age": 30})).unwrap();
        let minor = Record::from_json(json!({"age": 17})).unwrap();
        assert_eq!(cond.evaluate(&adult), Ok(true));
        assert_eq!(cond.evaluate(&minor), Ok(false));
        assert_eq!(
            cond.evaluate(&Record::new()),
            Err(EvalError::MissingOperand { path: "age".into() })
        );
    }

    #[test]
    fn parse_errors_surface() {
        assert!(PredicateCondition::parse("age >=").is_err());
    }
}
