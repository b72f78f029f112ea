//! Handler contracts, the tagged handler union, and the custom handler registry.
//!
//! A pipeline node is backed by exactly one of three handler kinds. The kind
//! is fixed when the graph is built; the engine dispatches through
//! [`Handler::dispatch`] and routes on the returned [`Decision`].
//!
//! Implementations must be side-effect free and safe to call concurrently
//! from many traversals at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rulepipe_types::{EvalError, GraphBuildError, Record, TransformError};

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Boolean test over a record.
///
/// Returning an error means the predicate could not be decided; the engine
/// folds it to `false`.
pub trait Condition: Send + Sync {
    fn evaluate(&self, record: &Record) -> Result<bool, EvalError>;
}

/// Picks one of a fixed set of branch ids for a record.
pub trait Match: Send + Sync {
    /// Every branch id `evaluate` may return, default included.
    fn branches(&self) -> Vec<String>;

    /// Branch taken when nothing else applies.
    fn default_branch(&self) -> &str;

    fn evaluate(&self, record: &Record) -> String;
}

/// Produces a new record from an input record. The input is never modified.
pub trait Transform: Send + Sync {
    fn apply(&self, record: &Record) -> Result<Record, TransformError>;

    /// Number of configured operations, when the implementation has such a
    /// notion. Used by lints only.
    fn operation_count(&self) -> Option<usize> {
        None
    }
}

impl<F> Condition for F
where
    F: Fn(&Record) -> Result<bool, EvalError> + Send + Sync,
{
    fn evaluate(&self, record: &Record) -> Result<bool, EvalError> {
        self(record)
    }
}

impl<F> Transform for F
where
    F: Fn(&Record) -> Result<Record, TransformError> + Send + Sync,
{
    fn apply(&self, record: &Record) -> Result<Record, TransformError> {
        self(record)
    }
}

// ---------------------------------------------------------------------------
// Handler union
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Condition,
    Match,
    Transform,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandlerKind::Condition => "condition",
            HandlerKind::Match => "match",
            HandlerKind::Transform => "transform",
        };
        f.write_str(s)
    }
}

/// A node's handler, resolved once at build time.
#[derive(Clone)]
pub enum Handler {
    Condition(Arc<dyn Condition>),
    Match(Arc<dyn Match>),
    Transform(Arc<dyn Transform>),
}

/// What a handler decided for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Condition result. `folded` holds the evaluation error that was turned
    /// into `false`, if any.
    Bool {
        value: bool,
        folded: Option<EvalError>,
    },
    Branch(String),
    Record(Record),
}

impl Handler {
    pub fn condition(condition: impl Condition + 'static) -> Self {
        Handler::Condition(Arc::new(condition))
    }

    pub fn matcher(matcher: impl Match + 'static) -> Self {
        Handler::Match(Arc::new(matcher))
    }

    pub fn transform(transform: impl Transform + 'static) -> Self {
        Handler::Transform(Arc::new(transform))
    }

    pub fn kind(&self) -> HandlerKind {
        match self {
            Handler::Condition(_) => HandlerKind::Condition,
            Handler::Match(_) => HandlerKind::Match,
            Handler::Transform(_) => HandlerKind::Transform,
        }
    }

    /// Run the handler against `record`.
    ///
    /// Condition errors fold to `false` here; only a Transform can fail.
    pub fn dispatch(&self, record: &Record) -> Result<Decision, TransformError> {
        match self {
            Handler::Condition(c) => Ok(match c.evaluate(record) {
                Ok(value) => Decision::Bool {
                    value,
                    folded: None,
                },
                Err(e) => Decision::Bool {
                    value: false,
                    folded: Some(e),
                },
            }),
            Handler::Match(m) => Ok(Decision::Branch(m.evaluate(record))),
            Handler::Transform(t) => t.apply(record).map(Decision::Record),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Builds a handler from the node's free-form `config`.
pub type HandlerFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Handler, String> + Send + Sync>;

/// Application-provided handler types, looked up by name when a definition
/// declares a `custom` node.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `handler_type`, replacing any previous entry.
    pub fn register<F>(&mut self, handler_type: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Handler, String> + Send + Sync + 'static,
    {
        self.factories.insert(handler_type.into(), Arc::new(factory));
    }

    pub fn has(&self, handler_type: &str) -> bool {
        self.factories.contains_key(handler_type)
    }

    pub fn handler_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiate the handler for node `node`.
    pub fn create(
        &self,
        node: &str,
        handler_type: &str,
        config: &serde_json::Value,
    ) -> Result<Handler, GraphBuildError> {
        let factory = self
            .factories
            .get(handler_type)
            .ok_or_else(|| GraphBuildError::UnknownHandlerType {
                node: node.to_string(),
                handler_type: handler_type.to_string(),
            })?;
        factory(config).map_err(|message| GraphBuildError::InvalidConfig {
            node: node.to_string(),
            message,
        })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_types", &self.handler_types())
            .finish()
    }
}
