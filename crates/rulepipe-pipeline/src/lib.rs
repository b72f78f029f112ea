//! Rule pipeline handlers, graph validation, and the execution engine.
//!
//! This crate implements the rulepipe runtime: the condition and expression
//! languages, the three handler kinds (condition, match, transform), graph
//! construction with build-time validation, lint rules, and the engine that
//! routes records through a built graph.

pub mod condition;
pub mod context;
pub mod definition;
pub mod duration_serde;
pub mod engine;
pub mod events;
pub mod expr;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod validation;

pub use condition::{parse_predicate, CompareOp, Predicate};
pub use context::{EvaluationContext, RunOptions, StepOutcome, TraceEntry};
pub use definition::{
    CaseDefinition, EdgeDefinition, EngineSettings, NodeDefinition, NodeSpec,
    OperationDefinition, PatternDefinition, PipelineDefinition, DEFAULT_MAX_DEPTH,
};
pub use engine::{EngineConfig, Failure, Outcome, PipelineEngine, RunReport};
pub use events::{EventEmitter, PipelineEvent};
pub use expr::{parse_expr, ArithOp, Expr, Function, SyntaxError};
pub use graph::{NodeRole, PipelineEdge, PipelineGraph, PipelineNode, Routes};
pub use handler::{
    Condition, Decision, Handler, HandlerFactory, HandlerKind, HandlerRegistry, Match, Transform,
};
pub use handlers::{FieldOp, FieldOpsTransform, Pattern, PatternMatch, PredicateCondition};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
