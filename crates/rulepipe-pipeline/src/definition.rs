//! Serializable pipeline definitions.
//!
//! A [`PipelineDefinition`] is the declarative form of a pipeline: nodes,
//! edges between them, and engine settings. It is turned into an immutable
//! [`PipelineGraph`] by [`PipelineDefinition::build`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use rulepipe_types::{FieldPath, GraphBuildError, Result, Value};

use crate::expr::parse_expr;
use crate::graph::PipelineGraph;
use crate::handler::{Handler, HandlerRegistry};
use crate::handlers::{FieldOp, FieldOpsTransform, Pattern, PatternMatch, PredicateCondition};

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    /// Node where every run starts; the first node when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(flatten)]
    pub spec: NodeSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSpec {
    Condition {
        predicate: String,
    },
    Match {
        /// Subject expression; usually a field path.
        on: String,
        #[serde(default)]
        cases: Vec<CaseDefinition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Transform {
        #[serde(default)]
        operations: Vec<OperationDefinition>,
    },
    /// Application handler resolved through a [`HandlerRegistry`].
    Custom {
        handler_type: String,
        #[serde(default)]
        config: serde_json::Value,
    },
    Sink,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub pattern: PatternDefinition,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternDefinition {
    Exact {
        value: Value,
    },
    OneOf {
        values: Vec<Value>,
    },
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Value>,
    },
    Regex {
        pattern: String,
    },
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationDefinition {
    Set { path: FieldPath, expr: String },
    Remove { path: FieldPath },
    Rename { from: FieldPath, to: FieldPath },
    Copy { from: FieldPath, to: FieldPath },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
    /// Condition: `"true"` / `"false"`. Match: a branch id. Transform: none
    /// or `"next"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            timeout_ms: None,
        }
    }
}

impl EdgeDefinition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            port: None,
        }
    }

    pub fn on_port(from: impl Into<String>, to: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            port: Some(port.into()),
        }
    }
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, spec: NodeSpec) -> Self {
        Self {
            id: id.into(),
            spec,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl PipelineDefinition {
    pub fn from_json_str(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&source)
    }

    /// Build with built-in handler kinds only.
    pub fn build(&self) -> std::result::Result<PipelineGraph, GraphBuildError> {
        PipelineGraph::build(self, &HandlerRegistry::new())
    }

    /// Build, resolving `custom` nodes through `registry`.
    pub fn build_with(
        &self,
        registry: &HandlerRegistry,
    ) -> std::result::Result<PipelineGraph, GraphBuildError> {
        PipelineGraph::build(self, registry)
    }
}

// ---------------------------------------------------------------------------
// Compilation into handlers
// ---------------------------------------------------------------------------

impl NodeSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeSpec::Condition { .. } => "condition",
            NodeSpec::Match { .. } => "match",
            NodeSpec::Transform { .. } => "transform",
            NodeSpec::Custom { .. } => "custom",
            NodeSpec::Sink => "sink",
            NodeSpec::Drop => "drop",
        }
    }

    /// Parse expressions and patterns into a handler. Sinks have none.
    pub(crate) fn compile(
        &self,
        node: &str,
        registry: &HandlerRegistry,
    ) -> std::result::Result<Option<Handler>, GraphBuildError> {
        let invalid_expr = |message: String| GraphBuildError::InvalidExpression {
            node: node.to_string(),
            message,
        };

        let handler = match self {
            NodeSpec::Condition { predicate } => {
                let cond = PredicateCondition::parse(predicate)
                    .map_err(|e| invalid_expr(e.to_string()))?;
                Handler::condition(cond)
            }
            NodeSpec::Match { on, cases, default } => {
                let default = default
                    .as_ref()
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| GraphBuildError::MissingDefaultBranch {
                        node: node.to_string(),
                    })?;
                let subject = parse_expr(on).map_err(|e| invalid_expr(e.to_string()))?;
                let mut compiled = Vec::with_capacity(cases.len());
                for (i, case) in cases.iter().enumerate() {
                    let pattern = case.pattern.compile().map_err(|message| {
                        GraphBuildError::InvalidPattern {
                            node: node.to_string(),
                            message: format!("case {}: {}", i, message),
                        }
                    })?;
                    compiled.push((pattern, case.branch.clone()));
                }
                Handler::matcher(PatternMatch::new(subject, compiled, default.clone()))
            }
            NodeSpec::Transform { operations } => {
                let mut ops = Vec::with_capacity(operations.len());
                for (i, op) in operations.iter().enumerate() {
                    ops.push(op.compile().map_err(|e| {
                        invalid_expr(format!("operation {}: {}", i, e))
                    })?);
                }
                Handler::transform(FieldOpsTransform::new(ops))
            }
            NodeSpec::Custom {
                handler_type,
                config,
            } => registry.create(node, handler_type, config)?,
            NodeSpec::Sink | NodeSpec::Drop => return Ok(None),
        };
        Ok(Some(handler))
    }
}

impl PatternDefinition {
    fn compile(&self) -> std::result::Result<Pattern, String> {
        match self {
            PatternDefinition::Exact { value } => Ok(Pattern::Exact(value.clone())),
            PatternDefinition::OneOf { values } => Ok(Pattern::OneOf(values.clone())),
            PatternDefinition::Range { min, max } => Pattern::range(min.clone(), max.clone()),
            PatternDefinition::Regex { pattern } => Pattern::regex(pattern),
            PatternDefinition::Wildcard => Ok(Pattern::Wildcard),
        }
    }
}

impl OperationDefinition {
    fn compile(&self) -> std::result::Result<FieldOp, crate::expr::SyntaxError> {
        Ok(match self {
            OperationDefinition::Set { path, expr } => FieldOp::Set {
                path: path.clone(),
                expr: parse_expr(expr)?,
            },
            OperationDefinition::Remove { path } => FieldOp::Remove { path: path.clone() },
            OperationDefinition::Rename { from, to } => FieldOp::Rename {
                from: from.clone(),
                to: to.clone(),
            },
            OperationDefinition::Copy { from, to } => FieldOp::Copy {
                from: from.clone(),
                to: to.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> PipelineDefinition {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn deserializes_all_node_kinds() {
        let def = parse(json!({
            "name": "kinds",
            "nodes": [
                {"id": "c", "kind": "condition", "predicate": "a > 1"},
                {"id": "m", "kind": "match", "on": "status", "default": "other",
                 "cases": [
                    {"pattern": {"type": "exact", "value": "active"}, "branch": "act"},
                    {"pattern": {"type": "one_of", "values": [1, 2]}, "branch": "few"},
                    {"pattern": {"type": "range", "min": 3}, "branch": "many"},
                    {"pattern": {"type": "regex", "pattern": "^x"}, "branch": "x"},
                    {"pattern": {"type": "wildcard"}, "branch": "any"}
                 ]},
                {"id": "t", "kind": "transform", "operations": [
                    {"op": "set", "path": "a.b", "expr": "1"},
                    {"op": "remove", "path": "z"},
                    {"op": "rename", "from": "x", "to": "y"},
                    {"op": "copy", "from": "y", "to": "w[0]"}
                ]},
                {"id": "u", "kind": "custom", "handler_type": "lookup", "config": {"table": "t"}},
                {"id": "s", "kind": "sink"},
                {"id": "d", "kind": "drop"}
            ],
            "edges": [{"from": "c", "to": "s", "port": "true"}]
        }));

        assert_eq!(def.entry, None);
        assert_eq!(def.engine, EngineSettings::default());
        let kinds: Vec<_> = def.nodes.iter().map(|n| n.spec.kind_name()).collect();
        assert_eq!(kinds, ["condition", "match", "transform", "custom", "sink", "drop"]);
        match &def.nodes[1].spec {
            NodeSpec::Match { cases, default, .. } => {
                assert_eq!(cases.len(), 5);
                assert_eq!(default.as_deref(), Some("other"));
                assert_eq!(
                    cases[2].pattern,
                    PatternDefinition::Range {
                        min: Some(Value::Integer(3)),
                        max: None
                    }
                );
            }
            other => panic!("unexpected spec: {:?}", other),
        }
        assert_eq!(def.edges[0].port.as_deref(), Some("true"));
    }

    #[test]
    fn engine_settings_defaults() {
        let def = parse(json!({
            "name": "p",
            "nodes": [{"id": "s", "kind": "sink"}],
            "engine": {"timeout_ms": 250}
        }));
        assert_eq!(def.engine.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(def.engine.timeout_ms, Some(250));
    }

    #[test]
    fn invalid_field_paths_fail_to_load() {
        let result = PipelineDefinition::from_json_str(
            r#"{"name": "p", "nodes": [{"id": "t", "kind": "transform",
                "operations": [{"op": "remove", "path": "a..b"}]}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_kind_fails_to_load() {
        let result = PipelineDefinition::from_json_str(
            r#"{"name": "p", "nodes": [{"id": "x", "kind": "teleport"}]}"#,
        );
        assert!(matches!(result, Err(rulepipe_types::RulepipeError::Json(_))));
    }

    #[test]
    fn compile_reports_bad_expressions_and_patterns() {
        let registry = HandlerRegistry::new();
        let bad_predicate = NodeSpec::Condition {
            predicate: "age >".into(),
        };
        assert!(matches!(
            bad_predicate.compile("c", &registry),
            Err(GraphBuildError::InvalidExpression { node, .. }) if node == "c"
        ));

        let bad_regex = NodeSpec::Match {
            on: "x".into(),
            cases: vec![CaseDefinition {
                pattern: PatternDefinition::Regex {
                    pattern: "(".into(),
                },
                branch: "b".into(),
            }],
            default: Some("d".into()),
        };
        assert!(matches!(
            bad_regex.compile("m", &registry),
            Err(GraphBuildError::InvalidPattern { .. })
        ));

        let no_default = NodeSpec::Match {
            on: "x".into(),
            cases: vec![],
            default: None,
        };
        assert_eq!(
            no_default.compile("m", &registry).unwrap_err(),
            GraphBuildError::MissingDefaultBranch { node: "m".into() }
        );

        let bad_set = NodeSpec::Transform {
            operations: vec![OperationDefinition::Set {
                path: FieldPath::key("a"),
                expr: "1 +".into(),
            }],
        };
        assert!(matches!(
            bad_set.compile("t", &registry),
            Err(GraphBuildError::InvalidExpression { .. })
        ));

        let unknown = NodeSpec::Custom {
            handler_type: "lookup".into(),
            config: serde_json::Value::Null,
        };
        assert!(matches!(
            unknown.compile("u", &registry),
            Err(GraphBuildError::UnknownHandlerType { .. })
        ));

        assert!(NodeSpec::Sink.compile("s", &registry).unwrap().is_none());
    }

    #[test]
    fn serializes_back_to_json_shape() {
        let def = PipelineDefinition {
            name: "p".into(),
            entry: Some("t".into()),
            nodes: vec![
                NodeDefinition::new(
                    "t",
                    NodeSpec::Transform {
                        operations: vec![OperationDefinition::Rename {
                            from: FieldPath::key("a"),
                            to: FieldPath::key("b"),
                        }],
                    },
                ),
                NodeDefinition::new("s", NodeSpec::Sink),
            ],
            edges: vec![EdgeDefinition::new("t", "s")],
            engine: EngineSettings::default(),
        };
        assert_eq!(
            serde_json::to_value(&def).unwrap(),
            json!({
                "name": "p",
                "entry": "t",
                "nodes": [
                    {"id": "t", "kind": "transform",
                     "operations": [{"op": "rename", "from": "a", "to": "b"}]},
                    {"id": "s", "kind": "sink"}
                ],
                "edges": [{"from": "t", "to": "s"}],
                "engine": {"max_depth": 32}
            })
        );
    }
}
