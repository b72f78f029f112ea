//! Pipeline lint rules and diagnostics.
//!
//! Everything that makes a graph unusable is rejected by
//! [`PipelineGraph::build`]. The rules here flag graphs that build but are
//! probably not what the author meant. Call [`validate`] for advisory
//! diagnostics or [`validate_or_raise`] to fail on any `Error`-severity issue.

use std::collections::{HashSet, VecDeque};

use rulepipe_types::{Result, RulepipeError};

use crate::definition::{NodeSpec, PatternDefinition};
use crate::graph::{NodeRole, PipelineGraph, Routes};
use crate::handler::Handler;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(graph.entry_index());
        queue.push_back(graph.entry_index());

        while let Some(current) = queue.pop_front() {
            let Some(node) = graph.node_at(current) else { continue };
            for next in node.successors() {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        graph
            .nodes()
            .enumerate()
            .filter(|(i, _)| !visited.contains(i))
            .map(|(_, n)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Node '{}' is not reachable from entry '{}'",
                    n.id,
                    graph.entry().id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some(format!("Add an edge leading to '{}' or remove it", n.id)),
            })
            .collect()
    }
}

struct ShadowedCaseRule;
impl LintRule for ShadowedCaseRule {
    fn name(&self) -> &str { "shadowed_case" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for node in graph.nodes() {
            let NodeSpec::Match { cases, .. } = &node.spec else { continue };
            for (i, case) in cases.iter().enumerate() {
                let earlier = &cases[..i];
                let shadow = earlier.iter().position(|c| {
                    c.pattern == PatternDefinition::Wildcard || c.pattern == case.pattern
                });
                if let Some(j) = shadow {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Case {} (branch '{}') of match '{}' can never be selected; case {} matches first",
                            i, case.branch, node.id, j
                        ),
                        node_id: Some(node.id.clone()),
                        edge: None,
                        fix: Some("Move more specific patterns before wildcards".into()),
                    });
                }
            }
        }
        diags
    }
}

struct RedundantConditionRule;
impl LintRule for RedundantConditionRule {
    fn name(&self) -> &str { "redundant_condition" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .nodes()
            .filter_map(|n| match &n.role {
                NodeRole::Handler {
                    routes: Routes::Condition { on_true, on_false },
                    ..
                } if on_true == on_false => {
                    let target = graph.node_at(*on_true).map(|t| t.id.clone()).unwrap_or_default();
                    Some(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Condition '{}' routes both outcomes to '{}'",
                            n.id, target
                        ),
                        node_id: Some(n.id.clone()),
                        edge: Some((n.id.clone(), target)),
                        fix: Some("Remove the condition or point one branch elsewhere".into()),
                    })
                }
                _ => None,
            })
            .collect()
    }
}

struct EmptyTransformRule;
impl LintRule for EmptyTransformRule {
    fn name(&self) -> &str { "empty_transform" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .nodes()
            .filter(|n| match &n.role {
                NodeRole::Handler {
                    handler: Handler::Transform(t),
                    ..
                } => t.operation_count() == Some(0),
                _ => false,
            })
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Info,
                message: format!("Transform '{}' has no operations", n.id),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: None,
            })
            .collect()
    }
}

struct SinkPresentRule;
impl LintRule for SinkPresentRule {
    fn name(&self) -> &str { "sink_present" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        if graph.nodes().any(|n| n.is_sink()) {
            return vec![];
        }
        vec![Diagnostic {
            rule: self.name().into(),
            severity: Severity::Error,
            message: format!(
                "Pipeline '{}' has no sink node; no record can ever succeed",
                graph.name()
            ),
            node_id: None,
            edge: None,
            fix: Some("Add a node with kind \"sink\"".into()),
        }]
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(graph: &PipelineGraph) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(ReachabilityRule),
        Box::new(ShadowedCaseRule),
        Box::new(RedundantConditionRule),
        Box::new(EmptyTransformRule),
        Box::new(SinkPresentRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(graph: &PipelineGraph) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(RulepipeError::Validation(messages.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
