//! The immutable, validated pipeline graph.
//!
//! Built once from a [`PipelineDefinition`]; every check that can be made
//! without a record happens here so traversals only ever read the graph.

use std::collections::{HashMap, HashSet};

use rulepipe_types::{GraphBuildError, RunError};

use crate::definition::{EngineSettings, NodeSpec, PipelineDefinition};
use crate::handler::{Decision, Handler, HandlerKind, HandlerRegistry};

pub const TRUE_PORT: &str = "true";
pub const FALSE_PORT: &str = "false";
pub const NEXT_PORT: &str = "next";

#[derive(Debug, Clone)]
pub struct PipelineGraph {
    name: String,
    nodes: Vec<PipelineNode>,
    index: HashMap<String, usize>,
    entry: usize,
    edges: Vec<PipelineEdge>,
    settings: EngineSettings,
}

#[derive(Debug, Clone)]
pub struct PipelineNode {
    pub id: String,
    /// The declaration this node was built from.
    pub spec: NodeSpec,
    pub role: NodeRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEdge {
    pub from: String,
    pub to: String,
    pub port: Option<String>,
}

/// What a node does when a record reaches it.
#[derive(Debug, Clone)]
pub enum NodeRole {
    Handler { handler: Handler, routes: Routes },
    /// Ends the run in success.
    Sink,
    /// Ends the run by discarding the record.
    Drop,
}

/// Resolved outgoing edges, as node indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routes {
    Condition { on_true: usize, on_false: usize },
    Match { branches: HashMap<String, usize> },
    Transform { next: usize },
}

impl Routes {
    /// Next node for `decision`.
    pub fn select(&self, decision: &Decision) -> Result<usize, RunError> {
        match (self, decision) {
            (Routes::Condition { on_true, on_false }, Decision::Bool { value, .. }) => {
                Ok(if *value { *on_true } else { *on_false })
            }
            (Routes::Match { branches }, Decision::Branch(branch)) => branches
                .get(branch)
                .copied()
                .ok_or_else(|| RunError::UnknownBranch {
                    branch: branch.clone(),
                }),
            (Routes::Transform { next }, Decision::Record(_)) => Ok(*next),
            (_, other) => Err(RunError::UnknownBranch {
                branch: port_label(other),
            }),
        }
    }
}

/// The port a decision leaves through.
pub fn port_label(decision: &Decision) -> String {
    match decision {
        Decision::Bool { value: true, .. } => TRUE_PORT.to_string(),
        Decision::Bool { value: false, .. } => FALSE_PORT.to_string(),
        Decision::Branch(branch) => branch.clone(),
        Decision::Record(_) => NEXT_PORT.to_string(),
    }
}

impl PipelineNode {
    pub fn is_sink(&self) -> bool {
        matches!(self.role, NodeRole::Sink)
    }

    pub fn is_drop(&self) -> bool {
        matches!(self.role, NodeRole::Drop)
    }

    pub fn handler_kind(&self) -> Option<HandlerKind> {
        match &self.role {
            NodeRole::Handler { handler, .. } => Some(handler.kind()),
            _ => None,
        }
    }

    /// Indexes of every node this one can route to.
    pub fn successors(&self) -> Vec<usize> {
        match &self.role {
            NodeRole::Handler { routes, .. } => match routes {
                Routes::Condition { on_true, on_false } => vec![*on_true, *on_false],
                Routes::Match { branches } => {
                    let mut targets: Vec<usize> = branches.values().copied().collect();
                    targets.sort_unstable();
                    targets.dedup();
                    targets
                }
                Routes::Transform { next } => vec![*next],
            },
            NodeRole::Sink | NodeRole::Drop => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl PipelineGraph {
    /// Validate `def` and build the graph.
    ///
    /// Checks, in order: node ids, entry, edge endpoints, handler
    /// configuration, per-kind edge arity, and acyclicity.
    pub fn build(
        def: &PipelineDefinition,
        registry: &HandlerRegistry,
    ) -> Result<Self, GraphBuildError> {
        if def.nodes.is_empty() {
            return Err(GraphBuildError::EmptyPipeline {
                name: def.name.clone(),
            });
        }

        let mut index = HashMap::with_capacity(def.nodes.len());
        for (i, node) in def.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphBuildError::DuplicateNode {
                    id: node.id.clone(),
                });
            }
        }

        let entry = match &def.entry {
            Some(id) => *index.get(id).ok_or_else(|| GraphBuildError::UnknownNode {
                reference: "entry".into(),
                id: id.clone(),
            })?,
            None => 0,
        };

        for edge in &def.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !index.contains_key(endpoint) {
                    return Err(GraphBuildError::UnknownNode {
                        reference: format!("edge {} -> {}", edge.from, edge.to),
                        id: endpoint.clone(),
                    });
                }
            }
        }

        let mut outgoing: Vec<Vec<(Option<&str>, usize)>> = vec![Vec::new(); def.nodes.len()];
        for edge in &def.edges {
            outgoing[index[&edge.from]].push((edge.port.as_deref(), index[&edge.to]));
        }

        let mut nodes = Vec::with_capacity(def.nodes.len());
        for (i, node) in def.nodes.iter().enumerate() {
            let handler = node.spec.compile(&node.id, registry)?;
            let role = match handler {
                Some(handler) => {
                    let routes = resolve_routes(&node.id, &handler, &outgoing[i])?;
                    NodeRole::Handler { handler, routes }
                }
                None => {
                    if !outgoing[i].is_empty() {
                        return Err(GraphBuildError::InvalidEdges {
                            node: node.id.clone(),
                            message: format!(
                                "{} nodes cannot have outgoing edges",
                                node.spec.kind_name()
                            ),
                        });
                    }
                    match node.spec {
                        NodeSpec::Drop => NodeRole::Drop,
                        _ => NodeRole::Sink,
                    }
                }
            };
            nodes.push(PipelineNode {
                id: node.id.clone(),
                spec: node.spec.clone(),
                role,
            });
        }

        if let Some(path) = find_cycle(&nodes) {
            return Err(GraphBuildError::CycleDetected { path });
        }

        let edges = def
            .edges
            .iter()
            .map(|e| PipelineEdge {
                from: e.from.clone(),
                to: e.to.clone(),
                port: e.port.clone(),
            })
            .collect::<Vec<_>>();

        tracing::info!(
            pipeline = %def.name,
            nodes = nodes.len(),
            edges = edges.len(),
            entry = %nodes[entry].id,
            "Pipeline graph built"
        );

        Ok(Self {
            name: def.name.clone(),
            nodes,
            index,
            entry,
            edges,
            settings: def.engine.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &PipelineNode {
        &self.nodes[self.entry]
    }

    pub fn entry_index(&self) -> usize {
        self.entry
    }

    pub fn node(&self, id: &str) -> Option<&PipelineNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_at(&self, index: usize) -> Option<&PipelineNode> {
        self.nodes.get(index)
    }

    /// Node at an index taken from this graph's own routes.
    pub(crate) fn at(&self, index: usize) -> &PipelineNode {
        &self.nodes[index]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PipelineNode> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[PipelineEdge] {
        &self.edges
    }

    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&PipelineEdge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<&PipelineEdge> {
        self.edges.iter().filter(|e| e.to == node_id).collect()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

// ---------------------------------------------------------------------------
// Edge arity
// ---------------------------------------------------------------------------

fn resolve_routes(
    node: &str,
    handler: &Handler,
    edges: &[(Option<&str>, usize)],
) -> Result<Routes, GraphBuildError> {
    let invalid = |message: String| GraphBuildError::InvalidEdges {
        node: node.to_string(),
        message,
    };

    let mut seen = HashSet::new();
    for (port, _) in edges {
        let port = port.unwrap_or(NEXT_PORT);
        if !seen.insert(port) {
            return Err(invalid(format!("port '{}' is wired more than once", port)));
        }
    }

    match handler {
        Handler::Condition(_) => {
            let mut on_true = None;
            let mut on_false = None;
            for (port, target) in edges {
                match *port {
                    Some(TRUE_PORT) => on_true = Some(*target),
                    Some(FALSE_PORT) => on_false = Some(*target),
                    Some(other) => {
                        return Err(invalid(format!(
                            "condition ports are 'true' and 'false', got '{}'",
                            other
                        )))
                    }
                    None => return Err(invalid("condition edges must name a port".into())),
                }
            }
            match (on_true, on_false) {
                (Some(on_true), Some(on_false)) => Ok(Routes::Condition { on_true, on_false }),
                (None, _) => Err(invalid("missing 'true' edge".into())),
                (_, None) => Err(invalid("missing 'false' edge".into())),
            }
        }
        Handler::Match(m) => {
            let default = m.default_branch().to_string();
            let mut declared = m.branches();
            if !declared.contains(&default) {
                declared.push(default.clone());
            }

            let mut branches = HashMap::with_capacity(declared.len());
            for (port, target) in edges {
                let Some(port) = port else {
                    return Err(invalid("match edges must name a branch".into()));
                };
                if !declared.iter().any(|b| b == port) {
                    return Err(invalid(format!("edge for undeclared branch '{}'", port)));
                }
                branches.insert(port.to_string(), *target);
            }

            if !branches.contains_key(&default) {
                return Err(GraphBuildError::MissingDefaultBranch {
                    node: node.to_string(),
                });
            }
            if let Some(missing) = declared.iter().find(|b| !branches.contains_key(*b)) {
                return Err(invalid(format!("no edge for branch '{}'", missing)));
            }
            Ok(Routes::Match { branches })
        }
        Handler::Transform(_) => match edges {
            [(None | Some(NEXT_PORT), next)] => Ok(Routes::Transform { next: *next }),
            [(Some(other), _)] => Err(invalid(format!(
                "transform edges take no port or 'next', got '{}'",
                other
            ))),
            _ => Err(invalid(format!(
                "transform nodes need exactly one outgoing edge, found {}",
                edges.len()
            ))),
        },
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search over routed edges. Returns the first cycle found as a
/// node id path that starts and ends on the same node.
///
/// The open path lives on an explicit stack, so chain length is not bounded
/// by the thread's call stack.
fn find_cycle(nodes: &[PipelineNode]) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    // Each frame: a node on the open path and its successors not yet explored.
    let mut stack: Vec<(usize, std::vec::IntoIter<usize>)> = Vec::new();

    for start in 0..nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::InProgress;
        stack.push((start, nodes[start].successors().into_iter()));

        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            let Some(next) = pending.next() else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            match marks[next] {
                Mark::InProgress => {
                    let from = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                    let mut path: Vec<String> = stack[from..]
                        .iter()
                        .map(|(n, _)| nodes[*n].id.clone())
                        .collect();
                    path.push(nodes[next].id.clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    stack.push((next, nodes[next].successors().into_iter()));
                }
                Mark::Done => {}
            }
        }
    }
    None
}
