//! Pipeline execution engine: the per-record traversal loop.
//!
//! A [`PipelineEngine`] wraps a built, immutable [`PipelineGraph`] and walks
//! one record at a time from the entry node to a sink, a drop node or a
//! failure. Traversals share nothing but the graph, so one engine can be
//! cloned freely and driven from many threads at once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use rulepipe_types::{ErrorKind, Record, RunError};

use crate::context::{EvaluationContext, RunOptions, StepOutcome, TraceEntry};
use crate::definition::{EngineSettings, DEFAULT_MAX_DEPTH};
use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::{NodeRole, PipelineGraph, PipelineNode};
use crate::handler::Decision;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deepest record nesting accepted as input or produced by a transform.
    pub max_depth: usize,
    /// Per-run time limit, measured from the start of each traversal.
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: None,
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_depth: settings.max_depth,
            timeout: settings.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// How one traversal ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Reached a sink; carries the final record.
    Success(Record),
    /// Reached a drop node.
    Dropped { node_id: String },
    Failed(Failure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: ErrorKind,
    /// Node the record was at when the run failed.
    pub node_id: String,
    pub error: RunError,
}

impl Outcome {
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Dropped { .. } => "dropped",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Outcome::Success(record) => Some(record),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("status", self.status())?;
        match self {
            Outcome::Success(record) => map.serialize_entry("record", record)?,
            Outcome::Dropped { node_id } => map.serialize_entry("node", node_id)?,
            Outcome::Failed(failure) => {
                map.serialize_entry("kind", &failure.kind)?;
                map.serialize_entry("node", &failure.node_id)?;
                map.serialize_entry("error", &failure.error.to_string())?;
            }
        }
        map.end()
    }
}

/// Everything known about one finished traversal.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub trail: Vec<TraceEntry>,
    #[serde(with = "crate::duration_serde")]
    pub elapsed: Duration,
}

/// Where the traversal loop stopped. The final record is still in the
/// context at this point.
enum Exit {
    Sink(String),
    Drop(String),
    Fail(Failure),
}

// ---------------------------------------------------------------------------
// PipelineEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineEngine {
    graph: Arc<PipelineGraph>,
    config: EngineConfig,
    events: Option<EventEmitter>,
}

impl PipelineEngine {
    /// Create an engine using the graph's own engine settings.
    pub fn new(graph: Arc<PipelineGraph>) -> Self {
        let config = EngineConfig::from(graph.settings());
        Self {
            graph,
            config,
            events: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, record: Record) -> RunReport {
        self.run_with(record, RunOptions::default())
    }

    /// Traverse the graph with `record`. The effective deadline is the
    /// earlier of `options.deadline` and the configured timeout.
    pub fn run_with(&self, record: Record, mut options: RunOptions) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        if let Some(timeout) = self.config.timeout {
            let derived = start + timeout;
            options.deadline = Some(options.deadline.map_or(derived, |d| d.min(derived)));
        }

        let mut ctx = EvaluationContext::new(self.graph.node_count(), record, options);
        let run_id = ctx.run_id();
        self.emit(PipelineEvent::RunStarted {
            run_id,
            pipeline: self.graph.name().to_string(),
            entry: self.graph.entry().id.clone(),
        });

        let exit = self.traverse(&mut ctx);
        let elapsed = start.elapsed();
        let (record, trail) = ctx.finish();

        let (outcome, terminal) = match exit {
            Exit::Sink(node_id) => (Outcome::Success(record), Some(node_id)),
            Exit::Drop(node_id) => (
                Outcome::Dropped {
                    node_id: node_id.clone(),
                },
                Some(node_id),
            ),
            Exit::Fail(failure) => {
                let node_id = failure.node_id.clone();
                (Outcome::Failed(failure), Some(node_id))
            }
        };

        match &outcome {
            Outcome::Failed(failure) if failure.error.is_invariant_violation() => {
                tracing::error!(
                    run = %run_id,
                    node = %failure.node_id,
                    error = %failure.error,
                    "Graph invariant violated during traversal"
                );
            }
            Outcome::Failed(failure) => {
                tracing::warn!(
                    run = %run_id,
                    node = %failure.node_id,
                    kind = %failure.kind,
                    error = %failure.error,
                    "Record failed"
                );
            }
            _ => {
                tracing::info!(
                    run = %run_id,
                    status = outcome.status(),
                    nodes = trail.len(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "Run completed"
                );
            }
        }

        self.emit(PipelineEvent::RunCompleted {
            run_id,
            status: outcome.status().to_string(),
            node_id: terminal,
            duration_ms: elapsed.as_millis() as u64,
        });

        RunReport {
            run_id,
            started_at,
            outcome,
            trail,
            elapsed,
        }
    }

    /// Run every record, at most `concurrency` at a time, on the blocking
    /// pool. Reports come back in input order.
    pub async fn run_batch(&self, records: Vec<Record>, concurrency: usize) -> Vec<RunReport> {
        self.run_batch_with(records, concurrency, RunOptions::default())
            .await
    }

    /// Like [`run_batch`](Self::run_batch); every run shares `options`, so
    /// one token cancels the whole batch.
    pub async fn run_batch_with(
        &self,
        records: Vec<Record>,
        concurrency: usize,
        options: RunOptions,
    ) -> Vec<RunReport> {
        let total = records.len();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, record) in records.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let engine = self.clone();
            let options = options.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                (index, engine.run_with(record, options))
            });
        }

        let mut slots: Vec<Option<RunReport>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => tracing::error!(error = %e, "Batch worker did not finish"),
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| self.lost_report()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    fn traverse(&self, ctx: &mut EvaluationContext) -> Exit {
        let mut current = self.graph.entry_index();

        let depth = ctx.record().depth();
        if depth > self.config.max_depth {
            let error = RunError::DepthExceeded {
                depth,
                limit: self.config.max_depth,
            };
            return self.fail(ctx, self.graph.at(current), error, Duration::ZERO);
        }

        loop {
            let node = self.graph.at(current);

            if let Err(error) = ctx.check_cancelled() {
                return self.fail(ctx, node, error, Duration::ZERO);
            }
            if let Err(error) = ctx.enter(current, &node.id) {
                return self.fail(ctx, node, error, Duration::ZERO);
            }

            let started = Instant::now();
            let (handler, routes) = match &node.role {
                NodeRole::Sink => {
                    self.record_step(ctx, &node.id, StepOutcome::Sink, started.elapsed());
                    return Exit::Sink(node.id.clone());
                }
                NodeRole::Drop => {
                    self.record_step(ctx, &node.id, StepOutcome::Dropped, started.elapsed());
                    return Exit::Drop(node.id.clone());
                }
                NodeRole::Handler { handler, routes } => (handler, routes),
            };

            let dispatched =
                panic::catch_unwind(AssertUnwindSafe(|| handler.dispatch(ctx.record())));
            let elapsed = started.elapsed();
            let decision = match dispatched {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => return self.fail(ctx, node, RunError::Transform(e), elapsed),
                Err(payload) => {
                    let error = RunError::HandlerPanicked {
                        message: panic_message(payload.as_ref()),
                    };
                    return self.fail(ctx, node, error, elapsed);
                }
            };

            let next = match routes.select(&decision) {
                Ok(next) => next,
                Err(error) => return self.fail(ctx, node, error, elapsed),
            };

            let step = match decision {
                Decision::Bool { value, folded } => {
                    if let Some(err) = &folded {
                        tracing::debug!(node = %node.id, error = %err, "Condition error folded to false");
                    }
                    StepOutcome::Condition {
                        value,
                        folded: folded.map(|e| e.to_string()),
                    }
                }
                Decision::Branch(branch) => StepOutcome::Branch { branch },
                Decision::Record(record) => {
                    let depth = record.depth();
                    if depth > self.config.max_depth {
                        let error = RunError::DepthExceeded {
                            depth,
                            limit: self.config.max_depth,
                        };
                        return self.fail(ctx, node, error, elapsed);
                    }
                    ctx.replace_record(record);
                    StepOutcome::Transformed
                }
            };

            tracing::debug!(
                node = %node.id,
                next = %self.graph.at(next).id,
                elapsed_us = elapsed.as_micros() as u64,
                "Node evaluated"
            );
            self.record_step(ctx, &node.id, step, elapsed);
            current = next;
        }
    }

    fn fail(
        &self,
        ctx: &mut EvaluationContext,
        node: &PipelineNode,
        error: RunError,
        elapsed: Duration,
    ) -> Exit {
        self.record_step(ctx, &node.id, StepOutcome::failed(&error), elapsed);
        Exit::Fail(Failure {
            kind: error.kind(),
            node_id: node.id.clone(),
            error,
        })
    }

    fn record_step(
        &self,
        ctx: &mut EvaluationContext,
        node_id: &str,
        step: StepOutcome,
        elapsed: Duration,
    ) {
        if let Some(events) = &self.events {
            events.emit(PipelineEvent::NodeEvaluated {
                run_id: ctx.run_id(),
                node_id: node_id.to_string(),
                step: step.clone(),
                duration_us: elapsed.as_micros() as u64,
            });
        }
        ctx.push_trace(node_id, step, elapsed);
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Report for a batch slot whose worker never returned.
    fn lost_report(&self) -> RunReport {
        let error = RunError::HandlerPanicked {
            message: "batch worker did not return a report".into(),
        };
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            outcome: Outcome::Failed(Failure {
                kind: error.kind(),
                node_id: self.graph.entry().id.clone(),
                error,
            }),
            trail: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
