//! Per-run evaluation state.
//!
//! One [`EvaluationContext`] exists per record traversal. It owns the current
//! record, the visited-node set, the diagnostic trail and the cancellation
//! signals, and is discarded when the traversal ends.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rulepipe_types::{CancelReason, ErrorKind, Record, RunError};

/// Caller-supplied cancellation for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: Option<CancellationToken>,
    pub deadline: Option<Instant>,
}

impl RunOptions {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// One node visit in the diagnostic trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node_id: String,
    pub step: StepOutcome,
    #[serde(with = "crate::duration_serde")]
    pub elapsed: Duration,
}

/// What happened at a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Condition {
        value: bool,
        /// Evaluation error that was folded into `false`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folded: Option<String>,
    },
    Branch {
        branch: String,
    },
    Transformed,
    Sink,
    Dropped,
    Failed {
        error_kind: ErrorKind,
        error: String,
    },
}

impl StepOutcome {
    pub fn failed(error: &RunError) -> Self {
        StepOutcome::Failed {
            error_kind: error.kind(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct EvaluationContext {
    run_id: Uuid,
    record: Record,
    visited: Vec<bool>,
    trail: Vec<TraceEntry>,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl EvaluationContext {
    pub fn new(node_count: usize, record: Record, options: RunOptions) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            record,
            visited: vec![false; node_count],
            trail: Vec::new(),
            cancel: options.cancel,
            deadline: options.deadline,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn replace_record(&mut self, record: Record) {
        self.record = record;
    }

    pub fn trail(&self) -> &[TraceEntry] {
        &self.trail
    }

    /// Mark node `index` visited. A second visit in the same run means the
    /// build-time cycle check missed something.
    pub fn enter(&mut self, index: usize, node_id: &str) -> Result<(), RunError> {
        match self.visited.get_mut(index) {
            Some(seen) if !*seen => {
                *seen = true;
                Ok(())
            }
            _ => Err(RunError::CycleInvariantViolation {
                node: node_id.to_string(),
            }),
        }
    }

    pub fn check_cancelled(&self) -> Result<(), RunError> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(RunError::Cancelled {
                reason: CancelReason::Requested,
            });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RunError::Cancelled {
                reason: CancelReason::Deadline,
            });
        }
        Ok(())
    }

    pub fn push_trace(&mut self, node_id: &str, step: StepOutcome, elapsed: Duration) {
        self.trail.push(TraceEntry {
            node_id: node_id.to_string(),
            step,
            elapsed,
        });
    }

    /// Consume the context, yielding the final record and the trail.
    pub fn finish(self) -> (Record, Vec<TraceEntry>) {
        (self.record, self.trail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_visit_is_an_invariant_violation() {
        let mut ctx = EvaluationContext::new(2, Record::new(), RunOptions::default());
        assert!(ctx.enter(0, "a").is_ok());
        assert!(ctx.enter(1, "b").is_ok());
        assert_eq!(
            ctx.enter(0, "a"),
            Err(RunError::CycleInvariantViolation { node: "a".into() })
        );
    }

    #[test]
    fn cancellation_token_is_observed() {
        let token = CancellationToken::new();
        let ctx = EvaluationContext::new(
            1,
            Record::new(),
            RunOptions::default().with_cancel(token.clone()),
        );
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert_eq!(
            ctx.check_cancelled(),
            Err(RunError::Cancelled {
                reason: CancelReason::Requested
            })
        );
    }

    #[test]
    fn passed_deadline_cancels() {
        let past = Instant::now() - Duration::from_millis(5);
        let ctx = EvaluationContext::new(1, Record::new(), RunOptions::default().with_deadline(past));
        assert_eq!(
            ctx.check_cancelled(),
            Err(RunError::Cancelled {
                reason: CancelReason::Deadline
            })
        );

        let ctx = EvaluationContext::new(
            1,
            Record::new(),
            RunOptions::default().with_timeout(Duration::from_secs(60)),
        );
        assert!(ctx.check_cancelled().is_ok());
    }

    #[test]
    fn each_context_gets_its_own_run_id() {
        let a = EvaluationContext::new(1, Record::new(), RunOptions::default());
        let b = EvaluationContext::new(1, Record::new(), RunOptions::default());
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn trace_entry_json_shape() {
        let entry = TraceEntry {
            node_id: "age_check".into(),
            step: StepOutcome::Condition {
                value: false,
                folded: Some("missing operand 'age'".into()),
            },
            elapsed: Duration::from_micros(7),
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({
                "node_id": "age_check",
                "step": {"outcome": "condition", "value": false, "folded": "missing operand 'age'"},
                "elapsed": "7us"
            })
        );

        let failed = StepOutcome::failed(&RunError::DepthExceeded { depth: 40, limit: 32 });
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"outcome": "failed", "error_kind": "depth_exceeded",
                   "error": "record depth 40 exceeds limit 32"})
        );
    }

    #[test]
    fn replace_record_and_finish() {
        let mut ctx = EvaluationContext::new(1, Record::new(), RunOptions::default());
        let next = Record::from_json(json!({"a": 1})).unwrap();
        ctx.replace_record(next.clone());
        ctx.push_trace("t", StepOutcome::Transformed, Duration::ZERO);
        let (record, trail) = ctx.finish();
        assert_eq!(record, next);
        assert_eq!(trail.len(), 1);
    }
}
