//! Shared data model and errors for the rulepipe engine.
//!
//! This crate provides the foundational types used by the other rulepipe crates:
//! - `Value` / `Record`: the immutable data flowing through a pipeline
//! - `FieldPath`: dotted/indexed addressing into records
//! - the error taxonomy: build-time (`GraphBuildError`), per-record
//!   (`RunError`, `TransformError`) and expression evaluation (`EvalError`)

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod path;
pub mod record;
pub mod value;

pub use path::{FieldPath, Segment};
pub use record::Record;
pub use value::Value;

// ---------------------------------------------------------------------------
// Record errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("field '{path}' not found")]
    FieldNotFound { path: String },

    #[error("invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("cannot descend into {found} at '{path}'")]
    NotAContainer { path: String, found: &'static str },

    #[error("index {index} out of bounds at '{path}' (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("expected a record, found {found}")]
    NotARecord { found: &'static str },
}

// ---------------------------------------------------------------------------
// Expression evaluation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// An operand referenced a field the record does not have.
    #[error("missing operand '{path}'")]
    MissingOperand { path: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{op}'")]
    Overflow { op: String },
}

impl EvalError {
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        EvalError::TypeMismatch {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transform errors
// ---------------------------------------------------------------------------

/// A transform aborted at operation `op_index` (0-based, declaration order).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("transform operation {op_index} failed: {cause}")]
pub struct TransformError {
    pub op_index: usize,
    pub cause: TransformCause,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformCause {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("{0}")]
    Custom(String),
}

impl TransformError {
    pub fn new(op_index: usize, cause: impl Into<TransformCause>) -> Self {
        Self {
            op_index,
            cause: cause.into(),
        }
    }

    /// Failure raised by an application-provided transform.
    pub fn custom(op_index: usize, message: impl Into<String>) -> Self {
        Self {
            op_index,
            cause: TransformCause::Custom(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph build errors (configuration time only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphBuildError {
    #[error("pipeline '{name}' declares no nodes")]
    EmptyPipeline { name: String },

    #[error("duplicate node id '{id}'")]
    DuplicateNode { id: String },

    #[error("{reference} references unknown node '{id}'")]
    UnknownNode { reference: String, id: String },

    #[error("match node '{node}' has no default branch")]
    MissingDefaultBranch { node: String },

    #[error("cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("node '{node}' has invalid edges: {message}")]
    InvalidEdges { node: String, message: String },

    #[error("node '{node}' has an invalid expression: {message}")]
    InvalidExpression { node: String, message: String },

    #[error("node '{node}' has an invalid pattern: {message}")]
    InvalidPattern { node: String, message: String },

    #[error("node '{node}' uses unregistered handler type '{handler_type}'")]
    UnknownHandlerType { node: String, handler_type: String },

    #[error("node '{node}' has invalid configuration: {message}")]
    InvalidConfig { node: String, message: String },
}

// ---------------------------------------------------------------------------
// Run errors, isolated to one record traversal
// ---------------------------------------------------------------------------

/// Why a traversal was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Requested,
    Deadline,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::Deadline => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// A node was entered twice in one run. Build-time cycle detection makes
    /// this unreachable; seeing it means graph validation has a bug.
    #[error("node '{node}' visited twice in one run")]
    CycleInvariantViolation { node: String },

    #[error("run cancelled: {reason}")]
    Cancelled { reason: CancelReason },

    #[error("record depth {depth} exceeds limit {limit}")]
    DepthExceeded { depth: usize, limit: usize },

    #[error("match returned undeclared branch '{branch}'")]
    UnknownBranch { branch: String },

    /// An application-provided handler panicked while the record was at its node.
    #[error("handler panicked: {message}")]
    HandlerPanicked { message: String },
}

/// Coarse classification of a [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transform,
    CycleInvariantViolation,
    Cancelled,
    DepthExceeded,
    UnknownBranch,
    Handler,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transform => "transform",
            ErrorKind::CycleInvariantViolation => "cycle_invariant_violation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DepthExceeded => "depth_exceeded",
            ErrorKind::UnknownBranch => "unknown_branch",
            ErrorKind::Handler => "handler",
        };
        f.write_str(s)
    }
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Transform(_) => ErrorKind::Transform,
            RunError::CycleInvariantViolation { .. } => ErrorKind::CycleInvariantViolation,
            RunError::Cancelled { .. } => ErrorKind::Cancelled,
            RunError::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            RunError::UnknownBranch { .. } => ErrorKind::UnknownBranch,
            RunError::HandlerPanicked { .. } => ErrorKind::Handler,
        }
    }

    /// Returns `true` for invariant violations that point at an engine bug
    /// rather than at the record being processed.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, RunError::CycleInvariantViolation { .. })
    }
}

// ---------------------------------------------------------------------------
// Unified error
// ---------------------------------------------------------------------------

/// Unified error type for loading and building pipelines.
#[derive(Debug, thiserror::Error)]
pub enum RulepipeError {
    #[error("Pipeline build failed: {0}")]
    Build(#[from] GraphBuildError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Pipeline validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A convenience alias for `Result<T, RulepipeError>`.
pub type Result<T> = std::result::Result<T, RulepipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_field_not_found() {
        let err = RecordError::FieldNotFound {
            path: "user.name".into(),
        };
        assert_eq!(err.to_string(), "field 'user.name' not found");
    }

    #[test]
    fn error_display_transform() {
        let err = TransformError::new(
            2,
            EvalError::MissingOperand {
                path: "price".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "transform operation 2 failed: missing operand 'price'"
        );
    }

    #[test]
    fn error_display_custom_transform() {
        let err = TransformError::custom(0, "lookup table unavailable");
        assert_eq!(
            err.to_string(),
            "transform operation 0 failed: lookup table unavailable"
        );
    }

    #[test]
    fn error_display_cycle() {
        let err = GraphBuildError::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cycle detected: a -> b -> a");
    }

    #[test]
    fn error_display_unknown_node() {
        let err = GraphBuildError::UnknownNode {
            reference: "edge a -> ghost".into(),
            id: "ghost".into(),
        };
        assert_eq!(
            err.to_string(),
            "edge a -> ghost references unknown node 'ghost'"
        );
    }

    #[test]
    fn error_display_cancelled() {
        let err = RunError::Cancelled {
            reason: CancelReason::Deadline,
        };
        assert_eq!(err.to_string(), "run cancelled: deadline exceeded");
    }

    #[test]
    fn run_error_kinds() {
        let transform: RunError = TransformError::custom(1, "x").into();
        assert_eq!(transform.kind(), ErrorKind::Transform);
        assert_eq!(
            RunError::Cancelled {
                reason: CancelReason::Requested
            }
            .kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            RunError::DepthExceeded { depth: 40, limit: 32 }.kind(),
            ErrorKind::DepthExceeded
        );
        assert_eq!(
            RunError::UnknownBranch { branch: "z".into() }.kind(),
            ErrorKind::UnknownBranch
        );
    }

    #[test]
    fn only_cycle_violation_is_an_invariant_violation() {
        assert!(RunError::CycleInvariantViolation { node: "n".into() }.is_invariant_violation());
        assert!(!RunError::Cancelled {
            reason: CancelReason::Requested
        }
        .is_invariant_violation());
    }

    #[test]
    fn error_kind_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::CycleInvariantViolation).unwrap(),
            "\"cycle_invariant_violation\""
        );
        assert_eq!(ErrorKind::DepthExceeded.to_string(), "depth_exceeded");
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RulepipeError = io_err.into();
        assert!(matches!(err, RulepipeError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_build_error() {
        let err: RulepipeError = GraphBuildError::DuplicateNode { id: "a".into() }.into();
        assert_eq!(err.to_string(), "Pipeline build failed: duplicate node id 'a'");
    }
}
