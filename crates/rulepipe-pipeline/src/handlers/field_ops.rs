//! Transform handler applying ordered field operations.

use rulepipe_types::{FieldPath, Record, TransformCause, TransformError};

use crate::expr::Expr;
use crate::handler::Transform;

/// A single field operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Evaluate `expr` and store it at `path`, creating intermediate records.
    Set { path: FieldPath, expr: Expr },
    Remove { path: FieldPath },
    Rename { from: FieldPath, to: FieldPath },
    Copy { from: FieldPath, to: FieldPath },
}

impl FieldOp {
    pub fn name(&self) -> &'static str {
        match self {
            FieldOp::Set { .. } => "set",
            FieldOp::Remove { .. } => "remove",
            FieldOp::Rename { .. } => "rename",
            FieldOp::Copy { .. } => "copy",
        }
    }

    fn apply(&self, record: &Record) -> Result<Record, TransformCause> {
        match self {
            FieldOp::Set { path, expr } => {
                let value = expr.eval(record)?.into_owned();
                Ok(record.with(path, value)?)
            }
            FieldOp::Remove { path } => Ok(record.without(path)?.0),
            FieldOp::Rename { from, to } => {
                let (rest, value) = record.without(from)?;
                Ok(rest.with(to, value)?)
            }
            FieldOp::Copy { from, to } => {
                let value = record.get(from)?.clone();
                Ok(record.with(to, value)?)
            }
        }
    }
}

/// Applies operations in declaration order, each one against the record the
/// previous one produced. The first failure aborts the whole transform.
#[derive(Debug, Clone, Default)]
pub struct FieldOpsTransform {
    ops: Vec<FieldOp>,
}

impl FieldOpsTransform {
    pub fn new(ops: Vec<FieldOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[FieldOp] {
        &self.ops
    }
}

impl Transform for FieldOpsTransform {
    fn apply(&self, record: &Record) -> Result<Record, TransformError> {
        let mut current = record.clone();
        for (index, op) in self.ops.iter().enumerate() {
            current = op
                .apply(&current)
                .map_err(|cause| TransformError::new(index, cause))?;
        }
        Ok(current)
    }

    fn operation_count(&self) -> Option<usize> {
        Some(self.ops.len())
    }
}
