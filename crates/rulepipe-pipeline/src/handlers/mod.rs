//! Built-in handler implementations, one per handler kind.

pub mod field_ops;
pub mod pattern;
pub mod predicate;

pub use field_ops::{FieldOp, FieldOpsTransform};
pub use pattern::{Pattern, PatternMatch};
pub use predicate::PredicateCondition;
