//! The access rules DSL: parser and evaluator.

pub mod engine;
pub mod parser;

pub use engine::{PermsRequested, RequestContext, RulesEngine};
pub use parser::{CompareOp, Param, PathSegment, Rule};
