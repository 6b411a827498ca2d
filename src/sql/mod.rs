//! Guarding and rewriting model-generated SQL before it reaches storage.
//!
//! Both stages work on SQL text with regular expressions for a single dialect
//! (SQLite); there is no tokenizer or AST. The validator is a best-effort
//! allowlist, and the rewriter can misfire on constructs it does not model,
//! such as `FROM <name>` inside a string literal or comment.

pub mod rewrite;
pub mod safety;

pub use rewrite::{TableBinding, rewrite};
pub use safety::{ROW_CAP, SafetyReport, SafetyViolation, sanitize, validate};
