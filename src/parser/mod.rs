//! Parser module
//!
//! Two implementations with one output contract: a grammar-driven
//! recursive-descent parser covering the full syntax, and a
//! line-oriented fallback that degrades instead of failing. Both
//! produce the same AST types; the shared conformance suite keeps
//! their common subset structurally identical.

pub mod grammar;
pub mod lexer;
pub mod line;
pub mod types;

#[cfg(test)]
mod conformance;

pub use grammar::{parse, parse_file};
pub use types::ParseException;
