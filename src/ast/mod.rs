//! AST module
//!
//! Data types representing parsed script structure. Pure data plus
//! position info; no execution logic lives here.

pub mod types;

pub use types::*;
