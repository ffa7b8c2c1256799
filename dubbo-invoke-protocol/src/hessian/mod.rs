//! The Hessian2 subset used in Dubbo bodies.
//!
//! The writer covers what a request needs (primitives, strings, lists, maps
//! and typed maps). The reader covers the common Hessian2 tag space plus
//! class definitions and references, degrading to placeholders beyond it.

mod reader;
mod writer;

pub use reader::{HessianReader, MAX_CLASS_DEPTH, MAX_REFERENCED_NODES, MAX_VALUE_DEPTH};
pub use writer::HessianWriter;
