//! Frontend for the textual polyhls IR.
//!
//! Source programs are lowered to this format by an external tool; the
//! parser produces an untyped [ast::Program] whose names are not yet
//! resolved.
pub mod ast;
mod parser;

pub use parser::IrParser;
