//! # AquaScript syntax tree and runtime values
//!
//! The AST ([`node`], [`program`]) is produced by the parser and consumed by
//! the bytecode compiler. [`value`] holds the dynamic values the VM operates
//! on.

pub mod node;
pub mod program;
pub mod value;
