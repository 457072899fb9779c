use crate::lang::node::Expr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    /// `return` at the top level of the program.
    #[error("{line}:{col}: 'return' outside of a function")]
    ReturnOutsideFunction { line: usize, col: usize },

    /// A node that the compiler doesn't know how to handle in this position
    #[error("cannot compile {node}: {hint}")]
    UnhandledNode { node: String, hint: String },

    /// Internal compiler error (shouldn't happen in normal use)
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CodegenError {
    pub fn unhandled_expr(expr: &Expr, hint: impl Into<String>) -> Self {
        CodegenError::UnhandledNode {
            node: expr.kind_name().to_string(),
            hint: hint.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CodegenError::Internal(msg.into())
    }

    /// Source position, when the error has one.
    pub fn position(&self) -> Option<(usize, usize)> {
        match self {
            CodegenError::ReturnOutsideFunction { line, col } => Some((*line, *col)),
            _ => None,
        }
    }
}
