//! # AquaScript
//!
//! A small dynamically typed scripting language: a lexer and recursive-descent
//! parser ([`frontend`]), a single-pass code generator and binary container
//! ([`bytecode`]), and a stack-based virtual machine ([`runtime`]).
//!
//! The two operations everything else builds on are [`compile`] (source to
//! [`ProgramBc`] or diagnostics) and [`Vm::run`] (bytecode to output or a
//! [`RuntimeError`]).

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;

use std::fmt;
use std::io::Write;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::bytecode::compile::Compiler;
use crate::frontend::{Lexer, Parser};

pub use crate::bytecode::format::{FormatError, load, serialize};
pub use crate::bytecode::{CodegenError, ProgramBc};
pub use crate::frontend::{LexError, SyntaxError};
pub use crate::lang::value::Value;
pub use crate::runtime::{
    Bridge, ErrorKind, FunctionTable, RuntimeError, Vm, VmConfig, VmStats,
};

/// A positioned compile-time message. `line` and `col` are 1-based; both are
/// 0 for internal compiler errors that have no source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "error: {}", self.message)
        } else {
            write!(f, "{}:{}: error: {}", self.line, self.col, self.message)
        }
    }
}

/// Any failure between source text and a finished [`ProgramBc`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl CompileError {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let diagnostic = match self {
            CompileError::Lex(e) => Diagnostic {
                line: e.line,
                col: e.col,
                message: e.message.clone(),
            },
            CompileError::Syntax(e) => Diagnostic {
                line: e.line,
                col: e.col,
                message: e.message.clone(),
            },
            CompileError::Codegen(e) => {
                let (line, col) = e.position().unwrap_or((0, 0));
                let message = match e {
                    CodegenError::ReturnOutsideFunction { .. } => {
                        "'return' outside of a function".to_string()
                    }
                    other => other.to_string(),
                };
                Diagnostic { line, col, message }
            }
        };
        vec![diagnostic]
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lex, parse and generate code for `source`.
#[instrument(skip_all, fields(bytes = source.len()))]
pub fn compile(source: &str) -> Result<ProgramBc, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    debug!(tokens = tokens.len(), "lexed");

    let program = Parser::new(tokens).parse()?;
    debug!(statements = program.body.len(), "parsed");

    Ok(Compiler::new().compile_program(&program)?)
}

/// Runs `bc` on a VM built from `config`, returning the run's statistics.
pub fn execute(
    bc: &ProgramBc,
    config: VmConfig,
    out: &mut dyn Write,
) -> Result<VmStats, RuntimeError> {
    let mut vm = Vm::with_config(config);
    vm.run(bc, out)?;
    Ok(vm.stats().clone())
}

/// Compiles and runs `source` with the default VM configuration.
pub fn run_source(source: &str, out: &mut dyn Write) -> Result<VmStats, Error> {
    let bc = compile(source)?;
    Ok(execute(&bc, VmConfig::default(), out)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        func fib(n) {
            if n < 2 { return n }
            return fib(n - 1) + fib(n - 2)
        }
        var seen = {}
        for i in range(8) { seen[i] = fib(i) }
        var words = ["tide", "reef", 'kelp']
        for w in words { print(f"{w}: {len(w)}") }
        print(seen, -2.5, 1e20, null, 7 % 3 == 1 and "yes" or "no")
    "#;

    fn run(bc: &ProgramBc) -> String {
        let mut out = Vec::new();
        execute(bc, VmConfig::default(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn diagnostic(source: &str) -> Diagnostic {
        let e = compile(source).unwrap_err();
        let mut diagnostics = e.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        diagnostics.remove(0)
    }

    #[test]
    fn test_container_round_trip_preserves_behavior() {
        let bc = compile(SAMPLE).unwrap();
        let restored = load(&serialize(&bc).unwrap()).unwrap();
        assert_eq!(restored, bc);
        assert_eq!(run(&restored), run(&bc));
        assert!(run(&bc).starts_with("tide: 4\nreef: 4\nkelp: 4\n"));
    }

    #[test]
    fn test_run_source_output() {
        let mut out = Vec::new();
        let stats = run_source("print(1 + 2, \"three\")", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "3 three\n");
        assert!(stats.instructions_executed > 0);
    }

    #[test]
    fn test_lex_error_diagnostic() {
        let d = diagnostic("var x = 1\nvar y = \"open");
        assert_eq!(d.line, 2);
        assert!(d.to_string().starts_with("2:"));
    }

    #[test]
    fn test_syntax_error_diagnostic() {
        let d = diagnostic("var x = (1 + 2");
        assert_eq!(d.line, 1);
        assert!(!d.message.is_empty());
    }

    #[test]
    fn test_codegen_error_diagnostic() {
        let d = diagnostic("var x = 1\nreturn x");
        assert_eq!(
            d,
            Diagnostic {
                line: 2,
                col: 1,
                message: "'return' outside of a function".to_string(),
            }
        );
        assert_eq!(d.to_string(), "2:1: error: 'return' outside of a function");
    }

    #[test]
    fn test_run_source_separates_error_families() {
        let mut out = Vec::new();
        assert!(matches!(
            run_source("var = 3", &mut out),
            Err(Error::Compile(CompileError::Syntax(_)))
        ));
        match run_source("print(\"before\")\nvar x = 1 / 0", &mut out) {
            Err(Error::Runtime(e)) => assert_eq!(e.kind, ErrorKind::Arithmetic),
            other => panic!("expected a runtime error, got {:?}", other),
        }
        // output written before the failure is kept
        assert_eq!(String::from_utf8(out).unwrap(), "before\n");
    }
}
