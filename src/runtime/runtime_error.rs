use std::fmt;

use thiserror::Error;

/// Runtime error families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Type,
    /// Wrong number or kind of arguments in a call.
    Argument,
    Arithmetic,
    Index,
    Key,
    Name,
    StackOverflow,
    /// Writing program output failed.
    Io,
    /// A bridged function reported a failure.
    External,
    /// Malformed program; never caused by AquaScript source.
    InvalidBytecode,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Name => "NameError",
            ErrorKind::StackOverflow => "StackOverflowError",
            ErrorKind::Io => "IOError",
            ErrorKind::External => "ExternalError",
            ErrorKind::InvalidBytecode => "InvalidBytecode",
        }
    }

    pub fn is_fatal(self) -> bool {
        self == ErrorKind::InvalidBytecode
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}{}", context(.offset, .call_stack))]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offset of the instruction that failed.
    pub offset: Option<usize>,
    /// Active functions when the error was raised, innermost last.
    pub call_stack: Vec<String>,
}

fn context(offset: &Option<usize>, call_stack: &[String]) -> String {
    let mut out = String::new();
    if let Some(offset) = offset {
        out.push_str(&format!(" (at offset {})", offset));
    }
    if !call_stack.is_empty() {
        out.push_str("\n  call stack:");
        for (i, frame) in call_stack.iter().rev().enumerate() {
            out.push_str(&format!("\n    {}: {}", i, frame));
        }
    }
    out
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            offset: None,
            call_stack: Vec::new(),
        }
    }

    /// Records where the error happened unless a location is already set.
    pub fn at(mut self, offset: usize, call_stack: impl FnOnce() -> Vec<String>) -> Self {
        if self.offset.is_none() {
            self.offset = Some(offset);
            self.call_stack = call_stack();
        }
        self
    }
}

pub fn type_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Type, message)
}

pub fn argument_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Argument, message)
}

pub fn arithmetic_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Arithmetic, message)
}

pub fn division_by_zero() -> RuntimeError {
    arithmetic_error("division by zero")
}

pub fn index_error(index: i64, len: usize) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::Index,
        format!("index {} out of range for length {}", index, len),
    )
}

pub fn name_error(name: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::Name, format!("name '{}' is not defined", name))
}

pub fn invalid_bytecode(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::InvalidBytecode, message)
}
