use crate::bytecode::op::Instruction;
use crate::lang::value::Value;
use serde::{Deserialize, Serialize};

/// A compiled bytecode program.
///
/// Offsets stored anywhere in the program (jump operands, function entries)
/// are absolute indices into `code`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgramBc {
    /// Literal pool, deduplicated by value and type.
    pub constants: Vec<Constant>,

    /// Global names; a name's position is its slot index.
    pub globals: Vec<String>,

    /// Function table, in definition order.
    pub functions: Vec<FunctionInfo>,

    /// Main code, then `HALT`, then every function body.
    pub code: Vec<Instruction>,
}

impl ProgramBc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Function table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub params: Vec<String>,
    /// Names declared with `var` (or bound by `for`) inside the body, after the params.
    pub locals: Vec<String>,
    pub entry: u32,
    pub len: u32,
}

impl FunctionInfo {
    /// Local slots the frame needs: parameters first, then declared locals.
    pub fn frame_size(&self) -> usize {
        self.params.len() + self.locals.len()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Offset one past the last instruction of the body.
    pub fn end(&self) -> u64 {
        self.entry as u64 + self.len as u64
    }

    pub fn contains(&self, offset: usize) -> bool {
        (offset as u64) >= self.entry as u64 && (offset as u64) < self.end()
    }
}

/// An immutable constant-pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Value {
        match constant {
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::Str(s) => Value::Str(s.clone()),
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Null => Value::Null,
        }
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&Value::from(self).repr())
    }
}
