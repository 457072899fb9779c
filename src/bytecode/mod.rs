pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod format;
pub mod ir;
pub mod op;
pub mod verify;

pub use compile_error::CodegenError;
pub use ir::{Constant, FunctionInfo, ProgramBc};
pub use op::{Instruction, Opcode};
