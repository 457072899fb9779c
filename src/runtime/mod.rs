//! Bytecode execution: the VM, its built-in functions, and the host bridge.

pub mod bridge;
pub mod builtins;
pub mod runtime_error;
pub mod vm;

pub use bridge::{Bridge, FunctionTable};
pub use runtime_error::{ErrorKind, RuntimeError};
pub use vm::{Vm, VmConfig, VmStats};
