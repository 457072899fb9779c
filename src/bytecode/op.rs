use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - Bytecode instruction set
// =============================================================================

/// One VM operation. The discriminant is the byte stored in bytecode files.
///
/// Stack effects are written as `( before -- after )`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ==========================================================================
    // Load / store
    // ==========================================================================
    /// `( -- constants[operand] )`
    LoadConst = 0x01,
    LoadGlobal = 0x04,
    StoreGlobal = 0x05,
    /// Local slots exist only inside function bodies.
    LoadLocal = 0x06,
    StoreLocal = 0x07,

    // stack ops
    Pop = 0x08,
    Dup = 0x09,

    // arithmetic: ( a b -- a op b )
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Mod = 0x14,
    Neg = 0x16,

    // comparison: ( a b -- bool )
    Eq = 0x20,
    Ne = 0x21,
    Lt = 0x22,
    Gt = 0x23,
    Le = 0x24,
    Ge = 0x25,

    // logic
    Not = 0x32,

    // ==========================================================================
    // Jumps: operand is an absolute instruction offset
    // ==========================================================================
    Jump = 0x40,
    /// Pops the condition.
    JumpIfFalse = 0x41,
    /// Pops the condition.
    JumpIfTrue = 0x42,

    // ==========================================================================
    // Calls
    // ==========================================================================
    /// `( name arg1 .. argN -- result )` with N = operand.
    Call = 0x50,
    /// `( value -- )` in the callee, `( -- value )` in the caller.
    Return = 0x51,

    // ==========================================================================
    // Containers
    // ==========================================================================
    /// `( container index -- value )`
    GetItem = 0x65,
    /// `( container index value -- )`
    SetItem = 0x66,
    /// `( v1 .. vN -- list )`
    BuildList = 0x67,
    /// `( k1 v1 .. kN vN -- dict )`
    BuildDict = 0x7A,
    /// `( value -- str )`
    FormatValue = 0x6C,

    // ==========================================================================
    // Iteration: iterator state lives in the current frame, not on the stack
    // ==========================================================================
    /// `( iterable -- )`, pushes a new iterator onto the frame's iterator stack.
    GetIter = 0x6D,
    /// `( -- next )` or, when exhausted, drops the iterator and jumps to operand.
    ForIter = 0x6E,

    Halt = 0xFF,
}

impl Opcode {
    /// Every opcode, in discriminant order.
    pub const ALL: [Opcode; 33] = [
        Opcode::LoadConst,
        Opcode::LoadGlobal,
        Opcode::StoreGlobal,
        Opcode::LoadLocal,
        Opcode::StoreLocal,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Neg,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Gt,
        Opcode::Le,
        Opcode::Ge,
        Opcode::Not,
        Opcode::Jump,
        Opcode::JumpIfFalse,
        Opcode::JumpIfTrue,
        Opcode::Call,
        Opcode::Return,
        Opcode::GetItem,
        Opcode::SetItem,
        Opcode::BuildList,
        Opcode::FormatValue,
        Opcode::GetIter,
        Opcode::ForIter,
        Opcode::BuildDict,
        Opcode::Halt,
    ];

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::LoadLocal => "LOAD_LOCAL",
            Opcode::StoreLocal => "STORE_LOCAL",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Neg => "NEG",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Le => "LE",
            Opcode::Ge => "GE",
            Opcode::Not => "NOT",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::JumpIfTrue => "JUMP_IF_TRUE",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::GetItem => "GET_ITEM",
            Opcode::SetItem => "SET_ITEM",
            Opcode::BuildList => "BUILD_LIST",
            Opcode::BuildDict => "BUILD_DICT",
            Opcode::FormatValue => "FORMAT_VALUE",
            Opcode::GetIter => "GET_ITER",
            Opcode::ForIter => "FOR_ITER",
            Opcode::Halt => "HALT",
        }
    }

    /// Opcodes whose operand is an instruction offset.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue | Opcode::ForIter
        )
    }
}

/// A single encoded instruction.
///
/// The opcode is stored as its raw byte so that a loaded program can carry an
/// unknown opcode until the verifier or the VM rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: u8,
    pub operand: u32,
}

impl Instruction {
    pub fn new(op: Opcode, operand: u32) -> Self {
        Instruction {
            opcode: op as u8,
            operand,
        }
    }

    /// Instruction whose operand is unused.
    pub fn bare(op: Opcode) -> Self {
        Self::new(op, 0)
    }

    pub fn op(&self) -> Option<Opcode> {
        Opcode::from_byte(self.opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_opcode_decodes_to_itself() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op as u8), Some(op), "{}", op.name());
        }
    }

    #[test]
    fn test_opcode_bytes_are_unique() {
        let mut bytes: Vec<u8> = Opcode::ALL.iter().map(|op| *op as u8).collect();
        bytes.sort();
        bytes.dedup();
        assert_eq!(bytes.len(), Opcode::ALL.len());
    }

    #[test]
    fn test_unknown_byte() {
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0x99), None);
        assert_eq!(Instruction { opcode: 0x77, operand: 0 }.op(), None);
    }
}
