use thiserror::Error;

use crate::bytecode::ir::ProgramBc;
use crate::bytecode::op::{Instruction, Opcode};

/// Structural defect in a bytecode program.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid bytecode{}: {message}", .offset.map(|o| format!(" at offset {}", o)).unwrap_or_default())]
pub struct VerifyError {
    pub offset: Option<usize>,
    pub message: String,
}

impl VerifyError {
    fn at(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset: Some(offset),
            message: message.into(),
        }
    }

    fn program(message: impl Into<String>) -> Self {
        Self {
            offset: None,
            message: message.into(),
        }
    }
}

/// Returns (pops, pushes) for an instruction.
fn effect(op: Opcode, operand: u32) -> (u64, u64) {
    use Opcode::*;
    let n = operand as u64;
    match op {
        LoadConst | LoadGlobal | LoadLocal => (0, 1),
        StoreGlobal | StoreLocal | Pop => (1, 0),
        Dup => (1, 2),

        Add | Sub | Mul | Div | Mod => (2, 1),
        Eq | Ne | Lt | Gt | Le | Ge => (2, 1),
        Neg | Not | FormatValue => (1, 1),

        Jump | Halt => (0, 0),
        JumpIfFalse | JumpIfTrue => (1, 0),

        // ( name arg1 .. argN -- result )
        Call => (n + 1, 1),
        Return => (1, 0),

        GetItem => (2, 1),
        SetItem => (3, 0),
        BuildList => (n, 1),
        BuildDict => (2 * n, 1),

        // the iterator lives in the frame
        GetIter => (1, 0),
        ForIter => (0, 1),
    }
}

/// Checks that a program is safe to hand to the VM.
///
/// Every opcode must decode, every constant and global index must be in
/// range, every jump must land inside the stream, every function range must
/// lie inside the stream, and local slots may only be used inside a function
/// body that declares them.
///
/// Stack heights are checked with a linear scan per region (main code and
/// each function body) that doesn't follow jumps. Compiled statements leave
/// the stack balanced, so the scan catches underflow without a full
/// control-flow analysis.
pub fn verify(bc: &ProgramBc) -> Result<(), VerifyError> {
    let len = bc.code.len();

    for f in &bc.functions {
        if f.len == 0 || f.end() > len as u64 {
            return Err(VerifyError::program(format!(
                "function '{}' spans {}..{} outside of {} instructions",
                f.name,
                f.entry,
                f.end(),
                len
            )));
        }
    }

    for (offset, ins) in bc.code.iter().enumerate() {
        let op = decode(offset, ins)?;
        let index = ins.operand as usize;

        match op {
            Opcode::LoadConst if index >= bc.constants.len() => {
                return Err(VerifyError::at(
                    offset,
                    format!(
                        "constant index {} out of range ({} constants)",
                        index,
                        bc.constants.len()
                    ),
                ));
            }
            Opcode::LoadGlobal | Opcode::StoreGlobal if index >= bc.globals.len() => {
                return Err(VerifyError::at(
                    offset,
                    format!(
                        "global slot {} out of range ({} globals)",
                        index,
                        bc.globals.len()
                    ),
                ));
            }
            Opcode::LoadLocal | Opcode::StoreLocal => {
                let owner = bc.functions.iter().find(|f| f.contains(offset));
                match owner {
                    None => {
                        return Err(VerifyError::at(
                            offset,
                            format!("{} outside of a function body", op.name()),
                        ));
                    }
                    Some(f) if index >= f.frame_size() => {
                        return Err(VerifyError::at(
                            offset,
                            format!(
                                "local slot {} out of range in '{}' ({} slots)",
                                index,
                                f.name,
                                f.frame_size()
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }
            op if op.is_jump() && index >= len => {
                return Err(VerifyError::at(
                    offset,
                    format!("jump target {} outside of {} instructions", index, len),
                ));
            }
            _ => {}
        }
    }

    let main_end = bc
        .functions
        .iter()
        .map(|f| f.entry as usize)
        .min()
        .unwrap_or(len);
    check_stack(&bc.code, 0, main_end)?;
    for f in &bc.functions {
        check_stack(&bc.code, f.entry as usize, f.end() as usize)?;
    }

    Ok(())
}

fn decode(offset: usize, ins: &Instruction) -> Result<Opcode, VerifyError> {
    ins.op()
        .ok_or_else(|| VerifyError::at(offset, format!("unknown opcode 0x{:02X}", ins.opcode)))
}

fn check_stack(code: &[Instruction], start: usize, end: usize) -> Result<(), VerifyError> {
    let mut height: u64 = 0;
    for (offset, ins) in code.iter().enumerate().take(end).skip(start) {
        let op = decode(offset, ins)?;
        let (pops, pushes) = effect(op, ins.operand);
        if height < pops {
            return Err(VerifyError::at(
                offset,
                format!(
                    "stack underflow: {} needs {} operands, {} available",
                    op.name(),
                    pops,
                    height
                ),
            ));
        }
        height = height - pops + pushes;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::{Constant, FunctionInfo};
    use crate::compile;

    fn program(code: Vec<Instruction>) -> ProgramBc {
        ProgramBc {
            constants: vec![Constant::Int(1)],
            globals: vec!["x".to_string()],
            functions: Vec::new(),
            code,
        }
    }

    fn ins(op: Opcode, operand: u32) -> Instruction {
        Instruction::new(op, operand)
    }

    #[test]
    fn test_compiled_programs_verify() {
        let bc = compile(
            r#"
            func fact(n) { if n <= 1 { return 1 } return n * fact(n - 1) }
            var d = {"a": [1, 2]}
            for k in d { print(k, d[k][0] and fact(3) or null) }
            var s = f"{d} {-1}"
            "#,
        )
        .unwrap();
        assert_eq!(verify(&bc), Ok(()));
    }

    #[test]
    fn test_unknown_opcode() {
        let bc = program(vec![Instruction {
            opcode: 0xEE,
            operand: 0,
        }]);
        let err = verify(&bc).unwrap_err();
        assert_eq!(err.offset, Some(0));
        assert!(err.message.contains("0xEE"));
    }

    #[test]
    fn test_constant_index_out_of_range() {
        let bc = program(vec![ins(Opcode::LoadConst, 1), ins(Opcode::Halt, 0)]);
        assert!(verify(&bc).unwrap_err().message.contains("constant index 1"));
    }

    #[test]
    fn test_global_slot_out_of_range() {
        let bc = program(vec![
            ins(Opcode::LoadConst, 0),
            ins(Opcode::StoreGlobal, 3),
        ]);
        assert!(verify(&bc).unwrap_err().message.contains("global slot 3"));
    }

    #[test]
    fn test_jump_outside_stream() {
        let bc = program(vec![ins(Opcode::Jump, 2), ins(Opcode::Halt, 0)]);
        assert_eq!(verify(&bc).unwrap_err().offset, Some(0));
    }

    #[test]
    fn test_local_outside_function() {
        let bc = program(vec![ins(Opcode::LoadLocal, 0), ins(Opcode::Halt, 0)]);
        assert!(verify(&bc).unwrap_err().message.contains("outside of a function"));
    }

    #[test]
    fn test_local_slot_beyond_frame() {
        let mut bc = program(vec![
            ins(Opcode::Halt, 0),
            ins(Opcode::LoadLocal, 1),
            ins(Opcode::Return, 0),
        ]);
        bc.functions.push(FunctionInfo {
            name: "f".to_string(),
            params: vec!["a".to_string()],
            locals: Vec::new(),
            entry: 1,
            len: 2,
        });
        assert!(verify(&bc).unwrap_err().message.contains("local slot 1"));
    }

    #[test]
    fn test_function_range_outside_stream() {
        let mut bc = program(vec![ins(Opcode::Halt, 0)]);
        bc.functions.push(FunctionInfo {
            name: "f".to_string(),
            params: Vec::new(),
            locals: Vec::new(),
            entry: 1,
            len: 4,
        });
        let err = verify(&bc).unwrap_err();
        assert_eq!(err.offset, None);
        assert!(err.to_string().contains("function 'f'"));
    }

    #[test]
    fn test_underflow() {
        let bc = program(vec![ins(Opcode::LoadConst, 0), ins(Opcode::Add, 0)]);
        let err = verify(&bc).unwrap_err();
        assert_eq!(err.offset, Some(1));
        assert!(err.message.contains("underflow"));
    }

    #[test]
    fn test_call_pops_name_and_arguments() {
        let ok = program(vec![
            ins(Opcode::LoadConst, 0),
            ins(Opcode::LoadConst, 0),
            ins(Opcode::Call, 1),
            ins(Opcode::Pop, 0),
            ins(Opcode::Halt, 0),
        ]);
        assert_eq!(verify(&ok), Ok(()));

        let short = program(vec![ins(Opcode::LoadConst, 0), ins(Opcode::Call, 1)]);
        assert!(verify(&short).is_err());
    }
}
