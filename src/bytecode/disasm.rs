use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::ir::{FunctionInfo, ProgramBc};
use crate::bytecode::op::{Instruction, Opcode};

const RULE: &str = "════════════════════════════════════════";

/// Render a human-readable listing of a bytecode program.
///
/// Main code comes first, then each function body under its own header.
/// Offsets are absolute; jump targets are marked with `►`.
pub fn disassemble(bc: &ProgramBc) -> String {
    let mut out = String::new();
    let jump_targets = collect_jump_targets(&bc.code);

    let _ = writeln!(out, "=== BYTECODE PROGRAM ===");
    let _ = writeln!(
        out,
        "{} instructions, {} constants, {} globals, {} functions\n",
        bc.code.len(),
        bc.constants.len(),
        bc.globals.len(),
        bc.functions.len()
    );

    let main_end = bc
        .functions
        .iter()
        .map(|f| f.entry as usize)
        .min()
        .unwrap_or(bc.code.len())
        .min(bc.code.len());
    write_header(&mut out, "main", main_end);
    for ip in 0..main_end {
        write_instruction(&mut out, bc, None, ip, &jump_targets);
    }

    let mut functions: Vec<&FunctionInfo> = bc.functions.iter().collect();
    functions.sort_by_key(|f| f.entry);
    for f in functions {
        let _ = writeln!(out);
        let title = format!("func {}({})", f.name, f.params.join(", "));
        write_header(&mut out, &title, f.len as usize);
        if !f.locals.is_empty() {
            let _ = writeln!(out, " locals: {}", f.locals.join(", "));
        }
        let end = (f.end() as usize).min(bc.code.len());
        for ip in f.entry as usize..end {
            write_instruction(&mut out, bc, Some(f), ip, &jump_targets);
        }
    }

    if !bc.constants.is_empty() {
        let _ = writeln!(out, "\nconstants:");
        for (i, constant) in bc.constants.iter().enumerate() {
            let _ = writeln!(out, "  {:>4}  {}", i, constant);
        }
    }

    out
}

fn write_header(out: &mut String, title: &str, count: usize) {
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, " {}", title);
    let _ = writeln!(out, " {} instructions", count);
    let _ = writeln!(out, "{}", RULE);
}

fn collect_jump_targets(code: &[Instruction]) -> BTreeSet<usize> {
    code.iter()
        .filter(|ins| ins.op().is_some_and(Opcode::is_jump))
        .map(|ins| ins.operand as usize)
        .collect()
}

fn write_instruction(
    out: &mut String,
    bc: &ProgramBc,
    function: Option<&FunctionInfo>,
    ip: usize,
    jump_targets: &BTreeSet<usize>,
) {
    let ins = bc.code[ip];
    let is_target = jump_targets.contains(&ip);
    if is_target {
        let _ = writeln!(out, "      ┌──────────────────────────────────");
    }
    let marker = if is_target { "► " } else { "  " };

    let Some(op) = ins.op() else {
        let _ = writeln!(out, "{:04} {}??? 0x{:02X} {}", ip, marker, ins.opcode, ins.operand);
        return;
    };

    let line = match op {
        Opcode::LoadConst => with_operand(op, ins.operand, annotate(bc.constants.get(ins.operand as usize))),
        Opcode::LoadGlobal | Opcode::StoreGlobal => {
            with_operand(op, ins.operand, annotate(bc.globals.get(ins.operand as usize)))
        }
        Opcode::LoadLocal | Opcode::StoreLocal => {
            let name = function.and_then(|f| {
                f.params
                    .iter()
                    .chain(f.locals.iter())
                    .nth(ins.operand as usize)
            });
            with_operand(op, ins.operand, annotate(name))
        }
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue | Opcode::ForIter => {
            let target = ins.operand as usize;
            let direction = if target <= ip { "↑" } else { "↓" };
            format!("{:<14}{} (→ {:04})", op.name(), direction, target)
        }
        Opcode::Call => with_operand(op, ins.operand, plural(ins.operand, "arg")),
        Opcode::BuildList => with_operand(op, ins.operand, plural(ins.operand, "item")),
        Opcode::BuildDict => with_operand(op, ins.operand, plural(ins.operand, "pair")),
        _ => op.name().to_string(),
    };
    let _ = writeln!(out, "{:04} {}{}", ip, marker, line);
}

fn with_operand(op: Opcode, operand: u32, note: String) -> String {
    format!("{:<14}{:<5} {}", op.name(), operand, note)
}

fn annotate<T: std::fmt::Display>(item: Option<T>) -> String {
    match item {
        Some(item) => format!("({})", item),
        None => "(<out of range>)".to_string(),
    }
}

fn plural(n: u32, noun: &str) -> String {
    format!("({} {}{})", n, noun, if n == 1 { "" } else { "s" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    #[test]
    fn test_listing_annotates_operands() {
        let bc = compile("var x = 42\nfunc add(a, b) { var s = a + b\n return s }\nprint(add(x, 1))")
            .unwrap();
        let text = disassemble(&bc);

        assert!(text.contains("LOAD_CONST    0     (42)"), "{}", text);
        assert!(text.contains("STORE_GLOBAL  0     (x)"), "{}", text);
        assert!(text.contains(" func add(a, b)"));
        assert!(text.contains(" locals: s"));
        assert!(text.contains("STORE_LOCAL   2     (s)"));
        assert!(text.contains("CALL          2     (2 args)"));
        assert!(text.contains("\"add\""));
    }

    #[test]
    fn test_jump_targets_are_marked() {
        let bc = compile("var i = 0\nwhile i < 3 { i = i + 1 }").unwrap();
        let text = disassemble(&bc);
        assert!(text.contains("►"));
        assert!(text.contains("JUMP          ↑"));
        assert!(text.contains("JUMP_IF_FALSE ↓"));
    }

    #[test]
    fn test_unknown_opcode_is_listed() {
        let bc = ProgramBc {
            code: vec![Instruction {
                opcode: 0xEE,
                operand: 3,
            }],
            ..ProgramBc::default()
        };
        assert!(disassemble(&bc).contains("??? 0xEE 3"));
    }
}
