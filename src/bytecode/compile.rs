use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    bytecode::{
        compile_error::CodegenError,
        ir::{Constant, FunctionInfo, ProgramBc},
        op::{Instruction, Opcode},
    },
    lang::{
        node::{BinaryOp, Block, Expr, FStringSegment, Literal, Stmt, UnaryOp},
        program::Program,
    },
};

/// Constant-pool dedup key. Floats compare by bit pattern so `0.0` and
/// `-0.0` stay distinct and `NaN` can be pooled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    Float(u64),
    Str(String),
    Bool(bool),
    Null,
}

impl ConstKey {
    fn of(constant: &Constant) -> Self {
        match constant {
            Constant::Int(n) => ConstKey::Int(*n),
            Constant::Float(n) => ConstKey::Float(n.to_bits()),
            Constant::Str(s) => ConstKey::Str(s.clone()),
            Constant::Bool(b) => ConstKey::Bool(*b),
            Constant::Null => ConstKey::Null,
        }
    }
}

/// A function body being compiled. Jump operands inside `code` are offsets
/// relative to the start of the body until the program is laid out.
struct FunctionScope {
    name: String,
    params: Vec<String>,
    locals: Vec<String>,
    code: Vec<Instruction>,
}

impl FunctionScope {
    fn slot(&self, name: &str) -> Option<usize> {
        self.params
            .iter()
            .chain(self.locals.iter())
            .position(|n| n == name)
    }

    fn declare(&mut self, name: &str) -> usize {
        match self.slot(name) {
            Some(slot) => slot,
            None => {
                self.locals.push(name.to_string());
                self.params.len() + self.locals.len() - 1
            }
        }
    }
}

/// Where an identifier lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Local(u32),
    Global(u32),
}

pub struct Compiler {
    constants: Vec<Constant>,
    constant_index: HashMap<ConstKey, u32>,

    /// Global name -> slot, in first-mention order.
    globals: IndexMap<String, u32>,

    /// Finished function bodies, in definition order.
    functions: Vec<FunctionScope>,

    main: Vec<Instruction>,

    /// Functions currently being compiled; the last one is innermost.
    scopes: Vec<FunctionScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            constants: Vec::new(),
            constant_index: HashMap::new(),
            globals: IndexMap::new(),
            functions: Vec::new(),
            main: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn compile_program(mut self, program: &Program) -> Result<ProgramBc, CodegenError> {
        for stmt in &program.body {
            self.compile_stmt(stmt)?;
        }
        let bc = self.layout()?;
        debug!(
            instructions = bc.code.len(),
            constants = bc.constants.len(),
            globals = bc.globals.len(),
            functions = bc.functions.len(),
            "code generation finished"
        );
        Ok(bc)
    }

    /// Concatenates main code, `HALT`, and every function body, relocating
    /// body-relative jump operands to absolute offsets.
    fn layout(self) -> Result<ProgramBc, CodegenError> {
        let mut code = self.main;
        code.push(Instruction::bare(Opcode::Halt));

        let mut functions = Vec::with_capacity(self.functions.len());
        for scope in self.functions {
            let entry = code.len();
            let base = operand(entry)?;
            for mut ins in scope.code.iter().copied() {
                if ins.op().is_some_and(Opcode::is_jump) {
                    ins.operand = ins
                        .operand
                        .checked_add(base)
                        .ok_or_else(|| CodegenError::internal("jump target overflows u32"))?;
                }
                code.push(ins);
            }
            functions.push(FunctionInfo {
                name: scope.name,
                params: scope.params,
                locals: scope.locals,
                entry: base,
                len: operand(scope.code.len())?,
            });
        }

        Ok(ProgramBc {
            constants: self.constants,
            globals: self.globals.into_keys().collect(),
            functions,
            code,
        })
    }

    // =========================================================================
    // Emission helpers
    // =========================================================================

    fn code(&mut self) -> &mut Vec<Instruction> {
        match self.scopes.last_mut() {
            Some(scope) => &mut scope.code,
            None => &mut self.main,
        }
    }

    /// Emits an instruction and returns its offset in the current buffer.
    fn emit(&mut self, op: Opcode, arg: u32) -> usize {
        let code = self.code();
        code.push(Instruction::new(op, arg));
        code.len() - 1
    }

    fn emit_bare(&mut self, op: Opcode) -> usize {
        self.emit(op, 0)
    }

    /// Offset of the next instruction in the current buffer.
    fn here(&mut self) -> Result<u32, CodegenError> {
        let len = self.code().len();
        operand(len)
    }

    /// Points the jump at `at` to the next instruction to be emitted.
    fn patch_to_here(&mut self, at: usize) -> Result<(), CodegenError> {
        let target = self.here()?;
        match self.code().get_mut(at) {
            Some(ins) => {
                ins.operand = target;
                Ok(())
            }
            None => Err(CodegenError::internal(format!(
                "jump patch offset {} out of range",
                at
            ))),
        }
    }

    fn constant(&mut self, constant: Constant) -> Result<u32, CodegenError> {
        let key = ConstKey::of(&constant);
        if let Some(&idx) = self.constant_index.get(&key) {
            return Ok(idx);
        }
        let idx = operand(self.constants.len())?;
        self.constants.push(constant);
        self.constant_index.insert(key, idx);
        Ok(idx)
    }

    fn emit_const(&mut self, constant: Constant) -> Result<(), CodegenError> {
        let idx = self.constant(constant)?;
        self.emit(Opcode::LoadConst, idx);
        Ok(())
    }

    fn global(&mut self, name: &str) -> Result<u32, CodegenError> {
        if let Some(&slot) = self.globals.get(name) {
            return Ok(slot);
        }
        let slot = operand(self.globals.len())?;
        self.globals.insert(name.to_string(), slot);
        Ok(slot)
    }

    /// Locals are visible only inside the innermost function and only after
    /// their declaration; everything else is a global.
    fn resolve(&mut self, name: &str) -> Result<Slot, CodegenError> {
        if let Some(slot) = self.scopes.last().and_then(|s| s.slot(name)) {
            return Ok(Slot::Local(operand(slot)?));
        }
        Ok(Slot::Global(self.global(name)?))
    }

    /// `var name` binds a new local inside a function and a global elsewhere.
    fn declare(&mut self, name: &str) -> Result<Slot, CodegenError> {
        match self.scopes.last_mut() {
            Some(scope) => {
                let slot = scope.declare(name);
                Ok(Slot::Local(operand(slot)?))
            }
            None => Ok(Slot::Global(self.global(name)?)),
        }
    }

    fn emit_store(&mut self, slot: Slot) {
        match slot {
            Slot::Local(i) => self.emit(Opcode::StoreLocal, i),
            Slot::Global(i) => self.emit(Opcode::StoreGlobal, i),
        };
    }

    fn emit_load(&mut self, slot: Slot) {
        match slot {
            Slot::Local(i) => self.emit(Opcode::LoadLocal, i),
            Slot::Global(i) => self.emit(Opcode::LoadGlobal, i),
        };
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_block(&mut self, block: &Block) -> Result<(), CodegenError> {
        for stmt in &block.stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::VarDecl { name, value } => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_const(Constant::Null)?,
                }
                let slot = self.declare(name)?;
                self.emit_store(slot);
            }

            Stmt::Assign { target, value } => match target {
                Expr::Identifier(name) => {
                    self.compile_expr(value)?;
                    let slot = self.resolve(name)?;
                    self.emit_store(slot);
                }
                Expr::Subscript { target, index } => {
                    self.compile_expr(target)?;
                    self.compile_expr(index)?;
                    self.compile_expr(value)?;
                    self.emit_bare(Opcode::SetItem);
                }
                other => {
                    return Err(CodegenError::unhandled_expr(
                        other,
                        "only variables and subscripts can be assigned to",
                    ));
                }
            },

            Stmt::FunctionDef { name, params, body } => {
                self.compile_function(name, params, body)?;
            }

            Stmt::If {
                condition,
                then_block,
                elifs,
                else_block,
            } => {
                let mut end_jumps = Vec::new();
                let branches =
                    std::iter::once((condition, then_block)).chain(elifs.iter().map(|(c, b)| (c, b)));
                for (cond, block) in branches {
                    self.compile_expr(cond)?;
                    let skip = self.emit_bare(Opcode::JumpIfFalse);
                    self.compile_block(block)?;
                    end_jumps.push(self.emit_bare(Opcode::Jump));
                    self.patch_to_here(skip)?;
                }
                if let Some(block) = else_block {
                    self.compile_block(block)?;
                }
                for jump in end_jumps {
                    self.patch_to_here(jump)?;
                }
            }

            Stmt::While { condition, body } => {
                let start = self.here()?;
                self.compile_expr(condition)?;
                let exit = self.emit_bare(Opcode::JumpIfFalse);
                self.compile_block(body)?;
                self.emit(Opcode::Jump, start);
                self.patch_to_here(exit)?;
            }

            Stmt::For {
                var,
                iterable,
                body,
            } => {
                self.compile_expr(iterable)?;
                self.emit_bare(Opcode::GetIter);
                let head = self.here()?;
                let exit = self.emit_bare(Opcode::ForIter);
                let slot = self.declare(var)?;
                self.emit_store(slot);
                self.compile_block(body)?;
                self.emit(Opcode::Jump, head);
                self.patch_to_here(exit)?;
            }

            Stmt::Return { value, span } => {
                if self.scopes.is_empty() {
                    return Err(CodegenError::ReturnOutsideFunction {
                        line: span.line,
                        col: span.col,
                    });
                }
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_const(Constant::Null)?,
                }
                self.emit_bare(Opcode::Return);
            }

            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit_bare(Opcode::Pop);
            }

            Stmt::Block(block) => self.compile_block(block)?,
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: &str,
        params: &[String],
        body: &Block,
    ) -> Result<(), CodegenError> {
        self.scopes.push(FunctionScope {
            name: name.to_string(),
            params: params.to_vec(),
            locals: Vec::new(),
            code: Vec::new(),
        });

        let compiled = self.compile_block(body).and_then(|()| {
            self.emit_const(Constant::Null)?;
            self.emit_bare(Opcode::Return);
            Ok(())
        });
        let scope = self
            .scopes
            .pop()
            .ok_or_else(|| CodegenError::internal("function scope stack underflow"))?;
        compiled?;

        match self.functions.iter().position(|f| f.name == name) {
            Some(existing) => {
                warn!(function = name, "function redefined; later definition wins");
                self.functions[existing] = scope;
            }
            None => self.functions.push(scope),
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CodegenError> {
        match expr {
            Expr::Literal(lit) => {
                let constant = match lit {
                    Literal::Int(n) => Constant::Int(*n),
                    Literal::Float(n) => Constant::Float(*n),
                    Literal::Str(s) => Constant::Str(s.clone()),
                    Literal::Bool(b) => Constant::Bool(*b),
                    Literal::Null => Constant::Null,
                };
                self.emit_const(constant)?;
            }

            Expr::Identifier(name) => {
                let slot = self.resolve(name)?;
                self.emit_load(slot);
            }

            Expr::BinaryOp { op, left, right } => match op {
                // left DUP JUMP_IF_x end POP right end:
                BinaryOp::And | BinaryOp::Or => {
                    self.compile_expr(left)?;
                    self.emit_bare(Opcode::Dup);
                    let jump = if *op == BinaryOp::And {
                        Opcode::JumpIfFalse
                    } else {
                        Opcode::JumpIfTrue
                    };
                    let end = self.emit_bare(jump);
                    self.emit_bare(Opcode::Pop);
                    self.compile_expr(right)?;
                    self.patch_to_here(end)?;
                }
                _ => {
                    self.compile_expr(left)?;
                    self.compile_expr(right)?;
                    self.emit_bare(binary_opcode(*op)?);
                }
            },

            Expr::UnaryOp { op, operand } => {
                self.compile_expr(operand)?;
                self.emit_bare(match op {
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::Neg => Opcode::Neg,
                });
            }

            Expr::ListLiteral(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(Opcode::BuildList, operand(items.len())?);
            }

            Expr::DictLiteral(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::BuildDict, operand(pairs.len())?);
            }

            Expr::Subscript { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit_bare(Opcode::GetItem);
            }

            Expr::FStringLiteral(segments) => {
                if segments.is_empty() {
                    self.emit_const(Constant::Str(String::new()))?;
                }
                for (i, segment) in segments.iter().enumerate() {
                    match segment {
                        FStringSegment::Text(text) => {
                            self.emit_const(Constant::Str(text.clone()))?;
                        }
                        FStringSegment::Expr(inner) => {
                            self.compile_expr(inner)?;
                            self.emit_bare(Opcode::FormatValue);
                        }
                    }
                    if i > 0 {
                        self.emit_bare(Opcode::Add);
                    }
                }
            }

            Expr::Call { callee, args } => {
                self.emit_const(Constant::Str(callee.clone()))?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Opcode::Call, operand(args.len())?);
            }
        }
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> Result<Opcode, CodegenError> {
    let opcode = match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::And | BinaryOp::Or => {
            return Err(CodegenError::internal(format!(
                "'{}' has no direct opcode",
                op.symbol()
            )));
        }
    };
    Ok(opcode)
}

fn operand(n: usize) -> Result<u32, CodegenError> {
    u32::try_from(n).map_err(|_| CodegenError::internal(format!("operand {} exceeds u32", n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{lexer::Lexer, parser::Parser};

    fn compile(source: &str) -> ProgramBc {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        Compiler::new().compile_program(&program).unwrap()
    }

    fn compile_err(source: &str) -> CodegenError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        Compiler::new().compile_program(&program).unwrap_err()
    }

    fn ops(code: &[Instruction]) -> Vec<Opcode> {
        code.iter().map(|i| i.op().unwrap()).collect()
    }

    fn body<'a>(bc: &'a ProgramBc, name: &str) -> &'a [Instruction] {
        let f = bc.function(name).unwrap();
        &bc.code[f.entry as usize..(f.entry + f.len) as usize]
    }

    #[test]
    fn test_empty_program_is_just_halt() {
        let bc = compile("");
        assert_eq!(ops(&bc.code), vec![Opcode::Halt]);
        assert!(bc.constants.is_empty());
    }

    #[test]
    fn test_constants_are_deduplicated_by_value_and_type() {
        let bc = compile("var a = 1 var b = 1 var c = 1.0 var d = true var e = \"1\"");
        assert_eq!(
            bc.constants,
            vec![
                Constant::Int(1),
                Constant::Float(1.0),
                Constant::Bool(true),
                Constant::Str("1".to_string()),
            ]
        );
        assert_eq!(bc.globals, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_var_without_value_stores_null() {
        let bc = compile("var x");
        assert_eq!(bc.constants, vec![Constant::Null]);
        assert_eq!(
            ops(&bc.code),
            vec![Opcode::LoadConst, Opcode::StoreGlobal, Opcode::Halt]
        );
    }

    #[test]
    fn test_forward_global_reference_resolves_by_name() {
        let bc = compile("func f() { return g }\nvar g = 1");
        assert_eq!(bc.globals, vec!["g"]);
        let f = body(&bc, "f");
        assert_eq!(f[0], Instruction::new(Opcode::LoadGlobal, 0));
        assert_eq!(bc.code[1], Instruction::new(Opcode::StoreGlobal, 0));
    }

    #[test]
    fn test_params_and_locals_use_local_slots() {
        let bc = compile("func f(a) { var b = a\n c = b }");
        let info = bc.function("f").unwrap();
        assert_eq!(info.params, vec!["a"]);
        assert_eq!(info.locals, vec!["b"]);
        assert_eq!(info.frame_size(), 2);
        assert_eq!(
            body(&bc, "f").to_vec(),
            vec![
                Instruction::new(Opcode::LoadLocal, 0),
                Instruction::new(Opcode::StoreLocal, 1),
                Instruction::new(Opcode::LoadLocal, 1),
                Instruction::new(Opcode::StoreGlobal, 0),
                Instruction::new(Opcode::LoadConst, 0),
                Instruction::bare(Opcode::Return),
            ]
        );
        assert_eq!(bc.globals, vec!["c"]);
    }

    #[test]
    fn test_local_used_before_declaration_is_global() {
        let bc = compile("func f() { x = 1\n var x = 2 }");
        let f = body(&bc, "f");
        assert_eq!(f[1].op(), Some(Opcode::StoreGlobal));
        assert_eq!(f[3].op(), Some(Opcode::StoreLocal));
    }

    #[test]
    fn test_functions_follow_halt_with_relocated_jumps() {
        let bc = compile("var n = 3\nfunc down(x) { while x > 0 { x = x - 1 } }\ndown(n)");
        let halt = bc
            .code
            .iter()
            .position(|i| i.op() == Some(Opcode::Halt))
            .unwrap();
        let info = bc.function("down").unwrap();
        assert_eq!(info.entry as usize, halt + 1);
        assert_eq!(info.end() as usize, bc.code.len());

        for ins in body(&bc, "down") {
            if ins.op().unwrap().is_jump() {
                assert!(info.contains(ins.operand as usize) || ins.operand as u64 == info.end());
            }
        }
    }

    #[test]
    fn test_for_loop_uses_iterator_opcodes() {
        let bc = compile("for x in [1, 2] { print(x) }");
        let code = ops(&bc.code);
        let get_iter = code.iter().position(|op| *op == Opcode::GetIter).unwrap();
        assert_eq!(code[get_iter + 1], Opcode::ForIter);
        assert_eq!(code[get_iter + 2], Opcode::StoreGlobal);

        // FOR_ITER exits just past the back-jump, which targets FOR_ITER itself.
        let for_iter = &bc.code[get_iter + 1];
        let back_jump = &bc.code[for_iter.operand as usize - 1];
        assert_eq!(back_jump.op(), Some(Opcode::Jump));
        assert_eq!(back_jump.operand as usize, get_iter + 1);
    }

    #[test]
    fn test_for_variable_is_local_inside_function() {
        let bc = compile("func f(xs) { for x in xs { print(x) } }");
        assert_eq!(bc.function("f").unwrap().locals, vec!["x"]);
    }

    #[test]
    fn test_and_short_circuit_shape() {
        let bc = compile("var r = a and b");
        assert_eq!(
            bc.code[..6].to_vec(),
            vec![
                Instruction::new(Opcode::LoadGlobal, 0),
                Instruction::bare(Opcode::Dup),
                Instruction::new(Opcode::JumpIfFalse, 5),
                Instruction::bare(Opcode::Pop),
                Instruction::new(Opcode::LoadGlobal, 1),
                Instruction::new(Opcode::StoreGlobal, 2),
            ]
        );
    }

    #[test]
    fn test_or_uses_jump_if_true() {
        let bc = compile("a or b");
        assert_eq!(bc.code[2].op(), Some(Opcode::JumpIfTrue));
    }

    #[test]
    fn test_if_elif_else_chain() {
        let bc = compile("if a { x = 1 } elif b { x = 2 } else { x = 3 }");
        let code = &bc.code;
        let end = code.len() - 1; // HALT
        let jumps: Vec<&Instruction> = code
            .iter()
            .filter(|i| i.op() == Some(Opcode::Jump))
            .collect();
        assert_eq!(jumps.len(), 2);
        assert!(jumps.iter().all(|j| j.operand as usize == end));

        let conds: Vec<&Instruction> = code
            .iter()
            .filter(|i| i.op() == Some(Opcode::JumpIfFalse))
            .collect();
        assert_eq!(conds.len(), 2);
        // A failed condition lands on the next test or the else block.
        assert_eq!(code[conds[0].operand as usize].op(), Some(Opcode::LoadGlobal));
        assert_eq!(code[conds[1].operand as usize].op(), Some(Opcode::LoadConst));
    }

    #[test]
    fn test_fstring_segments_join_with_add() {
        let bc = compile("f\"a{x}b\"");
        assert_eq!(
            ops(&bc.code),
            vec![
                Opcode::LoadConst,
                Opcode::LoadGlobal,
                Opcode::FormatValue,
                Opcode::Add,
                Opcode::LoadConst,
                Opcode::Add,
                Opcode::Pop,
                Opcode::Halt,
            ]
        );
    }

    #[test]
    fn test_call_pushes_name_then_args() {
        let bc = compile("print(1, 2)");
        assert_eq!(bc.constants[0], Constant::Str("print".to_string()));
        assert_eq!(bc.code[3], Instruction::new(Opcode::Call, 2));
    }

    #[test]
    fn test_containers() {
        let bc = compile("var d = {\"k\": [1, 2]}\nd[\"k\"][0] = 5");
        let code = ops(&bc.code);
        assert!(code.contains(&Opcode::BuildList));
        assert!(code.contains(&Opcode::BuildDict));
        assert!(code.contains(&Opcode::GetItem));
        assert!(code.contains(&Opcode::SetItem));
        let build_dict = bc
            .code
            .iter()
            .find(|i| i.op() == Some(Opcode::BuildDict))
            .unwrap();
        assert_eq!(build_dict.operand, 1);
    }

    #[test]
    fn test_return_outside_function() {
        let e = compile_err("var x = 1\nreturn x");
        assert_eq!(e, CodegenError::ReturnOutsideFunction { line: 2, col: 1 });
    }

    #[test]
    fn test_redefinition_replaces_function() {
        let bc = compile("func f() { return 1 }\nfunc f() { return 2 }");
        assert_eq!(bc.functions.len(), 1);
        let f = body(&bc, "f");
        assert_eq!(bc.constants[f[0].operand as usize], Constant::Int(2));
    }

    #[test]
    fn test_invalid_assignment_target_is_unhandled() {
        let program = Program {
            body: vec![Stmt::Assign {
                target: Expr::Literal(Literal::Int(1)),
                value: Expr::Literal(Literal::Int(2)),
            }],
        };
        let e = Compiler::new().compile_program(&program).unwrap_err();
        assert!(matches!(e, CodegenError::UnhandledNode { ref node, .. } if node == "literal"));
    }
}
