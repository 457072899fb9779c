use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::Write;

use tracing::{debug, instrument, trace};

use crate::bytecode::ir::ProgramBc;
use crate::bytecode::op::{Instruction, Opcode};
use crate::bytecode::verify::verify;
use crate::lang::value::{DictKey, ListRef, Value};
use crate::runtime::bridge::Bridge;
use crate::runtime::builtins;
use crate::runtime::runtime_error::{
    ErrorKind, RuntimeError, argument_error, arithmetic_error, division_by_zero, index_error,
    invalid_bytecode, name_error, type_error,
};

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_call_depth: usize,
    pub max_stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_stack_size: 10_000,
        }
    }
}

/// Counters collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmStats {
    pub instructions_executed: u64,
    pub function_calls: u64,
    pub peak_stack: usize,
    pub peak_call_depth: usize,
}

/// Cursor created by `GET_ITER`.
///
/// A list iterator reads the live list but stops at the length the list had
/// when the loop started. Dict keys and string characters are snapshotted.
enum ValueIter {
    List {
        items: ListRef,
        cursor: usize,
        len: usize,
    },
    Snapshot {
        items: Vec<Value>,
        cursor: usize,
    },
}

impl ValueIter {
    fn new(iterable: Value) -> Result<Self, RuntimeError> {
        match iterable {
            Value::List(items) => {
                let len = items.borrow().len();
                Ok(ValueIter::List {
                    items,
                    cursor: 0,
                    len,
                })
            }
            Value::Dict(entries) => Ok(ValueIter::Snapshot {
                items: entries.borrow().keys().map(DictKey::to_value).collect(),
                cursor: 0,
            }),
            Value::Str(s) => Ok(ValueIter::Snapshot {
                items: s.chars().map(|c| Value::Str(c.to_string())).collect(),
                cursor: 0,
            }),
            other => Err(type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::List { items, cursor, len } => {
                if *cursor >= *len {
                    return None;
                }
                let item = items.borrow().get(*cursor).cloned();
                *cursor += 1;
                item
            }
            ValueIter::Snapshot { items, cursor } => {
                let item = items.get(*cursor).cloned();
                *cursor += 1;
                item
            }
        }
    }
}

/// Activation record. The base frame runs main code and has no function.
struct Frame {
    function: Option<usize>,
    return_pc: usize,
    locals: Vec<Value>,
    /// Operand-stack height when the frame was entered; the frame may not
    /// pop below it.
    watermark: usize,
    iterators: Vec<ValueIter>,
}

impl Frame {
    fn base() -> Self {
        Frame {
            function: None,
            return_pc: 0,
            locals: Vec::new(),
            watermark: 0,
            iterators: Vec::new(),
        }
    }
}

/// What the dispatch loop does after an instruction.
enum Flow {
    Next,
    Jump(usize),
    Halt,
}

/// Stack-based bytecode interpreter.
///
/// All run state lives in the instance; independent instances share nothing.
pub struct Vm {
    config: VmConfig,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Vec<Option<Value>>,
    global_names: Vec<String>,
    stats: VmStats,
    bridge: Option<Box<dyn Bridge>>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            config,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Vec::new(),
            global_names: Vec::new(),
            stats: VmStats::default(),
            bridge: None,
        }
    }

    /// Routes calls to unknown names through `bridge`.
    pub fn with_bridge(mut self, bridge: impl Bridge + 'static) -> Self {
        self.bridge = Some(Box::new(bridge));
        self
    }

    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    /// Value of a global after (or during a failed) run; `None` if unset.
    pub fn global(&self, name: &str) -> Option<&Value> {
        let slot = self.global_names.iter().position(|g| g == name)?;
        self.globals.get(slot)?.as_ref()
    }

    fn reset_execution_state(&mut self, bc: &ProgramBc) {
        self.stack.clear();
        self.frames.clear();
        self.frames.push(Frame::base());
        self.globals = vec![None; bc.globals.len()];
        self.global_names = bc.globals.clone();
        self.stats = VmStats::default();
    }

    /// Verifies and executes `bc`, writing program output to `out`.
    #[instrument(skip_all, fields(instructions = bc.code.len()))]
    pub fn run(&mut self, bc: &ProgramBc, out: &mut dyn Write) -> Result<(), RuntimeError> {
        verify(bc).map_err(|e| {
            let mut err = invalid_bytecode(e.message);
            err.offset = e.offset;
            err
        })?;
        self.reset_execution_state(bc);

        let functions: HashMap<&str, usize> = bc
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), i))
            .collect();

        let mut pc = 0;
        loop {
            let ins = match bc.code.get(pc) {
                Some(ins) => *ins,
                None => {
                    return Err(invalid_bytecode(format!(
                        "execution ran past the end of the code at offset {}",
                        pc
                    ))
                    .at(pc, || self.call_stack_names(bc)));
                }
            };

            self.stats.instructions_executed += 1;
            let flow = self
                .step(bc, &functions, pc, ins, out)
                .and_then(|flow| self.check_limits().map(|()| flow))
                .map_err(|e| e.at(pc, || self.call_stack_names(bc)))?;

            match flow {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Halt => break,
            }
        }

        debug!(
            instructions = self.stats.instructions_executed,
            calls = self.stats.function_calls,
            peak_stack = self.stats.peak_stack,
            "execution finished"
        );
        Ok(())
    }

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.stats.peak_stack = self.stats.peak_stack.max(self.stack.len());
        if self.stack.len() > self.config.max_stack_size {
            return Err(RuntimeError::new(
                ErrorKind::StackOverflow,
                format!(
                    "operand stack limit exceeded ({})",
                    self.config.max_stack_size
                ),
            ));
        }
        Ok(())
    }

    fn call_stack_names(&self, bc: &ProgramBc) -> Vec<String> {
        self.frames
            .iter()
            .filter_map(|f| f.function)
            .filter_map(|i| bc.functions.get(i))
            .map(|f| f.name.clone())
            .collect()
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    fn frame(&mut self) -> Result<&mut Frame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| invalid_bytecode("no active frame"))
    }

    fn watermark(&self) -> usize {
        self.frames.last().map_or(0, |f| f.watermark)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.stack.len() <= self.watermark() {
            return Err(invalid_bytecode("operand stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| invalid_bytecode("operand stack underflow"))
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let available = self.stack.len().saturating_sub(self.watermark());
        if available < n {
            return Err(invalid_bytecode(format!(
                "operand stack underflow: needed {}, have {}",
                n, available
            )));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn peek(&self) -> Result<&Value, RuntimeError> {
        if self.stack.len() <= self.watermark() {
            return Err(invalid_bytecode("operand stack underflow"));
        }
        self.stack
            .last()
            .ok_or_else(|| invalid_bytecode("operand stack underflow"))
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn step(
        &mut self,
        bc: &ProgramBc,
        functions: &HashMap<&str, usize>,
        pc: usize,
        ins: Instruction,
        out: &mut dyn Write,
    ) -> Result<Flow, RuntimeError> {
        let op = ins
            .op()
            .ok_or_else(|| invalid_bytecode(format!("unknown opcode 0x{:02X}", ins.opcode)))?;
        let arg = ins.operand as usize;
        trace!(pc, op = op.name(), operand = ins.operand, stack = self.stack.len());

        match op {
            // Load / store
            Opcode::LoadConst => {
                let constant = bc
                    .constants
                    .get(arg)
                    .ok_or_else(|| invalid_bytecode(format!("constant index {} out of range", arg)))?;
                self.push(Value::from(constant));
            }
            Opcode::LoadGlobal => {
                let value = match self.globals.get(arg) {
                    Some(Some(value)) => value.clone(),
                    Some(None) => {
                        let name = bc.globals.get(arg).map_or("?", String::as_str);
                        return Err(name_error(name));
                    }
                    None => return Err(invalid_bytecode(format!("global slot {} out of range", arg))),
                };
                self.push(value);
            }
            Opcode::StoreGlobal => {
                let value = self.pop()?;
                match self.globals.get_mut(arg) {
                    Some(slot) => *slot = Some(value),
                    None => return Err(invalid_bytecode(format!("global slot {} out of range", arg))),
                }
            }
            Opcode::LoadLocal => {
                let value = self
                    .frame()?
                    .locals
                    .get(arg)
                    .cloned()
                    .ok_or_else(|| invalid_bytecode(format!("local slot {} out of range", arg)))?;
                self.push(value);
            }
            Opcode::StoreLocal => {
                let value = self.pop()?;
                match self.frame()?.locals.get_mut(arg) {
                    Some(slot) => *slot = value,
                    None => return Err(invalid_bytecode(format!("local slot {} out of range", arg))),
                }
            }

            // Stack operations
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = self.peek()?.clone();
                self.push(top);
            }

            // Arithmetic
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(arithmetic(op, &a, &b)?);
            }
            Opcode::Neg => {
                let value = match self.pop()? {
                    Value::Int(n) => Value::Int(
                        n.checked_neg()
                            .ok_or_else(|| arithmetic_error("integer overflow"))?,
                    ),
                    Value::Float(n) => Value::Float(-n),
                    other => {
                        return Err(type_error(format!(
                            "bad operand type for unary -: '{}'",
                            other.type_name()
                        )));
                    }
                };
                self.push(value);
            }

            // Comparison
            Opcode::Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b));
            }
            Opcode::Ne => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a != b));
            }
            Opcode::Lt | Opcode::Gt | Opcode::Le | Opcode::Ge => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(compare(op, &a, &b)?));
            }

            // Logic
            Opcode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(!value.is_truthy()));
            }

            // Jumps
            Opcode::Jump => return Ok(Flow::Jump(arg)),
            Opcode::JumpIfFalse => {
                if !self.pop()?.is_truthy() {
                    return Ok(Flow::Jump(arg));
                }
            }
            Opcode::JumpIfTrue => {
                if self.pop()?.is_truthy() {
                    return Ok(Flow::Jump(arg));
                }
            }

            // Calls
            Opcode::Call => return self.call(bc, functions, pc, arg, out),
            Opcode::Return => {
                let value = self.pop()?;
                let frame = self
                    .frames
                    .pop()
                    .ok_or_else(|| invalid_bytecode("return with no active frame"))?;
                if frame.function.is_none() {
                    return Ok(Flow::Halt);
                }
                self.stack.truncate(frame.watermark);
                self.push(value);
                return Ok(Flow::Jump(frame.return_pc));
            }

            // Containers
            Opcode::GetItem => {
                let index = self.pop()?;
                let container = self.pop()?;
                self.push(get_item(&container, &index)?);
            }
            Opcode::SetItem => {
                let value = self.pop()?;
                let index = self.pop()?;
                let container = self.pop()?;
                set_item(&container, index, value)?;
            }
            Opcode::BuildList => {
                let items = self.pop_n(arg)?;
                self.push(Value::list(items));
            }
            Opcode::BuildDict => {
                let flat = self.pop_n(arg.saturating_mul(2))?;
                let mut entries = indexmap::IndexMap::with_capacity(arg);
                let mut flat = flat.into_iter();
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    entries.insert(hash_key(&key)?, value);
                }
                self.push(Value::dict(entries));
            }
            Opcode::FormatValue => {
                let value = self.pop()?;
                self.push(Value::Str(value.to_string()));
            }

            // Iteration
            Opcode::GetIter => {
                let iterable = self.pop()?;
                let iter = ValueIter::new(iterable)?;
                self.frame()?.iterators.push(iter);
            }
            Opcode::ForIter => {
                let next = match self.frame()?.iterators.last_mut() {
                    Some(iter) => iter.next(),
                    None => return Err(invalid_bytecode("FOR_ITER without an active iterator")),
                };
                match next {
                    Some(value) => self.push(value),
                    None => {
                        self.frame()?.iterators.pop();
                        return Ok(Flow::Jump(arg));
                    }
                }
            }

            Opcode::Halt => return Ok(Flow::Halt),
        }

        Ok(Flow::Next)
    }

    /// `CALL argc`: user functions first, then built-ins, then the bridge.
    fn call(
        &mut self,
        bc: &ProgramBc,
        functions: &HashMap<&str, usize>,
        pc: usize,
        argc: usize,
        out: &mut dyn Write,
    ) -> Result<Flow, RuntimeError> {
        let args = self.pop_n(argc)?;
        let name = match self.pop()? {
            Value::Str(name) => name,
            other => {
                return Err(type_error(format!(
                    "'{}' object is not callable",
                    other.type_name()
                )));
            }
        };

        if let Some(&index) = functions.get(name.as_str()) {
            let f = bc
                .functions
                .get(index)
                .ok_or_else(|| invalid_bytecode(format!("function index {} out of range", index)))?;
            if args.len() != f.arity() {
                return Err(argument_error(format!(
                    "{}() takes {} argument{} but {} {} given",
                    f.name,
                    f.arity(),
                    if f.arity() == 1 { "" } else { "s" },
                    args.len(),
                    if args.len() == 1 { "was" } else { "were" }
                )));
            }

            let depth = self.frames.len();
            if depth > self.config.max_call_depth {
                return Err(RuntimeError::new(
                    ErrorKind::StackOverflow,
                    format!(
                        "maximum call depth ({}) exceeded in '{}'",
                        self.config.max_call_depth, f.name
                    ),
                ));
            }

            let mut locals = args;
            locals.resize(f.frame_size(), Value::Null);
            self.frames.push(Frame {
                function: Some(index),
                return_pc: pc + 1,
                locals,
                watermark: self.stack.len(),
                iterators: Vec::new(),
            });
            self.stats.function_calls += 1;
            self.stats.peak_call_depth = self.stats.peak_call_depth.max(depth);
            return Ok(Flow::Jump(f.entry as usize));
        }

        if let Some(builtin) = builtins::lookup(&name) {
            let result = builtin(&args, out)?;
            self.push(result);
            return Ok(Flow::Next);
        }

        if let Some(bridge) = self.bridge.as_mut() {
            if bridge.provides(&name) {
                let result = bridge.call(&name, &args).map_err(|message| {
                    RuntimeError::new(ErrorKind::External, format!("{}(): {}", name, message))
                })?;
                self.push(result);
                return Ok(Flow::Next);
            }
        }

        Err(name_error(&name))
    }
}

// =============================================================================
// Operators
// =============================================================================

fn symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Mod => "%",
        Opcode::Lt => "<",
        Opcode::Gt => ">",
        Opcode::Le => "<=",
        Opcode::Ge => ">=",
        other => other.name(),
    }
}

/// Int-int stays int; a float operand promotes; only str+str concatenates.
fn arithmetic(op: Opcode, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_arithmetic(op, *x, *y).map(Value::Int),
        (Value::Int(x), Value::Float(y)) => float_arithmetic(op, *x as f64, *y),
        (Value::Float(x), Value::Int(y)) => float_arithmetic(op, *x, *y as f64),
        (Value::Float(x), Value::Float(y)) => float_arithmetic(op, *x, *y),
        (Value::Str(x), Value::Str(y)) if op == Opcode::Add => {
            Ok(Value::Str(format!("{}{}", x, y)))
        }
        _ => Err(type_error(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            symbol(op),
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// `/` truncates toward zero and `%` takes the sign of the dividend.
fn int_arithmetic(op: Opcode, x: i64, y: i64) -> Result<i64, RuntimeError> {
    let result = match op {
        Opcode::Add => x.checked_add(y),
        Opcode::Sub => x.checked_sub(y),
        Opcode::Mul => x.checked_mul(y),
        Opcode::Div => {
            if y == 0 {
                return Err(division_by_zero());
            }
            x.checked_div(y)
        }
        Opcode::Mod => {
            if y == 0 {
                return Err(arithmetic_error("modulo by zero"));
            }
            x.checked_rem(y)
        }
        other => {
            return Err(invalid_bytecode(format!(
                "{} is not an arithmetic opcode",
                other.name()
            )));
        }
    };
    result.ok_or_else(|| arithmetic_error(format!("integer overflow in {}", symbol(op))))
}

fn float_arithmetic(op: Opcode, x: f64, y: f64) -> Result<Value, RuntimeError> {
    let result = match op {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x * y,
        Opcode::Div => {
            if y == 0.0 {
                return Err(division_by_zero());
            }
            x / y
        }
        Opcode::Mod => {
            if y == 0.0 {
                return Err(arithmetic_error("modulo by zero"));
            }
            x % y
        }
        other => {
            return Err(invalid_bytecode(format!(
                "{} is not an arithmetic opcode",
                other.name()
            )));
        }
    };
    Ok(Value::Float(result))
}

/// Ordering is defined between numbers and between strings.
fn compare(op: Opcode, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => compare_int_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => compare_int_float(*y, *x).map(Ordering::reverse),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => {
            return Err(type_error(format!(
                "'{}' not supported between '{}' and '{}'",
                symbol(op),
                a.type_name(),
                b.type_name()
            )));
        }
    };
    Ok(match op {
        Opcode::Lt => ordering == Some(Ordering::Less),
        Opcode::Gt => ordering == Some(Ordering::Greater),
        Opcode::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Opcode::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        other => {
            return Err(invalid_bytecode(format!(
                "{} is not a comparison opcode",
                other.name()
            )));
        }
    })
}

/// Orders an int against a float without rounding the int through `f64`.
fn compare_int_float(i: i64, f: f64) -> Option<Ordering> {
    // i64 covers [-2^63, 2^63)
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return None;
    }
    if f >= LIMIT {
        return Some(Ordering::Less);
    }
    if f < -LIMIT {
        return Some(Ordering::Greater);
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(f - whole)),
        unequal => Some(unequal),
    }
}

fn hash_key(key: &Value) -> Result<DictKey, RuntimeError> {
    DictKey::from_value(key)
        .ok_or_else(|| type_error(format!("unhashable type: '{}'", key.type_name())))
}

/// Resolves a possibly negative index against `len`.
fn sequence_index(index: &Value, len: usize) -> Result<usize, RuntimeError> {
    let i = match index {
        Value::Int(i) => *i,
        other => {
            return Err(type_error(format!(
                "indices must be int, not {}",
                other.type_name()
            )));
        }
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(index_error(i, len));
    }
    Ok(resolved as usize)
}

fn get_item(container: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = sequence_index(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Dict(entries) => {
            let key = hash_key(index)?;
            entries.borrow().get(&key).cloned().ok_or_else(|| {
                RuntimeError::new(ErrorKind::Key, format!("key {} not found", index.repr()))
            })
        }
        Value::Str(s) => {
            let len = s.chars().count();
            let i = sequence_index(index, len)?;
            Ok(s.chars()
                .nth(i)
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Null))
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Lists are updated in place; dicts insert missing keys.
fn set_item(container: &Value, index: Value, value: Value) -> Result<(), RuntimeError> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = sequence_index(&index, items.len())?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            let key = hash_key(&index)?;
            entries.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::{Constant, FunctionInfo};

    // ============================================================
    // Test Helpers
    // ============================================================

    fn program(constants: Vec<Constant>, code: Vec<Instruction>) -> ProgramBc {
        ProgramBc {
            constants,
            globals: vec!["r".to_string()],
            functions: Vec::new(),
            code,
        }
    }

    fn ins(op: Opcode, operand: u32) -> Instruction {
        Instruction::new(op, operand)
    }

    /// Runs a hand-built program and returns the value stored in `r`.
    fn run_program(bc: &ProgramBc) -> Result<Value, RuntimeError> {
        let mut vm = Vm::new();
        vm.run(bc, &mut std::io::sink())?;
        Ok(vm.global("r").cloned().unwrap_or(Value::Null))
    }

    #[test]
    fn test_jump_if_true_consumes_condition() {
        let bc = program(
            vec![Constant::Bool(true), Constant::Int(1), Constant::Int(2)],
            vec![
                ins(Opcode::LoadConst, 0),
                ins(Opcode::JumpIfTrue, 4),
                ins(Opcode::LoadConst, 1),
                ins(Opcode::Jump, 5),
                ins(Opcode::LoadConst, 2),
                ins(Opcode::StoreGlobal, 0),
                ins(Opcode::Halt, 0),
            ],
        );
        assert_eq!(run_program(&bc).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_dup_copies_top() {
        let bc = program(
            vec![Constant::Int(21)],
            vec![
                ins(Opcode::LoadConst, 0),
                ins(Opcode::Dup, 0),
                ins(Opcode::Add, 0),
                ins(Opcode::StoreGlobal, 0),
                ins(Opcode::Halt, 0),
            ],
        );
        assert_eq!(run_program(&bc).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let bc = program(
            vec![],
            vec![Instruction {
                opcode: 0x99,
                operand: 0,
            }],
        );
        let e = run_program(&bc).unwrap_err();
        assert_eq!(e.kind, ErrorKind::InvalidBytecode);
        assert!(e.kind.is_fatal());
        assert_eq!(e.offset, Some(0));
    }

    #[test]
    fn test_out_of_range_constant_is_fatal() {
        let bc = program(vec![], vec![ins(Opcode::LoadConst, 3), ins(Opcode::Halt, 0)]);
        assert_eq!(run_program(&bc).unwrap_err().kind, ErrorKind::InvalidBytecode);
    }

    #[test]
    fn test_running_off_the_end_is_fatal() {
        let bc = program(vec![Constant::Int(1)], vec![ins(Opcode::LoadConst, 0)]);
        let e = run_program(&bc).unwrap_err();
        assert_eq!(e.kind, ErrorKind::InvalidBytecode);
        assert_eq!(e.offset, Some(1));
    }

    #[test]
    fn test_call_binds_arguments_to_locals() {
        // main: r = sub(10, 3)   sub(a, b): return a - b
        let mut bc = program(
            vec![
                Constant::Str("sub".to_string()),
                Constant::Int(10),
                Constant::Int(3),
            ],
            vec![
                ins(Opcode::LoadConst, 0),
                ins(Opcode::LoadConst, 1),
                ins(Opcode::LoadConst, 2),
                ins(Opcode::Call, 2),
                ins(Opcode::StoreGlobal, 0),
                ins(Opcode::Halt, 0),
                ins(Opcode::LoadLocal, 0),
                ins(Opcode::LoadLocal, 1),
                ins(Opcode::Sub, 0),
                ins(Opcode::Return, 0),
            ],
        );
        bc.functions.push(FunctionInfo {
            name: "sub".to_string(),
            params: vec!["a".to_string(), "b".to_string()],
            locals: Vec::new(),
            entry: 6,
            len: 4,
        });
        assert_eq!(run_program(&bc).unwrap(), Value::Int(7));
    }
}
