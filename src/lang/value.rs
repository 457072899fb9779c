use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<IndexMap<DictKey, Value>>>;

/// Runtime value manipulated by the VM.
///
/// Lists and dicts are shared references: assigning one to another variable
/// or passing it to a function aliases the same container, so mutation
/// through any alias is visible through all of them.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    List(ListRef),
    Dict(DictRef),
}

/// The subset of values usable as dict keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
}

impl DictKey {
    /// Returns `None` for values that cannot be hashed (floats, lists, dicts).
    pub fn from_value(value: &Value) -> Option<DictKey> {
        match value {
            Value::Int(n) => Some(DictKey::Int(*n)),
            Value::Str(s) => Some(DictKey::Str(s.clone())),
            Value::Bool(b) => Some(DictKey::Bool(*b)),
            Value::Null => Some(DictKey::Null),
            Value::Float(_) | Value::List(_) | Value::Dict(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Int(n) => Value::Int(*n),
            DictKey::Str(s) => Value::Str(s.clone()),
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::Null => Value::Null,
        }
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: IndexMap<DictKey, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }

    /// `null`, `false`, zero, and empty strings and containers are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
        }
    }

    /// Rendering used inside containers: strings are quoted.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out, &mut Vec::new(), true);
        out
    }

    fn write_into(&self, out: &mut String, seen: &mut Vec<usize>, quoted: bool) {
        match self {
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::Float(n) => out.push_str(&format_float(*n)),
            Value::Str(s) if quoted => {
                out.push('"');
                out.push_str(s);
                out.push('"');
            }
            Value::Str(s) => out.push_str(s),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Null => out.push_str("null"),
            Value::List(items) => {
                let addr = Rc::as_ptr(items) as *const () as usize;
                if seen.contains(&addr) {
                    out.push_str("[...]");
                    return;
                }
                seen.push(addr);
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_into(out, seen, true);
                }
                out.push(']');
                seen.pop();
            }
            Value::Dict(entries) => {
                let addr = Rc::as_ptr(entries) as *const () as usize;
                if seen.contains(&addr) {
                    out.push_str("{...}");
                    return;
                }
                seen.push(addr);
                out.push('{');
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.to_value().write_into(out, seen, true);
                    out.push_str(": ");
                    value.write_into(out, seen, true);
                }
                out.push('}');
                seen.pop();
            }
        }
    }
}

/// Integral floats keep a trailing `.0` so they stay distinguishable from ints.
pub fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Top-level rendering, as produced by `print` and `str`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_into(&mut out, &mut Vec::new(), false);
        f.write_str(&out)
    }
}

/// Equality never crosses type tags: `1 == 1.0` is false.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_guarded(other, &mut Vec::new())
    }
}

impl Value {
    /// Structural equality. A container pair already under comparison is
    /// taken as equal, so self-referencing containers terminate.
    fn eq_guarded(&self, other: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (
                    Rc::as_ptr(a) as *const () as usize,
                    Rc::as_ptr(b) as *const () as usize,
                );
                if seen.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                seen.push(pair);
                let equal = a.iter().zip(b.iter()).all(|(x, y)| x.eq_guarded(y, seen));
                seen.pop();
                equal
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (
                    Rc::as_ptr(a) as *const () as usize,
                    Rc::as_ptr(b) as *const () as usize,
                );
                if seen.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                seen.push(pair);
                let equal = a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| x.eq_guarded(y, seen)));
                seen.pop();
                equal
            }
            _ => false,
        }
    }
}
