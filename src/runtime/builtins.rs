use std::io::Write;

use crate::lang::value::{DictKey, Value};
use crate::runtime::runtime_error::{
    ErrorKind, RuntimeError, argument_error, arithmetic_error, type_error,
};

pub type BuiltinFn = fn(&[Value], &mut dyn Write) -> Result<Value, RuntimeError>;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("print", print),
    ("str", to_str),
    ("int", to_int),
    ("float", to_float),
    ("len", len),
    ("range", range),
    ("type", type_of),
    ("append", append),
    ("keys", keys),
    ("abs", abs),
];

/// Resolves a built-in function by name.
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, f)| *f)
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<(), RuntimeError> {
    if args.len() != count {
        return Err(argument_error(format!(
            "{}() takes {} argument{} but {} {} given",
            name,
            count,
            if count == 1 { "" } else { "s" },
            args.len(),
            if args.len() == 1 { "was" } else { "were" }
        )));
    }
    Ok(())
}

/// `print(a, b, ...)`: space-separated, newline-terminated.
fn print(args: &[Value], out: &mut dyn Write) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(out, "{}", line)
        .map_err(|e| RuntimeError::new(ErrorKind::Io, format!("print failed: {}", e)))?;
    Ok(Value::Null)
}

fn to_str(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("str", args, 1)?;
    Ok(Value::Str(args[0].to_string()))
}

fn to_int(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("int", args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(n) => {
            let t = n.trunc();
            if !t.is_finite() || t < i64::MIN as f64 || t >= i64::MAX as f64 {
                return Err(arithmetic_error(format!("cannot convert {} to int", n)));
            }
            Ok(Value::Int(t as i64))
        }
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| type_error(format!("invalid literal for int(): \"{}\"", s))),
        other => Err(type_error(format!(
            "int() argument must be a number or string, not {}",
            other.type_name()
        ))),
    }
}

fn to_float(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("float", args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| type_error(format!("invalid literal for float(): \"{}\"", s))),
        other => Err(type_error(format!(
            "float() argument must be a number or string, not {}",
            other.type_name()
        ))),
    }
}

fn len(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("len", args, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Dict(entries) => entries.borrow().len(),
        other => {
            return Err(type_error(format!(
                "object of type {} has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(n as i64))
}

/// `range(stop)`, `range(start, stop)`, `range(start, stop, step)`.
fn range(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    let ints = args
        .iter()
        .map(|v| match v {
            Value::Int(n) => Ok(*n),
            other => Err(type_error(format!(
                "range() arguments must be int, not {}",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<i64>, _>>()?;

    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(argument_error(format!(
                "range() takes 1 to 3 arguments but {} were given",
                args.len()
            )));
        }
    };
    if step == 0 {
        return Err(argument_error("range() step must not be zero"));
    }

    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::list(items))
}

fn type_of(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("type", args, 1)?;
    Ok(Value::Str(args[0].type_name().to_string()))
}

/// Appends in place, so every alias of the list sees the new element.
fn append(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("append", args, 2)?;
    match &args[0] {
        Value::List(items) => {
            items.borrow_mut().push(args[1].clone());
            Ok(Value::Null)
        }
        other => Err(type_error(format!(
            "append() expects a list, not {}",
            other.type_name()
        ))),
    }
}

fn keys(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("keys", args, 1)?;
    match &args[0] {
        Value::Dict(entries) => Ok(Value::list(
            entries.borrow().keys().map(DictKey::to_value).collect(),
        )),
        other => Err(type_error(format!(
            "keys() expects a dict, not {}",
            other.type_name()
        ))),
    }
}

fn abs(args: &[Value], _: &mut dyn Write) -> Result<Value, RuntimeError> {
    expect_args("abs", args, 1)?;
    match &args[0] {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| arithmetic_error("integer overflow in abs()")),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(type_error(format!(
            "bad operand type for abs(): {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let f = lookup(name).unwrap();
        f(args, &mut Vec::<u8>::new())
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|n| Value::Int(*n)).collect())
    }

    #[test]
    fn test_print_joins_with_spaces() {
        let mut out: Vec<u8> = Vec::new();
        let f = lookup("print").unwrap();
        f(
            &[Value::Str("a".into()), Value::Int(1), Value::Float(2.0)],
            &mut out,
        )
        .unwrap();
        f(&[], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a 1 2.0\n\n");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("str", &[Value::Float(1.5)]).unwrap(), Value::Str("1.5".into()));
        assert_eq!(call("int", &[Value::Float(-2.9)]).unwrap(), Value::Int(-2));
        assert_eq!(call("int", &[Value::Str(" 42 ".into())]).unwrap(), Value::Int(42));
        assert_eq!(call("float", &[Value::Int(3)]).unwrap(), Value::Float(3.0));
        assert_eq!(call("int", &[Value::Bool(true)]).unwrap(), Value::Int(1));

        let e = call("int", &[Value::Str("x".into())]).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Type);
        let e = call("int", &[Value::Float(f64::NAN)]).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Arithmetic);
    }

    #[test]
    fn test_len() {
        assert_eq!(call("len", &[Value::Str("héllo".into())]).unwrap(), Value::Int(5));
        assert_eq!(call("len", &[ints(&[1, 2, 3])]).unwrap(), Value::Int(3));
        assert_eq!(call("len", &[Value::Int(3)]).unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn test_range_forms() {
        assert_eq!(call("range", &[Value::Int(3)]).unwrap(), ints(&[0, 1, 2]));
        assert_eq!(call("range", &[Value::Int(2), Value::Int(5)]).unwrap(), ints(&[2, 3, 4]));
        assert_eq!(
            call("range", &[Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(),
            ints(&[5, 3, 1])
        );
        assert_eq!(call("range", &[Value::Int(-1)]).unwrap(), ints(&[]));

        let e = call("range", &[Value::Int(0), Value::Int(3), Value::Int(0)]).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Argument);
        let e = call("range", &[]).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Argument);
    }

    #[test]
    fn test_append_mutates_shared_list() {
        let list = ints(&[1]);
        let alias = list.clone();
        call("append", &[list, Value::Int(2)]).unwrap();
        assert_eq!(alias, ints(&[1, 2]));
    }

    #[test]
    fn test_keys_and_type() {
        let mut entries = indexmap::IndexMap::new();
        entries.insert(DictKey::Str("b".into()), Value::Int(1));
        entries.insert(DictKey::Str("a".into()), Value::Int(2));
        let keys = call("keys", &[Value::dict(entries)]).unwrap();
        assert_eq!(
            keys,
            Value::list(vec![Value::Str("b".into()), Value::Str("a".into())])
        );
        assert_eq!(call("type", &[Value::Null]).unwrap(), Value::Str("null".into()));
    }

    #[test]
    fn test_arity_is_checked() {
        let e = call("len", &[]).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Argument);
        assert_eq!(e.message, "len() takes 1 argument but 0 were given");
    }

    #[test]
    fn test_abs() {
        assert_eq!(call("abs", &[Value::Int(-4)]).unwrap(), Value::Int(4));
        assert_eq!(call("abs", &[Value::Float(-0.5)]).unwrap(), Value::Float(0.5));
        assert_eq!(
            call("abs", &[Value::Int(i64::MIN)]).unwrap_err().kind,
            ErrorKind::Arithmetic
        );
    }
}
