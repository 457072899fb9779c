use std::collections::HashMap;

use crate::lang::value::Value;

/// Host functions reachable from AquaScript by name.
///
/// The VM consults the bridge only for call names that are neither a user
/// function nor a built-in.
pub trait Bridge {
    fn provides(&self, name: &str) -> bool;

    /// Calls `name` with positional arguments. An `Err` message aborts the run.
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, String>;
}

pub type HostFn = Box<dyn FnMut(&[Value]) -> Result<Value, String>>;

/// A [`Bridge`] backed by a table of closures.
#[derive(Default)]
pub struct FunctionTable {
    functions: HashMap<String, HostFn>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        f: impl FnMut(&[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Box::new(f));
        self
    }
}

impl Bridge for FunctionTable {
    fn provides(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, String> {
        match self.functions.get_mut(name) {
            Some(f) => f(args),
            None => Err(format!("no host function named '{}'", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_table() {
        let mut table = FunctionTable::new().register("double", |args: &[Value]| match args {
            [Value::Int(n)] => Ok(Value::Int(n * 2)),
            _ => Err("double expects one int".to_string()),
        });
        assert!(table.provides("double"));
        assert!(!table.provides("triple"));
        assert_eq!(table.call("double", &[Value::Int(4)]), Ok(Value::Int(8)));
        assert!(table.call("double", &[]).is_err());
        assert!(table.call("triple", &[]).is_err());
    }
}
