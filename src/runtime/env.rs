use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use super::Value;

/// Where `print` writes to.
pub type Sink = Rc<RefCell<dyn Write>>;

/// A name → value namespace. The root `Env` is the global environment; the
/// tree-walker chains child scopes below it for function activations.
#[derive(Debug, Default)]
pub struct Env {
    parent: Option<Rc<Env>>,
    bindings: RefCell<HashMap<String, Value>>,
}

impl Env {
    pub fn new() -> Rc<Env> {
        Rc::new(Env::default())
    }

    /// Global environment with `print` and the arithmetic/comparison builtins.
    pub fn global(out: Sink) -> Rc<Env> {
        let env = Env::new();
        super::builtins::install(&env, out);
        env
    }

    /// Global environment printing to the process stdout.
    pub fn with_stdout() -> Rc<Env> {
        Env::global(Rc::new(RefCell::new(std::io::stdout())))
    }

    pub fn child(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            parent: Some(Rc::clone(parent)),
            bindings: RefCell::new(HashMap::new()),
        })
    }

    /// Resolve through the scope chain; unbound names are `undefined`.
    pub fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.lookup_local(name) {
            return value;
        }
        match &self.parent {
            Some(parent) => parent.lookup(name),
            None => Value::Undefined,
        }
    }

    pub fn lookup_local(&self, name: &str) -> Option<Value> {
        self.bindings.borrow().get(name).cloned()
    }

    pub fn register(&self, name: &str, value: Value) {
        self.bindings.borrow_mut().insert(name.to_string(), value);
    }

    /// Update the nearest binding of `name`; unbound names land in the root.
    pub fn assign(&self, name: &str, value: Value) {
        match &self.parent {
            Some(parent) if !self.bindings.borrow().contains_key(name) => parent.assign(name, value),
            _ => self.register(name, value),
        }
    }
}
