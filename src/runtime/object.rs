use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{Failure, Value};
use crate::vm::Code;

pub type NativeFn = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, Failure>>;

#[derive(Clone)]
pub enum Callable {
    /// Host closure, called on decoded values.
    Native(NativeFn),
    /// Instruction stream run by the stack engine.
    Compiled(Rc<Code>),
}

/// A named host object: a plain field bag, or a function.
pub struct JsObject {
    name: String,
    callable: Option<Callable>,
    fields: RefCell<Vec<(String, Value)>>,
}

impl JsObject {
    pub fn new_object(fields: Vec<(String, Value)>) -> Rc<Self> {
        Rc::new(JsObject {
            name: "object".to_string(),
            callable: None,
            fields: RefCell::new(fields),
        })
    }

    pub fn new_native(
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, Failure> + 'static,
    ) -> Rc<Self> {
        Rc::new(JsObject {
            name: name.into(),
            callable: Some(Callable::Native(Rc::new(f))),
            fields: RefCell::new(Vec::new()),
        })
    }

    pub fn new_compiled(name: impl Into<String>, code: Code) -> Rc<Self> {
        Rc::new(JsObject {
            name: name.into(),
            callable: Some(Callable::Compiled(Rc::new(code))),
            fields: RefCell::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callable(&self) -> Option<&Callable> {
        self.callable.as_ref()
    }

    pub fn is_callable(&self) -> bool {
        self.callable.is_some()
    }

    /// Compiled instruction stream, `None` for natives and plain objects.
    pub fn code(&self) -> Option<&Rc<Code>> {
        match &self.callable {
            Some(Callable::Compiled(code)) => Some(code),
            _ => None,
        }
    }

    /// Call a native function. Compiled functions only run inside the engine.
    pub fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value, Failure> {
        match &self.callable {
            Some(Callable::Native(f)) => f(receiver, args),
            Some(Callable::Compiled(_)) => Err(Failure::new(format!(
                "{} is compiled for the stack engine and cannot be called directly",
                self.name
            ))),
            None => Err(Failure::new(format!("{} is not a function", self))),
        }
    }

    /// Field read; absent fields read as `undefined`.
    pub fn get(&self, name: &str) -> Value {
        self.fields
            .borrow()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Undefined)
    }

    /// Field write; creates the field when absent.
    pub fn set(&self, name: &str, value: Value) {
        let mut fields = self.fields.borrow_mut();
        match fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = value,
            None => fields.push((name.to_string(), value)),
        }
    }
}

impl fmt::Display for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_callable() {
            return write!(f, "function {}", self.name);
        }
        let fields = self.fields.borrow();
        if fields.is_empty() {
            return write!(f, "{{}}");
        }
        write!(f, "{{ ")?;
        for (i, (k, v)) in fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, " }}")
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.callable {
            None => "object",
            Some(Callable::Native(_)) => "native",
            Some(Callable::Compiled(_)) => "compiled",
        };
        f.debug_struct("JsObject")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Class descriptor: the field layout of heap object records. Field `i`
/// lives in slot `i` after the record header.
#[derive(Debug, PartialEq, Eq)]
pub struct Shape {
    name: String,
    fields: Vec<String>,
}

impl Shape {
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Rc<Self> {
        Rc::new(Shape { name: name.into(), fields })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn slot_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }
}
