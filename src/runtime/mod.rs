//! Host-side object model shared by both evaluators.
//!
//! The tree-walker manipulates these values directly; the stack VM only
//! sees them at its boundaries (constants, globals, native calls) and packs
//! them into tagged words everywhere else.

mod builtins;
mod env;
mod object;

pub use env::{Env, Sink};
pub use object::{Callable, JsObject, NativeFn, Shape};

use std::fmt;
use std::rc::Rc;

use crate::vm::ObjRef;

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Int(i32),
    Str(Rc<str>),
    Object(Rc<JsObject>),
    Shape(Rc<Shape>),
    /// Object record living in the VM heap.
    Ref(ObjRef),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_object(&self) -> Option<&Rc<JsObject>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Object(o) if o.is_callable() => "function",
            Value::Object(_) => "object",
            Value::Shape(_) => "class",
            Value::Ref(_) => "object",
        }
    }
}

/// Scalars and strings compare by value, everything with identity by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Shape(a), Value::Shape(b)) => Rc::ptr_eq(a, b),
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(o) => write!(f, "{}", o),
            Value::Shape(s) => write!(f, "class {}", s.name()),
            Value::Ref(r) => write!(f, "object@{}", r.offset()),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<Rc<JsObject>> for Value {
    fn from(o: Rc<JsObject>) -> Self {
        Value::Object(o)
    }
}

/// A language-level error: wrong arity, calling a non-function, bad field
/// write, type errors in builtins. There is no in-language recovery, so a
/// failure always aborts the running script.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct Failure {
    pub message: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Failure { message: message.into() }
    }

    pub fn not_a_function(callee: &Value) -> Self {
        match callee {
            Value::Undefined => Failure::new("Cannot call undefined as a function"),
            other => Failure::new(format!("{} is not a function", other)),
        }
    }

    pub fn wrong_arity(name: &str, expected: usize, actual: usize) -> Self {
        Failure::new(format!(
            "wrong number of arguments for {} expected {} but was {}",
            name, expected, actual
        ))
    }

    pub fn no_fields(field: &str, target: &Value) -> Self {
        Failure::new(format!("cannot access field {} of {}", field, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_compare_by_content() {
        assert_eq!(Value::str("abc"), Value::from("abc"));
        assert_ne!(Value::str("abc"), Value::str("abd"));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = JsObject::new_object(vec![]);
        let b = JsObject::new_object(vec![]);
        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn int_and_bool_are_distinct() {
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::Int(0), Value::Undefined);
    }

    #[test]
    fn display_scalars() {
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Undefined.to_string(), "undefined");
        assert_eq!(Value::str("hi").to_string(), "hi");
    }

    #[test]
    fn failure_messages() {
        assert_eq!(
            Failure::not_a_function(&Value::Undefined).message,
            "Cannot call undefined as a function"
        );
        assert_eq!(Failure::not_a_function(&Value::Int(3)).message, "3 is not a function");
        assert_eq!(
            Failure::wrong_arity("add", 2, 1).message,
            "wrong number of arguments for add expected 2 but was 1"
        );
        assert_eq!(
            Failure::no_fields("x", &Value::Undefined).message,
            "cannot access field x of undefined"
        );
    }
}
