use std::collections::HashMap;
use std::rc::Rc;

use crate::runtime::Value;

/// Stable position of an interned value. Only the codec turns these into
/// words and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DictIndex(u32);

impl DictIndex {
    pub(crate) fn from_raw(raw: u32) -> Self {
        DictIndex(raw)
    }

    pub(crate) fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InternKey {
    Undefined,
    Bool(bool),
    Int(i32),
    Str(Rc<str>),
    Object(usize),
    Shape(usize),
    Ref(usize),
}

impl InternKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Undefined => InternKey::Undefined,
            Value::Bool(b) => InternKey::Bool(*b),
            Value::Int(n) => InternKey::Int(*n),
            Value::Str(s) => InternKey::Str(Rc::clone(s)),
            Value::Object(o) => InternKey::Object(Rc::as_ptr(o) as usize),
            Value::Shape(s) => InternKey::Shape(Rc::as_ptr(s) as usize),
            Value::Ref(r) => InternKey::Ref(r.offset()),
        }
    }
}

/// Append-only interning arena for everything a word cannot hold inline:
/// strings by content, objects and shapes by identity. Entries are never
/// removed, so the pointer keys stay valid for the arena's lifetime.
#[derive(Debug, Default)]
pub struct Dictionary {
    entries: Vec<Value>,
    index: HashMap<InternKey, DictIndex>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &Value) -> DictIndex {
        let key = InternKey::of(value);
        if let Some(&index) = self.index.get(&key) {
            return index;
        }
        let index = DictIndex(self.entries.len() as u32);
        self.entries.push(value.clone());
        self.index.insert(key, index);
        index
    }

    pub fn get(&self, index: DictIndex) -> Option<&Value> {
        self.entries.get(index.0 as usize)
    }

    /// Shorthand for interned names (LOOKUP/REGISTER/GET/PUT operands).
    pub fn name(&self, index: DictIndex) -> Option<&str> {
        match self.get(index)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
