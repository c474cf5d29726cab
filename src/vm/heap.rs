use std::rc::Rc;

use tracing::trace;

use super::dictionary::Dictionary;
use super::tagged::{InvalidWord, Tagged, Word};
use crate::runtime::{Shape, Value};

/// Header words in front of every record: class word, then mark word.
pub const HEADER_WORDS: usize = 2;

const CLASS: usize = 0;
const MARK: usize = 1;

/// Written into every mark word. No collector reads it yet.
pub const MARK_UNUSED: Word = Word::from_int(-2);

/// Handle to a record in the heap. Only the heap hands these out, and every
/// access through one is bounds-checked against the heap pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    pub(crate) fn from_offset(offset: u32) -> Self {
        ObjRef(offset)
    }

    pub fn offset(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("heap exhausted: {requested} words requested, {available} available")]
    Exhausted { requested: usize, available: usize },
    #[error("invalid field {0}")]
    UnknownField(String),
    #[error("dangling object reference @{0}")]
    Dangling(usize),
    #[error("record @{0} has no class descriptor")]
    NoClass(usize),
    #[error(transparent)]
    Invalid(#[from] InvalidWord),
}

/// Bump arena of words. Records are laid out `[class, mark, fields...]` and
/// never move or get reclaimed.
pub struct Heap {
    words: Box<[Word]>,
    hp: usize,
}

impl Heap {
    pub fn with_capacity(capacity: usize) -> Self {
        Heap {
            words: vec![Word::UNDEFINED; capacity].into_boxed_slice(),
            hp: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    /// Next free word.
    pub fn pointer(&self) -> usize {
        self.hp
    }

    pub fn allocate(&mut self, class: Word, fields: &[Word]) -> Result<ObjRef, HeapError> {
        let requested = HEADER_WORDS + fields.len();
        let available = self.capacity() - self.hp;
        if requested > available {
            return Err(HeapError::Exhausted { requested, available });
        }
        let offset = u32::try_from(self.hp)
            .map_err(|_| HeapError::Exhausted { requested, available })?;
        let base = self.hp;
        self.words[base + CLASS] = class;
        self.words[base + MARK] = MARK_UNUSED;
        self.words[base + HEADER_WORDS..base + requested].copy_from_slice(fields);
        self.hp += requested;
        trace!(offset = base, words = requested, "allocated record");
        Ok(ObjRef(offset))
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        r.offset() + HEADER_WORDS <= self.hp
    }

    fn header(&self, r: ObjRef) -> Result<usize, HeapError> {
        if self.contains(r) {
            Ok(r.offset())
        } else {
            Err(HeapError::Dangling(r.offset()))
        }
    }

    pub fn class_word(&self, r: ObjRef) -> Result<Word, HeapError> {
        Ok(self.words[self.header(r)? + CLASS])
    }

    pub fn mark_word(&self, r: ObjRef) -> Result<Word, HeapError> {
        Ok(self.words[self.header(r)? + MARK])
    }

    /// The class descriptor a record was allocated with.
    pub fn shape(&self, r: ObjRef, dict: &Dictionary) -> Result<Rc<Shape>, HeapError> {
        let class = self.class_word(r)?;
        match class.tag()? {
            Tagged::Interned(index) => match dict.get(index) {
                Some(Value::Shape(shape)) => Ok(Rc::clone(shape)),
                _ => Err(HeapError::NoClass(r.offset())),
            },
            _ => Err(HeapError::NoClass(r.offset())),
        }
    }

    fn slot(&self, r: ObjRef, slot: usize) -> Result<usize, HeapError> {
        let at = self.header(r)? + HEADER_WORDS + slot;
        if at < self.hp {
            Ok(at)
        } else {
            Err(HeapError::Dangling(r.offset()))
        }
    }

    /// Field read. Names the class does not declare read as `undefined`.
    pub fn get_field(&self, r: ObjRef, name: &str, dict: &Dictionary) -> Result<Word, HeapError> {
        match self.shape(r, dict)?.slot_of(name) {
            Some(slot) => Ok(self.words[self.slot(r, slot)?]),
            None => Ok(Word::UNDEFINED),
        }
    }

    /// Field write. Only declared fields can be written.
    pub fn set_field(
        &mut self,
        r: ObjRef,
        name: &str,
        value: Word,
        dict: &Dictionary,
    ) -> Result<(), HeapError> {
        let slot = self
            .shape(r, dict)?
            .slot_of(name)
            .ok_or_else(|| HeapError::UnknownField(name.to_string()))?;
        let at = self.slot(r, slot)?;
        self.words[at] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tagged::encode;

    fn point(dict: &mut Dictionary) -> Word {
        let shape = Shape::new("point", vec!["x".to_string(), "y".to_string()]);
        encode(&Value::Shape(shape), dict)
    }

    #[test]
    fn allocation_bumps_by_header_plus_fields() {
        let mut dict = Dictionary::new();
        let class = point(&mut dict);
        let mut heap = Heap::with_capacity(32);
        let a = heap.allocate(class, &[Word::from_int(1), Word::from_int(2)]).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(heap.pointer(), 4);
        let b = heap.allocate(class, &[Word::from_int(3), Word::from_int(4)]).unwrap();
        assert_eq!(b.offset(), 4);
        assert_eq!(heap.pointer(), 8);
        assert_eq!(heap.mark_word(a), Ok(MARK_UNUSED));
        assert_eq!(heap.class_word(b), Ok(class));
    }

    #[test]
    fn fields_read_and_write() {
        let mut dict = Dictionary::new();
        let class = point(&mut dict);
        let mut heap = Heap::with_capacity(32);
        let r = heap.allocate(class, &[Word::from_int(1), Word::from_int(2)]).unwrap();
        assert_eq!(heap.get_field(r, "y", &dict), Ok(Word::from_int(2)));
        heap.set_field(r, "y", Word::TRUE, &dict).unwrap();
        assert_eq!(heap.get_field(r, "y", &dict), Ok(Word::TRUE));
        assert_eq!(heap.get_field(r, "x", &dict), Ok(Word::from_int(1)));
    }

    #[test]
    fn undeclared_fields() {
        let mut dict = Dictionary::new();
        let class = point(&mut dict);
        let mut heap = Heap::with_capacity(32);
        let r = heap.allocate(class, &[Word::from_int(1), Word::from_int(2)]).unwrap();
        assert_eq!(heap.get_field(r, "z", &dict), Ok(Word::UNDEFINED));
        assert_eq!(
            heap.set_field(r, "z", Word::TRUE, &dict),
            Err(HeapError::UnknownField("z".to_string()))
        );
    }

    #[test]
    fn exact_fit_succeeds_and_overflow_fails() {
        let mut dict = Dictionary::new();
        let class = point(&mut dict);
        let mut heap = Heap::with_capacity(4);
        heap.allocate(class, &[Word::from_int(1), Word::from_int(2)]).unwrap();
        assert_eq!(heap.pointer(), 4);
        assert_eq!(
            heap.allocate(class, &[]),
            Err(HeapError::Exhausted { requested: 2, available: 0 })
        );
        assert_eq!(heap.pointer(), 4);
    }

    #[test]
    fn references_past_the_heap_pointer_are_rejected() {
        let dict = Dictionary::new();
        let heap = Heap::with_capacity(8);
        let r = ObjRef::from_offset(0);
        assert!(!heap.contains(r));
        assert_eq!(heap.get_field(r, "x", &dict), Err(HeapError::Dangling(0)));
    }
}
